//! # Navigation client
//!
//! The navigation subsystem plans, smooths and follows paths and performs backups on behalf of the
//! gateway. [`NavSubsystem`] is the interface the task orchestrator drives, [`ZmqNavClient`] talks
//! to the rover's navigation server over REQ/REP and [`sim::SimNav`] simulates one in-process.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod sim;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use comms_if::{
    eqpt::nav::{NavCmd, NavFeedback, NavPath, NavRep, NavResultCode, NavTaskError, PoseStamped},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};
use log::{debug, trace};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Operations offered by a navigation subsystem.
///
/// Only one task (path following or backup) runs at a time on the subsystem. Starting a task
/// returns once the subsystem has accepted it, progress is then polled with
/// [`NavSubsystem::is_task_complete`].
#[async_trait]
pub trait NavSubsystem: Send + Sync {
    /// Whether the subsystem is up and accepting tasks.
    async fn is_active(&self) -> Result<bool, NavClientError>;

    /// Plan a path from `start` to `goal`.
    async fn compute_path(
        &self,
        start: PoseStamped,
        goal: PoseStamped,
    ) -> Result<NavPath, NavClientError>;

    /// Smooth a planned path.
    async fn smooth_path(&self, path: NavPath) -> Result<NavPath, NavClientError>;

    /// Start following `path`.
    async fn follow_path(&self, path: NavPath) -> Result<(), NavClientError>;

    /// Start backing up in a straight line.
    async fn backup(
        &self,
        dist_m: f64,
        speed_ms: f64,
        time_allowance_s: u32,
    ) -> Result<(), NavClientError>;

    async fn is_task_complete(&self) -> Result<bool, NavClientError>;

    /// Latest feedback of the running task, if any has been published.
    async fn get_feedback(&self) -> Result<Option<NavFeedback>, NavClientError>;

    /// Result code of the last finished task.
    async fn get_result(&self) -> Result<NavResultCode, NavClientError>;

    /// Error details of the last failed task, if the subsystem provides them.
    async fn get_task_error(&self) -> Result<Option<NavTaskError>, NavClientError>;

    async fn cancel_task(&self) -> Result<(), NavClientError>;

    /// Poll [`NavSubsystem::is_active`] every `period` until it reports active, failing with
    /// [`NavClientError::NotActive`] once `timeout` has elapsed.
    async fn wait_until_active(
        &self,
        period: Duration,
        timeout: Duration,
    ) -> Result<(), NavClientError> {
        let start = Instant::now();

        loop {
            if self.is_active().await? {
                return Ok(());
            }

            if start.elapsed() >= timeout {
                return Err(NavClientError::NotActive(timeout));
            }

            debug!("Waiting for the navigation subsystem to become active");
            tokio::time::sleep(period).await;
        }
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Client of the rover's navigation server.
///
/// Requests are blocking ZMQ exchanges, each one is run on the blocking thread pool so the async
/// runtime is never stalled. The socket is shared behind a mutex, which also keeps the REQ/REP
/// alternation intact when several tasks use the client.
pub struct ZmqNavClient {
    socket: Arc<Mutex<MonitoredSocket>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NavClientError {
    #[error("The navigation subsystem rejected the request: {0}")]
    Rejected(String),

    #[error("The navigation subsystem did not become active within {0:?}")]
    NotActive(Duration),

    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("The client is not connected to the server")]
    NotConnected,

    #[error("Could not send request to the server: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message from the server: {0}")]
    RecvError(zmq::Error),

    #[error("The server responed with a message which was not valid UTF-8")]
    NonUtf8Response,

    #[error("Could not serialize the request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the response from the server: {0}")]
    DeserializeError(serde_json::Error),

    #[error("Unexpected response from the server: {0:?}")]
    UnexpectedReply(NavRep),

    #[error("The client socket mutex is poisoned")]
    Poisoned,

    #[error("The request task failed: {0}")]
    TaskJoinError(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NavClientError {
    /// True if the request reached the subsystem and was refused, rather than failing to reach it.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl ZmqNavClient {
    /// Create a new client of the navigation server.
    ///
    /// The connection is not awaited, requests made before the server is up fail with
    /// [`NavClientError::NotConnected`].
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, NavClientError> {
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: params.nav_timeout_ms,
            send_timeout: params.nav_timeout_ms,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::REQ, socket_options, &params.nav_endpoint)
            .map_err(NavClientError::SocketError)?;

        Ok(Self {
            socket: Arc::new(Mutex::new(socket)),
        })
    }

    /// Send a command and wait for its reply on the blocking pool.
    async fn request(&self, cmd: NavCmd) -> Result<NavRep, NavClientError> {
        let socket = self.socket.clone();

        tokio::task::spawn_blocking(move || {
            let socket = socket.lock().map_err(|_| NavClientError::Poisoned)?;
            exchange(&socket, &cmd)
        })
        .await
        .map_err(|e| NavClientError::TaskJoinError(e.to_string()))?
    }
}

#[async_trait]
impl NavSubsystem for ZmqNavClient {
    async fn is_active(&self) -> Result<bool, NavClientError> {
        match self.request(NavCmd::IsActive).await? {
            NavRep::Active(a) => Ok(a),
            rep => Err(reply_error(rep)),
        }
    }

    async fn compute_path(
        &self,
        start: PoseStamped,
        goal: PoseStamped,
    ) -> Result<NavPath, NavClientError> {
        match self.request(NavCmd::ComputePath { start, goal }).await? {
            NavRep::Path(p) => Ok(p),
            rep => Err(reply_error(rep)),
        }
    }

    async fn smooth_path(&self, path: NavPath) -> Result<NavPath, NavClientError> {
        match self.request(NavCmd::SmoothPath { path }).await? {
            NavRep::Path(p) => Ok(p),
            rep => Err(reply_error(rep)),
        }
    }

    async fn follow_path(&self, path: NavPath) -> Result<(), NavClientError> {
        expect_accepted(self.request(NavCmd::FollowPath { path }).await?)
    }

    async fn backup(
        &self,
        dist_m: f64,
        speed_ms: f64,
        time_allowance_s: u32,
    ) -> Result<(), NavClientError> {
        expect_accepted(
            self.request(NavCmd::Backup {
                dist_m,
                speed_ms,
                time_allowance_s,
            })
            .await?,
        )
    }

    async fn is_task_complete(&self) -> Result<bool, NavClientError> {
        match self.request(NavCmd::IsTaskComplete).await? {
            NavRep::Complete(c) => Ok(c),
            rep => Err(reply_error(rep)),
        }
    }

    async fn get_feedback(&self) -> Result<Option<NavFeedback>, NavClientError> {
        match self.request(NavCmd::GetFeedback).await? {
            NavRep::Feedback(f) => Ok(f),
            rep => Err(reply_error(rep)),
        }
    }

    async fn get_result(&self) -> Result<NavResultCode, NavClientError> {
        match self.request(NavCmd::GetResult).await? {
            NavRep::Result(r) => Ok(r),
            rep => Err(reply_error(rep)),
        }
    }

    async fn get_task_error(&self) -> Result<Option<NavTaskError>, NavClientError> {
        match self.request(NavCmd::GetTaskError).await? {
            NavRep::TaskError(e) => Ok(e),
            rep => Err(reply_error(rep)),
        }
    }

    async fn cancel_task(&self) -> Result<(), NavClientError> {
        expect_accepted(self.request(NavCmd::CancelTask).await?)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Perform one blocking request/reply exchange.
fn exchange(socket: &MonitoredSocket, cmd: &NavCmd) -> Result<NavRep, NavClientError> {
    if !socket.connected() {
        return Err(NavClientError::NotConnected);
    }

    let msg = serde_json::to_string(cmd).map_err(NavClientError::SerializationError)?;
    trace!("NavCmd: {}", msg);
    socket.send(&msg, 0).map_err(NavClientError::SendError)?;

    let rep = match socket.recv_string(0) {
        Ok(Ok(s)) => s,
        Ok(Err(_)) => return Err(NavClientError::NonUtf8Response),
        Err(e) => return Err(NavClientError::RecvError(e)),
    };
    trace!("NavRep: {}", rep);

    serde_json::from_str(&rep).map_err(NavClientError::DeserializeError)
}

/// Map a reply that isn't the one expected for the command to an error.
fn reply_error(rep: NavRep) -> NavClientError {
    match rep {
        NavRep::Rejected(reason) => NavClientError::Rejected(reason),
        rep => NavClientError::UnexpectedReply(rep),
    }
}

fn expect_accepted(rep: NavRep) -> Result<(), NavClientError> {
    match rep {
        NavRep::Accepted => Ok(()),
        rep => Err(reply_error(rep)),
    }
}
