//! Main gateway executable entry point.
//!
//! # Architecture
//!
//! The executable:
//!
//!     - Initialises the session and logging
//!     - Loads its parameters
//!     - Connects to the rover's services:
//!         - Navigation server (or the simulated navigator)
//!         - Localisation feed
//!         - Velocity command publisher
//!         - Video publisher
//!     - Serves the HTTP/WebSocket gateway until Ctrl-C is received

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{error, info, warn};
use std::{
    future::IntoFuture,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use structopt::StructOpt;
use tokio_util::sync::CancellationToken;

// Internal
use comms_if::net::zmq;
use gw_lib::{
    cmd_client::ZmqCmdVelPublisher,
    ctx::GwContext,
    gateway,
    loc::{LocFeed, PoseCache},
    map_store::MapStore,
    mapping::MappingMgr,
    nav_client::{sim::SimNav, NavSubsystem, ZmqNavClient},
    nav_mgr::{LogFeedbackSink, TaskOrchestrator},
    params::{GwExecParams, NavBackend},
    video_client::ZmqVideoSource,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "gw_exec", about = "Navigation and video gateway for the rover")]
struct Opts {
    /// Parameter file, relative to the params directory of the software root
    #[structopt(short, long, default_value = "gw_exec.toml")]
    params: String,

    /// Address to serve on, overriding the parameter file
    #[structopt(short, long)]
    bind: Option<String>,

    /// Use the simulated navigation subsystem
    #[structopt(long)]
    sim: bool,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
#[tokio::main]
async fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("gw_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Navigation Gateway Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let mut params: GwExecParams =
        util::params::load(&opts.params).wrap_err("Could not load gateway params")?;

    if let Some(bind) = opts.bind {
        params.http.bind_addr = bind;
    }
    if opts.sim {
        params.nav_backend = NavBackend::Sim;
    }

    info!("Exec parameters loaded");

    // ---- INITIALISE COMPONENTS ----

    let zmq_ctx = zmq::Context::new();
    let pose_cache = Arc::new(PoseCache::new());

    let nav: Arc<dyn NavSubsystem> = match params.nav_backend {
        NavBackend::Zmq => Arc::new(
            ZmqNavClient::new(&zmq_ctx, &params.net)
                .wrap_err("Failed to initialise the navigation client")?,
        ),
        NavBackend::Sim => {
            warn!("Using the simulated navigation subsystem");
            Arc::new(SimNav::new(params.sim.clone()))
        }
    };
    info!("Navigation subsystem initialised ({:?})", params.nav_backend);

    let loc_feed = LocFeed::start(&zmq_ctx, &params.net, pose_cache.clone())
        .wrap_err("Failed to start the localisation feed")?;

    let cmd_sink = Arc::new(
        ZmqCmdVelPublisher::new(&zmq_ctx, &params.net)
            .wrap_err("Failed to initialise the velocity command publisher")?,
    );

    let video_source = Arc::new(ZmqVideoSource::new(
        zmq_ctx.clone(),
        &params.net.video_endpoint,
        params.video.channel_depth,
    ));

    let map_store = Arc::new(MapStore::new(
        resolve_sw_path(&params.maps.maps_dir).wrap_err("Could not locate the maps directory")?,
    ));
    info!("Maps directory: {:?}", map_store.dir());

    let mapping = Arc::new(MappingMgr::new(params.mapping.clone(), map_store.clone()));

    let orchestrator = Arc::new(TaskOrchestrator::new(
        nav,
        pose_cache.clone(),
        Arc::new(LogFeedbackSink),
        params.nav.clone(),
    ));

    let shutdown = CancellationToken::new();

    let ctx = GwContext {
        pose_cache,
        orchestrator: orchestrator.clone(),
        cmd_sink,
        video_source,
        map_store,
        mapping: mapping.clone(),
        video: params.video.clone(),
        default_map: params.maps.default_map.clone(),
        shutdown: shutdown.clone(),
    };

    // ---- SERVE ----

    let listener = tokio::net::TcpListener::bind(&params.http.bind_addr)
        .await
        .wrap_err_with(|| format!("Could not bind to {}", params.http.bind_addr))?;
    info!("Gateway listening on {}", params.http.bind_addr);

    let server = axum::serve(listener, gateway::router(ctx))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();

    let grace = Duration::from_millis(params.http.shutdown_grace_ms);
    let stopping = async {
        shutdown_signal().await;

        // Ends the video and velocity connections
        shutdown.cancel();

        // Ends a running goal or backup, its request then returns
        if let Err(e) = orchestrator.cancel().await {
            warn!("Could not cancel the running task: {}", e);
        }

        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        res = server => res.wrap_err("Gateway server error")?,
        _ = stopping => warn!(
            "Connections still open {} ms after shutdown started, closing them",
            grace.as_millis()
        ),
    }

    // ---- SHUTDOWN ----

    info!("Shutting down");

    if let Err(e) = mapping.stop().await {
        warn!("Could not stop mapping: {}", e);
    }

    // Joining the feed thread blocks for up to one receive timeout
    if tokio::task::spawn_blocking(move || loc_feed.stop())
        .await
        .is_err()
    {
        warn!("Could not stop the localisation feed");
    }

    session.exit();

    Ok(())
}

/// Resolve a path from the parameters, relative paths are taken from the software root.
fn resolve_sw_path(path: &Path) -> Result<PathBuf, std::env::VarError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(host::get_sw_root()?.join(path))
    }
}

/// Resolves once Ctrl-C has been received.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received"),
        Err(e) => {
            error!("Could not listen for Ctrl-C, the gateway can't be shut down cleanly: {}", e);
            std::future::pending::<()>().await
        }
    }
}
