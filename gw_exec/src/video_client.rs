//! # Video client
//!
//! Opens byte streams of the rover's video topics. Each stream gets its own subscriber socket on
//! a dedicated thread, feeding a bounded channel. When the receiving side is dropped (the HTTP
//! client went away) the thread exits and its socket is closed, leaving other streams alone.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::thread;

use bytes::Bytes;
use comms_if::{
    eqpt::video::is_valid_topic,
    net::{zmq, MonitoredSocket, MonitoredSocketError, RecvTopicError, SocketOptions},
};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Chunks of a video byte stream.
pub type VideoStream = ReceiverStream<Result<Bytes, VideoSourceError>>;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Source of video byte streams by topic.
pub trait VideoSource: Send + Sync {
    fn open(&self, topic: &str) -> Result<VideoStream, VideoSourceError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Video source subscribing to the rover's video publisher.
pub struct ZmqVideoSource {
    ctx: zmq::Context,
    endpoint: String,
    channel_depth: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum VideoSourceError {
    #[error("Invalid video topic {0:?}")]
    InvalidTopic(String),

    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not subscribe to the video topic: {0}")]
    SubscribeError(zmq::Error),

    #[error("Could not receive video from the server: {0}")]
    RecvError(RecvTopicError),

    #[error("No video received on {0:?} within the timeout")]
    NoData(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ZmqVideoSource {
    pub fn new(ctx: zmq::Context, endpoint: &str, channel_depth: usize) -> Self {
        Self {
            ctx,
            endpoint: endpoint.into(),
            channel_depth: channel_depth.max(1),
        }
    }
}

impl VideoSource for ZmqVideoSource {
    fn open(&self, topic: &str) -> Result<VideoStream, VideoSourceError> {
        if !is_valid_topic(topic) {
            return Err(VideoSourceError::InvalidTopic(topic.into()));
        }

        let socket_options = SocketOptions {
            block_on_first_connect: false,
            connect_timeout: 1000,
            linger: 0,
            recv_timeout: 100,
            recv_hwm: 64,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(&self.ctx, zmq::SUB, socket_options, &self.endpoint)
            .map_err(VideoSourceError::SocketError)?;
        socket
            .set_subscribe(topic.as_bytes())
            .map_err(VideoSourceError::SubscribeError)?;

        let (tx, rx) = mpsc::channel(self.channel_depth);
        let topic = topic.to_owned();

        info!("Opened video stream {:?}", topic);
        thread::spawn(move || bg_thread(socket, topic, tx));

        Ok(ReceiverStream::new(rx))
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Background thread, forwards chunks of `topic` until the receiver goes away.
fn bg_thread(
    socket: MonitoredSocket,
    topic: String,
    tx: mpsc::Sender<Result<Bytes, VideoSourceError>>,
) {
    let mut num_chunks: u64 = 0;

    while !tx.is_closed() {
        let (msg_topic, payload) = match socket.recv_topic(0) {
            Ok(m) => m,
            Err(ref e) if e.is_retryable() => continue,
            Err(RecvTopicError::Malformed(n)) => {
                warn!("Dropping video message of {} parts on {:?}", n, topic);
                continue;
            }
            Err(e) => {
                error!("Error receiving video on {:?}: {}", topic, e);
                tx.blocking_send(Err(VideoSourceError::RecvError(e))).ok();
                break;
            }
        };

        // Subscriptions match on prefix, so longer topic names also arrive here
        if msg_topic != topic {
            continue;
        }

        // Blocks while the channel is full, which is what throttles this stream
        if tx.blocking_send(Ok(Bytes::from(payload))).is_err() {
            break;
        }
        num_chunks += 1;
    }

    debug!(
        "Video stream {:?} closed after {} chunks",
        topic, num_chunks
    );
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_invalid_topic_rejected() {
        let source = ZmqVideoSource::new(zmq::Context::new(), "tcp://localhost:5103", 4);

        assert!(matches!(
            source.open("../etc"),
            Err(VideoSourceError::InvalidTopic(_))
        ));
        assert!(matches!(
            source.open(""),
            Err(VideoSourceError::InvalidTopic(_))
        ));
    }
}
