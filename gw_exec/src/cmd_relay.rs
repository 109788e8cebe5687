//! # Command relay
//!
//! Turns the text messages of a velocity WebSocket into velocity commands for the rover. Every
//! valid message is forwarded as one command, straight away, with no rate limiting or coalescing.
//! A message that can't be parsed is answered with an error text and the connection carries on.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{fmt::Display, sync::Arc};

use comms_if::{api::VelocityMsg, net::zmq};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, trace, warn};
use tokio_util::sync::CancellationToken;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Outbound destination of velocity commands.
///
/// Publishing must not block, a command that can't be sent right away is dropped with an error.
#[cfg_attr(test, mockall::automock)]
pub trait CommandSink: Send + Sync {
    fn publish(&self, cmd: VelocityCommand) -> Result<(), CommandSinkError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A planar velocity command.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityCommand {
    /// Forward speed, meters/second
    pub linear: f64,

    /// Turn rate, radians/second
    pub angular: f64,
}

/// Relay of one connection.
pub struct CommandRelay {
    sink: Arc<dyn CommandSink>,

    /// Ends the relay when cancelled, whatever the client is doing
    shutdown: CancellationToken,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A message received on the connection, independent of the WebSocket implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMsg {
    Text(String),

    /// The client closed the connection
    Close,

    /// Binary, ping and pong frames
    Other,

    /// The transport failed
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandSinkError {
    #[error("Could not serialize the command: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not send the command: {0}")]
    SendError(zmq::Error),

    #[error("The command sink is poisoned")]
    Poisoned,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl From<VelocityMsg> for VelocityCommand {
    fn from(msg: VelocityMsg) -> Self {
        Self {
            linear: msg.linear,
            angular: msg.angular,
        }
    }
}

impl CommandRelay {
    pub fn new(sink: Arc<dyn CommandSink>, shutdown: CancellationToken) -> Self {
        Self { sink, shutdown }
    }

    /// Relay messages from `inbound` until the connection ends or the relay is shut down, replying
    /// on `outbound`.
    ///
    /// Returns the number of commands forwarded.
    pub async fn run<I, O>(&self, mut inbound: I, mut outbound: O) -> u64
    where
        I: Stream<Item = InboundMsg> + Unpin,
        O: Sink<String> + Unpin,
        O::Error: Display,
    {
        let mut num_cmds: u64 = 0;

        loop {
            let msg = tokio::select! {
                msg = inbound.next() => msg,
                _ = self.shutdown.cancelled() => {
                    debug!("Closing the velocity connection for shutdown");
                    break;
                }
            };

            let text = match msg {
                None => break,
                Some(InboundMsg::Text(t)) => t,
                Some(InboundMsg::Other) => {
                    trace!("Ignoring non-text frame");
                    continue;
                }
                Some(InboundMsg::Close) => {
                    debug!("Velocity connection closed by the client");
                    break;
                }
                Some(InboundMsg::Error(e)) => {
                    debug!("Velocity connection dropped: {}", e);
                    break;
                }
            };

            match parse_command(&text) {
                Ok(cmd) => match self.sink.publish(cmd) {
                    Ok(()) => {
                        num_cmds += 1;
                        trace!("Published {:?}", cmd);
                    }
                    Err(e) => warn!("Could not publish velocity command: {}", e),
                },
                Err(e) => {
                    debug!("Bad velocity message {:?}: {}", text, e);
                    if let Err(e) = outbound.send(format!("Error parsing: {}", e)).await {
                        debug!("Could not reply, closing the relay: {}", e);
                        break;
                    }
                }
            }
        }

        num_cmds
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Parse a `{linear?, angular?}` message, missing fields are zero.
pub fn parse_command(text: &str) -> Result<VelocityCommand, serde_json::Error> {
    serde_json::from_str::<VelocityMsg>(text).map(VelocityCommand::from)
}

#[cfg(test)]
mod test {
    use super::*;
    use futures_util::stream;
    use mockall::predicate::eq;
    use std::time::Duration;

    fn texts(msgs: &[&str]) -> Vec<InboundMsg> {
        msgs.iter().map(|m| InboundMsg::Text(m.to_string())).collect()
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command(r#"{"linear":0.5,"angular":-0.2}"#).unwrap(),
            VelocityCommand {
                linear: 0.5,
                angular: -0.2
            }
        );
        assert_eq!(
            parse_command(r#"{"linear":0.5}"#).unwrap(),
            VelocityCommand {
                linear: 0.5,
                angular: 0.0
            }
        );
        assert_eq!(parse_command("{}").unwrap(), VelocityCommand::default());
        assert!(parse_command("forward").is_err());
        assert!(parse_command(r#"{"linear":"fast"}"#).is_err());
    }

    #[tokio::test]
    async fn test_commands_forwarded_in_order() {
        let mut sink = MockCommandSink::new();
        let mut seq = mockall::Sequence::new();
        sink.expect_publish()
            .with(eq(VelocityCommand {
                linear: 0.5,
                angular: -0.2,
            }))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        sink.expect_publish()
            .with(eq(VelocityCommand {
                linear: 1.0,
                angular: 0.0,
            }))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let relay = CommandRelay::new(Arc::new(sink), CancellationToken::new());
        let mut replies: Vec<String> = Vec::new();

        let n = relay
            .run(
                stream::iter(texts(&[r#"{"linear":0.5,"angular":-0.2}"#, r#"{"linear":1}"#])),
                &mut replies,
            )
            .await;

        assert_eq!(n, 2);
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_parse_error_replies_and_continues() {
        let mut sink = MockCommandSink::new();
        sink.expect_publish().times(1).returning(|_| Ok(()));

        let relay = CommandRelay::new(Arc::new(sink), CancellationToken::new());
        let mut replies: Vec<String> = Vec::new();

        let n = relay
            .run(
                stream::iter(texts(&["not json", r#"{"angular":0.3}"#])),
                &mut replies,
            )
            .await;

        assert_eq!(n, 1);
        assert_eq!(replies.len(), 1);
        assert!(replies[0].starts_with("Error parsing: "));
    }

    #[tokio::test]
    async fn test_close_and_other_frames() {
        let mut sink = MockCommandSink::new();
        sink.expect_publish().times(1).returning(|_| Ok(()));

        let relay = CommandRelay::new(Arc::new(sink), CancellationToken::new());
        let mut replies: Vec<String> = Vec::new();

        let msgs = vec![
            InboundMsg::Other,
            InboundMsg::Text(r#"{"linear":0.1}"#.into()),
            InboundMsg::Close,
            // Never reached
            InboundMsg::Text(r#"{"linear":0.2}"#.into()),
        ];
        let n = relay.run(stream::iter(msgs), &mut replies).await;

        assert_eq!(n, 1);
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_sink_errors_dont_end_relay() {
        let mut sink = MockCommandSink::new();
        sink.expect_publish()
            .times(3)
            .returning(|_| Err(CommandSinkError::SendError(zmq::Error::EAGAIN)));

        let relay = CommandRelay::new(Arc::new(sink), CancellationToken::new());
        let mut replies: Vec<String> = Vec::new();

        let n = relay
            .run(stream::iter(texts(&["{}", "{}", "{}"])), &mut replies)
            .await;

        assert_eq!(n, 0);
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_ends_idle_connection() {
        let mut sink = MockCommandSink::new();
        sink.expect_publish().times(1).returning(|_| Ok(()));

        let shutdown = CancellationToken::new();
        let relay = CommandRelay::new(Arc::new(sink), shutdown.clone());
        let mut replies: Vec<String> = Vec::new();

        // One command, then a client that never sends or closes
        let inbound = stream::iter(texts(&[r#"{"linear":0.1}"#])).chain(stream::pending());

        let run = relay.run(inbound, &mut replies);
        tokio::pin!(run);

        // Still open while the gateway runs
        assert!(tokio::time::timeout(Duration::from_millis(20), &mut run)
            .await
            .is_err());

        shutdown.cancel();
        let n = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap();
        assert_eq!(n, 1);
    }
}
