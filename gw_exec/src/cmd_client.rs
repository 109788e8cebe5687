//! # Velocity command client
//!
//! Publishes velocity commands to the rover on a PUB socket. Sends never block: with no subscriber
//! connected, or with the outbound queue full, commands are dropped.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Mutex;

use chrono::Utc;
use comms_if::{
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
    tc::cmd_vel::{CmdVel, CMD_VEL_TOPIC},
};
use log::info;

use crate::cmd_relay::{CommandSink, CommandSinkError, VelocityCommand};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct ZmqCmdVelPublisher {
    socket: Mutex<MonitoredSocket>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ZmqCmdVelPublisher {
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, MonitoredSocketError> {
        let socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            linger: 0,
            send_hwm: 10,
            ..Default::default()
        };

        let socket =
            MonitoredSocket::new(ctx, zmq::PUB, socket_options, &params.cmd_vel_endpoint)?;

        info!("Publishing velocity commands on {}", params.cmd_vel_endpoint);

        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

impl CommandSink for ZmqCmdVelPublisher {
    fn publish(&self, cmd: VelocityCommand) -> Result<(), CommandSinkError> {
        let msg = CmdVel::planar(cmd.linear, cmd.angular, Utc::now());
        let payload = serde_json::to_vec(&msg).map_err(CommandSinkError::SerializationError)?;

        let socket = self.socket.lock().map_err(|_| CommandSinkError::Poisoned)?;
        socket
            .send_topic(CMD_VEL_TOPIC, &payload, zmq::DONTWAIT)
            .map_err(CommandSinkError::SendError)
    }
}
