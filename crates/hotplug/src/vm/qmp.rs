//! QMP client over a Unix socket
//!
//! Connection sequence: read the greeting, negotiate capabilities, probe
//! `query-status`. All three run under the connect timeout and any failure
//! is reported as [`HotplugError::Unreachable`]. After that each command is
//! one request, one reply, bounded by the command timeout.
//!
//! A command that times out is abandoned, not cancelled on the VM side. Its
//! late reply carries an older request id and is dropped when it arrives,
//! so the session stays usable.

use super::{ControlChannel, VmEndpoint, commands};
use crate::config::QmpSettings;
use crate::error::{HotplugError, Result};
use common::validate_vm_id;
use protocol::{
    Command, ProtocolError, QemuVersion, ServerMessage, read_message_async, read_message_resumable,
    write_command_async,
};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

const REQUEST_ID_PREFIX: &str = "usb-hotplug-";

/// Live QMP session with one VM
///
/// The socket closes when the channel is dropped.
#[derive(Debug)]
pub struct QmpChannel {
    vm_id: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Bytes of a reply line not yet complete when a read was abandoned
    pending: Vec<u8>,
    /// Set while a request is being written; still set means the write was
    /// cut short and the stream holds half a command
    writing: bool,
    command_timeout: Duration,
    next_request: u64,
    version: QemuVersion,
}

impl QmpChannel {
    /// Open and validate the session for `vm_id`
    pub async fn connect(vm_id: &str, settings: &QmpSettings) -> Result<Self> {
        validate_vm_id(vm_id)?;
        let path = settings.socket_path(vm_id);
        debug!("Connecting to VM {} at {}", vm_id, path.display());

        let attempt = Self::open(vm_id, &path, settings.command_timeout);
        let channel = match timeout(settings.connect_timeout, attempt).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                return Err(HotplugError::Unreachable {
                    vm_id: vm_id.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(HotplugError::Unreachable {
                    vm_id: vm_id.to_string(),
                    reason: format!("no answer within {:?}", settings.connect_timeout),
                });
            }
        };

        info!("Connected to VM {} (QEMU {})", vm_id, channel.version);
        Ok(channel)
    }

    async fn open(vm_id: &str, path: &Path, command_timeout: Duration) -> Result<Self> {
        let stream = UnixStream::connect(path).await.map_err(ProtocolError::from)?;
        let (read_half, writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let version = match read_message_async(&mut reader).await? {
            ServerMessage::Greeting { qmp } => qmp.version.qemu,
            other => {
                return Err(ProtocolError::UnexpectedMessage(format!(
                    "expected greeting, got {}",
                    other.kind()
                ))
                .into());
            }
        };

        let mut channel = Self {
            vm_id: vm_id.to_string(),
            reader,
            writer,
            pending: Vec::new(),
            writing: false,
            command_timeout,
            next_request: 0,
            version,
        };

        channel.execute(Command::qmp_capabilities()).await?;
        let status = commands::query_status(&mut channel).await?;
        if !status.running {
            warn!("VM {} is connected but not running ({})", vm_id, status.status);
        }
        Ok(channel)
    }

    /// QEMU version announced in the greeting
    pub fn version(&self) -> QemuVersion {
        self.version
    }

    async fn exchange(&mut self, command: &Command, request: u64) -> Result<Value> {
        self.writing = true;
        write_command_async(&mut self.writer, command).await?;
        self.writing = false;

        loop {
            let message = read_message_resumable(&mut self.reader, &mut self.pending).await?;
            if let Some(stale) = earlier_request(message.reply_id(), request) {
                debug!(
                    "VM {} late reply to abandoned request {} (skipped)",
                    self.vm_id, stale
                );
                continue;
            }
            match message {
                ServerMessage::Event { event, .. } => {
                    debug!("VM {} event {} (skipped)", self.vm_id, event);
                }
                ServerMessage::Return { value, id } => {
                    check_reply_id(id.as_ref(), request)?;
                    return Ok(value);
                }
                ServerMessage::Error { error, id } => {
                    check_reply_id(id.as_ref(), request)?;
                    return Err(HotplugError::Command {
                        command: command.execute.clone(),
                        class: error.class,
                        desc: error.desc,
                    });
                }
                ServerMessage::Greeting { .. } => {
                    return Err(ProtocolError::UnexpectedMessage(
                        "greeting in the middle of a session".to_string(),
                    )
                    .into());
                }
            }
        }
    }
}

fn request_id(request: u64) -> String {
    format!("{}{}", REQUEST_ID_PREFIX, request)
}

/// Number of an earlier request of ours that `reply` answers, if any
fn earlier_request(reply: Option<&Value>, current: u64) -> Option<u64> {
    reply
        .and_then(Value::as_str)
        .and_then(|id| id.strip_prefix(REQUEST_ID_PREFIX))
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n < current)
}

fn check_reply_id(reply: Option<&Value>, request: u64) -> Result<()> {
    let expected = request_id(request);
    match reply {
        Some(id) if id.as_str() != Some(expected.as_str()) => Err(ProtocolError::UnexpectedMessage(
            format!("reply id {} does not match request {}", id, expected),
        )
        .into()),
        _ => Ok(()),
    }
}

impl ControlChannel for QmpChannel {
    fn vm_id(&self) -> &str {
        &self.vm_id
    }

    async fn execute(&mut self, command: Command) -> Result<Value> {
        if self.writing {
            return Err(ProtocolError::UnexpectedMessage(format!(
                "session with VM {} broken by an interrupted request",
                self.vm_id
            ))
            .into());
        }
        self.next_request += 1;
        let request = self.next_request;
        let name = command.execute.clone();
        let command = command.with_id(request_id(request));
        trace!("VM {} <- {:?}", self.vm_id, command);

        let after = self.command_timeout;
        timeout(after, self.exchange(&command, request))
            .await
            .map_err(|_| HotplugError::Timeout {
                command: name,
                after,
            })?
    }
}

/// Connect to every VM in `vm_ids`, in order
///
/// A VM that cannot be reached is kept as an endpoint without a channel so
/// callers can report it.
pub async fn connect_all(vm_ids: &[String], settings: &QmpSettings) -> Vec<VmEndpoint<QmpChannel>> {
    let mut endpoints = Vec::with_capacity(vm_ids.len());
    for vm_id in vm_ids {
        match QmpChannel::connect(vm_id, settings).await {
            Ok(channel) => endpoints.push(VmEndpoint::connected(vm_id.clone(), channel)),
            Err(e) => {
                warn!("Could not connect to VM {}: {}", vm_id, e);
                endpoints.push(VmEndpoint::unreachable(vm_id.clone()));
            }
        }
    }
    endpoints
}
