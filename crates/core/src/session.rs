//! Device session client
//!
//! A stateful wrapper around a `Transport` that sequences the device
//! operations used by a deployment and tracks whether a user program is
//! running. Errors are never retried here; retry and fallback policy
//! belongs to the orchestrator.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{DeployError, Result};
use crate::protocol::command::{status, MAX_CHUNK_SIZE, PROGRAM_RUNNING};
use crate::protocol::{Command, PacketCodec, Reply};
use crate::transport::Transport;

/// User-facing message when a program is already running
pub const STOP_PROGRAM_FIRST: &str = "please stop the program first";

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Connected, no user program running
    ConnectedIdle,
    /// Connected, a user program is running
    Streaming,
}

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// The device had no such file
    NotFound,
}

/// Device operations used by a deployment
#[async_trait]
pub trait DeviceSession: Send {
    /// Current state
    fn state(&self) -> SessionState;

    /// Whether a user program is running
    fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    /// Open the session and probe the device's program state
    async fn connect(&mut self, force_reconnect: bool) -> Result<SessionState>;

    /// Stop the user program, if any
    async fn stop(&mut self) -> Result<()>;

    /// Delete a file; a missing file is reported, not failed
    async fn remove(&mut self, path: &str) -> Result<RemoveOutcome>;

    /// Write a file; refused while streaming
    async fn flash(&mut self, path: &str, data: &[u8]) -> Result<()>;

    /// Launch a program
    async fn run(&mut self, path: &str) -> Result<()>;

    /// Release the transport; the session cannot be reused afterwards
    async fn disconnect(&mut self) -> Result<()>;
}

/// Session over the brick's packet protocol
pub struct Ev3Session<T: Transport> {
    transport: T,
    state: SessionState,
    msg_id: u16,
    closed: bool,
}

impl<T: Transport> Ev3Session<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: SessionState::Disconnected,
            msg_id: 0,
            closed: false,
        }
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn next_msg_id(&mut self) -> u16 {
        let id = self.msg_id;
        self.msg_id = self.msg_id.wrapping_add(1);
        id
    }

    fn require_connected(&self) -> Result<()> {
        if self.closed {
            return Err(DeployError::SessionClosed);
        }
        if self.state == SessionState::Disconnected {
            return Err(DeployError::NotConnected);
        }
        Ok(())
    }

    /// Send one command and validate its reply
    ///
    /// `accepted` lists non-success statuses the caller handles itself.
    async fn talk(&mut self, cmd: Command, accepted: &[u8]) -> Result<Reply> {
        let msg_id = self.next_msg_id();
        let packet = PacketCodec::encode_command(msg_id, &cmd)?;
        tracing::debug!("TALK {} #{} ({} bytes)", cmd.name(), msg_id, packet.len());

        let raw = match self.transport.exchange(packet).await {
            Ok(raw) => raw,
            Err(e) => {
                if !self.transport.is_open() {
                    self.state = SessionState::Disconnected;
                }
                return Err(e);
            }
        };
        let reply = PacketCodec::decode_reply(&raw)?;

        if reply.msg_id != msg_id {
            return Err(DeployError::Transport(format!(
                "Message counter de-sync: sent {}, got {}",
                msg_id, reply.msg_id
            )));
        }

        match (cmd.opcode(), &reply.body) {
            (Some(opcode), Reply::System { command, status: code, .. }) => {
                if *command != opcode {
                    return Err(DeployError::Transport(format!(
                        "Command de-sync: sent {:#04x}, got {:#04x}",
                        opcode, command
                    )));
                }
                if *code != status::SUCCESS && !accepted.contains(code) {
                    return Err(DeployError::DeviceStatus { command: opcode, status: *code });
                }
            }
            (None, Reply::Direct { ok, .. }) => {
                if !ok {
                    return Err(DeployError::Precondition(format!(
                        "Device rejected {}",
                        cmd.name()
                    )));
                }
            }
            _ => {
                return Err(DeployError::Transport(format!(
                    "Reply kind does not match {}",
                    cmd.name()
                )))
            }
        }

        Ok(reply.body)
    }

    async fn probe(&mut self) -> Result<SessionState> {
        match self.talk(Command::ProgramStatus, &[]).await? {
            Reply::Direct { globals, .. } if globals.first() == Some(&PROGRAM_RUNNING) => {
                Ok(SessionState::Streaming)
            }
            Reply::Direct { .. } => Ok(SessionState::ConnectedIdle),
            Reply::System { .. } => Err(DeployError::Transport("Unexpected status reply".into())),
        }
    }
}

#[async_trait]
impl<T: Transport> DeviceSession for Ev3Session<T> {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn connect(&mut self, force_reconnect: bool) -> Result<SessionState> {
        if self.closed {
            return Err(DeployError::SessionClosed);
        }
        if self.state != SessionState::Disconnected && !force_reconnect {
            return Ok(self.state);
        }

        self.state = SessionState::Disconnected;
        self.transport.open(force_reconnect).await?;

        // Probe counts as part of connecting; the state is only set once
        // the device has answered.
        let state = self.probe().await.map_err(|e| match e {
            DeployError::Connect(msg) => DeployError::Connect(msg),
            other => DeployError::Connect(format!("Device did not answer status probe: {}", other)),
        })?;
        self.state = state;

        tracing::info!("Connected to device ({:?})", state);
        Ok(state)
    }

    async fn stop(&mut self) -> Result<()> {
        self.require_connected()?;
        tracing::info!("Stopping user program");
        self.talk(Command::StopProgram, &[]).await?;
        self.state = SessionState::ConnectedIdle;
        Ok(())
    }

    async fn remove(&mut self, path: &str) -> Result<RemoveOutcome> {
        self.require_connected()?;
        if self.is_streaming() {
            return Err(DeployError::UserPrecondition(STOP_PROGRAM_FIRST.into()));
        }

        tracing::info!("rm {}", path);
        let reply = self
            .talk(Command::DeleteFile { path: path.to_string() }, &[status::NO_PERMISSION])
            .await?;

        match reply {
            Reply::System { status: status::NO_PERMISSION, .. } => {
                tracing::debug!("{} not present on device", path);
                Ok(RemoveOutcome::NotFound)
            }
            _ => Ok(RemoveOutcome::Removed),
        }
    }

    async fn flash(&mut self, path: &str, data: &[u8]) -> Result<()> {
        if self.is_streaming() {
            return Err(DeployError::UserPrecondition(STOP_PROGRAM_FIRST.into()));
        }
        self.require_connected()?;

        let size = u32::try_from(data.len()).map_err(|_| {
            DeployError::InvalidInput(format!("file of {} bytes too large for device", data.len()))
        })?;
        tracing::info!("write {} bytes to {}", data.len(), path);

        let begin = self
            .talk(Command::BeginDownload { path: path.to_string(), size }, &[])
            .await?;
        let handle = match begin {
            Reply::System { payload, .. } if !payload.is_empty() => payload[0],
            _ => return Err(DeployError::Transport("Download reply without handle".into())),
        };

        let chunks = data.chunks(MAX_CHUNK_SIZE);
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.enumerate() {
            let cmd = Command::ContinueDownload {
                handle,
                chunk: Bytes::copy_from_slice(chunk),
            };
            // Only the final chunk may close the file
            let accepted: &[u8] = if i == last { &[status::END_OF_FILE] } else { &[] };
            self.talk(cmd, accepted).await?;
        }

        Ok(())
    }

    async fn run(&mut self, path: &str) -> Result<()> {
        self.require_connected()?;
        tracing::info!("run {}", path);
        self.talk(Command::RunProgram { path: path.to_string() }, &[]).await?;
        self.state = SessionState::Streaming;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.state = SessionState::Disconnected;
        tracing::info!("Disconnecting from device");
        self.transport.close().await
    }
}

/// Calls recorded by `MockSession`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCalls {
    pub connect: usize,
    pub stop: usize,
    pub remove: usize,
    pub flash: usize,
    pub run: usize,
    pub disconnect: usize,
    /// (path, byte count) per flash call
    pub flashed: Vec<(String, usize)>,
    /// Operation names in call order
    pub order: Vec<&'static str>,
}

/// Session double for orchestrator tests
pub struct MockSession {
    state: SessionState,
    /// Recorded calls
    pub calls: SessionCalls,
    reachable: bool,
    streaming_on_connect: bool,
    fail_on: Option<&'static str>,
    fail_with: fn(String) -> DeployError,
}

impl MockSession {
    /// Reachable idle device
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            calls: SessionCalls::default(),
            reachable: true,
            streaming_on_connect: false,
            fail_on: None,
            fail_with: DeployError::Transport,
        }
    }

    /// Every connect fails
    pub fn unreachable() -> Self {
        Self { reachable: false, ..Self::new() }
    }

    /// Device already running a program
    pub fn streaming() -> Self {
        Self { streaming_on_connect: true, ..Self::new() }
    }

    /// Fail the named operation with a transport error
    pub fn failing_on(mut self, op: &'static str) -> Self {
        self.fail_on = Some(op);
        self
    }

    /// Fail the named operation with the error built by `make`
    pub fn failing_with(mut self, op: &'static str, make: fn(String) -> DeployError) -> Self {
        self.fail_on = Some(op);
        self.fail_with = make;
        self
    }

    fn record(&mut self, op: &'static str) -> Result<()> {
        self.calls.order.push(op);
        if self.fail_on == Some(op) {
            return Err((self.fail_with)(format!("{} failed", op)));
        }
        Ok(())
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceSession for MockSession {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn connect(&mut self, _force_reconnect: bool) -> Result<SessionState> {
        self.calls.connect += 1;
        self.record("connect")?;
        if !self.reachable {
            return Err(DeployError::Connect("No device found".into()));
        }
        self.state = if self.streaming_on_connect {
            SessionState::Streaming
        } else {
            SessionState::ConnectedIdle
        };
        Ok(self.state)
    }

    async fn stop(&mut self) -> Result<()> {
        self.calls.stop += 1;
        self.record("stop")?;
        self.state = SessionState::ConnectedIdle;
        Ok(())
    }

    async fn remove(&mut self, _path: &str) -> Result<RemoveOutcome> {
        self.calls.remove += 1;
        self.record("remove")?;
        Ok(RemoveOutcome::NotFound)
    }

    async fn flash(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.calls.flash += 1;
        self.calls.flashed.push((path.to_string(), data.len()));
        self.record("flash")?;
        if self.state == SessionState::Streaming {
            return Err(DeployError::UserPrecondition(STOP_PROGRAM_FIRST.into()));
        }
        Ok(())
    }

    async fn run(&mut self, _path: &str) -> Result<()> {
        self.calls.run += 1;
        self.record("run")?;
        self.state = SessionState::Streaming;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.calls.disconnect += 1;
        self.record("disconnect")?;
        self.state = SessionState::Disconnected;
        Ok(())
    }
}
