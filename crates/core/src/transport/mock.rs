//! In-memory device for testing
//!
//! `MockTransport` decodes every packet with the real codec, applies it to
//! a `MockDevice` (file system + program slot) and encodes the reply, so
//! session code is exercised down to the wire format.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::Transport;
use crate::protocol::command::{status, system, PROGRAM_RUNNING, PROGRAM_STOPPED};
use crate::protocol::{Command, PacketCodec, Reply};
use crate::{DeployError, Result};

/// Simulated device state
#[derive(Debug)]
pub struct MockDevice {
    /// Files on the device
    pub files: BTreeMap<String, Vec<u8>>,
    /// User slot status byte
    pub program_status: u8,
    /// Path of the running program
    pub running: Option<String>,
    /// Every decoded command, in order
    pub commands: Vec<Command>,
    /// Refuse to open (device absent)
    pub unreachable: bool,
    /// Drop the link when a command with this name arrives
    pub fail_on: Option<&'static str>,
    /// Answer stop requests with a direct error
    pub reject_stop: bool,
    /// Report END_OF_FILE for every download chunk
    pub early_eof: bool,
    /// Successful opens
    pub opens: usize,
    /// Closes
    pub closes: usize,
    pub downloads: HashMap<u8, Download>,
    pub next_handle: u8,
}

#[derive(Debug)]
struct Download {
    path: String,
    size: usize,
    data: Vec<u8>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            program_status: PROGRAM_STOPPED,
            running: None,
            commands: Vec::new(),
            unreachable: false,
            fail_on: None,
            reject_stop: false,
            early_eof: false,
            opens: 0,
            closes: 0,
            downloads: HashMap::new(),
            next_handle: 0,
        }
    }
}

impl MockDevice {
    /// Device with a user program already running
    pub fn running(path: &str) -> Self {
        Self {
            program_status: PROGRAM_RUNNING,
            running: Some(path.to_string()),
            ..Default::default()
        }
    }

    /// Count of recorded commands with the given name
    pub fn count(&self, name: &str) -> usize {
        self.commands.iter().filter(|c| c.name() == name).count()
    }

    fn apply(&mut self, cmd: &Command) -> Reply {
        match cmd {
            Command::ProgramStatus => Reply::direct(vec![self.program_status]),
            Command::StopProgram => {
                if self.reject_stop {
                    return Reply::direct_error();
                }
                self.program_status = PROGRAM_STOPPED;
                self.running = None;
                Reply::direct(Bytes::new())
            }
            Command::RunProgram { path } => {
                if !self.files.contains_key(path) {
                    return Reply::direct_error();
                }
                self.program_status = PROGRAM_RUNNING;
                self.running = Some(path.clone());
                Reply::direct(vec![0; 8])
            }
            Command::DeleteFile { path } => {
                let code = match self.files.remove(path) {
                    Some(_) => status::SUCCESS,
                    None => status::NO_PERMISSION,
                };
                Reply::system(system::DELETE_FILE, code, Bytes::new())
            }
            Command::BeginDownload { path, size } => {
                let handle = self.next_handle;
                self.next_handle = self.next_handle.wrapping_add(1);
                if *size == 0 {
                    self.files.insert(path.clone(), Vec::new());
                } else {
                    self.downloads.insert(
                        handle,
                        Download { path: path.clone(), size: *size as usize, data: Vec::new() },
                    );
                }
                Reply::system(system::BEGIN_DOWNLOAD, status::SUCCESS, vec![handle])
            }
            Command::ContinueDownload { handle, chunk } => {
                let Some(download) = self.downloads.get_mut(handle) else {
                    return Reply::system(system::CONTINUE_DOWNLOAD, status::UNKNOWN_HANDLE, Bytes::new());
                };
                download.data.extend_from_slice(chunk);
                if download.data.len() < download.size && !self.early_eof {
                    return Reply::system(system::CONTINUE_DOWNLOAD, status::SUCCESS, vec![*handle]);
                }
                if let Some(done) = self.downloads.remove(handle) {
                    self.files.insert(done.path, done.data);
                }
                Reply::system(system::CONTINUE_DOWNLOAD, status::END_OF_FILE, vec![*handle])
            }
        }
    }
}

/// Transport backed by a shared `MockDevice`
pub struct MockTransport {
    device: Arc<Mutex<MockDevice>>,
    open: bool,
}

impl MockTransport {
    /// Transport to an idle device
    pub fn new() -> Self {
        Self::with_device(MockDevice::default())
    }

    /// Transport to a prepared device
    pub fn with_device(device: MockDevice) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            open: false,
        }
    }

    /// Shared handle for inspecting the device after the fact
    pub fn device(&self) -> Arc<Mutex<MockDevice>> {
        Arc::clone(&self.device)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self, force_reconnect: bool) -> Result<()> {
        if self.open && !force_reconnect {
            return Ok(());
        }
        let mut device = self.device.lock().await;
        if device.unreachable {
            self.open = false;
            return Err(DeployError::Connect("No device found".into()));
        }
        device.opens += 1;
        self.open = true;
        Ok(())
    }

    async fn exchange(&mut self, packet: Bytes) -> Result<Bytes> {
        if !self.open {
            return Err(DeployError::NotConnected);
        }

        let request = PacketCodec::decode_command(&packet)?;
        let mut device = self.device.lock().await;
        device.commands.push(request.body.clone());

        if device.fail_on == Some(request.body.name()) {
            self.open = false;
            return Err(DeployError::Transport("Device disconnected".into()));
        }

        let reply = device.apply(&request.body);
        PacketCodec::encode_reply(request.msg_id, &reply)
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.device.lock().await.closes += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
