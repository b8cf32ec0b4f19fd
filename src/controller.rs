//! Consumer-facing control surface.
//!
//! The [`Controller`] holds the connection while no session runs, lends it to exactly
//! one session at a time, and exposes the event receiver. It never blocks on I/O: every
//! session outcome arrives as a [`SessionEvent::Finished`](crate::events::SessionEvent).

use std::path::PathBuf;
use std::time::Duration;

use log::{info, warn};

use crate::acquisition::{AcquisitionLoop, AcquisitionOptions, LoopState};
use crate::capture::{CaptureRequest, CaptureSession, DEFAULT_RECORD_PATH};
use crate::config::Settings;
use crate::errors::{DaqError, Result};
use crate::events::{channel, EventReceiver, EventSender};
use crate::port::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No connection held and no session running.
    Disconnected,
    /// A connection is open and idle.
    Connected,
    /// Continuous acquisition owns the connection.
    Acquiring(LoopState),
    /// A capture owns the connection.
    Capturing,
}

pub struct Controller {
    connection: Option<Connection>,
    acquisition: AcquisitionLoop,
    capture: Option<CaptureSession>,
    sender: EventSender,
    events: EventReceiver,
    record_path: PathBuf,
    sample_rate: Option<u32>,
    carry_residual: bool,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self {
            connection: None,
            acquisition: AcquisitionLoop::new(tx.clone()),
            capture: None,
            sender: tx,
            events: rx,
            record_path: PathBuf::from(DEFAULT_RECORD_PATH),
            sample_rate: None,
            carry_residual: false,
        }
    }

    /// A controller using the session-related parts of `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut controller = Self::new();
        controller.record_path = settings.record_path.clone();
        controller.sample_rate = Some(settings.sample_rate);
        controller.carry_residual = settings.carry_residual;
        controller
    }

    pub fn set_record_path(&mut self, path: impl Into<PathBuf>) {
        self.record_path = path.into();
    }

    pub fn set_sample_rate(&mut self, sample_rate: Option<u32>) {
        self.sample_rate = sample_rate;
    }

    pub fn set_carry_residual(&mut self, carry: bool) {
        self.carry_residual = carry;
    }

    /// Receiver for every session's `Data` and `Finished` events.
    pub fn events(&self) -> &EventReceiver {
        &self.events
    }

    pub fn state(&mut self) -> ControllerState {
        if self.capture_running() {
            ControllerState::Capturing
        } else if self.acquisition.is_running() {
            ControllerState::Acquiring(self.acquisition.state())
        } else if self.connection.is_some() {
            ControllerState::Connected
        } else {
            ControllerState::Disconnected
        }
    }

    /// Open a serial port. Fails if a connection is already held or a session is running.
    pub fn open_connection(&mut self, port_name: &str, baud_rate: u32, timeout_ms: u64) -> Result<()> {
        self.ensure_can_connect()?;
        let connection = Connection::open(port_name, baud_rate, Duration::from_millis(timeout_ms))?;
        self.connection = Some(connection);
        Ok(())
    }

    /// Hold an already-open connection, with the same preconditions as
    /// [`open_connection`](Self::open_connection).
    pub fn attach(&mut self, connection: Connection) -> Result<()> {
        self.ensure_can_connect()?;
        self.connection = Some(connection);
        Ok(())
    }

    /// Close the idle connection, or ask a running acquisition to stop (which closes it).
    pub fn close_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        if self.acquisition.is_running() {
            self.acquisition.stop();
        }
    }

    pub fn start_acquisition(&mut self, chunk_size: usize) -> Result<()> {
        self.ensure_idle()?;
        if chunk_size == 0 {
            return Err(DaqError::Config("chunk size must be positive".into()));
        }
        let connection = self.connection.take().ok_or(DaqError::PortNotOpen)?;
        let options = AcquisitionOptions {
            chunk_size,
            carry_residual: self.carry_residual,
            sample_rate: self.sample_rate,
        };
        if let Err(connection) = self.acquisition.start_with(connection, options) {
            self.connection = Some(connection);
            return Err(DaqError::SessionActive);
        }
        Ok(())
    }

    /// Request the running acquisition to stop. Its `Finished` event confirms it.
    pub fn stop_acquisition(&self) {
        self.acquisition.stop();
    }

    /// Start capturing `n_bytes` and return the path the record will be written to.
    ///
    /// A zero-byte request is rejected before the connection is touched.
    pub fn start_capture(&mut self, n_bytes: usize) -> Result<PathBuf> {
        let request = CaptureRequest::new(n_bytes, self.record_path.clone())?;
        self.ensure_idle()?;
        let connection = self.connection.take().ok_or(DaqError::PortNotOpen)?;
        info!(
            "starting capture: bytes={}, path={}",
            n_bytes,
            request.path().display()
        );
        let session = CaptureSession::start(connection, request, self.sender.clone());
        let path = session.path().to_path_buf();
        self.capture = Some(session);
        Ok(path)
    }

    /// Block until the current capture ends and return its outcome.
    pub fn wait_capture(&mut self) -> Option<Result<PathBuf>> {
        self.capture.take().map(CaptureSession::join)
    }

    /// Block until the current acquisition worker exits.
    pub fn wait_acquisition(&mut self) {
        self.acquisition.join();
    }

    /// Whether a capture is in progress; a finished capture is reaped on the way.
    fn capture_running(&mut self) -> bool {
        let finished = match &self.capture {
            Some(session) => session.is_finished(),
            None => return false,
        };
        if !finished {
            return true;
        }
        if let Some(Err(e)) = self.wait_capture() {
            warn!("previous capture ended with an error: {}", e);
        }
        false
    }

    fn ensure_idle(&mut self) -> Result<()> {
        if self.capture_running() || self.acquisition.is_running() {
            warn!("a session is already running; wait for it to finish first");
            return Err(DaqError::SessionActive);
        }
        Ok(())
    }

    fn ensure_can_connect(&mut self) -> Result<()> {
        self.ensure_idle()?;
        if let Some(connection) = &self.connection {
            return Err(DaqError::ConnectionAlreadyOpen(connection.name().to_string()));
        }
        Ok(())
    }
}
