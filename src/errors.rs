use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaqError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("port {port} unavailable: {source}")]
    PortUnavailable {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("port closed during read: {0}")]
    PortClosedMidRead(#[source] io::Error),
    #[error("port is not open")]
    PortNotOpen,
    #[error("capture size must be greater than zero")]
    InvalidCaptureSize,
    #[error("capture incomplete: received {received} of {requested} bytes (saved to {})", path.display())]
    CaptureIncomplete {
        requested: usize,
        received: usize,
        path: PathBuf,
    },
    #[error("a connection is already open on {0}; close it first")]
    ConnectionAlreadyOpen(String),
    #[error("a session is already running")]
    SessionActive,
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DaqError {
    /// Whether the error came from the serial link itself (device missing, busy, or gone).
    pub fn is_port_error(&self) -> bool {
        matches!(
            self,
            DaqError::PortUnavailable { .. } | DaqError::PortClosedMidRead(_) | DaqError::PortNotOpen
        )
    }
}

pub type Result<T> = std::result::Result<T, DaqError>;
