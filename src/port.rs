//! Serial link ownership.
//!
//! A [`Connection`] is the single owner of an open link. Sessions take it by value and
//! close it when they end, so at most one reader can ever hold the port.

use std::fmt;
use std::io::{self, Read};
use std::time::{Duration, Instant};

use log::{debug, info};
use serialport::{ClearBuffer, SerialPort, SerialPortInfo};

use crate::errors::{DaqError, Result};

/// Transport behind a [`Connection`].
///
/// Implemented for real serial ports; tests and alternate transports provide their own.
pub trait Link: Read + Send {
    /// Current per-read timeout.
    fn timeout(&self) -> Duration;
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
    /// Discard anything pending in the input and output buffers.
    fn clear_buffers(&mut self) -> io::Result<()>;
}

impl Link for Box<dyn SerialPort> {
    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        (**self).set_timeout(timeout).map_err(io::Error::from)
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::All).map_err(io::Error::from)
    }
}

/// List the serial ports present on this host.
pub fn available_ports() -> Result<Vec<SerialPortInfo>> {
    Ok(serialport::available_ports()?)
}

/// Largest single read handed to the link.
const READ_BLOCK: usize = 64 * 1024;

/// Bytes gathered by a read, plus the error that cut it short, if any.
pub(crate) struct Filled {
    pub bytes: Vec<u8>,
    pub error: Option<io::Error>,
}

/// An open serial connection.
pub struct Connection {
    name: String,
    link: Option<Box<dyn Link>>,
}

impl Connection {
    /// Open a serial port.
    ///
    /// `timeout` bounds each [`read`](Self::read) call.
    pub fn open(name: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(name, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|source| DaqError::PortUnavailable {
                port: name.to_string(),
                source,
            })?;
        info!(
            "opened serial port: port={}, baud={}, timeout={:?}",
            name, baud_rate, timeout
        );
        Ok(Self::from_link(name, port))
    }

    /// Wrap an already-open link.
    pub fn from_link<L: Link + 'static>(name: impl Into<String>, link: L) -> Self {
        Self {
            name: name.into(),
            link: Some(Box::new(link)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    pub fn timeout(&self) -> Result<Duration> {
        self.link
            .as_ref()
            .map(|link| link.timeout())
            .ok_or(DaqError::PortNotOpen)
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        let link = self.link.as_mut().ok_or(DaqError::PortNotOpen)?;
        link.set_timeout(timeout)?;
        Ok(())
    }

    /// Read up to `n` bytes.
    ///
    /// Blocks until `n` bytes arrived or the configured timeout elapsed, and returns
    /// whatever was received, possibly nothing. A device failure, or the link reporting
    /// end of stream, is a [`DaqError::PortClosedMidRead`]; partial bytes are discarded.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let filled = self.fill(n, true)?;
        match filled.error {
            Some(e) => Err(DaqError::PortClosedMidRead(e)),
            None => Ok(filled.bytes),
        }
    }

    /// Gather up to `n` bytes, keeping partial data when the link fails.
    ///
    /// With `bounded` set the whole call gives up once the link timeout elapses: each
    /// inner read is given only the time left, and the link timeout is restored before
    /// returning. Otherwise it keeps waiting across timeouts until `n` bytes arrived or
    /// the link failed. The buffer grows as bytes arrive, so `n` is only an upper bound.
    pub(crate) fn fill(&mut self, n: usize, bounded: bool) -> Result<Filled> {
        let link = self.link.as_mut().ok_or(DaqError::PortNotOpen)?;
        let timeout = link.timeout();
        let deadline = if bounded {
            Instant::now().checked_add(timeout)
        } else {
            None
        };

        let mut bytes = Vec::with_capacity(n.min(READ_BLOCK));
        let mut block = vec![0u8; n.min(READ_BLOCK)];
        let mut error = None;
        let mut shortened = false;

        while bytes.len() < n {
            if let Some(deadline) = deadline {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                if left < timeout {
                    if let Err(e) = link.set_timeout(left) {
                        error = Some(e);
                        break;
                    }
                    shortened = true;
                }
            }

            let want = (n - bytes.len()).min(block.len());
            match link.read(&mut block[..want]) {
                Ok(0) => {
                    error = Some(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "link reported end of stream",
                    ));
                    break;
                }
                Ok(k) => bytes.extend_from_slice(&block[..k]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    if bounded {
                        break;
                    }
                }
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        if shortened {
            link.set_timeout(timeout)?;
        }
        Ok(Filled { bytes, error })
    }

    /// Close the link. Safe to call more than once.
    ///
    /// Pending buffers are cleared first; a device that already vanished is not an error.
    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.clear_buffers() {
                debug!("clearing buffers on close failed: port={}, error={}", self.name, e);
            }
            info!("closed serial port: port={}", self.name);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}
