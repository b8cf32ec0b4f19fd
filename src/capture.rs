//! One-shot raw capture.
//!
//! A capture reads a fixed number of bytes in one logical read and stores them verbatim,
//! with no header. Because nothing is split into chunks, decoding the file with
//! [`load_capture`] loses no samples at read boundaries, unlike continuous acquisition.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::decoder::decode;
use crate::errors::{DaqError, Result};
use crate::events::{emit, EventSender, FinishReason, Finished, SessionEvent, SessionMode};
use crate::port::Connection;

/// Read timeout applied for the duration of a capture, so a slow device never truncates it.
pub const CAPTURE_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

/// File name used when no output path is configured.
pub const DEFAULT_RECORD_PATH: &str = "recorded_signal";

/// A validated capture: a positive byte count and where to store it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    n_bytes: usize,
    path: PathBuf,
}

impl CaptureRequest {
    pub fn new(n_bytes: usize, path: impl Into<PathBuf>) -> Result<Self> {
        if n_bytes == 0 {
            return Err(DaqError::InvalidCaptureSize);
        }
        Ok(Self {
            n_bytes,
            path: path.into(),
        })
    }

    pub fn n_bytes(&self) -> usize {
        self.n_bytes
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Capture `n_bytes` from the link into `path`, then close the connection.
///
/// A zero-byte request fails with [`DaqError::InvalidCaptureSize`] before the connection
/// is touched. If the link fails part-way, the bytes that did arrive are still written and
/// [`DaqError::CaptureIncomplete`] is returned.
pub fn capture(connection: &mut Connection, n_bytes: usize, path: &Path) -> Result<PathBuf> {
    let request = CaptureRequest::new(n_bytes, path)?;
    run_capture(connection, &request)
}

fn run_capture(connection: &mut Connection, request: &CaptureRequest) -> Result<PathBuf> {
    let result = read_and_store(connection, request);
    connection.close();
    result
}

fn read_and_store(connection: &mut Connection, request: &CaptureRequest) -> Result<PathBuf> {
    connection.set_timeout(CAPTURE_TIMEOUT)?;
    info!(
        "capture started: port={}, bytes={}, path={}",
        connection.name(),
        request.n_bytes,
        request.path.display()
    );

    let started = Instant::now();
    let filled = connection.fill(request.n_bytes, false)?;
    let elapsed = started.elapsed();

    write_record(&request.path, &filled.bytes)?;

    match filled.error {
        Some(e) => {
            warn!(
                "capture cut short after {} of {} bytes: port={}, error={}",
                filled.bytes.len(),
                request.n_bytes,
                connection.name(),
                e
            );
            Err(DaqError::CaptureIncomplete {
                requested: request.n_bytes,
                received: filled.bytes.len(),
                path: request.path.clone(),
            })
        }
        None => {
            info!(
                "capture finished: {} bytes in {:.2} s",
                filled.bytes.len(),
                elapsed.as_secs_f64()
            );
            Ok(request.path.clone())
        }
    }
}

/// Write a record file from scratch; an existing file at `path` is replaced, never appended.
fn write_record(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Read a record file and decode it exactly as a live chunk would be.
pub fn load_capture(path: impl AsRef<Path>) -> Result<Vec<f32>> {
    let bytes = fs::read(path.as_ref())?;
    info!(
        "loaded record file: path={}, bytes={}",
        path.as_ref().display(),
        bytes.len()
    );
    Ok(decode(&bytes))
}

/// A capture running on its own worker thread.
pub struct CaptureSession {
    path: PathBuf,
    worker: Option<JoinHandle<Result<PathBuf>>>,
}

impl CaptureSession {
    /// Hand `connection` to a worker that performs `request` and then emits one
    /// [`SessionEvent::Finished`].
    pub fn start(connection: Connection, request: CaptureRequest, events: EventSender) -> Self {
        let path = request.path.clone();
        let worker = thread::spawn(move || {
            let mut connection = connection;
            let result = run_capture(&mut connection, &request);
            let reason = match &result {
                Ok(path) => FinishReason::Captured {
                    path: path.clone(),
                    bytes: request.n_bytes,
                },
                Err(DaqError::CaptureIncomplete {
                    requested,
                    received,
                    path,
                }) => FinishReason::CaptureIncomplete {
                    path: path.clone(),
                    requested: *requested,
                    received: *received,
                },
                Err(e) => {
                    error!("capture failed: {}", e);
                    FinishReason::Faulted(e.to_string())
                }
            };
            emit(
                &events,
                SessionEvent::Finished(Finished {
                    mode: SessionMode::Capture,
                    reason,
                }),
            );
            result
        });
        Self {
            path,
            worker: Some(worker),
        }
    }

    /// Destination of the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the capture to end and return its outcome.
    pub fn join(mut self) -> Result<PathBuf> {
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("capture worker panicked").into())),
            None => Ok(self.path.clone()),
        }
    }
}
