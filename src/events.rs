//! Events handed from a session worker to the consumer.
//!
//! Every session ends with exactly one [`SessionEvent::Finished`]. Within a session,
//! events arrive in the order they were emitted.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use log::debug;

/// Bits counted on the wire for each payload byte in throughput figures.
pub const WIRE_BITS_PER_BYTE: f64 = 9.0;

pub type EventSender = Sender<SessionEvent>;
pub type EventReceiver = Receiver<SessionEvent>;

/// Create the hand-off between session workers and the consumer.
pub fn channel() -> (EventSender, EventReceiver) {
    channel::unbounded()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Continuous,
    Capture,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Continuous => f.write_str("acquisition"),
            SessionMode::Capture => f.write_str("capture"),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FinishReason {
    /// The consumer asked the session to stop.
    Stopped,
    /// The link or storage failed; the message is suitable for display.
    Faulted(String),
    /// A capture stored every requested byte.
    Captured { path: PathBuf, bytes: usize },
    /// The link failed during a capture; what did arrive was stored.
    CaptureIncomplete {
        path: PathBuf,
        requested: usize,
        received: usize,
    },
}

/// Terminal event of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Finished {
    pub mode: SessionMode,
    pub reason: FinishReason,
}

impl Finished {
    /// True for a requested stop or a complete capture.
    pub fn is_success(&self) -> bool {
        matches!(
            self.reason,
            FinishReason::Stopped | FinishReason::Captured { .. }
        )
    }
}

impl fmt::Display for Finished {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            FinishReason::Stopped => write!(f, "{} stopped", self.mode),
            FinishReason::Faulted(reason) => write!(f, "{} failed: {}", self.mode, reason),
            FinishReason::Captured { path, bytes } => {
                write!(f, "captured {} bytes to {}", bytes, path.display())
            }
            FinishReason::CaptureIncomplete {
                path,
                requested,
                received,
            } => write!(
                f,
                "capture incomplete: {} of {} bytes saved to {}",
                received,
                requested,
                path.display()
            ),
        }
    }
}

/// Samples decoded from one read of the link.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEvent {
    pub samples: Vec<f32>,
    /// Frequency of each FFT bin for `samples.len()` points, when a sample rate is known.
    pub frequencies: Option<Vec<f32>>,
    /// Raw bytes returned by the read.
    pub bytes_read: usize,
    /// Wall-clock time spent blocked in the read.
    pub read_elapsed: Duration,
}

impl DataEvent {
    /// Link throughput observed during the read.
    pub fn bits_per_second(&self) -> f64 {
        let secs = self.read_elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes_read as f64 * WIRE_BITS_PER_BYTE / secs
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Data(DataEvent),
    Finished(Finished),
}

/// Send an event, tolerating a consumer that already hung up.
pub(crate) fn emit(events: &EventSender, event: SessionEvent) {
    if events.send(event).is_err() {
        debug!("event receiver dropped; discarding session event");
    }
}

/// FFT bin frequencies for `n` samples taken at `sample_rate` Hz.
///
/// Standard FFT ordering: zero and the positive frequencies first, then the negative
/// ones in increasing order.
pub fn frequency_axis(n: usize, sample_rate: u32) -> Vec<f32> {
    if n == 0 {
        return Vec::new();
    }
    let step = sample_rate as f64 / n as f64;
    let positive = (n - 1) / 2 + 1;
    let negative = n / 2;
    (0..positive as i64)
        .chain(-(negative as i64)..0)
        .map(|k| (k as f64 * step) as f32)
        .collect()
}

/// Evenly spaced timestamps from zero to `n / sample_rate` seconds, both ends included.
pub fn time_axis(n: usize, sample_rate: u32) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let span = n as f64 / sample_rate as f64;
            let step = span / (n - 1) as f64;
            (0..n).map(|i| (i as f64 * step) as f32).collect()
        }
    }
}
