//! Scripted in-memory link for exercising sessions without hardware.

#![cfg(test)]

use std::collections::VecDeque;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::port::Link;

/// One scripted response to a `read` call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Deliver these bytes (split over several reads if the caller's buffer is smaller).
    Data(Vec<u8>),
    /// Report a read timeout.
    Timeout,
    /// Fail as a vanished USB device does.
    Fail,
}

/// Counters shared with a [`ScriptedLink`] after it has been moved into a connection.
#[derive(Debug, Clone, Default)]
pub struct LinkProbe {
    clears: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
    timeouts: Arc<Mutex<Vec<Duration>>>,
}

impl LinkProbe {
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Every timeout passed to `set_timeout`, in order.
    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().unwrap().clone()
    }
}

pub struct ScriptedLink {
    steps: VecDeque<Step>,
    repeat: Option<(Vec<u8>, Duration)>,
    timeout: Duration,
    probe: LinkProbe,
}

impl ScriptedLink {
    /// Plays `steps` in order, then reports end of stream.
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            repeat: None,
            timeout: Duration::from_millis(400),
            probe: LinkProbe::default(),
        }
    }

    /// Plays `steps`, then delivers `chunk` forever, pausing `pace` before each delivery.
    pub fn endless(steps: Vec<Step>, chunk: Vec<u8>, pace: Duration) -> Self {
        let mut link = Self::new(steps);
        link.repeat = Some((chunk, pace));
        link
    }

    pub fn probe(&self) -> LinkProbe {
        self.probe.clone()
    }
}

impl Read for ScriptedLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(Step::Data(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    let rest = bytes.split_off(n);
                    self.steps.push_front(Step::Data(rest));
                }
                Ok(n)
            }
            Some(Step::Timeout) => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
            Some(Step::Fail) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device disconnected",
            )),
            None => match &self.repeat {
                Some((chunk, pace)) => {
                    std::thread::sleep(*pace);
                    self.steps.push_back(Step::Data(chunk.clone()));
                    self.read(buf)
                }
                None => Ok(0),
            },
        }
    }
}

impl Link for ScriptedLink {
    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        self.probe.timeouts.lock().unwrap().push(timeout);
        Ok(())
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.probe.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A link that honours its timeout and delivers one byte every `pace`.
///
/// When `pace` exceeds the current timeout, a read waits out the timeout and reports it.
pub struct TrickleLink {
    pace: Duration,
    timeout: Duration,
    probe: LinkProbe,
}

impl TrickleLink {
    pub const BYTE: u8 = 0xAB;

    pub fn new(pace: Duration, timeout: Duration) -> Self {
        Self {
            pace,
            timeout,
            probe: LinkProbe::default(),
        }
    }

    pub fn probe(&self) -> LinkProbe {
        self.probe.clone()
    }
}

impl Read for TrickleLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if self.pace > self.timeout {
            std::thread::sleep(self.timeout);
            return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
        }
        std::thread::sleep(self.pace);
        match buf.first_mut() {
            Some(first) => {
                *first = Self::BYTE;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

impl Link for TrickleLink {
    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        self.probe.timeouts.lock().unwrap().push(timeout);
        Ok(())
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.probe.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Big-endian encoding of `values`, preceded and followed by the header marker.
pub fn framed(values: &[f32]) -> Vec<u8> {
    let mut out = crate::decoder::HEADER_MARKER.to_vec();
    out.extend(values.iter().flat_map(|v| v.to_be_bytes()));
    out.extend_from_slice(&crate::decoder::HEADER_MARKER);
    out
}

/// A path under the system temp dir that no other test uses.
pub fn scratch_path(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("floatlink-{}-{}-{}", std::process::id(), tag, n))
}
