//! Continuous acquisition.
//!
//! One worker thread owns the [`Connection`] for the whole session: it reads a chunk,
//! decodes it and emits a [`DataEvent`] until asked to stop or until the link fails.
//!
//! ```text
//!   Idle --start--> Running --stop()--> Stopping --+
//!                      |                            +--> Idle (Finished emitted)
//!                      +----read error--> Faulted --+
//! ```
//!
//! Stopping is cooperative. The flag is checked before each read, so a stop request
//! takes effect once the read in progress returns (bounded by the link timeout).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::decoder::{decode, StreamDecoder};
use crate::events::{
    emit, frequency_axis, DataEvent, EventSender, FinishReason, Finished, SessionEvent,
    SessionMode,
};
use crate::port::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Faulted = 3,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoopState::Running,
            2 => LoopState::Stopping,
            3 => LoopState::Faulted,
            _ => LoopState::Idle,
        }
    }
}

/// Per-session settings for [`AcquisitionLoop::start_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionOptions {
    /// Maximum bytes requested per read.
    pub chunk_size: usize,
    /// Carry partial samples between reads instead of dropping them.
    pub carry_residual: bool,
    /// Attach an FFT frequency axis to each data event.
    pub sample_rate: Option<u32>,
}

impl AcquisitionOptions {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            carry_residual: false,
            sample_rate: None,
        }
    }
}

/// Handle to the continuous acquisition worker.
pub struct AcquisitionLoop {
    state: Arc<AtomicU8>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    events: EventSender,
}

impl AcquisitionLoop {
    pub fn new(events: EventSender) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(LoopState::Idle as u8)),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            events,
        }
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() != LoopState::Idle
    }

    /// Start reading `chunk_size` bytes at a time.
    ///
    /// If a session is still active the call does nothing and the connection is handed
    /// back untouched.
    pub fn start(
        &mut self,
        connection: Connection,
        chunk_size: usize,
    ) -> std::result::Result<(), Connection> {
        self.start_with(connection, AcquisitionOptions::new(chunk_size))
    }

    pub fn start_with(
        &mut self,
        connection: Connection,
        options: AcquisitionOptions,
    ) -> std::result::Result<(), Connection> {
        if self.is_running() {
            warn!(
                "acquisition already running; stop it before starting again (port={})",
                connection.name()
            );
            return Err(connection);
        }
        if options.chunk_size == 0 {
            warn!("refusing to start acquisition with a chunk size of zero");
            return Err(connection);
        }
        // previous worker already reported Idle, so this does not block
        self.join();

        self.stop.store(false, Ordering::Release);
        self.state.store(LoopState::Running as u8, Ordering::Release);

        let worker = Worker {
            connection,
            options,
            state: Arc::clone(&self.state),
            stop: Arc::clone(&self.stop),
            events: self.events.clone(),
        };
        self.worker = Some(thread::spawn(move || worker.run()));
        Ok(())
    }

    /// Ask the worker to stop after its current read. Does not block.
    pub fn stop(&self) {
        let _ = self.state.compare_exchange(
            LoopState::Running as u8,
            LoopState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.stop.store(true, Ordering::Release);
    }

    /// Wait for the worker thread to exit.
    pub fn join(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("acquisition worker panicked");
                self.state.store(LoopState::Idle as u8, Ordering::Release);
            }
        }
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

struct Worker {
    connection: Connection,
    options: AcquisitionOptions,
    state: Arc<AtomicU8>,
    stop: Arc<AtomicBool>,
    events: EventSender,
}

impl Worker {
    fn run(mut self) {
        info!(
            "acquisition started: port={}, chunk_size={}, carry_residual={}",
            self.connection.name(),
            self.options.chunk_size,
            self.options.carry_residual
        );
        let mut stream = self.options.carry_residual.then(StreamDecoder::new);
        let mut chunks = 0u64;

        let reason = loop {
            if self.stop.load(Ordering::Acquire) {
                break FinishReason::Stopped;
            }

            let started = Instant::now();
            let chunk = match self.connection.read(self.options.chunk_size) {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.state
                        .store(LoopState::Faulted as u8, Ordering::Release);
                    warn!(
                        "acquisition faulted: port={}, error={}",
                        self.connection.name(),
                        e
                    );
                    break FinishReason::Faulted(e.to_string());
                }
            };
            let read_elapsed = started.elapsed();

            let samples = match stream.as_mut() {
                Some(decoder) => decoder.push(&chunk),
                None => decode(&chunk),
            };
            let event = DataEvent {
                frequencies: self
                    .options
                    .sample_rate
                    .map(|rate| frequency_axis(samples.len(), rate)),
                samples,
                bytes_read: chunk.len(),
                read_elapsed,
            };
            chunks += 1;
            debug!(
                "chunk {}: bytes={}, samples={}, elapsed={:.3} ms, bits_per_second={:.3}",
                chunks,
                event.bytes_read,
                event.samples.len(),
                read_elapsed.as_secs_f64() * 1000.0,
                event.bits_per_second()
            );
            emit(&self.events, SessionEvent::Data(event));
        };

        self.connection.close();
        self.state.store(LoopState::Idle as u8, Ordering::Release);
        info!("acquisition finished after {} chunks: {:?}", chunks, reason);
        emit(
            &self.events,
            SessionEvent::Finished(Finished {
                mode: SessionMode::Continuous,
                reason,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::events::{channel, EventReceiver};
    use crate::test_utils::{framed, ScriptedLink, Step};

    const WAIT: Duration = Duration::from_secs(5);

    fn drain(rx: &EventReceiver) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        loop {
            let event = rx.recv_timeout(WAIT).expect("session never finished");
            let done = matches!(event, SessionEvent::Finished(_));
            out.push(event);
            if done {
                return out;
            }
        }
    }

    fn finished_count(events: &[SessionEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Finished(_)))
            .count()
    }

    #[test]
    fn disconnect_emits_single_finished_and_returns_to_idle() {
        let link = ScriptedLink::new(vec![Step::Data(framed(&[1.0])), Step::Timeout, Step::Fail]);
        let probe = link.probe();
        let (tx, rx) = channel();
        let mut acquisition = AcquisitionLoop::new(tx);

        acquisition
            .start(Connection::from_link("mock", link), 64)
            .unwrap();
        let events = drain(&rx);
        acquisition.join();

        assert_eq!(acquisition.state(), LoopState::Idle);
        assert_eq!(finished_count(&events), 1);
        match &events[0] {
            SessionEvent::Data(data) => assert_eq!(data.samples, vec![1.0]),
            other => panic!("expected data first, got {:?}", other),
        }
        match events.last() {
            Some(SessionEvent::Finished(finished)) => {
                assert_eq!(finished.mode, SessionMode::Continuous);
                assert!(matches!(finished.reason, FinishReason::Faulted(_)));
            }
            other => panic!("expected finished last, got {:?}", other),
        }
        // nothing follows the terminal event
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(probe.clears(), 1);
    }

    #[test]
    fn stop_finishes_after_current_read() {
        let chunk = framed(&[1.0, 2.0]);
        let link = ScriptedLink::endless(vec![], chunk.clone(), Duration::from_millis(2));
        let probe = link.probe();
        let (tx, rx) = channel();
        let mut acquisition = AcquisitionLoop::new(tx);

        acquisition
            .start(Connection::from_link("mock", link), chunk.len())
            .unwrap();
        match rx.recv_timeout(WAIT).unwrap() {
            SessionEvent::Data(data) => assert_eq!(data.samples, vec![1.0, 2.0]),
            other => panic!("expected data, got {:?}", other),
        }
        acquisition.stop();
        let events = drain(&rx);
        acquisition.join();

        assert_eq!(finished_count(&events), 1);
        assert_eq!(
            events.last(),
            Some(&SessionEvent::Finished(Finished {
                mode: SessionMode::Continuous,
                reason: FinishReason::Stopped,
            }))
        );
        assert_eq!(acquisition.state(), LoopState::Idle);
        assert_eq!(probe.clears(), 1);
    }

    #[test]
    fn start_while_running_hands_connection_back() {
        let link = ScriptedLink::endless(vec![], framed(&[0.5]), Duration::from_millis(2));
        let (tx, rx) = channel();
        let mut acquisition = AcquisitionLoop::new(tx);
        acquisition
            .start(Connection::from_link("first", link), 12)
            .unwrap();

        let second = Connection::from_link("second", ScriptedLink::new(vec![]));
        let rejected = acquisition.start(second, 12).unwrap_err();
        assert_eq!(rejected.name(), "second");
        assert!(rejected.is_open());

        acquisition.stop();
        drain(&rx);
        acquisition.join();
    }

    #[test]
    fn zero_chunk_size_is_refused() {
        let (tx, _rx) = channel();
        let mut acquisition = AcquisitionLoop::new(tx);
        let conn = Connection::from_link("mock", ScriptedLink::new(vec![]));
        let rejected = acquisition.start(conn, 0).unwrap_err();
        assert!(rejected.is_open());
        assert_eq!(acquisition.state(), LoopState::Idle);
    }

    #[test]
    fn undecodable_chunk_still_emits_empty_data() {
        let link = ScriptedLink::new(vec![Step::Data(vec![1, 2, 3]), Step::Timeout]);
        let (tx, rx) = channel();
        let mut acquisition = AcquisitionLoop::new(tx);
        acquisition
            .start(Connection::from_link("mock", link), 32)
            .unwrap();
        let events = drain(&rx);
        acquisition.join();

        match &events[0] {
            SessionEvent::Data(data) => {
                assert!(data.samples.is_empty());
                assert_eq!(data.bytes_read, 3);
            }
            other => panic!("expected data, got {:?}", other),
        }
        // the script then runs dry, which reads as the device going away
        assert_eq!(finished_count(&events), 1);
    }

    #[test]
    fn sample_rate_attaches_frequency_axis() {
        let link = ScriptedLink::new(vec![
            Step::Data(framed(&[1.0, 2.0, 3.0, 4.0])),
            Step::Timeout,
        ]);
        let (tx, rx) = channel();
        let mut acquisition = AcquisitionLoop::new(tx);
        let options = AcquisitionOptions {
            sample_rate: Some(8),
            ..AcquisitionOptions::new(64)
        };
        acquisition
            .start_with(Connection::from_link("mock", link), options)
            .unwrap();
        let events = drain(&rx);
        acquisition.join();

        match &events[0] {
            SessionEvent::Data(data) => {
                assert_eq!(data.frequencies.as_deref(), Some(&[0.0, 2.0, -4.0, -2.0][..]));
            }
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[test]
    fn carry_residual_reconstructs_split_samples() {
        let stream = framed(&[1.0, 2.0, 3.0]);
        let (head, tail) = stream.split_at(10);
        let link = ScriptedLink::new(vec![
            Step::Data(head.to_vec()),
            Step::Timeout,
            Step::Data(tail.to_vec()),
            Step::Timeout,
        ]);
        let (tx, rx) = channel();
        let mut acquisition = AcquisitionLoop::new(tx);
        let options = AcquisitionOptions {
            carry_residual: true,
            ..AcquisitionOptions::new(64)
        };
        acquisition
            .start_with(Connection::from_link("mock", link), options)
            .unwrap();
        let events = drain(&rx);
        acquisition.join();

        let samples: Vec<f32> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Data(data) => Some(data.samples.clone()),
                SessionEvent::Finished(_) => None,
            })
            .flatten()
            .collect();
        assert_eq!(samples, vec![1.0, 2.0, 3.0]);
    }
}
