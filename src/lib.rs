//! Serial acquisition driver for framed `f32` sample streams.
//!
//! The device streams variable-length packets of big-endian 32-bit floats over a UART,
//! each packet preceded by the header marker `FF FF FF FF`. This crate opens the link,
//! decodes packets into samples on a worker thread and hands them to a consumer as
//! events, or captures a fixed number of raw bytes to a file for later decoding.
//!
//! # Sessions
//!
//! A [`Connection`] has exactly one owner. Starting a session moves it into the session
//! worker, which closes it when the session ends:
//!
//! 1. Continuous acquisition ([`AcquisitionLoop`]) reads chunk after chunk and emits a
//!    [`SessionEvent::Data`] per read until stopped or until the link fails.
//! 2. Capture ([`CaptureSession`]) performs one long read and writes the bytes verbatim.
//!
//! Either way the session ends with exactly one [`SessionEvent::Finished`].
//!
//! # Boundary loss
//!
//! [`decode`] drops partial samples at the edges of each chunk, so a float split across
//! two reads is lost. Captures are read in one piece and do not suffer from this; for
//! continuous mode, [`StreamDecoder`] carries the partial bytes into the next read.
//!
//! ```ignore
//! let mut controller = Controller::new();
//! controller.open_connection("/dev/ttyACM0", 12_000_000, 400)?;
//! controller.start_acquisition(256)?;
//! for event in controller.events().iter() {
//!     match event {
//!         SessionEvent::Data(data) => println!("{} samples", data.samples.len()),
//!         SessionEvent::Finished(done) => {
//!             println!("{done}");
//!             break;
//!         }
//!     }
//! }
//! ```

pub mod acquisition;
pub mod capture;
pub mod config;
pub mod controller;
pub mod decoder;
mod errors;
pub mod events;
pub mod logging;
pub mod port;
mod test_utils;

pub use acquisition::{AcquisitionLoop, AcquisitionOptions, LoopState};
pub use capture::{capture, load_capture, CaptureRequest, CaptureSession};
pub use config::Settings;
pub use controller::{Controller, ControllerState};
pub use decoder::{decode, decode_with_report, DecodeReport, StreamDecoder, HEADER_MARKER};
pub use errors::*;
pub use events::{DataEvent, FinishReason, Finished, SessionEvent, SessionMode};
pub use port::{available_ports, Connection, Link};
