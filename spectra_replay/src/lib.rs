//! Spectra replay: log tokenizing, event dispatch and GraphViz output.
//!
//! This crate is the thin shell around `spectra_core`: it scans the ASCII
//! event log, decodes each record's fixed schema, and drives the analyzer
//! context one event at a time, strictly in log order. After the log drains
//! it can walk the finished machines and emit a GraphViz drawing.
//!
//! ```ignore
//! use spectra_core::Analyzer;
//! use spectra_replay::{handlers, visualize};
//!
//! let mut an = Analyzer::new();
//! handlers::replay_file(&mut an, log_path, false)?;
//! visualize::write_dot(&an, &visualize::DrawOptions::default(), dot_path)?;
//! ```

pub mod error;
pub mod events;
pub mod handlers;
pub mod reader;
pub mod visualize;

pub use error::ReplayError;
pub use events::{EventTag, EVENT_COUNT};
pub use handlers::{replay_file, replay_str, run_log};
pub use reader::Reader;
pub use visualize::{DrawMode, DrawOptions};
