//! Controller subsystem: joystick serial lines to classified tokens
//!
//! 1. [`serial_collector`] - Port discovery, line reading, reconnects
//! 2. [`line_decoder`] - Timestamp prefix removal and trimming
//! 3. [`event_classifier`] - Payload to [`event_classifier::NormalizedToken`]
//! 4. [`controller_handle`] - Spawning the serial or replay source
//!
//! # Architecture
//!
//! ```text
//! Serial port ──► Collector ──► SourceEvent ──► (engine) Decoder ──► Classifier
//!   or replay       (blocking thread)
//! ```

pub mod controller_handle;
pub mod event_classifier;
pub mod line_decoder;
pub mod serial_collector;
