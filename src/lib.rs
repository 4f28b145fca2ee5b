//! # tlpm-rs
//!
//! A Rust library for controlling Thorlabs PM-series optical power meters
//! (PM101, PM103, ...) over a serial link with the SCPI command set.
//!
//! The crate covers the full session lifecycle: port discovery, a
//! line-oriented command/response transport, baud-rate renegotiation,
//! continuous-wave and peak-detector measurement modes, high-rate
//! streaming from the device ring buffer, and single-shot sequence
//! captures.
//!
//! ## Features
//!
//! - **Port discovery and capability probing**: enumerates serial ports via
//!   `serialport` and asks the OS driver which baud rates a port supports
//!   (diagnostic only, with a safe fallback everywhere else)
//! - **Line-terminated SCPI transport**: explicit 8N1 framing, buffer
//!   flushing against stale responses, distinct timeout errors
//! - **Baud renegotiation**: the full teardown/reopen protocol, with its
//!   unrecoverable failure mode surfaced as a dedicated error
//! - **Acquisition**: bounded-duration streaming at ~100 kS/s and
//!   pre-sized software-triggered sequences
//! - **Peak detector autoset**: the CW/peak mode state machine with a
//!   CPU-bounded polling loop
//!
//! ## Examples
//!
//! ### Connect and read power
//!
//! ```rust,no_run
//! use tlpm_rs::PowerMeter;
//!
//! // First enumerated port, factory baud rate.
//! let mut meter = PowerMeter::connect(None, None)?;
//! println!("Connected to {}", meter.identity());
//!
//! for _ in 0..10 {
//!     println!("{} W", meter.read_power()?);
//! }
//! # Ok::<(), tlpm_rs::MeterError>(())
//! ```
//!
//! ### Switch the serial speed
//!
//! ```rust,no_run
//! use tlpm_rs::PowerMeter;
//!
//! let meter = PowerMeter::connect(Some("/dev/ttyUSB0"), Some(115_200))?;
//! // Consumes the session: the link is closed and reopened at the new rate.
//! let meter = meter.switch_baud(230_400)?;
//! println!("Now talking at {} baud", meter.config().baud);
//! # Ok::<(), tlpm_rs::MeterError>(())
//! ```
//!
//! ### Stream the ring buffer for three seconds
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tlpm_rs::PowerMeter;
//!
//! let mut meter = PowerMeter::connect(None, None)?;
//! let session = meter.stream_current(Duration::from_secs(3))?;
//! println!("Collected {} samples", session.len());
//!
//! let mut file = std::fs::File::create("CurrentData.csv")?;
//! session.write_delimited(&mut file)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Peak search with the software trigger loop
//!
//! ```rust,no_run
//! use tlpm_rs::{AutosetConfig, PowerMeter, TriggerLoopConfig};
//!
//! let mut meter = PowerMeter::connect(None, None)?;
//! meter.arm_current_measurement()?;
//! meter.autoset(&AutosetConfig::default())?;
//!
//! let readings = meter.run_triggered(&TriggerLoopConfig::default())?;
//! for value in readings {
//!     println!("Current [A]: {}", value);
//! }
//! # Ok::<(), tlpm_rs::MeterError>(())
//! ```

pub mod acquisition;
pub mod caps;
pub mod detector;
pub mod meter;
mod sys;
pub mod transport;

// Re-export the main types for convenience
pub use acquisition::{
    AcquisitionSession, MeasurementSample, SequenceReading, FAST_BATCH_CAPACITY,
    SEQUENCE_BASE_TIME_RANGE, SEQUENCE_SAMPLES_PER_UNIT,
};

pub use caps::{probe_port, BaudCapabilityMask, BAUD_BITS, FACTORY_BAUD};

pub use detector::{AutosetConfig, DetectorState, TriggerLoopConfig, DATA_READY_MASK};

pub use meter::{cmd, MeterError, PowerMeter};

pub use transport::{ScpiLink, ScpiTransport, SerialLinkConfig, TransportError};
