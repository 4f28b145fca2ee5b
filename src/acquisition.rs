//! Sample acquisition: high-rate streaming and single-shot sequences.
//!
//! In streaming mode the instrument fills an internal ring buffer at about
//! 100 kS/s; the host drains it by polling for batches. There is no flow
//! control: when the poll cadence falls behind production the device
//! overwrites unread samples and they are gone. The host cannot detect
//! this, so a streaming session's sample count is a lower bound on the true
//! device output, never more.
//!
//! Sequence mode is the opposite trade: one blocking request for a
//! pre-sized array covering a bounded time window, armed by a software
//! trigger.

use std::fmt::Display;
use std::io;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::meter::{cmd, MeterError, PowerMeter};
use crate::transport::{ScpiLink, TransportError};

/// Most samples the instrument returns per poll. A larger batch is a
/// protocol violation, not something to truncate quietly.
pub const FAST_BATCH_CAPACITY: usize = 200;

/// A sequence capture always holds `base_time * 100` samples.
pub const SEQUENCE_SAMPLES_PER_UNIT: usize = 100;

/// Valid base-time window for sequence mode.
pub const SEQUENCE_BASE_TIME_RANGE: RangeInclusive<u16> = 1..=100;

/// One timestamped reading in instrument-native units.
///
/// The timestamp type depends on the acquisition mode: streaming uses
/// integer microseconds (`u32`), sequence mode fractional milliseconds
/// (`f32`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementSample<T> {
    pub timestamp: T,
    pub value: f32,
}

/// An ordered, growable run of samples collected by one acquisition loop.
///
/// Owned by the loop that fills it and handed to the caller afterwards;
/// never shared across threads. Memory grows linearly with the samples
/// appended, so the caller bounds it through the loop's duration or count.
#[derive(Debug)]
pub struct AcquisitionSession<T> {
    samples: Vec<MeasurementSample<T>>,
    started: Instant,
}

impl<T: Copy + Display> AcquisitionSession<T> {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn push(&mut self, sample: MeasurementSample<T>) {
        self.samples.push(sample);
    }

    pub fn extend(&mut self, batch: impl IntoIterator<Item = MeasurementSample<T>>) {
        self.samples.extend(batch);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[MeasurementSample<T>] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<MeasurementSample<T>> {
        self.samples
    }

    /// Wall-clock time since the session was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Serialize as one `timestamp;value` line per sample.
    ///
    /// Formatting goes through Rust's `Display`, which is locale
    /// independent: integer timestamps stay integers and the decimal
    /// separator is always `.`, whatever the host locale says.
    pub fn write_delimited<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        for sample in &self.samples {
            writeln!(writer, "{};{}", sample.timestamp, sample.value)?;
        }
        Ok(())
    }
}

impl<T: Copy + Display> Default for AcquisitionSession<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a sequence acquisition.
///
/// `triggered` must be checked before trusting the samples: when arming
/// fails the array still has its full pre-sized length and numerically
/// valid contents, but they mean nothing.
#[derive(Debug)]
pub struct SequenceReading {
    pub triggered: bool,
    pub session: AcquisitionSession<f32>,
}

impl<L: ScpiLink> PowerMeter<L> {
    /// Poll the next available batch from the device ring buffer
    /// (`FETC:ARR?`). Timestamps are microseconds since the measurement
    /// was configured. An empty line means no new samples yet.
    pub fn next_fast_batch(&mut self) -> Result<Vec<MeasurementSample<u32>>, MeterError> {
        let response = self.link.query(cmd::FETCH_ARRAY)?;
        let batch = parse_sample_pairs(cmd::FETCH_ARRAY, &response)?;
        if batch.len() > FAST_BATCH_CAPACITY {
            return Err(MeterError::MalformedResponse {
                command: cmd::FETCH_ARRAY,
                response,
            });
        }
        Ok(batch)
    }

    /// Drain the device ring buffer for `duration` of wall-clock time.
    ///
    /// Configures a current measurement, then appends every polled batch
    /// to the session until the deadline passes; the loop overshoots by at
    /// most one poll. Samples the host was too slow to collect are lost at
    /// the source and do not show up here.
    pub fn stream_current(
        &mut self,
        duration: Duration,
    ) -> Result<AcquisitionSession<u32>, MeterError> {
        self.arm_current_measurement()?;

        let mut session = AcquisitionSession::new();
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            let batch = self.next_fast_batch()?;
            session.extend(batch);
        }

        log::debug!(
            "Streaming done: {} samples in {:?}",
            session.len(),
            session.elapsed()
        );
        Ok(session)
    }

    /// Single-shot sequence acquisition over `base_time` time units
    /// (valid range 1..=100).
    ///
    /// Configures the sequence, arms the software trigger with the given
    /// auto-trigger delay, and blocks until the pre-sized array of exactly
    /// `base_time * 100` samples is filled. Timestamps are milliseconds.
    /// A trigger that never arrives is not an error here: it comes back as
    /// `triggered == false` with a zero-filled array of the same length,
    /// and the caller must check the flag.
    pub fn acquire_sequence(
        &mut self,
        base_time: u16,
        auto_trigger_delay: Duration,
    ) -> Result<SequenceReading, MeterError> {
        if !SEQUENCE_BASE_TIME_RANGE.contains(&base_time) {
            return Err(MeterError::SequenceBaseTime { base_time });
        }
        let expected = base_time as usize * SEQUENCE_SAMPLES_PER_UNIT;

        self.write_raw(&format!("{} {}", cmd::CONF_SEQUENCE, base_time))?;

        let arm = format!("{} {}", cmd::SEQUENCE_START, auto_trigger_delay.as_millis());
        let triggered = match self.link.query(&arm) {
            Ok(_flag) => true,
            Err(TransportError::Timeout { .. }) => false,
            Err(e) => return Err(e.into()),
        };

        let mut session = AcquisitionSession::new();
        if triggered {
            let response = self.link.query(cmd::FETCH_SEQUENCE)?;
            let samples = parse_sample_pairs::<f32>(cmd::FETCH_SEQUENCE, &response)?;
            if samples.len() != expected {
                return Err(MeterError::MalformedResponse {
                    command: cmd::FETCH_SEQUENCE,
                    response,
                });
            }
            session.extend(samples);
        } else {
            log::warn!(
                "Sequence arming failed (no trigger); returning {} placeholder samples",
                expected
            );
            session.extend((0..expected).map(|_| MeasurementSample {
                timestamp: 0.0,
                value: 0.0,
            }));
        }

        Ok(SequenceReading { triggered, session })
    }
}

/// Parse a `t1,v1,t2,v2,...` payload into samples. An empty payload is an
/// empty batch.
fn parse_sample_pairs<T: FromStr>(
    command: &'static str,
    response: &str,
) -> Result<Vec<MeasurementSample<T>>, MeterError> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let malformed = || MeterError::MalformedResponse {
        command,
        response: response.to_string(),
    };

    let tokens: Vec<&str> = trimmed.split(',').map(str::trim).collect();
    if tokens.len() % 2 != 0 {
        return Err(malformed());
    }

    tokens
        .chunks_exact(2)
        .map(|pair| {
            let timestamp = pair[0].parse().map_err(|_| malformed())?;
            let value = pair[1].parse().map_err(|_| malformed())?;
            Ok(MeasurementSample { timestamp, value })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testlink::{Exchange, StubLink};
    use crate::transport::SerialLinkConfig;

    fn session_with(script: Vec<Exchange>) -> PowerMeter<StubLink> {
        let mut full = vec![Exchange::Query("*IDN?", "THORLABS,PM103,M00001234,1.2.0")];
        full.extend(script);
        PowerMeter::start_session(
            StubLink::new(full),
            SerialLinkConfig::new("/dev/ttyUSB0", 115_200),
        )
        .unwrap()
    }

    #[test]
    fn fast_batch_parses_timestamp_value_pairs() {
        let mut meter = session_with(vec![Exchange::Query("FETC:ARR?", "0,0.001,10,0.002")]);
        let batch = meter.next_fast_batch().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].timestamp, 0);
        assert_eq!(batch[1].timestamp, 10);
        assert!((batch[1].value - 0.002).abs() < 1e-9);
    }

    #[test]
    fn fast_batch_empty_line_is_an_empty_batch() {
        let mut meter = session_with(vec![Exchange::Query("FETC:ARR?", "")]);
        assert!(meter.next_fast_batch().unwrap().is_empty());
    }

    #[test]
    fn fast_batch_rejects_odd_token_count() {
        let mut meter = session_with(vec![Exchange::Query("FETC:ARR?", "0,0.001,10")]);
        assert!(matches!(
            meter.next_fast_batch().unwrap_err(),
            MeterError::MalformedResponse { .. }
        ));
    }

    #[test]
    fn fast_batch_rejects_more_than_capacity() {
        let oversized = (0..=FAST_BATCH_CAPACITY)
            .map(|i| format!("{},0.001", i))
            .collect::<Vec<_>>()
            .join(",");
        let mut meter = session_with(Vec::new());
        meter.link.repeat = Some(("FETC:ARR?", oversized));
        assert!(matches!(
            meter.next_fast_batch().unwrap_err(),
            MeterError::MalformedResponse { .. }
        ));
    }

    #[test]
    fn streaming_respects_the_wall_clock_bound() {
        let mut meter = session_with(vec![
            Exchange::Write("ABORT"),
            Exchange::Write("CONF:CURR"),
            Exchange::Write("ABORT"),
            Exchange::Write("INIT"),
        ]);
        meter.link.repeat = Some(("FETC:ARR?", "0,0.5,5,0.5,10,0.5".to_string()));

        let duration = Duration::from_millis(30);
        let started = Instant::now();
        let session = meter.stream_current(duration).unwrap();
        let elapsed = started.elapsed();

        // Never longer than the bound plus one poll's worth of slack.
        assert!(elapsed < duration + Duration::from_millis(50));
        assert!(!session.is_empty());

        // Exactly the polled batches were appended, nothing fabricated.
        let polls = meter
            .link
            .sent
            .iter()
            .filter(|c| *c == "FETC:ARR?")
            .count();
        assert_eq!(session.len(), polls * 3);
    }

    #[test]
    fn sequence_length_is_exactly_base_time_times_100() {
        let payload = (0..100)
            .map(|i| format!("{}.0,0.001", i))
            .collect::<Vec<_>>()
            .join(",");
        let mut meter = session_with(vec![
            Exchange::Write("CONF:SEQ 1"),
            Exchange::Query("SEQ:STAR 0", "0"),
        ]);
        meter.link.repeat = Some(("FETC:SEQ?", payload));

        let reading = meter
            .acquire_sequence(1, Duration::from_millis(0))
            .unwrap();
        assert!(reading.triggered);
        assert_eq!(reading.session.len(), 100);
        assert!((reading.session.samples()[99].timestamp - 99.0).abs() < 1e-6);
    }

    #[test]
    fn sequence_arming_failure_keeps_the_presized_array() {
        let mut meter = session_with(vec![
            Exchange::Write("CONF:SEQ 2"),
            Exchange::QueryTimeout("SEQ:STAR 0"),
        ]);
        let reading = meter
            .acquire_sequence(2, Duration::from_millis(0))
            .unwrap();
        assert!(!reading.triggered);
        assert_eq!(reading.session.len(), 200);
        assert!(reading.session.samples().iter().all(|s| s.value == 0.0));
        meter.link.assert_drained();
    }

    #[test]
    fn sequence_rejects_base_time_outside_range() {
        for base_time in [0u16, 101] {
            let mut meter = session_with(Vec::new());
            let err = meter
                .acquire_sequence(base_time, Duration::from_millis(0))
                .unwrap_err();
            assert!(matches!(
                err,
                MeterError::SequenceBaseTime { base_time: b } if b == base_time
            ));
            meter.link.assert_drained();
        }
    }

    #[test]
    fn delimited_output_is_locale_independent() {
        let mut session = AcquisitionSession::<u32>::new();
        session.push(MeasurementSample {
            timestamp: 123,
            value: 0.5,
        });
        session.push(MeasurementSample {
            timestamp: 456,
            value: 0.25,
        });
        let mut out = Vec::new();
        session.write_delimited(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "123;0.5\n456;0.25\n");
    }
}
