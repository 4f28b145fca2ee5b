//! Peak-detector mode handling.
//!
//! The instrument measures either in continuous-wave mode or with the peak
//! detector. Before peak-search sampling or a triggered sequence capture,
//! the detector has to find a stable trigger level ("autoset"): arm it,
//! give it time to settle, poll its running flag to completion, and switch
//! back to continuous mode.

use std::thread;
use std::time::Duration;

use crate::meter::{cmd, parse_scalar, MeterError, PowerMeter};
use crate::transport::ScpiLink;

/// Measurement mode of the instrument, owned by the session; there are no
/// concurrent writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Continuous wave, the default measurement mode.
    Cw,
    /// Peak detector armed but idle.
    Peak,
    /// Peak detector actively searching for a trigger level.
    PeakRunning,
}

/// Bit in the operation condition register that signals a completed
/// measurement ready to fetch.
pub const DATA_READY_MASK: u16 = 0x0200;

/// Floor for the inter-poll sleep while waiting on the detector. The
/// running flag is polled in a tight loop; without a floor that loop pins
/// a core for the whole search.
pub const MIN_DETECTOR_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Timing knobs for [`PowerMeter::autoset`].
#[derive(Debug, Clone)]
pub struct AutosetConfig {
    /// Wait after starting the detector before the first running-flag poll.
    pub settle: Duration,
    /// Sleep between running-flag polls; clamped to
    /// [`MIN_DETECTOR_POLL_INTERVAL`].
    pub poll_interval: Duration,
}

impl Default for AutosetConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(1),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Bounds for [`PowerMeter::run_triggered`].
#[derive(Debug, Clone)]
pub struct TriggerLoopConfig {
    /// Exact number of register polls; the loop never waits indefinitely
    /// for a trigger.
    pub iterations: u32,
    /// Fixed sleep after every poll, whether or not data was ready.
    pub poll_interval: Duration,
}

impl Default for TriggerLoopConfig {
    fn default() -> Self {
        Self {
            iterations: 10,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl<L: ScpiLink> PowerMeter<L> {
    fn set_mode_cw(&mut self) -> Result<(), MeterError> {
        self.write_raw(cmd::FREQ_MODE_CW)?;
        self.detector = DetectorState::Cw;
        Ok(())
    }

    fn set_mode_peak(&mut self) -> Result<(), MeterError> {
        self.write_raw(cmd::FREQ_MODE_PEAK)?;
        self.detector = DetectorState::Peak;
        Ok(())
    }

    fn start_peak_detector(&mut self) -> Result<(), MeterError> {
        self.write_raw(cmd::PEAK_DETECTOR_START)?;
        self.detector = DetectorState::PeakRunning;
        Ok(())
    }

    /// Whether the peak detector is still searching (`PDET:RUN?`).
    pub fn peak_detector_running(&mut self) -> Result<bool, MeterError> {
        let response = self.query_raw(cmd::PEAK_DETECTOR_RUNNING)?;
        match response.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(MeterError::MalformedResponse {
                command: cmd::PEAK_DETECTOR_RUNNING,
                response,
            }),
        }
    }

    /// Current value of the operation condition register
    /// (`STAT:OPER:COND?`).
    pub fn read_status_register(&mut self) -> Result<u16, MeterError> {
        let response = self.query_raw(cmd::STATUS_OPERATION)?;
        parse_scalar(cmd::STATUS_OPERATION, &response)
    }

    /// Fetch the last completed result without triggering a new
    /// measurement (`FETC?`).
    pub fn fetch_result(&mut self) -> Result<f32, MeterError> {
        let response = self.query_raw(cmd::FETCH)?;
        parse_scalar(cmd::FETCH, &response)
    }

    /// Configure a current measurement and start a fresh cycle:
    /// `ABORT`, `CONF:CURR`, `ABORT`, `INIT`.
    pub fn arm_current_measurement(&mut self) -> Result<(), MeterError> {
        self.write_raw(cmd::ABORT)?;
        self.write_raw(cmd::CONF_CURRENT)?;
        self.write_raw(cmd::ABORT)?;
        self.write_raw(cmd::INITIATE)?;
        Ok(())
    }

    /// Run the detector autoset: `Cw -> PeakRunning -> Peak -> Cw`.
    ///
    /// Regardless of how the search ends, the instrument is switched back
    /// to continuous mode before this returns, so the detector is never
    /// left running.
    pub fn autoset(&mut self, config: &AutosetConfig) -> Result<(), MeterError> {
        log::debug!("Autoset: starting peak search");
        self.set_mode_peak()?;
        let searched = self.run_peak_search(config);
        let restored = self.set_mode_cw();
        searched?;
        restored?;
        log::debug!("Autoset: done, back in CW mode");
        Ok(())
    }

    fn run_peak_search(&mut self, config: &AutosetConfig) -> Result<(), MeterError> {
        self.start_peak_detector()?;
        thread::sleep(config.settle);

        let interval = config.poll_interval.max(MIN_DETECTOR_POLL_INTERVAL);
        while self.peak_detector_running()? {
            thread::sleep(interval);
        }
        self.detector = DetectorState::Peak;
        Ok(())
    }

    /// The register-polled trigger loop.
    ///
    /// Executes exactly `config.iterations` passes. Each pass reads the
    /// status register; when the data-ready bit is set, the result is
    /// fetched and the instrument re-armed (`ABORT` + `INIT`) for the next
    /// trigger. Every pass sleeps `config.poll_interval`, hit or miss.
    pub fn run_triggered(&mut self, config: &TriggerLoopConfig) -> Result<Vec<f32>, MeterError> {
        let mut readings = Vec::new();

        for _ in 0..config.iterations {
            let status = self.read_status_register()?;
            if status & DATA_READY_MASK != 0 {
                let value = self.fetch_result()?;
                log::debug!("Triggered reading: {} A", value);
                readings.push(value);
                self.write_raw(cmd::ABORT)?;
                self.write_raw(cmd::INITIATE)?;
            }
            thread::sleep(config.poll_interval);
        }

        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testlink::{Exchange, StubLink};
    use crate::transport::SerialLinkConfig;

    fn session(script: Vec<Exchange>) -> PowerMeter<StubLink> {
        let mut full = vec![Exchange::Query("*IDN?", "THORLABS,PM103,M00001234,1.2.0")];
        full.extend(script);
        PowerMeter::start_session(
            StubLink::new(full),
            SerialLinkConfig::new("/dev/ttyUSB0", 115_200),
        )
        .unwrap()
    }

    fn fast_autoset() -> AutosetConfig {
        AutosetConfig {
            settle: Duration::from_millis(0),
            poll_interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn autoset_walks_through_running_back_to_cw() {
        let mut meter = session(vec![
            Exchange::Write("FREQ:MODE PEAK"),
            Exchange::Write("PDET:STAR"),
            Exchange::Query("PDET:RUN?", "1"),
            Exchange::Query("PDET:RUN?", "1"),
            Exchange::Query("PDET:RUN?", "0"),
            Exchange::Write("FREQ:MODE CW"),
        ]);
        meter.autoset(&fast_autoset()).unwrap();
        assert_eq!(meter.detector_state(), DetectorState::Cw);
        meter.link.assert_drained();
    }

    #[test]
    fn autoset_restores_cw_even_when_the_search_fails() {
        let mut meter = session(vec![
            Exchange::Write("FREQ:MODE PEAK"),
            Exchange::Write("PDET:STAR"),
            Exchange::Query("PDET:RUN?", "sideways"),
            Exchange::Write("FREQ:MODE CW"),
        ]);
        let err = meter.autoset(&fast_autoset()).unwrap_err();
        assert!(matches!(err, MeterError::MalformedResponse { .. }));
        assert_eq!(meter.detector_state(), DetectorState::Cw);
        meter.link.assert_drained();
    }

    #[test]
    fn trigger_loop_runs_exactly_the_configured_iterations() {
        let mut meter = session(vec![
            Exchange::Query("STAT:OPER:COND?", "0"),
            Exchange::Query("STAT:OPER:COND?", "0"),
            Exchange::Query("STAT:OPER:COND?", "0"),
        ]);
        let readings = meter
            .run_triggered(&TriggerLoopConfig {
                iterations: 3,
                poll_interval: Duration::from_millis(1),
            })
            .unwrap();
        assert!(readings.is_empty());
        let polls = meter
            .link
            .sent
            .iter()
            .filter(|c| *c == "STAT:OPER:COND?")
            .count();
        assert_eq!(polls, 3);
        meter.link.assert_drained();
    }

    #[test]
    fn trigger_loop_fetches_and_rearms_on_data_ready() {
        let mut meter = session(vec![
            Exchange::Query("STAT:OPER:COND?", "0"),
            Exchange::Query("STAT:OPER:COND?", "512"),
            Exchange::Query("FETC?", "3.5E-04"),
            Exchange::Write("ABORT"),
            Exchange::Write("INIT"),
            Exchange::Query("STAT:OPER:COND?", "0"),
            Exchange::Query("STAT:OPER:COND?", "640"),
            Exchange::Query("FETC?", "4.0E-04"),
            Exchange::Write("ABORT"),
            Exchange::Write("INIT"),
        ]);
        let readings = meter
            .run_triggered(&TriggerLoopConfig {
                iterations: 4,
                poll_interval: Duration::from_millis(1),
            })
            .unwrap();
        assert_eq!(readings.len(), 2);
        assert!((readings[0] - 3.5e-4).abs() < 1e-9);
        meter.link.assert_drained();
    }

    #[test]
    fn arm_sequence_matches_the_documented_command_order() {
        let mut meter = session(vec![
            Exchange::Write("ABORT"),
            Exchange::Write("CONF:CURR"),
            Exchange::Write("ABORT"),
            Exchange::Write("INIT"),
        ]);
        meter.arm_current_measurement().unwrap();
        meter.link.assert_drained();
    }
}
