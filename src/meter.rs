use std::str::FromStr;
use std::time::Duration;

use crate::caps;
use crate::detector::DetectorState;
use crate::transport::{ScpiLink, ScpiTransport, SerialLinkConfig, TransportError};

/// SCPI command vocabulary of the PM-series instruments.
///
/// Everything here is sent verbatim (plus the line terminator). The
/// detector, status and array commands mirror the operations the vendor
/// driver exposes (`startPeakDetector`, `readRegister`,
/// `getNextFastArrayMeasurement`, ...) as raw SCPI.
pub mod cmd {
    pub const IDN: &str = "*IDN?";
    pub const CAL_STRING: &str = "CAL:STR?";
    pub const SENSOR_IDN: &str = "SYSTem:SENSor:IDN?";
    pub const SET_BAUD: &str = "SYST:SER:TRAN:BAUD";
    pub const GET_BAUD: &str = "SYST:SER:TRAN:BAUD?";
    pub const SYSTEM_ERROR: &str = "SYST:ERR?";
    pub const MEASURE_POWER: &str = "MEAS:POW?";
    pub const CONF_CURRENT: &str = "CONF:CURR";
    pub const ABORT: &str = "ABORT";
    pub const INITIATE: &str = "INIT";
    pub const FETCH: &str = "FETC?";
    pub const FREQ_MODE_CW: &str = "FREQ:MODE CW";
    pub const FREQ_MODE_PEAK: &str = "FREQ:MODE PEAK";
    pub const PEAK_DETECTOR_START: &str = "PDET:STAR";
    pub const PEAK_DETECTOR_RUNNING: &str = "PDET:RUN?";
    pub const STATUS_OPERATION: &str = "STAT:OPER:COND?";
    pub const FETCH_ARRAY: &str = "FETC:ARR?";
    pub const CONF_SEQUENCE: &str = "CONF:SEQ";
    pub const SEQUENCE_START: &str = "SEQ:STAR";
    pub const FETCH_SEQUENCE: &str = "FETC:SEQ?";
}

/// Read/write timeouts applied after a successful baud switch. The faster
/// link is expected to be stable, so they are stricter than the 3 s
/// defaults used while hunting for the instrument.
const SWITCHED_READ_TIMEOUT: Duration = Duration::from_secs(1);
const SWITCHED_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum MeterError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No serial ports found on this system")]
    NoSerialPorts,

    #[error("No instrument answered the identification query on {port}")]
    NoInstrumentFound { port: String },

    #[error(
        "Baud switch to {target} failed after the rate command was already sent; \
         the instrument's actual rate is now unknown and needs manual recovery \
         (power cycle, or reconnect probing each candidate rate): {source}"
    )]
    BaudSwitch { target: u32, source: TransportError },

    #[error("Malformed response to {command}: {response:?}")]
    MalformedResponse {
        command: &'static str,
        response: String,
    },

    #[error("Sequence base time {base_time} is outside the valid range 1..=100")]
    SequenceBaseTime { base_time: u16 },
}

/// An open session to one power meter.
///
/// The session owns the link exclusively; all I/O is sequential and
/// blocking, and no second session to the same instrument is supported.
/// Dropping the session releases the serial handle.
#[derive(Debug)]
pub struct PowerMeter<L: ScpiLink = ScpiTransport> {
    pub(crate) link: L,
    config: SerialLinkConfig,
    identity: String,
    pub(crate) detector: DetectorState,
}

impl PowerMeter<ScpiTransport> {
    /// Names of all serial ports the OS reports.
    pub fn available_ports() -> Result<Vec<String>, MeterError> {
        let ports = serialport::available_ports().map_err(TransportError::from)?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    /// Open a session.
    ///
    /// With no `port` the first enumerated serial port is used (an empty
    /// enumeration aborts with [`MeterError::NoSerialPorts`]). With no
    /// `baud` the factory rate 115200 is assumed; if the rate is wrong the
    /// port may not even open, so be careful after changing it on the
    /// device. The baud capability probe runs first and is diagnostic
    /// only: its failure never blocks the connect.
    pub fn connect(port: Option<&str>, baud: Option<u32>) -> Result<Self, MeterError> {
        let port = match port {
            Some(p) => p.to_string(),
            None => {
                let first = Self::available_ports()?
                    .into_iter()
                    .next()
                    .ok_or(MeterError::NoSerialPorts)?;
                log::debug!("No port specified, selecting first enumerated port {}", first);
                first
            }
        };

        if let Some(mask) = caps::probe_port(&port) {
            log::info!(
                "Port {} settable baud rates: {}",
                port,
                mask.supported().join(", ")
            );
        }

        let config = SerialLinkConfig::new(&port, baud.unwrap_or(caps::FACTORY_BAUD));
        let link = ScpiTransport::open(&config)?;
        Self::start_session(link, config)
    }

    /// Renegotiate the serial speed. Consumes the session because the link
    /// must be torn down completely and reopened; see
    /// [`MeterError::BaudSwitch`] for the failure mode.
    pub fn switch_baud(self, target: u32) -> Result<Self, MeterError> {
        self.switch_baud_with(target, ScpiTransport::open)
    }
}

impl<L: ScpiLink> PowerMeter<L> {
    /// Start a session on an already opened link: flush stale bytes, then
    /// confirm an instrument is listening via `*IDN?`.
    pub fn start_session(mut link: L, config: SerialLinkConfig) -> Result<Self, MeterError> {
        link.discard_buffers()?;
        let identity = match link.query(cmd::IDN) {
            Ok(idn) => idn,
            Err(TransportError::Timeout { .. }) => {
                return Err(MeterError::NoInstrumentFound {
                    port: config.port.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        log::debug!("Connected to {} on {}", identity, config.port);
        Ok(Self {
            link,
            config,
            identity,
            detector: DetectorState::Cw,
        })
    }

    /// The `*IDN?` string cached at session start.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn config(&self) -> &SerialLinkConfig {
        &self.config
    }

    pub fn detector_state(&self) -> DetectorState {
        self.detector
    }

    /// Calibration string of the attached head (`CAL:STR?`).
    pub fn calibration_string(&mut self) -> Result<String, MeterError> {
        Ok(self.link.query(cmd::CAL_STRING)?)
    }

    /// Identification of the attached sensor (`SYSTem:SENSor:IDN?`).
    pub fn sensor_identity(&mut self) -> Result<String, MeterError> {
        Ok(self.link.query(cmd::SENSOR_IDN)?)
    }

    /// The baud rate the instrument believes it is using.
    pub fn baud_rate(&mut self) -> Result<u32, MeterError> {
        let response = self.link.query(cmd::GET_BAUD)?;
        parse_scalar(cmd::GET_BAUD, &response)
    }

    /// Last error in the instrument's error queue (`SYST:ERR?`).
    pub fn system_error(&mut self) -> Result<String, MeterError> {
        Ok(self.link.query(cmd::SYSTEM_ERROR)?)
    }

    /// One power reading in instrument-native units (`MEAS:POW?`).
    pub fn read_power(&mut self) -> Result<f64, MeterError> {
        let response = self.link.query(cmd::MEASURE_POWER)?;
        parse_scalar(cmd::MEASURE_POWER, &response)
    }

    /// Send a raw command with no response expected.
    pub fn write_raw(&mut self, command: &str) -> Result<(), MeterError> {
        Ok(self.link.write_line(command)?)
    }

    /// Send a raw query and return the trimmed response line.
    pub fn query_raw(&mut self, command: &str) -> Result<String, MeterError> {
        Ok(self.link.query(command)?)
    }

    /// The two-phase baud renegotiation, generic over how the replacement
    /// link is opened.
    ///
    /// Phase one sends the rate command at the current speed; the device
    /// applies it as soon as it parses the line and acknowledges nothing.
    /// Phase two drops the old link entirely, reopens at the target rate
    /// with stricter timeouts, flushes, and runs `*IDN?` as a liveness
    /// check. A failure anywhere after phase one cannot be rolled back,
    /// because the host no longer knows which rate the device is on; it is
    /// surfaced as the distinct [`MeterError::BaudSwitch`].
    pub(crate) fn switch_baud_with<F>(self, target: u32, reopen: F) -> Result<Self, MeterError>
    where
        F: FnOnce(&SerialLinkConfig) -> Result<L, TransportError>,
    {
        let Self {
            mut link,
            config,
            detector,
            ..
        } = self;

        link.write_line(&format!("{} {}", cmd::SET_BAUD, target))?;

        let config = config
            .with_baud(target)
            .with_timeouts(SWITCHED_READ_TIMEOUT, SWITCHED_WRITE_TIMEOUT);

        // The handle must be gone before the port can be reopened with the
        // new framing.
        drop(link);
        log::debug!("Closed {}; reopening at {} baud", config.port, target);

        let reopened = (|| {
            let mut link = reopen(&config)?;
            link.discard_buffers()?;
            let identity = link.query(cmd::IDN)?;
            Ok::<_, TransportError>((link, identity))
        })();

        match reopened {
            Ok((link, identity)) => {
                log::debug!("Link alive at {} baud: {}", target, identity);
                Ok(Self {
                    link,
                    config,
                    identity,
                    detector,
                })
            }
            Err(source) => Err(MeterError::BaudSwitch { target, source }),
        }
    }
}

/// Parse a single trimmed SCPI payload into a number.
pub(crate) fn parse_scalar<T: FromStr>(
    command: &'static str,
    response: &str,
) -> Result<T, MeterError> {
    response
        .trim()
        .parse()
        .map_err(|_| MeterError::MalformedResponse {
            command,
            response: response.to_string(),
        })
}
