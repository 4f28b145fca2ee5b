use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Line terminator used by the instrument for both commands and responses.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Framing parameters for one serial session.
///
/// A config is immutable once a transport has been opened from it. Changing
/// the baud rate means building a new config (`with_baud`) and opening a new
/// transport; nothing ever mutates an open link in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialLinkConfig {
    pub port: String,
    pub baud: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl SerialLinkConfig {
    /// 8N1, no handshake, 3 second timeouts. The framing is fixed by the
    /// instrument; only port, baud and timeouts vary between sessions.
    pub fn new(port: &str, baud: u32) -> Self {
        Self {
            port: port.to_string(),
            baud,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(3),
        }
    }

    /// Same framing, different baud rate.
    pub fn with_baud(&self, baud: u32) -> Self {
        Self {
            baud,
            ..self.clone()
        }
    }

    pub fn with_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {timeout:?} waiting for a terminated response (received so far: {received:?})")]
    Timeout { timeout: Duration, received: String },

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Line-oriented command/response seam over the serial link.
///
/// `ScpiTransport` is the hardware implementation; tests script this trait
/// with in-memory links.
pub trait ScpiLink {
    /// Append the line terminator and transmit.
    fn write_line(&mut self, command: &str) -> Result<(), TransportError>;

    /// `write_line` followed by a blocking read up to the next terminator.
    /// Returns the trimmed payload. On timeout the link stays open; the
    /// caller decides whether to retry or abort.
    fn query(&mut self, command: &str) -> Result<String, TransportError>;

    /// Drop any buffered input/output so stale bytes from a previous
    /// session are never read back as a response.
    fn discard_buffers(&mut self) -> Result<(), TransportError>;
}

/// A serial SCPI connection with fixed framing.
///
/// The underlying handle is released when the transport is dropped, exactly
/// once on every exit path. There is no separate close call to misuse: give
/// up ownership and the port is free again.
pub struct ScpiTransport {
    serial: Box<dyn SerialPort>,
    config: SerialLinkConfig,
}

impl std::fmt::Debug for ScpiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScpiTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScpiTransport {
    /// Open the port with the given framing and flush both buffers.
    pub fn open(config: &SerialLinkConfig) -> Result<Self, TransportError> {
        log::debug!(
            "Opening {} at {} baud (read timeout {:?})",
            config.port,
            config.baud,
            config.read_timeout
        );
        let serial = serialport::new(&config.port, config.baud)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .flow_control(config.flow_control)
            .timeout(config.read_timeout)
            .open()?;

        let mut transport = Self {
            serial,
            config: config.clone(),
        };
        transport.discard_buffers()?;
        Ok(transport)
    }

    pub fn config(&self) -> &SerialLinkConfig {
        &self.config
    }
}

impl ScpiLink for ScpiTransport {
    fn write_line(&mut self, command: &str) -> Result<(), TransportError> {
        self.serial.set_timeout(self.config.write_timeout)?;
        self.serial.write_all(frame_command(command).as_bytes())?;
        self.serial.flush()?;
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.write_line(command)?;
        self.serial.set_timeout(self.config.read_timeout)?;
        let deadline = Instant::now() + self.config.read_timeout;
        read_terminated(&mut self.serial, deadline, self.config.read_timeout)
    }

    fn discard_buffers(&mut self) -> Result<(), TransportError> {
        self.serial.clear(ClearBuffer::All)?;
        Ok(())
    }
}

/// A command plus the line terminator, ready to transmit.
fn frame_command(command: &str) -> String {
    format!("{}\n", command)
}

/// Read bytes until the line terminator or the deadline, whichever comes
/// first. Partial lines are never returned as valid responses.
fn read_terminated(
    reader: &mut impl Read,
    deadline: Instant,
    timeout: Duration,
) -> Result<String, TransportError> {
    let mut response = Vec::new();

    loop {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte) {
            Ok(()) => {
                if byte[0] == LINE_TERMINATOR {
                    break;
                }
                response.push(byte[0]);
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                if Instant::now() >= deadline {
                    return Err(TransportError::Timeout {
                        timeout,
                        received: String::from_utf8_lossy(&response).to_string(),
                    });
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                if Instant::now() >= deadline {
                    return Err(TransportError::Timeout {
                        timeout,
                        received: String::from_utf8_lossy(&response).to_string(),
                    });
                }
            }
            Err(e) => return Err(TransportError::Io(e)),
        }
    }

    let response = String::from_utf8(response)?;
    Ok(response.trim().to_string())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct NeverReady;

    impl Read for NeverReady {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"))
        }
    }

    #[test]
    fn frame_appends_terminator() {
        assert_eq!(frame_command("*IDN?"), "*IDN?\n");
    }

    #[test]
    fn read_terminated_strips_terminator_and_whitespace() {
        let mut reader = Cursor::new(b"THORLABS,PM103,123456,1.0\r\nleftover".to_vec());
        let deadline = Instant::now() + Duration::from_secs(1);
        let line = read_terminated(&mut reader, deadline, Duration::from_secs(1)).unwrap();
        assert_eq!(line, "THORLABS,PM103,123456,1.0");
        // The next read starts after the terminator: residual bytes stay in
        // the stream and never leak into the finished response.
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"leftover");
    }

    #[test]
    fn read_terminated_times_out_on_partial_line() {
        let mut reader = NeverReady;
        let deadline = Instant::now() - Duration::from_millis(1);
        let err = read_terminated(&mut reader, deadline, Duration::from_millis(5)).unwrap_err();
        match err {
            TransportError::Timeout { received, .. } => assert!(received.is_empty()),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn config_rebuild_keeps_framing() {
        let base = SerialLinkConfig::new("/dev/ttyUSB0", 115200);
        let faster = base
            .with_baud(230400)
            .with_timeouts(Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(faster.baud, 230400);
        assert_eq!(faster.port, base.port);
        assert_eq!(faster.data_bits, base.data_bits);
        assert_eq!(faster.parity, base.parity);
        assert_eq!(faster.stop_bits, base.stop_bits);
        assert_eq!(faster.read_timeout, Duration::from_secs(1));
    }
}
