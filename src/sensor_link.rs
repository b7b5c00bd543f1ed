use serialport::SerialPort;
use std::io::Read;
use std::time::{Duration, Instant};

// Per-byte poll interval of the underlying port. The bounded read deadline
// is enforced on top of it, so cancellation latency stays near the deadline
// rather than a multiple of it.
const BYTE_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A byte stream of newline-delimited records read from another device.
///
/// Timeouts are an ordinary outcome, reported as `Ok(None)`. Bytes of a
/// record still in flight when the deadline passes are retained and the
/// record is completed by a later call.
pub trait LineSource: Send {
    /// Read one delimiter-stripped record, blocking up to the read timeout.
    fn read_line(&mut self) -> Result<Option<Vec<u8>>, LinkError>;
}

/// An open serial session to a sensor device.
///
/// The link is single-owner for its whole lifetime; dropping it closes the
/// underlying port.
pub struct SensorLink {
    serial: Box<dyn SerialPort>,
    read_timeout: Duration,
    partial: Vec<u8>,
}

impl std::fmt::Debug for SensorLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorLink")
            .field("port", &self.serial.name())
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl SensorLink {
    /// Open a serial session on `port` at the given baud rate.
    ///
    /// Fails when the port does not exist, is claimed by another process, or
    /// access is denied. Stale bytes in the host buffers are discarded so the
    /// first record read belongs to this session.
    pub fn open(port: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, LinkError> {
        log::debug!("Opening {port} at {baud_rate} baud");
        let serial = serialport::new(port, baud_rate)
            .timeout(BYTE_TIMEOUT)
            .open()?;

        let link = Self {
            serial,
            read_timeout,
            partial: Vec::new(),
        };

        link.serial.clear(serialport::ClearBuffer::All)?;
        Ok(link)
    }

    /// Name of the underlying port, when the host reports one.
    pub fn port_name(&self) -> Option<String> {
        self.serial.name()
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

impl LineSource for SensorLink {
    fn read_line(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        let deadline = Instant::now() + self.read_timeout;

        loop {
            let mut byte = [0u8; 1];
            match self.serial.read_exact(&mut byte) {
                Ok(()) => {
                    if byte[0] == b'\n' {
                        let mut line = std::mem::take(&mut self.partial);
                        if line.last() == Some(&b'\r') {
                            line.pop();
                        }
                        return Ok(Some(line));
                    }
                    self.partial.push(byte[0]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
