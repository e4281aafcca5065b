//! Serial channel layer
//!
//! A [`SerialChannel`] owns one serial handle split into a read half and a
//! write half, so that one thread can block in [`SerialChannel::receive`]
//! while another thread writes or closes the channel.

mod claims;
mod serial;

pub use serial::{open, open_pair};

use bytes::{Bytes, BytesMut};
use claims::PortClaim;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Byte that terminates one receive unit
pub const LINE_DELIMITER: u8 = b'\n';

/// Default read timeout slice
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest unit accepted before a delimiter must appear
pub const MAX_UNIT_LEN: usize = 64 * 1024;

/// Default write timeout of hardware ports
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 4096;

/// Declared direction of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelMode {
    /// Receive only
    ReadOnly,
    /// Send only
    WriteOnly,
    /// Receive and send
    ReadWrite,
}

impl ChannelMode {
    /// Whether `receive` is permitted
    pub fn can_read(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    /// Whether `send` is permitted
    pub fn can_write(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }

    /// Configuration keyword for this mode
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "READONLY",
            Self::WriteOnly => "WRITEONLY",
            Self::ReadWrite => "READWRITE",
        }
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode keyword that is not one of READONLY, WRITEONLY, READWRITE
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown channel mode `{0}` (expected READONLY, WRITEONLY or READWRITE)")]
pub struct UnknownMode(pub String);

impl FromStr for ChannelMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READONLY" => Ok(Self::ReadOnly),
            "WRITEONLY" => Ok(Self::WriteOnly),
            "READWRITE" => Ok(Self::ReadWrite),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Port identifier, baud rate and mode of one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Declared mode
    pub mode: ChannelMode,
}

impl ChannelSpec {
    /// Create a channel spec
    pub fn new(port: impl Into<String>, baud_rate: u32, mode: ChannelMode) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            mode,
        }
    }
}

impl fmt::Display for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} baud (8N1, {})", self.port, self.baud_rate, self.mode)
    }
}

/// Transport tuning shared by every channel
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// How long one blocking read waits before re-checking for closure.
    pub read_timeout: Duration,
    /// How long one write may block. Windows keeps a single timeout per
    /// device, so there `read_timeout` bounds writes as well and long units
    /// at low baud rates can end in a short write.
    pub write_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Channel error types
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The channel could not be opened
    #[error("cannot open {port}: {reason}")]
    Connection {
        /// Port identifier
        port: String,
        /// Underlying cause
        reason: String,
    },

    /// Receiving failed
    #[error("receive on {port} failed: {source}")]
    Read {
        /// Port identifier
        port: String,
        /// Underlying cause
        #[source]
        source: io::Error,
    },

    /// Sending failed
    #[error("send on {port} failed: {source}")]
    Write {
        /// Port identifier
        port: String,
        /// Underlying cause
        #[source]
        source: io::Error,
    },
}

impl ChannelError {
    /// Port identifier the error refers to
    pub fn port(&self) -> &str {
        match self {
            Self::Connection { port, .. } | Self::Read { port, .. } | Self::Write { port, .. } => {
                port
            }
        }
    }

    /// Operation that failed
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "open",
            Self::Read { .. } => "receive",
            Self::Write { .. } => "send",
        }
    }

    /// Whether the failure is "channel already closed"
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Read { source, .. } | Self::Write { source, .. } => {
                source.kind() == io::ErrorKind::NotConnected
            }
            Self::Connection { .. } => false,
        }
    }

    fn read(port: &str, source: io::Error) -> Self {
        Self::Read {
            port: port.to_string(),
            source,
        }
    }

    fn write(port: &str, source: io::Error) -> Self {
        Self::Write {
            port: port.to_string(),
            source,
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "channel is closed")
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Read handle, buffered bytes and the port claim. The claim lives exactly as
/// long as the handle.
struct ReadHalf {
    port: Option<Box<dyn Read + Send>>,
    pending: BytesMut,
    claim: Option<PortClaim>,
}

impl ReadHalf {
    fn take_unit(&mut self) -> Option<Bytes> {
        let end = self.pending.iter().position(|&b| b == LINE_DELIMITER)?;
        Some(self.pending.split_to(end + 1).freeze())
    }

    fn release(&mut self) {
        self.port = None;
        self.pending.clear();
        self.claim = None;
    }
}

/// One open serial channel
///
/// The read half is only touched by the thread calling [`receive`](Self::receive)
/// and the write half only by the thread calling [`send`](Self::send).
/// [`close`](Self::close) may be called from any thread at any time.
pub struct SerialChannel {
    spec: ChannelSpec,
    open: AtomicBool,
    reader: Mutex<ReadHalf>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
}

impl SerialChannel {
    /// Build a channel over already-acquired read and write halves.
    ///
    /// Fails with [`ChannelError::Connection`] if another open channel already
    /// holds `spec.port`.
    pub fn from_transport(
        spec: ChannelSpec,
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
    ) -> Result<Self, ChannelError> {
        let claim = PortClaim::acquire(&spec.port)?;
        Ok(Self::with_claim(spec, claim, reader, writer))
    }

    fn with_claim(
        spec: ChannelSpec,
        claim: PortClaim,
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        info!(channel = %spec, "channel opened");
        Self {
            spec,
            open: AtomicBool::new(true),
            reader: Mutex::new(ReadHalf {
                port: Some(reader),
                pending: BytesMut::with_capacity(READ_CHUNK),
                claim: Some(claim),
            }),
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Port identifier
    pub fn port(&self) -> &str {
        &self.spec.port
    }

    /// Declared mode
    pub fn mode(&self) -> ChannelMode {
        self.spec.mode
    }

    /// Full channel spec
    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    /// Check if open
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Write `data` with a single transport write.
    ///
    /// A short write is reported as a failure; nothing is retried.
    pub fn send(&self, data: &[u8]) -> Result<(), ChannelError> {
        if !self.spec.mode.can_write() {
            return Err(ChannelError::write(
                self.port(),
                io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("channel is {}", self.spec.mode),
                ),
            ));
        }

        let mut writer = self.writer.lock();
        if !self.is_open() {
            return Err(ChannelError::write(self.port(), closed()));
        }
        let port = writer
            .as_mut()
            .ok_or_else(|| ChannelError::write(&self.spec.port, closed()))?;

        let written = port
            .write(data)
            .map_err(|e| ChannelError::write(&self.spec.port, e))?;
        if written != data.len() {
            return Err(ChannelError::write(
                self.port(),
                io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short write: {} of {} bytes", written, data.len()),
                ),
            ));
        }
        port.flush()
            .map_err(|e| ChannelError::write(&self.spec.port, e))
    }

    /// Block until one delimited unit is available and return it, delimiter included.
    ///
    /// Returns a closed-channel [`ChannelError::Read`] once [`close`](Self::close)
    /// has been called, even if the close happens while this call is blocked.
    /// A unit longer than [`MAX_UNIT_LEN`] is a read failure.
    pub fn receive(&self) -> Result<Bytes, ChannelError> {
        if !self.spec.mode.can_read() {
            return Err(ChannelError::read(
                self.port(),
                io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("channel is {}", self.spec.mode),
                ),
            ));
        }

        let mut half = self.reader.lock();
        let result = self.read_unit(&mut half);
        drop(half);

        // close() leaves a busy read half to us
        if !self.is_open() {
            self.release_reader();
        }
        result
    }

    fn read_unit(&self, half: &mut ReadHalf) -> Result<Bytes, ChannelError> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if !self.is_open() {
                return Err(ChannelError::read(self.port(), closed()));
            }
            if let Some(unit) = half.take_unit() {
                return Ok(unit);
            }
            if half.pending.len() > MAX_UNIT_LEN {
                half.pending.clear();
                return Err(ChannelError::read(
                    self.port(),
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("no delimiter within {MAX_UNIT_LEN} bytes"),
                    ),
                ));
            }

            let ReadHalf { port, pending, .. } = &mut *half;
            let Some(port) = port.as_mut() else {
                return Err(ChannelError::read(self.port(), closed()));
            };
            match port.read(&mut buf) {
                Ok(0) => {
                    return Err(ChannelError::read(
                        self.port(),
                        io::Error::new(io::ErrorKind::UnexpectedEof, "device went away"),
                    ));
                }
                Ok(n) => pending.extend_from_slice(&buf[..n]),
                Err(e) if is_timeout(&e) => {}
                Err(e) => return Err(ChannelError::read(self.port(), e)),
            }
        }
    }

    /// Close the channel. Calling it again is a no-op.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }

        self.writer.lock().take();
        // A receiver blocked in a read holds this lock; it drops the read
        // half and the claim itself on its next timeout slice.
        if !self.release_reader() {
            debug!(port = %self.spec.port, "read half busy, released by receiver");
        }

        info!(port = %self.spec.port, "channel closed");
    }

    fn release_reader(&self) -> bool {
        match self.reader.try_lock() {
            Some(mut half) => {
                half.release();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for SerialChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialChannel")
            .field("spec", &self.spec)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        self.close();
    }
}
