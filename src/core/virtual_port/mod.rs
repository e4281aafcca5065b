//! Virtual serial lines
//!
//! A [`VirtualPort`] is the device side of an in-memory serial line. The host
//! side is a regular [`SerialChannel`], so everything that runs over hardware
//! (including the bridge) runs unchanged over a virtual line.
//!
//! Dropping the [`VirtualPort`] behaves like unplugging the device: the host
//! channel's next read and write fail.

use crate::core::channel::{ChannelError, ChannelOptions, ChannelSpec, SerialChannel};
use bytes::{Buf, Bytes};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Host-side read half of a virtual line
struct LineReader {
    rx: Receiver<Bytes>,
    pending: Bytes,
    timeout: Duration,
}

impl Read for LineReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            self.pending = match self.rx.recv_timeout(self.timeout) {
                Ok(chunk) => chunk,
                Err(RecvTimeoutError::Timeout) => return Err(io::ErrorKind::TimedOut.into()),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))
                }
            };
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

/// Host-side write half of a virtual line
struct LineWriter {
    tx: Sender<Bytes>,
}

impl Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(Bytes::copy_from_slice(buf))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Device end of a virtual serial line
#[derive(Debug)]
pub struct VirtualPort {
    name: String,
    to_host: Sender<Bytes>,
    from_host: Receiver<Bytes>,
}

impl VirtualPort {
    /// Create a virtual line and open a host channel on it.
    pub fn attach(
        spec: ChannelSpec,
        options: &ChannelOptions,
    ) -> Result<(SerialChannel, VirtualPort), ChannelError> {
        let (to_host, host_rx) = unbounded();
        let (host_tx, from_host) = unbounded();

        let name = spec.port.clone();
        let reader = LineReader {
            rx: host_rx,
            pending: Bytes::new(),
            timeout: options.read_timeout,
        };
        let writer = LineWriter { tx: host_tx };
        let channel = SerialChannel::from_transport(spec, Box::new(reader), Box::new(writer))?;

        Ok((
            channel,
            VirtualPort {
                name,
                to_host,
                from_host,
            },
        ))
    }

    /// Port identifier of the host channel
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Put bytes on the line towards the host, as if the device transmitted them.
    pub fn inject(&self, data: &[u8]) -> io::Result<()> {
        self.to_host
            .send(Bytes::copy_from_slice(data))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "host channel closed"))
    }

    /// Wait for the next write the host made on this line.
    pub fn next_output(&self, timeout: Duration) -> Option<Bytes> {
        self.from_host.recv_timeout(timeout).ok()
    }

    /// Whether the host side has released the line
    pub fn host_closed(&self) -> bool {
        matches!(
            self.from_host.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }

    /// Remove the device from the line.
    pub fn unplug(self) {
        drop(self);
    }
}
