//! Serial ↔ Serial bidirectional forwarding
//!
//! A [`ForwardingPair`] relays every unit received on one channel to the other,
//! one OS thread per direction. The two directions are coupled only through
//! channel closure: whichever direction fails first closes both channels,
//! which makes the other direction's blocked call fail and stop too.

use crate::core::channel::{ChannelError, ChannelMode, SerialChannel};
use parking_lot::Mutex;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Default pause after each relayed unit
pub const DEFAULT_YIELD: Duration = Duration::from_millis(1);

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Pause after each loop iteration
    pub yield_delay: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            yield_delay: DEFAULT_YIELD,
        }
    }
}

/// Bridge state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Stopped,
    Running,
}

/// Bridge error types
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Neither direction can forward under the declared modes
    #[error("no direction can forward between {a} ({a_mode}) and {b} ({b_mode})")]
    NoViableDirection {
        a: String,
        a_mode: ChannelMode,
        b: String,
        b_mode: ChannelMode,
    },

    /// `run` was called while the pair is already running
    #[error("bridge already running")]
    AlreadyRunning,

    /// A relay thread could not be started
    #[error("failed to start relay thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// What one direction did before it stopped
#[derive(Debug)]
pub struct DirectionReport {
    pub source: String,
    pub destination: String,
    pub units: u64,
    pub bytes: u64,
    /// Failure that ended the direction
    pub error: Option<ChannelError>,
}

impl DirectionReport {
    fn new(source: &SerialChannel, destination: &SerialChannel) -> Self {
        Self {
            source: source.port().to_string(),
            destination: destination.port().to_string(),
            units: 0,
            bytes: 0,
            error: None,
        }
    }
}

/// Outcome of a finished bridge run
#[derive(Debug)]
pub struct BridgeReport {
    /// A → B, if that direction was started
    pub a_to_b: Option<DirectionReport>,
    /// B → A, if that direction was started
    pub b_to_a: Option<DirectionReport>,
}

impl BridgeReport {
    /// Directions that ran
    pub fn directions(&self) -> impl Iterator<Item = &DirectionReport> {
        self.a_to_b.iter().chain(self.b_to_a.iter())
    }

    /// The failure that tore the bridge down, skipping the induced
    /// closed-channel errors of the sibling direction.
    pub fn root_cause(&self) -> Option<&ChannelError> {
        let mut errors = self.directions().filter_map(|d| d.error.as_ref());
        let first = errors.next()?;
        if first.is_closed() {
            errors.find(|e| !e.is_closed()).or(Some(first))
        } else {
            Some(first)
        }
    }

    /// Units relayed across both directions
    pub fn total_units(&self) -> u64 {
        self.directions().map(|d| d.units).sum()
    }
}

/// Closes both channels of a direction on every exit path
struct Teardown<'a> {
    source: &'a SerialChannel,
    destination: &'a SerialChannel,
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        self.source.close();
        self.destination.close();
    }
}

/// Two channels relayed into each other
pub struct ForwardingPair<'a> {
    a: &'a SerialChannel,
    b: &'a SerialChannel,
    options: BridgeOptions,
    state: Mutex<BridgeState>,
}

impl<'a> ForwardingPair<'a> {
    /// Create a pair over two open channels.
    ///
    /// A direction is viable when its source may receive and its destination
    /// may send; at least one direction must be viable.
    pub fn new(
        a: &'a SerialChannel,
        b: &'a SerialChannel,
        options: BridgeOptions,
    ) -> Result<Self, BridgeError> {
        let pair = Self {
            a,
            b,
            options,
            state: Mutex::new(BridgeState::Stopped),
        };
        if !pair.forwards(a, b) && !pair.forwards(b, a) {
            return Err(BridgeError::NoViableDirection {
                a: a.port().to_string(),
                a_mode: a.mode(),
                b: b.port().to_string(),
                b_mode: b.mode(),
            });
        }
        Ok(pair)
    }

    /// Get current state
    pub fn state(&self) -> BridgeState {
        *self.state.lock()
    }

    fn forwards(&self, source: &SerialChannel, destination: &SerialChannel) -> bool {
        source.mode().can_read() && destination.mode().can_write()
    }

    /// Relay in both directions until either one fails.
    ///
    /// Blocks the caller. Both channels are closed when this returns.
    pub fn run(&self) -> Result<BridgeReport, BridgeError> {
        {
            let mut state = self.state.lock();
            if *state == BridgeState::Running {
                return Err(BridgeError::AlreadyRunning);
            }
            *state = BridgeState::Running;
        }
        info!(a = %self.a.port(), b = %self.b.port(), "bridge running");

        let result = thread::scope(|scope| -> Result<BridgeReport, BridgeError> {
            let a_to_b = self.start(scope, self.a, self.b)?;
            let b_to_a = match self.start(scope, self.b, self.a) {
                Ok(handle) => handle,
                Err(e) => {
                    // stop the direction that did start
                    self.a.close();
                    self.b.close();
                    return Err(e);
                }
            };
            Ok(BridgeReport {
                a_to_b: a_to_b.and_then(join),
                b_to_a: b_to_a.and_then(join),
            })
        });

        *self.state.lock() = BridgeState::Stopped;
        if let Ok(report) = &result {
            info!(units = report.total_units(), "bridge stopped");
        }
        result
    }

    fn start<'scope>(
        &'scope self,
        scope: &'scope Scope<'scope, '_>,
        source: &'a SerialChannel,
        destination: &'a SerialChannel,
    ) -> Result<Option<ScopedJoinHandle<'scope, DirectionReport>>, BridgeError> {
        if !self.forwards(source, destination) {
            info!(
                source = %source.port(),
                destination = %destination.port(),
                "direction skipped by channel modes"
            );
            return Ok(None);
        }
        let yield_delay = self.options.yield_delay;
        let handle = thread::Builder::new()
            .name(format!("relay {}->{}", source.port(), destination.port()))
            .spawn_scoped(scope, move || relay(source, destination, yield_delay))?;
        Ok(Some(handle))
    }
}

fn join(handle: ScopedJoinHandle<'_, DirectionReport>) -> Option<DirectionReport> {
    match handle.join() {
        Ok(report) => Some(report),
        Err(_) => {
            error!("relay thread panicked");
            None
        }
    }
}

/// One direction: receive from `source`, send to `destination`, until failure.
fn relay(
    source: &SerialChannel,
    destination: &SerialChannel,
    yield_delay: Duration,
) -> DirectionReport {
    let _teardown = Teardown {
        source,
        destination,
    };
    let mut report = DirectionReport::new(source, destination);

    let failure = loop {
        let unit = match source.receive() {
            Ok(unit) => unit,
            Err(e) => break e,
        };
        if !unit.is_empty() {
            debug!(
                source = %source.port(),
                destination = %destination.port(),
                unit = %hex::encode(&unit),
                "forwarding"
            );
            if let Err(e) = destination.send(&unit) {
                break e;
            }
            report.units += 1;
            report.bytes += unit.len() as u64;
        }
        thread::sleep(yield_delay);
    };

    if failure.is_closed() {
        info!(
            port = %failure.port(),
            operation = failure.operation(),
            "{} -> {} stopped: channel closed",
            source.port(),
            destination.port()
        );
    } else {
        warn!(
            port = %failure.port(),
            operation = failure.operation(),
            error = %failure,
            "{} -> {} failed, closing both channels",
            source.port(),
            destination.port()
        );
    }
    report.error = Some(failure);
    report
}
