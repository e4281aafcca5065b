//! Serial port hot-plug detection
//!
//! The [`PortRegistry`] samples the set of visible ports on a fixed interval
//! and turns the difference between samples into [`TransitionEvent`]s. It owns
//! its port table exclusively; the outside world only sees events.

use chrono::{DateTime, Local};
use crossbeam_channel::Sender;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default sampling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Kind of hot-plug transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Inserted,
    Removed,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inserted => write!(f, "inserted"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// A port appeared or disappeared
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    pub port: String,
    pub kind: TransitionKind,
    pub at: DateTime<Local>,
}

impl fmt::Display for TransitionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.port, self.kind)
    }
}

/// Message published by a running registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// The first snapshot. Not a transition.
    Primed {
        ports: Vec<String>,
        at: DateTime<Local>,
    },
    Transition(TransitionEvent),
    /// A tick was skipped because the ports could not be listed
    EnumerationFailed {
        error: EnumerationError,
        at: DateTime<Local>,
    },
}

/// Per-port state kept by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    pub port: String,
    pub active: bool,
    pub last_transition: DateTime<Local>,
}

/// Listing the system's ports failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to enumerate serial ports: {0}")]
pub struct EnumerationError(pub String);

impl From<serialport::Error> for EnumerationError {
    fn from(err: serialport::Error) -> Self {
        Self(err.to_string())
    }
}

/// Source of port snapshots
#[cfg_attr(test, mockall::automock)]
pub trait PortEnumerator: Send {
    /// Identifiers of the ports visible right now
    fn enumerate(&mut self) -> Result<BTreeSet<String>, EnumerationError>;
}

/// Ports reported by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn enumerate(&mut self) -> Result<BTreeSet<String>, EnumerationError> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(|info| info.port_name)
            .collect())
    }
}

/// Hot-plug state machine over successive port snapshots
pub struct PortRegistry<E> {
    enumerator: E,
    ports: BTreeMap<String, PortRecord>,
    primed: bool,
}

impl<E: PortEnumerator> PortRegistry<E> {
    /// Create an unprimed registry
    pub fn new(enumerator: E) -> Self {
        Self {
            enumerator,
            ports: BTreeMap::new(),
            primed: false,
        }
    }

    /// Whether the first snapshot has been taken
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Active flag of a port, `None` if it was never seen
    pub fn is_active(&self, port: &str) -> Option<bool> {
        self.ports.get(port).map(|r| r.active)
    }

    /// Record of a port, `None` if it was never seen
    pub fn record(&self, port: &str) -> Option<&PortRecord> {
        self.ports.get(port)
    }

    /// Number of ports ever seen
    pub fn known(&self) -> usize {
        self.ports.len()
    }

    /// Take one snapshot and return what changed.
    ///
    /// The first successful snapshot primes the registry and yields a single
    /// [`RegistryEvent::Primed`]. A failed snapshot leaves the state untouched.
    pub fn poll(&mut self) -> Result<Vec<RegistryEvent>, EnumerationError> {
        let current = self.enumerator.enumerate()?;
        let at = Local::now();

        if !self.primed {
            return Ok(vec![self.prime(current, at)]);
        }
        Ok(self
            .apply(&current, at)
            .into_iter()
            .map(RegistryEvent::Transition)
            .collect())
    }

    fn prime(&mut self, current: BTreeSet<String>, at: DateTime<Local>) -> RegistryEvent {
        for port in &current {
            self.ports.insert(
                port.clone(),
                PortRecord {
                    port: port.clone(),
                    active: true,
                    last_transition: at,
                },
            );
        }
        self.primed = true;
        info!(ports = current.len(), "port registry primed");
        RegistryEvent::Primed {
            ports: current.into_iter().collect(),
            at,
        }
    }

    /// Diff `current` against the table and flip the ports that changed.
    ///
    /// On an unprimed registry every port in `current` is reported as
    /// inserted, and the registry counts as primed afterwards.
    pub fn apply(&mut self, current: &BTreeSet<String>, at: DateTime<Local>) -> Vec<TransitionEvent> {
        self.primed = true;
        let mut events = Vec::new();

        for port in current {
            match self.ports.get_mut(port) {
                Some(record) if record.active => {}
                Some(record) => {
                    record.active = true;
                    record.last_transition = at;
                    events.push(transition(port, TransitionKind::Inserted, at));
                }
                None => {
                    self.ports.insert(
                        port.clone(),
                        PortRecord {
                            port: port.clone(),
                            active: true,
                            last_transition: at,
                        },
                    );
                    events.push(transition(port, TransitionKind::Inserted, at));
                }
            }
        }

        for (port, record) in &mut self.ports {
            if record.active && !current.contains(port) {
                record.active = false;
                record.last_transition = at;
                events.push(transition(port, TransitionKind::Removed, at));
            }
        }

        events
    }
}

impl<E: PortEnumerator + 'static> PortRegistry<E> {
    /// Run the polling loop on its own thread.
    ///
    /// The loop publishes every event to `events` and only ends once the
    /// receiving side has been dropped.
    pub fn spawn(
        self,
        interval: Duration,
        events: Sender<RegistryEvent>,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("port-registry".to_string())
            .spawn(move || self.run(interval, &events))
    }

    fn run(mut self, interval: Duration, events: &Sender<RegistryEvent>) {
        loop {
            let batch = match self.poll() {
                Ok(batch) => batch,
                Err(error) => {
                    warn!(error = %error, "port enumeration failed, skipping tick");
                    vec![RegistryEvent::EnumerationFailed {
                        error,
                        at: Local::now(),
                    }]
                }
            };
            for event in batch {
                if let RegistryEvent::Transition(t) = &event {
                    info!(port = %t.port, kind = %t.kind, "port {}", t.kind);
                }
                if events.send(event).is_err() {
                    debug!("event receiver dropped, port registry stopping");
                    return;
                }
            }
            thread::sleep(interval);
        }
    }
}

fn transition(port: &str, kind: TransitionKind, at: DateTime<Local>) -> TransitionEvent {
    TransitionEvent {
        port: port.to_string(),
        kind,
        at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;

    fn set(ports: &[&str]) -> BTreeSet<String> {
        ports.iter().map(|p| p.to_string()).collect()
    }

    fn transitions(events: Vec<RegistryEvent>) -> Vec<(String, TransitionKind)> {
        events
            .into_iter()
            .map(|e| match e {
                RegistryEvent::Transition(t) => (t.port, t.kind),
                other => panic!("unexpected event: {other:?}"),
            })
            .collect()
    }

    fn scripted(snapshots: Vec<Result<BTreeSet<String>, EnumerationError>>) -> MockPortEnumerator {
        let mut mock = MockPortEnumerator::new();
        let mut seq = Sequence::new();
        for snapshot in snapshots {
            mock.expect_enumerate()
                .times(1)
                .in_sequence(&mut seq)
                .return_once(move || snapshot);
        }
        mock
    }

    #[test]
    fn test_priming_emits_no_transitions() {
        let mut registry = PortRegistry::new(scripted(vec![Ok(set(&["COM1", "COM2", "COM3"]))]));
        let events = registry.poll().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RegistryEvent::Primed { ports, .. } => assert_eq!(ports.len(), 3),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(registry.is_primed());
        assert_eq!(registry.is_active("COM2"), Some(true));
    }

    #[test]
    fn test_insert_remove_sequence() {
        let mut registry = PortRegistry::new(scripted(vec![
            Ok(set(&["A"])),
            Ok(set(&["A", "B"])),
            Ok(set(&["B"])),
            Ok(set(&["B"])),
        ]));

        registry.poll().unwrap();
        assert_eq!(
            transitions(registry.poll().unwrap()),
            vec![("B".to_string(), TransitionKind::Inserted)]
        );
        assert_eq!(
            transitions(registry.poll().unwrap()),
            vec![("A".to_string(), TransitionKind::Removed)]
        );
        assert!(registry.poll().unwrap().is_empty());

        // removed ports are kept, only flagged
        assert_eq!(registry.known(), 2);
        assert_eq!(registry.is_active("A"), Some(false));
    }

    #[test]
    fn test_reinsertion_is_reported() {
        let mut registry = PortRegistry::new(SystemPorts);
        let t0 = Local::now();
        registry.apply(&set(&["COM7"]), t0);
        assert_eq!(registry.apply(&set(&[]), t0).len(), 1);
        let again = registry.apply(&set(&["COM7"]), t0);
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].kind, TransitionKind::Inserted);
        assert_eq!(registry.record("COM7").unwrap().last_transition, t0);
    }

    #[test]
    fn test_enumeration_failure_keeps_state() {
        let mut registry = PortRegistry::new(scripted(vec![
            Ok(set(&["COM1"])),
            Err(EnumerationError("device tree busy".to_string())),
            Ok(set(&[])),
        ]));

        registry.poll().unwrap();
        assert!(registry.poll().is_err());
        assert_eq!(registry.is_active("COM1"), Some(true));
        assert_eq!(
            transitions(registry.poll().unwrap()),
            vec![("COM1".to_string(), TransitionKind::Removed)]
        );
    }

    #[test]
    fn test_failed_first_snapshot_does_not_prime() {
        let mut registry = PortRegistry::new(scripted(vec![
            Err(EnumerationError("no access".to_string())),
            Ok(set(&["COM1"])),
        ]));
        assert!(registry.poll().is_err());
        assert!(!registry.is_primed());
        assert!(matches!(registry.poll().unwrap()[0], RegistryEvent::Primed { .. }));
    }

    #[test]
    fn test_apply_primes() {
        let mut registry = PortRegistry::new(scripted(vec![Ok(set(&["COM1", "COM2"]))]));
        let seeded = registry.apply(&set(&["COM1"]), Local::now());
        assert_eq!(seeded.len(), 1);
        assert!(registry.is_primed());

        // the next poll diffs instead of priming again
        assert_eq!(
            transitions(registry.poll().unwrap()),
            vec![("COM2".to_string(), TransitionKind::Inserted)]
        );
    }

    #[test]
    fn test_transition_display() {
        let event = transition("COM3", TransitionKind::Removed, Local::now());
        assert_eq!(event.to_string(), "COM3 removed");
    }
}
