use comlink_core::{
    EnumerationError, PortEnumerator, PortRegistry, RegistryEvent, TransitionKind,
};
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

/// Replays a fixed list of snapshots, then keeps returning the last one
struct Replay {
    snapshots: VecDeque<Result<Vec<&'static str>, &'static str>>,
    last: BTreeSet<String>,
}

impl Replay {
    fn new(snapshots: Vec<Result<Vec<&'static str>, &'static str>>) -> Self {
        Self {
            snapshots: snapshots.into(),
            last: BTreeSet::new(),
        }
    }
}

impl PortEnumerator for Replay {
    fn enumerate(&mut self) -> Result<BTreeSet<String>, EnumerationError> {
        match self.snapshots.pop_front() {
            Some(Ok(ports)) => {
                self.last = ports.into_iter().map(String::from).collect();
                Ok(self.last.clone())
            }
            Some(Err(reason)) => Err(EnumerationError(reason.to_string())),
            None => Ok(self.last.clone()),
        }
    }
}

fn kinds(events: &[RegistryEvent]) -> Vec<(String, TransitionKind)> {
    events
        .iter()
        .filter_map(|e| match e {
            RegistryEvent::Transition(t) => Some((t.port.clone(), t.kind)),
            _ => None,
        })
        .collect()
}

#[test]
fn four_tick_scenario() {
    let mut registry = PortRegistry::new(Replay::new(vec![
        Ok(vec!["A"]),
        Ok(vec!["A", "B"]),
        Ok(vec!["B"]),
        Ok(vec!["B"]),
    ]));

    let tick0 = registry.poll().unwrap();
    assert!(kinds(&tick0).is_empty());
    assert_eq!(
        kinds(&registry.poll().unwrap()),
        vec![("B".to_string(), TransitionKind::Inserted)]
    );
    assert_eq!(
        kinds(&registry.poll().unwrap()),
        vec![("A".to_string(), TransitionKind::Removed)]
    );
    assert!(registry.poll().unwrap().is_empty());
}

#[test]
fn simultaneous_changes_in_one_tick() {
    let mut registry = PortRegistry::new(Replay::new(vec![
        Ok(vec!["COM1", "COM2"]),
        Ok(vec!["COM2", "COM3", "COM4"]),
    ]));
    registry.poll().unwrap();

    let mut changes = kinds(&registry.poll().unwrap());
    changes.sort();
    assert_eq!(
        changes,
        vec![
            ("COM1".to_string(), TransitionKind::Removed),
            ("COM3".to_string(), TransitionKind::Inserted),
            ("COM4".to_string(), TransitionKind::Inserted),
        ]
    );
}

#[test]
fn spawned_registry_publishes_events() {
    let registry = PortRegistry::new(Replay::new(vec![
        Ok(vec!["ttyS0"]),
        Err("enumeration busy"),
        Ok(vec!["ttyS0", "ttyUSB0"]),
    ]));
    let (tx, rx) = crossbeam_channel::unbounded();
    let handle = registry.spawn(Duration::from_millis(10), tx).unwrap();

    let primed = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(matches!(primed, RegistryEvent::Primed { ref ports, .. } if ports == &["ttyS0".to_string()]));

    // a failed tick is published, not swallowed
    match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
        RegistryEvent::EnumerationFailed { error, .. } => {
            assert_eq!(error, EnumerationError("enumeration busy".to_string()));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
        RegistryEvent::Transition(t) => {
            assert_eq!(t.port, "ttyUSB0");
            assert_eq!(t.kind, TransitionKind::Inserted);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // steady state produces nothing further
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    drop(rx);
    drop(handle);
}
