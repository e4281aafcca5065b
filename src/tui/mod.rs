//! Terminal view for `comlink monitor`
//!
//! Left pane: every port seen since start with its state. Right pane: event log.
//! Each transition blinks the affected row. `q` quits.

use chrono::{DateTime, Local};
use comlink_core::config::MonitorSettings;
use comlink_core::{RegistryEvent, TransitionKind};
use crossbeam_channel::{Receiver, TryRecvError};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute, queue};
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Write};
use std::time::{Duration, Instant};

const INPUT_POLL: Duration = Duration::from_millis(50);

struct Flash {
    port: String,
    started: Option<Instant>,
}

/// Screen state, fed only by registry events
struct MonitorView {
    ports: BTreeMap<String, bool>,
    logs: VecDeque<String>,
    flashes: VecDeque<Flash>,
    max_logs: usize,
    flash_phase: Duration,
    flash_phases: u32,
    shown_highlight: Option<String>,
}

impl MonitorView {
    fn new(settings: &MonitorSettings) -> Self {
        Self {
            ports: BTreeMap::new(),
            logs: VecDeque::new(),
            flashes: VecDeque::new(),
            max_logs: settings.max_logs.max(1),
            flash_phase: settings.flash_phase(),
            flash_phases: settings.flash_count * 2,
            shown_highlight: None,
        }
    }

    fn log(&mut self, at: &DateTime<Local>, msg: &str) {
        self.logs.push_back(format!("[{}] {msg}", at.format("%H:%M:%S")));
        while self.logs.len() > self.max_logs {
            self.logs.pop_front();
        }
    }

    fn apply(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::Primed { ports, at } => {
                let count = ports.len();
                for port in ports {
                    self.ports.insert(port, true);
                }
                self.log(&at, &format!("watching {count} ports"));
            }
            RegistryEvent::Transition(t) => {
                self.ports
                    .insert(t.port.clone(), t.kind == TransitionKind::Inserted);
                self.log(&t.at, &format!("{} {}", t.port, t.kind));
                if self.flash_phases > 0 {
                    self.flashes.push_back(Flash {
                        port: t.port,
                        started: None,
                    });
                }
            }
            RegistryEvent::EnumerationFailed { error, at } => {
                self.log(&at, &format!("{error}, tick skipped"));
            }
        }
    }

    /// Port to draw in reverse video at `now`. Flashes play one after another.
    fn highlight(&mut self, now: Instant) -> Option<String> {
        loop {
            let flash = self.flashes.front_mut()?;
            let started = *flash.started.get_or_insert(now);
            let phase = now.duration_since(started).as_millis() / self.flash_phase.as_millis().max(1);
            if phase >= u128::from(self.flash_phases) {
                self.flashes.pop_front();
                continue;
            }
            return (phase % 2 == 0).then(|| flash.port.clone());
        }
    }

    /// Advance the blink; true when the screen needs redrawing
    fn tick(&mut self, now: Instant) -> bool {
        let highlight = self.highlight(now);
        let changed = highlight != self.shown_highlight;
        self.shown_highlight = highlight;
        changed
    }

    fn port_lines(&self) -> impl Iterator<Item = (String, bool)> + '_ {
        self.ports.iter().map(move |(port, active)| {
            let status = if *active { "Active" } else { "Inactive" };
            let highlighted = self.shown_highlight.as_deref() == Some(port.as_str());
            (format!("{port:<15} - {status}"), highlighted)
        })
    }

    fn render(&self, out: &mut impl Write) -> io::Result<()> {
        let (width, height) = terminal::size()?;
        let left_width = width / 2;
        let right_col = left_width + 1;
        let right_width = usize::from(width.saturating_sub(right_col));
        let rows = usize::from(height.saturating_sub(1));

        queue!(
            out,
            terminal::Clear(ClearType::All),
            cursor::MoveTo(0, 0),
            SetAttribute(Attribute::Bold),
            Print("COM Ports:"),
            cursor::MoveTo(right_col, 0),
            Print("Logs (q to quit):"),
            SetAttribute(Attribute::Reset)
        )?;

        for (row, (line, highlighted)) in (1u16..).zip(self.port_lines()).take(rows) {
            queue!(out, cursor::MoveTo(0, row))?;
            if highlighted {
                queue!(out, SetAttribute(Attribute::Reverse))?;
            }
            let line: String = line.chars().take(usize::from(left_width)).collect();
            queue!(out, Print(line), SetAttribute(Attribute::Reset))?;
        }

        let skip = self.logs.len().saturating_sub(rows);
        for (row, line) in (1u16..).zip(self.logs.iter().skip(skip)) {
            let line: String = line.chars().take(right_width).collect();
            queue!(out, cursor::MoveTo(right_col, row), Print(line))?;
        }

        out.flush()
    }
}

/// Raw mode and alternate screen, restored on drop
struct TerminalSession;

impl TerminalSession {
    fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), LeaveAlternateScreen, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

fn is_quit(code: KeyCode, modifiers: KeyModifiers) -> bool {
    match code {
        KeyCode::Char('q' | 'Q') => true,
        KeyCode::Char('c') => modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Draw registry events until the user quits
pub fn run(events: &Receiver<RegistryEvent>, settings: &MonitorSettings) -> io::Result<()> {
    let mut view = MonitorView::new(settings);
    let _session = TerminalSession::enter()?;
    let mut out = io::stdout();
    let mut dirty = true;
    let mut registry_alive = true;

    loop {
        while registry_alive {
            match events.try_recv() {
                Ok(event) => {
                    view.apply(event);
                    dirty = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    view.log(&Local::now(), "port registry stopped");
                    registry_alive = false;
                    dirty = true;
                }
            }
        }

        if view.tick(Instant::now()) {
            dirty = true;
        }
        if dirty {
            view.render(&mut out)?;
            dirty = false;
        }

        if event::poll(INPUT_POLL)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if is_quit(key.code, key.modifiers) {
                        return Ok(());
                    }
                }
                Event::Resize(..) => dirty = true,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comlink_core::{EnumerationError, TransitionEvent};

    fn settings() -> MonitorSettings {
        MonitorSettings {
            flash_count: 3,
            flash_ms: 200,
            max_logs: 2,
            ..MonitorSettings::default()
        }
    }

    fn transition(port: &str, kind: TransitionKind) -> RegistryEvent {
        RegistryEvent::Transition(TransitionEvent {
            port: port.to_string(),
            kind,
            at: Local::now(),
        })
    }

    #[test]
    fn test_events_update_ports_and_logs() {
        let mut view = MonitorView::new(&settings());
        view.apply(RegistryEvent::Primed {
            ports: vec!["COM1".to_string()],
            at: Local::now(),
        });
        view.apply(transition("COM2", TransitionKind::Inserted));
        view.apply(transition("COM1", TransitionKind::Removed));

        assert_eq!(view.ports.get("COM1"), Some(&false));
        assert_eq!(view.ports.get("COM2"), Some(&true));
        assert_eq!(view.logs.len(), 2);
        assert!(view.logs.back().unwrap().ends_with("COM1 removed"));
    }

    #[test]
    fn test_flash_blinks_then_stops() {
        let mut view = MonitorView::new(&settings());
        view.apply(transition("COM4", TransitionKind::Inserted));

        let t0 = Instant::now();
        assert_eq!(view.highlight(t0).as_deref(), Some("COM4"));
        assert_eq!(view.highlight(t0 + Duration::from_millis(250)), None);
        assert_eq!(view.highlight(t0 + Duration::from_millis(450)).as_deref(), Some("COM4"));
        assert_eq!(view.highlight(t0 + Duration::from_millis(1250)), None);
        assert!(view.flashes.is_empty());
    }

    #[test]
    fn test_flashes_play_in_order() {
        let mut view = MonitorView::new(&settings());
        view.apply(transition("COM1", TransitionKind::Removed));
        view.apply(transition("COM2", TransitionKind::Inserted));

        let t0 = Instant::now();
        assert_eq!(view.highlight(t0).as_deref(), Some("COM1"));
        let t1 = t0 + Duration::from_millis(1200);
        assert_eq!(view.highlight(t1).as_deref(), Some("COM2"));
    }

    #[test]
    fn test_primed_ports_do_not_flash() {
        let mut view = MonitorView::new(&settings());
        view.apply(RegistryEvent::Primed {
            ports: vec!["COM1".to_string(), "COM2".to_string()],
            at: Local::now(),
        });
        assert!(!view.tick(Instant::now()));
        assert!(view.port_lines().all(|(_, highlighted)| !highlighted));
    }

    #[test]
    fn test_enumeration_failure_is_logged() {
        let mut view = MonitorView::new(&settings());
        view.apply(RegistryEvent::EnumerationFailed {
            error: EnumerationError("access denied".to_string()),
            at: Local::now(),
        });

        assert!(view.ports.is_empty());
        assert!(view.flashes.is_empty());
        assert!(view
            .logs
            .back()
            .unwrap()
            .ends_with("failed to enumerate serial ports: access denied, tick skipped"));
    }

    #[test]
    fn test_quit_keys() {
        assert!(is_quit(KeyCode::Char('q'), KeyModifiers::NONE));
        assert!(is_quit(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(!is_quit(KeyCode::Char('c'), KeyModifiers::NONE));
    }
}
