// Keystroke-driven control loop
//
// Reads one key at a time from the terminal (raw mode, no echo), hands it to
// a control function, then pauses for a fixed period. Ctrl+C arrives as a
// keystroke in raw mode and ends the loop cleanly.

use std::collections::VecDeque;
use std::io;
use std::ops::ControlFlow;
use std::thread::sleep;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::{debug, info, warn};

use crate::config::KEY_PERIOD;
use crate::control::BotError;

#[derive(Debug, thiserror::Error)]
pub enum ProcedureError {
    #[error("Terminal input failed: {0}")]
    Terminal(#[from] io::Error),

    #[error("Control function failed: {0}")]
    Control(#[from] BotError),
}

/// One keystroke as seen by the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Key(KeyCode),
    /// Ctrl+C
    Interrupt,
}

pub trait KeySource {
    /// Block until the next keystroke
    fn next_key(&mut self) -> io::Result<KeyInput>;
}

/// Keystrokes from the controlling terminal. Raw mode lasts as long as this value.
pub struct TerminalKeys {
    _private: (),
}

impl TerminalKeys {
    pub fn new() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self { _private: () })
    }
}

impl Drop for TerminalKeys {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal: {}", e);
        }
    }
}

impl KeySource for TerminalKeys {
    fn next_key(&mut self) -> io::Result<KeyInput> {
        loop {
            if let Event::Key(KeyEvent {
                code,
                modifiers,
                kind,
                ..
            }) = event::read()?
            {
                if kind == KeyEventKind::Release {
                    continue;
                }
                if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
                    return Ok(KeyInput::Interrupt);
                }
                return Ok(KeyInput::Key(code));
            }
        }
    }
}

/// Fixed sequence of keys, then an interrupt. For scripted runs and tests.
pub struct ScriptedKeys {
    keys: VecDeque<KeyCode>,
}

impl ScriptedKeys {
    pub fn new(keys: impl IntoIterator<Item = KeyCode>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// One `KeyCode::Char` per character of `text`
    pub fn from_chars(text: &str) -> Self {
        Self::new(text.chars().map(KeyCode::Char))
    }
}

impl KeySource for ScriptedKeys {
    fn next_key(&mut self) -> io::Result<KeyInput> {
        Ok(self.keys.pop_front().map_or(KeyInput::Interrupt, KeyInput::Key))
    }
}

/// Reads a key, dispatches it, sleeps, repeats
pub struct ControlProcedure<K, F> {
    keys: K,
    control_loop_fn: F,
    period: Duration,
}

impl<K, F> ControlProcedure<K, F>
where
    K: KeySource,
    F: FnMut(KeyCode) -> Result<ControlFlow<()>, BotError>,
{
    pub fn new(keys: K, control_loop_fn: F) -> Self {
        Self {
            keys,
            control_loop_fn,
            period: KEY_PERIOD,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Run until the control function breaks, Ctrl+C, or an error
    pub fn start_procedure(&mut self) -> Result<(), ProcedureError> {
        info!("Control procedure started ({:?} per key)", self.period);
        loop {
            let key = match self.keys.next_key()? {
                KeyInput::Key(code) => code,
                KeyInput::Interrupt => {
                    info!("Interrupted, leaving control procedure");
                    return Ok(());
                }
            };
            debug!("Key: {:?}", key);

            if (self.control_loop_fn)(key)?.is_break() {
                info!("Control procedure finished");
                return Ok(());
            }

            sleep(self.period);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    type Flow = Result<ControlFlow<()>, BotError>;

    fn keep_going(_: KeyCode) -> Flow {
        Ok(ControlFlow::Continue(()))
    }

    struct FailingKeys;

    impl KeySource for FailingKeys {
        fn next_key(&mut self) -> io::Result<KeyInput> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal gone"))
        }
    }

    #[test]
    fn test_dispatches_every_key_until_interrupt() {
        let mut seen = Vec::new();
        let mut procedure = ControlProcedure::new(ScriptedKeys::from_chars("wasd"), |key: KeyCode| -> Flow {
            seen.push(key);
            Ok(ControlFlow::Continue(()))
        })
        .with_period(Duration::ZERO);

        procedure.start_procedure().unwrap();
        drop(procedure);
        assert_eq!(
            seen,
            vec![
                KeyCode::Char('w'),
                KeyCode::Char('a'),
                KeyCode::Char('s'),
                KeyCode::Char('d')
            ]
        );
    }

    #[test]
    fn test_break_stops_loop() {
        let mut calls = 0;
        let mut procedure = ControlProcedure::new(ScriptedKeys::from_chars("xqx"), |key: KeyCode| -> Flow {
            calls += 1;
            if key == KeyCode::Char('q') {
                Ok(ControlFlow::Break(()))
            } else {
                Ok(ControlFlow::Continue(()))
            }
        })
        .with_period(Duration::ZERO);

        procedure.start_procedure().unwrap();
        drop(procedure);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_sleeps_between_keys() {
        let mut procedure = ControlProcedure::new(ScriptedKeys::from_chars("abc"), keep_going)
            .with_period(Duration::from_millis(10));

        let started = Instant::now();
        procedure.start_procedure().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_default_period_is_100ms() {
        let procedure = ControlProcedure::new(ScriptedKeys::from_chars(""), keep_going);
        assert_eq!(procedure.period, Duration::from_millis(100));
    }

    #[test]
    fn test_terminal_error_propagates() {
        let mut procedure = ControlProcedure::new(FailingKeys, keep_going);
        let err = procedure.start_procedure().unwrap_err();
        assert!(matches!(err, ProcedureError::Terminal(e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn test_control_error_propagates() {
        let mut procedure = ControlProcedure::new(ScriptedKeys::from_chars("w"), |_: KeyCode| -> Flow {
            Err(BotError::MotionTimeout {
                elapsed: Duration::from_secs(1),
            })
        });
        let err = procedure.start_procedure().unwrap_err();
        assert!(matches!(err, ProcedureError::Control(BotError::MotionTimeout { .. })));
    }
}
