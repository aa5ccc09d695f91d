//! Terminal HUD. Also the operator's numeric keypad for prompt responses.

use std::io::{self, Stdout, Write};
use std::time::Duration;

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Print;
use crossterm::terminal::{
    self, disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{execute, queue};

use crate::live_status::LiveStatus;

const MAX_ENTRY_LEN: usize = 8;

#[derive(Clone, Debug, PartialEq)]
pub enum KeypadInput {
    Pending,
    Submit(f64),
    Invalid(String),
    Quit,
}

/// Digits, one decimal point, backspace and Enter.
#[derive(Clone, Debug, Default)]
pub struct Keypad {
    entry: String,
}

impl Keypad {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> KeypadInput {
        if key.kind == KeyEventKind::Release {
            return KeypadInput::Pending;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => KeypadInput::Quit,
            KeyCode::Char('q') | KeyCode::Char('Q') => KeypadInput::Quit,
            KeyCode::Char(c) if c.is_ascii_digit() => {
                if self.entry.len() < MAX_ENTRY_LEN {
                    self.entry.push(c);
                }
                KeypadInput::Pending
            }
            KeyCode::Char('.') => {
                if !self.entry.contains('.') && self.entry.len() < MAX_ENTRY_LEN {
                    self.entry.push('.');
                }
                KeypadInput::Pending
            }
            KeyCode::Backspace => {
                self.entry.pop();
                KeypadInput::Pending
            }
            KeyCode::Esc => {
                self.entry.clear();
                KeypadInput::Pending
            }
            KeyCode::Enter => {
                let entry = std::mem::take(&mut self.entry);
                match entry.parse::<f64>() {
                    Ok(v) => KeypadInput::Submit(v),
                    Err(_) => KeypadInput::Invalid(entry),
                }
            }
            _ => KeypadInput::Pending,
        }
    }
}

/// Screen contents for one frame.
pub fn render_lines(status: &LiveStatus, keypad: &Keypad, message: &str) -> Vec<String> {
    let mut lines = vec![
        format!("exo bench  {}", status.trial),
        format!(
            "phase {:<10} round {}/{}  strides {} (total {})",
            status.phase,
            (status.round + 1).min(status.rounds.max(1)),
            status.rounds,
            status.strides_this_round,
            status.strides_total
        ),
        String::new(),
        format!(
            "{:<6} {:>9} {:>9} {:>8} {:>8} {:>8} {:>9} {:>7}",
            "boot", "version", "iter", "z", "mean", "std", "ank_ang", "drop"
        ),
    ];
    for d in &status.devices {
        lines.push(format!(
            "{:<6} {:>9} {:>9} {:>+8.2} {:>8.4} {:>8.4} {:>9.1} {:>7}{}",
            d.side,
            d.snapshot_version,
            d.iteration,
            d.z,
            d.accel_mean,
            d.accel_std,
            d.ank_ang,
            d.rows_dropped,
            if d.active { "  ACTIVE" } else { "" }
        ));
    }
    lines.push(String::new());
    lines.push(format!(
        "plate load {:>7.1} N   TR {}",
        status.plate_load_n,
        status
            .transmission_ratio
            .map(|tr| format!("{:.2}", tr))
            .unwrap_or_else(|| "-".into())
    ));
    lines.push(String::new());
    lines.push(format!("response> {}_", keypad.entry()));
    lines.push(message.to_string());
    lines.push("digits . backspace, Enter submit, q quit".to_string());
    lines
}

/// Owns the terminal while alive: raw mode plus the alternate screen.
pub struct Hud {
    out: Stdout,
}

impl Hud {
    pub fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut out = io::stdout();
        if let Err(e) = execute!(out, EnterAlternateScreen, Hide) {
            let _ = disable_raw_mode();
            return Err(e);
        }
        Ok(Self { out })
    }

    pub fn draw(&mut self, lines: &[String]) -> io::Result<()> {
        let (width, height) = terminal::size().unwrap_or((100, 30));
        queue!(self.out, Clear(ClearType::All))?;
        for (row, line) in lines.iter().take(height as usize).enumerate() {
            let clipped: String = line.chars().take(width as usize).collect();
            queue!(self.out, MoveTo(0, row as u16), Print(clipped))?;
        }
        self.out.flush()
    }

    /// Wait up to `timeout` for a key press.
    pub fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<KeyEvent>> {
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }
}

impl Drop for Hud {
    fn drop(&mut self) {
        let _ = execute!(self.out, Show, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_status::DeviceStatus;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_keypad_builds_and_submits() {
        let mut pad = Keypad::default();
        for c in ['4', '2', '.', '5', '.'] {
            assert_eq!(pad.handle_key(press(KeyCode::Char(c))), KeypadInput::Pending);
        }
        assert_eq!(pad.entry(), "42.5");
        pad.handle_key(press(KeyCode::Backspace));
        assert_eq!(pad.handle_key(press(KeyCode::Enter)), KeypadInput::Submit(42.0));
        assert_eq!(pad.entry(), "");
    }

    #[test]
    fn test_keypad_ignores_letters_and_reports_empty_submit() {
        let mut pad = Keypad::default();
        pad.handle_key(press(KeyCode::Char('x')));
        assert_eq!(pad.entry(), "");
        assert_eq!(pad.handle_key(press(KeyCode::Enter)), KeypadInput::Invalid(String::new()));
    }

    #[test]
    fn test_keypad_quit_keys() {
        let mut pad = Keypad::default();
        assert_eq!(pad.handle_key(press(KeyCode::Char('q'))), KeypadInput::Quit);
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(pad.handle_key(ctrl_c), KeypadInput::Quit);
    }

    #[test]
    fn test_entry_length_is_bounded() {
        let mut pad = Keypad::default();
        for _ in 0..20 {
            pad.handle_key(press(KeyCode::Char('9')));
        }
        assert_eq!(pad.entry().len(), MAX_ENTRY_LEN);
    }

    #[test]
    fn test_render_marks_active_boot() {
        let mut status = LiveStatus::new("S01");
        status.rounds = 3;
        status.devices.push(DeviceStatus {
            side: "left".into(),
            active: true,
            ..DeviceStatus::default()
        });
        status.devices.push(DeviceStatus {
            side: "right".into(),
            ..DeviceStatus::default()
        });
        let mut pad = Keypad::default();
        pad.handle_key(press(KeyCode::Char('7')));
        let lines = render_lines(&status, &pad, "");
        assert!(lines.iter().any(|l| l.starts_with("left") && l.ends_with("ACTIVE")));
        assert!(lines.iter().any(|l| l.starts_with("right") && !l.contains("ACTIVE")));
        assert!(lines.iter().any(|l| l == "response> 7_"));
    }
}
