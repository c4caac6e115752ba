//! Terminal approval prompt using crossterm.
//!
//! Draws the request, then a menu of the channels available right now, and
//! reads a single keystroke in raw mode. Bypass codes are read as a line.

use crate::approval::types::{ApprovalRequest, ChannelKind};
use crate::approval::Prompter;
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal,
};
use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

/// Interactive prompt on the controlling terminal.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn choose_channel(
        &self,
        request: &ApprovalRequest,
        channels: &[ChannelKind],
        timeout: Duration,
    ) -> Result<ChannelKind> {
        draw_request(request)?;
        draw_menu(channels)?;

        terminal::enable_raw_mode()?;
        let choice = read_choice(channels, timeout);
        terminal::disable_raw_mode()?;

        let choice = choice?;
        let mut stderr = std::io::stderr();
        execute!(
            stderr,
            SetForegroundColor(Color::DarkGrey),
            Print(format!("\n  → {}\n", choice.label())),
            ResetColor,
        )?;
        Ok(choice)
    }

    fn read_bypass_code(&self, attempt: u32, max_attempts: u32) -> Result<Option<String>> {
        let mut stderr = std::io::stderr();
        execute!(
            stderr,
            SetForegroundColor(Color::Cyan),
            Print(format!(
                "  Bypass code ({}/{}, empty to cancel): ",
                attempt, max_attempts
            )),
            ResetColor,
        )?;
        stderr.flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        let code = line.trim();
        if code.is_empty() {
            Ok(None)
        } else {
            Ok(Some(code.to_string()))
        }
    }

    fn notice(&self, message: &str) {
        let mut stderr = std::io::stderr();
        let _ = execute!(
            stderr,
            SetForegroundColor(Color::Yellow),
            Print(format!("  {}\n", message)),
            ResetColor,
        );
    }
}

fn read_choice(channels: &[ChannelKind], timeout: Duration) -> Result<ChannelKind> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || !event::poll(remaining)? {
            // No choice before the deadline: cancel.
            return Ok(ChannelKind::Cancel);
        }
        if let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event::read()?
        {
            match code {
                KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                    return Ok(ChannelKind::Cancel)
                }
                KeyCode::Esc => return Ok(ChannelKind::Cancel),
                KeyCode::Enter if channels.contains(&ChannelKind::DirectWait) => {
                    return Ok(ChannelKind::DirectWait)
                }
                KeyCode::Char(c) => {
                    let c = c.to_ascii_lowercase();
                    if let Some(kind) = channels.iter().find(|k| k.key() == c) {
                        return Ok(*kind);
                    }
                }
                _ => {}
            }
        }
    }
}

fn draw_request(request: &ApprovalRequest) -> Result<()> {
    let mut stderr = std::io::stderr();

    execute!(
        stderr,
        Print("\n"),
        SetForegroundColor(Color::Yellow),
        Print("╔══════════════════════════════════════════════════════════╗\n"),
        Print("║              ⚠  APPROVAL REQUIRED                        ║\n"),
        Print("╠══════════════════════════════════════════════════════════╣\n"),
        ResetColor,
    )?;

    let risk_color = if request.risk_score >= 7.0 {
        Color::Red
    } else if request.risk_score >= 4.0 {
        Color::Yellow
    } else {
        Color::Green
    };

    execute!(
        stderr,
        SetForegroundColor(Color::White),
        Print(format!("║  Command: {:<47}║\n", truncate(&request.command, 47))),
        Print(format!("║  Target:  {:<47}║\n", truncate(&request.target, 47))),
        Print("║  Risk:    "),
        SetForegroundColor(risk_color),
        Print(format!("{:<47}", format!("{:.1}/10", request.risk_score))),
        SetForegroundColor(Color::White),
        Print("║\n"),
    )?;

    if !request.reasons.is_empty() {
        execute!(
            stderr,
            Print(format!(
                "║  Reasons: {:<47}║\n",
                truncate(&request.reasons.join(", "), 47)
            )),
        )?;
    }

    if !request.human_preview.is_empty() {
        execute!(
            stderr,
            Print("║  Preview:                                                ║\n"),
        )?;
        for line in request.human_preview.lines().take(5) {
            execute!(
                stderr,
                SetForegroundColor(Color::DarkGrey),
                Print(format!("║    {:<54}║\n", truncate(line, 54))),
            )?;
        }
    }

    if let Some(ref url) = request.approve_url {
        execute!(
            stderr,
            SetForegroundColor(Color::Blue),
            Print(format!("║  Approve: {:<47}║\n", truncate(url, 47))),
        )?;
    }

    execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("╚══════════════════════════════════════════════════════════╝\n"),
        ResetColor,
    )?;
    Ok(())
}

fn draw_menu(channels: &[ChannelKind]) -> Result<()> {
    let mut stderr = std::io::stderr();
    for kind in channels {
        let color = match kind {
            ChannelKind::Cancel => Color::Red,
            ChannelKind::Bypass => Color::Magenta,
            _ => Color::Green,
        };
        execute!(
            stderr,
            SetForegroundColor(color),
            Print(format!("  [{}] ", kind.key().to_ascii_uppercase())),
            ResetColor,
            Print(format!("{}\n", kind.label())),
        )?;
    }
    stderr.flush()?;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// Non-interactive output: prints notices, never reads input.
pub struct PlainPrompter;

impl Prompter for PlainPrompter {
    fn choose_channel(
        &self,
        _request: &ApprovalRequest,
        _channels: &[ChannelKind],
        _timeout: Duration,
    ) -> Result<ChannelKind> {
        Ok(ChannelKind::Cancel)
    }

    fn read_bypass_code(&self, _attempt: u32, _max_attempts: u32) -> Result<Option<String>> {
        Ok(None)
    }

    fn notice(&self, message: &str) {
        eprintln!("[saferun] {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }
}
