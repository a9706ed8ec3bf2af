//! Terminal I/O utilities for CLI.
//!
//! Provides TTY detection and the interactive release picker.

use std::io::{self, BufRead, IsTerminal, Write};

use dockhand::release::Prompt;

pub fn is_stdin_tty() -> bool {
    io::stdin().is_terminal()
}

pub fn prompt(message: &str) -> dockhand::Result<String> {
    eprint!("{}", message);
    io::stderr().flush().ok();

    let stdin = io::stdin();
    let mut line = String::new();
    stdin.lock().read_line(&mut line).map_err(|e| {
        dockhand::Error::internal_io(format!("Failed to read input: {}", e), Some("read stdin".to_string()))
    })?;

    Ok(line.trim().to_string())
}

/// Print status message to stderr if running in a terminal.
pub fn status(message: &str) {
    if io::stderr().is_terminal() {
        eprintln!("{}", message);
    }
}

/// Numbered choice list on stderr, answer read from stdin.
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn ask_with(&self, question: &str, choices: &[String]) -> dockhand::Result<usize> {
        if !is_stdin_tty() {
            return Err(dockhand::Error::validation_invalid_argument(
                "list",
                "Choosing a release interactively requires a TTY",
                None,
                None,
            )
            .with_hint("Pass the release to roll back to as an argument instead"));
        }

        eprintln!("{}", question);
        for (index, choice) in choices.iter().enumerate() {
            eprintln!("  [{}] {}", index + 1, choice);
        }

        let answer = prompt("> ")?;
        answer.parse::<usize>().map_err(|_| {
            dockhand::Error::validation_invalid_argument(
                "release",
                format!("Expected a number between 1 and {}", choices.len()),
                Some(answer.clone()),
                None,
            )
        })
    }
}

// log_status! macro is defined in lib.rs (#[macro_export]) and available crate-wide.
