use super::{CharacterDisplay, DisplayLine, DEFAULT_COLUMNS};
use crate::error::DisplayError;
use colored::Colorize;
use std::io::Write;

/// Renders the two display lines to stdout.
///
/// Stands in for the LCD when the process runs without one attached.
#[derive(Debug)]
pub struct ConsoleDisplay {
    columns: usize,
    backlight: bool,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self::with_columns(DEFAULT_COLUMNS)
    }

    pub fn with_columns(columns: usize) -> Self {
        Self { columns, backlight: false }
    }

    fn emit(&self, tag: &str, body: &str) -> Result<(), DisplayError> {
        let tag = if self.backlight { tag.bright_cyan() } else { tag.dimmed() };
        let mut out = std::io::stdout().lock();
        writeln!(out, "{tag} {body}").map_err(|e| DisplayError::Write(e.to_string()))
    }
}

impl Default for ConsoleDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl CharacterDisplay for ConsoleDisplay {
    fn columns(&self) -> usize {
        self.columns
    }

    fn write_line(&mut self, line: DisplayLine, text: &str) -> Result<(), DisplayError> {
        let body = format!("|{:<width$}|", text, width = self.columns);
        let body = if self.backlight { body.bright_white() } else { body.normal() };
        self.emit(&format!("[lcd:{}]", line.index() + 1), &body.to_string())
    }

    fn set_backlight(&mut self, on: bool) -> Result<(), DisplayError> {
        self.backlight = on;
        self.emit("[lcd]", if on { "backlight on" } else { "backlight off" })
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        self.emit("[lcd]", "clear")
    }

    fn home(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }
}
