//! Character display sink with serialized access.
//!
//! The device is owned by a single worker task; every loop talks to it through
//! a cloneable [`DisplayHandle`]. Writes therefore never interleave on the
//! bus, and a caller never waits on the hardware unless it asks to.

pub mod console;
pub mod lcd;

pub use console::ConsoleDisplay;
pub use lcd::I2cLcd;

use crate::error::DisplayError;
use heapless::String as LineBuf;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Widest line an HD44780-class controller can hold.
pub const MAX_COLUMNS: usize = 40;
pub const DEFAULT_COLUMNS: usize = 16;

const COMMAND_QUEUE_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayLine {
    First,
    Second,
}

impl DisplayLine {
    pub fn index(self) -> u8 {
        match self {
            DisplayLine::First => 0,
            DisplayLine::Second => 1,
        }
    }
}

/// External write primitive of a two-line character display.
pub trait CharacterDisplay: Send + 'static {
    fn columns(&self) -> usize {
        DEFAULT_COLUMNS
    }

    fn write_line(&mut self, line: DisplayLine, text: &str) -> Result<(), DisplayError>;
    fn set_backlight(&mut self, on: bool) -> Result<(), DisplayError>;
    fn clear(&mut self) -> Result<(), DisplayError>;
    fn home(&mut self) -> Result<(), DisplayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayCommand {
    Line { line: DisplayLine, text: LineBuf<MAX_COLUMNS> },
    Backlight(bool),
    Clear,
    Home,
}

impl DisplayCommand {
    /// Line write, truncated to the controller's maximum width.
    pub fn line(line: DisplayLine, text: &str) -> Self {
        DisplayCommand::Line { line, text: fit_line(text, MAX_COLUMNS) }
    }
}

/// Truncate `text` to at most `columns` characters.
pub fn fit_line(text: &str, columns: usize) -> LineBuf<MAX_COLUMNS> {
    let mut buf = LineBuf::new();
    for c in text.chars().take(columns.min(MAX_COLUMNS)) {
        if buf.push(c).is_err() {
            break;
        }
    }
    buf
}

struct Request {
    command: DisplayCommand,
    reply: Option<oneshot::Sender<Result<(), DisplayError>>>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request").field("command", &self.command).finish()
    }
}

/// Cloneable, serialized access to the display.
#[derive(Debug, Clone)]
pub struct DisplayHandle {
    tx: mpsc::Sender<Request>,
}

impl DisplayHandle {
    /// Move `display` into its worker task. The worker exits once every
    /// handle is dropped and the queue has drained.
    pub fn spawn<D: CharacterDisplay>(display: D) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let worker = tokio::spawn(run_display(display, rx));
        (Self { tx }, worker)
    }

    /// Queue a command without waiting for the hardware.
    ///
    /// Fails immediately when the worker is gone or too far behind; the
    /// next refresh supersedes a dropped write anyway.
    pub fn submit(&self, command: DisplayCommand) -> Result<(), DisplayError> {
        self.tx
            .try_send(Request { command, reply: None })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    DisplayError::Write("display queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => DisplayError::Closed,
            })
    }

    pub fn write_line(&self, line: DisplayLine, text: &str) -> Result<(), DisplayError> {
        self.submit(DisplayCommand::line(line, text))
    }

    /// Run a command and wait for the device's answer.
    pub async fn execute(&self, command: DisplayCommand) -> Result<(), DisplayError> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(Request { command, reply: Some(reply) })
            .await
            .map_err(|_| DisplayError::Closed)?;
        answer.await.map_err(|_| DisplayError::Closed)?
    }

    pub async fn show(&self, line: DisplayLine, text: &str) -> Result<(), DisplayError> {
        self.execute(DisplayCommand::line(line, text)).await
    }

    pub async fn backlight(&self, on: bool) -> Result<(), DisplayError> {
        self.execute(DisplayCommand::Backlight(on)).await
    }

    pub async fn clear(&self) -> Result<(), DisplayError> {
        self.execute(DisplayCommand::Clear).await
    }

    pub async fn home(&self) -> Result<(), DisplayError> {
        self.execute(DisplayCommand::Home).await
    }
}

fn apply<D: CharacterDisplay>(display: &mut D, command: &DisplayCommand) -> Result<(), DisplayError> {
    match command {
        DisplayCommand::Line { line, text } => {
            let text = fit_line(text, display.columns());
            display.write_line(*line, &text)
        }
        DisplayCommand::Backlight(on) => display.set_backlight(*on),
        DisplayCommand::Clear => display.clear(),
        DisplayCommand::Home => display.home(),
    }
}

async fn run_display<D: CharacterDisplay>(mut display: D, mut rx: mpsc::Receiver<Request>) {
    while let Some(Request { command, reply }) = rx.recv().await {
        // Device I/O blocks; keep it off the async workers
        let joined = tokio::task::spawn_blocking(move || {
            let result = apply(&mut display, &command);
            (display, command, result)
        })
        .await;

        let (returned, command, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!("display worker lost the device: {}", e);
                if let Some(reply) = reply {
                    let _ = reply.send(Err(DisplayError::Closed));
                }
                return;
            }
        };
        display = returned;

        match reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    warn!(?command, "display: {}", e);
                }
            }
        }
    }
}
