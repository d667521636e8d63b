use std::sync::{Arc, Mutex};
use zeromon::display::{CharacterDisplay, DisplayCommand, DisplayHandle, DisplayLine};
use zeromon::error::DisplayError;
use zeromon::monitor;

#[derive(Clone, Default)]
struct Lcd {
    log: Arc<Mutex<Vec<String>>>,
    columns: Option<usize>,
    faulty_backlight: bool,
}

impl Lcd {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl CharacterDisplay for Lcd {
    fn columns(&self) -> usize {
        self.columns.unwrap_or(16)
    }

    fn write_line(&mut self, line: DisplayLine, text: &str) -> Result<(), DisplayError> {
        self.record(format!("line{}={}", line.index(), text));
        Ok(())
    }

    fn set_backlight(&mut self, on: bool) -> Result<(), DisplayError> {
        if on && self.faulty_backlight {
            return Err(DisplayError::Write("backlight driver fault".to_string()));
        }
        self.record(format!("backlight={on}"));
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        self.record("clear".to_string());
        Ok(())
    }

    fn home(&mut self) -> Result<(), DisplayError> {
        self.record("home".to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_commands_apply_in_order() {
    let lcd = Lcd::default();
    let (display, worker) = DisplayHandle::spawn(lcd.clone());

    display.write_line(DisplayLine::First, "Temp: 77.0F").unwrap();
    display.write_line(DisplayLine::Second, "Hum : 40.0%").unwrap();
    display.home().await.unwrap();

    drop(display);
    worker.await.unwrap();

    assert_eq!(
        lcd.entries(),
        vec!["line0=Temp: 77.0F", "line1=Hum : 40.0%", "home"]
    );
}

#[tokio::test]
async fn test_lines_truncated_to_display_width() {
    let lcd = Lcd { columns: Some(8), ..Default::default() };
    let (display, _worker) = DisplayHandle::spawn(lcd.clone());

    display.show(DisplayLine::First, "Temp: 77.0F     ").await.unwrap();
    assert_eq!(lcd.entries(), vec!["line0=Temp: 77"]);
}

#[tokio::test]
async fn test_concurrent_writers_do_not_interleave() {
    let lcd = Lcd::default();
    let (display, worker) = DisplayHandle::spawn(lcd.clone());

    let mut writers = Vec::new();
    for id in 0..4 {
        let display = display.clone();
        writers.push(tokio::spawn(async move {
            for n in 0..10 {
                display
                    .execute(DisplayCommand::line(DisplayLine::First, &format!("w{id}-{n}")))
                    .await
                    .unwrap();
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }
    drop(display);
    worker.await.unwrap();

    let entries = lcd.entries();
    assert_eq!(entries.len(), 40);
    for id in 0..4 {
        // Each writer's commands land whole and in its own order
        let mine: Vec<_> = entries
            .iter()
            .filter(|e| e.starts_with(&format!("line0=w{id}-")))
            .cloned()
            .collect();
        let expected: Vec<_> = (0..10).map(|n| format!("line0=w{id}-{n}")).collect();
        assert_eq!(mine, expected);
    }
}

#[tokio::test]
async fn test_execute_reports_device_errors() {
    let lcd = Lcd { faulty_backlight: true, ..Default::default() };
    let (display, _worker) = DisplayHandle::spawn(lcd);

    let err = display.backlight(true).await.unwrap_err();
    assert_eq!(err, DisplayError::Write("backlight driver fault".to_string()));
    assert!(display.backlight(false).await.is_ok());
}

#[tokio::test]
async fn test_closed_worker() {
    let (display, worker) = DisplayHandle::spawn(Lcd::default());
    worker.abort();
    let _ = worker.await;

    assert_eq!(display.clear().await, Err(DisplayError::Closed));
    assert_eq!(
        display.write_line(DisplayLine::First, "x"),
        Err(DisplayError::Closed)
    );
}

#[tokio::test]
async fn test_greet_and_dim() {
    let lcd = Lcd::default();
    let (display, _worker) = DisplayHandle::spawn(lcd.clone());

    monitor::greet(&display, "ZeroMon", "v0.1.0").await.unwrap();
    monitor::dim(&display).await;

    assert_eq!(
        lcd.entries(),
        vec![
            "backlight=false",
            "clear",
            "line0=ZeroMon",
            "line1=v0.1.0",
            "backlight=false"
        ]
    );
}
