//! HD44780 character LCD behind a PCF8574 I2C backpack.
//!
//! The expander drives the controller in 4-bit mode. Its pins map as
//! P0=RS, P1=RW, P2=EN, P3=backlight and P4..P7=D4..D7.

use super::{CharacterDisplay, DisplayLine, DEFAULT_COLUMNS};
use crate::error::DisplayError;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use tracing::debug;

pub const DEFAULT_ADDRESS: u8 = 0x27;
pub const DEFAULT_BUS: &str = "/dev/i2c-1";

const RS: u8 = 0x01;
const EN: u8 = 0x04;
const BACKLIGHT: u8 = 0x08;

const CMD_CLEAR: u8 = 0x01;
const CMD_HOME: u8 = 0x02;
const CMD_ENTRY_LEFT: u8 = 0x06;
const CMD_DISPLAY_ON: u8 = 0x0C;
const CMD_FUNCTION_4BIT_2LINE: u8 = 0x28;
const CMD_SET_DDRAM: u8 = 0x80;

const LINE_OFFSETS: [u8; 2] = [0x00, 0x40];

/// ROM A00 glyph for the degree sign.
const DEGREE: u8 = 0xDF;

pub struct I2cLcd<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    backlight: bool,
    columns: usize,
}

impl<I: I2c, D: DelayNs> I2cLcd<I, D> {
    /// Run the 4-bit power-on sequence and leave the display blank, cursor
    /// off and backlight off.
    pub fn new(i2c: I, delay: D, address: u8) -> Result<Self, DisplayError> {
        let mut lcd = Self {
            i2c,
            delay,
            address,
            backlight: false,
            columns: DEFAULT_COLUMNS,
        };
        lcd.init()
            .map_err(|e| DisplayError::Init(format!("lcd at {address:#04x}: {e}")))?;
        debug!("lcd initialized at {:#04x}", address);
        Ok(lcd)
    }

    fn init(&mut self) -> Result<(), DisplayError> {
        self.delay.delay_ms(50);
        self.expander(0)?;

        // Three 8-bit function sets resync the controller whatever its mode
        self.nibble(0x30, 0)?;
        self.delay.delay_us(4500);
        self.nibble(0x30, 0)?;
        self.delay.delay_us(4500);
        self.nibble(0x30, 0)?;
        self.delay.delay_us(150);
        self.nibble(0x20, 0)?;

        self.command(CMD_FUNCTION_4BIT_2LINE)?;
        self.command(CMD_DISPLAY_ON)?;
        self.command(CMD_CLEAR)?;
        self.delay.delay_ms(2);
        self.command(CMD_ENTRY_LEFT)
    }

    fn control(&self) -> u8 {
        if self.backlight {
            BACKLIGHT
        } else {
            0
        }
    }

    fn expander(&mut self, byte: u8) -> Result<(), DisplayError> {
        self.i2c
            .write(self.address, &[byte])
            .map_err(|e| DisplayError::Write(format!("i2c: {e:?}")))
    }

    /// Latch the high four bits of `bits` with one enable pulse.
    fn nibble(&mut self, bits: u8, mode: u8) -> Result<(), DisplayError> {
        let byte = (bits & 0xF0) | mode | self.control();
        self.i2c
            .write(self.address, &[byte | EN, byte & !EN])
            .map_err(|e| DisplayError::Write(format!("i2c: {e:?}")))?;
        self.delay.delay_us(50);
        Ok(())
    }

    fn send(&mut self, value: u8, mode: u8) -> Result<(), DisplayError> {
        self.nibble(value & 0xF0, mode)?;
        self.nibble(value << 4, mode)
    }

    fn command(&mut self, value: u8) -> Result<(), DisplayError> {
        self.send(value, 0)
    }
}

/// Map a character onto the controller's ROM.
fn glyph(c: char) -> u8 {
    match c {
        '°' => DEGREE,
        ' '..='}' => c as u8,
        _ => b'?',
    }
}

impl<I, D> CharacterDisplay for I2cLcd<I, D>
where
    I: I2c + Send + 'static,
    D: DelayNs + Send + 'static,
{
    fn columns(&self) -> usize {
        self.columns
    }

    fn write_line(&mut self, line: DisplayLine, text: &str) -> Result<(), DisplayError> {
        self.command(CMD_SET_DDRAM | LINE_OFFSETS[usize::from(line.index())])?;
        let padded = text.chars().map(glyph).chain(std::iter::repeat(b' '));
        for byte in padded.take(self.columns) {
            self.send(byte, RS)?;
        }
        Ok(())
    }

    fn set_backlight(&mut self, on: bool) -> Result<(), DisplayError> {
        self.backlight = on;
        let byte = self.control();
        self.expander(byte)
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        self.command(CMD_CLEAR)?;
        self.delay.delay_ms(2);
        Ok(())
    }

    fn home(&mut self) -> Result<(), DisplayError> {
        self.command(CMD_HOME)?;
        self.delay.delay_ms(2);
        Ok(())
    }
}

impl<I, D> std::fmt::Debug for I2cLcd<I, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("I2cLcd")
            .field("address", &format_args!("{:#04x}", self.address))
            .field("backlight", &self.backlight)
            .field("columns", &self.columns)
            .finish()
    }
}

/// Open the LCD on a Linux I2C character device.
#[cfg(target_os = "linux")]
pub fn open(
    bus: &std::path::Path,
    address: u8,
) -> Result<I2cLcd<linux_embedded_hal::I2cdev, linux_embedded_hal::Delay>, DisplayError> {
    let i2c = linux_embedded_hal::I2cdev::new(bus)
        .map_err(|e| DisplayError::Init(format!("{}: {e}", bus.display())))?;
    I2cLcd::new(i2c, linux_embedded_hal::Delay, address)
}
