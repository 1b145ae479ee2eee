use spidev::{SpiModeFlags, Spidev, SpidevOptions};
use std::path::Path;
use thiserror::Error;

pub mod adc;
pub mod bringup;
pub mod bus;
pub mod config;
pub mod console;
pub mod dma;
pub mod jesd;
pub mod link;
pub mod mock;
pub mod phy;
pub mod registers;
pub mod stream;

pub use adc::{Ad9695, AdcDeviceState, Check, Lock};
pub use bringup::{Frontend, LinkStatus};
pub use bus::{ByteRegisterBus, Delay, PowerDownPin, WordRegisterBus};
pub use jesd::JesdLinkParameters;

#[derive(Error, Debug)]
pub enum Error {
    #[error("bus transfer failed")]
    Io(#[from] std::io::Error),
    #[error("GPIO request failed")]
    Gpio(#[from] gpiocdev::Error),
    #[error("offset {offset:#x} is outside the mapped window")]
    Unmapped { offset: usize },
    #[error("address {offset:#x} is not word aligned")]
    Unaligned { offset: usize },
    #[error("DMA transfer failed to start, status {0:#010x}")]
    DmaStart(u32),

    #[error("invalid JESD parameter {param} = {value}")]
    InvalidJesd { param: &'static str, value: u32 },
    #[error("lane rate {0} kbps is too high")]
    LaneRateTooHigh(u64),
    #[error("lane rate {0} kbps is too low")]
    LaneRateTooLow(u64),
    #[error("bit position {0} does not fit a byte register")]
    BitPosition(u8),
    #[error("subclass {0} not supported, use 0 - 3")]
    Subclass(u8),
    #[error("{what} {value:#x} exceeds {max:#x}")]
    OutOfRange {
        what: &'static str,
        value: u64,
        max: u64,
    },
    #[error("Command Error: {0}")]
    Command(String),

    #[error("DRP {0} port stayed busy")]
    DrpTimeout(phy::DrpPort),
    #[error("DMA reset did not complete")]
    ResetTimeout,
}

impl Error {
    /// Bus level failures. Everything else is a rejected request or an
    /// exhausted poll, which callers may choose to log and continue past.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Gpio(_) | Error::Unmapped { .. } | Error::DmaStart(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn open<P: AsRef<Path>>(path: P, speed_hz: u32) -> std::io::Result<Spidev> {
    let mut spi = Spidev::open(path)?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(speed_hz)
        .mode(SpiModeFlags::SPI_MODE_0)
        .build();
    spi.configure(&options)?;
    Ok(spi)
}
