// Reads both PLLs without touching the configuration, like `adc -c`.
use ad9695::bringup::{Bases, Frontend};
use ad9695::bus::{DevMem, GpioPin, Mmio, Spi, StdDelay};
use ad9695::config::Config;
use ad9695::dma::CaptureBuffer;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
struct Args {
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let c = match args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let mut board = Frontend::new(
        Spi::open(&c.adc.spi, c.adc.spi_speed_hz)?,
        GpioPin::request(&c.adc.gpio_chip, c.adc.powerdown_line)?,
        Mmio::map(&c.devmem, c.phy.base, c.phy.size)?,
        Mmio::map(&c.devmem, c.link.base, c.link.size)?,
        Mmio::map(&c.devmem, c.dma.base, c.dma.size)?,
        CaptureBuffer::new(
            Mmio::map(&c.devmem, c.capture.base, c.capture.len)?,
            c.capture.base,
            c.capture.len,
        ),
        DevMem::new(&c.devmem),
        Bases {
            phy: c.phy.base,
            link: c.link.base,
        },
        StdDelay,
    );

    let status = board.link_status()?;
    println!("{:?}", status);
    println!("link {}", if status.is_up() { "up" } else { "down" });
    println!(
        "link layer status {:#010x}, lanes {:#010x}",
        board.link.status()?,
        board.link.lane_enable()?
    );
    Ok(())
}
