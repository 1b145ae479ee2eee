// Talks to the ADC only: scratchpad, chip id and the JESD block read-back.
use ad9695::bus::{GpioPin, Spi, StdDelay};
use ad9695::{Ad9695, JesdLinkParameters};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short, long, default_value = "/dev/spidev1.0")]
    spi: PathBuf,
    #[arg(short, long, default_value = "/dev/gpiochip0")]
    chip: PathBuf,
    #[arg(short, long, default_value_t = 78)]
    line: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let spi = Spi::open(&args.spi, 10_000_000)?;
    let pin = GpioPin::request(&args.chip, args.line)?;
    let mut adc = Ad9695::new(spi, pin, StdDelay);

    println!("scratchpad: {:?}", adc.verify_scratchpad()?);
    println!("identity:   {:?}", adc.identify()?);

    let jesd = adc.read_jesd_config()?;
    println!("{:#?}", jesd);
    if !jesd.matches(&JesdLinkParameters::default()) {
        println!("JESD block differs from the reference link");
    }
    Ok(())
}
