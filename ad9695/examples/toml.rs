use ad9695::config::Config;
use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
///Validates a toml board config and prints the resulting lane rate
struct Args {
    file: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.file)?;

    println!("{:#?}", config);
    let (rate, range) = config.jesd.serdes_pll(config.adc.state.sample_clock_khz)?;
    println!("lane rate {} kbps, SERDES PLL {:?}", rate, range);
    Ok(())
}
