//! Board configuration, read from TOML. Every field has a default matching
//! the reference board, so an empty file is a valid config.
use crate::adc::AdcDeviceState;
use crate::jesd::JesdLinkParameters;
use serde::{Deserialize, Serialize};
use std::{fs::read_to_string, net::SocketAddr, path::Path, path::PathBuf, time::Duration};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// physical memory device behind every window and the `mem` command
    pub devmem: PathBuf,
    pub adc: AdcConfig,
    pub jesd: JesdLinkParameters,
    #[serde(default = "Window::phy")]
    pub phy: Window,
    #[serde(default = "Window::link")]
    pub link: Window,
    #[serde(default = "Window::dma")]
    pub dma: Window,
    pub capture: CaptureConfig,
    pub net: NetConfig,
    pub monitor: MonitorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devmem: PathBuf::from("/dev/mem"),
            adc: AdcConfig::default(),
            jesd: JesdLinkParameters::default(),
            phy: Window::phy(),
            link: Window::link(),
            dma: Window::dma(),
            capture: CaptureConfig::default(),
            net: NetConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdcConfig {
    pub spi: PathBuf,
    pub spi_speed_hz: u32,
    pub gpio_chip: PathBuf,
    pub powerdown_line: u32,
    #[serde(flatten)]
    pub state: AdcDeviceState,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            spi: PathBuf::from("/dev/spidev1.0"),
            spi_speed_hz: 10_000_000,
            gpio_chip: PathBuf::from("/dev/gpiochip0"),
            powerdown_line: 78,
            state: AdcDeviceState::default(),
        }
    }
}

/// A physical register window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub base: u64,
    #[serde(default = "Window::default_size")]
    pub size: usize,
}

impl Window {
    fn default_size() -> usize {
        0x1_0000
    }

    fn at(base: u64) -> Self {
        Self {
            base,
            size: Self::default_size(),
        }
    }

    fn link() -> Self {
        Self::at(0xA001_0000)
    }

    fn phy() -> Self {
        Self::at(0xA002_0000)
    }

    fn dma() -> Self {
        Self::at(0xA003_0000)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub base: u64,
    pub len: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            base: 0x0130_0000,
            len: crate::dma::CAPTURE_LEN,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub bind: SocketAddr,
    pub host: SocketAddr,
    /// datagrams per `udp` burst
    pub packets: u32,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5002)),
            host: SocketAddr::from(([192, 168, 1, 10], 5002)),
            packets: 32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Self::from_toml(&read_to_string(path.as_ref())?)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(contents)?;
        // a zero period leaves the timerfd disarmed
        if config.monitor.interval_ms == 0 {
            anyhow::bail!("monitor.interval_ms must be at least 1");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{ClockDelayMode, TestMode};

    #[test]
    fn empty_file_is_reference() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c, Config::default());
        assert_eq!(c.jesd, JesdLinkParameters::default());
        assert_eq!(c.adc.state.sample_clock_khz, 500_000);
        assert_eq!(c.link.base, 0xA001_0000);
        assert_eq!(c.capture.base, 0x0130_0000);
        assert_eq!(c.net.host.to_string(), "192.168.1.10:5002");
        assert_eq!(c.monitor.interval(), Duration::from_secs(1));
        assert_eq!(c.devmem, PathBuf::from("/dev/mem"));
    }

    #[test]
    fn partial_file() {
        let c: Config = toml::from_str(
            r#"
            devmem = "/tmp/mem"

            [adc]
            spi = "/dev/spidev0.0"
            sample_clock_khz = 250000
            force_cgs = true

            [adc.channel_a]
            test_mode = "ramp"

            [adc.channel_b.delay]
            mode = "super-fine"
            fine = 16

            [jesd]
            scrambling = true

            [phy]
            base = 0xA0040000

            [net]
            packets = 4
            "#,
        )
        .unwrap();
        assert_eq!(c.adc.spi, PathBuf::from("/dev/spidev0.0"));
        assert_eq!(c.adc.powerdown_line, 78);
        assert_eq!(c.adc.state.sample_clock_khz, 250_000);
        assert!(c.adc.state.force_cgs);
        assert_eq!(c.adc.state.channel_a.test_mode, TestMode::Ramp);
        assert_eq!(c.adc.state.channel_b.delay.mode, ClockDelayMode::SuperFine);
        assert_eq!(c.adc.state.channel_b.delay.fine, 16);
        assert!(c.jesd.scrambling);
        assert_eq!(c.jesd.l, 4);
        assert_eq!(c.phy, Window { base: 0xA004_0000, size: 0x1_0000 });
        assert_eq!(c.link, Window::link());
        assert_eq!(c.net.packets, 4);
        assert_eq!(c.net.bind.port(), 5002);
        assert_eq!(c.devmem, PathBuf::from("/tmp/mem"));
    }

    #[test]
    fn packaged_config_is_reference() {
        let c: Config = toml::from_str(include_str!("../debian/daq.toml")).unwrap();
        assert_eq!(c, Config::default());
    }

    #[test]
    fn rejects_zero_monitor_interval() {
        let err = Config::from_toml("[monitor]\ninterval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("interval_ms"));
        let c = Config::from_toml("[monitor]\ninterval_ms = 250\n").unwrap();
        assert_eq!(c.monitor.interval(), Duration::from_millis(250));
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(toml::from_str::<Config>("[adc]\nchip_mode = \"eight-ddc\"\n").is_err());
    }
}
