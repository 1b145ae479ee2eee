//! JESD204 PHY: transceiver resets, PLL status and the DRP bridges into the
//! common (QPLL) and per lane (GT channel) blocks.
use crate::bus::{Delay, WordRegisterBus};
use crate::{Error, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use tracing::{debug, info, warn};

pub mod regs {
    pub const COMMON_INTERFACE_SEL: usize = 0x0020;
    pub const GT_INTERFACE_SEL: usize = 0x0024;
    pub const PLL_STATUS: usize = 0x0080;

    pub const COMMON_DRP: usize = 0x0100;
    pub const GT_DRP: usize = 0x0200;
    // offsets inside a DRP block
    pub const DRP_ADDR: usize = 0x04;
    pub const DRP_WDATA: usize = 0x08;
    pub const DRP_RDATA: usize = 0x0C;
    pub const DRP_RESET: usize = 0x10;
    pub const DRP_STATUS: usize = 0x14;

    pub const TX_RESET: usize = 0x0420;
    pub const RX_RESET: usize = 0x0424;
    pub const TXPD: usize = 0x0504;

    pub const DRP_READ: u32 = 1 << 30;
    pub const DRP_WRITE: u32 = 1 << 31;
    pub const DRP_BUSY: u32 = 1 << 0;
    /// both TX power down bits
    pub const TXPD_OFF: u32 = 0b11;
}

pub const RESET_PULSE: Duration = Duration::from_millis(1);
pub const PLL_STATUS_POLLS: u32 = 1000;
pub const DRP_POLLS: u32 = 100;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PllStatus: u32 {
        const TX_RESET_IN_PROG = 1 << 4;
        const RX_RESET_IN_PROG = 1 << 3;
        const CPLL_UNLOCKED    = 1 << 2;
        const QPLL0_UNLOCKED   = 1 << 1;
        const QPLL1_UNLOCKED   = 1 << 0;
    }
}

impl PllStatus {
    /// QPLL0 locked and the receivers out of reset.
    pub fn locked(self) -> bool {
        !self.intersects(PllStatus::QPLL0_UNLOCKED | PllStatus::RX_RESET_IN_PROG)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrpPort {
    Common,
    Transceiver,
}

impl DrpPort {
    fn base(self) -> usize {
        match self {
            DrpPort::Common => regs::COMMON_DRP,
            DrpPort::Transceiver => regs::GT_DRP,
        }
    }

    fn interface_sel(self) -> usize {
        match self {
            DrpPort::Common => regs::COMMON_INTERFACE_SEL,
            DrpPort::Transceiver => regs::GT_INTERFACE_SEL,
        }
    }
}

impl fmt::Display for DrpPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrpPort::Common => write!(f, "common"),
            DrpPort::Transceiver => write!(f, "transceiver"),
        }
    }
}

/// Result of [`Phy::check_pll_status`].
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PllCheck {
    pub status: PllStatus,
    pub polls: u32,
}

impl PllCheck {
    pub fn locked(&self) -> bool {
        self.status.locked()
    }
}

pub struct Phy<W, D> {
    bus: W,
    delay: D,
}

impl<W: WordRegisterBus, D: Delay> Phy<W, D> {
    pub fn new(bus: W, delay: D) -> Self {
        Self { bus, delay }
    }

    pub fn read(&mut self, offset: usize) -> Result<u32> {
        self.bus.read_word(offset)
    }

    pub fn write(&mut self, offset: usize, value: u32) -> Result<()> {
        self.bus.write_word(offset, value)
    }

    /// Hold the transmitters in reset and power them down; the link only
    /// receives.
    pub fn tx_disable(&mut self) -> Result<()> {
        self.bus.write_word(regs::TX_RESET, 1)?;
        self.bus.write_word(regs::TXPD, regs::TXPD_OFF)
    }

    pub fn rx_reset(&mut self) -> Result<()> {
        self.bus.write_word(regs::RX_RESET, 1)?;
        self.delay.sleep(RESET_PULSE);
        self.bus.write_word(regs::RX_RESET, 0)
    }

    pub fn drp_reset(&mut self) -> Result<()> {
        self.bus.write_word(regs::COMMON_DRP + regs::DRP_RESET, 1)?;
        self.bus.write_word(regs::GT_DRP + regs::DRP_RESET, 1)?;
        self.delay.sleep(RESET_PULSE);
        Ok(())
    }

    pub fn pll_status(&mut self) -> Result<PllStatus> {
        Ok(PllStatus::from_bits_truncate(
            self.bus.read_word(regs::PLL_STATUS)?,
        ))
    }

    /// Poll while QPLL0 is unlocked and RX reset is still running, at most
    /// 1000 reads. Stops as soon as either clears; locked only when both
    /// have.
    pub fn check_pll_status(&mut self) -> Result<PllCheck> {
        let stuck = PllStatus::QPLL0_UNLOCKED | PllStatus::RX_RESET_IN_PROG;
        let mut polls = 0;
        let status = loop {
            polls += 1;
            let status = self.pll_status()?;
            if !status.contains(stuck) || polls == PLL_STATUS_POLLS {
                break status;
            }
        };

        let check = PllCheck { status, polls };
        if check.locked() {
            info!("phy PLL locked after {} polls", polls);
        } else {
            warn!("phy PLL not locked after {} polls: {:?}", polls, status);
        }
        Ok(check)
    }

    fn wait_drp(&mut self, port: DrpPort) -> Result<()> {
        let status = port.base() + regs::DRP_STATUS;
        for _ in 0..DRP_POLLS {
            if self.bus.read_word(status)? & regs::DRP_BUSY == 0 {
                return Ok(());
            }
        }
        warn!("phy DRP {} access timed out", port);
        Err(Error::DrpTimeout(port))
    }

    pub fn drp_read(&mut self, port: DrpPort, interface: u32, addr: u32) -> Result<u16> {
        let base = port.base();
        self.bus.write_word(port.interface_sel(), interface)?;
        self.bus
            .write_word(base + regs::DRP_ADDR, addr | regs::DRP_READ)?;
        self.wait_drp(port)?;
        let v = self.bus.read_word(base + regs::DRP_RDATA)?;
        debug!("phy DRP {} [{}] {:#06x} -> {:#06x}", port, interface, addr, v & 0xFFFF);
        Ok((v & 0xFFFF) as u16)
    }

    pub fn drp_write(&mut self, port: DrpPort, interface: u32, addr: u32, data: u16) -> Result<()> {
        let base = port.base();
        self.bus.write_word(port.interface_sel(), interface)?;
        self.bus.write_word(base + regs::DRP_WDATA, data.into())?;
        self.bus
            .write_word(base + regs::DRP_ADDR, addr | regs::DRP_WRITE)?;
        self.wait_drp(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Event, MockDelay, MockWordBus, Trace};

    fn rig() -> (Phy<MockWordBus, MockDelay>, MockWordBus, Trace) {
        let trace = Trace::new();
        let bus = MockWordBus::new("phy", &trace);
        (Phy::new(bus.clone(), MockDelay::new(&trace)), bus, trace)
    }

    #[test]
    fn tx_disable_and_rx_reset() {
        let (mut phy, _, trace) = rig();
        phy.tx_disable().unwrap();
        phy.rx_reset().unwrap();
        assert_eq!(
            trace.events(),
            vec![
                Event::Write32 { bus: "phy", offset: regs::TX_RESET, value: 1 },
                Event::Write32 { bus: "phy", offset: regs::TXPD, value: 3 },
                Event::Write32 { bus: "phy", offset: regs::RX_RESET, value: 1 },
                Event::Sleep(RESET_PULSE),
                Event::Write32 { bus: "phy", offset: regs::RX_RESET, value: 0 },
            ]
        );
    }

    #[test]
    fn status_flags() {
        let (mut phy, bus, _) = rig();
        bus.set(regs::PLL_STATUS, 0b1_0110);
        let s = phy.pll_status().unwrap();
        assert_eq!(
            s,
            PllStatus::TX_RESET_IN_PROG | PllStatus::CPLL_UNLOCKED | PllStatus::QPLL0_UNLOCKED
        );
        assert!(!s.locked());
    }

    #[test]
    fn pll_never_settles() {
        let (mut phy, bus, trace) = rig();
        bus.set(regs::PLL_STATUS, 0b0_1010);
        let check = phy.check_pll_status().unwrap();
        assert!(!check.locked());
        assert_eq!(check.polls, PLL_STATUS_POLLS);
        assert_eq!(trace.reads32("phy", regs::PLL_STATUS), 1000);
        assert!(trace.sleeps().is_empty());
    }

    #[test]
    fn pll_settles() {
        let (mut phy, bus, _) = rig();
        bus.script(regs::PLL_STATUS, [0b0_1010, 0b0_1010, 0b0_0001]);
        let check = phy.check_pll_status().unwrap();
        assert!(check.locked());
        assert_eq!(check.polls, 3);
    }

    #[test]
    fn one_flag_clearing_stops_early_but_fails() {
        let (mut phy, bus, _) = rig();
        bus.script(regs::PLL_STATUS, [0b0_1010, 0b0_0010]);
        let check = phy.check_pll_status().unwrap();
        assert!(!check.locked());
        assert_eq!(check.polls, 2);
    }

    #[test]
    fn drp_read_flags_and_mask() {
        let (mut phy, bus, trace) = rig();
        bus.script(regs::GT_DRP + regs::DRP_STATUS, [1, 1, 0]);
        bus.set(regs::GT_DRP + regs::DRP_RDATA, 0xDEAD_BEEF);
        assert_eq!(phy.drp_read(DrpPort::Transceiver, 2, 0x7C).unwrap(), 0xBEEF);
        assert_eq!(
            trace.writes32("phy"),
            vec![(regs::GT_INTERFACE_SEL, 2), (regs::GT_DRP + regs::DRP_ADDR, 0x4000_007C)]
        );
        assert_eq!(trace.reads32("phy", regs::GT_DRP + regs::DRP_STATUS), 3);
    }

    #[test]
    fn drp_write_order() {
        let (mut phy, _, trace) = rig();
        phy.drp_write(DrpPort::Common, 0, 0x11, 0xA5A5).unwrap();
        assert_eq!(
            trace.writes32("phy"),
            vec![
                (regs::COMMON_INTERFACE_SEL, 0),
                (regs::COMMON_DRP + regs::DRP_WDATA, 0xA5A5),
                (regs::COMMON_DRP + regs::DRP_ADDR, 0x8000_0011),
            ]
        );
    }

    #[test]
    fn drp_busy_times_out() {
        let (mut phy, bus, trace) = rig();
        bus.set(regs::COMMON_DRP + regs::DRP_STATUS, 1);
        assert!(matches!(
            phy.drp_read(DrpPort::Common, 0, 0x11),
            Err(Error::DrpTimeout(DrpPort::Common))
        ));
        assert_eq!(trace.reads32("phy", regs::COMMON_DRP + regs::DRP_STATUS), 100);
        assert_eq!(trace.reads32("phy", regs::COMMON_DRP + regs::DRP_RDATA), 0);
    }

    #[test]
    fn drp_reset_both_ports() {
        let (mut phy, _, trace) = rig();
        phy.drp_reset().unwrap();
        assert_eq!(
            trace.writes32("phy"),
            vec![(regs::COMMON_DRP + regs::DRP_RESET, 1), (regs::GT_DRP + regs::DRP_RESET, 1)]
        );
        assert_eq!(trace.sleeps(), vec![RESET_PULSE]);
    }
}
