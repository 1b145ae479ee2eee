//! FPGA side JESD204 receiver (link layer IP) over its AXI-Lite window.
use crate::bus::{Delay, WordRegisterBus};
use crate::{Error, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod regs {
    pub const RESET: usize = 0x0020;
    pub const SUBCLASS: usize = 0x0034;
    pub const CFG_8B10B: usize = 0x003C;
    pub const LANE_ENA: usize = 0x0040;
    pub const STATUS: usize = 0x0060;

    pub const RESET_BIT: u32 = 1 << 0;
    pub const SCRAMBLING: u32 = 1 << 16;
    pub const K_SHIFT: u32 = 8;
    /// K-1 in [12:8], F-1 in [7:0]
    pub const KF_MASK: u32 = 0x1FFF;
}

pub const RESET_PULSE: Duration = Duration::from_millis(1);

pub fn encode_kf(k: u8, f: u8) -> u32 {
    ((u32::from(k.wrapping_sub(1)) & 0x1F) << regs::K_SHIFT) | u32::from(f.wrapping_sub(1))
}

pub fn decode_kf(v: u32) -> (u8, u8) {
    ((((v >> regs::K_SHIFT) & 0x1F) + 1) as u8, ((v & 0xFF) + 1) as u8)
}

pub struct Link<W, D> {
    bus: W,
    delay: D,
}

impl<W: WordRegisterBus, D: Delay> Link<W, D> {
    pub fn new(bus: W, delay: D) -> Self {
        Self { bus, delay }
    }

    pub fn read(&mut self, offset: usize) -> Result<u32> {
        self.bus.read_word(offset)
    }

    pub fn write(&mut self, offset: usize, value: u32) -> Result<()> {
        self.bus.write_word(offset, value)
    }

    pub fn set_scrambling(&mut self, enable: bool) -> Result<()> {
        let v = self.bus.modify_word(regs::CFG_8B10B, |v| {
            if enable {
                v | regs::SCRAMBLING
            } else {
                v & !regs::SCRAMBLING
            }
        })?;
        debug!("link 8b10b cfg {:#010x}", v);
        Ok(())
    }

    /// Program frames per multiframe and octets per frame, leaving the rest
    /// of the config word alone.
    pub fn set_kf(&mut self, k: u8, f: u8) -> Result<()> {
        let v = self
            .bus
            .modify_word(regs::CFG_8B10B, |v| (v & !regs::KF_MASK) | encode_kf(k, f))?;
        debug!("link 8b10b cfg {:#010x}", v);
        Ok(())
    }

    pub fn set_subclass(&mut self, subclass: u8) -> Result<()> {
        if subclass > 3 {
            warn!("link subclass {} rejected", subclass);
            return Err(Error::Subclass(subclass));
        }
        self.bus.write_word(regs::SUBCLASS, subclass.into())
    }

    /// Pulse the core reset for 1 ms.
    pub fn reset(&mut self) -> Result<()> {
        self.bus.modify_word(regs::RESET, |v| v | regs::RESET_BIT)?;
        self.delay.sleep(RESET_PULSE);
        self.bus.modify_word(regs::RESET, |v| v & !regs::RESET_BIT)?;
        let v = self.bus.read_word(regs::RESET)?;
        info!("link reset done, reset register {:#010x}", v);
        Ok(())
    }

    pub fn status(&mut self) -> Result<u32> {
        self.bus.read_word(regs::STATUS)
    }

    pub fn lane_enable(&mut self) -> Result<u32> {
        self.bus.read_word(regs::LANE_ENA)
    }
}
