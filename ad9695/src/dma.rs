//! AXI DMA, S2MM channel in simple (direct register) mode. Moves one block
//! of samples from the JESD receiver into the capture buffer.
use crate::bus::{Delay, WordRegisterBus};
use crate::{Error, Result};
use bitflags::bitflags;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod regs {
    pub const S2MM_DMACR: usize = 0x30;
    pub const S2MM_DMASR: usize = 0x34;
    pub const S2MM_DA: usize = 0x48;
    pub const S2MM_DA_MSB: usize = 0x4C;
    pub const S2MM_LENGTH: usize = 0x58;
}

pub const CAPTURE_LEN: usize = 512;
pub const BUSY_POLLS: u32 = 1000;
pub const BUSY_POLL_INTERVAL: Duration = Duration::from_micros(1);
pub const RESET_POLLS: u32 = 500;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Control: u32 {
        const RUN_STOP = 1 << 0;
        const RESET    = 1 << 2;
        const _ = !0;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Status: u32 {
        const HALTED   = 1 << 0;
        const IDLE     = 1 << 1;
        const INT_ERR  = 1 << 4;
        const SLV_ERR  = 1 << 5;
        const DEC_ERR  = 1 << 6;
        const _ = !0;
    }
}

#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Capture {
    Done { polls: u32 },
    TimedOut,
}

pub struct Dma<W, D> {
    bus: W,
    delay: D,
}

impl<W: WordRegisterBus, D: Delay> Dma<W, D> {
    pub fn new(bus: W, delay: D) -> Self {
        Self { bus, delay }
    }

    pub fn status(&mut self) -> Result<Status> {
        Ok(Status::from_bits_retain(self.bus.read_word(regs::S2MM_DMASR)?))
    }

    /// A started channel that has not gone idle yet.
    pub fn busy(&mut self) -> Result<bool> {
        Ok(!self.status()?.contains(Status::IDLE))
    }

    /// Arm a transfer of `len` bytes into physical address `addr`.
    pub fn start(&mut self, addr: u64, len: u32) -> Result<()> {
        let sr = self.status()?;
        if !sr.intersects(Status::HALTED | Status::IDLE) {
            return Err(Error::DmaStart(sr.bits()));
        }
        self.bus.modify_word(regs::S2MM_DMACR, |v| v | Control::RUN_STOP.bits())?;
        let sr = self.status()?;
        if sr.intersects(Status::HALTED | Status::INT_ERR | Status::SLV_ERR | Status::DEC_ERR) {
            return Err(Error::DmaStart(sr.bits()));
        }
        self.bus.write_word(regs::S2MM_DA, addr as u32)?;
        self.bus.write_word(regs::S2MM_DA_MSB, (addr >> 32) as u32)?;
        // length last, it kicks off the transfer
        self.bus.write_word(regs::S2MM_LENGTH, len)?;
        debug!("dma s2mm {:#x} + {}", addr, len);
        Ok(())
    }

    /// Start a transfer and poll for completion, 1000 polls 1 µs apart.
    pub fn capture(&mut self, addr: u64, len: u32) -> Result<Capture> {
        self.start(addr, len)?;
        for polls in 1..=BUSY_POLLS {
            if !self.busy()? {
                info!("dma capture of {} bytes done", len);
                return Ok(Capture::Done { polls });
            }
            self.delay.sleep(BUSY_POLL_INTERVAL);
        }
        warn!("dma still busy after {} polls", BUSY_POLLS);
        Ok(Capture::TimedOut)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.bus.write_word(regs::S2MM_DMACR, Control::RESET.bits())?;
        for _ in 0..RESET_POLLS {
            let cr = Control::from_bits_retain(self.bus.read_word(regs::S2MM_DMACR)?);
            if !cr.contains(Control::RESET) {
                return Ok(());
            }
        }
        Err(Error::ResetTimeout)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.bus
            .modify_word(regs::S2MM_DMACR, |v| v | Control::RUN_STOP.bits())?;
        Ok(())
    }
}

/// The DDR window the DMA writes into.
pub struct CaptureBuffer<W> {
    bus: W,
    base: u64,
    len: usize,
}

impl<W: WordRegisterBus> CaptureBuffer<W> {
    pub fn new(bus: W, base: u64, len: usize) -> Self {
        Self { bus, base, len }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn read_word(&mut self, offset: usize) -> Result<u32> {
        self.bus.read_word(offset)
    }

    pub fn write_word(&mut self, offset: usize, value: u32) -> Result<()> {
        self.bus.write_word(offset, value)
    }

    /// The captured block as it sits in memory, little endian words.
    pub fn bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len);
        for offset in (0..self.len).step_by(4) {
            out.extend_from_slice(&self.bus.read_word(offset)?.to_le_bytes());
        }
        out.truncate(self.len);
        Ok(out)
    }
}
