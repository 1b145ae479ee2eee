/* Register access layer
 *
 * Byte wide registers sit behind the ADC's 3-wire SPI port, word wide ones
 * are memory mapped through /dev/mem. Neither side retries: a failed
 * transfer goes straight back to the caller.
 * */
use crate::{Error, Result};
use gpiocdev::{line::Value, Request};
use rustix::fs::{Mode, OFlags};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use spidev::{Spidev, SpidevTransfer};
use std::{path::Path, ptr, time::Duration};
use tracing::debug;

#[cfg(test)] use proptest::prelude::*;

pub trait ByteRegisterBus {
    fn read_reg(&mut self, addr: u16) -> Result<u8>;
    fn write_reg(&mut self, addr: u16, value: u8) -> Result<()>;

    fn read_bit(&mut self, addr: u16, bit: u8) -> Result<bool> {
        if bit > 7 {
            return Err(Error::BitPosition(bit));
        }
        Ok((self.read_reg(addr)? >> bit) & 1 == 1)
    }

    /// Read, apply `f` and write the result back. Returns the written value.
    fn modify_reg<F: FnOnce(u8) -> u8>(&mut self, addr: u16, f: F) -> Result<u8> {
        let value = f(self.read_reg(addr)?);
        self.write_reg(addr, value)?;
        Ok(value)
    }
}

pub trait WordRegisterBus {
    fn read_word(&mut self, offset: usize) -> Result<u32>;
    fn write_word(&mut self, offset: usize, value: u32) -> Result<()>;

    fn modify_word<F: FnOnce(u32) -> u32>(&mut self, offset: usize, f: F) -> Result<u32> {
        let value = f(self.read_word(offset)?);
        self.write_word(offset, value)?;
        Ok(value)
    }
}

/// Active high power-down input of the ADC.
pub trait PowerDownPin {
    fn set(&mut self, asserted: bool) -> Result<()>;
}

pub trait Delay {
    fn sleep(&mut self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// bit 15 of the instruction word selects read, the address takes the other 15
pub fn read_frame(addr: u16) -> [u8; 3] {
    [0x80 | ((addr >> 8) as u8 & 0x7F), (addr & 0xFF) as u8, 0x00]
}

pub fn write_frame(addr: u16, data: u8) -> [u8; 3] {
    [(addr >> 8) as u8 & 0x7F, (addr & 0xFF) as u8, data]
}

#[cfg(test)]
proptest! {
    #[test]
    fn frame_address(addr in 0u16..0x8000, data: u8) {
        let r = read_frame(addr);
        let w = write_frame(addr, data);
        assert_eq!(r[0] & 0x80, 0x80);
        assert_eq!(w[0] & 0x80, 0x00);
        assert_eq!(u16::from_be_bytes([r[0] & 0x7F, r[1]]), addr);
        assert_eq!(u16::from_be_bytes([w[0], w[1]]), addr);
        assert_eq!(w[2], data);
        assert_eq!(r[2], 0);
    }
}

pub struct Spi(Spidev);

impl Spi {
    pub fn new(spi: Spidev) -> Self {
        Self(spi)
    }

    pub fn open<P: AsRef<Path>>(path: P, speed_hz: u32) -> Result<Self> {
        Ok(Self(crate::open(path, speed_hz)?))
    }
}

impl ByteRegisterBus for Spi {
    fn read_reg(&mut self, addr: u16) -> Result<u8> {
        let tx = read_frame(addr);
        let mut rx = [0; 3];
        self.0.transfer(&mut SpidevTransfer::read_write(&tx, &mut rx))?;
        Ok(rx[2])
    }

    fn write_reg(&mut self, addr: u16, value: u8) -> Result<()> {
        let tx = write_frame(addr, value);
        self.0.transfer(&mut SpidevTransfer::write(&tx))?;
        Ok(())
    }
}

/// A physical window mapped through /dev/mem.
pub struct Mmio {
    ptr: *mut u8,
    len: usize,
    // distance from the page aligned mapping start to `base`
    skew: usize,
    size: usize,
    base: u64,
}

impl std::fmt::Debug for Mmio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mmio")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

impl Mmio {
    pub fn map<P: AsRef<Path>>(path: P, base: u64, size: usize) -> Result<Self> {
        let fd = rustix::fs::open(path.as_ref(), OFlags::RDWR | OFlags::SYNC, Mode::empty())
            .map_err(std::io::Error::from)?;
        let page = rustix::param::page_size() as u64;
        let skew = (base % page) as usize;
        let len = size + skew;

        // SAFETY: a fresh shared mapping of `len` bytes at a page aligned
        // physical offset; nothing else in this process aliases it.
        let ptr = unsafe {
            mmap(
                ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                base - skew as u64,
            )
        }
        .map_err(std::io::Error::from)?;

        debug!("mapped {:#x}+{:#x} at {:p}", base, size, ptr);
        Ok(Self {
            ptr: ptr.cast(),
            len,
            skew,
            size,
            base,
        })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn word(&self, offset: usize) -> Result<*mut u32> {
        if offset.checked_add(4).map_or(true, |end| end > self.size) {
            return Err(Error::Unmapped { offset });
        }
        // the mapping itself is page aligned, so the physical address decides
        if (self.skew + offset) % 4 != 0 {
            return Err(Error::Unaligned { offset });
        }
        // SAFETY: offset + 4 is inside the mapping and word aligned.
        Ok(unsafe { self.ptr.add(self.skew + offset) }.cast())
    }
}

impl WordRegisterBus for Mmio {
    fn read_word(&mut self, offset: usize) -> Result<u32> {
        let p = self.word(offset)?;
        // SAFETY: `word` checked bounds and alignment.
        Ok(unsafe { ptr::read_volatile(p) })
    }

    fn write_word(&mut self, offset: usize, value: u32) -> Result<()> {
        let p = self.word(offset)?;
        // SAFETY: `word` checked bounds and alignment.
        unsafe { ptr::write_volatile(p, value) };
        Ok(())
    }
}

impl Drop for Mmio {
    fn drop(&mut self) {
        // SAFETY: ptr/len are exactly what mmap returned in `map`.
        _ = unsafe { munmap(self.ptr.cast(), self.len) };
    }
}

/// Word access to arbitrary physical addresses, one short lived mapping
/// per access. Backs the console's raw `mem` command.
#[derive(Debug)]
pub struct DevMem {
    path: std::path::PathBuf,
}

impl DevMem {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn map(&self, addr: usize) -> Result<Mmio> {
        if addr % 4 != 0 {
            return Err(Error::Unaligned { offset: addr });
        }
        Mmio::map(&self.path, addr as u64, 4)
    }
}

impl WordRegisterBus for DevMem {
    fn read_word(&mut self, offset: usize) -> Result<u32> {
        self.map(offset)?.read_word(0)
    }

    fn write_word(&mut self, offset: usize, value: u32) -> Result<()> {
        self.map(offset)?.write_word(0, value)
    }
}

pub struct GpioPin {
    request: Request,
    line: u32,
}

impl GpioPin {
    pub fn request<P: AsRef<Path>>(chip: P, line: u32) -> Result<Self> {
        let request = Request::builder()
            .on_chip(chip.as_ref())
            .with_consumer("ad9695-pdwn")
            .with_line(line)
            .as_output(Value::Inactive)
            .request()?;
        Ok(Self { request, line })
    }
}

impl PowerDownPin for GpioPin {
    fn set(&mut self, asserted: bool) -> Result<()> {
        let value = if asserted { Value::Active } else { Value::Inactive };
        self.request.set_value(self.line, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    // a plain file stands in for /dev/mem
    fn backing(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("ad9695-{}-{}", name, std::process::id()));
        let mut bytes = vec![0u8; 8192];
        bytes[8..12].copy_from_slice(&0xDEAD_BEEFu32.to_ne_bytes());
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn devmem_word_access() {
        let path = backing("devmem");
        let mut mem = DevMem::new(&path);
        assert_eq!(mem.read_word(8).unwrap(), 0xDEAD_BEEF);
        mem.write_word(0x1004, 0x1234_5678).unwrap();
        assert_eq!(mem.read_word(0x1004).unwrap(), 0x1234_5678);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn devmem_rejects_unaligned() {
        let path = backing("unaligned");
        let mut mem = DevMem::new(&path);
        for addr in [1, 2, 3, 0x1001] {
            assert!(matches!(mem.read_word(addr), Err(Error::Unaligned { .. })));
            assert!(matches!(mem.write_word(addr, 0), Err(Error::Unaligned { .. })));
        }
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn window_checks_physical_alignment() {
        let path = backing("window");
        let mut skewed = Mmio::map(&path, 2, 16).unwrap();
        assert!(matches!(skewed.read_word(0), Err(Error::Unaligned { offset: 0 })));
        assert!(matches!(skewed.read_word(4), Err(Error::Unaligned { offset: 4 })));
        assert_eq!(skewed.read_word(6).unwrap(), 0xDEAD_BEEF);
        let mut window = Mmio::map(&path, 4, 8).unwrap();
        assert_eq!(window.read_word(4).unwrap(), 0xDEAD_BEEF);
        assert!(matches!(window.read_word(8), Err(Error::Unmapped { offset: 8 })));
        std::fs::remove_file(path).unwrap();
    }
}
