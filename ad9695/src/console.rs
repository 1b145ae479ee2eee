/* Operator console
 *
 * One command per line: a verb, an option and up to two numbers. Numbers
 * take 0x (hex), 0b (binary) or plain decimal. Parsing never touches the
 * hardware; `Frontend::execute` does, and returns a reply whose Display is
 * the line printed back to the operator.
 * */
use crate::adc::Lock;
use crate::bringup::Frontend;
use crate::bus::{ByteRegisterBus, Delay, PowerDownPin, WordRegisterBus};
use crate::dma::Capture;
use crate::phy::PllCheck;
use crate::{Error, Result};
use std::{fmt, str::FromStr};
use tracing::debug;

#[cfg(test)] use proptest::prelude::*;

/// Bytes between the samples shown by `dma -r`.
pub const DUMP_STRIDE: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access<A, V> {
    Read(A),
    Write(A, V),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaOp {
    /// `-w`: move one block into the capture buffer
    Capture,
    /// `-r`
    Dump,
    /// `-d`
    Reset,
    /// `-c`
    Resume,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Spi(Access<u16, u8>),
    Phy(Access<u32, u32>),
    Link(Access<u32, u32>),
    /// raw physical address
    Mem(Access<u32, u32>),
    /// capture buffer offset
    Dbg(Access<u32, u32>),
    Dma(DmaOp),
    Udp,
    AdcCheck,
}

fn command_error(msg: impl Into<String>) -> Error {
    Error::Command(msg.into())
}

pub fn parse_number(s: &str) -> Result<u64> {
    let (digits, radix) = if let Some(h) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (h, 16)
    } else if let Some(b) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        (b, 2)
    } else {
        (s, 10)
    };
    u64::from_str_radix(digits, radix).map_err(|_| command_error(format!("Invalid number '{}'", s)))
}

fn bounded(s: &str, what: &'static str, max: u64) -> Result<u64> {
    let value = parse_number(s)?;
    if value > max {
        return Err(Error::OutOfRange { what, value, max });
    }
    Ok(value)
}

fn parse_access<'a, I>(tokens: &mut I, addr_max: u64, data_max: u64) -> Result<Access<u64, u64>>
where
    I: Iterator<Item = &'a str>,
{
    let option = tokens
        .next()
        .ok_or_else(|| command_error("Missing option (-r / -w)"))?;
    if option != "-r" && option != "-w" {
        return Err(command_error(format!("Invalid option '{}' (use -r or -w)", option)));
    }
    let addr = tokens.next().ok_or_else(|| command_error("Missing address"))?;
    let addr = bounded(addr, "address", addr_max)?;
    if option == "-r" {
        return Ok(Access::Read(addr));
    }
    let data = tokens.next().ok_or_else(|| command_error("Missing write data"))?;
    Ok(Access::Write(addr, bounded(data, "data", data_max)?))
}

fn word_access<'a, I: Iterator<Item = &'a str>>(tokens: &mut I) -> Result<Access<u32, u32>> {
    let max = u32::MAX.into();
    Ok(match parse_access(tokens, max, max)? {
        Access::Read(a) => Access::Read(a as u32),
        Access::Write(a, d) => Access::Write(a as u32, d as u32),
    })
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().ok_or_else(|| command_error("empty command"))?;
        match verb {
            "spi" => Ok(Command::Spi(match parse_access(&mut tokens, 0x7FFF, 0xFF)? {
                Access::Read(a) => Access::Read(a as u16),
                Access::Write(a, d) => Access::Write(a as u16, d as u8),
            })),
            "phy" => Ok(Command::Phy(word_access(&mut tokens)?)),
            "link" => Ok(Command::Link(word_access(&mut tokens)?)),
            "mem" => Ok(Command::Mem(word_access(&mut tokens)?)),
            "dbg" => Ok(Command::Dbg(word_access(&mut tokens)?)),
            "dma" => match tokens.next() {
                Some("-w") => Ok(Command::Dma(DmaOp::Capture)),
                Some("-r") => Ok(Command::Dma(DmaOp::Dump)),
                Some("-d") => Ok(Command::Dma(DmaOp::Reset)),
                Some("-c") => Ok(Command::Dma(DmaOp::Resume)),
                Some(o) => Err(command_error(format!(
                    "Invalid option \"{}\" (use -r or -w or -d or -c)",
                    o
                ))),
                None => Err(command_error("Missing option (-r or -w)")),
            },
            "udp" => Ok(Command::Udp),
            "adc" => match tokens.next() {
                Some("-c") => Ok(Command::AdcCheck),
                Some(o) => Err(command_error(format!("Invalid option \"{}\" (use -c)", o))),
                None => Err(command_error("Missing option")),
            },
            other => Err(command_error(format!("Invalid command type: {}", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    SpiRead { addr: u16, value: u8 },
    SpiWrote { addr: u16, value: u8 },
    /// phy and link, addresses shown absolute
    WordRead { addr: u64, value: u32 },
    WordWrote { addr: u64, value: u32 },
    MemRead { addr: u32, value: u32 },
    MemWrote { addr: u32, value: u32 },
    BufferRead { offset: u32, value: u32 },
    BufferWrote { offset: u32, value: u32 },
    Capture(Capture),
    Dump(Vec<u8>),
    DmaReset,
    DmaResume,
    StreamArmed,
    AdcCheck { lock: Lock, phy: PllCheck },
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::SpiRead { addr, value } => write!(f, "Value at 0x{:04X} = 0x{:02X}", addr, value),
            Reply::SpiWrote { addr, value } => {
                write!(f, "Command Success: Wrote 0x{:02X} to 0x{:04X}", value, addr)
            }
            Reply::WordRead { addr, value } => write!(f, "Value at 0x{:08X} = 0x{:08X}", addr, value),
            Reply::WordWrote { addr, value } => write!(f, "Wrote 0x{:08X} to 0x{:08X}", value, addr),
            Reply::MemRead { addr, value } => {
                write!(f, "Command Success: Value at 0x{:08X} = 0x{:08X}", addr, value)
            }
            Reply::MemWrote { addr, value } => {
                write!(f, "Command Success: Wrote 0x{:08X} to 0x{:08X}", value, addr)
            }
            Reply::BufferRead { offset, value } => {
                write!(f, "Command Success: DMA[0x{:08X}] = 0x{:08X}", offset, value)
            }
            Reply::BufferWrote { offset, value } => {
                write!(f, "Command Success: Wrote 0x{:08X} to DMA[0x{:08X}]", value, offset)
            }
            Reply::Capture(Capture::Done { .. }) => write!(f, "DMA Finished Successfully."),
            Reply::Capture(Capture::TimedOut) => write!(f, "DMA was still busy and timed out."),
            Reply::Dump(bytes) => {
                write!(f, "Reading back {} bytes:", bytes.len())?;
                for (i, b) in bytes.iter().enumerate().step_by(DUMP_STRIDE) {
                    write!(f, "\n@0x{:02X} = 0x{:02X}", i, b)?;
                }
                Ok(())
            }
            Reply::DmaReset => write!(f, "reset completed!"),
            Reply::DmaResume => write!(f, "resume completed!"),
            Reply::StreamArmed => write!(
                f,
                "UDP will start to send received DMA samples to the computer station"
            ),
            Reply::AdcCheck { lock, phy } => {
                let adc = if lock.locked() { "LOCKED" } else { "UNLOCKED" };
                let phy_state = if phy.locked() { "locked" } else { "not locked" };
                write!(
                    f,
                    "ad9695 PLL {}\nphy PLL {} after {} polls, status 0x{:02X}",
                    adc,
                    phy_state,
                    phy.polls,
                    phy.status.bits()
                )
            }
        }
    }
}

impl<B, P, W, M, D> Frontend<B, P, W, M, D>
where
    B: ByteRegisterBus,
    P: PowerDownPin,
    W: WordRegisterBus,
    M: WordRegisterBus,
    D: Delay + Clone,
{
    pub fn execute(&mut self, cmd: Command) -> Result<Reply> {
        debug!("console {:?}", cmd);
        Ok(match cmd {
            Command::Spi(Access::Read(addr)) => Reply::SpiRead {
                addr,
                value: self.adc.read_reg(addr)?,
            },
            Command::Spi(Access::Write(addr, value)) => {
                self.adc.write_reg(addr, value)?;
                Reply::SpiWrote { addr, value }
            }
            Command::Phy(Access::Read(offset)) => Reply::WordRead {
                addr: self.bases.phy + u64::from(offset),
                value: self.phy.read(offset as usize)?,
            },
            Command::Phy(Access::Write(offset, value)) => {
                self.phy.write(offset as usize, value)?;
                Reply::WordWrote {
                    addr: self.bases.phy + u64::from(offset),
                    value,
                }
            }
            Command::Link(Access::Read(offset)) => Reply::WordRead {
                addr: self.bases.link + u64::from(offset),
                value: self.link.read(offset as usize)?,
            },
            Command::Link(Access::Write(offset, value)) => {
                self.link.write(offset as usize, value)?;
                Reply::WordWrote {
                    addr: self.bases.link + u64::from(offset),
                    value,
                }
            }
            Command::Mem(Access::Read(addr)) => Reply::MemRead {
                addr,
                value: self.mem.read_word(addr as usize)?,
            },
            Command::Mem(Access::Write(addr, value)) => {
                self.mem.write_word(addr as usize, value)?;
                Reply::MemWrote { addr, value }
            }
            Command::Dbg(Access::Read(offset)) => Reply::BufferRead {
                offset,
                value: self.buffer.read_word(offset as usize)?,
            },
            Command::Dbg(Access::Write(offset, value)) => {
                self.buffer.write_word(offset as usize, value)?;
                Reply::BufferWrote { offset, value }
            }
            Command::Dma(DmaOp::Capture) => {
                let (base, len) = (self.buffer.base(), self.buffer.len() as u32);
                Reply::Capture(self.dma.capture(base, len)?)
            }
            Command::Dma(DmaOp::Dump) => Reply::Dump(self.buffer.bytes()?),
            Command::Dma(DmaOp::Reset) => {
                self.dma.reset()?;
                Reply::DmaReset
            }
            Command::Dma(DmaOp::Resume) => {
                self.dma.resume()?;
                Reply::DmaResume
            }
            Command::Udp => Reply::StreamArmed,
            Command::AdcCheck => Reply::AdcCheck {
                lock: self.adc.wait_for_lock()?,
                phy: self.phy.check_pll_status()?,
            },
        })
    }
}

#[cfg(test)]
proptest! {
    #[test]
    fn spi_address_any_radix(addr in 0u16..0x8000) {
        for s in [format!("spi -r {:#x}", addr), format!("spi -r {:#b}", addr), format!("spi -r {}", addr)] {
            assert_eq!(s.parse::<Command>().unwrap(), Command::Spi(Access::Read(addr)));
        }
    }
}

/// Splits raw console input into lines, carrying a partial line over to
/// the next read.
#[derive(Debug, Default)]
pub struct LineBuffer(Vec<u8>);

impl LineBuffer {
    /// Append input and return every line it completed, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.0.extend_from_slice(bytes);
        let Some(end) = self.0.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let rest = self.0.split_off(end + 1);
        let done = std::mem::replace(&mut self.0, rest);
        String::from_utf8_lossy(&done).lines().map(str::to_owned).collect()
    }

    /// The unterminated tail, once input has closed.
    pub fn finish(&mut self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.0).into_owned();
        self.0.clear();
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bringup::tests::rig;
    use crate::dma;
    use crate::registers::*;

    fn parse(s: &str) -> Result<Command> {
        s.parse()
    }

    #[test]
    fn grammar() {
        assert_eq!(parse("spi -w 0x000A 0xA5").unwrap(), Command::Spi(Access::Write(0x0A, 0xA5)));
        assert_eq!(parse("phy -r 0x80").unwrap(), Command::Phy(Access::Read(0x80)));
        assert_eq!(parse("link -w 0x3c 65536").unwrap(), Command::Link(Access::Write(0x3C, 0x1_0000)));
        assert_eq!(
            parse("mem -w 0xA0000000 0b101").unwrap(),
            Command::Mem(Access::Write(0xA000_0000, 5))
        );
        assert_eq!(parse("  dbg   -r 16 ").unwrap(), Command::Dbg(Access::Read(16)));
        assert_eq!(parse("dma -w").unwrap(), Command::Dma(DmaOp::Capture));
        assert_eq!(parse("dma -r").unwrap(), Command::Dma(DmaOp::Dump));
        assert_eq!(parse("dma -d").unwrap(), Command::Dma(DmaOp::Reset));
        assert_eq!(parse("dma -c").unwrap(), Command::Dma(DmaOp::Resume));
        assert_eq!(parse("udp").unwrap(), Command::Udp);
        assert_eq!(parse("adc -c").unwrap(), Command::AdcCheck);
    }

    #[test]
    fn rejected_lines() {
        for line in [
            "",
            "foo -r 1",
            "spi",
            "spi -x 1",
            "spi -r",
            "spi -w 0x10",
            "phy -r zz",
            "dma",
            "dma -q",
            "adc",
            "adc -r",
        ] {
            assert!(matches!(parse(line), Err(Error::Command(_))), "{:?}", line);
        }
        assert!(matches!(
            parse("spi -r 0x8000"),
            Err(Error::OutOfRange { what: "address", value: 0x8000, max: 0x7FFF })
        ));
        assert!(matches!(
            parse("spi -w 0x10 0x100"),
            Err(Error::OutOfRange { what: "data", .. })
        ));
        assert!(matches!(parse("mem -r 0x100000000"), Err(Error::OutOfRange { .. })));
        assert_eq!(
            parse("spi -q 1").unwrap_err().to_string(),
            "Command Error: Invalid option '-q' (use -r or -w)"
        );
    }

    #[test]
    fn spi_replies() {
        let (mut fe, r) = rig();
        r.adc.set(CHIP_ID, 0xDF);
        let reply = fe.execute(parse("spi -r 0x4").unwrap()).unwrap();
        assert_eq!(reply.to_string(), "Value at 0x0004 = 0xDF");
        let reply = fe.execute(parse("spi -w 0x0A 0xA5").unwrap()).unwrap();
        assert_eq!(reply.to_string(), "Command Success: Wrote 0xA5 to 0x000A");
        assert_eq!(r.adc.get(SCRATCH), 0xA5);
    }

    #[test]
    fn word_replies_use_absolute_addresses() {
        let (mut fe, r) = rig();
        r.phy.set(0x80, 0x1);
        let reply = fe.execute(parse("phy -r 0x80").unwrap()).unwrap();
        assert_eq!(reply.to_string(), "Value at 0xA0020080 = 0x00000001");
        let reply = fe.execute(parse("link -w 0x34 1").unwrap()).unwrap();
        assert_eq!(reply.to_string(), "Wrote 0x00000001 to 0xA0010034");
        assert_eq!(r.link.get(0x34), 1);

        let reply = fe.execute(parse("mem -w 0x01300000 7").unwrap()).unwrap();
        assert_eq!(reply.to_string(), "Command Success: Wrote 0x00000007 to 0x01300000");
        assert_eq!(r.mem.get(0x0130_0000), 7);
        r.buffer.set(8, 0xCAFE);
        let reply = fe.execute(parse("dbg -r 8").unwrap()).unwrap();
        assert_eq!(reply.to_string(), "Command Success: DMA[0x00000008] = 0x0000CAFE");
    }

    #[test]
    fn dma_commands() {
        let (mut fe, r) = rig();
        r.dma.set(dma::regs::S2MM_DMASR, 0x2);
        let reply = fe.execute(Command::Dma(DmaOp::Capture)).unwrap();
        assert_eq!(reply, Reply::Capture(Capture::Done { polls: 1 }));
        assert_eq!(reply.to_string(), "DMA Finished Successfully.");
        assert_eq!(r.dma.get(dma::regs::S2MM_DA), 0x0130_0000);
        assert_eq!(r.dma.get(dma::regs::S2MM_LENGTH), 512);

        r.dma.set(dma::regs::S2MM_DMASR, 0x1);
        r.dma.script(dma::regs::S2MM_DMASR, [0x1, 0x0]);
        let reply = fe.execute(Command::Dma(DmaOp::Capture)).unwrap();
        // halted again on every poll after the second read means idle is never seen
        assert_eq!(reply.to_string(), "DMA was still busy and timed out.");

        r.buffer.set(0, 0x0000_00AB);
        r.buffer.set(16, 0x0000_00CD);
        let dump = fe.execute(Command::Dma(DmaOp::Dump)).unwrap().to_string();
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines[0], "Reading back 512 bytes:");
        assert_eq!(lines.len(), 1 + 512 / DUMP_STRIDE);
        assert_eq!(lines[1], "@0x00 = 0xAB");
        assert_eq!(lines[2], "@0x10 = 0xCD");

        r.dma.self_clearing(dma::regs::S2MM_DMACR, dma::Control::RESET.bits());
        assert_eq!(fe.execute(Command::Dma(DmaOp::Reset)).unwrap(), Reply::DmaReset);
        assert_eq!(fe.execute(Command::Dma(DmaOp::Resume)).unwrap(), Reply::DmaResume);
        assert_eq!(r.dma.get(dma::regs::S2MM_DMACR), dma::Control::RUN_STOP.bits());
    }

    #[test]
    fn mem_on_physical_memory() {
        use crate::bringup::Bases;
        use crate::bus::DevMem;
        use crate::dma::CaptureBuffer;
        use crate::mock::{MockDelay, MockPin};

        let (_, r) = rig();
        let path = std::env::temp_dir().join(format!("ad9695-console-mem-{}", std::process::id()));
        std::fs::write(&path, vec![0u8; 8192]).unwrap();
        let mut fe = Frontend::new(
            r.adc.clone(),
            MockPin::new(&r.trace),
            r.phy.clone(),
            r.link.clone(),
            r.dma.clone(),
            CaptureBuffer::new(r.buffer.clone(), 0x0130_0000, 512),
            DevMem::new(&path),
            Bases { phy: 0xA002_0000, link: 0xA001_0000 },
            MockDelay::new(&r.trace),
        );

        assert_eq!(
            fe.execute(parse("mem -w 0x1004 0xCAFE").unwrap()).unwrap(),
            Reply::MemWrote { addr: 0x1004, value: 0xCAFE }
        );
        assert_eq!(
            fe.execute(parse("mem -r 0x1004").unwrap()).unwrap(),
            Reply::MemRead { addr: 0x1004, value: 0xCAFE }
        );
        let unaligned = fe.execute(parse("mem -r 0x1001").unwrap());
        assert!(matches!(unaligned, Err(Error::Unaligned { offset: 0x1001 })));
        let unaligned = fe.execute(parse("mem -w 0x1006 1").unwrap());
        assert!(matches!(unaligned, Err(Error::Unaligned { offset: 0x1006 })));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn burst_of_lines() {
        let mut lines = LineBuffer::default();
        assert_eq!(lines.push(b"spi -r 4\nspi -r 5\nphy -r"), ["spi -r 4", "spi -r 5"]);
        assert!(lines.push(b" 0x80").is_empty());
        assert_eq!(lines.push(b"\r\n\nmem -r 0x1000\n"), ["phy -r 0x80", "", "mem -r 0x1000"]);
        assert_eq!(lines.finish(), None);
        assert!(lines.push(b"udp").is_empty());
        assert_eq!(lines.finish().as_deref(), Some("udp"));
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn adc_check_reports_both_plls() {
        let (mut fe, r) = rig();
        r.adc.script(JESD_SERDES_PLL_STATUS, [0x00, 0x80]);
        let reply = fe.execute(Command::AdcCheck).unwrap();
        assert_eq!(
            reply.to_string(),
            "ad9695 PLL LOCKED\nphy PLL locked after 1 polls, status 0x00"
        );
        r.phy.set(crate::phy::regs::PLL_STATUS, 0b0_1010);
        let reply = fe.execute(Command::AdcCheck).unwrap();
        assert!(reply.to_string().starts_with("ad9695 PLL UNLOCKED\nphy PLL not locked"));
    }

    #[test]
    fn udp_only_arms() {
        let (mut fe, r) = rig();
        r.trace.clear();
        assert_eq!(fe.execute(Command::Udp).unwrap(), Reply::StreamArmed);
        assert!(r.trace.events().is_empty());
    }
}
