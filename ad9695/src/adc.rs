use crate::bus::{ByteRegisterBus, Delay, PowerDownPin};
use crate::jesd::{JesdLinkParameters, JesdReadback, SerdesPllRange};
use crate::registers::*;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const RESET_HOLD: Duration = Duration::from_millis(500);
pub const PLL_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const PLL_POLL_ATTEMPTS: u32 = 10;
pub const INIT_SEQUENCE_PAUSE: Duration = Duration::from_micros(10);

/// Vendor JESD start-up writes issued after the link leaves power down.
/// Order and values are fixed by the part.
pub const INIT_SEQUENCE: [(u16, u8); 7] = [
    (0x1228, 0x4F),
    (0x1228, 0x0F),
    (0x1222, 0x00),
    (0x1222, 0x04),
    (0x1222, 0x00),
    (0x1262, 0x08),
    (0x1262, 0x00),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Stage {
    Idle,
    ScratchpadVerified,
    Reset,
    ChannelsSelected,
    PowerModeSet,
    JesdConfigured,
    LinkEnabled,
    Locked,
    TimedOut,
}

/// Outcome of a read-back comparison. A mismatch is worth a look but does
/// not stop anything.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Check {
    Pass,
    Mismatch { addr: u16, expected: u8, found: u8 },
}

impl Check {
    pub fn pass(self) -> bool {
        self == Check::Pass
    }
}

#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Lock {
    Locked { attempts: u32 },
    TimedOut { attempts: u32 },
}

impl Lock {
    pub fn locked(self) -> bool {
        matches!(self, Lock::Locked { .. })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockDelay {
    pub mode: ClockDelayMode,
    pub fine: u8,
    pub super_fine: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub test_mode: TestMode,
    /// input clock phase adjust in half sample clock cycles
    pub clock_phase: u8,
    pub delay: ClockDelay,
}

/// Desired operating point of the converter, consumed by
/// [`Ad9695::initialize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdcDeviceState {
    pub sample_clock_khz: u64,
    pub powerdown_pin: bool,
    pub powerdown_mode: PdnPinMode,
    pub chip_mode: ChipMode,
    pub channel_a: ChannelSettings,
    pub channel_b: ChannelSettings,
    pub subclass: u8,
    pub force_cgs: bool,
}

impl Default for AdcDeviceState {
    fn default() -> Self {
        Self {
            sample_clock_khz: 500_000,
            powerdown_pin: false,
            powerdown_mode: PdnPinMode::PowerDown,
            chip_mode: ChipMode::FullBandwidth,
            channel_a: ChannelSettings::default(),
            channel_b: ChannelSettings::default(),
            subclass: 0,
            force_cgs: false,
        }
    }
}

#[derive(Debug)]
pub struct InitReport {
    pub scratchpad: Check,
    pub soft_reset: Check,
    /// lane rate and PLL range, or why the JESD block was left untouched
    pub jesd: Result<(u64, SerdesPllRange)>,
    pub lock: Lock,
}

pub struct Ad9695<B, P, D> {
    bus: B,
    pin: P,
    delay: D,
    stage: Stage,
}

impl<B: ByteRegisterBus, P: PowerDownPin, D: Delay> Ad9695<B, P, D> {
    pub fn new(bus: B, pin: P, delay: D) -> Self {
        Self {
            bus,
            pin,
            delay,
            stage: Stage::Idle,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn advance(&mut self, stage: Stage) {
        info!("ad9695 {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    pub fn read_reg(&mut self, addr: u16) -> Result<u8> {
        self.bus.read_reg(addr)
    }

    pub fn write_reg(&mut self, addr: u16, value: u8) -> Result<()> {
        self.bus.write_reg(addr, value)
    }

    pub fn read_bit(&mut self, addr: u16, bit: u8) -> Result<bool> {
        self.bus.read_bit(addr, bit)
    }

    /// Full bring-up of the converter side of the link.
    ///
    /// Read-back mismatches, a rejected JESD configuration and a PLL that
    /// never locks are logged and recorded in the report; only a failed bus
    /// transfer ends the sequence early.
    pub fn initialize(
        &mut self,
        state: AdcDeviceState,
        jesd: &JesdLinkParameters,
    ) -> Result<InitReport> {
        let scratchpad = self.verify_scratchpad()?;
        let soft_reset = self.reset()?;

        self.set_channel_select(Channel::Both)?;
        self.advance(Stage::ChannelsSelected);

        self.set_pdn_pin_mode(state.powerdown_pin, state.powerdown_mode)?;
        self.set_chip_mode(state.chip_mode)?;
        self.set_test_mode(Channel::A, state.channel_a.test_mode)?;
        self.set_test_mode(Channel::B, state.channel_b.test_mode)?;
        self.advance(Stage::PowerModeSet);

        let jesd_result = match self.configure_jesd(jesd, state.sample_clock_khz) {
            Err(e) if e.is_transport() => return Err(e),
            r => r,
        };
        match self.set_subclass(state.subclass) {
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => warn!("ad9695 subclass: {}", e),
            Ok(()) => (),
        }
        self.set_scrambler(jesd.scrambling)?;
        if jesd_result.is_ok() {
            self.advance(Stage::JesdConfigured);
        }

        if state.force_cgs {
            self.force_cgs()?;
            info!("ad9695 forcing CGS (constant K28.5)");
        }

        for (ch, settings) in [(Channel::A, state.channel_a), (Channel::B, state.channel_b)] {
            self.set_clock_phase(ch, settings.clock_phase)?;
            self.apply_clock_delay(ch, settings.delay)?;
        }

        self.enable_link(true)?;
        let lock = self.wait_for_lock()?;

        Ok(InitReport {
            scratchpad,
            soft_reset,
            jesd: jesd_result,
            lock,
        })
    }

    pub fn verify_scratchpad(&mut self) -> Result<Check> {
        self.bus.write_reg(SCRATCH, SCRATCH_PATTERN)?;
        let found = self.bus.read_reg(SCRATCH)?;
        let check = if found == SCRATCH_PATTERN {
            info!("ad9695 scratchpad ok");
            Check::Pass
        } else {
            warn!(
                "ad9695 scratchpad mismatch: wrote {:#04x}, read {:#04x}",
                SCRATCH_PATTERN, found
            );
            Check::Mismatch {
                addr: SCRATCH,
                expected: SCRATCH_PATTERN,
                found,
            }
        };
        self.advance(Stage::ScratchpadVerified);
        Ok(check)
    }

    /// Compare chip type and id against the AD9695's.
    pub fn identify(&mut self) -> Result<Check> {
        for (addr, expected) in [(CHIP_TYPE, EXPECTED_CHIP_TYPE), (CHIP_ID, EXPECTED_CHIP_ID)] {
            let found = self.bus.read_reg(addr)?;
            if found != expected {
                warn!("ad9695 id {:#06x}: {:#04x} != {:#04x}", addr, found, expected);
                return Ok(Check::Mismatch {
                    addr,
                    expected,
                    found,
                });
            }
        }
        Ok(Check::Pass)
    }

    pub fn hardware_reset(&mut self) -> Result<()> {
        self.pin.set(true)?;
        self.delay.sleep(RESET_HOLD);
        self.pin.set(false)?;
        Ok(())
    }

    /// Issue a soft reset and check both self-clearing bits dropped.
    pub fn software_reset(&mut self) -> Result<Check> {
        self.bus.write_reg(IF_CFG_A, SOFT_RESET_A)?;
        self.bus.write_reg(IF_CFG_B, SOFT_RESET_B)?;
        self.delay.sleep(RESET_HOLD);

        if self.bus.read_bit(IF_CFG_A, SOFT_RESET_A_BIT)? {
            warn!("ad9695 soft reset bit A still set");
            return Ok(Check::Mismatch {
                addr: IF_CFG_A,
                expected: 0,
                found: 1 << SOFT_RESET_A_BIT,
            });
        }
        if self.bus.read_bit(IF_CFG_B, SOFT_RESET_B_BIT)? {
            warn!("ad9695 soft reset bit B still set");
            return Ok(Check::Mismatch {
                addr: IF_CFG_B,
                expected: 0,
                found: 1 << SOFT_RESET_B_BIT,
            });
        }
        info!("ad9695 soft reset done");
        Ok(Check::Pass)
    }

    pub fn reset(&mut self) -> Result<Check> {
        self.hardware_reset()?;
        let check = self.software_reset()?;
        self.advance(Stage::Reset);
        Ok(check)
    }

    pub fn set_channel_select(&mut self, ch: Channel) -> Result<()> {
        self.bus.write_reg(CH_INDEX, ch.into())?;
        let v = self.bus.read_reg(CH_INDEX)?;
        debug!("ad9695 channel index {:#04x}", v);
        Ok(())
    }

    pub fn channel_select(&mut self) -> Result<Option<Channel>> {
        let v = self.bus.read_reg(CH_INDEX)?;
        Ok(v.checked_sub(1).and_then(Channel::from_index))
    }

    /// Run `f` with `ch` selected, then return to broadcast.
    fn with_channel<T, F>(&mut self, ch: Channel, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.set_channel_select(ch)?;
        let r = f(self);
        self.set_channel_select(Channel::Both)?;
        r
    }

    pub fn set_pdn_pin_mode(&mut self, enabled: bool, mode: PdnPinMode) -> Result<()> {
        let ctrl0 = if enabled { 0 } else { PDN_PIN_DISABLE };
        self.bus.write_reg(CHIP_PIN_CTRL0, ctrl0)?;
        self.bus
            .modify_reg(CHIP_PIN_CTRL1, |v| pdn_pin_ctrl1(v, mode))?;
        Ok(())
    }

    pub fn set_chip_mode(&mut self, mode: ChipMode) -> Result<()> {
        self.bus.write_reg(ADC_MODE, mode.into())
    }

    pub fn set_channel_power_mode(&mut self, mode: ChannelPowerMode) -> Result<()> {
        self.bus.write_reg(DEV_CFG, u8::from(mode) & 0x3)
    }

    pub fn set_input_clock_divider(&mut self, div: u8) -> Result<()> {
        if !(1..=4).contains(&div) {
            return Err(Error::OutOfRange {
                what: "input clock divider",
                value: div.into(),
                max: 4,
            });
        }
        self.bus.write_reg(IP_CLK_CFG, (div - 1) & 0x3)
    }

    pub fn set_test_mode(&mut self, ch: Channel, mode: TestMode) -> Result<()> {
        self.with_channel(ch, |adc| adc.bus.write_reg(TEST_MODE, mode.into()))
    }

    pub fn set_clock_phase(&mut self, ch: Channel, half_cycles: u8) -> Result<()> {
        self.with_channel(ch, |adc| adc.bus.write_reg(IP_CLK_PHASE_ADJ, half_cycles))
    }

    pub fn set_dc_offset_filter(&mut self, enable: bool) -> Result<()> {
        self.bus.write_reg(DC_OFFSET_CAL_CTRL, u8::from(enable) << 7)
    }

    pub fn set_clock_delay_mode(&mut self, mode: ClockDelayMode) -> Result<()> {
        self.bus.write_reg(CLK_DELAY_CTRL, mode.into())
    }

    /// Values above the part's range are reported but still written.
    pub fn set_fine_delay(&mut self, delay: u8) -> Result<()> {
        if delay > FINE_DELAY_MAX {
            warn!("ad9695 fine delay {:#04x} above {:#04x}", delay, FINE_DELAY_MAX);
        }
        self.bus.write_reg(CLK_FINE_DELAY, delay)
    }

    pub fn set_super_fine_delay(&mut self, delay: u8) -> Result<()> {
        if delay > SUPER_FINE_DELAY_MAX {
            warn!(
                "ad9695 super fine delay {:#04x} above {:#04x}",
                delay, SUPER_FINE_DELAY_MAX
            );
        }
        self.bus.write_reg(CLK_SUPER_FINE_DELAY, delay)
    }

    pub fn apply_clock_delay(&mut self, ch: Channel, delay: ClockDelay) -> Result<()> {
        self.with_channel(ch, |adc| {
            adc.set_clock_delay_mode(delay.mode)?;
            adc.set_fine_delay(delay.fine)?;
            adc.set_super_fine_delay(delay.super_fine)
        })
    }

    pub fn set_sysref_mode(&mut self, mode: SysrefMode, nshot_ignore: u8) -> Result<()> {
        if nshot_ignore > SYSREF_NSHOT_MASK {
            return Err(Error::OutOfRange {
                what: "SYSREF N-shot ignore count",
                value: nshot_ignore.into(),
                max: SYSREF_NSHOT_MASK.into(),
            });
        }
        self.bus
            .modify_reg(SYSREF_CTRL_0, |v| sysref_ctrl0(v, mode))?;
        let count = if mode == SysrefMode::NShot { nshot_ignore } else { 0 };
        self.bus
            .modify_reg(SYSREF_CTRL_1, |v| (v & !SYSREF_NSHOT_MASK) | count)?;
        Ok(())
    }

    /// Validate `p`, select the SERDES PLL range and program the framing
    /// registers. Nothing is written when validation or range selection
    /// fails.
    pub fn configure_jesd(
        &mut self,
        p: &JesdLinkParameters,
        sample_clock_khz: u64,
    ) -> Result<(u64, SerdesPllRange)> {
        let (rate, range) = match p.serdes_pll(sample_clock_khz) {
            Ok(r) => r,
            Err(e) => {
                warn!("ad9695 JESD configuration rejected: {}", e);
                return Err(e);
            }
        };
        info!("ad9695 lane rate {} kbps, SERDES PLL {:?}", rate, range);

        self.bus.write_reg(JESD_SERDES_PLL_CFG, range.register())?;
        self.bus.write_reg(JESD_M, p.m - 1)?;
        self.bus.write_reg(JESD_CS_N, p.cs_n())?;
        self.bus
            .modify_reg(JESD_SCV_NP, |v| (v & !0x1F) | (p.np - 1))?;
        self.bus.write_reg(JESD_F, p.f - 1)?;
        self.bus.write_reg(JESD_K, (p.k - 1) & 0x1F)?;
        self.bus
            .modify_reg(JESD_L_SCR, |v| (v & !0x1F) | (p.l - 1))?;
        Ok((rate, range))
    }

    pub fn set_subclass(&mut self, subclass: u8) -> Result<()> {
        if subclass > 3 {
            return Err(Error::Subclass(subclass));
        }
        self.bus
            .modify_reg(JESD_SCV_NP, |v| (v & 0x1F) | (subclass << 5))?;
        Ok(())
    }

    pub fn set_scrambler(&mut self, enable: bool) -> Result<()> {
        self.bus.modify_reg(JESD_L_SCR, |v| {
            let mut f = LaneScrambling::from_bits_retain(v);
            f.set(LaneScrambling::SCRAMBLER, enable);
            f.bits()
        })?;
        Ok(())
    }

    /// Make the transmitter send K28.5 continuously.
    pub fn force_cgs(&mut self) -> Result<()> {
        self.bus.write_reg(JESD_LINK_CTRL2, FORCE_CGS)
    }

    pub fn enable_link(&mut self, enable: bool) -> Result<()> {
        let mut v = LinkCtrl1::from_bits_retain(self.bus.read_reg(JESD_LINK_CTRL1)?);
        v.insert(LinkCtrl1::POWER_DOWN);
        self.bus.write_reg(JESD_LINK_CTRL1, v.bits())?;
        debug!("ad9695 link ctrl1 {:#04x}", v.bits());

        let v = if enable { LINK_ENABLE } else { v.bits() };
        self.bus.write_reg(JESD_LINK_CTRL1, v)?;
        if enable {
            self.jesd_init_sequence()?;
            self.advance(Stage::LinkEnabled);
        }
        Ok(())
    }

    fn jesd_init_sequence(&mut self) -> Result<()> {
        for (i, &(addr, value)) in INIT_SEQUENCE.iter().enumerate() {
            if i > 0 {
                self.delay.sleep(INIT_SEQUENCE_PAUSE);
            }
            self.bus.write_reg(addr, value)?;
        }
        Ok(())
    }

    pub fn pll_status(&mut self) -> Result<SerdesPllStatus> {
        Ok(SerdesPllStatus::from_bits_retain(
            self.bus.read_reg(JESD_SERDES_PLL_STATUS)?,
        ))
    }

    /// Poll the SERDES PLL up to ten times, sleeping 10 ms before each read.
    pub fn wait_for_lock(&mut self) -> Result<Lock> {
        for attempts in 1..=PLL_POLL_ATTEMPTS {
            self.delay.sleep(PLL_POLL_INTERVAL);
            if self.pll_status()?.contains(SerdesPllStatus::LOCKED) {
                info!("ad9695 PLL LOCKED after {} polls", attempts);
                self.advance(Stage::Locked);
                return Ok(Lock::Locked { attempts });
            }
        }
        warn!("ad9695 PLL UNLOCKED after {} polls", PLL_POLL_ATTEMPTS);
        self.advance(Stage::TimedOut);
        Ok(Lock::TimedOut {
            attempts: PLL_POLL_ATTEMPTS,
        })
    }

    pub fn read_jesd_config(&mut self) -> Result<JesdReadback> {
        let l_scr = self.bus.read_reg(JESD_L_SCR)?;
        let scv_np = self.bus.read_reg(JESD_SCV_NP)?;
        let cs_n = self.bus.read_reg(JESD_CS_N)?;
        let hd_cf = self.bus.read_reg(JESD_HD_CF)?;
        Ok(JesdReadback {
            l: (l_scr & 0x1F) + 1,
            scrambling: l_scr & 0x80 != 0,
            f: self.bus.read_reg(JESD_F)?.wrapping_add(1),
            k: (self.bus.read_reg(JESD_K)? & 0x1F) + 1,
            m: self.bus.read_reg(JESD_M)?.wrapping_add(1),
            cs: cs_n >> 6,
            n: (cs_n & 0x1F) + 1,
            subclass: scv_np >> 5,
            np: (scv_np & 0x1F) + 1,
            s: (self.bus.read_reg(JESD_S)? & 0x1F) + 1,
            hd: hd_cf & 0x80 != 0,
            cf: hd_cf & 0x1F,
            did: self.bus.read_reg(JESD_DID)?,
            bid: self.bus.read_reg(JESD_BID)? & 0x0F,
            lid0: self.bus.read_reg(JESD_LID0)? & 0x1F,
        })
    }
}
