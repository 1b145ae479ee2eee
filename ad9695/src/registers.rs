/* AD9695 SPI register map
 *
 * Addresses are the 15-bit SPI register addresses. Field encoders live next
 * to the registers they target; JESD framing fields are in jesd.rs.
 * */
use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
#[cfg(test)] use proptest::prelude::*;
#[cfg(test)] use proptest_derive::Arbitrary;

pub const IF_CFG_A: u16 = 0x0000;
pub const IF_CFG_B: u16 = 0x0001;
pub const DEV_CFG: u16 = 0x0002;
pub const CHIP_TYPE: u16 = 0x0003;
pub const CHIP_ID: u16 = 0x0004;
pub const CHIP_GRADE: u16 = 0x0006;
pub const CH_INDEX: u16 = 0x0008;
pub const SCRATCH: u16 = 0x000A;
pub const CHIP_PIN_CTRL0: u16 = 0x003F;
pub const CHIP_PIN_CTRL1: u16 = 0x0040;

pub const IP_CLK_CFG: u16 = 0x010B;
pub const IP_CLK_PHASE_ADJ: u16 = 0x010C;
pub const CLK_DELAY_CTRL: u16 = 0x0110;
pub const CLK_FINE_DELAY: u16 = 0x0111;
pub const CLK_SUPER_FINE_DELAY: u16 = 0x0112;
pub const SYSREF_CTRL_0: u16 = 0x0120;
pub const SYSREF_CTRL_1: u16 = 0x0121;
pub const ADC_MODE: u16 = 0x0200;
pub const DC_OFFSET_CAL_CTRL: u16 = 0x0701;

pub const TEST_MODE: u16 = 0x0550;
pub const JESD_SERDES_PLL_CFG: u16 = 0x056E;
pub const JESD_SERDES_PLL_STATUS: u16 = 0x056F;
pub const JESD_LINK_CTRL1: u16 = 0x0571;
pub const JESD_LINK_CTRL2: u16 = 0x0572;
pub const JESD_DID: u16 = 0x0584;
pub const JESD_BID: u16 = 0x0585;
pub const JESD_LID0: u16 = 0x0587;
pub const JESD_L_SCR: u16 = 0x058B;
pub const JESD_F: u16 = 0x058C;
pub const JESD_K: u16 = 0x058D;
pub const JESD_M: u16 = 0x058E;
pub const JESD_CS_N: u16 = 0x058F;
pub const JESD_SCV_NP: u16 = 0x0590;
pub const JESD_S: u16 = 0x0591;
pub const JESD_HD_CF: u16 = 0x0592;

pub const SCRATCH_PATTERN: u8 = 0b1010_0101;
pub const EXPECTED_CHIP_TYPE: u8 = 0x03;
pub const EXPECTED_CHIP_ID: u8 = 0xDF;

// Soft reset: IF_CFG_A bits 7 and 0 mirror each other, bit 0 self-clears.
pub const SOFT_RESET_A: u8 = 0x81;
pub const SOFT_RESET_A_BIT: u8 = 0;
pub const SOFT_RESET_B: u8 = 0x02;
pub const SOFT_RESET_B_BIT: u8 = 1;

pub const PDN_PIN_DISABLE: u8 = 0x80;
pub const PDN_PIN_MODE_MASK: u8 = 0xC0;
pub const PDN_PIN_RESERVED: u8 = 0x3F;

/// Written to JESD_LINK_CTRL1 to bring the link out of power down.
pub const LINK_ENABLE: u8 = 0x14;
pub const FORCE_CGS: u8 = 0x80;

pub const FINE_DELAY_MAX: u8 = 0xC0;
pub const SUPER_FINE_DELAY_MAX: u8 = 0x80;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SerdesPllStatus: u8 {
        const LOCKED = 0x80;
        const _ = !0;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LinkCtrl1: u8 {
        const POWER_DOWN = 0x01;
        const _ = !0;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LaneScrambling: u8 {
        const SCRAMBLER = 0x80;
        const _ = !0;
    }
}

/// Channel context for the channel-sensitive registers. `Both` is the
/// broadcast context every per-channel operation has to return to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(test, derive(Arbitrary))]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    A,
    B,
    Both,
}

impl Channel {
    pub fn index(self) -> u8 {
        match self {
            Channel::A => 0,
            Channel::B => 1,
            Channel::Both => 2,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Channel::A),
            1 => Some(Channel::B),
            2 => Some(Channel::Both),
            _ => None,
        }
    }
}

// hardware counts channels from 1
impl From<Channel> for u8 {
    fn from(ch: Channel) -> u8 {
        ch.index() + 1
    }
}

#[cfg(test)]
proptest! {
    #[test]
    fn channel_index_inverse(ch: Channel) {
        assert_eq!(Some(ch), Channel::from_index(ch.index()));
        assert_eq!(u8::from(ch), ch.index() + 1);
    }
}

#[rustfmt::skip]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize)]
#[cfg_attr(test, derive(Arbitrary))]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum TestMode {
    #[default]
    Off                     = 0x0,
    MidscaleShort           = 0x1,
    PositiveFullScale       = 0x2,
    NegativeFullScale       = 0x3,
    AlternatingCheckerboard = 0x4,
    Pn23                    = 0x5,
    Pn9                     = 0x6,
    OneZeroToggle           = 0x7,
    User                    = 0x8,
    Ramp                    = 0xF,
}

/// Chip application mode, full bandwidth or the number of DDCs in use.
#[rustfmt::skip]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum ChipMode {
    #[default]
    FullBandwidth = 0,
    OneDdc        = 1,
    TwoDdc        = 2,
    FourDdc       = 3,
}

/// What the PDWN/STBY pin does when driven.
#[rustfmt::skip]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize)]
#[cfg_attr(test, derive(Arbitrary))]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum PdnPinMode {
    #[default]
    PowerDown = 0,
    Standby   = 1,
    Disabled  = 2,
}

#[rustfmt::skip]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum ChannelPowerMode {
    #[default]
    Normal    = 0,
    Standby   = 2,
    PowerDown = 3,
}

#[rustfmt::skip]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize)]
#[cfg_attr(test, derive(Arbitrary))]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum ClockDelayMode {
    #[default]
    None            = 0,
    Fine16          = 2,
    Fine16LowJitter = 3,
    Fine192         = 4,
    SuperFine       = 6,
}

#[rustfmt::skip]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum SysrefMode {
    #[default]
    Disabled   = 0,
    Continuous = 1,
    NShot      = 2,
}

pub const SYSREF_MODE_MASK: u8 = 0b0000_0110;
pub const SYSREF_NSHOT_MASK: u8 = 0x0F;

/// CHIP_PIN_CTRL1 after selecting `mode`, bits [5:0] forced high.
pub fn pdn_pin_ctrl1(current: u8, mode: PdnPinMode) -> u8 {
    (current & !PDN_PIN_MODE_MASK) | PDN_PIN_RESERVED | (u8::from(mode) << 6)
}

pub fn sysref_ctrl0(current: u8, mode: SysrefMode) -> u8 {
    (current & !SYSREF_MODE_MASK) | (u8::from(mode) << 1)
}

#[cfg(test)]
proptest! {
    #[test]
    fn pdn_pin_mode_field(current: u8, mode: PdnPinMode) {
        let v = pdn_pin_ctrl1(current, mode);
        assert_eq!(v >> 6, u8::from(mode));
        assert_eq!(v & PDN_PIN_RESERVED, PDN_PIN_RESERVED);
        assert_eq!(PdnPinMode::try_from(v >> 6).unwrap(), mode);
    }

    #[test]
    fn sysref_mode_preserves(current: u8) {
        let v = sysref_ctrl0(current, SysrefMode::NShot);
        assert_eq!(v & !SYSREF_MODE_MASK, current & !SYSREF_MODE_MASK);
        assert_eq!((v & SYSREF_MODE_MASK) >> 1, 2);
    }

    #[test]
    fn test_mode_inverse(mode: TestMode) {
        assert_eq!(mode, TestMode::try_from(u8::from(mode)).unwrap());
    }

    #[test]
    fn clock_delay_mode_inverse(mode: ClockDelayMode) {
        assert_eq!(mode, ClockDelayMode::try_from(u8::from(mode)).unwrap());
    }
}
