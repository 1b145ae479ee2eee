//! JESD204B framing parameters shared by the ADC and the FPGA receiver.
use crate::{Error, Result};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
#[cfg(test)] use proptest::prelude::*;

/// Frame structure negotiated between the converter and the receiver.
///
/// The default is the board's reference link: four lanes, two converters,
/// one octet per frame, 16 bit samples, 32 frames per multiframe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JesdLinkParameters {
    /// lanes
    pub l: u8,
    /// converters
    pub m: u8,
    /// octets per frame
    pub f: u8,
    /// converter resolution
    pub n: u8,
    /// bits per sample on the wire
    pub np: u8,
    /// frames per multiframe
    pub k: u8,
    /// control bits per sample
    pub cs: u8,
    /// control words per frame
    pub cf: u8,
    pub hd: bool,
    pub scrambling: bool,
}

impl Default for JesdLinkParameters {
    fn default() -> Self {
        Self {
            l: 4,
            m: 2,
            f: 1,
            n: 16,
            np: 16,
            k: 32,
            cs: 0,
            cf: 0,
            hd: false,
            scrambling: false,
        }
    }
}

fn reject(param: &'static str, value: u8) -> Error {
    Error::InvalidJesd {
        param,
        value: value.into(),
    }
}

impl JesdLinkParameters {
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.l, 1 | 2 | 4) {
            return Err(reject("L", self.l));
        }
        if !matches!(self.m, 1 | 2 | 4 | 8) {
            return Err(reject("M", self.m));
        }
        if !matches!(self.f, 1 | 2 | 4 | 8 | 16) {
            return Err(reject("F", self.f));
        }
        if !(7..=16).contains(&self.n) {
            return Err(reject("N", self.n));
        }
        if !(4..=32).contains(&self.k) || self.k % 4 != 0 {
            return Err(reject("K", self.k));
        }
        if self.cs > 3 {
            return Err(reject("CS", self.cs));
        }
        if self.cf != 0 {
            return Err(reject("CF", self.cf));
        }
        if !matches!(self.np, 8 | 16) {
            return Err(reject("NP", self.np));
        }
        Ok(())
    }

    /// Serial rate of one lane in kbps, 8b/10b overhead included.
    /// Saturates, so an absurd clock still selects no PLL range.
    pub fn lane_rate_kbps(&self, sample_clock_khz: u64) -> u64 {
        (u64::from(self.m) * u64::from(self.np) * 10).saturating_mul(sample_clock_khz)
            / (u64::from(self.l) * 8)
    }

    /// Validate and pick the SERDES PLL range in one go.
    pub fn serdes_pll(&self, sample_clock_khz: u64) -> Result<(u64, SerdesPllRange)> {
        self.validate()?;
        let rate = self.lane_rate_kbps(sample_clock_khz);
        Ok((rate, SerdesPllRange::select(rate)?))
    }

    /// JESD_CS_N: CS in [7:6], N-1 in [4:0].
    pub fn cs_n(&self) -> u8 {
        ((self.cs & 0x3) << 6) | (self.n.wrapping_sub(1) & 0x1F)
    }
}

/// SERDES PLL configuration code, one per lane rate bracket.
#[rustfmt::skip]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SerdesPllRange {
    /// 13.5 - 16 Gbps
    Full    = 0b0011,
    /// 6.75 - 13.5 Gbps
    Half    = 0b0000,
    /// 3.375 - 6.75 Gbps
    Quarter = 0b0001,
    /// 1.6875 - 3.375 Gbps
    Eighth  = 0b0101,
}

impl SerdesPllRange {
    /// Brackets are exclusive at the bottom: a rate sitting exactly on a
    /// boundary belongs to the slower range.
    pub fn select(lane_rate_kbps: u64) -> Result<Self> {
        match lane_rate_kbps {
            r if r > 16_000_000 => Err(Error::LaneRateTooHigh(r)),
            r if r > 13_500_000 => Ok(Self::Full),
            r if r > 6_750_000 => Ok(Self::Half),
            r if r > 3_375_000 => Ok(Self::Quarter),
            r if r > 1_687_500 => Ok(Self::Eighth),
            r => Err(Error::LaneRateTooLow(r)),
        }
    }

    /// Value for JESD_SERDES_PLL_CFG, code in the top nibble.
    pub fn register(self) -> u8 {
        u8::from(self) << 4
    }
}

/// The JESD block as read back from the chip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct JesdReadback {
    pub l: u8,
    pub m: u8,
    pub f: u8,
    pub n: u8,
    pub np: u8,
    pub k: u8,
    pub s: u8,
    pub cs: u8,
    pub cf: u8,
    pub hd: bool,
    pub scrambling: bool,
    pub subclass: u8,
    pub did: u8,
    pub bid: u8,
    pub lid0: u8,
}

impl JesdReadback {
    /// Whether the framing fields agree with `p`.
    pub fn matches(&self, p: &JesdLinkParameters) -> bool {
        self.l == p.l
            && self.m == p.m
            && self.f == p.f
            && self.n == p.n
            && self.np == p.np
            && self.k == p.k
            && self.cs == p.cs
    }
}


#[cfg(test)]
proptest! {
    #[test]
    fn pll_range_matches_rate(rate in 1_687_501u64..=16_000_000) {
        let code = SerdesPllRange::select(rate).unwrap();
        let (lo, hi) = match code {
            SerdesPllRange::Full => (13_500_000, 16_000_000),
            SerdesPllRange::Half => (6_750_000, 13_500_000),
            SerdesPllRange::Quarter => (3_375_000, 6_750_000),
            SerdesPllRange::Eighth => (1_687_500, 3_375_000),
        };
        assert!(rate > lo && rate <= hi);
    }

    #[test]
    fn lane_rate_scales_with_clock(fs in 1u64..4_000_000) {
        let p = JesdLinkParameters::default();
        // 2 * 16 * 10 / 32
        assert_eq!(p.lane_rate_kbps(fs), fs * 10);
    }
}
