//! Link bring-up: the ADC, the PHY and the link layer brought up in the one
//! order that lets the receiver lock.
use crate::adc::{Ad9695, AdcDeviceState, InitReport};
use crate::bus::{ByteRegisterBus, Delay, PowerDownPin, WordRegisterBus};
use crate::dma::{CaptureBuffer, Dma};
use crate::jesd::JesdLinkParameters;
use crate::link::Link;
use crate::phy::{Phy, PllCheck, PllStatus};
use crate::registers::SerdesPllStatus;
use crate::Result;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Pause after the final PHY check before the first capture.
pub const SETTLE: Duration = Duration::from_millis(100);

/// Physical base addresses, for reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bases {
    pub phy: u64,
    pub link: u64,
}

/// Every device on the board, each behind the one driver that owns its
/// address space.
pub struct Frontend<B, P, W, M, D> {
    pub adc: Ad9695<B, P, D>,
    pub phy: Phy<W, D>,
    pub link: Link<W, D>,
    pub dma: Dma<W, D>,
    pub buffer: CaptureBuffer<W>,
    /// raw physical memory
    pub mem: M,
    pub bases: Bases,
    delay: D,
}

#[derive(Debug)]
pub struct BringupReport {
    pub adc: InitReport,
    pub phy: PllCheck,
}

/// Derived link health, read fresh every time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub adc_pll: SerdesPllStatus,
    pub phy: PllStatus,
}

impl LinkStatus {
    pub fn is_up(&self) -> bool {
        self.adc_pll.contains(SerdesPllStatus::LOCKED) && self.phy.locked()
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
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adc_bus: B,
        pin: P,
        phy: W,
        link: W,
        dma: W,
        buffer: CaptureBuffer<W>,
        mem: M,
        bases: Bases,
        delay: D,
    ) -> Self {
        Self {
            adc: Ad9695::new(adc_bus, pin, delay.clone()),
            phy: Phy::new(phy, delay.clone()),
            link: Link::new(link, delay.clone()),
            dma: Dma::new(dma, delay.clone()),
            buffer,
            mem,
            bases,
            delay,
        }
    }

    /// ADC first, then the PHY out of reset, then link layer framing to
    /// match, then the PHY PLL check.
    pub fn bring_up(
        &mut self,
        state: AdcDeviceState,
        jesd: &JesdLinkParameters,
    ) -> Result<BringupReport> {
        let adc = self.adc.initialize(state, jesd)?;

        self.phy.tx_disable()?;
        self.phy.rx_reset()?;

        self.link.set_scrambling(jesd.scrambling)?;
        match self.link.set_subclass(state.subclass) {
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => warn!("link subclass: {}", e),
            Ok(()) => (),
        }
        self.link.set_kf(jesd.k, jesd.f)?;
        self.link.reset()?;

        let phy = self.phy.check_pll_status()?;
        self.delay.sleep(SETTLE);

        let status = self.link_status()?;
        if status.is_up() {
            info!("link up");
        } else {
            warn!("link down: {:?}", status);
        }
        Ok(BringupReport { adc, phy })
    }

    pub fn link_status(&mut self) -> Result<LinkStatus> {
        Ok(LinkStatus {
            adc_pll: self.adc.pll_status()?,
            phy: self.phy.pll_status()?,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adc::Lock;
    use crate::link;
    use crate::mock::{Event, MockByteBus, MockDelay, MockPin, MockWordBus, Trace};
    use crate::phy;
    use crate::registers::*;

    pub(crate) type MockFrontend =
        Frontend<MockByteBus, MockPin, MockWordBus, MockWordBus, MockDelay>;

    pub(crate) struct Rig {
        pub trace: Trace,
        pub adc: MockByteBus,
        pub phy: MockWordBus,
        pub link: MockWordBus,
        pub dma: MockWordBus,
        pub buffer: MockWordBus,
        pub mem: MockWordBus,
    }

    pub(crate) fn rig() -> (MockFrontend, Rig) {
        let trace = Trace::new();
        let r = Rig {
            adc: MockByteBus::new(&trace),
            phy: MockWordBus::new("phy", &trace),
            link: MockWordBus::new("link", &trace),
            dma: MockWordBus::new("dma", &trace),
            buffer: MockWordBus::new("buffer", &trace),
            mem: MockWordBus::new("mem", &trace),
            trace,
        };
        r.adc.self_clearing(IF_CFG_A, 0x01);
        r.adc.self_clearing(IF_CFG_B, 0x02);
        let fe = Frontend::new(
            r.adc.clone(),
            MockPin::new(&r.trace),
            r.phy.clone(),
            r.link.clone(),
            r.dma.clone(),
            CaptureBuffer::new(r.buffer.clone(), 0x0130_0000, 512),
            r.mem.clone(),
            Bases {
                phy: 0xA002_0000,
                link: 0xA001_0000,
            },
            MockDelay::new(&r.trace),
        );
        (fe, r)
    }

    fn position(events: &[Event], f: impl Fn(&Event) -> bool) -> usize {
        events.iter().position(f).unwrap()
    }

    #[test]
    fn reference_bring_up() {
        let (mut fe, r) = rig();
        r.adc.set(JESD_SERDES_PLL_STATUS, 0x80);
        r.link.set(link::regs::CFG_8B10B, 0xFFFF_0000);
        let report = fe
            .bring_up(AdcDeviceState::default(), &JesdLinkParameters::default())
            .unwrap();

        assert!(report.adc.lock.locked());
        assert!(report.phy.locked());
        assert_eq!(r.link.get(link::regs::CFG_8B10B), 0xFFFE_1F00);
        assert_eq!(r.link.get(link::regs::SUBCLASS), 0);

        let events = r.trace.events();
        let last_adc = events
            .iter()
            .rposition(|e| matches!(e, Event::Write8 { .. }))
            .unwrap();
        let tx_disable = position(&events, |e| {
            matches!(e, Event::Write32 { bus: "phy", offset: phy::regs::TX_RESET, .. })
        });
        let link_reset = position(&events, |e| {
            matches!(e, Event::Write32 { bus: "link", offset: link::regs::RESET, .. })
        });
        let pll_check = position(&events, |e| {
            matches!(e, Event::Read32 { bus: "phy", offset: phy::regs::PLL_STATUS, .. })
        });
        assert!(last_adc < tx_disable);
        assert!(tx_disable < link_reset);
        assert!(link_reset < pll_check);
        assert_eq!(r.trace.sleeps().last(), Some(&SETTLE));
    }

    #[test]
    fn link_follows_adc_framing() {
        let (mut fe, r) = rig();
        r.adc.set(JESD_SERDES_PLL_STATUS, 0x80);
        let state = AdcDeviceState { subclass: 1, ..Default::default() };
        let jesd = JesdLinkParameters { scrambling: true, ..Default::default() };
        fe.bring_up(state, &jesd).unwrap();
        assert_eq!(r.link.get(link::regs::CFG_8B10B), link::regs::SCRAMBLING | 0x1F00);
        assert_eq!(r.link.get(link::regs::SUBCLASS), 1);
    }

    #[test]
    fn unlocked_link_still_completes() {
        let (mut fe, r) = rig();
        r.phy.set(phy::regs::PLL_STATUS, 0b0_1010);
        let report = fe
            .bring_up(AdcDeviceState::default(), &JesdLinkParameters::default())
            .unwrap();
        assert_eq!(report.adc.lock, Lock::TimedOut { attempts: 10 });
        assert!(!report.phy.locked());
        assert_eq!(report.phy.polls, 1000);
        assert!(!fe.link_status().unwrap().is_up());
    }

    #[test]
    fn link_status_predicate() {
        let (mut fe, r) = rig();
        r.adc.set(JESD_SERDES_PLL_STATUS, 0x80);
        r.phy.set(phy::regs::PLL_STATUS, 0b1_0101);
        assert!(fe.link_status().unwrap().is_up());
        r.phy.set(phy::regs::PLL_STATUS, 0b0_1000);
        assert!(!fe.link_status().unwrap().is_up());
        r.phy.set(phy::regs::PLL_STATUS, 0);
        r.adc.set(JESD_SERDES_PLL_STATUS, 0x00);
        assert!(!fe.link_status().unwrap().is_up());
    }

    #[test]
    fn transport_failure_stops_bring_up() {
        let (mut fe, r) = rig();
        r.phy.fail(true);
        assert!(fe
            .bring_up(AdcDeviceState::default(), &JesdLinkParameters::default())
            .unwrap_err()
            .is_transport());
        assert!(r.trace.writes32("link").is_empty());
    }
}
