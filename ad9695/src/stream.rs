//! UDP side channel: capture blocks out to the host, clock delay trims in.
use crate::adc::ClockDelay;
use crate::bringup::Frontend;
use crate::bus::{ByteRegisterBus, Delay, PowerDownPin, WordRegisterBus};
use crate::registers::{Channel, ClockDelayMode};
use crate::{Error, Result};
use std::io;
use std::net::SocketAddr;
use tracing::{info, warn};

/// Host clock delay request: `[mode, fine, super_fine, channel]`, with
/// channel 1 = A, 2 = B, 3 = both. Trailing bytes are ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelayControl {
    pub channel: Channel,
    pub delay: ClockDelay,
}

impl DelayControl {
    pub fn parse(datagram: &[u8]) -> Result<Self> {
        let &[mode, fine, super_fine, channel, ..] = datagram else {
            return Err(Error::Command(format!(
                "delay control needs 4 bytes, got {}",
                datagram.len()
            )));
        };
        let mode = ClockDelayMode::try_from(mode)
            .map_err(|_| Error::Command(format!("unknown clock delay mode {:#04x}", mode)))?;
        let channel = channel
            .checked_sub(1)
            .and_then(Channel::from_index)
            .ok_or_else(|| Error::Command(format!("unknown channel index {}", channel)))?;
        Ok(Self {
            channel,
            delay: ClockDelay {
                mode,
                fine,
                super_fine,
            },
        })
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
    /// Trim the sampling clock, then reset the link so the receiver
    /// realigns to the moved data.
    pub fn apply_delay_control(&mut self, ctl: DelayControl) -> Result<()> {
        info!(
            "clock delay {:?} fine {} super fine {} on {:?}",
            ctl.delay.mode, ctl.delay.fine, ctl.delay.super_fine, ctl.channel
        );
        self.adc.apply_clock_delay(ctl.channel, ctl.delay)?;
        self.link.reset()
    }
}

/// Anything that can send a datagram to an address.
pub trait DatagramSink {
    fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
}

impl DatagramSink for mio::net::UdpSocket {
    fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        mio::net::UdpSocket::send_to(self, buf, target)
    }
}

/// Sends the capture buffer `packets` times once armed by the console.
#[derive(Debug)]
pub struct Streamer {
    target: SocketAddr,
    packets: u32,
    armed: bool,
}

impl Streamer {
    pub fn new(target: SocketAddr, packets: u32) -> Self {
        Self {
            target,
            packets,
            armed: false,
        }
    }

    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn armed(&self) -> bool {
        self.armed
    }

    /// Send one burst if armed. Returns the number of datagrams sent; the
    /// first failed send ends the burst. Disarms either way.
    pub fn send<S: DatagramSink>(&mut self, sink: &mut S, payload: &[u8]) -> Result<u32> {
        if !self.armed {
            return Ok(0);
        }
        self.armed = false;
        for sent in 0..self.packets {
            if let Err(e) = sink.send_to(payload, self.target) {
                warn!("UDP send to {} failed after {} packets: {}", self.target, sent, e);
                return Err(e.into());
            }
        }
        info!("sent {} packets of {} bytes to {}", self.packets, payload.len(), self.target);
        Ok(self.packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bringup::tests::rig;
    use crate::link;
    use crate::mock::Event;
    use crate::registers::*;

    #[derive(Default)]
    struct Sink {
        sent: Vec<(Vec<u8>, SocketAddr)>,
        fail_after: Option<usize>,
    }

    impl DatagramSink for Sink {
        fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
            if self.fail_after == Some(self.sent.len()) {
                return Err(io::Error::other("unreachable"));
            }
            self.sent.push((buf.to_vec(), target));
            Ok(buf.len())
        }
    }

    fn host() -> SocketAddr {
        "192.168.1.10:5002".parse().unwrap()
    }

    #[test]
    fn parse_delay_control() {
        let ctl = DelayControl::parse(&[6, 0x10, 0x20, 2, 0xFF]).unwrap();
        assert_eq!(ctl.channel, Channel::B);
        assert_eq!(
            ctl.delay,
            ClockDelay { mode: ClockDelayMode::SuperFine, fine: 0x10, super_fine: 0x20 }
        );
        assert_eq!(DelayControl::parse(&[0, 0, 0, 3]).unwrap().channel, Channel::Both);
        assert_eq!(DelayControl::parse(&[0, 0, 0, 1]).unwrap().channel, Channel::A);

        assert!(DelayControl::parse(&[0, 0, 0]).is_err());
        assert!(DelayControl::parse(&[0, 0, 0, 0]).is_err());
        assert!(DelayControl::parse(&[0, 0, 0, 4]).is_err());
        assert!(DelayControl::parse(&[1, 0, 0, 1]).is_err());
    }

    #[test]
    fn delay_control_then_link_reset() {
        let (mut fe, r) = rig();
        let ctl = DelayControl::parse(&[2, 0x40, 0x08, 1]).unwrap();
        fe.apply_delay_control(ctl).unwrap();
        assert_eq!(
            r.trace.writes8(),
            vec![
                (CH_INDEX, 1),
                (CLK_DELAY_CTRL, 2),
                (CLK_FINE_DELAY, 0x40),
                (CLK_SUPER_FINE_DELAY, 0x08),
                (CH_INDEX, 3),
            ]
        );
        let events = r.trace.events();
        let last_spi = events.iter().rposition(|e| matches!(e, Event::Write8 { .. })).unwrap();
        let reset = events
            .iter()
            .position(|e| matches!(e, Event::Write32 { bus: "link", offset: link::regs::RESET, .. }))
            .unwrap();
        assert!(last_spi < reset);
    }

    #[test]
    fn burst_only_when_armed() {
        let mut s = Streamer::new(host(), 32);
        let mut sink = Sink::default();
        let payload = vec![0x5A; 512];
        assert_eq!(s.send(&mut sink, &payload).unwrap(), 0);
        s.arm();
        assert!(s.armed());
        assert_eq!(s.send(&mut sink, &payload).unwrap(), 32);
        assert!(!s.armed());
        assert_eq!(sink.sent.len(), 32);
        assert!(sink.sent.iter().all(|(b, t)| b.len() == 512 && *t == host()));
        assert_eq!(s.send(&mut sink, &payload).unwrap(), 0);
    }

    #[test]
    fn failed_send_ends_burst() {
        let mut s = Streamer::new(host(), 32);
        let mut sink = Sink { fail_after: Some(3), ..Default::default() };
        s.arm();
        assert!(s.send(&mut sink, &[0; 512]).unwrap_err().is_transport());
        assert_eq!(sink.sent.len(), 3);
        assert!(!s.armed());
    }
}
