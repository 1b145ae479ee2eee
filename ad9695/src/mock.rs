//! In-memory stand-ins for every bus trait.
//!
//! All mocks record into one shared [`Trace`], so a test can check the exact
//! order of register traffic, pin changes and requested sleeps across the
//! ADC, the link layer and the PHY without touching hardware or sleeping.
use crate::bus::{ByteRegisterBus, Delay, PowerDownPin, WordRegisterBus};
use crate::{Error, Result};
use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
    time::Duration,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Read8 { addr: u16, value: u8 },
    Write8 { addr: u16, value: u8 },
    Read32 { bus: &'static str, offset: usize, value: u32 },
    Write32 { bus: &'static str, offset: usize, value: u32 },
    Pin(bool),
    Sleep(Duration),
}

#[derive(Clone, Debug, Default)]
pub struct Trace(Rc<RefCell<Vec<Event>>>);

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn writes8(&self) -> Vec<(u16, u8)> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match *e {
                Event::Write8 { addr, value } => Some((addr, value)),
                _ => None,
            })
            .collect()
    }

    pub fn reads8(&self, addr: u16) -> usize {
        self.0
            .borrow()
            .iter()
            .filter(|e| matches!(e, Event::Read8 { addr: a, .. } if *a == addr))
            .count()
    }

    pub fn writes32(&self, bus: &str) -> Vec<(usize, u32)> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match *e {
                Event::Write32 { bus: b, offset, value } if b == bus => Some((offset, value)),
                _ => None,
            })
            .collect()
    }

    pub fn reads32(&self, bus: &str, offset: usize) -> usize {
        self.0
            .borrow()
            .iter()
            .filter(|e| matches!(e, Event::Read32 { bus: b, offset: o, .. } if *b == bus && *o == offset))
            .count()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match *e {
                Event::Sleep(d) => Some(d),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct Memory<A, V> {
    regs: HashMap<A, V>,
    scripted: HashMap<A, VecDeque<V>>,
    self_clearing: HashMap<A, V>,
    failing: bool,
}

fn bus_failure() -> Error {
    Error::Io(std::io::Error::other("mock bus failure"))
}

/// 8-bit register file. Reads of unknown addresses return 0.
#[derive(Clone, Debug)]
pub struct MockByteBus {
    mem: Rc<RefCell<Memory<u16, u8>>>,
    trace: Trace,
}

impl MockByteBus {
    pub fn new(trace: &Trace) -> Self {
        Self {
            mem: Rc::default(),
            trace: trace.clone(),
        }
    }

    pub fn get(&self, addr: u16) -> u8 {
        self.mem.borrow().regs.get(&addr).copied().unwrap_or(0)
    }

    pub fn set(&self, addr: u16, value: u8) {
        self.mem.borrow_mut().regs.insert(addr, value);
    }

    /// Queue values returned by the next reads of `addr`, ahead of the
    /// stored register value.
    pub fn script<I: IntoIterator<Item = u8>>(&self, addr: u16, values: I) {
        self.mem
            .borrow_mut()
            .scripted
            .entry(addr)
            .or_default()
            .extend(values);
    }

    /// Bits in `mask` read back as 0 right after being written.
    pub fn self_clearing(&self, addr: u16, mask: u8) {
        self.mem.borrow_mut().self_clearing.insert(addr, mask);
    }

    pub fn fail(&self, failing: bool) {
        self.mem.borrow_mut().failing = failing;
    }
}

impl ByteRegisterBus for MockByteBus {
    fn read_reg(&mut self, addr: u16) -> Result<u8> {
        let mut mem = self.mem.borrow_mut();
        if mem.failing {
            return Err(bus_failure());
        }
        let scripted = mem.scripted.get_mut(&addr).and_then(VecDeque::pop_front);
        let value = scripted.unwrap_or_else(|| mem.regs.get(&addr).copied().unwrap_or(0));
        self.trace.push(Event::Read8 { addr, value });
        Ok(value)
    }

    fn write_reg(&mut self, addr: u16, value: u8) -> Result<()> {
        let mut mem = self.mem.borrow_mut();
        if mem.failing {
            return Err(bus_failure());
        }
        let mask = mem.self_clearing.get(&addr).copied().unwrap_or(0);
        mem.regs.insert(addr, value & !mask);
        self.trace.push(Event::Write8 { addr, value });
        Ok(())
    }
}

/// 32-bit register file named `bus` in the trace.
#[derive(Clone, Debug)]
pub struct MockWordBus {
    name: &'static str,
    mem: Rc<RefCell<Memory<usize, u32>>>,
    trace: Trace,
}

impl MockWordBus {
    pub fn new(name: &'static str, trace: &Trace) -> Self {
        Self {
            name,
            mem: Rc::default(),
            trace: trace.clone(),
        }
    }

    pub fn get(&self, offset: usize) -> u32 {
        self.mem.borrow().regs.get(&offset).copied().unwrap_or(0)
    }

    pub fn set(&self, offset: usize, value: u32) {
        self.mem.borrow_mut().regs.insert(offset, value);
    }

    pub fn script<I: IntoIterator<Item = u32>>(&self, offset: usize, values: I) {
        self.mem
            .borrow_mut()
            .scripted
            .entry(offset)
            .or_default()
            .extend(values);
    }

    pub fn self_clearing(&self, offset: usize, mask: u32) {
        self.mem.borrow_mut().self_clearing.insert(offset, mask);
    }

    pub fn fail(&self, failing: bool) {
        self.mem.borrow_mut().failing = failing;
    }
}

impl WordRegisterBus for MockWordBus {
    fn read_word(&mut self, offset: usize) -> Result<u32> {
        let mut mem = self.mem.borrow_mut();
        if mem.failing {
            return Err(bus_failure());
        }
        let scripted = mem.scripted.get_mut(&offset).and_then(VecDeque::pop_front);
        let value = scripted.unwrap_or_else(|| mem.regs.get(&offset).copied().unwrap_or(0));
        self.trace.push(Event::Read32 {
            bus: self.name,
            offset,
            value,
        });
        Ok(value)
    }

    fn write_word(&mut self, offset: usize, value: u32) -> Result<()> {
        let mut mem = self.mem.borrow_mut();
        if mem.failing {
            return Err(bus_failure());
        }
        let mask = mem.self_clearing.get(&offset).copied().unwrap_or(0);
        mem.regs.insert(offset, value & !mask);
        self.trace.push(Event::Write32 {
            bus: self.name,
            offset,
            value,
        });
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct MockPin {
    level: Rc<RefCell<bool>>,
    trace: Trace,
}

impl MockPin {
    pub fn new(trace: &Trace) -> Self {
        Self {
            level: Rc::default(),
            trace: trace.clone(),
        }
    }

    pub fn asserted(&self) -> bool {
        *self.level.borrow()
    }
}

impl PowerDownPin for MockPin {
    fn set(&mut self, asserted: bool) -> Result<()> {
        *self.level.borrow_mut() = asserted;
        self.trace.push(Event::Pin(asserted));
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct MockDelay {
    trace: Trace,
}

impl MockDelay {
    pub fn new(trace: &Trace) -> Self {
        Self {
            trace: trace.clone(),
        }
    }
}

impl Delay for MockDelay {
    fn sleep(&mut self, duration: Duration) {
        self.trace.push(Event::Sleep(duration));
    }
}
