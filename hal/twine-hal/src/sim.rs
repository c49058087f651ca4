//! Simulated controller with an attached paged serial EEPROM
//!
//! Host-side stand-in for a real TWI peripheral. Every controller
//! operation is applied to a model of a 24xx-style EEPROM and logged as a
//! [`BusEvent`], and an "interrupt" is raised exactly where the hardware
//! would raise one. [`TwiMaster`] is implemented for `&SimTwi` so a test
//! can hand the controller to the engine and still inspect it.
//!
//! The EEPROM model follows the datasheet behaviour the drivers care about:
//!
//! - written bytes wrap inside the current page and are committed at STOP
//! - a committed write starts a write cycle during which the device does
//!   not acknowledge its address
//! - sequential reads roll over at the end of memory
//!
//! Time only moves through [`SimDelay`] or [`SimTwi::advance_ns`].

use core::cell::{Cell, RefCell};
use core::task::{Context, Poll};

use embedded_hal_async::delay::DelayNs;
use heapless::Vec;

use crate::i2c::{BusStatus, I2cConfig, TwiMaster};

/// Size of the simulated memory array (largest supported device)
pub const MEMORY_SIZE: usize = 65536;

/// Number of bus events retained in the log
pub const LOG_CAPACITY: usize = 4096;

/// Largest page the model can buffer
const MAX_PAGE: usize = 256;

/// One observable bus event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// START followed by the address byte
    Start(u8),
    /// Repeated START followed by the address byte
    Restart(u8),
    /// Data byte sent by the master
    Write(u8),
    /// Data byte clocked in from the device
    Read(u8),
    /// STOP
    Stop,
}

/// One-shot faults raised on the next controller event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// Another master wins arbitration
    ArbitrationLost,
    /// The controller flags an illegal bus condition
    BusError,
    /// The device refuses the next data byte
    DataNack,
}

/// How the device splits a memory address across the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordAddressing {
    /// Two word-address bytes, big-endian (24FC512 and friends)
    TwoByte,
    /// Address bits 8..=10 in the slave address, one word-address byte
    BlockSelect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    AddressHigh,
    AddressLow,
    Data,
    Reading,
    Ignored,
}

/// Simulated TWI master with one EEPROM on the bus
pub struct SimTwi {
    base: u8,
    addressing: WordAddressing,
    page_size: u16,
    capacity: u32,
    write_cycle_ns: Cell<u64>,

    memory: RefCell<[u8; MEMORY_SIZE]>,
    pending: RefCell<[Option<u8>; MAX_PAGE]>,
    pending_page: Cell<u16>,
    log: RefCell<Vec<BusEvent, LOG_CAPACITY>>,

    now_ns: Cell<u64>,
    busy_until_ns: Cell<u64>,
    present: Cell<bool>,
    pointer: Cell<u16>,
    phase: Cell<Phase>,

    owned: Cell<bool>,
    rx_nack: Cell<bool>,
    arbitration_lost: Cell<bool>,
    bus_error: Cell<bool>,
    irq: Cell<bool>,
    irq_enabled: Cell<bool>,
    latched: Cell<u8>,
    fault: Cell<Option<SimFault>>,

    write_cycles: Cell<u32>,
    recoveries: Cell<u32>,
    frequency: Cell<u32>,
}

impl SimTwi {
    /// A 24FC512-like device: 64 KiB, 128-byte pages, two-byte addressing,
    /// 5 ms write cycle
    pub fn new(base: u8) -> Self {
        Self::with_geometry(base, WordAddressing::TwoByte, 128, MEMORY_SIZE as u32)
    }

    /// A device with explicit geometry
    ///
    /// `page_size` must be a power of two no larger than 256 and `capacity`
    /// no larger than [`MEMORY_SIZE`].
    pub fn with_geometry(
        base: u8,
        addressing: WordAddressing,
        page_size: u16,
        capacity: u32,
    ) -> Self {
        assert!(page_size.is_power_of_two() && page_size as usize <= MAX_PAGE);
        assert!(capacity as usize <= MEMORY_SIZE && capacity.is_power_of_two());
        Self {
            base,
            addressing,
            page_size,
            capacity,
            write_cycle_ns: Cell::new(5_000_000),
            memory: RefCell::new([0xFF; MEMORY_SIZE]),
            pending: RefCell::new([None; MAX_PAGE]),
            pending_page: Cell::new(0),
            log: RefCell::new(Vec::new()),
            now_ns: Cell::new(0),
            busy_until_ns: Cell::new(0),
            present: Cell::new(true),
            pointer: Cell::new(0),
            phase: Cell::new(Phase::Idle),
            owned: Cell::new(false),
            rx_nack: Cell::new(false),
            arbitration_lost: Cell::new(false),
            bus_error: Cell::new(false),
            irq: Cell::new(false),
            irq_enabled: Cell::new(false),
            latched: Cell::new(0),
            fault: Cell::new(None),
            write_cycles: Cell::new(0),
            recoveries: Cell::new(0),
            frequency: Cell::new(0),
        }
    }

    /// Change the write-cycle length
    pub fn set_write_cycle_ns(&self, ns: u64) {
        self.write_cycle_ns.set(ns);
    }

    /// Attach or detach the device (a detached device never acknowledges)
    pub fn set_present(&self, present: bool) {
        self.present.set(present);
    }

    /// Raise `fault` on the next controller event
    pub fn inject(&self, fault: SimFault) {
        self.fault.set(Some(fault));
    }

    /// Move simulated time forward
    pub fn advance_ns(&self, ns: u64) {
        self.now_ns.set(self.now_ns.get() + ns);
    }

    /// Current simulated time
    pub fn now_ns(&self) -> u64 {
        self.now_ns.get()
    }

    /// Whether the device is inside a write cycle
    pub fn write_in_progress(&self) -> bool {
        self.now_ns.get() < self.busy_until_ns.get()
    }

    /// Preload memory, bypassing the bus
    pub fn load(&self, address: u16, data: &[u8]) {
        let mut memory = self.memory.borrow_mut();
        for (i, &byte) in data.iter().enumerate() {
            memory[(address as usize + i) % self.capacity as usize] = byte;
        }
    }

    /// Copy memory out, bypassing the bus
    pub fn dump(&self, address: u16, buf: &mut [u8]) {
        let memory = self.memory.borrow();
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = memory[(address as usize + i) % self.capacity as usize];
        }
    }

    /// One memory byte, bypassing the bus
    pub fn peek(&self, address: u16) -> u8 {
        self.memory.borrow()[address as usize % self.capacity as usize]
    }

    /// Copy of the logged bus events
    pub fn events(&self) -> Vec<BusEvent, LOG_CAPACITY> {
        self.log.borrow().clone()
    }

    /// Forget logged bus events
    pub fn clear_events(&self) {
        self.log.borrow_mut().clear();
    }

    /// Number of committed page writes
    pub fn write_cycles(&self) -> u32 {
        self.write_cycles.get()
    }

    /// Number of controller recoveries (flushes after a fault)
    pub fn recoveries(&self) -> u32 {
        self.recoveries.get()
    }

    /// Whether master interrupts are enabled
    pub fn interrupts_enabled(&self) -> bool {
        self.irq_enabled.get()
    }

    /// Whether the controller still owns the bus
    pub fn bus_owned(&self) -> bool {
        self.owned.get()
    }

    /// Frequency last applied through `configure`
    pub fn frequency(&self) -> u32 {
        self.frequency.get()
    }

    fn record(&self, event: BusEvent) {
        // The log keeps the first LOG_CAPACITY events
        let _ = self.log.borrow_mut().push(event);
    }

    fn raise(&self) {
        match self.fault.get() {
            Some(SimFault::ArbitrationLost) => {
                self.fault.set(None);
                self.arbitration_lost.set(true);
                self.owned.set(false);
            }
            Some(SimFault::BusError) => {
                self.fault.set(None);
                self.bus_error.set(true);
            }
            _ => {}
        }
        self.irq.set(true);
    }

    fn matches(&self, slave: u8) -> Option<u8> {
        match self.addressing {
            WordAddressing::TwoByte => (slave == self.base).then_some(0),
            WordAddressing::BlockSelect => {
                (slave & !0x07 == self.base & !0x07).then_some(slave & 0x07)
            }
        }
    }

    fn wrap(&self, address: u32) -> u16 {
        (address % self.capacity) as u16
    }

    fn clock_in(&self) {
        let pointer = self.pointer.get();
        let byte = self.memory.borrow()[pointer as usize];
        self.latched.set(byte);
        self.pointer.set(self.wrap(pointer as u32 + 1));
        self.record(BusEvent::Read(byte));
    }

    fn address(&self, address: u8) {
        // A repeated START before STOP abandons buffered page data
        *self.pending.borrow_mut() = [None; MAX_PAGE];
        self.owned.set(true);

        let ack = self.present.get() && !self.write_in_progress();
        let block = if ack { self.matches(address >> 1) } else { None };
        match block {
            Some(block) => {
                if self.addressing == WordAddressing::BlockSelect {
                    let low = self.pointer.get() & 0x00FF;
                    self.pointer.set(self.wrap(((block as u32) << 8) | low as u32));
                }
                if address & 1 == 1 {
                    self.phase.set(Phase::Reading);
                    self.clock_in();
                } else if self.addressing == WordAddressing::TwoByte {
                    self.phase.set(Phase::AddressHigh);
                } else {
                    self.phase.set(Phase::AddressLow);
                }
                self.rx_nack.set(false);
            }
            None => {
                self.phase.set(Phase::Ignored);
                self.rx_nack.set(true);
            }
        }
        self.raise();
    }

    fn release(&self) {
        self.record(BusEvent::Stop);
        self.owned.set(false);
        if self.phase.get() == Phase::Data {
            let mut pending = self.pending.borrow_mut();
            if pending.iter().any(Option::is_some) {
                let page = self.pending_page.get() as usize;
                let mut memory = self.memory.borrow_mut();
                for (offset, slot) in pending.iter_mut().enumerate() {
                    if let Some(byte) = slot.take() {
                        memory[page + offset] = byte;
                    }
                }
                self.busy_until_ns
                    .set(self.now_ns.get() + self.write_cycle_ns.get());
                self.write_cycles.set(self.write_cycles.get() + 1);
            }
        }
        self.phase.set(Phase::Idle);
    }
}

impl TwiMaster for &SimTwi {
    fn configure(&mut self, config: &I2cConfig) {
        self.frequency.set(config.frequency);
    }

    fn start(&mut self, address: u8) {
        self.record(BusEvent::Start(address));
        self.address(address);
    }

    fn restart(&mut self, address: u8) {
        self.record(BusEvent::Restart(address));
        self.address(address);
    }

    fn write(&mut self, byte: u8) {
        self.record(BusEvent::Write(byte));
        let pointer = self.pointer.get();
        match self.phase.get() {
            Phase::AddressHigh => {
                self.pointer
                    .set(self.wrap(((byte as u32) << 8) | (pointer & 0x00FF) as u32));
                self.phase.set(Phase::AddressLow);
            }
            Phase::AddressLow => {
                let pointer = self.wrap(((pointer & 0xFF00) | byte as u16) as u32);
                self.pointer.set(pointer);
                self.pending_page.set(pointer & !(self.page_size - 1));
                self.phase.set(Phase::Data);
            }
            Phase::Data => {
                let mask = self.page_size - 1;
                self.pending.borrow_mut()[(pointer & mask) as usize] = Some(byte);
                self.pointer.set((pointer & !mask) | (pointer.wrapping_add(1) & mask));
            }
            Phase::Idle | Phase::Reading | Phase::Ignored => {}
        }

        let mut nack = self.phase.get() == Phase::Ignored;
        if self.fault.get() == Some(SimFault::DataNack) {
            self.fault.set(None);
            nack = true;
        }
        self.rx_nack.set(nack);
        self.raise();
    }

    fn read(&mut self) -> u8 {
        self.latched.get()
    }

    fn receive_next(&mut self) {
        if self.phase.get() == Phase::Reading {
            self.clock_in();
        }
        self.raise();
    }

    fn stop(&mut self) {
        self.release();
    }

    fn nack_stop(&mut self) {
        self.release();
    }

    fn status(&self) -> BusStatus {
        BusStatus {
            rx_nack: self.rx_nack.get(),
            arbitration_lost: self.arbitration_lost.get(),
            bus_error: self.bus_error.get(),
        }
    }

    fn acknowledge_interrupt(&mut self) {
        self.irq.set(false);
    }

    fn clear_arbitration_lost(&mut self) {
        self.arbitration_lost.set(false);
    }

    fn recover(&mut self) {
        self.bus_error.set(false);
        self.owned.set(false);
        self.phase.set(Phase::Idle);
        *self.pending.borrow_mut() = [None; MAX_PAGE];
        self.recoveries.set(self.recoveries.get() + 1);
    }

    fn reset(&mut self) {
        self.owned.set(false);
        self.irq.set(false);
        self.phase.set(Phase::Idle);
    }

    fn enable_interrupts(&mut self) {
        self.irq_enabled.set(true);
    }

    fn disable_interrupts(&mut self) {
        self.irq_enabled.set(false);
    }

    fn poll_event(&mut self, _cx: &mut Context<'_>) -> Poll<()> {
        if self.irq.get() && self.irq_enabled.get() {
            Poll::Ready(())
        } else {
            // Nothing will ever raise the interrupt on a simulated bus
            panic!("sim: waiting for a bus event that will never be raised");
        }
    }
}

/// Delay provider that advances the simulation clock
pub struct SimDelay<'a> {
    sim: &'a SimTwi,
    calls: u32,
}

impl<'a> SimDelay<'a> {
    /// Create a delay bound to `sim`'s clock
    pub fn new(sim: &'a SimTwi) -> Self {
        Self { sim, calls: 0 }
    }

    /// Number of delays requested so far
    pub fn calls(&self) -> u32 {
        self.calls
    }
}

impl DelayNs for SimDelay<'_> {
    async fn delay_ns(&mut self, ns: u32) {
        self.calls += 1;
        self.sim.advance_ns(ns as u64);
    }
}
