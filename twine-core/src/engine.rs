//! Bus transaction engine
//!
//! A master transaction is a chain of states, advanced exactly once per
//! controller event. Each state's handler issues the next bus primitive
//! and returns the state scheduled for the following event. Handlers may
//! fall through into another handler within the same event, e.g. a
//! transmit phase that finds its block already exhausted goes straight
//! into transmit-complete.
//!
//! Fault conditions found in the controller status override whatever
//! state was scheduled, in priority order: address NACK (only while an
//! address byte is outstanding), then arbitration loss, then bus error.

use embassy_sync::waitqueue::MultiWakerRegistration;
use twine_hal::TwiMaster;

use crate::error::Error;
use crate::transfer::{Directive, Transfer};

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Idle,
    SendAddressWrite,
    SendAddressRead,
    Transmit,
    Receive,
    TransmitComplete,
    Stop,
    NackStop,
    NackRestartWrite,
    NackRestartRead,
    AddressNack,
    BusCollision,
    BusError,
    Reset,
}

impl State {
    /// Whether the engine is between transactions
    pub fn is_idle(&self) -> bool {
        matches!(self, State::Idle | State::Reset)
    }
}

/// Direction of a transaction phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Write,
    Read,
}

impl Direction {
    /// Full address byte for `slave` in this direction
    pub fn address_byte(self, slave: u8) -> u8 {
        match self {
            Direction::Write => slave << 1,
            Direction::Read => (slave << 1) | 1,
        }
    }
}

/// Bus-level control flags
///
/// Whether the staged buffer is free lives with the session's staged
/// block, not here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct Flags {
    /// A transaction is in flight
    pub(crate) busy: bool,
    /// A session holds the bus
    pub(crate) in_use: bool,
    /// The next event acknowledges an address byte
    pub(crate) address_nack_check: bool,
}

/// Tasks that can wait in [`I2cBus::open`](crate::I2cBus::open) at once
///
/// A further waiter wakes the registered ones early; they re-register.
pub(crate) const MAX_WAITERS: usize = 4;

/// Controller and the shared half of the transaction context
pub(crate) struct Link<T> {
    pub(crate) hw: T,
    pub(crate) flags: Flags,
    pub(crate) slave: u8,
    pub(crate) state: State,
    pub(crate) error: Option<Error>,
    pub(crate) waiters: MultiWakerRegistration<MAX_WAITERS>,
}

impl<T: TwiMaster> Link<T> {
    pub(crate) fn new(hw: T) -> Self {
        Self {
            hw,
            flags: Flags::default(),
            slave: 0,
            state: State::Idle,
            error: None,
            waiters: MultiWakerRegistration::new(),
        }
    }

    /// Reserve the bus for `slave` and bring the controller to a clean idle
    pub(crate) fn acquire(&mut self, slave: u8) {
        self.slave = slave;
        self.flags = Flags {
            in_use: true,
            ..Flags::default()
        };
        self.state = State::Idle;
        self.error = None;
        self.hw.reset();
        self.hw.acknowledge_interrupt();
        self.hw.enable_interrupts();
    }

    /// Give the bus up and report the recorded outcome
    pub(crate) fn release(&mut self) -> Result<(), Error> {
        self.flags.in_use = false;
        self.hw.disable_interrupts();
        self.waiters.wake();
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Abandon an in-flight transaction
    pub(crate) fn abort(&mut self) {
        self.hw.recover();
        self.flags.busy = false;
        self.state = State::Reset;
    }

    /// Service one controller event
    pub(crate) fn service(&mut self, xfer: &mut Transfer<'_>) {
        self.hw.acknowledge_interrupt();
        let status = self.hw.status();

        if self.flags.address_nack_check && status.rx_nack {
            self.state = State::AddressNack;
        }
        if status.arbitration_lost {
            self.state = State::BusCollision;
        }
        if status.bus_error {
            self.state = State::BusError;
        }

        trace!("i2c: event in {}", self.state);
        self.state = self.transition(self.state, xfer);
    }

    /// Run the handler for `state` and return the next scheduled state
    pub(crate) fn transition(&mut self, state: State, xfer: &mut Transfer<'_>) -> State {
        match state {
            State::Idle => self.idle(),
            State::SendAddressWrite => self.send_address(Direction::Write),
            State::SendAddressRead => self.send_address(Direction::Read),
            State::Transmit => self.transmit(xfer),
            State::Receive => self.receive(xfer),
            State::TransmitComplete => self.transmit_complete(xfer),
            State::Stop => self.stop(),
            State::NackStop => self.nack_stop(),
            State::NackRestartWrite => self.restart(Direction::Write),
            State::NackRestartRead => self.restart(Direction::Read),
            State::AddressNack => {
                self.hw.stop();
                self.fault(Error::AddressNack)
            }
            State::BusCollision => {
                self.hw.clear_arbitration_lost();
                self.hw.recover();
                self.fault(Error::ArbitrationLost)
            }
            State::BusError => {
                self.hw.recover();
                self.fault(Error::Bus)
            }
            State::Reset => self.reset(),
        }
    }

    fn idle(&mut self) -> State {
        self.error = None;
        self.flags.busy = false;
        State::Idle
    }

    fn reset(&mut self) -> State {
        self.flags.busy = false;
        State::Reset
    }

    fn fault(&mut self, error: Error) -> State {
        warn!("i2c: transaction to {} failed: {}", self.slave, error);
        self.error = Some(error);
        self.reset()
    }

    fn send_address(&mut self, direction: Direction) -> State {
        self.flags.address_nack_check = true;
        self.hw.start(direction.address_byte(self.slave));
        Self::data_phase(direction)
    }

    fn restart(&mut self, direction: Direction) -> State {
        self.flags.address_nack_check = true;
        self.hw.restart(direction.address_byte(self.slave));
        Self::data_phase(direction)
    }

    fn data_phase(direction: Direction) -> State {
        match direction {
            Direction::Write => State::Transmit,
            Direction::Read => State::Receive,
        }
    }

    fn transmit(&mut self, xfer: &mut Transfer<'_>) -> State {
        if self.hw.status().rx_nack {
            return self.stop();
        }
        self.flags.address_nack_check = false;

        match xfer.cursor.next_byte() {
            Some(byte) => {
                self.hw.write(byte);
                if xfer.cursor.remaining() > 0 {
                    State::Transmit
                } else {
                    State::TransmitComplete
                }
            }
            None => self.transmit_complete(xfer),
        }
    }

    fn transmit_complete(&mut self, xfer: &mut Transfer<'_>) -> State {
        if self.hw.status().rx_nack {
            return self.stop();
        }

        xfer.cursor.release();
        match xfer.complete() {
            Directive::RestartRead => self.restart(Direction::Read),
            Directive::RestartWrite => self.restart(Direction::Write),
            Directive::Continue if xfer.cursor.remaining() > 0 => self.transmit(xfer),
            Directive::Continue | Directive::Stop => self.stop(),
        }
    }

    fn receive(&mut self, xfer: &mut Transfer<'_>) -> State {
        self.flags.address_nack_check = false;
        let byte = self.hw.read();
        xfer.cursor.store(byte);

        if xfer.cursor.remaining() > 0 {
            self.hw.receive_next();
            return State::Receive;
        }

        xfer.cursor.release();
        match xfer.complete() {
            Directive::RestartRead => self.restart(Direction::Read),
            Directive::RestartWrite => self.restart(Direction::Write),
            Directive::Continue if xfer.cursor.remaining() > 0 => {
                self.hw.receive_next();
                State::Receive
            }
            Directive::Continue | Directive::Stop => self.nack_stop(),
        }
    }

    fn stop(&mut self) -> State {
        self.hw.stop();
        self.idle()
    }

    fn nack_stop(&mut self) -> State {
        self.hw.nack_stop();
        self.idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{Block, Callback};
    use core::sync::atomic::{AtomicBool, Ordering};
    use core::task::Waker;
    use std::sync::Arc;
    use std::task::Wake;
    use twine_hal::sim::{BusEvent, SimFault, SimTwi};

    #[derive(Default)]
    struct Woken(AtomicBool);

    impl Wake for Woken {
        fn wake(self: Arc<Self>) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn link(sim: &SimTwi) -> Link<&SimTwi> {
        let mut link = Link::new(sim);
        link.acquire(0x50);
        link
    }

    // Drive the engine from `first` until it leaves the busy state
    fn run(link: &mut Link<&SimTwi>, xfer: &mut Transfer<'_>, first: State) {
        link.flags.busy = true;
        link.state = link.transition(first, xfer);
        while link.flags.busy {
            link.service(xfer);
        }
    }

    #[test]
    fn test_address_byte() {
        assert_eq!(Direction::Write.address_byte(0x50), 0xA0);
        assert_eq!(Direction::Read.address_byte(0x50), 0xA1);
    }

    #[test]
    fn test_state_classes() {
        assert!(State::Idle.is_idle());
        assert!(State::Reset.is_idle());
        assert!(!State::Transmit.is_idle());
    }

    #[test]
    fn test_release_wakes_every_waiter() {
        let sim = SimTwi::new(0x50);
        let mut link = link(&sim);
        let tasks: [Arc<Woken>; 3] = core::array::from_fn(|_| Arc::new(Woken::default()));

        for task in &tasks {
            link.waiters.register(&Waker::from(task.clone()));
        }
        assert!(tasks.iter().all(|t| !t.0.load(Ordering::SeqCst)));

        assert_eq!(link.release(), Ok(()));
        assert!(tasks.iter().all(|t| t.0.load(Ordering::SeqCst)));
    }

    #[test]
    fn test_idle_clears_error() {
        let sim = SimTwi::new(0x50);
        let mut link = link(&sim);
        let mut xfer = Transfer::new();
        link.flags.busy = true;
        link.error = Some(Error::Bus);

        assert_eq!(link.transition(State::Idle, &mut xfer), State::Idle);
        assert_eq!(link.error, None);
        assert!(!link.flags.busy);
    }

    #[test]
    fn test_reset_keeps_error() {
        let sim = SimTwi::new(0x50);
        let mut link = link(&sim);
        let mut xfer = Transfer::new();
        link.flags.busy = true;
        link.error = Some(Error::AddressNack);

        assert_eq!(link.transition(State::Reset, &mut xfer), State::Reset);
        assert_eq!(link.error, Some(Error::AddressNack));
        assert!(!link.flags.busy);
    }

    #[test]
    fn test_send_address_arms_nack_check() {
        let sim = SimTwi::new(0x50);
        let mut link = link(&sim);
        let mut xfer = Transfer::new();

        let next = link.transition(State::SendAddressRead, &mut xfer);
        assert_eq!(next, State::Receive);
        assert!(link.flags.address_nack_check);
        assert_eq!(sim.events().first(), Some(&BusEvent::Start(0xA1)));
    }

    #[test]
    fn test_single_byte_write_sequence() {
        let sim = SimTwi::new(0x50);
        let mut link = link(&sim);
        let data = [0x00, 0x10, 0x5A];
        let mut xfer = Transfer::new();
        xfer.cursor.stage(Block::Tx(&data)).unwrap();

        run(&mut link, &mut xfer, State::SendAddressWrite);

        assert_eq!(link.state, State::Idle);
        assert_eq!(link.error, None);
        assert_eq!(
            sim.events().as_slice(),
            &[
                BusEvent::Start(0xA0),
                BusEvent::Write(0x00),
                BusEvent::Write(0x10),
                BusEvent::Write(0x5A),
                BusEvent::Stop,
            ]
        );
        assert_eq!(sim.peek(0x0010), 0x5A);
        assert!(xfer.cursor.is_free());
    }

    #[test]
    fn test_empty_write_stops_after_address() {
        let sim = SimTwi::new(0x50);
        let mut link = link(&sim);
        let mut xfer = Transfer::new();
        xfer.cursor.stage(Block::Tx(&[])).unwrap();

        run(&mut link, &mut xfer, State::SendAddressWrite);

        assert_eq!(
            sim.events().as_slice(),
            &[BusEvent::Start(0xA0), BusEvent::Stop]
        );
    }

    #[test]
    fn test_restart_read_has_no_stop_between_phases() {
        let sim = SimTwi::new(0x50);
        sim.load(0x0100, &[0xDE, 0xAD]);
        let mut link = link(&sim);

        let pointer = [0x01, 0x00];
        let mut buf = [0u8; 2];
        {
            let mut xfer = Transfer::new();
            xfer.cursor.stage(Block::Tx(&pointer)).unwrap();
            xfer.set_callback(Some(Callback::Chain(
                Block::Rx(&mut buf),
                Directive::RestartRead,
            )));
            run(&mut link, &mut xfer, State::SendAddressWrite);
        }

        assert_eq!(buf, [0xDE, 0xAD]);
        assert_eq!(
            sim.events().as_slice(),
            &[
                BusEvent::Start(0xA0),
                BusEvent::Write(0x01),
                BusEvent::Write(0x00),
                BusEvent::Restart(0xA1),
                BusEvent::Read(0xDE),
                BusEvent::Read(0xAD),
                BusEvent::Stop,
            ]
        );
    }

    #[test]
    fn test_restart_write_after_read() {
        let sim = SimTwi::new(0x50);
        sim.load(0x0000, &[0x42]);
        let mut link = link(&sim);

        let mut status = [0u8; 1];
        let update = [0x00, 0x05, 0x99];
        {
            let mut xfer = Transfer::new();
            xfer.cursor.stage(Block::Rx(&mut status)).unwrap();
            xfer.set_callback(Some(Callback::Chain(
                Block::Tx(&update),
                Directive::RestartWrite,
            )));
            run(&mut link, &mut xfer, State::SendAddressRead);
        }

        assert_eq!(status, [0x42]);
        assert_eq!(link.state, State::Idle);
        assert_eq!(link.error, None);
        assert_eq!(
            sim.events().as_slice(),
            &[
                BusEvent::Start(0xA1),
                BusEvent::Read(0x42),
                BusEvent::Restart(0xA0),
                BusEvent::Write(0x00),
                BusEvent::Write(0x05),
                BusEvent::Write(0x99),
                BusEvent::Stop,
            ]
        );
        assert_eq!(sim.peek(0x0005), 0x99);
    }

    #[test]
    fn test_address_nack_overrides_schedule() {
        let sim = SimTwi::new(0x50);
        sim.set_present(false);
        let mut link = link(&sim);
        let data = [0x00, 0x00, 0x01];
        let mut xfer = Transfer::new();
        xfer.cursor.stage(Block::Tx(&data)).unwrap();

        run(&mut link, &mut xfer, State::SendAddressWrite);

        assert_eq!(link.state, State::Reset);
        assert_eq!(link.error, Some(Error::AddressNack));
        assert_eq!(xfer.cursor.remaining(), 3);
        assert_eq!(sim.events().last(), Some(&BusEvent::Stop));
    }

    #[test]
    fn test_data_nack_ends_quietly() {
        let sim = SimTwi::new(0x50);
        let mut link = link(&sim);
        let data = [0x00, 0x00, 0x01, 0x02];
        let mut xfer = Transfer::new();
        xfer.cursor.stage(Block::Tx(&data)).unwrap();

        sim.inject(SimFault::DataNack);
        run(&mut link, &mut xfer, State::SendAddressWrite);

        assert_eq!(link.state, State::Idle);
        assert_eq!(link.error, None);
        assert_eq!(
            sim.events().as_slice(),
            &[BusEvent::Start(0xA0), BusEvent::Write(0x00), BusEvent::Stop]
        );
    }

    #[test]
    fn test_arbitration_loss_recovers() {
        let sim = SimTwi::new(0x50);
        let mut link = link(&sim);
        let data = [0x00];
        let mut xfer = Transfer::new();
        xfer.cursor.stage(Block::Tx(&data)).unwrap();

        sim.inject(SimFault::ArbitrationLost);
        run(&mut link, &mut xfer, State::SendAddressWrite);

        assert_eq!(link.state, State::Reset);
        assert_eq!(link.error, Some(Error::ArbitrationLost));
        assert_eq!(sim.recoveries(), 1);
        assert!(!link.hw.status().arbitration_lost);
    }

    #[test]
    fn test_bus_error_recovers() {
        let sim = SimTwi::new(0x50);
        let mut link = link(&sim);
        let mut buf = [0u8; 1];
        {
            let mut xfer = Transfer::new();
            xfer.cursor.stage(Block::Rx(&mut buf)).unwrap();
            sim.inject(SimFault::BusError);
            run(&mut link, &mut xfer, State::SendAddressRead);
        }

        assert_eq!(link.state, State::Reset);
        assert_eq!(link.error, Some(Error::Bus));
        assert_eq!(sim.recoveries(), 1);
    }

    #[test]
    fn test_continue_after_receive_keeps_reading() {
        let sim = SimTwi::new(0x50);
        sim.load(0x0000, &[1, 2, 3]);
        let mut link = link(&sim);

        let mut head = [0u8; 1];
        let mut tail = [0u8; 2];
        {
            let mut xfer = Transfer::new();
            xfer.cursor.stage(Block::Rx(&mut head)).unwrap();
            xfer.set_callback(Some(Callback::Chain(
                Block::Rx(&mut tail),
                Directive::Continue,
            )));
            run(&mut link, &mut xfer, State::SendAddressRead);
        }

        assert_eq!(head, [1]);
        assert_eq!(tail, [2, 3]);
        assert_eq!(sim.events().last(), Some(&BusEvent::Stop));
    }
}
