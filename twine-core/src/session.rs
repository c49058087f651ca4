//! Transfer sessions
//!
//! [`I2cBus`] owns the controller and hands out one [`Session`] at a time.
//! A session stages data, starts transactions and collects the outcome:
//!
//! ```text
//! open ──▶ set_buffer / set_completion_callback ──▶ start ──▶ close
//!   ▲                                                           │
//!   └──────────────── bus released, next waiter woken ◀─────────┘
//! ```
//!
//! The controller event source is polled from the task that holds the
//! session: [`Session::wait`] and [`Session::close`] service events until
//! the transaction is no longer busy.

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use twine_hal::{I2cConfig, TwiMaster};

use crate::device::I2cDevice;
use crate::engine::{Direction, Link, State};
use crate::error::Error;
use crate::transfer::{Block, Callback, Transfer};

/// A two-wire bus with exclusive session access
pub struct I2cBus<M: RawMutex, T: TwiMaster> {
    link: Mutex<M, RefCell<Link<T>>>,
}

impl<M: RawMutex, T: TwiMaster> I2cBus<M, T> {
    /// Configure the controller and wrap it
    pub fn new(mut hw: T, config: I2cConfig) -> Self {
        hw.configure(&config);
        debug!("i2c: bus configured at {} Hz", config.frequency);
        Self {
            link: Mutex::new(RefCell::new(Link::new(hw))),
        }
    }

    pub(crate) fn with_link<R>(&self, f: impl FnOnce(&mut Link<T>) -> R) -> R {
        self.link.lock(|link| f(&mut *link.borrow_mut()))
    }

    /// Open a session for `slave` if the bus is free
    pub fn try_open<'b>(&self, slave: u8) -> Result<Session<'_, 'b, M, T>, Error> {
        self.with_link(|link| {
            if link.flags.in_use {
                return Err(Error::Busy);
            }
            link.acquire(slave);
            Ok(())
        })?;
        debug!("i2c: session opened for {}", slave);
        Ok(Session::new(self))
    }

    /// Open a session for `slave`, waiting for the current holder to close
    pub async fn open<'b>(&self, slave: u8) -> Session<'_, 'b, M, T> {
        poll_fn(|cx| {
            self.with_link(|link| {
                if link.flags.in_use {
                    link.waiters.register(cx.waker());
                    Poll::Pending
                } else {
                    link.acquire(slave);
                    Poll::Ready(())
                }
            })
        })
        .await;
        debug!("i2c: session opened for {}", slave);
        Session::new(self)
    }

    /// An `embedded-hal-async` view of this bus
    pub fn device(&self) -> I2cDevice<'_, M, T> {
        I2cDevice::new(self)
    }

    /// Current engine state
    pub fn state(&self) -> State {
        self.with_link(|link| link.state)
    }

    /// Whether a transaction is in flight
    pub fn is_busy(&self) -> bool {
        self.with_link(|link| link.flags.busy)
    }

    /// Whether a session currently holds the bus
    pub fn is_open(&self) -> bool {
        self.with_link(|link| link.flags.in_use)
    }
}

/// Exclusive access to the bus for one slave
///
/// Dropping an open session releases the bus. If a transaction is still
/// in flight it is abandoned and the controller is recovered.
pub struct Session<'a, 'b, M: RawMutex, T: TwiMaster> {
    bus: &'a I2cBus<M, T>,
    xfer: Transfer<'b>,
    outcome: Option<Result<(), Error>>,
}

impl<'a, 'b, M: RawMutex, T: TwiMaster> Session<'a, 'b, M, T> {
    fn new(bus: &'a I2cBus<M, T>) -> Self {
        Self {
            bus,
            xfer: Transfer::new(),
            outcome: None,
        }
    }

    /// Stage the block for the next data phase
    ///
    /// Fails with [`Error::Busy`] while a previously staged block has not
    /// been consumed.
    pub fn set_buffer(&mut self, block: Block<'b>) -> Result<(), Error> {
        if self.outcome.is_some() {
            return Err(Error::Closed);
        }
        self.xfer.cursor.stage(block)
    }

    /// Install the completion callback; `None` installs [`Callback::Stop`]
    ///
    /// Fails with [`Error::Busy`] while a transaction is in flight.
    pub fn set_completion_callback(
        &mut self,
        callback: Option<Callback<'b>>,
    ) -> Result<(), Error> {
        if self.outcome.is_some() {
            return Err(Error::Closed);
        }
        if self.is_busy() {
            return Err(Error::Busy);
        }
        self.xfer.set_callback(callback);
        Ok(())
    }

    /// Whether a new block may be staged
    pub fn is_buffer_free(&self) -> bool {
        self.xfer.cursor.is_free()
    }

    /// Bytes left in the staged block
    pub fn remaining(&self) -> usize {
        self.xfer.cursor.remaining()
    }

    /// Whether a transaction is in flight
    pub fn is_busy(&self) -> bool {
        self.bus.is_busy()
    }

    /// Begin a transaction in `direction`
    ///
    /// Issues the START and address byte immediately; the rest of the
    /// transaction advances as controller events are serviced.
    pub fn start(&mut self, direction: Direction) -> Result<(), Error> {
        if self.outcome.is_some() {
            return Err(Error::Closed);
        }
        let xfer = &mut self.xfer;
        self.bus.with_link(|link| {
            if link.flags.busy {
                return Err(Error::Busy);
            }
            link.flags.busy = true;
            let first = match direction {
                Direction::Write => State::SendAddressWrite,
                Direction::Read => State::SendAddressRead,
            };
            link.state = link.transition(first, xfer);
            Ok(())
        })
    }

    /// Service controller events until the transaction is no longer busy
    pub async fn wait(&mut self) {
        let Self { bus, xfer, .. } = self;
        poll_fn(|cx| {
            bus.with_link(|link| {
                while link.flags.busy {
                    if link.hw.poll_event(cx).is_pending() {
                        return Poll::Pending;
                    }
                    link.service(xfer);
                }
                Poll::Ready(())
            })
        })
        .await
    }

    /// Release the bus if no transaction is in flight
    ///
    /// Returns the outcome of the last transaction. Fails with
    /// [`Error::Busy`] while a transaction is in flight. Closing an
    /// already-closed session returns the same outcome again.
    pub fn try_close(&mut self) -> Result<(), Error> {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        let released = self
            .bus
            .with_link(|link| (!link.flags.busy).then(|| link.release()));
        match released {
            Some(outcome) => {
                debug!("i2c: session closed");
                self.outcome = Some(outcome);
                outcome
            }
            None => Err(Error::Busy),
        }
    }

    /// Finish any in-flight transaction, release the bus and report its outcome
    pub async fn close(mut self) -> Result<(), Error> {
        self.wait().await;
        self.try_close()
    }
}

impl<M: RawMutex, T: TwiMaster> Drop for Session<'_, '_, M, T> {
    fn drop(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        self.bus.with_link(|link| {
            if link.flags.busy {
                warn!("i2c: session dropped with a transaction in flight");
                link.abort();
            }
            let _ = link.release();
        });
    }
}
