//! `embedded-hal-async` I2C on top of the engine
//!
//! Lets drivers written against [`embedded_hal_async::i2c::I2c`] share
//! the bus. A transaction's operations are walked by a completion
//! handler: consecutive operations in the same direction continue the
//! current phase, a change of direction issues a repeated START.

use core::slice::IterMut;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::i2c::{ErrorType, I2c, Operation, SevenBitAddress};
use twine_hal::TwiMaster;

use crate::engine::Direction;
use crate::error::Error;
use crate::session::I2cBus;
use crate::transfer::{Block, Callback, Completion, Directive, Staging};

/// A handle implementing `embedded_hal_async::i2c::I2c`
pub struct I2cDevice<'a, M: RawMutex, T: TwiMaster> {
    bus: &'a I2cBus<M, T>,
}

impl<'a, M: RawMutex, T: TwiMaster> I2cDevice<'a, M, T> {
    pub fn new(bus: &'a I2cBus<M, T>) -> Self {
        Self { bus }
    }
}

impl<M: RawMutex, T: TwiMaster> ErrorType for I2cDevice<'_, M, T> {
    type Error = Error;
}

impl<M: RawMutex, T: TwiMaster> I2c<SevenBitAddress> for I2cDevice<'_, M, T> {
    async fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Error> {
        let mut walker = Walker {
            ops: operations.iter_mut(),
            last: Direction::Write,
        };
        let first = walker.next_block();
        if let Some((_, direction)) = &first {
            walker.last = *direction;
        }

        let mut session = self.bus.open(address).await;
        let direction = match first {
            Some((block, direction)) => {
                session.set_buffer(block)?;
                direction
            }
            // No data at all: address-only probe
            None => Direction::Write,
        };
        session.set_completion_callback(Some(Callback::Custom(&mut walker)))?;
        session.start(direction)?;
        session.close().await
    }
}

struct Walker<'o, 'p> {
    ops: IterMut<'o, Operation<'p>>,
    last: Direction,
}

impl<'o> Walker<'o, '_> {
    // Empty operations carry no bytes and are skipped
    fn next_block(&mut self) -> Option<(Block<'o>, Direction)> {
        for op in self.ops.by_ref() {
            let (block, direction) = match op {
                Operation::Read(buf) => (Block::Rx(&mut **buf), Direction::Read),
                Operation::Write(bytes) => (Block::Tx(*bytes), Direction::Write),
            };
            if !block.is_empty() {
                return Some((block, direction));
            }
        }
        None
    }
}

impl<'b, 'o: 'b, 'p: 'o> Completion<'b> for Walker<'o, 'p> {
    fn complete(&mut self, staging: &mut Staging<'_, 'b>) -> Directive {
        let Some((block, direction)) = self.next_block() else {
            return Directive::Stop;
        };
        if staging.set_buffer(block).is_err() {
            return Directive::Stop;
        }

        let directive = match (self.last, direction) {
            (Direction::Write, Direction::Write) | (Direction::Read, Direction::Read) => {
                Directive::Continue
            }
            (Direction::Read, Direction::Write) => Directive::RestartWrite,
            (Direction::Write, Direction::Read) => Directive::RestartRead,
        };
        self.last = direction;
        directive
    }
}
