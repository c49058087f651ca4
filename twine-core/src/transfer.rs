//! Data buffers and the completion (continuation) protocol
//!
//! Each data phase consumes one staged [`Block`]. When the block is
//! exhausted the engine marks it free and runs the session's
//! [`Callback`], which may stage the next block, replace itself, and
//! returns a [`Directive`] telling the engine how to go on.

use core::mem;

use crate::error::Error;

/// What the engine does once a data block is exhausted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Directive {
    /// End the transaction
    #[default]
    Stop,
    /// Repeated START, then write the newly staged block
    RestartWrite,
    /// Repeated START, then read into the newly staged block
    RestartRead,
    /// Keep going in the same direction with the newly staged block
    Continue,
}

/// A data block for one phase
#[derive(Debug)]
pub enum Block<'b> {
    /// Bytes to transmit
    Tx(&'b [u8]),
    /// Storage for received bytes
    Rx(&'b mut [u8]),
}

impl Block<'_> {
    pub fn len(&self) -> usize {
        match self {
            Block::Tx(bytes) => bytes.len(),
            Block::Rx(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn byte(&self, index: usize) -> Option<u8> {
        match self {
            Block::Tx(bytes) => bytes.get(index).copied(),
            Block::Rx(bytes) => bytes.get(index).copied(),
        }
    }

    // Receiving into a Tx block discards the byte
    fn put(&mut self, index: usize, byte: u8) {
        if let Block::Rx(bytes) = self {
            if let Some(slot) = bytes.get_mut(index) {
                *slot = byte;
            }
        }
    }
}

/// A user completion handler
///
/// Invoked in engine context each time a data block is exhausted. The
/// handler may stage the next block and replace the session callback
/// through `staging`; the returned directive decides what the engine
/// does next.
///
/// Handlers that hand out blocks borrowed for longer than the session
/// should be generic over the session lifetime:
///
/// ```
/// use twine_core::{Block, Completion, Directive, Staging};
///
/// struct Tail<'d>(Option<&'d [u8]>);
///
/// impl<'b, 'd: 'b> Completion<'b> for Tail<'d> {
///     fn complete(&mut self, staging: &mut Staging<'_, 'b>) -> Directive {
///         match self.0.take() {
///             Some(bytes) if staging.set_buffer(Block::Tx(bytes)).is_ok() => Directive::Continue,
///             _ => Directive::Stop,
///         }
///     }
/// }
/// ```
pub trait Completion<'b> {
    fn complete(&mut self, staging: &mut Staging<'_, 'b>) -> Directive;
}

/// Session completion callback
#[derive(Default)]
pub enum Callback<'b> {
    /// Always end the transaction
    #[default]
    Stop,
    /// Stage the block once, then fall back to [`Callback::Stop`]
    Chain(Block<'b>, Directive),
    /// Run a user handler; it stays installed until it replaces itself
    Custom(&'b mut dyn Completion<'b>),
}

/// Access a completion handler has to the session while it runs
pub struct Staging<'x, 'b> {
    cursor: &'x mut Cursor<'b>,
    next: Option<Callback<'b>>,
}

impl<'b> Staging<'_, 'b> {
    /// Stage the block for the next data phase
    ///
    /// Fails with [`Error::Busy`] if a block has already been staged
    /// during this completion.
    pub fn set_buffer(&mut self, block: Block<'b>) -> Result<(), Error> {
        self.cursor.stage(block)
    }

    /// Replace the session callback; `None` installs [`Callback::Stop`]
    pub fn set_callback(&mut self, callback: Option<Callback<'b>>) {
        self.next = Some(callback.unwrap_or_default());
    }

    /// Bytes left in the currently staged block
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }
}

/// Read/write position within the staged block
#[derive(Debug)]
pub(crate) struct Cursor<'b> {
    block: Block<'b>,
    position: usize,
    free: bool,
}

impl<'b> Cursor<'b> {
    pub(crate) fn new() -> Self {
        Self {
            block: Block::Tx(&[]),
            position: 0,
            free: true,
        }
    }

    pub(crate) fn stage(&mut self, block: Block<'b>) -> Result<(), Error> {
        if !self.free {
            return Err(Error::Busy);
        }
        self.block = block;
        self.position = 0;
        self.free = false;
        Ok(())
    }

    pub(crate) fn is_free(&self) -> bool {
        self.free
    }

    pub(crate) fn release(&mut self) {
        self.free = true;
    }

    pub(crate) fn remaining(&self) -> usize {
        self.block.len().saturating_sub(self.position)
    }

    pub(crate) fn next_byte(&mut self) -> Option<u8> {
        let byte = self.block.byte(self.position)?;
        self.position += 1;
        Some(byte)
    }

    /// Store a received byte; dropped if the block has no room left
    pub(crate) fn store(&mut self, byte: u8) {
        if self.position < self.block.len() {
            self.block.put(self.position, byte);
            self.position += 1;
        }
    }
}

/// The session-owned half of a transaction: staged data and callback
pub(crate) struct Transfer<'b> {
    pub(crate) cursor: Cursor<'b>,
    callback: Callback<'b>,
}

impl<'b> Transfer<'b> {
    pub(crate) fn new() -> Self {
        Self {
            cursor: Cursor::new(),
            callback: Callback::Stop,
        }
    }

    pub(crate) fn set_callback(&mut self, callback: Option<Callback<'b>>) {
        self.callback = callback.unwrap_or_default();
    }

    /// Run the completion callback for an exhausted block
    pub(crate) fn complete(&mut self) -> Directive {
        let callback = mem::take(&mut self.callback);
        let mut staging = Staging {
            cursor: &mut self.cursor,
            next: None,
        };

        let (directive, kept) = match callback {
            Callback::Stop => (Directive::Stop, Callback::Stop),
            Callback::Chain(block, directive) => {
                let directive = match staging.set_buffer(block) {
                    Ok(()) => directive,
                    Err(_) => Directive::Stop,
                };
                (directive, Callback::Stop)
            }
            Callback::Custom(handler) => {
                let directive = handler.complete(&mut staging);
                (directive, Callback::Custom(handler))
            }
        };

        self.callback = staging.next.take().unwrap_or(kept);
        directive
    }
}
