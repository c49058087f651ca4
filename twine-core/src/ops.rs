//! Convenience transfers
//!
//! One-call helpers for the two common register layouts: devices with a
//! one-byte command register and devices (memories) with a 16-bit
//! address pointer. Every helper opens a session, runs one transaction
//! and closes again. Multi-byte values travel big-endian.

use embassy_sync::blocking_mutex::raw::RawMutex;
use twine_hal::TwiMaster;

use crate::engine::Direction;
use crate::error::Error;
use crate::session::I2cBus;
use crate::transfer::{Block, Callback, Directive};

impl<M: RawMutex, T: TwiMaster> I2cBus<M, T> {
    /// Write `bytes` to `slave` in one transaction
    pub async fn write(&self, slave: u8, bytes: &[u8]) -> Result<(), Error> {
        let mut session = self.open(slave).await;
        session.set_buffer(Block::Tx(bytes))?;
        session.start(Direction::Write)?;
        session.close().await
    }

    /// Read `buf.len()` bytes from `slave` in one transaction
    pub async fn read(&self, slave: u8, buf: &mut [u8]) -> Result<(), Error> {
        let mut session = self.open(slave).await;
        session.set_buffer(Block::Rx(buf))?;
        session.start(Direction::Read)?;
        session.close().await
    }

    /// Write `prefix` followed by `data` without a repeated START between them
    pub async fn write_prefixed(&self, slave: u8, prefix: &[u8], data: &[u8]) -> Result<(), Error> {
        let mut session = self.open(slave).await;
        session.set_completion_callback(Some(Callback::Chain(
            Block::Tx(data),
            Directive::Continue,
        )))?;
        session.set_buffer(Block::Tx(prefix))?;
        session.start(Direction::Write)?;
        session.close().await
    }

    /// Write `prefix`, then repeated-START and read into `buf`
    pub async fn read_prefixed(
        &self,
        slave: u8,
        prefix: &[u8],
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let mut session = self.open(slave).await;
        session.set_completion_callback(Some(Callback::Chain(
            Block::Rx(buf),
            Directive::RestartRead,
        )))?;
        session.set_buffer(Block::Tx(prefix))?;
        session.start(Direction::Write)?;
        session.close().await
    }

    /// Send the single command byte `cmd`
    pub async fn write_command(&self, slave: u8, cmd: u8) -> Result<(), Error> {
        self.write(slave, &[cmd]).await
    }

    /// Write one byte to command register `cmd`
    pub async fn write_cmd_u8(&self, slave: u8, cmd: u8, data: u8) -> Result<(), Error> {
        self.write_prefixed(slave, &[cmd], &[data]).await
    }

    /// Write a big-endian word to command register `cmd`
    pub async fn write_cmd_u16(&self, slave: u8, cmd: u8, data: u16) -> Result<(), Error> {
        self.write_prefixed(slave, &[cmd], &data.to_be_bytes()).await
    }

    /// Write a raw block; the first byte is usually the register
    pub async fn write_block(&self, slave: u8, bytes: &[u8]) -> Result<(), Error> {
        self.write(slave, bytes).await
    }

    /// Read one byte from command register `cmd`
    pub async fn read_cmd_u8(&self, slave: u8, cmd: u8) -> Result<u8, Error> {
        let mut buf = [0u8; 1];
        self.read_prefixed(slave, &[cmd], &mut buf).await?;
        Ok(buf[0])
    }

    /// Read a big-endian word from command register `cmd`
    pub async fn read_cmd_u16(&self, slave: u8, cmd: u8) -> Result<u16, Error> {
        let mut buf = [0u8; 2];
        self.read_prefixed(slave, &[cmd], &mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Read `buf.len()` bytes starting at command register `cmd`
    pub async fn read_cmd_block(&self, slave: u8, cmd: u8, buf: &mut [u8]) -> Result<(), Error> {
        self.read_prefixed(slave, &[cmd], buf).await
    }

    /// Write one byte at the 16-bit `address`
    pub async fn write_address_u8(&self, slave: u8, address: u16, data: u8) -> Result<(), Error> {
        self.write_prefixed(slave, &address.to_be_bytes(), &[data]).await
    }

    /// Write a big-endian word at the 16-bit `address`
    pub async fn write_address_u16(&self, slave: u8, address: u16, data: u16) -> Result<(), Error> {
        self.write_prefixed(slave, &address.to_be_bytes(), &data.to_be_bytes())
            .await
    }

    /// Write `data` starting at the 16-bit `address`
    ///
    /// Memories wrap writes at their page boundary; keep `data` inside one
    /// page or use a page-aware driver.
    pub async fn write_address_block(
        &self,
        slave: u8,
        address: u16,
        data: &[u8],
    ) -> Result<(), Error> {
        self.write_prefixed(slave, &address.to_be_bytes(), data).await
    }

    /// Read one byte from the 16-bit `address`
    pub async fn read_address_u8(&self, slave: u8, address: u16) -> Result<u8, Error> {
        let mut buf = [0u8; 1];
        self.read_prefixed(slave, &address.to_be_bytes(), &mut buf)
            .await?;
        Ok(buf[0])
    }

    /// Read a big-endian word from the 16-bit `address`
    pub async fn read_address_u16(&self, slave: u8, address: u16) -> Result<u16, Error> {
        let mut buf = [0u8; 2];
        self.read_prefixed(slave, &address.to_be_bytes(), &mut buf)
            .await?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Sequential read of `buf.len()` bytes from the 16-bit `address`
    pub async fn read_address_block(
        &self,
        slave: u8,
        address: u16,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        self.read_prefixed(slave, &address.to_be_bytes(), buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use proptest::prelude::*;
    use twine_hal::sim::{BusEvent, SimTwi};
    use twine_hal::I2cConfig;

    fn bus(sim: &SimTwi) -> I2cBus<NoopRawMutex, &SimTwi> {
        I2cBus::new(sim, I2cConfig::STANDARD)
    }

    #[test]
    fn test_write_cmd_u16_is_big_endian() {
        let sim = SimTwi::new(0x50);
        let bus = bus(&sim);

        block_on(bus.write_cmd_u16(0x50, 0x07, 0xBEEF)).unwrap();

        assert_eq!(
            sim.events().as_slice(),
            &[
                BusEvent::Start(0xA0),
                BusEvent::Write(0x07),
                BusEvent::Write(0xBE),
                BusEvent::Write(0xEF),
                BusEvent::Stop,
            ]
        );
    }

    #[test]
    fn test_write_command_single_byte() {
        let sim = SimTwi::new(0x50);
        let bus = bus(&sim);

        block_on(bus.write_command(0x50, 0x3C)).unwrap();

        assert_eq!(
            sim.events().as_slice(),
            &[BusEvent::Start(0xA0), BusEvent::Write(0x3C), BusEvent::Stop]
        );
    }

    #[test]
    fn test_read_cmd_u8_shape() {
        let sim = SimTwi::new(0x50);
        let bus = bus(&sim);

        let value = block_on(bus.read_cmd_u8(0x50, 0x01)).unwrap();

        let events = sim.events();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], BusEvent::Start(0xA0));
        assert_eq!(events[1], BusEvent::Write(0x01));
        assert_eq!(events[2], BusEvent::Restart(0xA1));
        assert_eq!(events[3], BusEvent::Read(value));
        assert_eq!(events[4], BusEvent::Stop);
    }

    #[test]
    fn test_address_word_round_trip() {
        let sim = SimTwi::new(0x50);
        let bus = bus(&sim);

        block_on(bus.write_address_u16(0x50, 0x0100, 0xAA55)).unwrap();
        assert_eq!(sim.peek(0x0100), 0xAA);
        assert_eq!(sim.peek(0x0101), 0x55);

        sim.advance_ns(5_000_000);
        assert_eq!(block_on(bus.read_address_u16(0x50, 0x0100)), Ok(0xAA55));
    }

    #[test]
    fn test_read_address_block() {
        let sim = SimTwi::new(0x50);
        sim.load(0x7FF0, b"twine");
        let bus = bus(&sim);

        let mut buf = [0u8; 5];
        block_on(bus.read_address_block(0x50, 0x7FF0, &mut buf)).unwrap();
        assert_eq!(&buf, b"twine");
        assert_eq!(block_on(bus.read_address_u8(0x50, 0x7FF2)), Ok(b'i'));
    }

    #[test]
    fn test_write_during_write_cycle_nacks() {
        let sim = SimTwi::new(0x50);
        let bus = bus(&sim);

        block_on(bus.write_address_u8(0x50, 0x0000, 0x01)).unwrap();
        assert_eq!(
            block_on(bus.write_address_u8(0x50, 0x0200, 0x02)),
            Err(Error::AddressNack)
        );
        assert!(!bus.is_open());
    }

    #[test]
    fn test_plain_read() {
        let sim = SimTwi::new(0x50);
        sim.load(0x0000, &[4, 5, 6]);
        let bus = bus(&sim);

        let mut buf = [0u8; 3];
        block_on(bus.read(0x50, &mut buf)).unwrap();
        assert_eq!(buf, [4, 5, 6]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_address_block_round_trip(
            page in 0u16..512,
            offset in 0u16..128,
            data in proptest::collection::vec(any::<u8>(), 1..128),
        ) {
            // Stay inside one 128-byte page so the device never wraps
            let len = data.len().min((128 - offset) as usize);
            let data = &data[..len];
            let address = page * 128 + offset;

            let sim = SimTwi::new(0x50);
            let bus = bus(&sim);
            prop_assert!(block_on(bus.write_address_block(0x50, address, data)).is_ok());
            sim.advance_ns(5_000_000);

            let mut back = std::vec![0u8; len];
            prop_assert!(block_on(bus.read_address_block(0x50, address, &mut back)).is_ok());
            prop_assert_eq!(&back[..], data);
        }
    }
}
