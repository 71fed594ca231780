//! Byte transport between the MCU's SPI peripheral and the flash chip.
//!
//! [`Transport`] owns the bus and the chip-select pin and turns them into an
//! [`SpiDevice`], which is what [`FlashSpi`](crate::FlashSpi) talks to. Boards
//! that already have an `SpiDevice` (for example from `embedded-hal-bus`) can
//! skip this module entirely.

use core::fmt::Debug;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{self, ErrorKind, ErrorType, Operation, SpiBus, SpiDevice};

/// Dummy byte clocked out while reading.
pub const DUMMY: u8 = 0xFF;

/// Failure on either the data lines or the chip-select pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError<B, P> {
    Bus(B),
    ChipSelect(P),
}

impl<B, P> spi::Error for TransportError<B, P>
where
    B: spi::Error,
    P: Debug,
{
    fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Bus(e) => e.kind(),
            TransportError::ChipSelect(_) => ErrorKind::ChipSelectFault,
        }
    }
}

/// Exclusive owner of one SPI bus and the chip select of one flash chip.
pub struct Transport<BUS, CS, D> {
    bus: BUS,
    cs: CS,
    delay: D,
}

impl<BUS, CS, D> Debug for Transport<BUS, CS, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transport").finish()
    }
}

impl<BUS, CS, D> Transport<BUS, CS, D>
where
    BUS: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    /// Takes the bus and drives chip select high (idle) straight away.
    pub fn new(
        bus: BUS,
        mut cs: CS,
        delay: D,
    ) -> Result<Self, TransportError<BUS::Error, CS::Error>> {
        cs.set_high().map_err(TransportError::ChipSelect)?;
        Ok(Self { bus, cs, delay })
    }

    /// Give back the bus, the pin and the delay.
    pub fn release(self) -> (BUS, CS, D) {
        (self.bus, self.cs, self.delay)
    }

    /// Assert chip select.
    pub fn select(&mut self) -> Result<(), TransportError<BUS::Error, CS::Error>> {
        self.cs.set_low().map_err(TransportError::ChipSelect)
    }

    /// Deassert chip select once everything queued has left the shifter.
    pub fn deselect(&mut self) -> Result<(), TransportError<BUS::Error, CS::Error>> {
        let flushed = self.bus.flush().map_err(TransportError::Bus);
        let released = self.cs.set_high().map_err(TransportError::ChipSelect);
        flushed.and(released)
    }

    /// Exchange one byte full duplex.
    pub fn transfer_byte(&mut self, tx: u8) -> Result<u8, TransportError<BUS::Error, CS::Error>> {
        let mut word = [tx];
        self.bus
            .transfer_in_place(&mut word)
            .map_err(TransportError::Bus)?;
        Ok(word[0])
    }

    /// Shift `buf` out and discard whatever comes back.
    ///
    /// Returns only after the last bit is on the wire, so releasing chip
    /// select right afterwards does not truncate the final byte.
    pub fn write_bytes(
        &mut self,
        buf: &[u8],
    ) -> Result<(), TransportError<BUS::Error, CS::Error>> {
        self.bus.write(buf).map_err(TransportError::Bus)?;
        self.bus.flush().map_err(TransportError::Bus)
    }

    /// Clock [`DUMMY`] bytes out to pull `buf.len()` bytes in.
    pub fn read_bytes(
        &mut self,
        buf: &mut [u8],
    ) -> Result<(), TransportError<BUS::Error, CS::Error>> {
        buf.fill(DUMMY);
        self.bus
            .transfer_in_place(buf)
            .map_err(TransportError::Bus)
    }

    fn run(
        &mut self,
        operations: &mut [Operation<'_, u8>],
    ) -> Result<(), TransportError<BUS::Error, CS::Error>> {
        for op in operations {
            match op {
                Operation::Read(buf) => self.read_bytes(buf)?,
                Operation::Write(buf) => self.write_bytes(buf)?,
                Operation::Transfer(read, write) => {
                    self.bus.transfer(read, write).map_err(TransportError::Bus)?
                }
                Operation::TransferInPlace(buf) => self
                    .bus
                    .transfer_in_place(buf)
                    .map_err(TransportError::Bus)?,
                Operation::DelayNs(ns) => {
                    self.bus.flush().map_err(TransportError::Bus)?;
                    self.delay.delay_ns(*ns);
                }
            }
        }
        Ok(())
    }
}

impl<BUS, CS, D> ErrorType for Transport<BUS, CS, D>
where
    BUS: SpiBus,
    CS: OutputPin,
{
    type Error = TransportError<BUS::Error, CS::Error>;
}

impl<BUS, CS, D> SpiDevice for Transport<BUS, CS, D>
where
    BUS: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        self.select()?;
        let result = self.run(operations);
        // Release chip select even when the body failed.
        let released = self.deselect();
        result?;
        released
    }
}
