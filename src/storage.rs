//! Implementations of the `embedded_storage` NOR flash traits on top of [`FlashSpi`].

use embedded_hal::spi::SpiDevice;
use embedded_storage::nor_flash::{ErrorType, MultiwriteNorFlash, NorFlash, ReadNorFlash};

use crate::comms::FlashSpi;
use crate::error::Error;

/// Adapter for storage crates that want byte-addressed NOR flash.
///
/// `ERASE_SIZE` must equal the chip's erase-block size; [`NorStorage::new`]
/// refuses a mismatch. Unlike the block device, erases here are explicit and
/// exact: nothing outside `[from, to)` is touched.
pub struct NorStorage<SPI, const ERASE_SIZE: u32> {
    flash: FlashSpi<SPI>,
}

impl<SPI, const ERASE_SIZE: u32> NorStorage<SPI, ERASE_SIZE>
where
    SPI: SpiDevice,
{
    pub fn new(flash: FlashSpi<SPI>) -> Result<Self, Error<SPI>> {
        if flash.geometry().erase_size() != ERASE_SIZE {
            warn!(
                "ERASE_SIZE {=u32} does not match the chip's {=u32}",
                ERASE_SIZE,
                flash.geometry().erase_size()
            );
            return Err(Error::InvalidArgument);
        }
        Ok(Self { flash })
    }

    pub fn release(self) -> FlashSpi<SPI> {
        self.flash
    }

    fn check_range(&self, offset: u32, len: usize) -> Result<(), Error<SPI>> {
        let end = offset as u64 + len as u64;
        if end > self.flash.geometry().capacity() as u64 {
            return Err(Error::CapacityExceeded);
        }
        Ok(())
    }
}

impl<SPI, const ERASE_SIZE: u32> ErrorType for NorStorage<SPI, ERASE_SIZE>
where
    SPI: SpiDevice,
{
    type Error = Error<SPI>;
}

impl<SPI, const ERASE_SIZE: u32> ReadNorFlash for NorStorage<SPI, ERASE_SIZE>
where
    SPI: SpiDevice,
{
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check_range(offset, bytes.len())?;
        self.flash.read_linear(offset, bytes)?;
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.flash.geometry().capacity() as usize
    }
}

impl<SPI, const ERASE_SIZE: u32> NorFlash for NorStorage<SPI, ERASE_SIZE>
where
    SPI: SpiDevice,
{
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = ERASE_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from > to || from % ERASE_SIZE != 0 || to % ERASE_SIZE != 0 {
            return Err(Error::InvalidArgument);
        }
        self.check_range(from, (to - from) as usize)?;

        let mut addr = from;
        while addr < to {
            self.flash.erase_block(addr)?;
            addr += ERASE_SIZE;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.check_range(offset, bytes.len())?;
        self.flash.write_buffer(offset, bytes)?;
        Ok(())
    }
}

/// Programming only ever clears bits, so rewriting a word without an erase is
/// safe as long as the caller only clears more bits.
impl<SPI: SpiDevice, const ERASE_SIZE: u32> MultiwriteNorFlash for NorStorage<SPI, ERASE_SIZE> {}
