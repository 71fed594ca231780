//! Block-device glue between a sector-addressed filesystem and the flash.
//!
//! Logical sectors are 512 bytes and map linearly onto the chip
//! (`address = sector * 512`). Writes erase first: the written byte range is
//! rounded outward to erase-block boundaries, so on a chip with 4 KiB erase
//! blocks every write also wipes the other sectors sharing those blocks.
//! Filesystems should use [`IoctlCommand::GetBlockSize`] as their allocation
//! unit to keep that from touching live data.

use core::cell::RefCell;
use core::fmt::Debug;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::spi::SpiDevice;

use crate::comms::FlashSpi;
use crate::error::Error;
use crate::geometry::{Geometry, LOGICAL_SECTOR_SIZE};
use crate::identification::Identification;
use crate::traits::DiskIo;

/// Drive state as reported to the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiskStatus {
    NotInitialized,
    Ready,
}

/// Control codes, numbered as FatFs numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum IoctlCommand {
    /// Wait until no program or erase is pending.
    Sync = 0,
    /// Number of logical sectors on the drive.
    GetSectorCount = 1,
    /// Logical sector size in bytes.
    GetSectorSize = 2,
    /// Erase block size in logical sectors.
    GetBlockSize = 3,
}

impl TryFrom<u8> for IoctlCommand {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        match code {
            0 => Ok(IoctlCommand::Sync),
            1 => Ok(IoctlCommand::GetSectorCount),
            2 => Ok(IoctlCommand::GetSectorSize),
            3 => Ok(IoctlCommand::GetBlockSize),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoctlResponse {
    Synced,
    SectorCount(u32),
    SectorSize(u16),
    BlockSize(u32),
}

struct Inner<SPI> {
    flash: FlashSpi<SPI>,
    status: DiskStatus,
}

impl<SPI: SpiDevice> Inner<SPI> {
    fn ensure_ready(&self) -> Result<(), Error<SPI>> {
        match self.status {
            DiskStatus::Ready => Ok(()),
            DiskStatus::NotInitialized => Err(Error::NotReady),
        }
    }

    /// Read the chip's identity once it has finished whatever it was doing.
    fn probe(&mut self) -> Result<Identification, Error<SPI>> {
        self.flash.wait_ready()?;
        self.flash.read_identity()
    }
}

/// A W25Q chip presented as a 512-byte-sector block device.
///
/// Every entry point holds the lock for its whole duration, so commands from
/// different tasks never interleave on the bus. Pick `M` to suit the caller:
/// `CriticalSectionRawMutex` when several tasks or interrupts share the
/// device, `NoopRawMutex` when only one context ever touches it.
pub struct BlockDevice<M: RawMutex, SPI> {
    geometry: Geometry,
    inner: Mutex<M, RefCell<Inner<SPI>>>,
}

impl<M: RawMutex, SPI> Debug for BlockDevice<M, SPI> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockDevice")
            .field("geometry", &self.geometry)
            .finish()
    }
}

impl<M, SPI> BlockDevice<M, SPI>
where
    M: RawMutex,
    SPI: SpiDevice,
{
    /// Starts out [`DiskStatus::NotInitialized`]; nothing is sent to the chip
    /// until [`initialize`](Self::initialize).
    pub fn new(flash: FlashSpi<SPI>) -> Self {
        Self {
            geometry: *flash.geometry(),
            inner: Mutex::new(RefCell::new(Inner {
                flash,
                status: DiskStatus::NotInitialized,
            })),
        }
    }

    /// Give back the protocol driver.
    pub fn release(self) -> FlashSpi<SPI> {
        self.inner.into_inner().into_inner().flash
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Run `f` against the raw driver while holding the device lock.
    ///
    /// Erasing or programming through this bypasses the block-level checks.
    ///
    /// # Panics
    ///
    /// If `f` calls back into this device. The lock is not reentrant.
    pub fn with_flash<R>(&self, f: impl FnOnce(&mut FlashSpi<SPI>) -> R) -> R {
        self.lock(|inner| f(&mut inner.flash))
    }

    fn lock<R>(&self, f: impl FnOnce(&mut Inner<SPI>) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub fn status(&self) -> DiskStatus {
        self.lock(|inner| inner.status)
    }

    /// Wait for the chip to go idle, then read the JEDEC id and compare it
    /// with the geometry's expected identity. Only an exact match makes the
    /// drive ready; a mismatch, a chip that stays busy or a bus failure leaves
    /// it not initialized, even if it was ready before.
    pub fn initialize(&self) -> DiskStatus {
        let expected = self.geometry.identity();
        self.lock(|inner| {
            inner.status = match inner.probe() {
                Ok(id) if id == expected => {
                    info!("Flash ready: {:?}", id);
                    DiskStatus::Ready
                }
                Ok(id) => {
                    warn!("Unexpected flash id {:?}, wanted {:?}", id, expected);
                    DiskStatus::NotInitialized
                }
                Err(Error::Timeout) => {
                    warn!("Flash stayed busy, not probing its id");
                    DiskStatus::NotInitialized
                }
                Err(_) => {
                    error!("Bus failure while probing flash");
                    DiskStatus::NotInitialized
                }
            };
            inner.status
        })
    }

    /// Read `count` sectors starting at `sector` into the front of `buf`.
    ///
    /// A range running past the end of the chip is cut short there and the
    /// rest of `buf` is left untouched.
    pub fn read(&self, buf: &mut [u8], sector: u32, count: u32) -> Result<(), Error<SPI>> {
        self.lock(|inner| {
            inner.ensure_ready()?;
            let len = sector_span(buf.len(), count).ok_or(Error::InvalidArgument)?;
            if len == 0 {
                return Ok(());
            }
            let addr = self.sector_address(sector)?;
            inner.flash.read_linear(addr, &mut buf[..len])?;
            Ok(())
        })
    }

    /// Write `count` sectors from the front of `buf` starting at `sector`.
    ///
    /// Erases every erase block the range touches, then programs the data
    /// page by page. Sectors outside the range that share an erase block with
    /// it are erased as well. On failure nothing is rolled back: the whole
    /// range, and the rest of its erase blocks, must be treated as holding
    /// unknown data.
    pub fn write(&self, buf: &[u8], sector: u32, count: u32) -> Result<(), Error<SPI>> {
        self.lock(|inner| {
            inner.ensure_ready()?;
            let len = sector_span(buf.len(), count).ok_or(Error::InvalidArgument)?;
            if len == 0 {
                return Err(Error::InvalidArgument);
            }
            let addr = self.sector_address(sector)?;
            let erased = inner.flash.erase_range(addr, len)?;
            trace!(
                "write sector {=u32} x{=u32}: {=u32} blocks erased",
                sector,
                count,
                erased
            );
            inner.flash.write_buffer(addr, &buf[..len])?;
            Ok(())
        })
    }

    pub fn ioctl(&self, command: IoctlCommand) -> Result<IoctlResponse, Error<SPI>> {
        match command {
            IoctlCommand::Sync => self.sync().map(|_| IoctlResponse::Synced),
            IoctlCommand::GetSectorCount => self.sector_count().map(IoctlResponse::SectorCount),
            IoctlCommand::GetSectorSize => self.sector_size().map(IoctlResponse::SectorSize),
            IoctlCommand::GetBlockSize => self.block_size().map(IoctlResponse::BlockSize),
        }
    }

    /// [`ioctl`](Self::ioctl) with a raw control code; unknown codes are a
    /// parameter error.
    pub fn ioctl_raw(&self, code: u8) -> Result<IoctlResponse, Error<SPI>> {
        let command = IoctlCommand::try_from(code)
            .map_err(|_| Error::InvalidArgument)?;
        self.ioctl(command)
    }

    /// Block until the chip reports idle. Gives up with [`Error::Timeout`]
    /// once the busy-check budget is spent.
    pub fn sync(&self) -> Result<(), Error<SPI>> {
        self.lock(|inner| {
            inner.ensure_ready()?;
            if inner.flash.is_busy()? {
                return Err(Error::Timeout);
            }
            Ok(())
        })
    }

    pub fn sector_count(&self) -> Result<u32, Error<SPI>> {
        self.lock(|inner| inner.ensure_ready())?;
        Ok(self.geometry.sector_count())
    }

    pub fn sector_size(&self) -> Result<u16, Error<SPI>> {
        self.lock(|inner| inner.ensure_ready())?;
        Ok(LOGICAL_SECTOR_SIZE as u16)
    }

    /// Erase block size in logical sectors.
    pub fn block_size(&self) -> Result<u32, Error<SPI>> {
        self.lock(|inner| inner.ensure_ready())?;
        Ok(self.geometry.sectors_per_erase_block())
    }

    fn sector_address(&self, sector: u32) -> Result<u32, Error<SPI>> {
        match sector.checked_mul(LOGICAL_SECTOR_SIZE) {
            Some(addr) if addr < self.geometry.capacity() => Ok(addr),
            _ => Err(Error::CapacityExceeded),
        }
    }
}

/// Byte length of `count` sectors, if the caller's buffer holds that many.
fn sector_span(buf_len: usize, count: u32) -> Option<usize> {
    (count as usize)
        .checked_mul(LOGICAL_SECTOR_SIZE as usize)
        .filter(|&len| len <= buf_len)
}

impl<M, SPI> DiskIo for BlockDevice<M, SPI>
where
    M: RawMutex,
    SPI: SpiDevice,
{
    type Error = Error<SPI>;

    fn status(&self) -> DiskStatus {
        BlockDevice::status(self)
    }

    fn initialize(&self) -> DiskStatus {
        BlockDevice::initialize(self)
    }

    fn read(&self, buf: &mut [u8], sector: u32, count: u32) -> Result<(), Error<SPI>> {
        BlockDevice::read(self, buf, sector, count)
    }

    fn write(&self, buf: &[u8], sector: u32, count: u32) -> Result<(), Error<SPI>> {
        BlockDevice::write(self, buf, sector, count)
    }

    fn ioctl(&self, command: IoctlCommand) -> Result<IoctlResponse, Error<SPI>> {
        BlockDevice::ioctl(self, command)
    }
}
