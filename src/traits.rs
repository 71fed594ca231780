use crate::block_device::{DiskStatus, IoctlCommand, IoctlResponse};

pub trait HardwareFlashDevice {
    type Error;

    /// Reads flash contents into `buf`, starting at `addr`.
    fn read(&mut self, addr: u32, data: &mut [u8]) -> Result<(), Self::Error>;

    /// The Sector Erase instruction sets all memory within a specified sector
    /// to the erased state of all 1s (FFh).
    fn sector_erase(&mut self, addr: u32) -> Result<(), Self::Error>;

    /// The Page Program instruction allows from one byte to 256 bytes (a page) of data
    /// to be programmed at previously erased (FFh) memory locations.
    fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Chip Erase (see datasheet 8.2.18)
    /// The Chip Erase instruction sets all memory within the device to the erased
    /// state of all 1s (FFh).
    fn chip_erase(&mut self) -> Result<(), Self::Error>;
}

/// What a FAT-style filesystem needs from a storage medium, addressed in
/// 512-byte logical sectors.
///
/// Methods take `&self`: implementations serialize access internally so one
/// device can be shared between tasks.
pub trait DiskIo {
    type Error;

    /// Cached state from the last [`initialize`](Self::initialize).
    fn status(&self) -> DiskStatus;

    /// Probe the medium and cache the outcome.
    fn initialize(&self) -> DiskStatus;

    /// Read `count` sectors starting at `sector` into the front of `buf`.
    fn read(&self, buf: &mut [u8], sector: u32, count: u32) -> Result<(), Self::Error>;

    /// Write `count` sectors from the front of `buf` starting at `sector`.
    fn write(&self, buf: &[u8], sector: u32, count: u32) -> Result<(), Self::Error>;

    /// Miscellaneous control and geometry queries.
    fn ioctl(&self, command: IoctlCommand) -> Result<IoctlResponse, Self::Error>;
}
