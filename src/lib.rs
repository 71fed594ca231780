//! Driver for Winbond W25Q serial NOR flash, and a 512-byte-sector block
//! device on top of it for FAT-style filesystems.
//!
//! Layers, bottom up:
//!
//! * [`transport`]: chip select and byte exchange over an SPI bus, exposed
//!   as an [`embedded_hal::spi::SpiDevice`].
//! * [`FlashSpi`]: the chip's command set (identify, status, write enable,
//!   page program, sector erase, read) with bounded busy polling.
//! * [`BlockDevice`]: status / initialize / read / write / ioctl in logical
//!   sectors, erase-before-write, one lock around every call.
//! * [`NorStorage`]: the `embedded-storage` NOR traits, for storage crates
//!   that manage erases themselves.
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod block_device;
pub mod comms;
pub mod config;
pub mod disk;
pub mod error;
pub mod geometry;
pub mod identification;
pub mod storage;
pub mod traits;
pub mod transport;

pub use block_device::{BlockDevice, DiskStatus, IoctlCommand, IoctlResponse};
pub use comms::{FlashSpi, Status};
pub use config::Config;
pub use disk::{DriveError, Drives, PhysicalDrive};
pub use error::{Error, ErrorKind};
pub use geometry::{Geometry, GeometryError, LOGICAL_SECTOR_SIZE};
pub use identification::Identification;
pub use storage::NorStorage;
pub use traits::{DiskIo, HardwareFlashDevice};
pub use transport::{Transport, TransportError};
