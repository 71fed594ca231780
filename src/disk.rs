//! Physical drive numbers, as a FatFs-style `disk_*` layer sees them.
//!
//! Only the flash drive has a medium behind it. The other slots exist so a
//! filesystem configured for several volumes gets a clean "not initialized"
//! or parameter error instead of touching the flash by accident.

use crate::block_device::{DiskStatus, IoctlCommand, IoctlResponse};
use crate::error::ErrorKind;
use crate::traits::DiskIo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PhysicalDrive {
    Flash = 0,
    Mmc = 1,
    Usb = 2,
}

impl TryFrom<u8> for PhysicalDrive {
    type Error = u8;

    fn try_from(pdrv: u8) -> Result<Self, u8> {
        match pdrv {
            0 => Ok(PhysicalDrive::Flash),
            1 => Ok(PhysicalDrive::Mmc),
            2 => Ok(PhysicalDrive::Usb),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriveError<E> {
    /// No medium is attached to this drive number.
    NoDrive,
    /// The drive itself reported an error.
    Disk(E),
}

impl<E> DriveError<E> {
    /// Result code for a drive error; `disk_kind` turns the wrapped error
    /// into one.
    pub fn disk_kind(&self, disk_kind: impl FnOnce(&E) -> ErrorKind) -> ErrorKind {
        match self {
            DriveError::NoDrive => ErrorKind::ParamError,
            DriveError::Disk(e) => disk_kind(e),
        }
    }
}

/// Routes drive-numbered calls to the flash disk.
#[derive(Debug)]
pub struct Drives<D> {
    flash: D,
}

impl<D: DiskIo> Drives<D> {
    pub fn new(flash: D) -> Self {
        Self { flash }
    }

    pub fn flash(&self) -> &D {
        &self.flash
    }

    pub fn into_inner(self) -> D {
        self.flash
    }

    fn drive(&self, pdrv: u8) -> Option<&D> {
        match PhysicalDrive::try_from(pdrv) {
            Ok(PhysicalDrive::Flash) => Some(&self.flash),
            Ok(PhysicalDrive::Mmc) | Ok(PhysicalDrive::Usb) | Err(_) => None,
        }
    }

    pub fn status(&self, pdrv: u8) -> DiskStatus {
        self.drive(pdrv)
            .map_or(DiskStatus::NotInitialized, |disk| disk.status())
    }

    pub fn initialize(&self, pdrv: u8) -> DiskStatus {
        self.drive(pdrv)
            .map_or(DiskStatus::NotInitialized, |disk| disk.initialize())
    }

    pub fn read(
        &self,
        pdrv: u8,
        buf: &mut [u8],
        sector: u32,
        count: u32,
    ) -> Result<(), DriveError<D::Error>> {
        let disk = self.drive(pdrv).ok_or(DriveError::NoDrive)?;
        disk.read(buf, sector, count).map_err(DriveError::Disk)
    }

    pub fn write(
        &self,
        pdrv: u8,
        buf: &[u8],
        sector: u32,
        count: u32,
    ) -> Result<(), DriveError<D::Error>> {
        let disk = self.drive(pdrv).ok_or(DriveError::NoDrive)?;
        disk.write(buf, sector, count).map_err(DriveError::Disk)
    }

    pub fn ioctl(
        &self,
        pdrv: u8,
        command: IoctlCommand,
    ) -> Result<IoctlResponse, DriveError<D::Error>> {
        let disk = self.drive(pdrv).ok_or(DriveError::NoDrive)?;
        disk.ioctl(command).map_err(DriveError::Disk)
    }
}
