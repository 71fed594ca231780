use core::fmt::{self, Debug};
use embedded_hal::spi::SpiDevice;
use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

/// The error type used by this library.
///
/// This can encapsulate an SPI error, and adds its own protocol and
/// block-device errors on top of that. Nothing in this crate retries an
/// operation that failed; a [`Error::Timeout`] after a program or erase means
/// the outcome is unknown, not that the command did not happen.
pub enum Error<SPI: SpiDevice> {
    /// An SPI transfer failed.
    Spi(SPI::Error),
    /// The block device was used before a successful `initialize`.
    NotReady,
    /// Empty or oversized buffer, a program crossing a page boundary,
    /// or an unknown control command.
    InvalidArgument,
    /// The busy flag did not clear within the configured poll budget.
    Timeout,
    /// The requested range starts at or beyond the end of the chip.
    CapacityExceeded,
}

/// Result code as seen by a disk-style consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// Hard error on the medium or the bus.
    Error,
    /// The drive has not been initialised.
    NotReady,
    /// Invalid parameter.
    ParamError,
    /// The chip stayed busy. Program or erase outcome unknown.
    Timeout,
}

impl<SPI: SpiDevice> Error<SPI> {
    /// The disk result code this error reports as.
    pub fn disk_kind(&self) -> ErrorKind {
        match self {
            Error::Spi(_) => ErrorKind::Error,
            Error::NotReady => ErrorKind::NotReady,
            Error::InvalidArgument | Error::CapacityExceeded => ErrorKind::ParamError,
            Error::Timeout => ErrorKind::Timeout,
        }
    }
}

#[cfg(feature = "defmt")]
impl<SPI: SpiDevice> defmt::Format for Error<SPI>
where
    SPI::Error: Debug,
{
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Error::Spi(_spi) => defmt::write!(fmt, "Error::Spi"),
            Error::NotReady => defmt::write!(fmt, "Error::NotReady"),
            Error::InvalidArgument => defmt::write!(fmt, "Error::InvalidArgument"),
            Error::Timeout => defmt::write!(fmt, "Error::Timeout"),
            Error::CapacityExceeded => defmt::write!(fmt, "Error::CapacityExceeded"),
        }
    }
}

impl<SPI: SpiDevice> Debug for Error<SPI>
where
    SPI::Error: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "Error::Spi({:?})", spi),
            Error::NotReady => write!(f, "Error::NotReady"),
            Error::InvalidArgument => write!(f, "Error::InvalidArgument"),
            Error::Timeout => write!(f, "Error::Timeout"),
            Error::CapacityExceeded => write!(f, "Error::CapacityExceeded"),
        }
    }
}

impl<SPI: SpiDevice> NorFlashError for Error<SPI>
where
    SPI::Error: Debug,
{
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::InvalidArgument => NorFlashErrorKind::NotAligned,
            Error::CapacityExceeded => NorFlashErrorKind::OutOfBounds,
            _ => NorFlashErrorKind::Other,
        }
    }
}
