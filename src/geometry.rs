//! Fixed per-chip layout: capacity, program page, erase block and identity.

use crate::identification::{Identification, WINBOND};

/// Size of the logical sector a filesystem addresses, in bytes.
pub const LOGICAL_SECTOR_SIZE: u32 = 512;

/// Largest capacity reachable with 3-byte addressing.
pub const MAX_3BYTE_CAPACITY: u32 = 1 << 24;

/// Why a [`Geometry`] was rejected by [`Geometry::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GeometryError {
    /// Page or erase size is zero or not a power of two.
    NotPowerOfTwo,
    /// Erase block is not strictly larger than a page, or smaller than a
    /// logical sector.
    EraseSize,
    /// Capacity is zero, not a whole number of erase blocks, or exceeds 16 MiB.
    Capacity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Geometry {
    capacity: u32,
    page_size: u32,
    erase_size: u32,
    identity: Identification,
}

impl Geometry {
    /// W25Q32JV: 4 MiB.
    pub const W25Q32JV: Geometry = Geometry::winbond(0x40, 0x16, 4 * 1024 * 1024);
    /// W25Q64JV: 8 MiB.
    pub const W25Q64JV: Geometry = Geometry::winbond(0x40, 0x17, 8 * 1024 * 1024);
    /// W25Q128JV: 16 MiB.
    pub const W25Q128JV: Geometry = Geometry::winbond(0x40, 0x18, 16 * 1024 * 1024);

    const fn winbond(memory_type: u8, capacity_code: u8, capacity: u32) -> Geometry {
        Geometry {
            capacity,
            page_size: 256,
            erase_size: 4096,
            identity: Identification::new(WINBOND, memory_type, capacity_code),
        }
    }

    pub fn new(
        capacity: u32,
        page_size: u32,
        erase_size: u32,
        identity: Identification,
    ) -> Result<Self, GeometryError> {
        if !page_size.is_power_of_two() || !erase_size.is_power_of_two() {
            return Err(GeometryError::NotPowerOfTwo);
        }
        if erase_size <= page_size || erase_size < LOGICAL_SECTOR_SIZE {
            return Err(GeometryError::EraseSize);
        }
        if capacity == 0 || capacity % erase_size != 0 || capacity > MAX_3BYTE_CAPACITY {
            return Err(GeometryError::Capacity);
        }
        Ok(Self {
            capacity,
            page_size,
            erase_size,
            identity,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn erase_size(&self) -> u32 {
        self.erase_size
    }

    /// The identity `initialize` expects the chip to report.
    pub fn identity(&self) -> Identification {
        self.identity
    }

    /// Start of the erase block containing `addr`.
    pub fn erase_block_start(&self, addr: u32) -> u32 {
        addr & !(self.erase_size - 1)
    }

    /// `addr` rounded up to the next erase-block boundary.
    pub fn erase_block_end(&self, addr: u32) -> u32 {
        let start = self.erase_block_start(addr);
        if start == addr {
            addr
        } else {
            start.saturating_add(self.erase_size)
        }
    }

    /// Bytes left between `addr` and the end of its page.
    pub fn page_remaining(&self, addr: u32) -> u32 {
        self.page_size - (addr % self.page_size)
    }

    /// Whether `len` bytes starting at `addr` stay inside one page.
    pub fn fits_in_page(&self, addr: u32, len: usize) -> bool {
        len <= self.page_remaining(addr) as usize
    }

    /// Number of bytes of `[addr, addr + len)` that lie inside the chip.
    pub fn clamp_len(&self, addr: u32, len: usize) -> usize {
        if addr >= self.capacity {
            return 0;
        }
        len.min((self.capacity - addr) as usize)
    }

    pub fn sector_count(&self) -> u32 {
        self.capacity / LOGICAL_SECTOR_SIZE
    }

    /// Erase-block size in logical sectors; the allocation unit hint a
    /// filesystem asks for.
    pub fn sectors_per_erase_block(&self) -> u32 {
        self.erase_size / LOGICAL_SECTOR_SIZE
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::W25Q128JV
    }
}
