//! JEDEC identification returned by the Read JEDEC ID (9Fh) instruction.

use core::fmt;

/// Winbond's JEDEC manufacturer code.
pub const WINBOND: u8 = 0xEF;

/// The identity triplet a 25-series flash reports: manufacturer, memory type
/// and capacity code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Identification {
    pub manufacturer: u8,
    pub memory_type: u8,
    pub capacity: u8,
}

impl Identification {
    pub const fn new(manufacturer: u8, memory_type: u8, capacity: u8) -> Self {
        Self {
            manufacturer,
            memory_type,
            capacity,
        }
    }

    /// Build an identification from the raw response bytes, first byte first.
    ///
    /// Missing bytes read as `0xFF`, which is also what a floating MISO line
    /// returns when no chip is attached.
    pub fn from_jedec_id(id: &[u8]) -> Self {
        let byte = |i: usize| id.get(i).copied().unwrap_or(0xFF);
        Self::new(byte(0), byte(1), byte(2))
    }

    /// The identity packed as `0xMMTTCC`, the way datasheets print it.
    pub const fn as_u32(&self) -> u32 {
        (self.manufacturer as u32) << 16 | (self.memory_type as u32) << 8 | self.capacity as u32
    }

    /// Capacity implied by the capacity code (`2^code` bytes), if plausible.
    pub fn capacity_bytes(&self) -> Option<u32> {
        match self.capacity {
            0x10..=0x1F => Some(1u32 << self.capacity),
            _ => None,
        }
    }

    /// All-zero or all-one responses mean nothing answered on the bus.
    pub fn is_absent(&self) -> bool {
        let raw = [self.manufacturer, self.memory_type, self.capacity];
        raw.iter().all(|&b| b == 0x00) || raw.iter().all(|&b| b == 0xFF)
    }
}

impl fmt::Debug for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Identification {{ mfg: {:#04x}, type: {:#04x}, capacity: {:#04x} }}",
            self.manufacturer, self.memory_type, self.capacity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packs_like_datasheet() {
        let id = Identification::new(0xEF, 0x40, 0x18);
        assert_eq!(id.as_u32(), 0xEF4018);
        assert_eq!(id.capacity_bytes(), Some(16 * 1024 * 1024));
    }

    #[test]
    fn test_short_response_reads_as_floating() {
        let id = Identification::from_jedec_id(&[0xEF]);
        assert_eq!(id, Identification::new(0xEF, 0xFF, 0xFF));
        assert!(!id.is_absent());
        assert!(Identification::from_jedec_id(&[]).is_absent());
        assert!(Identification::new(0, 0, 0).is_absent());
    }

    #[test]
    fn test_unknown_capacity_code() {
        assert_eq!(Identification::new(0xEF, 0x40, 0x42).capacity_bytes(), None);
    }
}
