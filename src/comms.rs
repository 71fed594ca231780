//! Refer to datasheet:
//! https://datasheet.lcsc.com/lcsc/1912111437_Winbond-Elec-W25Q128JVSIQ_C113767.pdf
use crate::config::Config;
use crate::error::Error;
use crate::geometry::Geometry;
use crate::identification::Identification;
use crate::traits::HardwareFlashDevice;
use core::fmt::Debug;
use embedded_hal::spi::{Operation, SpiDevice};

pub struct FlashSpi<SPI> {
    spi: SPI,
    geometry: Geometry,
    config: Config,
}

impl<SPI> Debug for FlashSpi<SPI> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlashSpi")
            .field("geometry", &self.geometry)
            .field("config", &self.config)
            .finish()
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Opcode {
    /// Read the 8-bit manufacturer and device IDs.
    ReadMfDId = 0x90,
    /// Read 8-bit manufacturer ID, memory type and capacity.
    ReadJedecId = 0x9F,
    /// Set the write enable latch.
    WriteEnable = 0x06,
    /// Clear the write enable latch.
    WriteDisable = 0x04,
    /// Read the 8-bit status register.
    ReadStatus = 0x05,
    /// Write the 8-bit status register.
    WriteStatus = 0x01,
    Read = 0x03,
    PageProg = 0x02,
    SectorErase = 0x20,
    ChipErase = 0xC7,
    PowerDown = 0xB9,
    ReleasePowerDown = 0xAB,
    EnableReset = 0x66,
    Reset = 0x99,
}

/// Opcode followed by a 24-bit big-endian address.
fn address_command(opcode: Opcode, addr: u32) -> [u8; 4] {
    [
        opcode as u8,
        (addr >> 16) as u8,
        (addr >> 8) as u8,
        addr as u8,
    ]
}

bitflags::bitflags! {
    /// Status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// Erase or write in progress.
        const BUSY = 1 << 0;
        /// Status of the **W**rite **E**nable **L**atch.
        const WEL = 1 << 1;
        /// The 3 protection region bits.
        const PROT = 0b00011100;
        /// **S**tatus **R**egister **W**rite **D**isable bit.
        const SRWD = 1 << 7;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Status {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Status({=u8:#04x})", self.bits())
    }
}

impl<SPI> HardwareFlashDevice for FlashSpi<SPI>
where
    SPI: SpiDevice,
{
    type Error = Error<SPI>;

    /// Reads flash contents into `buf`, starting at `addr`. Bytes past the end
    /// of the chip are left untouched.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Error<SPI>> {
        self.read_linear(addr, buf).map(|_| ())
    }

    fn sector_erase(&mut self, addr: u32) -> Result<(), Error<SPI>> {
        self.erase_block(addr)
    }

    fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<SPI>> {
        self.program_page(addr, data)
    }

    fn chip_erase(&mut self) -> Result<(), Error<SPI>> {
        FlashSpi::chip_erase(self)
    }
}

impl<SPI> FlashSpi<SPI>
where
    SPI: SpiDevice,
{
    /// Wrap a bus without talking to the chip.
    pub fn new(spi: SPI, geometry: Geometry, config: Config) -> Self {
        Self {
            spi,
            geometry,
            config,
        }
    }

    /// Wrap a bus and wait for any operation left running from before a
    /// reset to finish. A latched write enable is cleared.
    pub fn init(spi: SPI, geometry: Geometry, config: Config) -> Result<Self, Error<SPI>> {
        let mut this = Self::new(spi, geometry, config);
        this.wait_ready()?;
        let status = this.read_status()?;
        if status.contains(Status::WEL) {
            warn!("Flash came up with WEL set: {:?}", status);
            this.write_disable()?;
        }
        debug!("Initial status: {:?}", status);
        Ok(this)
    }

    /// Give back the bus.
    pub fn release(self) -> SPI {
        self.spi
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// From datasheet section 8.2.29 (Read JEDEC ID (9Fh))
    /// Returns whatever the bus carried; an absent chip typically reads as
    /// all ones. Callers compare against the expected identity.
    pub fn read_identity(&mut self) -> Result<Identification, Error<SPI>> {
        let mut response = [0u8; 3];
        self.command_with_response(&[Opcode::ReadJedecId as u8], &mut response)?;
        let id = Identification::from_jedec_id(&response);
        debug!("JEDEC id: {:?}", id);
        Ok(id)
    }

    /// Read Manufacturer / Device ID (90h), returns `[manufacturer, device]`.
    pub fn read_manufacturer_device_id(&mut self) -> Result<[u8; 2], Error<SPI>> {
        let mut response = [0u8; 2];
        self.command_with_response(&address_command(Opcode::ReadMfDId, 0), &mut response)?;
        Ok(response)
    }

    /// Reads status register 1. Never cached: the busy bit is only
    /// meaningful right after it was read.
    pub fn read_status(&mut self) -> Result<Status, Error<SPI>> {
        let mut response = [0u8; 1];
        self.command_with_response(&[Opcode::ReadStatus as u8], &mut response)?;
        Ok(Status::from_bits_retain(response[0]))
    }

    /// From datasheet section 8.2.1
    /// The Write Enable instruction sets the Write Enable Latch (WEL) bit
    /// in the Status Register to a 1. The WEL bit must be set prior to every Page Program,
    /// Sector Erase, Chip Erase and Write Status Register instruction. The chip clears it
    /// again when that instruction completes.
    pub fn write_enable(&mut self) -> Result<(), Error<SPI>> {
        self.command(&[Opcode::WriteEnable as u8])
    }

    /// Write Disable (04h): clears the WEL bit.
    pub fn write_disable(&mut self) -> Result<(), Error<SPI>> {
        self.command(&[Opcode::WriteDisable as u8])
    }

    /// Poll the status register until BUSY clears.
    ///
    /// Gives up with [`Error::Timeout`] after exactly
    /// [`Config::wait_ready_polls`] reads. This is an iteration budget, not a
    /// wall-clock bound.
    pub fn wait_ready(&mut self) -> Result<(), Error<SPI>> {
        let polls = self.config.wait_ready_polls;
        for _ in 0..polls {
            if !self.read_status()?.contains(Status::BUSY) {
                return Ok(());
            }
        }
        warn!("Flash still busy after {=u32} status reads", polls);
        Err(Error::Timeout)
    }

    /// Like [`wait_ready`](Self::wait_ready) but with its own budget
    /// ([`Config::busy_check_polls`]), and reports `true` instead of an error
    /// when the budget runs out.
    pub fn is_busy(&mut self) -> Result<bool, Error<SPI>> {
        for _ in 0..self.config.busy_check_polls {
            if !self.read_status()?.contains(Status::BUSY) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Sector erase (see datasheet 8.2.15)
    /// The Sector Erase instruction sets all memory within a specified sector
    /// (4K-bytes) to the erased state of all 1s (FFh). A Write Enable instruction
    /// must be executed before the device will accept the Sector Erase Instruction.
    ///
    /// `addr` should be the start of an erase block; any other address erases
    /// the whole block that contains it.
    pub fn erase_block(&mut self, addr: u32) -> Result<(), Error<SPI>> {
        if addr >= self.geometry.capacity() {
            return Err(Error::CapacityExceeded);
        }
        if self.geometry.erase_block_start(addr) != addr {
            warn!("Unaligned erase at {=u32:#x} clears the whole block", addr);
        }
        self.wait_ready()?;
        self.write_enable()?;
        trace!("erase {=u32:#x}", addr);
        self.command(&address_command(Opcode::SectorErase, addr))?;
        self.wait_ready()
    }

    /// From datasheet section 8.2.13
    /// The Page Program instruction allows from one byte to 256 bytes (a page) of data
    /// to be programmed at previously erased (FFh) memory locations. The /CS pin must
    /// be held low for the entire length of the instruction while data is being sent
    /// to the device.
    ///
    /// The chip wraps around inside the page instead of failing when a
    /// program runs past the page end, so such requests are refused here.
    pub fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<SPI>> {
        if data.is_empty()
            || data.len() > self.geometry.page_size() as usize
            || !self.geometry.fits_in_page(addr, data.len())
        {
            return Err(Error::InvalidArgument);
        }
        if self.geometry.clamp_len(addr, data.len()) != data.len() {
            return Err(Error::CapacityExceeded);
        }

        self.wait_ready()?;
        self.write_enable()?;
        if !self.read_status()?.contains(Status::WEL) {
            warn!("WEL should be set before programming {=u32:#x}", addr);
        }

        trace!("program {=u32:#x} +{=usize}", addr, data.len());
        let cmd = address_command(Opcode::PageProg, addr);
        self.spi
            .transaction(&mut [Operation::Write(&cmd), Operation::Write(data)])
            .map_err(Error::Spi)?;
        self.wait_ready()
    }

    /// From datasheet section 8.2.6 (Read Data (03h))
    /// Reads flash contents into `buf`, starting at `addr`, in one
    /// transaction. There is no alignment restriction.
    ///
    /// The range is cut short at the end of the chip; the return value is the
    /// number of bytes actually read. Waits for any program or erase still in
    /// progress first.
    pub fn read_linear(&mut self, addr: u32, buf: &mut [u8]) -> Result<usize, Error<SPI>> {
        let len = self.geometry.clamp_len(addr, buf.len());
        if len == 0 {
            return Ok(0);
        }
        self.wait_ready()?;
        let cmd = address_command(Opcode::Read, addr);
        self.spi
            .transaction(&mut [Operation::Write(&cmd), Operation::Read(&mut buf[..len])])
            .map_err(Error::Spi)?;
        Ok(len)
    }

    /// Erase every block that overlaps `[addr, addr + len)`.
    ///
    /// The range is rounded outward to erase-block boundaries, so data in
    /// those blocks outside the range is lost too. Stops at the first failure
    /// and returns the number of blocks erased otherwise.
    pub fn erase_range(&mut self, addr: u32, len: usize) -> Result<u32, Error<SPI>> {
        if len == 0 {
            return Ok(0);
        }
        if addr >= self.geometry.capacity() {
            return Err(Error::CapacityExceeded);
        }
        let end = addr + self.geometry.clamp_len(addr, len) as u32;
        let mut block = self.geometry.erase_block_start(addr);
        let stop = self.geometry.erase_block_end(end);
        let mut erased = 0;
        while block < stop {
            self.erase_block(block)?;
            block += self.geometry.erase_size();
            erased += 1;
        }
        Ok(erased)
    }

    /// Program `data` starting at any address, one page-sized piece at a time.
    ///
    /// The target must already be erased. A write that runs past the end of
    /// the chip stops there; the return value is the number of bytes
    /// programmed.
    pub fn write_buffer(&mut self, addr: u32, data: &[u8]) -> Result<usize, Error<SPI>> {
        if data.is_empty() {
            return Err(Error::InvalidArgument);
        }
        if addr >= self.geometry.capacity() {
            return Err(Error::CapacityExceeded);
        }

        let len = self.geometry.clamp_len(addr, data.len());
        let mut addr = addr;
        let mut rest = &data[..len];
        while !rest.is_empty() {
            let chunk = (self.geometry.page_remaining(addr) as usize).min(rest.len());
            let (page, tail) = rest.split_at(chunk);
            self.program_page(addr, page)?;
            addr += chunk as u32;
            rest = tail;
        }
        if len < data.len() {
            warn!(
                "Write stopped at end of flash after {=usize} of {=usize} bytes",
                len,
                data.len()
            );
        }
        Ok(len)
    }

    /// Chip Erase (see datasheet 8.2.18)
    /// Sets all memory within the device to FFh. Takes up to 200 s on a
    /// W25Q128JV; the wait uses the normal poll budget, so a timeout here
    /// usually means the budget is too small rather than a dead chip.
    pub fn chip_erase(&mut self) -> Result<(), Error<SPI>> {
        self.wait_ready()?;
        self.write_enable()?;
        self.command(&[Opcode::ChipErase as u8])?;
        self.wait_ready()
    }

    /// Clear the block protect and status register protect bits, making the
    /// whole array writable. Nothing is written when they are already clear.
    pub fn clear_block_protection(&mut self) -> Result<(), Error<SPI>> {
        let status = self.read_status()?;
        if !status.intersects(Status::PROT | Status::SRWD) {
            return Ok(());
        }
        debug!("Clearing protection bits: {:?}", status);
        self.wait_ready()?;
        self.write_enable()?;
        self.command(&[Opcode::WriteStatus as u8, 0x00])?;
        self.wait_ready()
    }

    /// Power-down (B9h). Only Release Power-down is accepted afterwards.
    pub fn power_down(&mut self) -> Result<(), Error<SPI>> {
        self.wait_ready()?;
        self.command(&[Opcode::PowerDown as u8])
    }

    /// Release Power-down / Device ID (ABh). Returns the legacy device id.
    pub fn release_power_down(&mut self) -> Result<u8, Error<SPI>> {
        let mut response = [0u8; 1];
        self.command_with_response(&[Opcode::ReleasePowerDown as u8, 0, 0, 0], &mut response)?;
        Ok(response[0])
    }

    /// Software reset (see datasheet 6.4)
    /// This sequence must include two consecutive instructions: Enable Reset
    /// (66h) & Reset (99h). The device takes approximately 30μS (tRST) to reset,
    /// and no instruction will be accepted during the reset period.
    pub fn software_reset(&mut self) -> Result<(), Error<SPI>> {
        self.wait_ready()?;
        self.command(&[Opcode::EnableReset as u8])?;
        self.command(&[Opcode::Reset as u8])?;
        Ok(())
    }

    /// Writes a command to the SPI bus
    fn command(&mut self, bytes: &[u8]) -> Result<(), Error<SPI>> {
        self.spi
            .transaction(&mut [Operation::Write(bytes)])
            .map_err(Error::Spi)?;
        Ok(())
    }

    /// Writes a command to the SPI bus and reads the response in the same transaction
    fn command_with_response(
        &mut self,
        instruction: &[u8],
        response: &mut [u8],
    ) -> Result<(), Error<SPI>> {
        self.spi
            .transaction(&mut [Operation::Write(instruction), Operation::Read(response)])
            .map_err(Error::Spi)?;
        Ok(())
    }
}
