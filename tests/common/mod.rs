//! A simulated W25Q chip behind an `SpiDevice`.
//!
//! Memory behaves like NOR: erase sets a whole 4 KiB block to `0xFF`, program
//! can only clear bits and wraps inside the page. Anything the real chip would
//! silently get wrong (programming a bit from 0 to 1, programming or erasing
//! without the write enable latch, commands while busy) is recorded as a
//! violation so tests can assert there were none.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_hal::spi::{self, ErrorKind, ErrorType, Operation, SpiDevice};
use winbond_w25_disk_rs::{BlockDevice, Config, DiskStatus, FlashSpi, Geometry, Identification};

const STATUS_BUSY: u8 = 1 << 0;
const STATUS_WEL: u8 = 1 << 1;
const STATUS_PROTECT: u8 = 0b1001_1100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Erase(u32),
    Program { addr: u32, len: usize },
    Read { addr: u32, len: usize },
    ChipErase,
    WriteStatus(u8),
    PowerDown,
    ReleasePowerDown,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError;

impl spi::Error for SimError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

struct Chip {
    mem: Vec<u8>,
    page_size: usize,
    erase_size: usize,
    identity: [u8; 3],
    protect: u8,
    wel: bool,
    busy_left: u32,
    program_busy: u32,
    erase_busy: u32,
    stuck_busy: bool,
    absent: bool,
    powered_down: bool,
    reset_enabled: bool,
    fail_transactions: u32,
    status_reads: u32,
    ops: Vec<Op>,
    violations: Vec<String>,
}

impl Chip {
    fn is_busy(&self) -> bool {
        self.stuck_busy || self.busy_left > 0
    }

    fn address(tx: &[u8]) -> u32 {
        let byte = |i: usize| tx.get(i).copied().unwrap_or(0) as u32;
        byte(1) << 16 | byte(2) << 8 | byte(3)
    }

    fn respond(&mut self, tx: &[u8], rx: &mut [u8]) {
        if self.absent {
            rx.fill(0xFF);
            return;
        }
        match tx.first().copied() {
            Some(0x05) => {
                self.status_reads += 1;
                let mut status = self.protect;
                if self.is_busy() {
                    status |= STATUS_BUSY;
                }
                if self.wel {
                    status |= STATUS_WEL;
                }
                rx.fill(status);
                self.busy_left = self.busy_left.saturating_sub(1);
            }
            Some(0x9F) if !self.powered_down => {
                for (i, b) in rx.iter_mut().enumerate() {
                    *b = self.identity.get(i).copied().unwrap_or(0x00);
                }
            }
            Some(0x03) if !self.powered_down => {
                if self.is_busy() {
                    self.violations.push("read while busy".into());
                }
                let addr = Self::address(tx) as usize;
                for (i, b) in rx.iter_mut().enumerate() {
                    *b = self.mem[(addr + i) % self.mem.len()];
                }
                self.ops.push(Op::Read {
                    addr: addr as u32,
                    len: rx.len(),
                });
            }
            Some(0x90) if !self.powered_down => {
                let id = [self.identity[0], self.identity[2].wrapping_sub(1)];
                for (i, b) in rx.iter_mut().enumerate() {
                    *b = id[i % 2];
                }
            }
            Some(0xAB) => rx.fill(self.identity[2].wrapping_sub(1)),
            _ => rx.fill(0xFF),
        }
    }

    fn execute(&mut self, tx: &[u8]) {
        let Some(&opcode) = tx.first() else {
            return;
        };
        if self.absent {
            return;
        }
        if self.powered_down && opcode != 0xAB {
            return;
        }
        if self.is_busy() && opcode != 0x05 {
            self.violations
                .push(format!("opcode {opcode:#04x} issued while busy"));
        }
        match opcode {
            0x06 => self.wel = true,
            0x04 => self.wel = false,
            0x02 => self.program(Self::address(tx), &tx[4.min(tx.len())..]),
            0x20 => self.erase(Self::address(tx)),
            0xC7 => {
                if !self.wel {
                    self.violations.push("chip erase without WEL".into());
                    return;
                }
                self.mem.fill(0xFF);
                self.ops.push(Op::ChipErase);
                self.wel = false;
                self.busy_left = self.erase_busy;
            }
            0x01 => {
                let value = tx.get(1).copied().unwrap_or(0);
                if self.wel {
                    self.protect = value & STATUS_PROTECT;
                    self.wel = false;
                }
                self.ops.push(Op::WriteStatus(value));
            }
            0xB9 => {
                self.powered_down = true;
                self.ops.push(Op::PowerDown);
            }
            0xAB => {
                self.powered_down = false;
                self.ops.push(Op::ReleasePowerDown);
            }
            0x66 => self.reset_enabled = true,
            0x99 => {
                if self.reset_enabled {
                    self.wel = false;
                    self.busy_left = 0;
                    self.ops.push(Op::Reset);
                }
            }
            _ => {}
        }
        if opcode != 0x66 {
            self.reset_enabled = false;
        }
    }

    fn program(&mut self, addr: u32, data: &[u8]) {
        if !self.wel {
            self.violations
                .push(format!("program at {addr:#x} without WEL"));
            return;
        }
        let addr = addr as usize % self.mem.len();
        let page_base = addr - addr % self.page_size;
        for (i, &b) in data.iter().enumerate() {
            let a = page_base + (addr - page_base + i) % self.page_size;
            if self.mem[a] & b != b {
                self.violations.push(format!(
                    "program at {a:#x} needs erase: {:#04x} -> {b:#04x}",
                    self.mem[a]
                ));
            }
            self.mem[a] &= b;
        }
        self.ops.push(Op::Program {
            addr: addr as u32,
            len: data.len(),
        });
        self.wel = false;
        self.busy_left = self.program_busy;
    }

    fn erase(&mut self, addr: u32) {
        if !self.wel {
            self.violations
                .push(format!("erase at {addr:#x} without WEL"));
            return;
        }
        let base = (addr as usize % self.mem.len()) / self.erase_size * self.erase_size;
        self.mem[base..base + self.erase_size].fill(0xFF);
        self.ops.push(Op::Erase(base as u32));
        self.wel = false;
        self.busy_left = self.erase_busy;
    }
}

/// Cloneable handle; every clone drives the same chip.
#[derive(Clone)]
pub struct SimFlash {
    chip: Arc<Mutex<Chip>>,
}

impl SimFlash {
    pub fn new(geometry: Geometry) -> Self {
        let id = geometry.identity();
        let chip = Chip {
            mem: vec![0xFF; geometry.capacity() as usize],
            page_size: geometry.page_size() as usize,
            erase_size: geometry.erase_size() as usize,
            identity: [id.manufacturer, id.memory_type, id.capacity],
            protect: 0,
            wel: false,
            busy_left: 0,
            program_busy: 2,
            erase_busy: 5,
            stuck_busy: false,
            absent: false,
            powered_down: false,
            reset_enabled: false,
            fail_transactions: 0,
            status_reads: 0,
            ops: Vec::new(),
            violations: Vec::new(),
        };
        Self {
            chip: Arc::new(Mutex::new(chip)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Chip) -> R) -> R {
        f(&mut self.chip.lock().unwrap())
    }

    pub fn set_identity(&self, identity: [u8; 3]) {
        self.with(|c| c.identity = identity);
    }

    pub fn set_absent(&self, absent: bool) {
        self.with(|c| c.absent = absent);
    }

    pub fn set_stuck_busy(&self, stuck: bool) {
        self.with(|c| c.stuck_busy = stuck);
    }

    /// Status reads that report busy after a program and after an erase.
    pub fn set_busy_polls(&self, program: u32, erase: u32) {
        self.with(|c| {
            c.program_busy = program;
            c.erase_busy = erase;
        });
    }

    pub fn set_protect_bits(&self, bits: u8) {
        self.with(|c| c.protect = bits & STATUS_PROTECT);
    }

    pub fn set_wel(&self, wel: bool) {
        self.with(|c| c.wel = wel);
    }

    pub fn wel(&self) -> bool {
        self.with(|c| c.wel)
    }

    pub fn powered_down(&self) -> bool {
        self.with(|c| c.powered_down)
    }

    /// The next `n` transactions fail with [`SimError`].
    pub fn fail_next(&self, n: u32) {
        self.with(|c| c.fail_transactions = n);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.with(|c| c.ops.clone())
    }

    pub fn clear_ops(&self) {
        self.with(|c| c.ops.clear());
    }

    pub fn erases(&self) -> Vec<u32> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Erase(addr) => Some(addr),
                _ => None,
            })
            .collect()
    }

    pub fn programs(&self) -> Vec<(u32, usize)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Program { addr, len } => Some((addr, len)),
                _ => None,
            })
            .collect()
    }

    pub fn status_reads(&self) -> u32 {
        self.with(|c| c.status_reads)
    }

    pub fn reset_status_reads(&self) {
        self.with(|c| c.status_reads = 0);
    }

    pub fn violations(&self) -> Vec<String> {
        self.with(|c| c.violations.clone())
    }

    pub fn memory(&self, addr: u32, len: usize) -> Vec<u8> {
        self.with(|c| c.mem[addr as usize..addr as usize + len].to_vec())
    }

    /// Write raw memory, bypassing every rule.
    pub fn preload(&self, addr: u32, data: &[u8]) {
        let range = addr as usize..addr as usize + data.len();
        self.with(|c| c.mem[range].copy_from_slice(data));
    }
}

impl ErrorType for SimFlash {
    type Error = SimError;
}

impl SpiDevice for SimFlash {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), SimError> {
        let mut chip = self.chip.lock().unwrap();
        if chip.fail_transactions > 0 {
            chip.fail_transactions -= 1;
            return Err(SimError);
        }
        let mut tx = Vec::new();
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => tx.extend_from_slice(bytes),
                Operation::Read(buf) => chip.respond(&tx, buf),
                Operation::Transfer(read, write) => {
                    tx.extend_from_slice(write);
                    chip.respond(&tx, read);
                }
                Operation::TransferInPlace(buf) => {
                    tx.extend_from_slice(buf);
                    chip.respond(&tx, buf);
                }
                Operation::DelayNs(_) => {}
            }
        }
        chip.execute(&tx);
        Ok(())
    }
}

/// 64 KiB part with the W25Q128's page and erase sizes.
pub fn small_geometry() -> Geometry {
    Geometry::new(64 * 1024, 256, 4096, Identification::new(0xEF, 0x40, 0x18)).unwrap()
}

pub fn test_config() -> Config {
    Config::new(64, 64)
}

pub fn flash(sim: &SimFlash) -> FlashSpi<SimFlash> {
    FlashSpi::new(sim.clone(), small_geometry(), test_config())
}

pub type TestDevice = BlockDevice<CriticalSectionRawMutex, SimFlash>;

pub fn ready_device(sim: &SimFlash) -> TestDevice {
    let device = TestDevice::new(flash(sim));
    assert_eq!(device.initialize(), DiskStatus::Ready);
    device
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
