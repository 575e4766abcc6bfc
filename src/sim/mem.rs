//! Memory handling for the simulator.
//!
//! This module consists of:
//! - the segment layout ([`Segment`] and its constants),
//! - [`RegFile`]: the register file,
//! - [`Flags`]: the flag set,
//! - [`Memory`]: the sparse, byte-addressed memory.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::ast::Reg;

use super::SimErr;

/// The base address of the text segment.
pub const TEXT_BASE: u16 = 0x5500;
/// The number of addresses in the text segment (one per instruction).
pub const TEXT_SIZE: u16 = 0x0100;
/// The base address of the data segment.
pub const DATA_BASE: u16 = 0x6B00;
/// The number of bytes in the data segment.
pub const DATA_SIZE: u16 = 0x0500;
/// The initial value of `sp` and `bp`.
pub const STACK_BASE: u16 = 0x7F00;
/// The first address of the stack segment.
pub const STACK_START: u16 = 0x7000;
/// The number of bytes in the stack segment.
pub const STACK_SIZE: u16 = 0x1000;

/// A logical region of memory.
///
/// | Segment | Range             | Writable |
/// |---------|-------------------|----------|
/// | Text    | `0x5500..0x5600`  | no       |
/// | Data    | `0x6B00..0x7000`  | no       |
/// | Stack   | `0x7000..0x8000`  | yes      |
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Segment {
    /// Holds the instruction stream.
    Text,
    /// Holds the static data of the program.
    Data,
    /// Holds the stack. This is the only segment instructions can write to.
    Stack,
}
impl Segment {
    /// The address range of this segment.
    pub fn range(self) -> Range<u16> {
        let (start, size) = match self {
            Segment::Text  => (TEXT_BASE, TEXT_SIZE),
            Segment::Data  => (DATA_BASE, DATA_SIZE),
            Segment::Stack => (STACK_START, STACK_SIZE),
        };
        start..start + size
    }

    /// Gets the segment the address belongs to (if any).
    pub fn of(addr: u16) -> Option<Segment> {
        [Segment::Text, Segment::Data, Segment::Stack].into_iter()
            .find(|s| s.range().contains(&addr))
    }

    /// Whether instructions can write to this segment.
    pub fn is_writable(self) -> bool {
        matches!(self, Segment::Stack)
    }
}

/// The register file.
///
/// This struct can be indexed with a [`Reg`].
///
/// # Example
///
/// ```
/// use toy_iss::sim::mem::{RegFile, STACK_BASE};
/// use toy_iss::ast::Reg;
///
/// let mut reg = RegFile::new();
/// assert_eq!(reg[Reg::Sp], STACK_BASE);
/// reg[Reg::Ax] = 11;
/// assert_eq!(reg[Reg::Ax], 11);
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct RegFile([u16; Reg::ALL.len()]);
impl RegFile {
    /// Creates a register file in its initial state.
    ///
    /// All registers are zero except `sp` and `bp`, which point to [`STACK_BASE`].
    pub fn new() -> Self {
        let mut regs = Self([0; Reg::ALL.len()]);
        regs[Reg::Sp] = STACK_BASE;
        regs[Reg::Bp] = STACK_BASE;
        regs
    }

    /// Iterates over every register and its value.
    pub fn iter(&self) -> impl Iterator<Item=(Reg, u16)> + '_ {
        Reg::ALL.into_iter().zip(self.0.iter().copied())
    }
}
impl Default for RegFile {
    fn default() -> Self {
        Self::new()
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u16;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}
impl std::ops::IndexMut<Reg> for RegFile {
    fn index_mut(&mut self, index: Reg) -> &mut Self::Output {
        &mut self.0[usize::from(index)]
    }
}

/// The machine's flags.
///
/// Only `sub` and `cmp` (which set `zf`) and `mul` (which sets `cf` and `of`) modify flags.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct Flags {
    /// Zero flag.
    pub zf: bool,
    /// Carry flag.
    pub cf: bool,
    /// Overflow flag.
    pub of: bool,
}
impl Flags {
    /// Iterates over every flag's name and value.
    pub fn iter(&self) -> impl Iterator<Item=(&'static str, bool)> {
        [("zf", self.zf), ("cf", self.cf), ("of", self.of)].into_iter()
    }
}

/// The memory.
///
/// Memory is sparse and byte-addressed: only bytes that were written are stored,
/// and every other address reads as zero. Word accesses are little-endian
/// (the low byte is at `addr`, the high byte at `addr + 1`, wrapping at 16 bits).
///
/// Cloning a memory copies every stored byte, so the cost of a clone
/// is linear in the number of bytes that were ever written.
///
/// There are two ways to access memory:
/// - [`Memory::read_word`] and [`Memory::write_word`] simulate an instruction's access.
///   Writes outside of the stack segment fail.
/// - [`Memory::get_byte`] and [`Memory::set_byte`] inspect and edit memory directly
///   without any access checks.
///
/// # Example
///
/// ```
/// use toy_iss::sim::mem::Memory;
///
/// let mut mem = Memory::new();
/// assert_eq!(mem.read_word(0x7000), 0);
///
/// assert!(mem.write_word(0x7000, 0x1234).is_ok());
/// assert_eq!(mem.get_byte(0x7000), 0x34);
/// assert_eq!(mem.get_byte(0x7001), 0x12);
///
/// assert!(mem.write_word(0x6B00, 0x1234).is_err());
/// assert_eq!(mem.read_word(0x6B00), 0);
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Default)]
pub struct Memory {
    data: BTreeMap<u16, u8>
}
impl Memory {
    /// Creates a new, zeroed memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the byte at the given address.
    pub fn get_byte(&self, addr: u16) -> u8 {
        self.data.get(&addr).copied().unwrap_or(0)
    }
    /// Sets the byte at the given address, without any access checks.
    pub fn set_byte(&mut self, addr: u16, byte: u8) {
        self.data.insert(addr, byte);
    }

    /// Reads the word at the given address.
    pub fn read_word(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.get_byte(addr), self.get_byte(addr.wrapping_add(1))])
    }

    /// Writes a word at the given address.
    ///
    /// This errors with [`SimErr::SegmentViolation`] (and leaves memory unchanged)
    /// if either byte of the word is outside of the stack segment.
    pub fn write_word(&mut self, addr: u16, value: u16) -> Result<(), SimErr> {
        let hi_addr = addr.wrapping_add(1);
        let writable = |a| Segment::of(a).is_some_and(Segment::is_writable);
        if !writable(addr) || !writable(hi_addr) {
            return Err(SimErr::SegmentViolation(addr));
        }

        let [lo, hi] = value.to_le_bytes();
        self.set_byte(addr, lo);
        self.set_byte(hi_addr, hi);
        Ok(())
    }

    /// Iterates over every byte that was written, in address order.
    pub fn iter(&self) -> impl Iterator<Item=(u16, u8)> + '_ {
        self.data.iter().map(|(&a, &b)| (a, b))
    }
}
impl Extend<(u16, u8)> for Memory {
    /// Sets many bytes at once, without any access checks.
    fn extend<T: IntoIterator<Item = (u16, u8)>>(&mut self, iter: T) {
        self.data.extend(iter)
    }
}
