//! An assembler and reversible simulator for a toy 16-bit x86-flavored CPU.
//!
//! The machine has nine 16-bit registers (`ax`, `bx`, `cx`, `dx`, `si`, `di`, `bp`, `sp`, `ip`),
//! three flags (`zf`, `cf`, `of`), and a sparse byte-addressed memory split into
//! a text, a data, and a stack segment. Only the stack segment is writable.
//!
//! # Usage
//!
//! Source code is loaded line by line. Loading assembles the program
//! and creates a simulator for it:
//! ```
//! let src = [
//!     ".data",
//!     "value: .word 0x0010",
//!     ".text",
//!     "_start:",
//!     "    mov bx, value",
//!     "    mov ax, [bx]",
//!     "    push ax",
//! ];
//! let mut sim = toy_iss::load(src).unwrap();
//! ```
//!
//! The simulator executes one instruction per step,
//! and every step can be undone:
//! ```
//! # let src = [".data", "value: .word 0x0010", ".text", "_start:", "    mov bx, value", "    mov ax, [bx]", "    push ax"];
//! # let mut sim = toy_iss::load(src).unwrap();
//! use toy_iss::ast::Reg;
//!
//! sim.step().unwrap();
//! sim.step().unwrap();
//! assert_eq!(sim.registers()[Reg::Ax], 0x10);
//!
//! sim.prev();
//! assert_eq!(sim.registers()[Reg::Ax], 0);
//! ```
//!
//! Loading fails atomically if the source is malformed:
//! ```
//! let err = toy_iss::load(["mov ax"]).unwrap_err();
//! assert_eq!(err.to_string(), "line 1: expected 2 operand(s), found 1");
//! ```
//!
//! See the [`sim`] module for more details on running programs.
#![warn(missing_docs)]

pub mod parse;
pub mod ast;
pub mod asm;
pub mod sim;
pub mod err;

/// Assembles lines of source code and creates a simulator for them.
///
/// This is shorthand for [`sim::Simulator::load`].
pub fn load<S: AsRef<str>>(lines: impl IntoIterator<Item=S>) -> Result<sim::Simulator, parse::ParseErr> {
    sim::Simulator::load(lines)
}

/// Assembles lines of source code and creates a simulator for them with the given configuration.
pub fn load_with_config<S: AsRef<str>>(lines: impl IntoIterator<Item=S>, config: sim::SimConfig) -> Result<sim::Simulator, parse::ParseErr> {
    sim::Simulator::load_with_config(lines, config)
}
