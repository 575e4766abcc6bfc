//! Breakpoints for pausing a running [`Simulator`].
//!
//! Breakpoints are inserted into [`Simulator::breakpoints`] and are checked by
//! [`Simulator::run_while`] (and so also [`Simulator::run`] and [`Simulator::run_with_limit`])
//! after every successful step. Stepping manually with [`Simulator::step`] ignores them.
//!
//! ```
//! use toy_iss::ast::Reg;
//! use toy_iss::sim::debug::{Breakpoint, Comparator};
//!
//! let mut sim = toy_iss::load(["mov cx, 0x3", "loop: sub cx, 0x1", "jne loop"]).unwrap();
//! sim.breakpoints.insert(Breakpoint::Reg { reg: Reg::Cx, value: Comparator::Eq(0x1) });
//!
//! sim.run().unwrap();
//! assert!(sim.hit_breakpoint());
//! assert_eq!(sim.registers()[Reg::Cx], 0x1);
//! ```
use std::fmt::Write;

use crate::ast::Reg;

use super::Simulator;

/// A condition on the current machine state which pauses execution when it holds.
#[derive(PartialEq, Eq, Hash)]
pub enum Breakpoint {
    /// Holds once the next instruction to execute is at this address.
    Ip(u16),

    /// Holds while a register's value passes the comparator.
    Reg {
        /// The register to watch.
        reg: Reg,
        /// The comparator its value is tested with.
        value: Comparator
    },
    /// Holds while the little-endian word at an address passes the comparator.
    ///
    /// The address is read as is, so this can watch any segment.
    Mem {
        /// The address of the watched word.
        addr: u16,
        /// The comparator the word is tested with.
        value: Comparator
    },
}

impl Breakpoint where Breakpoint: Send + Sync { /* assert Breakpoint is send/sync */ }

impl Breakpoint {
    /// Tests this breakpoint against the simulator's current state.
    pub fn check(&self, sim: &Simulator) -> bool {
        match self {
            Breakpoint::Ip(addr) => *addr == sim.instruction_pointer(),
            Breakpoint::Reg { reg, value } => value.check(sim.registers()[*reg]),
            Breakpoint::Mem { addr, value } => value.check(sim.memory_read(*addr)),
        }
    }
}
impl std::fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Breakpoint(")?;
        match self {
            Self::Ip(addr) => write!(f, "ip == {addr:#06x}")?,
            Self::Reg { reg, value } => write!(f, "{reg} {value}")?,
            Self::Mem { addr, value } => write!(f, "mem[{addr:#06x}] {value}")?,
        }
        f.write_char(')')
    }
}

/// A test on a 16-bit word, comparing it (unsigned) against a fixed operand.
///
/// Displays as the operator followed by the operand (e.g. `>= 0x10`).
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum Comparator {
    /// Never passes.
    Never,
    /// Passes if the word is below the operand.
    Lt(u16),
    /// Passes if the word equals the operand.
    Eq(u16),
    /// Passes if the word is at most the operand.
    Le(u16),
    /// Passes if the word is above the operand.
    Gt(u16),
    /// Passes if the word differs from the operand.
    Ne(u16),
    /// Passes if the word is at least the operand.
    Ge(u16),
    /// Always passes.
    Always
}
impl Comparator {
    /// Tests a word against this comparator.
    pub fn check(self, word: u16) -> bool {
        match self {
            Comparator::Never  => false,
            Comparator::Lt(r)  => word < r,
            Comparator::Eq(r)  => word == r,
            Comparator::Le(r)  => word <= r,
            Comparator::Gt(r)  => word > r,
            Comparator::Ne(r)  => word != r,
            Comparator::Ge(r)  => word >= r,
            Comparator::Always => true,
        }
    }

    fn operator(self) -> Option<(&'static str, u16)> {
        match self {
            Comparator::Never | Comparator::Always => None,
            Comparator::Lt(r) => Some(("<", r)),
            Comparator::Eq(r) => Some(("==", r)),
            Comparator::Le(r) => Some(("<=", r)),
            Comparator::Gt(r) => Some((">", r)),
            Comparator::Ne(r) => Some(("!=", r)),
            Comparator::Ge(r) => Some((">=", r)),
        }
    }
}
impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self, self.operator()) {
            (_, Some((op, r))) => write!(f, "{op} {r:#x}"),
            (Comparator::Never, None) => f.write_str("never"),
            (_, None) => f.write_str("always"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::ast::Reg;
    use crate::sim::Simulator;

    use super::{Breakpoint, Comparator};

    #[rstest]
    #[case(Comparator::Never, 5, false)]
    #[case(Comparator::Lt(5), 4, true)]
    #[case(Comparator::Lt(5), 5, false)]
    #[case(Comparator::Eq(5), 5, true)]
    #[case(Comparator::Le(5), 5, true)]
    #[case(Comparator::Gt(5), 5, false)]
    #[case(Comparator::Ne(5), 6, true)]
    #[case(Comparator::Ge(5), 6, true)]
    #[case(Comparator::Always, 0, true)]
    fn test_comparator(#[case] cmp: Comparator, #[case] word: u16, #[case] expected: bool) {
        assert_eq!(cmp.check(word), expected);
    }

    #[test]
    fn test_breakpoint_debug() {
        assert_eq!(format!("{:?}", Breakpoint::Ip(0x5501)), "Breakpoint(ip == 0x5501)");
        assert_eq!(
            format!("{:?}", Breakpoint::Reg { reg: Reg::Cx, value: Comparator::Ge(0x10) }),
            "Breakpoint(cx >= 0x10)"
        );
        assert_eq!(
            format!("{:?}", Breakpoint::Mem { addr: 0x7EFE, value: Comparator::Always }),
            "Breakpoint(mem[0x7efe] always)"
        );
        assert_eq!(Comparator::Never.to_string(), "never");
    }

    #[test]
    fn test_mem_breakpoint_watches_stack() {
        let mut sim = Simulator::load(["push 0xBEEF", "push 0x1", "nop"]).unwrap();
        sim.breakpoints.insert(Breakpoint::Mem { addr: 0x7EFE, value: Comparator::Eq(0xBEEF) });

        sim.run().unwrap();
        assert!(sim.hit_breakpoint());
        assert_eq!(sim.steps_taken(), 1);
    }
}
