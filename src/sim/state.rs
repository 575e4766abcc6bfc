//! Snapshots of the whole machine.
//!
//! A [`MachineState`] bundles the register file, the flags and the memory.
//! The simulator keeps a stack of these to step backwards.

use std::collections::BTreeSet;

use crate::ast::Reg;

use super::mem::{Flags, Memory, RegFile};

/// One point-in-time snapshot of the machine.
///
/// States have value semantics: cloning a state deep-copies its memory,
/// so mutating a clone never affects the original.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Default)]
pub struct MachineState {
    /// The register file.
    pub regs: RegFile,
    /// The flags.
    pub flags: Flags,
    /// The memory.
    pub mem: Memory,
}
impl MachineState {
    /// Creates the initial machine state.
    ///
    /// All registers are zero except `sp` and `bp` (which hold [`super::mem::STACK_BASE`]),
    /// all flags are clear, and memory is empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes what changed between `self` and `other`.
    ///
    /// # Example
    ///
    /// ```
    /// use toy_iss::ast::Reg;
    /// use toy_iss::sim::state::MachineState;
    ///
    /// let before = MachineState::new();
    /// let mut after = before.clone();
    /// after.regs[Reg::Ax] = 5;
    /// after.flags.zf = true;
    /// after.mem.set_byte(0x7EFE, 1);
    ///
    /// let diff = before.diff(&after);
    /// assert_eq!(diff.regs, [Reg::Ax]);
    /// assert_eq!(diff.flags, ["zf"]);
    /// assert_eq!(diff.mem, [0x7EFE]);
    /// ```
    pub fn diff(&self, other: &MachineState) -> StateDiff {
        let regs = self.regs.iter()
            .zip(other.regs.iter())
            .filter(|((_, a), (_, b))| a != b)
            .map(|((r, _), _)| r)
            .collect();

        let flags = self.flags.iter()
            .zip(other.flags.iter())
            .filter(|((_, a), (_, b))| a != b)
            .map(|((name, _), _)| name)
            .collect();

        let touched: BTreeSet<_> = self.mem.iter()
            .chain(other.mem.iter())
            .map(|(addr, _)| addr)
            .collect();
        let mem = touched.into_iter()
            .filter(|&addr| self.mem.get_byte(addr) != other.mem.get_byte(addr))
            .collect();

        StateDiff { regs, flags, mem }
    }
}

/// The differences between two machine states.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Default)]
pub struct StateDiff {
    /// Registers whose values differ.
    pub regs: Vec<Reg>,
    /// Names of flags whose values differ.
    pub flags: Vec<&'static str>,
    /// Byte addresses whose values differ, in ascending order.
    pub mem: Vec<u16>,
}
impl StateDiff {
    /// Whether the two states were identical.
    pub fn is_empty(&self) -> bool {
        self.regs.is_empty() && self.flags.is_empty() && self.mem.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::Reg;

    use super::MachineState;

    #[test]
    fn test_clone_is_deep() {
        let mut a = MachineState::new();
        a.mem.set_byte(0x7000, 1);

        let mut b = a.clone();
        b.mem.set_byte(0x7000, 2);
        b.regs[Reg::Cx] = 3;

        assert_eq!(a.mem.get_byte(0x7000), 1);
        assert_eq!(a.regs[Reg::Cx], 0);
    }

    #[test]
    fn test_diff_empty() {
        let a = MachineState::new();
        assert!(a.diff(&a.clone()).is_empty());
    }

    #[test]
    fn test_diff_ignores_zero_writes() {
        // explicitly stored zeroes read the same as untouched memory
        let a = MachineState::new();
        let mut b = a.clone();
        b.mem.set_byte(0x7000, 0);
        b.mem.set_byte(0x7001, 9);
        assert_eq!(a.diff(&b).mem, [0x7001]);
        assert_eq!(b.diff(&a).mem, [0x7001]);
    }
}
