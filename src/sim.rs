//! Simulating and execution of programs.
//!
//! This module is focused on executing fully assembled programs
//! (i.e., [`Program`]).
//!
//! This module consists of:
//! - [`Simulator`]: The struct that simulates assembled code.
//! - [`mem`]: The module handling registers, flags and memory.
//! - [`state`]: The module handling snapshots of the machine.
//! - [`debug`]: The module handling types of breakpoints for the simulator.
//!
//! # Usage
//!
//! To simulate some code, you first need to load it:
//!
//! ```
//! use toy_iss::sim::Simulator;
//!
//! let mut sim = Simulator::load(["mov ax, 0x05", "mov bx, ax", "cmp ax, bx"]).unwrap();
//! ```
//!
//! Then, the program can be stepped through one instruction at a time:
//!
//! ```
//! # use toy_iss::sim::Simulator;
//! # let mut sim = Simulator::load(["mov ax, 0x05", "mov bx, ax", "cmp ax, bx"]).unwrap();
//! sim.step().unwrap(); // mov ax, 0x05
//! sim.step().unwrap(); // mov bx, ax
//! sim.step().unwrap(); // cmp ax, bx
//! assert!(sim.flags().zf);
//! ```
//!
//! Every step pushes a snapshot of the machine, so steps can be undone with [`Simulator::prev`]:
//!
//! ```
//! # use toy_iss::sim::Simulator;
//! # let mut sim = Simulator::load(["mov ax, 0x05", "mov bx, ax", "cmp ax, bx"]).unwrap();
//! # sim.step().unwrap();
//! # sim.step().unwrap();
//! # sim.step().unwrap();
//! sim.prev();
//! assert!(!sim.flags().zf);
//! assert_eq!(sim.instruction_pointer(), 0x5502);
//! ```
//!
//! Alternatively, the program can be run until it ends, a breakpoint matches, or a fault occurs
//! (see [`Simulator::run`], [`Simulator::run_with_limit`], [`Simulator::run_while`]).
//!
//! ```
//! use toy_iss::ast::Reg;
//! use toy_iss::sim::Simulator;
//!
//! let mut sim = Simulator::load([
//!     "    mov cx, 0x3",
//!     "    mov ax, 0x1",
//!     "loop:",
//!     "    add ax, ax",
//!     "    sub cx, 0x1",
//!     "    jne loop",
//! ]).unwrap();
//! sim.run().unwrap();
//! assert!(sim.at_end());
//! assert_eq!(sim.registers()[Reg::Ax], 0x8);
//! ```
pub mod debug;
pub mod mem;
pub mod state;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::asm::{assemble, Program};
use crate::ast::{Instr, Opcode, Operand, OperandErr, Reg};
use crate::parse::ParseErr;

use self::debug::Breakpoint;
use self::mem::{Flags, Memory, RegFile, Segment};
use self::state::{MachineState, StateDiff};

/// Errors that can occur during simulation.
///
/// Any of these is fatal to the step that raised it.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SimErr {
    /// The instruction pointer (or a jump target) is outside of the instruction stream.
    InvalidAddress(u16),
    /// The instruction's operands are not legal for its opcode.
    InvalidOperand(OperandErr),
    /// An instruction attempted to write outside of the stack segment.
    SegmentViolation(u16),
}
impl std::fmt::Display for SimErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimErr::InvalidAddress(addr)   => write!(f, "invalid address {addr:#06x}"),
            SimErr::InvalidOperand(e)      => write!(f, "invalid operand: {e}"),
            SimErr::SegmentViolation(addr) => write!(f, "segment violation writing to {addr:#06x}"),
        }
    }
}
impl std::error::Error for SimErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimErr::InvalidOperand(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for SimErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        use crate::err::Error;

        match self {
            SimErr::InvalidAddress(_)   => Some("instructions live in the text segment, from 0x5500 to 0x55ff".into()),
            SimErr::InvalidOperand(e)   => e.help(),
            SimErr::SegmentViolation(_) => Some("only the stack segment (0x7000 to 0x7fff) can be written to".into()),
        }
    }
}

/// Reason for why execution paused if it wasn't due to an error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
enum PauseCondition {
    /// The instruction pointer left the instruction stream.
    EndOfProgram,
    /// Program hit a breakpoint.
    Breakpoint,
    /// Program hit a tripwire condition.
    Tripwire,
    /// Program hit an error and did not pause successfully.
    #[default]
    Unsuccessful
}

/// Configuration for [`Simulator`].
///
/// These can be modified after the `Simulator` is created
/// (through [`Simulator::config`]) and their effects should still apply.
///
/// Read the field descriptions for more details.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct SimConfig {
    /// The maximum number of snapshots kept in the history (including the current state).
    ///
    /// When the history is full, the oldest snapshots are discarded,
    /// so [`Simulator::prev`] can only undo the most recent steps.
    /// A cap below 1 is treated as 1.
    ///
    /// By default, this is `None` (the history grows with every step).
    pub max_history: Option<usize>,

    /// Whether a fault during execution also discards the snapshot pushed by the faulting step.
    ///
    /// If `false`, a step which faults while executing (e.g., with a segment violation)
    /// still leaves its snapshot in the history, with the instruction pointer advanced past
    /// the faulting instruction. If `true`, the machine is left exactly as it was before the step.
    ///
    /// Faults detected before execution (an invalid instruction pointer or illegal operands)
    /// never push a snapshot.
    ///
    /// By default, this flag is `false`.
    pub rollback_on_fault: bool,
}

/// Executes assembled code.
///
/// The simulator holds the program (shared, never mutated) and a history of machine states.
/// The last state of the history is the current state, and the history always holds at least
/// that state.
#[derive(Debug)]
pub struct Simulator {
    program: Arc<Program>,

    /// Every state before the current state, oldest first.
    past: VecDeque<MachineState>,

    /// The current state.
    current: MachineState,

    /// The number of instructions successfully run since this `Simulator` was initialized.
    ///
    /// This can be set to 0 to reset the counter.
    pub instructions_run: u64,

    /// Indicates the reason why the last execution (via [`Simulator::run_while`] and adjacent)
    /// had paused.
    pause_condition: PauseCondition,

    // ------------------ CONFIG/DEBUG STATE ------------------
    // Calling [`Simulator::reset`] does not reset these values.

    /// Configuration settings for the simulator.
    ///
    /// These are preserved between resets.
    ///
    /// See [`SimConfig`] for more details on what configuration
    /// settings are available.
    pub config: SimConfig,

    /// Breakpoints for the simulator.
    pub breakpoints: HashSet<Breakpoint>,
}
impl Simulator where Simulator: Send + Sync {}

impl Simulator {
    /// Creates a new simulator for the given program.
    pub fn new(program: Program, config: SimConfig) -> Self {
        let program = Arc::new(program);
        Self {
            current: Self::initial_state(&program),
            program,
            past: VecDeque::new(),
            instructions_run: 0,
            pause_condition: Default::default(),

            config,
            breakpoints: Default::default(),
        }
    }

    /// Assembles source lines and creates a simulator for them.
    pub fn load<S: AsRef<str>>(lines: impl IntoIterator<Item=S>) -> Result<Self, ParseErr> {
        Self::load_with_config(lines, SimConfig::default())
    }

    /// Assembles source lines and creates a simulator for them with the given configuration.
    pub fn load_with_config<S: AsRef<str>>(lines: impl IntoIterator<Item=S>, config: SimConfig) -> Result<Self, ParseErr> {
        assemble(lines).map(|program| Self::new(program, config))
    }

    fn initial_state(program: &Program) -> MachineState {
        let mut state = MachineState::new();
        state.mem.extend(program.data().iter().map(|(&a, &b)| (a, b)));
        state.regs[Reg::Ip] = program.entry();
        state
    }

    /// Resets the simulator.
    ///
    /// This discards the history and returns to the program's initial state
    /// (data loaded, instruction pointer at the entry point),
    /// while preserving configuration and breakpoints.
    pub fn reset(&mut self) {
        self.current = Self::initial_state(&self.program);
        self.past.clear();
        self.instructions_run = 0;
        self.pause_condition = Default::default();
    }

    /// The loaded program.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The current machine state.
    pub fn state(&self) -> &MachineState {
        &self.current
    }

    /// The register file of the current state.
    pub fn registers(&self) -> &RegFile {
        &self.current.regs
    }

    /// The flags of the current state.
    pub fn flags(&self) -> Flags {
        self.current.flags
    }

    /// The memory of the current state.
    pub fn memory(&self) -> &Memory {
        &self.current.mem
    }

    /// Reads the (little-endian) word at the given address.
    pub fn memory_read(&self, addr: u16) -> u16 {
        self.current.mem.read_word(addr)
    }

    /// Reads the byte at the given address.
    pub fn memory_byte(&self, addr: u16) -> u8 {
        self.current.mem.get_byte(addr)
    }

    /// The address of the next instruction to execute.
    pub fn instruction_pointer(&self) -> u16 {
        self.current.regs[Reg::Ip]
    }

    /// Lists every instruction of the program with its address, in source syntax.
    pub fn instructions(&self) -> impl Iterator<Item=(u16, String)> + '_ {
        (mem::TEXT_BASE..).zip(self.program.instrs())
            .map(|(addr, instr)| (addr, instr.to_string()))
    }

    /// The number of snapshots in the history (including the current state).
    pub fn history_len(&self) -> usize {
        self.past.len() + 1
    }

    /// The number of steps that can currently be undone.
    pub fn steps_taken(&self) -> usize {
        self.past.len()
    }

    /// Whether the instruction pointer is outside of the instruction stream
    /// (so there is nothing left to execute).
    pub fn at_end(&self) -> bool {
        self.program.instr_at(self.instruction_pointer()).is_none()
    }

    /// Indicates whether the last execution of the simulator hit a breakpoint.
    pub fn hit_breakpoint(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Breakpoint)
    }

    /// Indicates whether the last execution of the simulator ran to the end of the program.
    pub fn hit_end(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::EndOfProgram)
    }

    /// Computes what the last step changed, if there is a step to compare against.
    pub fn last_change(&self) -> Option<StateDiff> {
        self.past.back().map(|prev| prev.diff(&self.current))
    }

    /// Drops the oldest snapshots until the history fits its cap.
    fn enforce_history_cap(&mut self) {
        if let Some(cap) = self.config.max_history {
            let max_past = cap.max(1) - 1;
            while self.past.len() > max_past {
                self.past.pop_front();
            }
        }
    }

    /// Simulate one step, executing one instruction.
    ///
    /// The step fetches the instruction at the instruction pointer and validates its operands.
    /// If either fails, the step errors without changing anything.
    ///
    /// Otherwise, a snapshot of the current state is pushed to the history,
    /// the instruction pointer is incremented, and the instruction is executed.
    /// If execution faults, the registers, flags and memory are unchanged,
    /// but the snapshot remains and the instruction pointer stays incremented
    /// (unless [`SimConfig::rollback_on_fault`] is set).
    pub fn step(&mut self) -> Result<(), SimErr> {
        let ip = self.instruction_pointer();
        let program = Arc::clone(&self.program);
        let instr = program.instr_at(ip).ok_or(SimErr::InvalidAddress(ip))?;
        instr.opcode.check_operands(&instr.operands)
            .map_err(SimErr::InvalidOperand)?;

        self.past.push_back(self.current.clone());
        self.current.regs[Reg::Ip] = ip.wrapping_add(1);
        tracing::trace!(ip = format_args!("{ip:#06x}"), %instr, "step");

        let result = self.execute(instr);
        match result {
            Ok(()) => self.instructions_run += 1,
            Err(e) => {
                tracing::debug!(ip = format_args!("{ip:#06x}"), %instr, error = %e, "step faulted");
                if self.config.rollback_on_fault {
                    if let Some(state) = self.past.pop_back() {
                        self.current = state;
                    }
                }
            }
        }

        self.enforce_history_cap();
        result
    }

    /// Steps back, restoring the state before the last step.
    ///
    /// If there is no step to undo, this does nothing.
    pub fn prev(&mut self) {
        if let Some(state) = self.past.pop_back() {
            self.current = state;
            tracing::trace!(ip = format_args!("{:#06x}", self.instruction_pointer()), "undo");
        }
    }

    /// Runs until the tripwire condition returns false (or any of the typical breaks occur).
    ///
    /// The typical break conditions are:
    /// - the instruction pointer leaves the instruction stream
    /// - A breakpoint matches
    /// - A fault occurs (in which case the fault is returned)
    pub fn run_while(&mut self, mut tripwire: impl FnMut(&mut Simulator) -> bool) -> Result<(), SimErr> {
        std::mem::take(&mut self.pause_condition);

        // event loop
        // run until:
        // 1. the program ends
        // 2. the tripwire condition returns false
        // 3. any of the breakpoints are hit
        let result = loop {
            if self.at_end() {
                break Ok(PauseCondition::EndOfProgram);
            }
            if !tripwire(self) {
                break Ok(PauseCondition::Tripwire);
            }

            if let Err(e) = self.step() {
                break Err(e);
            }

            // After executing, check that any breakpoints were hit.
            if self.breakpoints.iter().any(|bp| bp.check(self)) {
                break Ok(PauseCondition::Breakpoint);
            }
        };

        self.pause_condition = result?;
        Ok(())
    }

    /// Execute the program.
    ///
    /// This blocks until the program ends.
    /// If you would like to limit the maximum number of steps to execute, consider [`Simulator::run_with_limit`].
    pub fn run(&mut self) -> Result<(), SimErr> {
        self.run_while(|_| true)
    }

    /// Execute the program with a limit on how many steps to execute.
    ///
    /// This blocks until the program ends or until the number of steps to execute has been hit.
    pub fn run_with_limit(&mut self, max_steps: u64) -> Result<(), SimErr> {
        let i = self.instructions_run;
        self.run_while(|sim| sim.instructions_run.wrapping_sub(i) < max_steps)
    }

    /// Computes the address a memory operand accesses.
    fn effective_address(&self, base: Reg, disp: i32) -> u16 {
        // |disp| <= 0xFFFF, so truncating is the same as wrapping add/sub
        self.current.regs[base].wrapping_add(disp as u16)
    }

    /// Reads the value of an operand.
    fn read_operand(&self, operand: Operand) -> u16 {
        match operand {
            Operand::Reg(reg) => self.current.regs[reg],
            Operand::Imm(imm) => imm,
            Operand::Mem { base, disp } => {
                let addr = self.effective_address(base, disp);
                self.current.mem.read_word(addr)
            },
        }
    }

    /// Writes a value into an operand.
    ///
    /// If this errors, nothing is written.
    fn write_operand(&mut self, operand: Operand, value: u16) -> Result<(), SimErr> {
        match operand {
            Operand::Reg(reg) => {
                self.current.regs[reg] = value;
                Ok(())
            },
            Operand::Imm(_) => Err(SimErr::InvalidOperand(OperandErr::ImmDest)),
            Operand::Mem { base, disp } => {
                let addr = self.effective_address(base, disp);
                self.current.mem.write_word(addr, value)
            },
        }
    }

    /// Verifies the target of a jump is inside the text segment.
    fn check_jump(target: u16) -> Result<u16, SimErr> {
        match Segment::of(target) {
            Some(Segment::Text) => Ok(target),
            _ => Err(SimErr::InvalidAddress(target)),
        }
    }

    /// Executes an instruction on the current state.
    ///
    /// The instruction pointer has already been incremented.
    /// Every handler computes its results before writing any of them,
    /// so a fault leaves the state unchanged.
    fn execute(&mut self, instr: &Instr) -> Result<(), SimErr> {
        match (instr.opcode, &*instr.operands) {
            (Opcode::Mov, &[dst, src]) => {
                let value = self.read_operand(src);
                self.write_operand(dst, value)
            },
            (Opcode::Add, &[dst, src]) => {
                let result = self.read_operand(dst).wrapping_add(self.read_operand(src));
                self.write_operand(dst, result)
            },
            (Opcode::Sub, &[dst, src]) => {
                let result = self.read_operand(dst).wrapping_sub(self.read_operand(src));
                self.write_operand(dst, result)?;
                self.current.flags.zf = result == 0;
                Ok(())
            },
            (Opcode::Cmp, &[dst, src]) => {
                let result = self.read_operand(dst).wrapping_sub(self.read_operand(src));
                self.current.flags.zf = result == 0;
                Ok(())
            },
            (Opcode::Mul, &[src]) => {
                let product = u32::from(self.current.regs[Reg::Ax]) * u32::from(self.read_operand(src));
                let [lo, hi] = [product as u16, (product >> 16) as u16];

                let regs = &mut self.current.regs;
                regs[Reg::Ax] = lo;
                regs[Reg::Dx] = hi;

                let flags = &mut self.current.flags;
                flags.cf = hi != 0;
                flags.of = hi != 0;
                Ok(())
            },
            (Opcode::Jmp, &[target]) => self.jump(target),
            (Opcode::Jne, &[target]) => match self.current.flags.zf {
                true  => Ok(()),
                false => self.jump(target),
            },
            (Opcode::Je, &[target]) => match self.current.flags.zf {
                true  => self.jump(target),
                false => Ok(()),
            },
            (Opcode::Push, &[src]) => self.push(src),
            (Opcode::Pop, &[dst]) => {
                let value = self.current.mem.read_word(self.current.regs[Reg::Sp]);
                // dst is a register (checked before execution), so this cannot fail
                self.write_operand(dst, value)?;
                // re-read sp, since `pop sp` just overwrote it
                let regs = &mut self.current.regs;
                regs[Reg::Sp] = regs[Reg::Sp].wrapping_add(2);
                Ok(())
            },
            (Opcode::Call, &[target]) => {
                let target = Self::check_jump(self.read_operand(target))?;
                let ret_addr = self.current.regs[Reg::Ip];
                self.push(Operand::Imm(ret_addr))?;
                self.current.regs[Reg::Ip] = target;
                Ok(())
            },
            (Opcode::Ret, &[]) => {
                let sp = self.current.regs[Reg::Sp];
                let target = Self::check_jump(self.current.mem.read_word(sp))?;
                self.current.regs[Reg::Sp] = sp.wrapping_add(2);
                self.current.regs[Reg::Ip] = target;
                Ok(())
            },
            (Opcode::Nop, &[]) => Ok(()),
            (opcode, operands) => Err(SimErr::InvalidOperand(OperandErr::WrongCount {
                expected: opcode.arity(),
                found: operands.len()
            })),
        }
    }

    fn jump(&mut self, target: Operand) -> Result<(), SimErr> {
        let target = Self::check_jump(self.read_operand(target))?;
        self.current.regs[Reg::Ip] = target;
        Ok(())
    }

    /// Lowers `sp` by 2, then writes `src` (read against the lowered `sp`) to `[sp]`.
    ///
    /// If the write faults, `sp` is restored.
    fn push(&mut self, src: Operand) -> Result<(), SimErr> {
        let sp = self.current.regs[Reg::Sp];
        let new_sp = sp.wrapping_sub(2);
        self.current.regs[Reg::Sp] = new_sp;

        let value = self.read_operand(src);
        let result = self.current.mem.write_word(new_sp, value);
        if result.is_err() {
            self.current.regs[Reg::Sp] = sp;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use crate::asm::Program;
    use crate::ast::{Instr, Opcode, Operand, OperandErr, Reg};
    use crate::sim::debug::{Breakpoint, Comparator};
    use crate::sim::mem::{STACK_BASE, TEXT_BASE};

    use super::{SimConfig, SimErr, Simulator};

    fn load(src: &[&str]) -> Simulator {
        Simulator::load(src).unwrap()
    }
    fn steps(sim: &mut Simulator, n: usize) {
        for _ in 0..n {
            sim.step().unwrap();
        }
    }

    #[test]
    fn test_initial_state() {
        let sim = load(&["nop"]);
        for (reg, value) in sim.registers().iter() {
            let expected = match reg {
                Reg::Sp | Reg::Bp => STACK_BASE,
                Reg::Ip => TEXT_BASE,
                _ => 0,
            };
            assert_eq!(value, expected, "{reg}");
        }
        assert_eq!(sim.flags(), Default::default());
        assert_eq!(sim.history_len(), 1);
        assert_eq!(sim.steps_taken(), 0);
    }

    #[test]
    fn test_cmp_equal_sets_zf() {
        let mut sim = load(&["mov ax, 0x05", "mov bx, ax", "cmp ax, bx"]);
        steps(&mut sim, 3);
        assert!(sim.flags().zf);
    }

    #[test]
    fn test_push() {
        let mut sim = load(&["mov ax, 0x1234", "push ax"]);
        steps(&mut sim, 2);
        let sp = sim.registers()[Reg::Sp];
        assert_eq!(sp, STACK_BASE - 2);
        assert_eq!(sim.memory_read(sp), 0x1234);
        assert_eq!(sim.memory_byte(sp), 0x34);
        assert_eq!(sim.memory_byte(sp + 1), 0x12);
    }

    #[test]
    fn test_mul() {
        let mut sim = load(&["mov ax, 0x03", "mov bx, 0x02", "mul bx"]);
        steps(&mut sim, 3);
        assert_eq!(sim.registers()[Reg::Ax], 0x06);
        assert_eq!(sim.registers()[Reg::Dx], 0);
        assert!(!sim.flags().cf);
        assert!(!sim.flags().of);
    }

    #[test]
    fn test_mul_overflow_from_memory() {
        let mut sim = load(&[
            ".data",
            "x: .word 0xBEEF",
            ".text",
            "mov ax, 0x10",
            "mov bx, x",
            "mul [bx]",
        ]);
        steps(&mut sim, 3);
        assert_eq!(sim.registers()[Reg::Ax], 0xEEF0);
        assert_eq!(sim.registers()[Reg::Dx], 0x000B);
        assert!(sim.flags().cf);
        assert!(sim.flags().of);
    }

    #[test]
    fn test_loop_entry_defaults_to_start() {
        let mut sim = load(&["loop:", "nop", "jmp loop"]);
        assert_eq!(sim.instruction_pointer(), TEXT_BASE);
        steps(&mut sim, 2);
        assert_eq!(sim.instruction_pointer(), TEXT_BASE);
    }

    #[test]
    fn test_entry_start_label() {
        let mut sim = load(&["mov ax, 1", "_start:", "mov bx, 2"]);
        assert_eq!(sim.instruction_pointer(), TEXT_BASE + 1);
        steps(&mut sim, 1);
        assert_eq!(sim.registers()[Reg::Ax], 0);
        assert_eq!(sim.registers()[Reg::Bx], 2);
        assert!(sim.at_end());
    }

    #[test]
    fn test_segment_violation_keeps_snapshot() {
        let mut sim = load(&["mov bp, 0x6B00", "mov [bp+0x02], ax"]);
        steps(&mut sim, 1);
        let mem_before = sim.memory().clone();
        let regs_before = sim.registers().clone();

        assert_eq!(sim.step(), Err(SimErr::SegmentViolation(0x6B02)));
        assert_eq!(sim.memory(), &mem_before);
        // ip was still advanced
        assert_eq!(sim.instruction_pointer(), TEXT_BASE + 2);
        assert_eq!(sim.history_len(), 3);

        // but everything else is intact
        let mut regs_after = sim.registers().clone();
        regs_after[Reg::Ip] = regs_before[Reg::Ip];
        assert_eq!(regs_after, regs_before);

        // and it can be undone
        sim.prev();
        assert_eq!(sim.instruction_pointer(), TEXT_BASE + 1);
    }

    #[test]
    fn test_rollback_on_fault() {
        let config = SimConfig { rollback_on_fault: true, ..Default::default() };
        let mut sim = Simulator::load_with_config(["mov bp, 0x6B00", "mov [bp+0x02], ax"], config).unwrap();
        steps(&mut sim, 1);
        let before = sim.state().clone();

        assert_eq!(sim.step(), Err(SimErr::SegmentViolation(0x6B02)));
        assert_eq!(sim.state(), &before);
        assert_eq!(sim.history_len(), 2);
    }

    #[test]
    fn test_fetch_fault_pushes_nothing() {
        let mut sim = load(&["nop"]);
        steps(&mut sim, 1);
        assert!(sim.at_end());

        let before = sim.state().clone();
        assert_eq!(sim.step(), Err(SimErr::InvalidAddress(TEXT_BASE + 1)));
        assert_eq!(sim.state(), &before);
        assert_eq!(sim.history_len(), 2);
    }

    #[test]
    fn test_operand_fault_pushes_nothing() {
        let program = Program::from_instrs(vec![
            Instr::new(Opcode::Mov, [Operand::Imm(1), Operand::Reg(Reg::Ax)]),
        ]);
        let mut sim = Simulator::new(program, Default::default());

        assert_eq!(sim.step(), Err(SimErr::InvalidOperand(OperandErr::ImmDest)));
        assert_eq!(sim.instruction_pointer(), TEXT_BASE);
        assert_eq!(sim.history_len(), 1);
    }

    #[test]
    fn test_invalid_jump_target() {
        let mut sim = load(&["jmp 0x1234"]);
        assert_eq!(sim.step(), Err(SimErr::InvalidAddress(0x1234)));
        assert_eq!(sim.instruction_pointer(), TEXT_BASE + 1);

        // end of the text segment is not a valid target
        let mut sim = load(&["jmp 0x5600"]);
        assert_eq!(sim.step(), Err(SimErr::InvalidAddress(0x5600)));
    }

    #[rstest]
    #[case(&["cmp ax, ax", "je 0x1234"], 0x1234)]
    #[case(&["cmp ax, 0x1", "jne 0x1234"], 0x1234)]
    #[case(&["mov ax, 0x6B00", "jmp ax"], 0x6B00)]
    #[case(&["push 0x7000", "jmp [sp]"], 0x7000)]
    #[case(&["call 0x1234"], 0x1234)]
    #[case(&["mov bx, 0x5600", "call bx"], 0x5600)]
    fn test_jump_fault_changes_nothing(#[case] src: &[&str], #[case] target: u16) {
        let mut sim = load(src);
        steps(&mut sim, src.len() - 1);

        let mut expected = sim.state().clone();
        expected.regs[Reg::Ip] += 1;
        assert_eq!(sim.step(), Err(SimErr::InvalidAddress(target)));
        // only ip moved: no return address pushed, sp and flags untouched
        assert_eq!(sim.state(), &expected);
    }

    #[rstest]
    #[case(&["cmp ax, 0x1", "je 0x1234"])]
    #[case(&["cmp ax, ax", "jne 0x1234"])]
    fn test_untaken_jump_skips_target_check(#[case] src: &[&str]) {
        let mut sim = load(src);
        steps(&mut sim, src.len());
        assert!(sim.at_end());
    }

    #[test]
    fn test_push_sp_pushes_lowered_sp() {
        let mut sim = load(&["push sp"]);
        steps(&mut sim, 1);
        assert_eq!(sim.registers()[Reg::Sp], STACK_BASE - 2);
        assert_eq!(sim.memory_read(STACK_BASE - 2), STACK_BASE - 2);
    }

    #[test]
    fn test_truncation() {
        let mut sim = load(&["mov ax, 0x10000", "mov bx, 0xFFFF", "add bx, 0x2", "mov cx, 0x1", "sub cx, 0x2"]);
        steps(&mut sim, 5);
        assert_eq!(sim.registers()[Reg::Ax], 0x0000);
        assert_eq!(sim.registers()[Reg::Bx], 0x0001);
        assert_eq!(sim.registers()[Reg::Cx], 0xFFFF);
        assert!(!sim.flags().zf);
    }

    #[rstest]
    #[case(&["mov ax, 0x2A"], Reg::Ax, 0x2A)]
    #[case(&["mov ax, -1"], Reg::Ax, 0xFFFF)]
    #[case(&["mov [sp-0x2], 0x77", "mov bx, [sp-0x2]"], Reg::Bx, 0x77)]
    #[case(&["mov ax, 0x3", "add ax, ax"], Reg::Ax, 0x6)]
    #[case(&["mov [sp-0x2], 0x5", "add [sp-0x2], 0x5", "mov ax, [sp-0x2]"], Reg::Ax, 0xA)]
    #[case(&["mov ax, 0x5", "sub ax, 0x7"], Reg::Ax, 0xFFFE)]
    #[case(&["mov ax, 0x5", "cmp ax, 0x7"], Reg::Ax, 0x5)]
    #[case(&["mov ax, 0x100", "mov cx, 0x100", "mul cx"], Reg::Dx, 0x1)]
    #[case(&["push 0xBEEF", "pop dx"], Reg::Dx, 0xBEEF)]
    #[case(&["push 0xBEEF", "pop dx"], Reg::Sp, STACK_BASE)]
    #[case(&["push 0x1", "push [sp]", "pop ax", "pop bx"], Reg::Bx, 0x1)]
    #[case(&["push 0x1", "push [sp]", "pop ax"], Reg::Ax, 0x0)]
    #[case(&["push 0x1", "push [sp+0x2]", "pop ax"], Reg::Ax, 0x1)]
    #[case(&["mov ax, 0x1", "push sp", "pop ax"], Reg::Ax, STACK_BASE - 2)]
    #[case(&["push 0x7000", "pop sp"], Reg::Sp, 0x7002)]
    #[case(&["nop"], Reg::Ip, TEXT_BASE + 1)]
    fn test_opcode(#[case] src: &[&str], #[case] reg: Reg, #[case] expected: u16) {
        let mut sim = load(src);
        steps(&mut sim, src.len());
        assert_eq!(sim.registers()[reg], expected);
    }

    #[rstest]
    #[case("sub", true)]
    #[case("cmp", true)]
    #[case("add", false)]
    #[case("mov", false)]
    fn test_zf_only_set_by_sub_cmp(#[case] op: &str, #[case] sets_zf: bool) {
        let line = format!("{op} ax, 0x0");
        let mut sim = load(&[line.as_str()]);
        steps(&mut sim, 1);
        assert_eq!(sim.flags().zf, sets_zf);
    }

    #[rstest]
    #[case(&["mov ax, 0x1", "cmp ax, 0x1", "je skip", "mov bx, 0x1", "skip: nop"], 0)]
    #[case(&["mov ax, 0x1", "cmp ax, 0x2", "je skip", "mov bx, 0x1", "skip: nop"], 1)]
    #[case(&["mov ax, 0x1", "cmp ax, 0x1", "jne skip", "mov bx, 0x1", "skip: nop"], 1)]
    #[case(&["mov ax, 0x1", "cmp ax, 0x2", "jne skip", "mov bx, 0x1", "skip: nop"], 0)]
    fn test_conditional_jumps(#[case] src: &[&str], #[case] bx: u16) {
        let mut sim = load(src);
        sim.run().unwrap();
        assert_eq!(sim.registers()[Reg::Bx], bx);
    }

    #[test]
    fn test_call_ret() {
        let mut sim = load(&[
            "_start:",
            "    call double",
            "    mov bx, ax",
            "    jmp end",
            "double:",
            "    mov ax, 0x21",
            "    add ax, ax",
            "    ret",
            "end:",
        ]);

        steps(&mut sim, 1);
        assert_eq!(sim.instruction_pointer(), TEXT_BASE + 3);
        assert_eq!(sim.registers()[Reg::Sp], STACK_BASE - 2);
        assert_eq!(sim.memory_read(STACK_BASE - 2), TEXT_BASE + 1);

        sim.run().unwrap();
        assert!(sim.hit_end());
        assert_eq!(sim.registers()[Reg::Bx], 0x42);
        assert_eq!(sim.registers()[Reg::Sp], STACK_BASE);
    }

    #[test]
    fn test_ret_to_invalid_address() {
        let mut sim = load(&["ret"]);
        let before = sim.state().clone();
        assert_eq!(sim.step(), Err(SimErr::InvalidAddress(0)));
        sim.prev();
        assert_eq!(sim.state(), &before);
    }

    #[test]
    fn test_push_fault_is_atomic() {
        let mut sim = load(&["mov sp, 0x7000", "push ax"]);
        steps(&mut sim, 1);
        let before = sim.state().clone();
        assert_eq!(sim.step(), Err(SimErr::SegmentViolation(0x6FFE)));
        assert_eq!(sim.registers()[Reg::Sp], 0x7000);
        assert_eq!(sim.memory(), &before.mem);
    }

    #[test]
    fn test_prev_at_start_is_noop() {
        let mut sim = load(&["mov ax, 0x1"]);
        let before = sim.state().clone();
        sim.prev();
        sim.prev();
        assert_eq!(sim.state(), &before);
        assert_eq!(sim.history_len(), 1);
    }

    #[test]
    fn test_max_history() {
        let config = SimConfig { max_history: Some(3), ..Default::default() };
        let mut sim = Simulator::load_with_config(["mov ax, 0x1", "mov ax, 0x2", "mov ax, 0x3", "mov ax, 0x4"], config).unwrap();
        steps(&mut sim, 4);
        assert_eq!(sim.history_len(), 3);

        sim.prev();
        sim.prev();
        sim.prev();
        assert_eq!(sim.registers()[Reg::Ax], 0x2);

        sim.config.max_history = Some(0);
        steps(&mut sim, 1);
        assert_eq!(sim.history_len(), 1);
    }

    #[test]
    fn test_run_with_limit() {
        let mut sim = load(&["loop: add ax, 0x1", "jmp loop"]);
        sim.run_with_limit(10).unwrap();
        assert_eq!(sim.instructions_run, 10);
        assert_eq!(sim.registers()[Reg::Ax], 5);
        assert!(!sim.hit_end());
    }

    #[test]
    fn test_run_stops_on_fault() {
        let mut sim = load(&["mov ax, 0x1", "mov [bx], ax", "mov cx, 0x1"]);
        assert_eq!(sim.run(), Err(SimErr::SegmentViolation(0)));
        assert_eq!(sim.registers()[Reg::Cx], 0);
    }

    #[test]
    fn test_breakpoints() {
        let src = ["loop: add ax, 0x1", "mov [sp-0x2], ax", "jmp loop"];

        let mut sim = load(&src);
        sim.breakpoints.insert(Breakpoint::Reg { reg: Reg::Ax, value: Comparator::Eq(3) });
        sim.run().unwrap();
        assert!(sim.hit_breakpoint());
        assert_eq!(sim.registers()[Reg::Ax], 3);
        assert_eq!(sim.instruction_pointer(), TEXT_BASE + 1);

        let mut sim = load(&src);
        sim.breakpoints.insert(Breakpoint::Mem { addr: STACK_BASE - 2, value: Comparator::Ge(2) });
        sim.run().unwrap();
        assert_eq!(sim.memory_read(STACK_BASE - 2), 2);

        let mut sim = load(&src);
        sim.breakpoints.insert(Breakpoint::Ip(TEXT_BASE + 2));
        sim.run().unwrap();
        assert_eq!(sim.instruction_pointer(), TEXT_BASE + 2);
        assert_eq!(sim.steps_taken(), 2);
    }

    #[test]
    fn test_reset() {
        let mut sim = load(&[".data", "x: .word 0x1234", ".text", "mov ax, 0x1", "push ax"]);
        sim.config.rollback_on_fault = true;
        sim.breakpoints.insert(Breakpoint::Ip(0));
        sim.run().unwrap();

        sim.reset();
        assert_eq!(sim.instruction_pointer(), TEXT_BASE);
        assert_eq!(sim.registers()[Reg::Ax], 0);
        assert_eq!(sim.memory_read(0x6B00), 0x1234);
        assert_eq!(sim.memory_read(STACK_BASE - 2), 0);
        assert_eq!(sim.history_len(), 1);
        assert!(sim.config.rollback_on_fault);
        assert_eq!(sim.breakpoints.len(), 1);
    }

    #[test]
    fn test_instructions_listing() {
        let sim = load(&["start: mov ax, [bp-0x2]", "jmp start", "ret"]);
        let listing: Vec<_> = sim.instructions().collect();
        assert_eq!(listing, [
            (0x5500, "mov ax, [bp-0x2]".to_string()),
            (0x5501, "jmp 0x5500".to_string()),
            (0x5502, "ret".to_string()),
        ]);
    }

    #[test]
    fn test_last_change() {
        let mut sim = load(&["mov ax, 0x7", "push ax", "cmp ax, 0x7"]);
        assert_eq!(sim.last_change(), None);

        steps(&mut sim, 2);
        let diff = sim.last_change().unwrap();
        assert_eq!(diff.regs, [Reg::Sp, Reg::Ip]);
        assert_eq!(diff.mem, [STACK_BASE - 2]);
        assert!(diff.flags.is_empty());

        steps(&mut sim, 1);
        let diff = sim.last_change().unwrap();
        assert_eq!(diff.regs, [Reg::Ip]);
        assert_eq!(diff.flags, ["zf"]);
    }

    const TEMPLATES: &[&str] = &[
        "mov ax, IMM",
        "mov bx, IMM",
        "mov cx, ax",
        "add ax, IMM",
        "add bx, ax",
        "sub cx, IMM",
        "sub ax, bx",
        "cmp ax, IMM",
        "mul bx",
        "mul [sp]",
        "push ax",
        "push IMM",
        "pop dx",
        "mov [sp], bx",
        "mov [bp-0x2], cx",
        "add [sp], ax",
        "mov si, [sp]",
        "mov [si], ax",
        "nop",
    ];

    fn any_program() -> impl Strategy<Value = Vec<String>> {
        let line = (0..TEMPLATES.len(), any::<u16>())
            .prop_map(|(i, imm)| TEMPLATES[i].replace("IMM", &format!("{imm:#x}")));
        proptest::collection::vec(line, 1..40)
    }

    proptest! {
        #[test]
        fn runs_are_deterministic(src in any_program()) {
            let mut a = Simulator::load(&src).unwrap();
            let mut b = Simulator::load(&src).unwrap();

            for _ in 0..src.len() {
                let (ra, rb) = (a.step(), b.step());
                prop_assert_eq!(ra, rb);
                prop_assert_eq!(a.state(), b.state());
                if ra.is_err() { break; }
            }
        }

        #[test]
        fn prev_undoes_step(src in any_program()) {
            let mut sim = Simulator::load(&src).unwrap();

            for _ in 0..src.len() {
                let before = sim.state().clone();
                if sim.step().is_err() { break; }
                let after = sim.state().clone();

                sim.prev();
                prop_assert_eq!(sim.state(), &before);

                sim.step().unwrap();
                prop_assert_eq!(sim.state(), &after);
            }
        }

        #[test]
        fn writes_outside_stack_fail(addr in any::<u16>(), value in any::<u16>()) {
            let src = [format!("mov bx, {addr:#x}"), format!("mov ax, {value:#x}"), "mov [bx], ax".to_string()];
            let mut sim = Simulator::load(&src).unwrap();
            sim.step().unwrap();
            sim.step().unwrap();

            let before = sim.memory().clone();
            let in_stack = |a: u16| (0x7000..0x8000).contains(&a);
            match sim.step() {
                Ok(()) => {
                    prop_assert!(in_stack(addr) && in_stack(addr.wrapping_add(1)));
                    prop_assert_eq!(sim.memory_read(addr), value);
                },
                Err(e) => {
                    prop_assert_eq!(e, SimErr::SegmentViolation(addr));
                    prop_assert!(!in_stack(addr) || !in_stack(addr.wrapping_add(1)));
                    prop_assert_eq!(sim.memory(), &before);
                }
            }
        }
    }
}
