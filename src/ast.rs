//! Components relating to the abstract syntax of toy assembly instructions.
//!
//! These components together are used to construct...
//! - [`AsmInstr`] (an instruction as assembled, whose operands may still reference labels),
//! - and [`Instr`] (an instruction as executed, whose operands are concrete).
//!
//! The operand model has three stages:
//! 1. [`OperandSrc`]: the operand as written in source (produced by the parser).
//! 2. [`AsmOperand`]: the operand after it was classified against the label tables.
//! 3. [`Operand`]: the operand after labels were rewritten into absolute addresses.
//!
//! Only [`Operand`] is ever seen by the simulator.

use std::fmt::Write as _;

use crate::asm::LabelTable;
use crate::parse::lex::{parse_hex, LexErr};
use crate::parse::ParseErrKind;

/// A register.
///
/// Every register holds a 16-bit unsigned word.
///
/// ## Examples
///
/// ```text
/// mov ax, bx
///     ~~  ~~
/// push bp
///      ~~
/// mov [sp+0x02], cx
///      ~~        ~~
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum Reg {
    #[allow(missing_docs)]
    Ax,
    #[allow(missing_docs)]
    Bx,
    #[allow(missing_docs)]
    Cx,
    #[allow(missing_docs)]
    Dx,
    /// Source index.
    Si,
    /// Destination index.
    Di,
    /// Base pointer.
    Bp,
    /// Stack pointer.
    Sp,
    /// Instruction pointer.
    Ip,
}
impl Reg {
    /// All registers, in register file order.
    pub const ALL: [Reg; 9] = [
        Reg::Ax, Reg::Bx, Reg::Cx, Reg::Dx,
        Reg::Si, Reg::Di, Reg::Bp, Reg::Sp, Reg::Ip
    ];

    /// The name of this register in assembly source.
    pub fn name(self) -> &'static str {
        match self {
            Reg::Ax => "ax",
            Reg::Bx => "bx",
            Reg::Cx => "cx",
            Reg::Dx => "dx",
            Reg::Si => "si",
            Reg::Di => "di",
            Reg::Bp => "bp",
            Reg::Sp => "sp",
            Reg::Ip => "ip",
        }
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
impl From<Reg> for usize {
    // Used for indexing the reg file in [`crate::sim::mem::RegFile`].
    fn from(value: Reg) -> Self {
        value as usize
    }
}
impl std::str::FromStr for Reg {
    type Err = ();

    /// Parses a register name (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reg::ALL.into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

macro_rules! opcode_enum {
    ($($(#[$m:meta])* $op:ident = $name:literal / $arity:literal),+) => {
        /// An instruction's operation.
        ///
        /// The set of opcodes is closed: a mnemonic not listed here
        /// is rejected when the program is loaded.
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
        pub enum Opcode {
            $(
                $(#[$m])*
                $op
            ),+
        }

        impl Opcode {
            /// All opcodes.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$op),+];

            /// The mnemonic of this opcode in assembly source.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$op => $name),+
                }
            }

            /// The number of operands this opcode accepts.
            pub fn arity(self) -> usize {
                match self {
                    $(Opcode::$op => $arity),+
                }
            }
        }

        impl std::str::FromStr for Opcode {
            type Err = ();

            /// Parses a mnemonic (case-insensitive).
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($name) { return Ok(Opcode::$op); }
                )+
                Err(())
            }
        }
    };
}
opcode_enum! {
    /// `mov dst, src`: `dst := src`
    Mov = "mov" / 2,
    /// `add dst, src`: `dst := dst + src`
    Add = "add" / 2,
    /// `sub dst, src`: `dst := dst - src`, sets `zf`
    Sub = "sub" / 2,
    /// `cmp dst, src`: computes `dst - src` and sets `zf`
    Cmp = "cmp" / 2,
    /// `mul src`: `dx:ax := ax * src`, sets `cf` and `of`
    Mul = "mul" / 1,
    /// `jmp target`
    Jmp = "jmp" / 1,
    /// `jne target`: jump if `zf` is clear
    Jne = "jne" / 1,
    /// `je target`: jump if `zf` is set
    Je = "je" / 1,
    /// `push src`
    Push = "push" / 1,
    /// `pop dst`
    Pop = "pop" / 1,
    /// `call target`
    Call = "call" / 1,
    /// `ret`
    Ret = "ret" / 0,
    /// `nop`
    Nop = "nop" / 0
}
impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Errors from validating the operands of an instruction against its opcode.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum OperandErr {
    /// The instruction has the wrong number of operands.
    WrongCount {
        /// The number of operands the opcode accepts.
        expected: usize,
        /// The number of operands provided.
        found: usize
    },
    /// The destination operand is an immediate.
    ImmDest,
    /// Both operands access memory.
    MemToMem,
    /// `mul` was given an immediate source.
    MulImm,
}
impl std::fmt::Display for OperandErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperandErr::WrongCount { expected, found } => write!(f, "expected {expected} operand(s), found {found}"),
            OperandErr::ImmDest  => f.write_str("destination operand cannot be an immediate"),
            OperandErr::MemToMem => f.write_str("cannot transfer directly from memory to memory"),
            OperandErr::MulImm   => f.write_str("mul requires a register or memory operand"),
        }
    }
}
impl std::error::Error for OperandErr {}
impl crate::err::Error for OperandErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            OperandErr::WrongCount { .. } => None,
            OperandErr::ImmDest  => Some("the destination must be a register or a memory operand".into()),
            OperandErr::MemToMem => Some("load one of the values into a register first".into()),
            OperandErr::MulImm   => Some("move the immediate into a register first".into()),
        }
    }
}

impl Opcode {
    /// Verifies that the operands are legal for this opcode.
    ///
    /// This is the only operand-kind validation: the assembler runs it on every
    /// instruction at load time, and the simulator runs it again before
    /// executing an instruction.
    pub fn check_operands(self, operands: &[Operand]) -> Result<(), OperandErr> {
        if operands.len() != self.arity() {
            return Err(OperandErr::WrongCount { expected: self.arity(), found: operands.len() });
        }

        match (self, operands) {
            (Opcode::Mov | Opcode::Add | Opcode::Sub | Opcode::Cmp, [dst, src]) => {
                if matches!(dst, Operand::Imm(_)) { return Err(OperandErr::ImmDest) };
                if dst.is_mem() && src.is_mem() { return Err(OperandErr::MemToMem) };
                Ok(())
            },
            (Opcode::Mul, [Operand::Imm(_)]) => Err(OperandErr::MulImm),
            // pop reads from [sp], so its destination can't be memory
            (Opcode::Pop, [Operand::Imm(_)]) => Err(OperandErr::ImmDest),
            (Opcode::Pop, [Operand::Mem { .. }]) => Err(OperandErr::MemToMem),
            _ => Ok(())
        }
    }
}

/// An operand as written in source code, before labels are resolved.
///
/// This is produced by the parser, which does not yet know the label tables.
/// It is converted to an [`AsmOperand`] with [`OperandSrc::classify`].
///
/// ## Examples
///
/// ```text
/// mov ax, -1         ; Word { neg: false, "ax" }, Word { neg: true, "1" }
/// jmp loop           ; Word { neg: false, "loop" }
/// mov [bp-0x4], 0x10 ; Mem { "bp", Some((true, "0x4")) }, Word { neg: false, "0x10" }
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum OperandSrc {
    /// A bare word (a label, a register, or a hex literal), optionally negated.
    Word {
        /// Whether the word was prefixed with `-`.
        neg: bool,
        /// The text of the word.
        text: String
    },
    /// A bracketed memory operand.
    Mem {
        /// The text of the base (which should be a register).
        base: String,
        /// The displacement, given as its sign (true if negative) and its hex text.
        disp: Option<(bool, String)>
    }
}
impl std::fmt::Display for OperandSrc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperandSrc::Word { neg, text } => {
                if *neg { f.write_char('-')?; }
                f.write_str(text)
            },
            OperandSrc::Mem { base, disp } => {
                write!(f, "[{base}")?;
                if let Some((neg, text)) = disp {
                    f.write_char(if *neg { '-' } else { '+' })?;
                    f.write_str(text)?;
                }
                f.write_char(']')
            },
        }
    }
}
impl OperandSrc {
    /// Classifies this operand, in priority order, as:
    /// 1. a text label or a data label known to `labels`,
    /// 2. a register,
    /// 3. a memory operand (whose base must be a register),
    /// 4. a hex immediate (truncated to 16 bits).
    pub fn classify(&self, labels: &LabelTable) -> Result<AsmOperand, ParseErrKind> {
        let invalid = || ParseErrKind::InvalidOperand(self.to_string());

        match self {
            OperandSrc::Word { neg: false, text } => {
                if let Some(off) = labels.lookup_text(text) {
                    return Ok(AsmOperand::Label(LabelKind::Text, off));
                }
                if let Some(off) = labels.lookup_data(text) {
                    return Ok(AsmOperand::Label(LabelKind::Data, off));
                }
                if let Ok(reg) = text.parse::<Reg>() {
                    return Ok(AsmOperand::Operand(Operand::Reg(reg)));
                }
                let value = parse_imm(text).ok_or_else(invalid)??;
                Ok(AsmOperand::Operand(Operand::Imm(value)))
            },
            OperandSrc::Word { neg: true, text } => {
                let value = parse_imm(text).ok_or_else(invalid)??;
                Ok(AsmOperand::Operand(Operand::Imm(value.wrapping_neg())))
            },
            OperandSrc::Mem { base, disp } => {
                let base = base.parse::<Reg>().map_err(|_| invalid())?;
                let disp = match disp {
                    None => 0,
                    Some((neg, text)) => {
                        let magnitude = parse_hex(text).ok()
                            .filter(|&m| m <= u64::from(u16::MAX))
                            .ok_or_else(|| ParseErrKind::InvalidDisplacement(self.to_string()))?;
                        // magnitude fits in u16, so this is lossless
                        let magnitude = magnitude as i32;
                        if *neg { -magnitude } else { magnitude }
                    }
                };
                Ok(AsmOperand::Operand(Operand::Mem { base, disp }))
            },
        }
    }
}

/// Parses an immediate value, truncating it to 16 bits.
///
/// This is `None` if the text is not a hex literal at all,
/// and `Some(Err(_))` if it's a hex literal that can't be read.
fn parse_imm(text: &str) -> Option<Result<u16, ParseErrKind>> {
    match parse_hex(text) {
        Ok(value) => Some(Ok(value as u16)),
        Err(LexErr::LiteralTooBig) => Some(Err(ParseErrKind::Lex(LexErr::LiteralTooBig))),
        Err(_) => None,
    }
}

/// The segment a label was declared in.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum LabelKind {
    /// A label in the text segment. Its offset counts instructions.
    Text,
    /// A label in the data segment. Its offset counts bytes.
    Data,
}
impl LabelKind {
    /// The base address of this label's segment.
    pub fn base(self) -> u16 {
        use crate::sim::mem::{DATA_BASE, TEXT_BASE};

        match self {
            LabelKind::Text => TEXT_BASE,
            LabelKind::Data => DATA_BASE,
        }
    }
}

/// An operand after classification, but before labels are rewritten.
///
/// Label operands hold their offset within their segment
/// and are rewritten to absolute immediates by [`AsmOperand::resolve`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AsmOperand {
    /// A concrete operand.
    Operand(Operand),
    /// A label, given by its segment and its offset in that segment.
    Label(LabelKind, u16),
}
impl AsmOperand {
    /// Rewrites label operands into immediates holding their absolute address.
    pub fn resolve(self) -> Operand {
        match self {
            AsmOperand::Operand(op) => op,
            AsmOperand::Label(kind, off) => Operand::Imm(kind.base().wrapping_add(off)),
        }
    }
}

/// An instruction operand, after label resolution.
///
/// This is the only operand form the simulator executes.
///
/// ## Examples
///
/// ```
/// use toy_iss::ast::{Operand, Reg};
///
/// assert_eq!("ax".parse(), Ok(Operand::Reg(Reg::Ax)));
/// assert_eq!("0x10000".parse(), Ok(Operand::Imm(0x0000)));
/// assert_eq!("[bp-0x02]".parse(), Ok(Operand::Mem { base: Reg::Bp, disp: -2 }));
/// assert_eq!(Operand::Mem { base: Reg::Sp, disp: 4 }.to_string(), "[sp+0x4]");
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Operand {
    /// A register.
    Reg(Reg),
    /// A 16-bit immediate value.
    Imm(u16),
    /// A memory access at `base + disp` (wrapping at 16 bits).
    Mem {
        /// The base register.
        base: Reg,
        /// The signed displacement (its magnitude is at most `0xFFFF`).
        disp: i32
    },
}
impl Operand {
    /// Whether this operand accesses memory.
    pub fn is_mem(&self) -> bool {
        matches!(self, Operand::Mem { .. })
    }
}
impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Operand::Reg(reg) => write!(f, "{reg}"),
            Operand::Imm(imm) => write!(f, "{imm:#06x}"),
            Operand::Mem { base, disp: 0 } => write!(f, "[{base}]"),
            Operand::Mem { base, disp } if disp < 0 => write!(f, "[{base}-{:#x}]", disp.unsigned_abs()),
            Operand::Mem { base, disp } => write!(f, "[{base}+{disp:#x}]"),
        }
    }
}
impl std::str::FromStr for Operand {
    type Err = crate::parse::ParseErr;

    /// Parses a single operand without any labels in scope.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::parse::parse_operand(s, &LabelTable::default())
    }
}

/// An instruction whose operands may still be labels.
///
/// This is converted to an [`Instr`] with [`AsmInstr::into_instr`].
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct AsmInstr {
    /// The operation.
    pub opcode: Opcode,
    /// The operands.
    pub operands: Vec<AsmOperand>
}
impl AsmInstr {
    /// Rewrites all label operands into absolute immediates.
    pub fn into_instr(self) -> Instr {
        Instr {
            opcode: self.opcode,
            operands: self.operands.into_iter()
                .map(AsmOperand::resolve)
                .collect()
        }
    }
}

/// An executable instruction.
///
/// ## Examples
///
/// ```
/// use toy_iss::ast::{Instr, Opcode, Operand, Reg};
///
/// let instr = Instr::new(Opcode::Mov, [Operand::Mem { base: Reg::Bp, disp: -2 }, Operand::Imm(5)]);
/// assert_eq!(instr.to_string(), "mov [bp-0x2], 0x0005");
/// assert_eq!(Instr::new(Opcode::Ret, []).to_string(), "ret");
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Instr {
    /// The operation.
    pub opcode: Opcode,
    /// The operands.
    pub operands: Vec<Operand>
}
impl Instr {
    /// Creates a new instruction.
    pub fn new(opcode: Opcode, operands: impl IntoIterator<Item=Operand>) -> Self {
        Self { opcode, operands: operands.into_iter().collect() }
    }
}
impl std::fmt::Display for Instr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.opcode)?;
        if let Some((first, rest)) = self.operands.split_first() {
            write!(f, " {first}")?;
            for op in rest {
                write!(f, ", {op}")?;
            }
        }
        Ok(())
    }
}
