//! Assembling source code into programs.
//!
//! This module converts lines of source code into a [`Program`]
//! that can be executed by the simulator.
//!
//! The assembler module notably consists of:
//! - [`assemble`]: the main function, which assembles source lines into a program.
//! - [`LabelTable`]: the label tables, which map every label to its segment and offset.
//! - [`Program`]: the assembled program (instructions, data image, labels and entry point).
//!
//! Assembly happens in three passes:
//! 1. Every line is parsed, labels are bound to the current offset of their section,
//!    and data directives are laid out into the data image.
//! 2. Every instruction's operands are classified against the label tables.
//! 3. Labels are rewritten into absolute immediates and the operands are validated
//!    against their opcode.
//!
//! Loading is atomic: the first error aborts assembly and nothing is returned.
use std::collections::BTreeMap;
use std::ops::Range;

use crate::ast::{AsmInstr, Instr, LabelKind, Opcode, OperandSrc};
use crate::parse::{parse_line, ParseErr, ParseErrKind, Section, Stmt};
use crate::sim::mem::{DATA_BASE, DATA_SIZE, TEXT_BASE, TEXT_SIZE};

/// The label which marks the entry point of a program.
pub const ENTRY_LABEL: &str = "_start";

/// Assembles lines of source code into a program.
///
/// # Example
/// ```
/// use toy_iss::asm::assemble;
///
/// let src = [
///     ".data",
///     "msg: .string \"hi\"",
///     ".text",
///     "_start:",
///     "    mov ax, msg",
/// ];
/// let program = assemble(src).unwrap();
/// assert_eq!(program.entry(), 0x5500);
/// assert_eq!(program.instrs()[0].to_string(), "mov ax, 0x6b00");
/// assert_eq!(program.labels().lookup("msg"), Some(0x6B00));
/// ```
pub fn assemble<S: AsRef<str>>(lines: impl IntoIterator<Item=S>) -> Result<Program, ParseErr> {
    struct Pending {
        opcode: Opcode,
        operands: Vec<OperandSrc>,
        line: usize,
        span: Range<usize>
    }

    let mut labels = LabelTable::default();
    let mut pending = vec![];
    let mut data = BTreeMap::new();
    let mut data_len: u16 = 0;
    let mut section = Section::Text;

    // Pass 1: read every line.
    for (lno, src) in lines.into_iter().enumerate() {
        let line = parse_line(src.as_ref(), lno)?;

        if let Some(label) = &line.label {
            let result = match section {
                Section::Text => {
                    // pending.len() <= TEXT_SIZE, checked below
                    labels.insert_text(label, pending.len() as u16)
                },
                Section::Data if label == ENTRY_LABEL => Err(ParseErrKind::StartInData),
                Section::Data => labels.insert_data(label, data_len),
            };
            result.map_err(|kind| ParseErr::new(kind, lno, line.label_span.clone()))?;
        }

        let err = |kind| ParseErr::new(kind, lno, line.stmt_span.clone());
        match line.stmt {
            None => {},
            Some(Stmt::Section(s)) => section = s,
            Some(Stmt::Data(bytes)) => {
                if section != Section::Data {
                    return Err(err(ParseErrKind::DataOutsideData));
                }
                let end = usize::from(data_len) + bytes.len();
                if end > usize::from(DATA_SIZE) {
                    return Err(err(ParseErrKind::DataOverflow));
                }
                for byte in bytes {
                    data.insert(DATA_BASE + data_len, byte);
                    data_len += 1;
                }
            },
            Some(Stmt::Instr { opcode, operands }) => {
                if section != Section::Text {
                    return Err(err(ParseErrKind::InstrInData));
                }
                if pending.len() >= usize::from(TEXT_SIZE) {
                    return Err(err(ParseErrKind::TextOverflow));
                }
                pending.push(Pending { opcode, operands, line: lno, span: line.stmt_span.clone() });
            },
        }
    }

    // Pass 2 and 3: classify operands, rewrite labels, validate.
    let mut instrs = Vec::with_capacity(pending.len());
    let mut lines = Vec::with_capacity(pending.len());
    for Pending { opcode, operands, line, span } in pending {
        let err = |kind| ParseErr::new(kind, line, span.clone());

        let operands = operands.iter()
            .map(|op| op.classify(&labels))
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;

        let instr = AsmInstr { opcode, operands }.into_instr();
        instr.opcode.check_operands(&instr.operands)
            .map_err(|e| err(ParseErrKind::Operand(e)))?;

        instrs.push(instr);
        lines.push(Some(line));
    }

    let entry = TEXT_BASE + labels.lookup_text(ENTRY_LABEL).unwrap_or(0);
    tracing::debug!(
        instrs = instrs.len(),
        data_bytes = data.len(),
        entry = format_args!("{entry:#06x}"),
        "assembled program"
    );

    Ok(Program { instrs, lines, data, labels, entry })
}

/// The label tables of a program.
///
/// Labels are kept in two tables, one for each segment.
/// A text label's offset counts instructions from the start of the text segment,
/// and a data label's offset counts bytes from the start of the data segment.
///
/// A label name is unique across both tables.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct LabelTable {
    text: BTreeMap<String, u16>,
    data: BTreeMap<String, u16>,
}
impl LabelTable {
    fn check_unique(&self, label: &str) -> Result<(), ParseErrKind> {
        match self.text.contains_key(label) || self.data.contains_key(label) {
            true  => Err(ParseErrKind::DuplicateLabel(label.to_string())),
            false => Ok(()),
        }
    }

    /// Binds a text label to an instruction offset.
    pub fn insert_text(&mut self, label: &str, offset: u16) -> Result<(), ParseErrKind> {
        self.check_unique(label)?;
        self.text.insert(label.to_string(), offset);
        Ok(())
    }
    /// Binds a data label to a byte offset.
    pub fn insert_data(&mut self, label: &str, offset: u16) -> Result<(), ParseErrKind> {
        self.check_unique(label)?;
        self.data.insert(label.to_string(), offset);
        Ok(())
    }

    /// Gets the offset of a text label.
    pub fn lookup_text(&self, label: &str) -> Option<u16> {
        self.text.get(label).copied()
    }
    /// Gets the offset of a data label.
    pub fn lookup_data(&self, label: &str) -> Option<u16> {
        self.data.get(label).copied()
    }
    /// Gets the absolute address of a label in either table.
    pub fn lookup(&self, label: &str) -> Option<u16> {
        self.get(label).map(|(kind, off)| kind.base().wrapping_add(off))
    }
    /// Gets the segment and offset of a label in either table.
    pub fn get(&self, label: &str) -> Option<(LabelKind, u16)> {
        self.lookup_text(label).map(|off| (LabelKind::Text, off))
            .or_else(|| self.lookup_data(label).map(|off| (LabelKind::Data, off)))
    }

    /// Gets a label at the given absolute address, if there is one.
    ///
    /// If several labels share the address, the alphabetically first is returned.
    pub fn rev_lookup(&self, addr: u16) -> Option<&str> {
        self.iter()
            .find(|&(_, kind, off)| kind.base().wrapping_add(off) == addr)
            .map(|(label, _, _)| label)
    }

    /// Iterates over every label, text labels first.
    pub fn iter(&self) -> impl Iterator<Item=(&str, LabelKind, u16)> + '_ {
        let text = self.text.iter().map(|(l, &off)| (&**l, LabelKind::Text, off));
        let data = self.data.iter().map(|(l, &off)| (&**l, LabelKind::Data, off));
        text.chain(data)
    }
}

/// An assembled program.
///
/// A program is created once (with [`assemble`] or [`Program::from_instrs`])
/// and never mutated afterwards. The simulator shares it across every machine state.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Program {
    instrs: Vec<Instr>,
    lines: Vec<Option<usize>>,
    data: BTreeMap<u16, u8>,
    labels: LabelTable,
    entry: u16,
}
impl Program {
    /// Creates a program directly from a list of instructions.
    ///
    /// The program has no data, no labels, and starts at the first instruction.
    /// The instructions are not validated, so this can also be used
    /// to construct programs the assembler would reject.
    pub fn from_instrs(instrs: Vec<Instr>) -> Self {
        Self {
            lines: vec![None; instrs.len()],
            instrs,
            data: BTreeMap::new(),
            labels: LabelTable::default(),
            entry: TEXT_BASE,
        }
    }

    /// The instructions of this program, in text segment order.
    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }
    /// Gets the instruction at the given absolute address.
    pub fn instr_at(&self, addr: u16) -> Option<&Instr> {
        let index = addr.checked_sub(TEXT_BASE)?;
        match index < TEXT_SIZE {
            true  => self.instrs.get(usize::from(index)),
            false => None,
        }
    }
    /// The (zero-based) source line of the instruction at the given absolute address,
    /// if it is known.
    pub fn source_line(&self, addr: u16) -> Option<usize> {
        let index = addr.checked_sub(TEXT_BASE)?;
        self.lines.get(usize::from(index)).copied().flatten()
    }
    /// The initial contents of the data segment, keyed by absolute address.
    pub fn data(&self) -> &BTreeMap<u16, u8> {
        &self.data
    }
    /// The label tables.
    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }
    /// The absolute address of the first instruction to execute.
    pub fn entry(&self) -> u16 {
        self.entry
    }
}
