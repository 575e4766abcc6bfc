//! Parsing assembly source code into statements.
//!
//! Source is handled one line at a time. Each line is tokenized by [`lex`],
//! then parsed into a [`Line`]: an optional label declaration followed by an optional [`Stmt`].
//!
//! The parser only checks syntax. Operands are kept in their source form ([`OperandSrc`])
//! because classifying them requires the label tables, which are only complete
//! once every line has been read (see [`crate::asm`]).
//!
//! ```
//! use toy_iss::ast::Opcode;
//! use toy_iss::parse::{parse_line, Stmt};
//!
//! let line = parse_line("loop: sub cx, 1 ; count down", 0).unwrap();
//! assert_eq!(line.label.as_deref(), Some("loop"));
//! assert!(matches!(line.stmt, Some(Stmt::Instr { opcode: Opcode::Sub, ref operands }) if operands.len() == 2));
//! ```
pub mod lex;

use std::borrow::Cow;
use std::ops::Range;

use logos::Logos;

use crate::asm::LabelTable;
use crate::ast::{Opcode, Operand, OperandErr, OperandSrc};
use crate::err::ErrSpan;
use lex::{parse_hex, LexErr, Token};

/// A section of the source, selected by a section directive.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Section {
    /// The code section (`.text` or `.code`).
    Text,
    /// The static data section (`.data`).
    Data,
}

/// A statement: the part of a line after its label.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum Stmt {
    /// A section directive.
    Section(Section),
    /// A data directive (`.string`, `.byte`, `.word`), given as the bytes it emits.
    Data(Vec<u8>),
    /// An instruction.
    Instr {
        /// The operation.
        opcode: Opcode,
        /// The operands, as written.
        operands: Vec<OperandSrc>
    },
}

/// A parsed line of source code.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Default)]
pub struct Line {
    /// The label declared on this line, if any.
    pub label: Option<String>,
    /// The span of the label declaration.
    pub label_span: Range<usize>,
    /// The statement on this line, if any.
    pub stmt: Option<Stmt>,
    /// The span of the statement.
    pub stmt_span: Range<usize>,
}

/// Kinds of errors that can occur while loading source code.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum ParseErrKind {
    /// A token could not be read.
    Lex(LexErr),
    /// A token appeared where it is not allowed.
    UnexpectedToken,
    /// The line ended before the statement was complete.
    UnexpectedEol,
    /// A directive which isn't a section or data directive.
    UnknownDirective(String),
    /// A mnemonic which isn't a supported opcode.
    UnsupportedOpcode(String),
    /// An operand which isn't a label, register, memory operand or hex literal.
    InvalidOperand(String),
    /// A memory displacement which isn't a hex literal of at most 0xFFFF.
    InvalidDisplacement(String),
    /// A data value which doesn't fit its directive's width.
    InvalidDataValue(String),
    /// The operands don't fit the opcode.
    Operand(OperandErr),
    /// A label was declared more than once.
    DuplicateLabel(String),
    /// A data directive appeared outside of the data section.
    DataOutsideData,
    /// An instruction appeared inside of the data section.
    InstrInData,
    /// The entry point label was declared in the data section.
    StartInData,
    /// The program has more instructions than the text segment can hold.
    TextOverflow,
    /// The data directives emit more bytes than the data segment can hold.
    DataOverflow,
}
impl std::fmt::Display for ParseErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lex(e)                 => write!(f, "{e}"),
            Self::UnexpectedToken        => f.write_str("unexpected token"),
            Self::UnexpectedEol          => f.write_str("unexpected end of line"),
            Self::UnknownDirective(d)    => write!(f, "unknown directive .{d}"),
            Self::UnsupportedOpcode(m)   => write!(f, "unsupported opcode {m}"),
            Self::InvalidOperand(o)      => write!(f, "invalid operand {o}"),
            Self::InvalidDisplacement(o) => write!(f, "invalid displacement in {o}"),
            Self::InvalidDataValue(v)    => write!(f, "invalid data value {v}"),
            Self::Operand(e)             => write!(f, "{e}"),
            Self::DuplicateLabel(l)      => write!(f, "label {l} was declared multiple times"),
            Self::DataOutsideData        => f.write_str("data directive outside of the data section"),
            Self::InstrInData            => f.write_str("instruction inside of the data section"),
            Self::StartInData            => f.write_str("entry point label _start is in the data section"),
            Self::TextOverflow           => f.write_str("program does not fit in the text segment"),
            Self::DataOverflow           => f.write_str("data does not fit in the data segment"),
        }
    }
}

/// Error from loading source code.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct ParseErr {
    /// The kind of error.
    pub kind: ParseErrKind,
    /// The zero-based line the error occurred on.
    pub line: usize,
    /// The byte range within the line associated with this error.
    pub span: Range<usize>
}
impl ParseErr {
    /// Creates a new [`ParseErr`].
    pub fn new(kind: ParseErrKind, line: usize, span: Range<usize>) -> Self {
        ParseErr { kind, line, span }
    }
}
impl std::fmt::Display for ParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line + 1, self.kind)
    }
}
impl std::error::Error for ParseErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ParseErrKind::Lex(e) => Some(e),
            ParseErrKind::Operand(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for ParseErr {
    fn span(&self) -> Option<ErrSpan> {
        Some(ErrSpan::new(self.line, self.span.clone()))
    }

    fn help(&self) -> Option<Cow<str>> {
        use crate::err::Error;

        match &self.kind {
            ParseErrKind::Lex(e)                 => e.help(),
            ParseErrKind::UnexpectedToken        => None,
            ParseErrKind::UnexpectedEol          => None,
            ParseErrKind::UnknownDirective(_)    => Some("the supported directives are .text, .code, .data, .string, .byte, and .word".into()),
            ParseErrKind::UnsupportedOpcode(_)   => Some(format!("the supported opcodes are {}", opcode_list()).into()),
            ParseErrKind::InvalidOperand(_)      => Some("an operand is a label, a register, a hex literal, or a memory operand such as [bp-0x2]".into()),
            ParseErrKind::InvalidDisplacement(_) => Some("a displacement is a hex literal from 0 to 0xFFFF".into()),
            ParseErrKind::InvalidDataValue(_)    => Some(".byte values must fit in 8 bits and .word values must fit in 16 bits".into()),
            ParseErrKind::Operand(e)             => e.help(),
            ParseErrKind::DuplicateLabel(_)      => Some("labels must be unique within a program, try renaming one of the labels".into()),
            ParseErrKind::DataOutsideData        => Some("try adding a .data directive before this line".into()),
            ParseErrKind::InstrInData            => Some("try adding a .text directive before this line".into()),
            ParseErrKind::StartInData            => Some("_start must label an instruction".into()),
            ParseErrKind::TextOverflow           => Some("the text segment holds at most 256 instructions".into()),
            ParseErrKind::DataOverflow           => Some("the data segment holds at most 0x500 bytes".into()),
        }
    }
}

fn opcode_list() -> String {
    Opcode::ALL.iter()
        .map(|op| op.mnemonic())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Tokenizes a line, dropping comments.
fn tokenize(src: &str, line: usize) -> Result<Vec<(Token, Range<usize>)>, ParseErr> {
    Token::lexer(src)
        .spanned()
        .filter(|(t, _)| !matches!(t, Ok(Token::Comment)))
        .map(|(t, span)| match t {
            Ok(t) => Ok((t, span)),
            Err(e) => Err(ParseErr::new(ParseErrKind::Lex(e), line, span)),
        })
        .collect()
}

/// A cursor over the tokens of one line.
struct Parser<'t> {
    tokens: &'t [(Token, Range<usize>)],
    index: usize,
    line: usize,
    eol: usize,
}
impl<'t> Parser<'t> {
    fn new(tokens: &'t [(Token, Range<usize>)], line: usize, eol: usize) -> Self {
        Self { tokens, index: 0, line, eol }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.index).map(|(t, _)| t)
    }
    fn peek_nth(&self, n: usize) -> Option<&'t Token> {
        self.tokens.get(self.index + n).map(|(t, _)| t)
    }

    /// The span of the current token (or an empty span at the end of the line).
    fn cursor(&self) -> Range<usize> {
        match self.tokens.get(self.index) {
            Some((_, span)) => span.clone(),
            None => self.eol..self.eol,
        }
    }
    /// The start of the current token.
    fn start(&self) -> usize {
        self.cursor().start
    }
    /// The end of the last consumed token.
    fn end(&self) -> usize {
        match self.index.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some((_, span)) => span.end,
            None => 0,
        }
    }

    fn is_done(&self) -> bool {
        self.index >= self.tokens.len()
    }

    fn err(&self, kind: ParseErrKind) -> ParseErr {
        ParseErr::new(kind, self.line, self.cursor())
    }
    fn unexpected(&self) -> ParseErr {
        match self.is_done() {
            true  => self.err(ParseErrKind::UnexpectedEol),
            false => self.err(ParseErrKind::UnexpectedToken),
        }
    }

    /// Consumes the given token, or errors.
    fn expect(&mut self, tok: &Token) -> Result<(), ParseErr> {
        match self.peek() {
            Some(t) if t == tok => {
                self.index += 1;
                Ok(())
            },
            _ => Err(self.unexpected())
        }
    }
    /// Consumes a word, or errors.
    fn expect_word(&mut self) -> Result<&'t str, ParseErr> {
        match self.peek() {
            Some(Token::Word(w)) => {
                self.index += 1;
                Ok(w)
            },
            _ => Err(self.unexpected())
        }
    }
    /// Errors if there are tokens left.
    fn expect_eol(&self) -> Result<(), ParseErr> {
        match self.is_done() {
            true  => Ok(()),
            false => Err(self.err(ParseErrKind::UnexpectedToken)),
        }
    }

    /// Parses an optional `label:` prefix.
    fn parse_label(&mut self) -> Option<String> {
        match (self.peek(), self.peek_nth(1)) {
            (Some(Token::Word(w)), Some(Token::Colon)) => {
                self.index += 2;
                Some(w.clone())
            },
            _ => None
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseErr> {
        let stmt = match self.peek() {
            Some(Token::Directive(d)) => {
                self.index += 1;
                self.parse_directive(d)?
            },
            Some(Token::Word(mnemonic)) => {
                let opcode = mnemonic.parse::<Opcode>()
                    .map_err(|_| self.err(ParseErrKind::UnsupportedOpcode(mnemonic.clone())))?;
                self.index += 1;

                let operands = match self.is_done() {
                    true  => vec![],
                    false => self.parse_comma_sep(Self::parse_operand)?,
                };
                Stmt::Instr { opcode, operands }
            },
            _ => return Err(self.unexpected())
        };

        self.expect_eol()?;
        Ok(stmt)
    }

    fn parse_directive(&mut self, directive: &str) -> Result<Stmt, ParseErr> {
        match &*directive.to_ascii_lowercase() {
            "text" | "code" => Ok(Stmt::Section(Section::Text)),
            "data" => Ok(Stmt::Section(Section::Data)),
            "string" => match self.peek() {
                Some(Token::String(s)) => {
                    self.index += 1;
                    Ok(Stmt::Data(s.clone().into_bytes()))
                },
                _ => Err(self.unexpected())
            },
            "byte" => {
                let values = self.parse_comma_sep(|p| p.parse_data_value(u8::MAX.into()))?;
                // each value fits in u8
                Ok(Stmt::Data(values.into_iter().map(|v| v as u8).collect()))
            },
            "word" => {
                let values = self.parse_comma_sep(|p| p.parse_data_value(u16::MAX))?;
                Ok(Stmt::Data(values.into_iter().flat_map(u16::to_le_bytes).collect()))
            },
            _ => {
                self.index -= 1;
                Err(self.err(ParseErrKind::UnknownDirective(directive.to_string())))
            }
        }
    }

    /// Parses one or more items separated by commas.
    fn parse_comma_sep<T>(&mut self, mut f: impl FnMut(&mut Self) -> Result<T, ParseErr>) -> Result<Vec<T>, ParseErr> {
        let mut items = vec![f(self)?];
        while self.peek() == Some(&Token::Comma) {
            self.index += 1;
            items.push(f(self)?);
        }
        Ok(items)
    }

    /// Parses a possibly negated hex value whose magnitude is at most `max`,
    /// returning it in two's complement (truncated to the width of `max`).
    fn parse_data_value(&mut self, max: u16) -> Result<u16, ParseErr> {
        let start = self.start();
        let neg = self.peek() == Some(&Token::Minus);
        if neg {
            self.index += 1;
        }
        let text = self.expect_word()?;
        let span = start..self.end();

        let invalid = || {
            let text = format!("{}{text}", if neg { "-" } else { "" });
            ParseErr::new(ParseErrKind::InvalidDataValue(text), self.line, span.clone())
        };
        let value = parse_hex(text).ok()
            .filter(|&v| v <= u64::from(max))
            .ok_or_else(invalid)?;
        // value <= max, so this is lossless
        let value = value as u16;

        match neg {
            true  => Ok(value.wrapping_neg() & max),
            false => Ok(value),
        }
    }

    /// Parses an operand in its source form.
    fn parse_operand(&mut self) -> Result<OperandSrc, ParseErr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.index += 1;
                let text = self.expect_word()?.to_string();
                Ok(OperandSrc::Word { neg: true, text })
            },
            Some(Token::Word(w)) => {
                self.index += 1;
                Ok(OperandSrc::Word { neg: false, text: w.clone() })
            },
            Some(Token::LBracket) => {
                self.index += 1;
                let base = self.expect_word()?.to_string();
                let disp = match self.peek() {
                    Some(Token::Plus)  => Some(false),
                    Some(Token::Minus) => Some(true),
                    _ => None,
                };
                let disp = match disp {
                    Some(neg) => {
                        self.index += 1;
                        Some((neg, self.expect_word()?.to_string()))
                    },
                    None => None,
                };
                self.expect(&Token::RBracket)?;
                Ok(OperandSrc::Mem { base, disp })
            },
            _ => Err(self.unexpected())
        }
    }
}

/// Parses a single line of source code.
///
/// `line` is the zero-based line number, used to locate errors.
pub fn parse_line(src: &str, line: usize) -> Result<Line, ParseErr> {
    let tokens = tokenize(src, line)?;
    let mut parser = Parser::new(&tokens, line, src.len());

    let mut result = Line::default();
    let label_start = parser.start();
    if let Some(label) = parser.parse_label() {
        result.label = Some(label);
        result.label_span = label_start..parser.end();
    }

    if !parser.is_done() {
        let stmt_start = parser.start();
        result.stmt = Some(parser.parse_stmt()?);
        result.stmt_span = stmt_start..parser.end();
    }

    Ok(result)
}

/// Parses a single operand, classifying it against the given labels
/// and rewriting any label into its absolute address.
pub fn parse_operand(src: &str, labels: &LabelTable) -> Result<Operand, ParseErr> {
    let tokens = tokenize(src, 0)?;
    let mut parser = Parser::new(&tokens, 0, src.len());

    let operand = parser.parse_operand()?;
    parser.expect_eol()?;

    operand.classify(labels)
        .map(|op| op.resolve())
        .map_err(|kind| ParseErr::new(kind, 0, 0..src.len()))
}
