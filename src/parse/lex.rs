//! Tokenizing toy assembly.
//!
//! This module holds the tokens that characterize a line of assembly ([`Token`]).
//! It is used by the parser to break each source line into its labels,
//! directives, mnemonics, and operands.
//!
//! Note that the lexer does not decide whether a word is a register, a label,
//! a mnemonic, or a hex literal (e.g., `ab` is a valid hex literal and a valid label).
//! That classification depends on the label tables and is done by the assembler.

use std::num::IntErrorKind;

use logos::{Lexer, Logos};

/// A unit of information in a line of assembly source code.
#[derive(Debug, Logos, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t\r\n]+", error = LexErr)]
pub enum Token {
    /// A bare word.
    ///
    /// This can refer to any of:
    /// - a mnemonic (e.g., `mov`, `jne`)
    /// - a register (e.g., `ax`, `sp`)
    /// - a label (e.g., `loop`, `_start`)
    /// - a hex literal (e.g., `0x1F`, `05`, `ff`)
    #[regex(r"[A-Za-z0-9_]+", |lx| lx.slice().to_string())]
    Word(String),

    /// A directive (e.g., `.data`, `.string`).
    #[regex(r"\.[A-Za-z_]\w*", |lx| lx.slice()[1..].to_string())]
    Directive(String),

    /// A string literal (e.g., `"Hello!"`)
    #[token(r#"""#, lex_str_literal)]
    String(String),

    /// An opening bracket, which starts a memory operand.
    #[token("[")]
    LBracket,

    /// A closing bracket, which ends a memory operand.
    #[token("]")]
    RBracket,

    /// A plus sign, used in memory displacements.
    #[token("+")]
    Plus,

    /// A minus sign, used in memory displacements and negative literals.
    #[token("-")]
    Minus,

    /// A colon, which ends a label declaration.
    #[token(":")]
    Colon,

    /// A comma, which delineates operands of an instruction.
    #[token(",")]
    Comma,

    /// A comment, which starts with a semicolon and spans the remaining part of the line.
    #[regex(r";.*")]
    Comment,
}

/// Any errors raised in attempting to tokenize an input stream.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum LexErr {
    /// Hex literal has invalid hex digits.
    InvalidHex,
    /// Hex literal doesn't have digits (it's just `0x`).
    InvalidHexEmpty,
    /// Hex literal is too large to be represented at all.
    LiteralTooBig,
    /// String literal is missing an end quotation mark.
    UnclosedStrLit,
    /// String literal is too large.
    StrLitTooBig,
    /// A symbol was used which is not allowed in assembly files.
    #[default]
    InvalidSymbol
}
impl std::fmt::Display for LexErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexErr::InvalidHex      => f.write_str("invalid hex literal"),
            LexErr::InvalidHexEmpty => f.write_str("invalid hex literal"),
            LexErr::LiteralTooBig   => f.write_str("hex literal is too large"),
            LexErr::UnclosedStrLit  => f.write_str("unclosed string literal"),
            LexErr::StrLitTooBig    => f.write_str("string literal is too large"),
            LexErr::InvalidSymbol   => f.write_str("unrecognized symbol"),
        }
    }
}
impl std::error::Error for LexErr {}
impl crate::err::Error for LexErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            LexErr::InvalidHex      => Some("a hex literal consists of 0-9, A-F, optionally prefixed with 0x".into()),
            LexErr::InvalidHexEmpty => Some("there should be hex digits (0-9, A-F) after 0x".into()),
            LexErr::LiteralTooBig   => Some("values are truncated to 16 bits, but must fit in 64 bits to be read".into()),
            LexErr::UnclosedStrLit  => Some("add a quote to the end of the string literal".into()),
            LexErr::StrLitTooBig    => Some(format!("string literals are limited to at most {} characters", u16::MAX - 1).into()),
            LexErr::InvalidSymbol   => Some("this char does not occur in any token of the assembly language".into()),
        }
    }
}

/// Helper that converts an int error kind to its corresponding LexErr.
fn convert_int_error(e: &IntErrorKind) -> LexErr {
    match e {
        IntErrorKind::Empty        => LexErr::InvalidHexEmpty,
        IntErrorKind::InvalidDigit => LexErr::InvalidHex,
        IntErrorKind::PosOverflow  => LexErr::LiteralTooBig,
        IntErrorKind::NegOverflow  => LexErr::LiteralTooBig,
        _ => LexErr::InvalidHex,
    }
}

/// Parses the text of a [`Token::Word`] as a hex literal.
///
/// The `0x` (or `0X`) prefix is optional, so `0x1F`, `1F`, and `1f` are all `0x1F`.
///
/// The full value is returned; callers decide whether to truncate it
/// or to reject it for being too wide.
pub fn parse_hex(word: &str) -> Result<u64, LexErr> {
    let digits = word.strip_prefix("0x")
        .or_else(|| word.strip_prefix("0X"))
        .unwrap_or(word);

    // from_str_radix would accept a sign here, which the word regex never produces
    // but a caller might.
    if digits.starts_with(['+', '-']) {
        return Err(LexErr::InvalidHex);
    }

    u64::from_str_radix(digits, 16)
        .map_err(|e| convert_int_error(e.kind()))
}

fn lex_str_literal(lx: &mut Lexer<'_, Token>) -> Result<String, LexErr> {
    let rem = lx.remainder()
        .lines()
        .next()
        .unwrap_or("");

    let mut buf = String::new();
    let mut chars = rem.char_indices();
    let mut end = None;

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                end = Some(i);
                break;
            },
            '\\' => match chars.next() {
                Some((_, 'n'))  => buf.push('\n'),
                Some((_, 'r'))  => buf.push('\r'),
                Some((_, 't'))  => buf.push('\t'),
                Some((_, '\\')) => buf.push('\\'),
                Some((_, '0'))  => buf.push('\0'),
                Some((_, '"'))  => buf.push('"'),
                Some((_, e)) => {
                    buf.push('\\');
                    buf.push(e);
                },
                None => buf.push('\\'),
            },
            c => buf.push(c),
        }
    }

    // consume up to and including the closing quote
    match end {
        Some(n) => lx.bump(n + 1),
        None => {
            lx.bump(rem.len());
            return Err(LexErr::UnclosedStrLit);
        }
    }

    match buf.len() < usize::from(u16::MAX) {
        true  => Ok(buf),
        false => Err(LexErr::StrLitTooBig),
    }
}
