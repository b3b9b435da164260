//! Checkpoint condition language.
//!
//! Grammar (whitespace is spaces or tabs):
//!
//! ```text
//! condition := REG ( "==" | "=" ) NUMBER
//! REG       := A | X | Y | PC | SP            (case-insensitive)
//! NUMBER    := "$" HEX | "0x" HEX | DECIMAL
//! ```
//!
//! Parsing is split into a tokenizer and a builder that produces a fixed
//! two-level tree: an equality root whose children are a register reference
//! and a constant. Anything after the number other than whitespace is rejected.

use std::fmt;

use crate::machine::Registers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Register {
    A,
    X,
    Y,
    Pc,
    Sp,
}

impl Register {
    fn from_word(word: &str) -> Option<Self> {
        Some(match word.to_ascii_uppercase().as_str() {
            "A" => Register::A,
            "X" => Register::X,
            "Y" => Register::Y,
            "PC" => Register::Pc,
            "SP" => Register::Sp,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::A => "A",
            Register::X => "X",
            Register::Y => "Y",
            Register::Pc => "PC",
            Register::Sp => "SP",
        }
    }

    pub fn read(self, regs: &Registers) -> u32 {
        match self {
            Register::A => regs.a.into(),
            Register::X => regs.x.into(),
            Register::Y => regs.y.into(),
            Register::Pc => regs.pc.into(),
            Register::Sp => regs.sp.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Equal,
}

/// Leaf of a condition tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Register(Register),
    Constant(u32),
}

impl Operand {
    fn value(self, regs: &Registers) -> u32 {
        match self {
            Operand::Register(reg) => reg.read(regs),
            Operand::Constant(value) => value,
        }
    }
}

/// Root of a parsed condition. Immutable once built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConditionNode {
    pub operation: Operation,
    pub left: Operand,
    pub right: Operand,
}

impl ConditionNode {
    pub fn register_equals(register: Register, value: u32) -> Self {
        Self {
            operation: Operation::Equal,
            left: Operand::Register(register),
            right: Operand::Constant(value),
        }
    }

    /// Compares against the registers as they are *now*; callers evaluate at
    /// trigger time (after the store for store watches).
    pub fn evaluate(&self, regs: &Registers) -> bool {
        match self.operation {
            Operation::Equal => self.left.value(regs) == self.right.value(regs),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(reg) => f.write_str(reg.name()),
            Operand::Constant(value) if *value > 0xFF => write!(f, "${value:04X}"),
            Operand::Constant(value) => write!(f, "${value:02X}"),
        }
    }
}

impl fmt::Display for ConditionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation {
            Operation::Equal => write!(f, "{} == {}", self.left, self.right),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error("unknown register")]
    UnknownRegister,
    #[error("expected '==' or '='")]
    ExpectedOperator,
    #[error("expected numeric value")]
    ExpectedNumber,
    #[error("invalid numeric value")]
    MalformedNumber,
    #[error("unexpected input after value")]
    TrailingInput,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    EqEq,
    Eq,
    Hex(&'a str),
    Decimal(&'a str),
    Other(char),
}

struct Lexer<'a> {
    rest: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { rest: input }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let end = self
            .rest
            .char_indices()
            .find(|&(_, c)| !pred(c))
            .map(|(i, _)| i)
            .unwrap_or(self.rest.len());
        let (taken, rest) = self.rest.split_at(end);
        self.rest = rest;
        taken
    }

    fn next_token(&mut self) -> Option<Token<'a>> {
        self.take_while(|c| c == ' ' || c == '\t');
        let mut chars = self.rest.chars();
        let first = chars.next()?;
        let second = chars.next();

        let token = match first {
            c if c.is_ascii_alphabetic() => {
                Token::Word(self.take_while(|c| c.is_ascii_alphanumeric() || c == '_'))
            }
            '=' if second == Some('=') => {
                self.rest = &self.rest[2..];
                Token::EqEq
            }
            '=' => {
                self.rest = &self.rest[1..];
                Token::Eq
            }
            '$' => {
                self.rest = &self.rest[1..];
                Token::Hex(self.take_while(|c| c.is_ascii_hexdigit()))
            }
            '0' if matches!(second, Some('x' | 'X')) => {
                self.rest = &self.rest[2..];
                Token::Hex(self.take_while(|c| c.is_ascii_hexdigit()))
            }
            c if c.is_ascii_digit() => Token::Decimal(self.take_while(|c| c.is_ascii_digit())),
            other => {
                self.rest = &self.rest[other.len_utf8()..];
                Token::Other(other)
            }
        };
        Some(token)
    }
}

fn parse_number(token: Option<Token<'_>>) -> Result<u32, ConditionError> {
    match token {
        Some(Token::Hex(digits)) if !digits.is_empty() => {
            u32::from_str_radix(digits, 16).map_err(|_| ConditionError::MalformedNumber)
        }
        Some(Token::Hex(_)) => Err(ConditionError::MalformedNumber),
        Some(Token::Decimal(digits)) => digits.parse().map_err(|_| ConditionError::MalformedNumber),
        _ => Err(ConditionError::ExpectedNumber),
    }
}

/// Parses `REG == VALUE` into a [`ConditionNode`].
pub fn parse(text: &str) -> Result<ConditionNode, ConditionError> {
    let mut lexer = Lexer::new(text);

    let register = match lexer.next_token() {
        Some(Token::Word(word)) => Register::from_word(word).ok_or(ConditionError::UnknownRegister)?,
        _ => return Err(ConditionError::UnknownRegister),
    };

    match lexer.next_token() {
        Some(Token::EqEq | Token::Eq) => {}
        _ => return Err(ConditionError::ExpectedOperator),
    }

    let value = parse_number(lexer.next_token())?;

    if lexer.next_token().is_some() {
        return Err(ConditionError::TrailingInput);
    }

    Ok(ConditionNode::register_equals(register, value))
}
