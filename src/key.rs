use crate::tokenizer::Operation;
use std::str::FromStr;
use thiserror::Error;

/// A keypad button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Digit(u8),
    Point,
    Op(Operation),
    Clear,
    Backspace,
    Evaluate,
    Convert,
    /// Decorative button without an action.
    NoOp,
}

impl Key {
    pub fn from_char(c: char) -> Result<Self, KeyError> {
        let key = match c {
            '0'..='9' => Key::Digit(c as u8 - b'0'),
            '.' => Key::Point,
            '+' => Key::Op(Operation::Add),
            '-' => Key::Op(Operation::Sub),
            '*' | 'x' | '×' => Key::Op(Operation::Mul),
            '/' | '÷' => Key::Op(Operation::Div),
            'C' | 'c' => Key::Clear,
            '<' | '⌫' => Key::Backspace,
            '=' => Key::Evaluate,
            '$' => Key::Convert,
            '☺' => Key::NoOp,
            _ => return Err(KeyError::Unknown(c.to_string())),
        };
        Ok(key)
    }

    /// Parses a run of single-character key symbols, e.g. `"12+3="`.
    pub fn parse_sequence(s: &str) -> Result<Vec<Self>, KeyError> {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .map(Key::from_char)
            .collect()
    }

    /// The character this key writes into the buffer, if any.
    pub fn symbol(self) -> Option<char> {
        match self {
            Key::Digit(d) => char::from_digit(d as u32, 10),
            Key::Point => Some('.'),
            Key::Op(op) => Some(op.symbol()),
            _ => None,
        }
    }

    pub fn is_operator(self) -> bool {
        matches!(self, Key::Op(_))
    }

    pub fn is_literal(self) -> bool {
        matches!(self, Key::Digit(_) | Key::Point)
    }
}

impl FromStr for Key {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AC" | "ac" => Ok(Key::Clear),
            _ => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Key::from_char(c),
                    _ => Err(KeyError::Unknown(s.to_string())),
                }
            }
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("Unknown key: {0:?}")]
    Unknown(String),
}
