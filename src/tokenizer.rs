use compact_str::{CompactString, ToCompactString};
use thiserror::Error;

#[derive(Debug, Default)]
enum TokenizerState {
    /// Start of input. Behaves like "just after an operator".
    #[default]
    Clean,
    InNumber {
        text: CompactString,
        expect_exponent: bool,
    },
    /// Operator waiting to be emitted on the next character.
    InOperator(Operation),
}

#[derive(Debug, Default)]
pub struct Tokenizer {
    state: TokenizerState,
}

impl Tokenizer {
    pub fn update(&mut self, c: char) -> Result<Option<Token>, TokenizeError> {
        use TokenizerState::*;

        match std::mem::take(&mut self.state) {
            Clean => match c {
                '0'..='9' | '.' => {
                    self.start_number(c);
                    Ok(None)
                }
                // Unary minus is fused into the literal
                '-' => {
                    self.start_number(c);
                    Ok(None)
                }
                'e' | 'E' => Err(TokenizeError::MisplacedExponent),
                _ => {
                    self.state = InOperator(Operation::from_char(c)?);
                    Ok(None)
                }
            },
            InNumber {
                mut text,
                expect_exponent,
            } => match c {
                '0'..='9' | '.' => {
                    text.push(c);
                    self.state = InNumber {
                        text,
                        expect_exponent: false,
                    };
                    Ok(None)
                }
                'e' | 'E' => {
                    text.push(c);
                    self.state = InNumber {
                        text,
                        expect_exponent: true,
                    };
                    Ok(None)
                }
                '+' | '-' if expect_exponent => {
                    text.push(c);
                    self.state = InNumber {
                        text,
                        expect_exponent: false,
                    };
                    Ok(None)
                }
                _ => {
                    let op = Operation::from_char(c)?;
                    let token = Self::number(text)?;
                    self.state = InOperator(op);
                    Ok(Some(token))
                }
            },
            InOperator(op) => {
                match c {
                    '0'..='9' | '.' | '-' => self.start_number(c),
                    'e' | 'E' => return Err(TokenizeError::MisplacedExponent),
                    _ => self.state = InOperator(Operation::from_char(c)?),
                }
                Ok(Some(Token::Op(op)))
            }
        }
    }

    pub fn finalize(&mut self) -> Result<Option<Token>, TokenizeError> {
        use TokenizerState::*;
        let token = match std::mem::take(&mut self.state) {
            Clean => None,
            InNumber { text, .. } => Some(Self::number(text)?),
            InOperator(op) => Some(Token::Op(op)),
        };
        Ok(token)
    }

    fn start_number(&mut self, c: char) {
        self.state = TokenizerState::InNumber {
            text: c.to_compact_string(),
            expect_exponent: false,
        };
    }

    fn number(text: CompactString) -> Result<Token, TokenizeError> {
        match text.parse::<Value>() {
            Ok(_) => Ok(Token::Num(text)),
            Err(_) => Err(TokenizeError::InvalidNumber(text)),
        }
    }
}

/// Tokenizes a whole expression. Display operators `×` and `÷` are accepted
/// as `*` and `/`.
pub fn tokenize(expr: &str) -> Result<Vec<Token>, TokenizeError> {
    let mut tokens = vec![];
    let mut tokenizer = Tokenizer::default();
    for c in expr.chars() {
        if let Some(token) = tokenizer.update(c)? {
            tokens.push(token)
        }
    }
    if let Some(token) = tokenizer.finalize()? {
        tokens.push(token)
    }
    Ok(tokens)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("Unexpected character: {0:?}")]
    UnexpectedCharacter(char),
    #[error("Exponent marker without a mantissa")]
    MisplacedExponent,
    #[error("Invalid number: {0}")]
    InvalidNumber(CompactString),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Num(CompactString),
    Op(Operation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operation {
    pub fn from_char(c: char) -> Result<Self, TokenizeError> {
        match c {
            '+' => Ok(Operation::Add),
            '-' => Ok(Operation::Sub),
            '*' | '×' => Ok(Operation::Mul),
            '/' | '÷' => Ok(Operation::Div),
            _ => Err(TokenizeError::UnexpectedCharacter(c)),
        }
    }

    /// Symbol shown on the keypad and in the expression buffer.
    pub fn symbol(self) -> char {
        match self {
            Operation::Add => '+',
            Operation::Sub => '-',
            Operation::Mul => '×',
            Operation::Div => '÷',
        }
    }
}

pub type Value = f64;
