use crate::calculator::{evaluate, CalculatorError};
use crate::format::format_result;
use crate::key::Key;
use crate::tokenizer::{Operation, Value};
use tracing::{debug, error};

const EMPTY_BUFFER: &str = "0";

/// Session status flags. Any of `conversion_displayed` or `error_state`
/// forces the next non-clearing key to reset the buffer first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// Last completed action was `=`.
    pub result_displayed: bool,
    /// Buffer shows a converted currency amount.
    pub conversion_displayed: bool,
    /// Buffer shows an error message or a non-finite result.
    pub error_state: bool,
}

impl Flags {
    fn needs_reset(&self) -> bool {
        self.conversion_displayed || self.error_state
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Display {
    pub buffer: String,
    pub previous: String,
    pub flags: Flags,
    pub show_currency_picker: bool,
}

impl Default for Display {
    fn default() -> Self {
        Self {
            buffer: EMPTY_BUFFER.to_string(),
            previous: String::new(),
            flags: Flags::default(),
            show_currency_picker: false,
        }
    }
}

/// Side effect requested from the currency-conversion collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Forget the base currency and the amount recorded for conversion.
    ResetCurrency,
    OpenCurrencyPicker,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub display: Display,
    pub signal: Option<Signal>,
}

impl Display {
    /// Computes the snapshot that follows pressing `key`. `self` is never
    /// modified; side effects for the conversion side come back as a
    /// [`Signal`].
    ///
    /// Fails only when the evaluator rejects the buffer, which the rules
    /// below are meant to make impossible.
    pub fn handle_key(&self, key: Key) -> Result<Transition, CalculatorError> {
        let mut display = self.clone();
        let signal = display.apply(key)?;
        Ok(Transition { display, signal })
    }

    fn apply(&mut self, key: Key) -> Result<Option<Signal>, CalculatorError> {
        match key {
            Key::Clear => {
                self.reset();
                return Ok(Some(Signal::ResetCurrency));
            }
            _ if self.flags.needs_reset() => {
                self.reset();
                if key.is_literal() {
                    self.buffer = fresh_buffer(key);
                }
                return Ok(Some(Signal::ResetCurrency));
            }
            Key::NoOp => {}
            Key::Backspace => self.backspace(),
            Key::Evaluate => self.evaluate()?,
            Key::Convert => {
                self.show_currency_picker = true;
                return Ok(Some(Signal::OpenCurrencyPicker));
            }
            _ if self.flags.result_displayed && !key.is_operator() => {
                self.buffer = fresh_buffer(key);
                self.previous.clear();
                self.flags.result_displayed = false;
            }
            Key::Op(Operation::Sub) => self.minus(),
            Key::Op(op) => self.operator(op),
            Key::Digit(_) | Key::Point => self.literal(key),
        }
        Ok(None)
    }

    fn reset(&mut self) {
        *self = Display::default();
    }

    fn backspace(&mut self) {
        if self.buffer == EMPTY_BUFFER || self.flags.result_displayed {
            return;
        }
        self.buffer.pop();
        // A bare exponent marker would not parse
        let exponent_sign = self.buffer.ends_with(['+', '-'])
            && self.buffer[..self.buffer.len() - 1].ends_with(['e', 'E']);
        if exponent_sign {
            self.buffer.pop();
        }
        if self.buffer.ends_with(['e', 'E']) {
            self.buffer.pop();
        }
        if self.buffer.is_empty() {
            self.buffer = EMPTY_BUFFER.to_string();
        }
    }

    fn evaluate(&mut self) -> Result<(), CalculatorError> {
        let expr = match self.buffer.trim_end_matches(is_operator_char) {
            "" => EMPTY_BUFFER,
            expr => expr,
        };
        let value = match evaluate(expr) {
            Ok(value) => value,
            Err(e) => {
                debug_assert!(e != CalculatorError::StackUnderflow, "{expr:?}: {e}");
                error!(expr, error = %e, "buffer rejected by evaluator");
                return Err(e);
            }
        };

        self.previous = expr.to_string();
        self.buffer = format_result(value);
        self.flags.result_displayed = true;
        if !value.is_finite() {
            self.flags.error_state = true;
        }
        Ok(())
    }

    fn minus(&mut self) {
        if self.buffer.is_empty() || self.buffer == EMPTY_BUFFER {
            self.buffer = "-".to_string();
        } else if self.buffer.ends_with('-') {
            debug!(buffer = %self.buffer, "rejected repeated minus");
        } else {
            self.buffer.push('-');
        }
        self.flags.result_displayed = false;
    }

    fn operator(&mut self, op: Operation) {
        let last_is_operator = self.buffer.chars().last().map_or(true, is_operator_char);
        if last_is_operator || self.buffer == EMPTY_BUFFER {
            debug!(buffer = %self.buffer, op = %op.symbol(), "rejected operator");
            return;
        }
        self.buffer.push(op.symbol());
        self.flags.result_displayed = false;
    }

    fn literal(&mut self, key: Key) {
        let Some(symbol) = key.symbol() else {
            return;
        };
        if key == Key::Point {
            let numeral = open_numeral(&self.buffer);
            if numeral.contains(['.', 'e', 'E']) {
                debug!(buffer = %self.buffer, "rejected second decimal point");
                return;
            }
            if numeral.is_empty() {
                self.buffer.push('0');
            }
        } else if self.buffer == EMPTY_BUFFER {
            self.buffer.clear();
        }
        self.buffer.push(symbol);
        self.flags.result_displayed = false;
    }

    pub fn leading_amount(&self) -> Value {
        self.buffer
            .split_whitespace()
            .next()
            .and_then(|word| word.parse().ok())
            .unwrap_or(0.0)
    }

    pub fn show_conversion(&mut self, text: String) {
        self.buffer = text;
        self.flags.conversion_displayed = true;
        self.show_currency_picker = false;
    }

    /// Writes an error message into the buffer.
    pub fn show_error(&mut self, message: String, clear_previous: bool) {
        self.buffer = message;
        if clear_previous {
            self.previous.clear();
        }
        self.flags.error_state = true;
        self.show_currency_picker = false;
    }
}

fn fresh_buffer(key: Key) -> String {
    match key {
        Key::Point => "0.".to_string(),
        _ => key
            .symbol()
            .map(String::from)
            .unwrap_or_else(|| EMPTY_BUFFER.to_string()),
    }
}

fn is_operator_char(c: char) -> bool {
    Operation::from_char(c).is_ok()
}

/// The numeral currently being typed at the end of the buffer.
fn open_numeral(buffer: &str) -> &str {
    for (i, c) in buffer.char_indices().rev() {
        // `e-` and `e+` belong to the numeral
        let exponent_sign = matches!(c, '+' | '-') && buffer[..i].ends_with(['e', 'E']);
        if is_operator_char(c) && !exponent_sign {
            return &buffer[i + c.len_utf8()..];
        }
    }
    buffer
}
