use crate::tokenizer::{tokenize, Operation, Token, TokenizeError, Value};
use thiserror::Error;
use tracing::debug;

/// Evaluates an infix expression built from decimal literals and the four
/// binary operators. A non-finite result is returned as a value, not an error.
pub fn evaluate(expr: &str) -> Result<Value, CalculatorError> {
    let tokens = tokenize(expr)?;
    let postfix = to_postfix(tokens);
    let result = evaluate_postfix(&postfix)?;
    debug!(expr, result, "evaluated expression");
    Ok(result)
}

/// Shunting-yard conversion. All operators are left-associative.
pub fn to_postfix(tokens: Vec<Token>) -> Vec<Token> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut pending: Vec<Operation> = vec![];

    for token in tokens {
        match token {
            Token::Num(_) => output.push(token),
            Token::Op(op) => {
                while let Some(&top) = pending.last() {
                    if top.priority() < op.priority() {
                        break;
                    }
                    pending.pop();
                    output.push(Token::Op(top));
                }
                pending.push(op);
            }
        }
    }

    output.extend(pending.into_iter().rev().map(Token::Op));
    output
}

pub fn evaluate_postfix(tokens: &[Token]) -> Result<Value, CalculatorError> {
    let mut stack: Vec<Value> = Vec::with_capacity(tokens.len());

    for token in tokens {
        match token {
            Token::Num(text) => {
                let value = text
                    .parse::<Value>()
                    .map_err(|_| TokenizeError::InvalidNumber(text.clone()))?;
                stack.push(value);
            }
            Token::Op(op) => {
                let r = stack.pop().ok_or(CalculatorError::StackUnderflow)?;
                let l = stack.pop().ok_or(CalculatorError::StackUnderflow)?;
                stack.push(op.execute(l, r));
            }
        }
    }

    match stack.as_slice() {
        [result] => Ok(*result),
        _ => Err(CalculatorError::StackUnderflow),
    }
}

impl Operation {
    fn execute(self, l: Value, r: Value) -> Value {
        match self {
            Operation::Add => l + r,
            Operation::Sub => l - r,
            Operation::Mul => l * r,
            Operation::Div => l / r,
        }
    }

    fn priority(self) -> u8 {
        match self {
            Operation::Add | Operation::Sub => 10,
            Operation::Mul | Operation::Div => 20,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalculatorError {
    #[error("Malformed expression: {0}")]
    Malformed(#[from] TokenizeError),
    /// Postfix stream did not reduce to exactly one value.
    #[error("Operand stack underflow")]
    StackUnderflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(s: &str) -> Token {
        Token::Num(s.into())
    }

    #[test]
    fn test_basic_arithmetic() {
        assert_eq!(evaluate("3+4"), Ok(7.0));
        assert_eq!(evaluate("6÷4"), Ok(1.5));
        assert_eq!(evaluate("2×-3"), Ok(-6.0));
    }

    #[test]
    fn test_precedence() {
        assert_eq!(evaluate("10-2*3"), Ok(4.0));
        assert_eq!(evaluate("2+3×4-1"), Ok(13.0));
    }

    #[test]
    fn test_left_associativity() {
        assert_eq!(evaluate("8/4/2"), Ok(1.0));
        assert_eq!(evaluate("10-4-3"), Ok(3.0));
    }

    #[test]
    fn test_scientific_notation() {
        let result = evaluate("1.5e-3+2").unwrap();
        assert!((result - 2.0015).abs() < 1e-12);
    }

    #[test]
    fn test_leading_negative() {
        assert_eq!(evaluate("-5+2"), Ok(-3.0));
        assert_eq!(evaluate("-5"), Ok(-5.0));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(evaluate("5/0"), Ok(Value::INFINITY));
        assert_eq!(evaluate("-5/0"), Ok(Value::NEG_INFINITY));
        assert!(evaluate("0/0").unwrap().is_nan());
    }

    #[test]
    fn test_postfix_order() {
        let postfix = to_postfix(tokenize("1-2*3+4").unwrap());
        assert_eq!(
            postfix,
            vec![
                num("1"),
                num("2"),
                num("3"),
                Token::Op(Operation::Mul),
                Token::Op(Operation::Sub),
                num("4"),
                Token::Op(Operation::Add),
            ]
        );
    }

    #[test]
    fn test_remaining_operators_pop_top_first() {
        let postfix = to_postfix(tokenize("1+2*3").unwrap());
        assert_eq!(
            postfix,
            vec![
                num("1"),
                num("2"),
                num("3"),
                Token::Op(Operation::Mul),
                Token::Op(Operation::Add),
            ]
        );
    }

    #[test]
    fn test_stack_underflow() {
        assert_eq!(evaluate("7*"), Err(CalculatorError::StackUnderflow));
        assert_eq!(evaluate(""), Err(CalculatorError::StackUnderflow));
        assert_eq!(
            evaluate_postfix(&[num("1"), num("2")]),
            Err(CalculatorError::StackUnderflow)
        );
    }

    #[test]
    fn test_malformed_expression() {
        assert_eq!(
            evaluate("2+a"),
            Err(CalculatorError::Malformed(TokenizeError::UnexpectedCharacter(
                'a'
            )))
        );
        assert_eq!(
            evaluate("E3"),
            Err(CalculatorError::Malformed(TokenizeError::MisplacedExponent))
        );
    }
}
