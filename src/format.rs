use crate::tokenizer::Value;

/// Longest plain rendering before switching to scientific notation.
const MAX_PLAIN_LEN: usize = 9;
const PLAIN_DECIMALS: usize = 5;
const SCIENTIFIC_DECIMALS: usize = 3;

/// Up to five fractional digits, or `<mantissa>e<exponent>` when that is too
/// long or would round a non-zero value to zero.
pub fn format_result(value: Value) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        let text = if value.is_sign_positive() {
            "Infinity"
        } else {
            "-Infinity"
        };
        return text.to_string();
    }
    // Drop the sign of negative zero
    let value = if value == 0.0 { 0.0 } else { value };

    let plain = format!("{:.*}", PLAIN_DECIMALS, value);
    let plain = trim_fraction(&plain);
    let underflow = value != 0.0 && plain.trim_start_matches('-') == "0";

    let text = if plain.len() > MAX_PLAIN_LEN || underflow {
        scientific(value)
    } else {
        plain.to_string()
    };

    match text.strip_suffix(".0") {
        Some(stripped) => stripped.to_string(),
        None => text,
    }
}

pub fn format_amount(value: Value) -> String {
    format!("{:.2}", value)
}

fn scientific(value: Value) -> String {
    let text = format!("{:.*e}", SCIENTIFIC_DECIMALS, value);
    match text.split_once('e') {
        Some((mantissa, exponent)) => format!("{}e{}", trim_fraction(mantissa), exponent),
        None => text,
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}
