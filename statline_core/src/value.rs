//! Capture grammar.
//!
//! A path is one or more of `[A-Za-z0-9-_.!]`. A value is a signed integer
//! followed by its type suffix (`c`, `ms` or `g`) and an optional `!` marking
//! emphasis, e.g. `42c`, `-3g`, `120ms!`.

use crate::error::{Result, StatlineError};
use crate::model::MetricType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value {
    pub typ: MetricType,
    pub value: i64,
    pub emphasis: bool,
}

pub fn validate_path(path: &str) -> Result<()> {
    let valid = !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '!'));

    if valid {
        Ok(())
    } else {
        Err(StatlineError::InvalidPath(path.to_string()))
    }
}

pub fn parse_value(raw: &str) -> Result<Value> {
    let invalid = || StatlineError::InvalidValue(raw.to_string());

    let (body, emphasis) = match raw.strip_suffix('!') {
        Some(body) => (body, true),
        None => (raw, false),
    };

    let digits_end = body
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map(|(i, _)| i)
        .ok_or_else(invalid)?;

    let (number, suffix) = body.split_at(digits_end);
    if number.is_empty() || number == "-" {
        return Err(invalid());
    }

    let typ = MetricType::from_suffix(suffix).ok_or_else(invalid)?;
    let value = number.parse::<i64>().map_err(|_| invalid())?;

    Ok(Value {
        typ,
        value,
        emphasis,
    })
}
