use std::str::FromStr;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::errors::DomainError;

/// Reads an amount from a loosely typed payload. Anything that is not a finite
/// number (null, missing, garbage strings) counts as zero.
pub(crate) fn decimal_or_zero(value: &Value) -> Decimal {
    let raw = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_owned(),
        _ => return Decimal::ZERO,
    };

    Decimal::from_str(&raw).or_else(|_| Decimal::from_scientific(&raw)).unwrap_or(Decimal::ZERO)
}

pub(crate) fn lenient_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(decimal_or_zero(&value))
}

pub(crate) fn decode_section<T>(rule_id: &str, section: &str, value: &Value) -> Result<T, DomainError>
where
    T: DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }

    serde_json::from_value(value.clone()).map_err(|error| DomainError::MalformedRule {
        rule_id: rule_id.to_owned(),
        reason: format!("invalid {section}: {error}"),
    })
}
