//! Normalizes tool address arguments to 16-bit addresses.

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::machine::SymbolTable;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address value is null")]
    Null,
    #[error("address must be a number in 0..=65535 or a string")]
    Invalid,
    #[error("symbol not found")]
    SymbolNotFound,
    #[error("invalid hex address")]
    BadHex,
}

/// Parses the digits of a `$HHHH` / `0xHHHH` address.
///
/// Values wider than 16 bits wrap (mod 65536) instead of being rejected.
fn parse_hex_wrapping(digits: &str) -> Result<u16, AddressError> {
    if digits.is_empty() {
        return Err(AddressError::BadHex);
    }
    digits.chars().try_fold(0u16, |acc, c| {
        let digit = c.to_digit(16).ok_or(AddressError::BadHex)?;
        Ok(acc.wrapping_mul(16).wrapping_add(digit as u16))
    })
}

/// Resolves a number, a `$HHHH` / `0xHHHH` hex string or a symbol name.
pub fn resolve(value: &Value, symbols: &dyn SymbolTable) -> Result<u16, AddressError> {
    match value {
        Value::Null => Err(AddressError::Null),
        Value::Number(number) => number
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or(AddressError::Invalid),
        Value::String(text) => {
            if let Some(digits) = text.strip_prefix('$') {
                return parse_hex_wrapping(digits);
            }
            if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                return parse_hex_wrapping(digits);
            }
            symbols.address_of(text).ok_or(AddressError::SymbolNotFound)
        }
        _ => Err(AddressError::Invalid),
    }
}

/// An address argument as it appears in tool parameters: a number, a hex
/// string or a symbol name. Resolution is deferred until a symbol table is
/// available.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct AddressArg(pub Value);

impl AddressArg {
    pub fn resolve(&self, symbols: &dyn SymbolTable) -> Result<u16, AddressError> {
        resolve(&self.0, symbols)
    }
}

impl From<Value> for AddressArg {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

#[derive(JsonSchema)]
#[serde(untagged)]
#[allow(dead_code)]
enum AddressForm {
    Number(u16),
    /// `$HHHH`, `0xHHHH` or a symbol name.
    Text(String),
}

impl JsonSchema for AddressArg {
    fn schema_name() -> String {
        "Address".to_owned()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        AddressForm::json_schema(gen)
    }
}
