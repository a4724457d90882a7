use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// Name reserved for the fee the overdue sweep injects.
pub const LATE_PAYMENT_FEE_NAME: &str = "Late Payment";

/// A named ad-hoc charge on a bill.
///
/// Every fee, whether it arrives in a request body or is read back from the
/// `additional_fees` column, passes through [`Fee::new`], so a missing or
/// malformed price is always 0 and never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawFee")]
pub struct Fee {
    pub name: String,
    pub price: Decimal,
}

impl Fee {
    pub fn new(name: impl Into<String>, price: &Value) -> Self {
        Self {
            name: name.into().trim().to_string(),
            price: coerce_amount(price),
        }
    }

    pub fn priced(name: impl Into<String>, price: Decimal) -> Self {
        Self {
            name: name.into().trim().to_string(),
            price,
        }
    }

    pub fn is_late_payment(&self) -> bool {
        self.name == LATE_PAYMENT_FEE_NAME
    }
}

#[derive(Deserialize)]
struct RawFee {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    price: Value,
}

impl From<RawFee> for Fee {
    fn from(raw: RawFee) -> Self {
        Fee::new(raw.name.unwrap_or_default(), &raw.price)
    }
}

/// Coerce a loosely-typed JSON value into an amount.
///
/// Numbers and numeric strings parse; anything else is 0.
pub fn coerce_amount(value: &Value) -> Decimal {
    match value {
        Value::Number(number) => parse_decimal(&number.to_string()),
        Value::String(text) => parse_decimal(text),
        _ => Decimal::ZERO,
    }
}

/// `deserialize_with` adapter applying [`coerce_amount`] to any JSON value.
pub fn deserialize_amount<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(coerce_amount(&raw))
}

fn parse_decimal(raw: &str) -> Decimal {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .unwrap_or(Decimal::ZERO)
}

/// Fees from an untyped JSON array; non-object entries are dropped.
pub fn fees_from_value(value: &Value) -> Vec<Fee> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|item| {
                    Fee::new(
                        item.get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default(),
                        item.get("price").unwrap_or(&Value::Null),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `None` when the fees add up beyond what a `Decimal` can hold.
pub fn sum_fees(fees: &[Fee]) -> Option<Decimal> {
    fees.iter()
        .try_fold(Decimal::ZERO, |total, fee| total.checked_add(fee.price))
}

#[derive(Debug, Clone, Default)]
pub struct ChargeInputs<'a> {
    pub water_usage: Decimal,
    pub water_rate: Decimal,
    pub electricity_usage: Decimal,
    pub electricity_rate: Decimal,
    pub rent_amount: Decimal,
    pub fees: &'a [Fee],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedAmounts {
    pub water_amount: Decimal,
    pub electricity_amount: Decimal,
    pub total_amount: Decimal,
}

/// Derive the usage charges and total. Inputs that coerce to numbers too large
/// to multiply or add are rejected rather than wrapped or truncated.
pub fn compute_amounts(inputs: &ChargeInputs<'_>) -> Result<ComputedAmounts, AppError> {
    let out_of_range =
        || AppError::UnprocessableEntity("Charge amounts are out of range.".to_string());

    let water_amount = inputs
        .water_usage
        .checked_mul(inputs.water_rate)
        .ok_or_else(out_of_range)?;
    let electricity_amount = inputs
        .electricity_usage
        .checked_mul(inputs.electricity_rate)
        .ok_or_else(out_of_range)?;
    let total_amount = sum_fees(inputs.fees)
        .and_then(|fees| fees.checked_add(inputs.rent_amount))
        .and_then(|total| total.checked_add(water_amount))
        .and_then(|total| total.checked_add(electricity_amount))
        .ok_or_else(out_of_range)?;

    Ok(ComputedAmounts {
        water_amount,
        electricity_amount,
        total_amount,
    })
}
