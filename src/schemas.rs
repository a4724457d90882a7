use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

/// Body of `POST /bills`. Numeric fields are loosely typed and coerced.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBillInput {
    pub room_id: Uuid,
    pub tenant_id: Option<Uuid>,
    #[validate(length(equal = 7))]
    pub month: Option<String>,
    pub billing_date: Option<NaiveDate>,
    pub rent_amount: Option<Value>,
    pub water_usage: Option<Value>,
    pub electricity_usage: Option<Value>,
    pub water_rate: Option<Value>,
    pub electricity_rate: Option<Value>,
    #[serde(alias = "fees")]
    pub additional_fees: Option<Value>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    pub current_meter_readings: Option<Value>,
}

/// Body of `PUT /bills/{id}`. Absent fields keep the bill's current value.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBillInput {
    pub rent_amount: Option<Value>,
    pub water_usage: Option<Value>,
    pub electricity_usage: Option<Value>,
    pub water_rate: Option<Value>,
    pub electricity_rate: Option<Value>,
    #[serde(alias = "fees")]
    pub additional_fees: Option<Value>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    pub current_meter_readings: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMonthlyBillsInput {
    pub billing_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ApplyLateFeesInput {
    #[validate(length(equal = 7))]
    pub month: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkBillPaidInput {
    pub payment_date: Option<DateTime<Utc>>,
    pub slip_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillsQuery {
    pub month: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillPath {
    pub bill_id: Uuid,
}
