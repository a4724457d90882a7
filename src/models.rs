use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    error::AppError,
    services::charges::{compute_amounts, deserialize_amount, ChargeInputs, ComputedAmounts, Fee},
};

/// Whether the month's usage has been entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "bill_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Pending,
    Completed,
}

/// Whether a payment has been confirmed. Only ever moves `Pending -> Paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

/// Cumulative meter readings at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeterReadings {
    #[serde(deserialize_with = "deserialize_amount")]
    pub water: Decimal,
    #[serde(deserialize_with = "deserialize_amount")]
    pub electricity: Decimal,
    #[serde(alias = "last_updated")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl MeterReadings {
    /// Readings from an untyped request value; anything that is not an object reads as empty.
    pub fn from_value(value: &Value) -> Self {
        if !value.is_object() {
            return Self::default();
        }
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    pub id: Uuid,
    pub building_id: Uuid,
    pub room_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub month: String,
    pub rent_amount: Decimal,
    pub water_usage: Decimal,
    pub electricity_usage: Decimal,
    pub water_rate: Decimal,
    pub electricity_rate: Decimal,
    pub water_amount: Decimal,
    pub electricity_amount: Decimal,
    pub total_amount: Decimal,
    #[sqlx(json)]
    pub additional_fees: Vec<Fee>,
    pub status: BillStatus,
    pub payment_status: PaymentStatus,
    pub billing_date: NaiveDate,
    pub due_date: NaiveDate,
    pub payment_date: Option<DateTime<Utc>>,
    #[sqlx(json)]
    pub initial_meter_readings: MeterReadings,
    #[sqlx(json)]
    pub current_meter_readings: MeterReadings,
    pub slip_data: Option<String>,
    pub notes: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bill {
    pub fn charge_inputs(&self) -> ChargeInputs<'_> {
        ChargeInputs {
            water_usage: self.water_usage,
            water_rate: self.water_rate,
            electricity_usage: self.electricity_usage,
            electricity_rate: self.electricity_rate,
            rent_amount: self.rent_amount,
            fees: &self.additional_fees,
        }
    }

    /// Re-derive every computed amount from the current inputs. On error the
    /// bill is left as it was.
    pub fn recompute(&mut self) -> Result<ComputedAmounts, AppError> {
        let amounts = compute_amounts(&self.charge_inputs())?;
        self.water_amount = amounts.water_amount;
        self.electricity_amount = amounts.electricity_amount;
        self.total_amount = amounts.total_amount;
        Ok(amounts)
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    pub fn has_late_fee(&self) -> bool {
        self.additional_fees.iter().any(Fee::is_late_payment)
    }
}

/// A bill that has not been persisted yet; amounts are already derived.
#[derive(Debug, Clone)]
pub struct NewBill {
    pub building_id: Uuid,
    pub room_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub month: String,
    pub rent_amount: Decimal,
    pub water_usage: Decimal,
    pub electricity_usage: Decimal,
    pub water_rate: Decimal,
    pub electricity_rate: Decimal,
    pub amounts: ComputedAmounts,
    pub additional_fees: Vec<Fee>,
    pub status: BillStatus,
    pub billing_date: NaiveDate,
    pub due_date: NaiveDate,
    pub initial_meter_readings: MeterReadings,
    pub current_meter_readings: MeterReadings,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Landlord {
    pub id: Uuid,
    pub name: String,
    pub bank_code: Option<String>,
    pub account_number: Option<String>,
    pub account_name: Option<String>,
    #[serde(skip_serializing)]
    pub line_channel_access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    pub id: Uuid,
    pub landlord_id: Uuid,
    pub name: String,
    pub water_rate: Decimal,
    pub electricity_rate: Decimal,
    pub due_day: Option<i32>,
    pub late_payment_charge: Option<Decimal>,
}

impl Building {
    pub fn due_day_or(&self, default_day: u32) -> u32 {
        self.due_day
            .and_then(|day| u32::try_from(day).ok())
            .filter(|day| (1..=31).contains(day))
            .unwrap_or(default_day)
    }

    pub fn late_payment_charge_or(&self, default_charge: Decimal) -> Decimal {
        self.late_payment_charge
            .filter(|charge| *charge > Decimal::ZERO)
            .unwrap_or(default_charge)
    }
}

/// A room joined with its current active tenant; the unit of monthly bill generation.
#[derive(Debug, Clone, FromRow)]
pub struct BillableRoom {
    pub room_id: Uuid,
    pub room_number: String,
    pub price: Decimal,
    #[sqlx(json)]
    pub last_meter_readings: MeterReadings,
    pub tenant_id: Uuid,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: Uuid,
    pub landlord_id: Uuid,
    pub room_id: Option<Uuid>,
    pub name: String,
    #[serde(skip_serializing)]
    pub line_user_id: Option<String>,
    pub status: String,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("active")
    }
}

/// Display context joined onto a bill for listing and detail views.
#[derive(Debug, Clone, FromRow)]
pub struct BillContext {
    pub bill_id: Uuid,
    pub room_number: String,
    pub floor_id: Option<Uuid>,
    pub floor_number: Option<i32>,
    pub building_name: String,
    pub tenant_id: Option<Uuid>,
    pub tenant_name: Option<String>,
}
