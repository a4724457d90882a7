//! Fixtures shared by the billing service tests.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Bill, Building, NewBill, PaymentStatus};

pub fn sample_building(
    water_rate: Decimal,
    electricity_rate: Decimal,
    due_day: Option<i32>,
    late_payment_charge: Option<Decimal>,
) -> Building {
    Building {
        id: Uuid::new_v4(),
        landlord_id: Uuid::new_v4(),
        name: "Baan Suan".to_string(),
        water_rate,
        electricity_rate,
        due_day,
        late_payment_charge,
    }
}

/// What `insert_bill` would hand back for `plan`.
pub fn bill_from_plan(plan: NewBill) -> Bill {
    let now = Utc::now();
    Bill {
        id: Uuid::new_v4(),
        building_id: plan.building_id,
        room_id: plan.room_id,
        tenant_id: plan.tenant_id,
        month: plan.month,
        rent_amount: plan.rent_amount,
        water_usage: plan.water_usage,
        electricity_usage: plan.electricity_usage,
        water_rate: plan.water_rate,
        electricity_rate: plan.electricity_rate,
        water_amount: plan.amounts.water_amount,
        electricity_amount: plan.amounts.electricity_amount,
        total_amount: plan.amounts.total_amount,
        additional_fees: plan.additional_fees,
        status: plan.status,
        payment_status: PaymentStatus::Pending,
        billing_date: plan.billing_date,
        due_date: plan.due_date,
        payment_date: None,
        initial_meter_readings: plan.initial_meter_readings,
        current_meter_readings: plan.current_meter_readings,
        slip_data: None,
        notes: plan.notes,
        version: 1,
        created_at: now,
        updated_at: now,
    }
}
