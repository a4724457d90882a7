use std::collections::HashMap;

use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use super::map_db_error;
use crate::{
    error::AppError,
    models::{Bill, BillContext, NewBill, PaymentStatus},
};

const BILL_COLUMNS: &str = "id, building_id, room_id, tenant_id, month, rent_amount, water_usage,
    electricity_usage, water_rate, electricity_rate, water_amount, electricity_amount,
    total_amount, additional_fees, status, payment_status, billing_date, due_date, payment_date,
    initial_meter_readings, current_meter_readings, slip_data, notes, version, created_at,
    updated_at";

pub async fn find_bill(pool: &PgPool, bill_id: Uuid) -> Result<Option<Bill>, AppError> {
    sqlx::query_as::<_, Bill>(&format!("SELECT {BILL_COLUMNS} FROM bills WHERE id = $1"))
        .bind(bill_id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)
}

pub async fn get_bill(pool: &PgPool, bill_id: Uuid) -> Result<Bill, AppError> {
    find_bill(pool, bill_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Bill not found.".to_string()))
}

pub async fn find_bill_for_room_month(
    pool: &PgPool,
    room_id: Uuid,
    month: &str,
) -> Result<Option<Bill>, AppError> {
    sqlx::query_as::<_, Bill>(&format!(
        "SELECT {BILL_COLUMNS} FROM bills WHERE room_id = $1 AND month = $2 LIMIT 1"
    ))
    .bind(room_id)
    .bind(month)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)
}

/// Insert a bill. A `(room_id, month)` collision surfaces as the raw sqlx error so
/// batch callers can tell "already exists" apart from other failures.
pub async fn insert_bill(pool: &PgPool, bill: &NewBill) -> Result<Bill, sqlx::Error> {
    sqlx::query_as::<_, Bill>(&format!(
        "INSERT INTO bills (
            building_id, room_id, tenant_id, month, rent_amount, water_usage,
            electricity_usage, water_rate, electricity_rate, water_amount, electricity_amount,
            total_amount, additional_fees, status, payment_status, billing_date, due_date,
            initial_meter_readings, current_meter_readings, notes
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
         RETURNING {BILL_COLUMNS}"
    ))
    .bind(bill.building_id)
    .bind(bill.room_id)
    .bind(bill.tenant_id)
    .bind(&bill.month)
    .bind(bill.rent_amount)
    .bind(bill.water_usage)
    .bind(bill.electricity_usage)
    .bind(bill.water_rate)
    .bind(bill.electricity_rate)
    .bind(bill.amounts.water_amount)
    .bind(bill.amounts.electricity_amount)
    .bind(bill.amounts.total_amount)
    .bind(Json(&bill.additional_fees))
    .bind(bill.status)
    .bind(PaymentStatus::Pending)
    .bind(bill.billing_date)
    .bind(bill.due_date)
    .bind(Json(&bill.initial_meter_readings))
    .bind(Json(&bill.current_meter_readings))
    .bind(&bill.notes)
    .fetch_one(pool)
    .await
}

/// Persist every mutable field of `bill`, guarded by its version.
///
/// Fails with `Conflict` when another writer saved the bill after it was read.
pub async fn save_bill(pool: &PgPool, bill: &Bill) -> Result<Bill, AppError> {
    let saved = sqlx::query_as::<_, Bill>(&format!(
        "UPDATE bills SET
            rent_amount = $3, water_usage = $4, electricity_usage = $5, water_rate = $6,
            electricity_rate = $7, water_amount = $8, electricity_amount = $9,
            total_amount = $10, additional_fees = $11, status = $12, payment_status = $13,
            payment_date = $14, current_meter_readings = $15, slip_data = $16, notes = $17,
            version = version + 1, updated_at = now()
         WHERE id = $1 AND version = $2
         RETURNING {BILL_COLUMNS}"
    ))
    .bind(bill.id)
    .bind(bill.version)
    .bind(bill.rent_amount)
    .bind(bill.water_usage)
    .bind(bill.electricity_usage)
    .bind(bill.water_rate)
    .bind(bill.electricity_rate)
    .bind(bill.water_amount)
    .bind(bill.electricity_amount)
    .bind(bill.total_amount)
    .bind(Json(&bill.additional_fees))
    .bind(bill.status)
    .bind(bill.payment_status)
    .bind(bill.payment_date)
    .bind(Json(&bill.current_meter_readings))
    .bind(&bill.slip_data)
    .bind(&bill.notes)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;

    saved.ok_or_else(|| {
        AppError::Conflict("Bill was modified by another request. Reload and retry.".to_string())
    })
}

pub async fn list_bills_for_buildings(
    pool: &PgPool,
    building_ids: &[Uuid],
    month: &str,
) -> Result<Vec<Bill>, AppError> {
    if building_ids.is_empty() {
        return Ok(Vec::new());
    }
    sqlx::query_as::<_, Bill>(&format!(
        "SELECT {BILL_COLUMNS} FROM bills
         WHERE building_id = ANY($1) AND month = $2
         ORDER BY building_id, room_id"
    ))
    .bind(building_ids)
    .bind(month)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}

/// Unpaid bills of a landlord's buildings for one month.
pub async fn list_unpaid_bills_for_landlord(
    pool: &PgPool,
    landlord_id: Uuid,
    month: &str,
) -> Result<Vec<Bill>, AppError> {
    sqlx::query_as::<_, Bill>(&format!(
        "SELECT {BILL_COLUMNS} FROM bills
         WHERE month = $2
           AND payment_status = 'pending'
           AND building_id IN (SELECT id FROM buildings WHERE landlord_id = $1)
         ORDER BY due_date"
    ))
    .bind(landlord_id)
    .bind(month)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}

pub async fn load_bill_contexts(
    pool: &PgPool,
    bill_ids: &[Uuid],
) -> Result<HashMap<Uuid, BillContext>, AppError> {
    if bill_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query_as::<_, BillContext>(
        "SELECT bl.id AS bill_id, r.room_number, f.id AS floor_id, f.floor_number,
                bu.name AS building_name, t.id AS tenant_id, t.name AS tenant_name
         FROM bills bl
         JOIN rooms r ON r.id = bl.room_id
         JOIN buildings bu ON bu.id = bl.building_id
         LEFT JOIN floors f ON f.id = r.floor_id
         LEFT JOIN tenants t ON t.id = bl.tenant_id
         WHERE bl.id = ANY($1)",
    )
    .bind(bill_ids)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    Ok(rows
        .into_iter()
        .map(|context| (context.bill_id, context))
        .collect())
}

pub async fn list_billed_room_ids(
    pool: &PgPool,
    building_id: Uuid,
    month: &str,
) -> Result<Vec<Uuid>, AppError> {
    sqlx::query_scalar::<_, Uuid>(
        "SELECT room_id FROM bills WHERE building_id = $1 AND month = $2",
    )
    .bind(building_id)
    .bind(month)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}
