//! Read access to the landlord/building/room/tenant records owned by the
//! property-management side of the system.

use rust_decimal::Decimal;
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use super::map_db_error;
use crate::{
    error::AppError,
    models::{BillableRoom, Building, Landlord, MeterReadings, Tenant},
};

pub async fn get_landlord(pool: &PgPool, landlord_id: Uuid) -> Result<Landlord, AppError> {
    sqlx::query_as::<_, Landlord>(
        "SELECT id, name, bank_code, account_number, account_name, line_channel_access_token
         FROM landlords WHERE id = $1",
    )
    .bind(landlord_id)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?
    .ok_or_else(|| AppError::NotFound("Landlord not found.".to_string()))
}

pub async fn get_building(pool: &PgPool, building_id: Uuid) -> Result<Building, AppError> {
    sqlx::query_as::<_, Building>(
        "SELECT id, landlord_id, name, water_rate, electricity_rate, due_day, late_payment_charge
         FROM buildings WHERE id = $1",
    )
    .bind(building_id)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?
    .ok_or_else(|| AppError::NotFound("Building not found.".to_string()))
}

pub async fn list_landlord_buildings(
    pool: &PgPool,
    landlord_id: Uuid,
) -> Result<Vec<Building>, AppError> {
    sqlx::query_as::<_, Building>(
        "SELECT id, landlord_id, name, water_rate, electricity_rate, due_day, late_payment_charge
         FROM buildings WHERE landlord_id = $1
         ORDER BY name",
    )
    .bind(landlord_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}

/// Landlords owning at least one building; the scheduler iterates these.
pub async fn list_landlord_ids_with_buildings(pool: &PgPool) -> Result<Vec<Uuid>, AppError> {
    sqlx::query_scalar::<_, Uuid>("SELECT DISTINCT landlord_id FROM buildings")
        .fetch_all(pool)
        .await
        .map_err(map_db_error)
}

/// Rooms of a building that have an assigned tenant whose status is active.
pub async fn list_billable_rooms(
    pool: &PgPool,
    building_id: Uuid,
) -> Result<Vec<BillableRoom>, AppError> {
    sqlx::query_as::<_, BillableRoom>(
        "SELECT r.id AS room_id, r.room_number, r.price, r.last_meter_readings,
                t.id AS tenant_id
         FROM rooms r
         JOIN tenants t ON t.id = r.current_tenant_id
         WHERE r.building_id = $1 AND t.status = 'active'
         ORDER BY r.room_number",
    )
    .bind(building_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}

/// Price, building and last meter snapshot of one room.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoomPricing {
    pub building_id: Uuid,
    pub price: Decimal,
    #[sqlx(json)]
    pub last_meter_readings: MeterReadings,
}

pub async fn get_room_pricing(pool: &PgPool, room_id: Uuid) -> Result<RoomPricing, AppError> {
    sqlx::query_as::<_, RoomPricing>(
        "SELECT building_id, price, last_meter_readings FROM rooms WHERE id = $1",
    )
    .bind(room_id)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?
    .ok_or_else(|| AppError::NotFound("Room not found.".to_string()))
}

pub async fn update_room_meter_readings(
    pool: &PgPool,
    room_id: Uuid,
    readings: &MeterReadings,
) -> Result<(), AppError> {
    sqlx::query("UPDATE rooms SET last_meter_readings = $2 WHERE id = $1")
        .bind(room_id)
        .bind(Json(readings))
        .execute(pool)
        .await
        .map_err(map_db_error)?;
    Ok(())
}

pub async fn find_tenant(pool: &PgPool, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
    sqlx::query_as::<_, Tenant>(
        "SELECT id, landlord_id, room_id, name, line_user_id, status
         FROM tenants WHERE id = $1",
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)
}
