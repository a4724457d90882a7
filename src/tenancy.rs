use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Bill, Building, Landlord, Tenant},
    repository::property::{find_tenant, get_landlord},
    services::bills::cached_building,
    state::AppState,
};

/// The authenticated user must have a landlord profile.
pub async fn assert_landlord(state: &AppState, user_id: Uuid) -> Result<Landlord, AppError> {
    match get_landlord(state.db_pool()?, user_id).await {
        Ok(landlord) => Ok(landlord),
        Err(AppError::NotFound(_)) => Err(AppError::Forbidden(
            "Forbidden: no landlord profile for this user.".to_string(),
        )),
        Err(error) => Err(error),
    }
}

pub async fn assert_building_owner(
    state: &AppState,
    landlord_id: Uuid,
    building_id: Uuid,
) -> Result<Building, AppError> {
    let building = cached_building(state, building_id).await?;
    if building.landlord_id != landlord_id {
        return Err(AppError::Forbidden(
            "Forbidden: building belongs to another landlord.".to_string(),
        ));
    }
    Ok(building)
}

pub async fn assert_bill_owner(
    state: &AppState,
    landlord_id: Uuid,
    bill: &Bill,
) -> Result<Building, AppError> {
    assert_building_owner(state, landlord_id, bill.building_id).await
}

/// A tenant may pay a bill only while active, under the same landlord as the
/// bill's building, and assigned to the billed room.
pub fn tenant_may_pay(tenant: &Tenant, bill: &Bill, building: &Building, landlord_id: Uuid) -> bool {
    tenant.is_active()
        && tenant.landlord_id == landlord_id
        && building.landlord_id == landlord_id
        && building.id == bill.building_id
        && tenant.room_id == Some(bill.room_id)
}

pub async fn authorize_paying_tenant(
    state: &AppState,
    bill: &Bill,
    tenant_id: Uuid,
    landlord_id: Uuid,
) -> Result<Tenant, AppError> {
    let unauthorized =
        || AppError::Unauthorized("Tenant is not authorized to pay this bill.".to_string());

    let tenant = find_tenant(state.db_pool()?, tenant_id)
        .await?
        .ok_or_else(unauthorized)?;
    let building = cached_building(state, bill.building_id).await?;

    if !tenant_may_pay(&tenant, bill, &building, landlord_id) {
        tracing::warn!(bill_id = %bill.id, %tenant_id, %landlord_id, "Rejected slip from unauthorized tenant");
        return Err(unauthorized());
    }
    Ok(tenant)
}
