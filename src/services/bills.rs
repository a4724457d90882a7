use std::collections::HashSet;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        Bill, BillContext, BillStatus, BillableRoom, Building, MeterReadings, NewBill,
        PaymentStatus,
    },
    repository::{
        bills::{
            find_bill_for_room_month, get_bill, insert_bill, list_billed_room_ids,
            list_bills_for_buildings, load_bill_contexts, save_bill,
        },
        is_unique_violation, map_db_error,
        property::{
            get_building, get_room_pricing, list_billable_rooms, list_landlord_buildings,
            update_room_meter_readings,
        },
    },
    schemas::{CreateBillInput, UpdateBillInput},
    services::charges::{coerce_amount, compute_amounts, fees_from_value, ChargeInputs},
    state::AppState,
};

/// `YYYY-MM` key of the month containing `date`.
pub fn billing_month(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Validate and normalize a `YYYY-MM` month key.
pub fn parse_month(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d")
        .map(billing_month)
        .map_err(|_| AppError::BadRequest(format!("Invalid month '{trimmed}', expected YYYY-MM.")))
}

/// The calendar date `now` falls on in the billing timezone.
pub fn billing_today(now: DateTime<Utc>, timezone: Tz) -> NaiveDate {
    now.with_timezone(&timezone).date_naive()
}

/// Day `due_day` of the month after `billing_date`, clamped to that month's last day.
pub fn due_date_for(billing_date: NaiveDate, due_day: u32) -> NaiveDate {
    let next_month_start = billing_date
        .with_day(1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .unwrap_or(billing_date);
    let last_day = next_month_start
        .checked_add_months(Months::new(1))
        .and_then(|after| after.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28);

    next_month_start
        .with_day(due_day.clamp(1, last_day))
        .unwrap_or(next_month_start)
}

/// Build the month's bill for one occupied room, using the building's current rates.
pub fn plan_room_bill(
    building: &Building,
    room: &BillableRoom,
    billing_date: NaiveDate,
    default_due_day: u32,
) -> Result<NewBill, AppError> {
    let amounts = compute_amounts(&ChargeInputs {
        water_rate: building.water_rate,
        electricity_rate: building.electricity_rate,
        rent_amount: room.price,
        ..ChargeInputs::default()
    })?;

    Ok(NewBill {
        building_id: building.id,
        room_id: room.room_id,
        tenant_id: Some(room.tenant_id),
        month: billing_month(billing_date),
        rent_amount: room.price,
        water_usage: Decimal::ZERO,
        electricity_usage: Decimal::ZERO,
        water_rate: building.water_rate,
        electricity_rate: building.electricity_rate,
        amounts,
        additional_fees: Vec::new(),
        status: BillStatus::Pending,
        billing_date,
        due_date: due_date_for(billing_date, building.due_day_or(default_due_day)),
        initial_meter_readings: room.last_meter_readings.clone(),
        current_meter_readings: room.last_meter_readings.clone(),
        notes: None,
    })
}

/// Bills still missing for the month; rooms in `billed_room_ids` are skipped.
pub fn plan_monthly_bills(
    building: &Building,
    rooms: &[BillableRoom],
    billed_room_ids: &HashSet<Uuid>,
    billing_date: NaiveDate,
    default_due_day: u32,
) -> Result<Vec<NewBill>, AppError> {
    rooms
        .iter()
        .filter(|room| !billed_room_ids.contains(&room.room_id))
        .map(|room| plan_room_bill(building, room, billing_date, default_due_day))
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyBillRun {
    pub building_id: Option<Uuid>,
    pub month: String,
    pub created: Vec<Bill>,
    pub skipped: u32,
    pub failed: u32,
}

/// Create the month's bills for every occupied room of `building`.
///
/// Re-running for the same month only fills gaps. Each room is inserted by its own
/// task; one room failing is logged and counted without affecting the others.
pub async fn create_monthly_bills(
    pool: &PgPool,
    building: &Building,
    billing_date: NaiveDate,
    default_due_day: u32,
) -> Result<MonthlyBillRun, AppError> {
    let month = billing_month(billing_date);
    let rooms = list_billable_rooms(pool, building.id).await?;
    let billed_room_ids = list_billed_room_ids(pool, building.id, &month)
        .await?
        .into_iter()
        .collect::<HashSet<_>>();

    let planned =
        plan_monthly_bills(building, &rooms, &billed_room_ids, billing_date, default_due_day)?;
    let mut run = MonthlyBillRun {
        building_id: Some(building.id),
        month: month.clone(),
        skipped: u32::try_from(rooms.len() - planned.len()).unwrap_or(u32::MAX),
        ..MonthlyBillRun::default()
    };

    let mut tasks = JoinSet::new();
    for new_bill in planned {
        let pool = pool.clone();
        tasks.spawn(async move {
            let room_id = new_bill.room_id;
            (room_id, create_if_absent(&pool, &new_bill).await)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(Some(bill)))) => run.created.push(bill),
            Ok((_, Ok(None))) => run.skipped += 1,
            Ok((room_id, Err(error))) => {
                warn!(%room_id, building_id = %building.id, %month, %error, "Failed to create monthly bill");
                run.failed += 1;
            }
            Err(error) => {
                warn!(building_id = %building.id, %month, %error, "Monthly bill task panicked");
                run.failed += 1;
            }
        }
    }

    info!(
        building_id = %building.id,
        %month,
        created = run.created.len(),
        skipped = run.skipped,
        failed = run.failed,
        "Monthly bills generated"
    );
    Ok(run)
}

/// Insert unless the room already has a bill for the month; `None` means it did.
async fn create_if_absent(pool: &PgPool, new_bill: &NewBill) -> Result<Option<Bill>, AppError> {
    if find_bill_for_room_month(pool, new_bill.room_id, &new_bill.month)
        .await?
        .is_some()
    {
        return Ok(None);
    }
    match insert_bill(pool, new_bill).await {
        Ok(bill) => Ok(Some(bill)),
        Err(error) if is_unique_violation(&error) => Ok(None),
        Err(error) => Err(map_db_error(error)),
    }
}

/// Run monthly generation for each of the landlord's buildings.
///
/// A building whose room listing fails is reported with `failed = 1` and the rest continue.
pub async fn create_monthly_bills_for_landlord(
    pool: &PgPool,
    landlord_id: Uuid,
    billing_date: NaiveDate,
    default_due_day: u32,
) -> Result<Vec<MonthlyBillRun>, AppError> {
    let buildings = list_landlord_buildings(pool, landlord_id).await?;
    let mut runs = Vec::with_capacity(buildings.len());
    for building in &buildings {
        match create_monthly_bills(pool, building, billing_date, default_due_day).await {
            Ok(run) => runs.push(run),
            Err(error) => {
                warn!(building_id = %building.id, %error, "Monthly bill generation failed for building");
                runs.push(MonthlyBillRun {
                    building_id: Some(building.id),
                    month: billing_month(billing_date),
                    failed: 1,
                    ..MonthlyBillRun::default()
                });
            }
        }
    }
    Ok(runs)
}

/// Build an ad-hoc bill from an operator request.
pub fn plan_ad_hoc_bill(
    input: &CreateBillInput,
    building: &Building,
    room_price: Decimal,
    last_readings: &MeterReadings,
    month: String,
    billing_date: NaiveDate,
    default_due_day: u32,
) -> Result<NewBill, AppError> {
    let rent_amount = input
        .rent_amount
        .as_ref()
        .map(coerce_amount)
        .unwrap_or(room_price);
    let water_rate = input
        .water_rate
        .as_ref()
        .map(coerce_amount)
        .unwrap_or(building.water_rate);
    let electricity_rate = input
        .electricity_rate
        .as_ref()
        .map(coerce_amount)
        .unwrap_or(building.electricity_rate);
    let water_usage = coerce_amount(input.water_usage.as_ref().unwrap_or(&Value::Null));
    let electricity_usage =
        coerce_amount(input.electricity_usage.as_ref().unwrap_or(&Value::Null));
    let additional_fees = input
        .additional_fees
        .as_ref()
        .map(fees_from_value)
        .unwrap_or_default();
    let current_meter_readings = input
        .current_meter_readings
        .as_ref()
        .map(MeterReadings::from_value)
        .unwrap_or_else(|| last_readings.clone());

    let amounts = compute_amounts(&ChargeInputs {
        water_usage,
        water_rate,
        electricity_usage,
        electricity_rate,
        rent_amount,
        fees: &additional_fees,
    })?;

    Ok(NewBill {
        building_id: building.id,
        room_id: input.room_id,
        tenant_id: input.tenant_id,
        month,
        rent_amount,
        water_usage,
        electricity_usage,
        water_rate,
        electricity_rate,
        amounts,
        additional_fees,
        status: BillStatus::Pending,
        billing_date,
        due_date: due_date_for(billing_date, building.due_day_or(default_due_day)),
        initial_meter_readings: last_readings.clone(),
        current_meter_readings,
        notes: input.notes.clone(),
    })
}

/// Create one bill outside the monthly batch. Duplicates for `(room, month)` are rejected.
pub async fn create_bill(
    pool: &PgPool,
    landlord_id: Uuid,
    input: &CreateBillInput,
    today: NaiveDate,
    default_due_day: u32,
) -> Result<Bill, AppError> {
    let room = get_room_pricing(pool, input.room_id).await?;
    let building = get_building(pool, room.building_id).await?;
    if building.landlord_id != landlord_id {
        return Err(AppError::Forbidden(
            "Room does not belong to one of your buildings.".to_string(),
        ));
    }

    let billing_date = input.billing_date.unwrap_or(today);
    let month = match input.month.as_deref() {
        Some(raw) => parse_month(raw)?,
        None => billing_month(billing_date),
    };

    if find_bill_for_room_month(pool, input.room_id, &month)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(format!(
            "A bill for this room already exists for {month}."
        )));
    }

    let new_bill = plan_ad_hoc_bill(
        input,
        &building,
        room.price,
        &room.last_meter_readings,
        month,
        billing_date,
        default_due_day,
    )?;
    insert_bill(pool, &new_bill).await.map_err(map_db_error)
}

/// Apply an operator's usage/fee edit in place and finalize the bill.
pub fn apply_usage_update(
    bill: &mut Bill,
    input: &UpdateBillInput,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if bill.is_paid() {
        return Err(AppError::Conflict(
            "Bill is already paid and can no longer be edited.".to_string(),
        ));
    }

    if let Some(value) = &input.rent_amount {
        bill.rent_amount = coerce_amount(value);
    }
    if let Some(value) = &input.water_usage {
        bill.water_usage = coerce_amount(value);
    }
    if let Some(value) = &input.electricity_usage {
        bill.electricity_usage = coerce_amount(value);
    }
    if let Some(value) = &input.water_rate {
        bill.water_rate = coerce_amount(value);
    }
    if let Some(value) = &input.electricity_rate {
        bill.electricity_rate = coerce_amount(value);
    }
    if let Some(value) = &input.additional_fees {
        bill.additional_fees = fees_from_value(value);
    }
    if let Some(notes) = &input.notes {
        bill.notes = Some(notes.trim().to_string()).filter(|text| !text.is_empty());
    }
    if let Some(value) = &input.current_meter_readings {
        bill.current_meter_readings = MeterReadings::from_value(value);
    }
    bill.current_meter_readings.last_updated = Some(now);

    bill.recompute()?;
    bill.status = BillStatus::Completed;
    Ok(())
}

pub async fn update_usage_and_fees(
    pool: &PgPool,
    bill_id: Uuid,
    input: &UpdateBillInput,
    now: DateTime<Utc>,
) -> Result<Bill, AppError> {
    let mut bill = get_bill(pool, bill_id).await?;
    apply_usage_update(&mut bill, input, now)?;
    let saved = save_bill(pool, &bill).await?;

    if input.current_meter_readings.is_some() {
        if let Err(error) =
            update_room_meter_readings(pool, saved.room_id, &saved.current_meter_readings).await
        {
            warn!(room_id = %saved.room_id, %error, "Failed to carry meter readings to room");
        }
    }

    info!(bill_id = %saved.id, total = %saved.total_amount, "Bill usage updated");
    Ok(saved)
}

/// Record a confirmed payment. Charge inputs and derived amounts are left
/// exactly as they were when the payment was checked.
pub fn apply_payment(
    bill: &mut Bill,
    payment_date: DateTime<Utc>,
    slip_url: Option<String>,
) -> Result<(), AppError> {
    if bill.is_paid() {
        return Err(AppError::Conflict("Bill is already paid.".to_string()));
    }
    bill.payment_status = PaymentStatus::Paid;
    bill.payment_date = Some(payment_date);
    bill.slip_data = slip_url;
    Ok(())
}

pub async fn mark_paid(
    pool: &PgPool,
    bill_id: Uuid,
    payment_date: DateTime<Utc>,
    slip_url: Option<String>,
) -> Result<Bill, AppError> {
    let bill = get_bill(pool, bill_id).await?;
    settle_bill(pool, bill, payment_date, slip_url).await
}

/// Mark an already-loaded bill paid. The version it was read at must still be
/// current, so a payment checked against a stale total is rejected.
pub async fn settle_bill(
    pool: &PgPool,
    mut bill: Bill,
    payment_date: DateTime<Utc>,
    slip_url: Option<String>,
) -> Result<Bill, AppError> {
    apply_payment(&mut bill, payment_date, slip_url)?;
    let saved = save_bill(pool, &bill).await?;
    info!(bill_id = %saved.id, total = %saved.total_amount, "Bill marked paid");
    Ok(saved)
}

/// Point a paid bill at its stored slip.
pub fn record_slip_url(bill: &mut Bill, slip_url: String) -> Result<(), AppError> {
    if !bill.is_paid() {
        return Err(AppError::Conflict(
            "Only a paid bill can reference a payment slip.".to_string(),
        ));
    }
    bill.slip_data = Some(slip_url);
    Ok(())
}

pub async fn attach_slip_url(
    pool: &PgPool,
    mut bill: Bill,
    slip_url: String,
) -> Result<Bill, AppError> {
    record_slip_url(&mut bill, slip_url)?;
    save_bill(pool, &bill).await
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: Uuid,
    pub room_number: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FloorSummary {
    pub id: Uuid,
    pub floor_number: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingSummary {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSummary {
    pub id: Uuid,
    pub name: String,
}

/// A bill with the room/floor/building/tenant it belongs to, for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillDetail {
    #[serde(flatten)]
    pub bill: Bill,
    pub room: Option<RoomSummary>,
    pub floor: Option<FloorSummary>,
    pub building: Option<BuildingSummary>,
    pub tenant: Option<TenantSummary>,
}

impl BillDetail {
    pub fn new(bill: Bill, context: Option<&BillContext>) -> Self {
        let Some(context) = context else {
            return Self {
                bill,
                room: None,
                floor: None,
                building: None,
                tenant: None,
            };
        };
        Self {
            room: Some(RoomSummary {
                id: bill.room_id,
                room_number: context.room_number.clone(),
            }),
            floor: context.floor_id.zip(context.floor_number).map(|(id, floor_number)| {
                FloorSummary { id, floor_number }
            }),
            building: Some(BuildingSummary {
                id: bill.building_id,
                name: context.building_name.clone(),
            }),
            tenant: context
                .tenant_id
                .zip(context.tenant_name.clone())
                .map(|(id, name)| TenantSummary { id, name }),
            bill,
        }
    }
}

pub async fn enrich_bills(pool: &PgPool, bills: Vec<Bill>) -> Result<Vec<BillDetail>, AppError> {
    let ids = bills.iter().map(|bill| bill.id).collect::<Vec<_>>();
    let contexts = load_bill_contexts(pool, &ids).await?;
    Ok(bills
        .into_iter()
        .map(|bill| {
            let context = contexts.get(&bill.id);
            BillDetail::new(bill, context)
        })
        .collect())
}

pub async fn get_bill_detail(pool: &PgPool, bill_id: Uuid) -> Result<BillDetail, AppError> {
    let bill = get_bill(pool, bill_id).await?;
    let mut details = enrich_bills(pool, vec![bill]).await?;
    details
        .pop()
        .ok_or_else(|| AppError::NotFound("Bill not found.".to_string()))
}

pub async fn list_bill_details(
    pool: &PgPool,
    landlord_id: Uuid,
    month: &str,
) -> Result<Vec<BillDetail>, AppError> {
    let building_ids = list_landlord_buildings(pool, landlord_id)
        .await?
        .into_iter()
        .map(|building| building.id)
        .collect::<Vec<_>>();
    let bills = list_bills_for_buildings(pool, &building_ids, month).await?;
    enrich_bills(pool, bills).await
}

/// Building configuration, served from the in-process cache when fresh.
pub async fn cached_building(state: &AppState, building_id: Uuid) -> Result<Building, AppError> {
    if let Some(building) = state.building_cache.get(&building_id).await {
        return Ok(building);
    }
    let building = get_building(state.db_pool()?, building_id).await?;
    state
        .building_cache
        .insert(building_id, building.clone())
        .await;
    Ok(building)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use uuid::Uuid;

    use super::{
        apply_payment, apply_usage_update, billing_month, billing_today, due_date_for,
        parse_month, plan_ad_hoc_bill, plan_monthly_bills, plan_room_bill, record_slip_url,
    };
    use crate::{
        error::AppError,
        models::{BillStatus, BillableRoom, MeterReadings, PaymentStatus},
        schemas::{CreateBillInput, UpdateBillInput},
        services::{charges::Fee, test_support::{bill_from_plan, sample_building}},
    };

    fn room(price: Decimal) -> BillableRoom {
        BillableRoom {
            room_id: Uuid::new_v4(),
            room_number: "101".to_string(),
            price,
            last_meter_readings: MeterReadings {
                water: dec!(120),
                electricity: dec!(4400),
                last_updated: None,
            },
            tenant_id: Uuid::new_v4(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn due_date_lands_in_following_month() {
        assert_eq!(due_date_for(date(2026, 1, 1), 5), date(2026, 2, 5));
        assert_eq!(due_date_for(date(2026, 12, 28), 5), date(2027, 1, 5));
    }

    #[test]
    fn due_date_clamps_to_short_months() {
        assert_eq!(due_date_for(date(2026, 1, 15), 31), date(2026, 2, 28));
        assert_eq!(due_date_for(date(2028, 1, 15), 30), date(2028, 2, 29));
        assert_eq!(due_date_for(date(2026, 3, 1), 31), date(2026, 4, 30));
    }

    #[test]
    fn formats_and_parses_months() {
        assert_eq!(billing_month(date(2026, 3, 9)), "2026-03");
        assert_eq!(parse_month(" 2026-03 ").expect("valid"), "2026-03");
        assert!(parse_month("2026-13").is_err());
        assert!(parse_month("March").is_err());
    }

    #[test]
    fn billing_today_uses_billing_timezone() {
        let late_utc = Utc.with_ymd_and_hms(2026, 5, 31, 18, 30, 0).unwrap();
        assert_eq!(
            billing_today(late_utc, chrono_tz::Asia::Bangkok),
            date(2026, 6, 1)
        );
        assert_eq!(billing_today(late_utc, chrono_tz::UTC), date(2026, 5, 31));
    }

    #[test]
    fn planned_room_bill_starts_empty_with_building_rates() {
        let building = sample_building(dec!(18), dec!(7), Some(10), None);
        let occupied = room(dec!(4500));
        let planned = plan_room_bill(&building, &occupied, date(2026, 4, 1), 5).unwrap();

        assert_eq!(planned.month, "2026-04");
        assert_eq!(planned.due_date, date(2026, 5, 10));
        assert_eq!(planned.rent_amount, dec!(4500));
        assert_eq!(planned.water_rate, dec!(18));
        assert_eq!(planned.electricity_rate, dec!(7));
        assert_eq!(planned.water_usage, Decimal::ZERO);
        assert_eq!(planned.amounts.total_amount, dec!(4500));
        assert_eq!(planned.status, BillStatus::Pending);
        assert_eq!(planned.initial_meter_readings, occupied.last_meter_readings);
        assert_eq!(planned.tenant_id, Some(occupied.tenant_id));
    }

    #[test]
    fn planning_twice_for_same_month_creates_nothing_new() {
        let building = sample_building(dec!(18), dec!(7), None, None);
        let rooms = vec![room(dec!(4000)), room(dec!(4200)), room(dec!(3900))];
        let billing_date = date(2026, 4, 1);

        let first = plan_monthly_bills(&building, &rooms, &HashSet::new(), billing_date, 5).unwrap();
        assert_eq!(first.len(), 3);

        let billed = first.iter().map(|bill| bill.room_id).collect::<HashSet<_>>();
        let second = plan_monthly_bills(&building, &rooms, &billed, billing_date, 5).unwrap();
        assert!(second.is_empty());

        let partially_billed = HashSet::from([rooms[0].room_id]);
        let gap_fill =
            plan_monthly_bills(&building, &rooms, &partially_billed, billing_date, 5).unwrap();
        assert_eq!(gap_fill.len(), 2);
        assert!(gap_fill.iter().all(|bill| bill.room_id != rooms[0].room_id));
    }

    #[test]
    fn ad_hoc_bill_computes_amounts_and_falls_back_to_room_price() {
        let building = sample_building(dec!(20), dec!(6), None, None);
        let input: CreateBillInput = serde_json::from_value(json!({
            "roomId": Uuid::new_v4(),
            "waterUsage": 10,
            "electricityUsage": "50",
            "additionalFees": [{"name": "Internet", "price": "300"}]
        }))
        .expect("valid body");

        let planned = plan_ad_hoc_bill(
            &input,
            &building,
            dec!(5000),
            &MeterReadings::default(),
            "2026-04".to_string(),
            date(2026, 4, 3),
            5,
        )
        .unwrap();

        assert_eq!(planned.rent_amount, dec!(5000));
        assert_eq!(planned.amounts.water_amount, dec!(200));
        assert_eq!(planned.amounts.electricity_amount, dec!(300));
        assert_eq!(planned.amounts.total_amount, dec!(5800));
        assert_eq!(planned.due_date, date(2026, 5, 5));
    }

    #[test]
    fn usage_update_recomputes_and_completes() {
        let building = sample_building(dec!(20), dec!(6), None, None);
        let mut bill = bill_from_plan(plan_room_bill(&building, &room(dec!(5000)), date(2026, 4, 1), 5).unwrap());
        let now = Utc.with_ymd_and_hms(2026, 4, 28, 9, 0, 0).unwrap();

        let input: UpdateBillInput = serde_json::from_value(json!({
            "waterUsage": 10,
            "electricityUsage": 50,
            "additionalFees": [{"name": "Cleaning", "price": 150}],
            "currentMeterReadings": {"water": 130, "electricity": 4450}
        }))
        .expect("valid body");

        apply_usage_update(&mut bill, &input, now).expect("unpaid bill is editable");

        assert_eq!(bill.status, BillStatus::Completed);
        assert_eq!(bill.water_amount, dec!(200));
        assert_eq!(bill.electricity_amount, dec!(300));
        assert_eq!(bill.total_amount, dec!(5650));
        assert_eq!(bill.water_rate, dec!(20));
        assert_eq!(bill.current_meter_readings.water, dec!(130));
        assert_eq!(bill.current_meter_readings.last_updated, Some(now));
    }

    #[test]
    fn usage_update_coerces_garbage_to_zero() {
        let building = sample_building(dec!(20), dec!(6), None, None);
        let mut bill = bill_from_plan(plan_room_bill(&building, &room(dec!(5000)), date(2026, 4, 1), 5).unwrap());
        let input = UpdateBillInput {
            rent_amount: Some(json!("five thousand")),
            water_usage: Some(json!(3)),
            ..UpdateBillInput::default()
        };

        apply_usage_update(&mut bill, &input, Utc::now()).expect("editable");
        assert_eq!(bill.rent_amount, Decimal::ZERO);
        assert_eq!(bill.total_amount, dec!(60));
    }

    #[test]
    fn paid_bill_rejects_edits_and_second_payment() {
        let building = sample_building(dec!(20), dec!(6), None, None);
        let mut bill = bill_from_plan(plan_room_bill(&building, &room(dec!(5000)), date(2026, 4, 1), 5).unwrap());
        let paid_at = Utc.with_ymd_and_hms(2026, 5, 2, 3, 0, 0).unwrap();

        apply_payment(&mut bill, paid_at, Some("https://cdn.test/slip.jpg".to_string()))
            .expect("first payment");
        assert_eq!(bill.payment_status, PaymentStatus::Paid);
        assert_eq!(bill.payment_date, Some(paid_at));

        assert!(apply_payment(&mut bill, paid_at, None).is_err());
        assert!(apply_usage_update(&mut bill, &UpdateBillInput::default(), paid_at).is_err());
        assert_eq!(bill.slip_data.as_deref(), Some("https://cdn.test/slip.jpg"));
    }

    #[test]
    fn payment_keeps_charge_inputs() {
        let building = sample_building(dec!(20), dec!(6), None, None);
        let mut bill = bill_from_plan(plan_room_bill(&building, &room(dec!(5000)), date(2026, 4, 1), 5).unwrap());
        bill.additional_fees.push(Fee::priced("Internet", dec!(300)));
        bill.recompute().unwrap();
        let before = bill.clone();

        apply_payment(&mut bill, Utc::now(), None).expect("payment");

        assert_eq!(bill.rent_amount, before.rent_amount);
        assert_eq!(bill.additional_fees, before.additional_fees);
        assert_eq!(bill.total_amount, before.total_amount);
        assert_eq!(bill.total_amount, dec!(5300));
    }

    #[test]
    fn payment_keeps_the_total_it_was_checked_against() {
        let building = sample_building(dec!(20), dec!(4.50), None, None);
        let mut bill = bill_from_plan(plan_room_bill(&building, &room(dec!(5000)), date(2026, 4, 1), 5).unwrap());
        let input = UpdateBillInput {
            electricity_usage: Some(json!("12.345")),
            ..UpdateBillInput::default()
        };
        apply_usage_update(&mut bill, &input, Utc::now()).expect("editable");
        assert_eq!(bill.electricity_amount, dec!(55.5525));
        let checked_total = bill.total_amount;

        // Inputs drifting after the check must not move the amounts being paid.
        bill.electricity_usage = dec!(12.35);
        apply_payment(&mut bill, Utc::now(), None).expect("payment");

        assert_eq!(bill.total_amount, checked_total);
        assert_eq!(bill.electricity_amount, dec!(55.5525));
    }

    #[test]
    fn oversized_usage_is_rejected_instead_of_overflowing() {
        let building = sample_building(dec!(20), dec!(6), None, None);
        let mut bill = bill_from_plan(plan_room_bill(&building, &room(dec!(5000)), date(2026, 4, 1), 5).unwrap());
        let input: UpdateBillInput = serde_json::from_value(json!({
            "waterUsage": "79228162514264337593543950335"
        }))
        .expect("valid body");

        assert!(matches!(
            apply_usage_update(&mut bill, &input, Utc::now()),
            Err(AppError::UnprocessableEntity(_))
        ));
        assert_eq!(bill.total_amount, dec!(5000));
    }

    #[test]
    fn slip_url_attaches_only_after_payment() {
        let building = sample_building(dec!(20), dec!(6), None, None);
        let mut bill = bill_from_plan(plan_room_bill(&building, &room(dec!(5000)), date(2026, 4, 1), 5).unwrap());

        assert!(matches!(
            record_slip_url(&mut bill, "https://cdn.test/a.jpg".to_string()),
            Err(AppError::Conflict(_))
        ));
        assert_eq!(bill.slip_data, None);

        apply_payment(&mut bill, Utc::now(), None).expect("payment");
        record_slip_url(&mut bill, "https://cdn.test/a.jpg".to_string()).expect("paid");
        assert_eq!(bill.slip_data.as_deref(), Some("https://cdn.test/a.jpg"));
        assert_eq!(bill.total_amount, dec!(5000));
    }

    #[test]
    fn stored_fees_and_readings_survive_the_jsonb_round_trip() {
        let fees = vec![
            Fee::priced("Parking", dec!(150.25)),
            Fee::priced("Late Payment", dec!(500)),
        ];
        let readings = MeterReadings {
            water: dec!(130.5),
            electricity: dec!(4412.345),
            last_updated: Some(Utc.with_ymd_and_hms(2026, 4, 28, 9, 0, 0).unwrap()),
        };

        let stored_fees = serde_json::to_value(&fees).unwrap();
        let stored_readings = serde_json::to_value(&readings).unwrap();

        assert_eq!(serde_json::from_value::<Vec<Fee>>(stored_fees).unwrap(), fees);
        assert_eq!(
            serde_json::from_value::<MeterReadings>(stored_readings).unwrap(),
            readings
        );
    }

    /// Runs against a real Postgres: `DATABASE_URL=... cargo test -- --ignored`.
    mod persisted {
        use chrono::{NaiveDate, Utc};
        use rust_decimal_macros::dec;
        use serde_json::json;
        use sqlx::PgPool;
        use uuid::Uuid;

        use super::super::{
            create_if_absent, plan_room_bill, settle_bill, update_usage_and_fees,
        };
        use crate::{
            error::AppError,
            repository::{
                bills::{get_bill, insert_bill},
                is_unique_violation,
                property::{get_building, list_billable_rooms},
            },
            schemas::UpdateBillInput,
            services::charges::compute_amounts,
        };

        async fn seed_room(pool: &PgPool) -> Uuid {
            let landlord_id = Uuid::new_v4();
            sqlx::query("INSERT INTO landlords (id, name) VALUES ($1, 'Somchai Jaidee')")
                .bind(landlord_id)
                .execute(pool)
                .await
                .unwrap();
            let building_id: Uuid = sqlx::query_scalar(
                "INSERT INTO buildings (landlord_id, name, water_rate, electricity_rate)
                 VALUES ($1, 'Baan Suan', 20, 4.50) RETURNING id",
            )
            .bind(landlord_id)
            .fetch_one(pool)
            .await
            .unwrap();
            let tenant_id: Uuid = sqlx::query_scalar(
                "INSERT INTO tenants (landlord_id, name) VALUES ($1, 'Anong') RETURNING id",
            )
            .bind(landlord_id)
            .fetch_one(pool)
            .await
            .unwrap();
            let room_id: Uuid = sqlx::query_scalar(
                "INSERT INTO rooms (building_id, room_number, price, current_tenant_id)
                 VALUES ($1, '101', 5000, $2) RETURNING id",
            )
            .bind(building_id)
            .bind(tenant_id)
            .fetch_one(pool)
            .await
            .unwrap();
            sqlx::query("UPDATE tenants SET room_id = $1 WHERE id = $2")
                .bind(room_id)
                .bind(tenant_id)
                .execute(pool)
                .await
                .unwrap();
            building_id
        }

        #[sqlx::test(migrations = "./migrations")]
        #[ignore = "needs DATABASE_URL"]
        async fn fractional_usage_keeps_amounts_exact_through_payment(pool: PgPool) {
            let building_id = seed_room(&pool).await;
            let building = get_building(&pool, building_id).await.unwrap();
            let rooms = list_billable_rooms(&pool, building_id).await.unwrap();
            let plan = plan_room_bill(
                &building,
                &rooms[0],
                NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
                5,
            )
            .unwrap();
            let created = insert_bill(&pool, &plan).await.unwrap();

            let input: UpdateBillInput = serde_json::from_value(json!({
                "electricityUsage": "12.345",
                "additionalFees": [{"name": "Parking", "price": "150.25"}]
            }))
            .unwrap();
            let updated = update_usage_and_fees(&pool, created.id, &input, Utc::now())
                .await
                .unwrap();

            assert_eq!(updated.electricity_usage, dec!(12.345));
            assert_eq!(
                updated.electricity_amount,
                updated.electricity_usage * updated.electricity_rate
            );
            assert_eq!(
                updated.total_amount,
                compute_amounts(&updated.charge_inputs()).unwrap().total_amount
            );
            assert_eq!(updated.total_amount, dec!(5205.8025));

            // The first read is now stale; settling against it must not succeed.
            assert!(matches!(
                settle_bill(&pool, created, Utc::now(), None).await,
                Err(AppError::Conflict(_))
            ));

            let paid = settle_bill(&pool, updated.clone(), Utc::now(), None)
                .await
                .unwrap();
            assert_eq!(paid.total_amount, updated.total_amount);
            assert_eq!(paid.electricity_amount, updated.electricity_amount);

            let reloaded = get_bill(&pool, paid.id).await.unwrap();
            assert_eq!(reloaded.additional_fees, updated.additional_fees);
            assert_eq!(reloaded.total_amount, dec!(5205.8025));
        }

        #[sqlx::test(migrations = "./migrations")]
        #[ignore = "needs DATABASE_URL"]
        async fn second_bill_for_room_month_is_skipped(pool: PgPool) {
            let building_id = seed_room(&pool).await;
            let building = get_building(&pool, building_id).await.unwrap();
            let rooms = list_billable_rooms(&pool, building_id).await.unwrap();
            let plan = plan_room_bill(
                &building,
                &rooms[0],
                NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
                5,
            )
            .unwrap();

            let first = create_if_absent(&pool, &plan).await.unwrap();
            assert!(first.is_some());
            assert!(create_if_absent(&pool, &plan).await.unwrap().is_none());

            let duplicate = insert_bill(&pool, &plan).await.unwrap_err();
            assert!(is_unique_violation(&duplicate));
        }
    }
}
