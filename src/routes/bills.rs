use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    models::Bill,
    repository::bills::get_bill,
    schemas::{
        validate_input, ApplyLateFeesInput, BillPath, BillsQuery, CreateBillInput,
        CreateMonthlyBillsInput, MarkBillPaidInput, UpdateBillInput,
    },
    services::{
        bills::{
            billing_month, billing_today, create_bill, create_monthly_bills_for_landlord,
            enrich_bills, get_bill_detail, list_bill_details, parse_month, settle_bill,
            update_usage_and_fees, BillDetail, MonthlyBillRun,
        },
        notifications::{notify_bill_tenant, payment_confirmation_message},
        overdue::apply_late_fees,
    },
    state::AppState,
    tenancy::{assert_bill_owner, assert_landlord},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/bills",
            axum::routing::get(list_bills).post(create_single_bill),
        )
        .route("/bills/create", axum::routing::post(create_monthly))
        .route("/bills/overdue", axum::routing::post(apply_overdue_fees))
        .route(
            "/bills/{bill_id}",
            axum::routing::get(get_bill_by_id).put(update_bill),
        )
        .route(
            "/bills/{bill_id}/mark-paid",
            axum::routing::post(mark_bill_paid),
        )
}

async fn list_bills(
    State(state): State<AppState>,
    Query(query): Query<BillsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let landlord_id = require_user_id(&state, &headers)?;
    let pool = state.db_pool()?;

    let month = match query.month.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        Some(raw) => parse_month(raw)?,
        None => billing_month(billing_today(Utc::now(), state.config.billing_timezone)),
    };

    let bills = list_bill_details(pool, landlord_id, &month).await?;
    Ok(Json(json!({ "month": month, "data": bills })))
}

async fn create_single_bill(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBillInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let landlord_id = require_user_id(&state, &headers)?;
    let pool = state.db_pool()?;

    let today = billing_today(Utc::now(), state.config.billing_timezone);
    let bill = create_bill(
        pool,
        landlord_id,
        &payload,
        today,
        state.config.default_due_day,
    )
    .await?;
    tracing::info!(bill_id = %bill.id, room_id = %bill.room_id, month = %bill.month, "Bill created");

    Ok((StatusCode::CREATED, Json(detail_of(pool, bill).await?)))
}

async fn get_bill_by_id(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
) -> AppResult<Json<BillDetail>> {
    let landlord_id = require_user_id(&state, &headers)?;
    let pool = state.db_pool()?;

    let detail = get_bill_detail(pool, path.bill_id).await?;
    assert_bill_owner(&state, landlord_id, &detail.bill).await?;
    Ok(Json(detail))
}

async fn update_bill(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateBillInput>,
) -> AppResult<Json<BillDetail>> {
    validate_input(&payload)?;
    let landlord_id = require_user_id(&state, &headers)?;
    let pool = state.db_pool()?;

    let bill = get_bill(pool, path.bill_id).await?;
    assert_bill_owner(&state, landlord_id, &bill).await?;

    let updated = update_usage_and_fees(pool, bill.id, &payload, Utc::now()).await?;
    Ok(Json(detail_of(pool, updated).await?))
}

async fn mark_bill_paid(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
    Json(payload): Json<MarkBillPaidInput>,
) -> AppResult<Json<BillDetail>> {
    let landlord_id = require_user_id(&state, &headers)?;
    let pool = state.db_pool()?;

    let bill = get_bill(pool, path.bill_id).await?;
    assert_bill_owner(&state, landlord_id, &bill).await?;

    let slip_url = payload
        .slip_url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty());
    let paid = settle_bill(
        pool,
        bill,
        payload.payment_date.unwrap_or_else(Utc::now),
        slip_url,
    )
    .await?;
    tracing::info!(bill_id = %paid.id, %landlord_id, "Bill marked paid manually");

    notify_bill_tenant(
        pool,
        &state.http_client,
        &state.config,
        landlord_id,
        &paid,
        &payment_confirmation_message(&paid),
    )
    .await;

    Ok(Json(detail_of(pool, paid).await?))
}

async fn create_monthly(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateMonthlyBillsInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers)?;
    let landlord = assert_landlord(&state, user_id).await?;
    let pool = state.db_pool()?;

    let billing_date = payload
        .billing_date
        .unwrap_or_else(|| billing_today(Utc::now(), state.config.billing_timezone));

    let runs = create_monthly_bills_for_landlord(
        pool,
        landlord.id,
        billing_date,
        state.config.default_due_day,
    )
    .await?;

    Ok(Json(monthly_run_report(&billing_month(billing_date), &runs)))
}

async fn apply_overdue_fees(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ApplyLateFeesInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers)?;
    let landlord = assert_landlord(&state, user_id).await?;
    let month = parse_month(&payload.month)?;

    let summary = apply_late_fees(&state, landlord.id, &month, Utc::now()).await?;
    Ok(Json(json!(summary)))
}

async fn detail_of(pool: &PgPool, bill: Bill) -> Result<BillDetail, AppError> {
    let fallback = BillDetail::new(bill.clone(), None);
    Ok(enrich_bills(pool, vec![bill]).await?.pop().unwrap_or(fallback))
}

/// Per-building counts plus totals for a monthly generation run.
fn monthly_run_report(month: &str, runs: &[MonthlyBillRun]) -> Value {
    let buildings = runs
        .iter()
        .map(|run| {
            json!({
                "buildingId": run.building_id,
                "created": run.created.len(),
                "skipped": run.skipped,
                "failed": run.failed,
            })
        })
        .collect::<Vec<_>>();

    json!({
        "month": month,
        "created": runs.iter().map(|run| run.created.len()).sum::<usize>(),
        "skipped": runs.iter().map(|run| run.skipped).sum::<u32>(),
        "failed": runs.iter().map(|run| run.failed).sum::<u32>(),
        "buildings": buildings,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::monthly_run_report;
    use crate::services::bills::MonthlyBillRun;

    #[test]
    fn monthly_report_sums_building_counts() {
        let first = Uuid::new_v4();
        let runs = vec![
            MonthlyBillRun {
                building_id: Some(first),
                month: "2026-05".to_string(),
                skipped: 2,
                ..MonthlyBillRun::default()
            },
            MonthlyBillRun {
                building_id: None,
                month: "2026-05".to_string(),
                failed: 1,
                ..MonthlyBillRun::default()
            },
        ];

        let report = monthly_run_report("2026-05", &runs);
        assert_eq!(report["skipped"], json!(2));
        assert_eq!(report["failed"], json!(1));
        assert_eq!(report["created"], json!(0));
        assert_eq!(report["buildings"][0]["buildingId"], json!(first));
        assert_eq!(report["buildings"].as_array().map(Vec::len), Some(2));
    }
}
