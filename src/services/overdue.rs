use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::Bill,
    repository::bills::{list_unpaid_bills_for_landlord, save_bill},
    services::{
        bills::{billing_today, cached_building},
        charges::{compute_amounts, ChargeInputs, Fee, LATE_PAYMENT_FEE_NAME},
        notifications::{late_fee_message, notify_bill_tenant},
    },
    state::AppState,
};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationSummary {
    pub month: String,
    pub escalated: u32,
    pub skipped: u32,
    pub failed: u32,
    pub notified: u32,
}

/// Whether `bill` should receive a late fee on `billing_day`.
///
/// Overdue means unpaid with a due date strictly before the billing day, and no
/// late fee yet. Evaluating against the billing-timezone date rather than the
/// current instant keeps the answer fixed for a whole day.
pub fn is_escalation_candidate(bill: &Bill, billing_day: NaiveDate) -> bool {
    !bill.is_paid() && bill.due_date < billing_day && !bill.has_late_fee()
}

/// Append the late fee and re-derive the total.
///
/// Usage amounts were finalized before the bill fell due, so only the fee-driven
/// total changes. Returns `false` without touching the bill when a late fee exists.
pub fn apply_late_fee(bill: &mut Bill, charge: Decimal) -> Result<bool, AppError> {
    if bill.has_late_fee() {
        return Ok(false);
    }
    let mut fees = bill.additional_fees.clone();
    fees.push(Fee::priced(LATE_PAYMENT_FEE_NAME, charge));
    let total_amount = compute_amounts(&ChargeInputs {
        fees: &fees,
        ..bill.charge_inputs()
    })?
    .total_amount;

    bill.additional_fees = fees;
    bill.total_amount = total_amount;
    Ok(true)
}

/// Add late fees to the landlord's overdue bills for `month` and notify each tenant.
///
/// Per-bill failures are counted; a failed notification never undoes the fee.
pub async fn apply_late_fees(
    state: &AppState,
    landlord_id: Uuid,
    month: &str,
    now: DateTime<Utc>,
) -> Result<EscalationSummary, AppError> {
    let pool = state.db_pool()?;
    let billing_day = billing_today(now, state.config.billing_timezone);
    let bills = list_unpaid_bills_for_landlord(pool, landlord_id, month).await?;

    let mut summary = EscalationSummary {
        month: month.to_string(),
        ..EscalationSummary::default()
    };

    for mut bill in bills {
        if !is_escalation_candidate(&bill, billing_day) {
            summary.skipped += 1;
            continue;
        }

        let charge = match cached_building(state, bill.building_id).await {
            Ok(building) => building.late_payment_charge_or(state.config.default_late_payment_charge),
            Err(error) => {
                warn!(bill_id = %bill.id, %error, "Could not load building for late fee");
                summary.failed += 1;
                continue;
            }
        };

        if let Err(error) = apply_late_fee(&mut bill, charge) {
            warn!(bill_id = %bill.id, %error, "Could not compute late fee total");
            summary.failed += 1;
            continue;
        }
        let saved = match save_bill(pool, &bill).await {
            Ok(saved) => saved,
            Err(error) => {
                warn!(bill_id = %bill.id, %error, "Failed to save late fee");
                summary.failed += 1;
                continue;
            }
        };
        summary.escalated += 1;

        let message = late_fee_message(&saved, charge);
        if notify_bill_tenant(
            pool,
            &state.http_client,
            &state.config,
            landlord_id,
            &saved,
            &message,
        )
        .await
        {
            summary.notified += 1;
        }
    }

    info!(
        %landlord_id,
        month,
        %billing_day,
        escalated = summary.escalated,
        skipped = summary.skipped,
        failed = summary.failed,
        notified = summary.notified,
        "Late fee sweep completed"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::{apply_late_fee, is_escalation_candidate};
    use crate::{
        models::{BillableRoom, MeterReadings, PaymentStatus},
        services::{
            bills::{billing_today, plan_room_bill},
            charges::{compute_amounts, Fee, LATE_PAYMENT_FEE_NAME},
            test_support::{bill_from_plan, sample_building},
        },
    };

    fn overdue_bill(due_date: NaiveDate) -> crate::models::Bill {
        let building = sample_building(dec!(20), dec!(6), None, Some(dec!(300)));
        let room = BillableRoom {
            room_id: Uuid::new_v4(),
            room_number: "204".to_string(),
            price: dec!(5000),
            last_meter_readings: MeterReadings::default(),
            tenant_id: Uuid::new_v4(),
        };
        let mut bill = bill_from_plan(plan_room_bill(
            &building,
            &room,
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            5,
        )
        .unwrap());
        bill.water_usage = dec!(10);
        bill.electricity_usage = dec!(50);
        bill.recompute().unwrap();
        bill.due_date = due_date;
        bill
    }

    #[test]
    fn late_fee_is_applied_once_and_raises_total_by_charge() {
        let today = NaiveDate::from_ymd_opt(2026, 4, 6).unwrap();
        let mut bill = overdue_bill(today - Duration::days(1));
        let before = bill.total_amount;
        assert_eq!(before, dec!(5500));
        assert!(is_escalation_candidate(&bill, today));

        assert!(apply_late_fee(&mut bill, dec!(300)).unwrap());
        assert!(!is_escalation_candidate(&bill, today));
        assert!(!apply_late_fee(&mut bill, dec!(300)).unwrap());

        let late_fees = bill
            .additional_fees
            .iter()
            .filter(|fee| fee.name == LATE_PAYMENT_FEE_NAME)
            .collect::<Vec<_>>();
        assert_eq!(late_fees, vec![&Fee::priced("Late Payment", dec!(300))]);
        assert_eq!(bill.total_amount, before + dec!(300));
        assert_eq!(bill.water_amount, dec!(200));
        assert_eq!(bill.electricity_amount, dec!(300));
        assert_eq!(
            bill.total_amount,
            compute_amounts(&bill.charge_inputs()).unwrap().total_amount
        );
    }

    #[test]
    fn bill_due_on_billing_day_is_not_yet_overdue() {
        let today = NaiveDate::from_ymd_opt(2026, 4, 5).unwrap();
        assert!(!is_escalation_candidate(&overdue_bill(today), today));
        assert!(is_escalation_candidate(
            &overdue_bill(today - Duration::days(1)),
            today
        ));
    }

    #[test]
    fn paid_bill_is_never_escalated() {
        let today = NaiveDate::from_ymd_opt(2026, 4, 20).unwrap();
        let mut bill = overdue_bill(today - Duration::days(10));
        bill.payment_status = PaymentStatus::Paid;
        assert!(!is_escalation_candidate(&bill, today));
    }

    #[test]
    fn cutoff_is_stable_within_a_billing_day() {
        let tz = chrono_tz::Asia::Bangkok;
        // 2026-04-06 00:00 and 23:59 local (UTC+7).
        let start = Utc.with_ymd_and_hms(2026, 4, 5, 17, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 4, 6, 16, 59, 59).unwrap();
        assert_eq!(billing_today(start, tz), billing_today(end, tz));

        let bill = overdue_bill(NaiveDate::from_ymd_opt(2026, 4, 5).unwrap());
        assert!(is_escalation_candidate(&bill, billing_today(start, tz)));
        assert!(is_escalation_candidate(&bill, billing_today(end, tz)));

        let before_midnight = Utc.with_ymd_and_hms(2026, 4, 5, 16, 59, 59).unwrap();
        assert!(!is_escalation_candidate(&bill, billing_today(before_midnight, tz)));
    }
}
