use std::time::Duration;

use chrono::{DateTime, Datelike, Months, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use tokio::time::sleep;

use crate::{
    repository::property::list_landlord_ids_with_buildings,
    services::{
        bills::{billing_month, create_monthly_bills_for_landlord},
        overdue::apply_late_fees,
    },
    state::AppState,
};

/// Spawn the background scheduler that runs the daily billing jobs.
///
/// Each job runs in its own `tokio::spawn` so a failure in one job
/// never crashes the scheduler loop or other jobs.
pub async fn run_background_scheduler(state: AppState) {
    tracing::info!("Background scheduler started");

    if state.db_pool.is_none() {
        tracing::warn!("Scheduler: no database pool configured, exiting");
        return;
    }

    let timezone = state.config.billing_timezone;
    let mut last_daily_run: Option<NaiveDate> = None;

    loop {
        sleep(Duration::from_secs(15)).await;

        let now_utc = Utc::now();
        let Some(today) = daily_run_date(
            now_utc,
            timezone,
            state.config.scheduler_daily_hour,
            last_daily_run,
        ) else {
            continue;
        };

        last_daily_run = Some(today);
        tracing::info!("Scheduler: running daily billing jobs for {today}");

        // Monthly bill generation
        if today.day() == state.config.bill_generation_day {
            let st = state.clone();
            tokio::spawn(async move {
                run_monthly_bill_generation(&st, today).await;
            });
        }

        // Overdue sweep
        {
            let st = state.clone();
            tokio::spawn(async move {
                run_overdue_sweep(&st, today, now_utc).await;
            });
        }
    }
}

/// The local billing date if the daily jobs are due now, i.e. it is at or
/// after `daily_hour` locally and they have not yet run on that date.
pub fn daily_run_date(
    now: DateTime<Utc>,
    timezone: Tz,
    daily_hour: u32,
    last_run: Option<NaiveDate>,
) -> Option<NaiveDate> {
    let local = now.with_timezone(&timezone);
    let today = local.date_naive();
    if last_run == Some(today) || local.hour() < daily_hour {
        return None;
    }
    Some(today)
}

/// Months the overdue sweep covers: the current one and the one before it,
/// since bills are usually due early in the month after they are issued.
pub fn sweep_months(today: NaiveDate) -> Vec<String> {
    let mut months = vec![billing_month(today)];
    if let Some(previous) = today.checked_sub_months(Months::new(1)) {
        months.push(billing_month(previous));
    }
    months
}

async fn run_monthly_bill_generation(state: &AppState, billing_date: NaiveDate) {
    let Ok(pool) = state.db_pool() else {
        return;
    };
    let landlord_ids = match list_landlord_ids_with_buildings(pool).await {
        Ok(ids) => ids,
        Err(error) => {
            tracing::warn!(%error, "Scheduler: could not list landlords for bill generation");
            return;
        }
    };

    let (mut created, mut skipped, mut failed) = (0usize, 0u32, 0u32);
    for landlord_id in landlord_ids {
        match create_monthly_bills_for_landlord(
            pool,
            landlord_id,
            billing_date,
            state.config.default_due_day,
        )
        .await
        {
            Ok(runs) => {
                for run in runs {
                    created += run.created.len();
                    skipped += run.skipped;
                    failed += run.failed;
                }
            }
            Err(error) => {
                failed += 1;
                tracing::warn!(%landlord_id, %error, "Scheduler: bill generation failed");
            }
        }
    }

    tracing::info!(
        month = %billing_month(billing_date),
        created,
        skipped,
        failed,
        "Scheduler: monthly bill generation completed"
    );
}

async fn run_overdue_sweep(state: &AppState, today: NaiveDate, now: DateTime<Utc>) {
    let Ok(pool) = state.db_pool() else {
        return;
    };
    let landlord_ids = match list_landlord_ids_with_buildings(pool).await {
        Ok(ids) => ids,
        Err(error) => {
            tracing::warn!(%error, "Scheduler: could not list landlords for overdue sweep");
            return;
        }
    };

    let mut escalated = 0u32;
    for landlord_id in &landlord_ids {
        for month in sweep_months(today) {
            match apply_late_fees(state, *landlord_id, &month, now).await {
                Ok(summary) => escalated += summary.escalated,
                Err(error) => {
                    tracing::warn!(%landlord_id, %month, %error, "Scheduler: overdue sweep failed");
                }
            }
        }
    }

    if escalated > 0 {
        tracing::info!(escalated, "Scheduler: overdue sweep completed");
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{daily_run_date, sweep_months};

    #[test]
    fn daily_jobs_run_once_after_local_hour() {
        let tz = chrono_tz::Asia::Bangkok;
        // 00:30 local on 2026-05-01
        let early = Utc.with_ymd_and_hms(2026, 4, 30, 17, 30, 0).unwrap();
        assert_eq!(daily_run_date(early, tz, 1, None), None);

        // 01:05 local
        let due = Utc.with_ymd_and_hms(2026, 4, 30, 18, 5, 0).unwrap();
        let may_first = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        assert_eq!(daily_run_date(due, tz, 1, None), Some(may_first));
        assert_eq!(daily_run_date(due, tz, 1, Some(may_first)), None);

        let next_day = Utc.with_ymd_and_hms(2026, 5, 1, 20, 0, 0).unwrap();
        assert_eq!(
            daily_run_date(next_day, tz, 1, Some(may_first)),
            NaiveDate::from_ymd_opt(2026, 5, 2)
        );
    }

    #[test]
    fn sweep_covers_current_and_previous_month() {
        assert_eq!(
            sweep_months(NaiveDate::from_ymd_opt(2026, 1, 10).unwrap()),
            vec!["2026-01".to_string(), "2025-12".to_string()]
        );
    }
}
