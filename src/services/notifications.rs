use std::time::Duration;

use reqwest::Client;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    models::{Bill, Landlord},
    repository::property::{find_tenant, get_landlord},
};

/// Push a plain text message to one LINE user through the landlord's own channel.
pub async fn push_line_text(
    http_client: &Client,
    config: &AppConfig,
    channel_access_token: &str,
    to: &str,
    text: &str,
) -> Result<(), String> {
    let url = format!(
        "{}/v2/bot/message/push",
        config.line_api_base_url.trim_end_matches('/')
    );
    let payload = json!({
        "to": to,
        "messages": [{ "type": "text", "text": text }]
    });

    let response = http_client
        .post(&url)
        .bearer_auth(channel_access_token)
        .timeout(Duration::from_secs(config.notification_timeout_seconds.max(1)))
        .json(&payload)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                "LINE push timed out.".to_string()
            } else {
                format!("LINE push request failed: {e}")
            }
        })?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let resp_body: Value = response
        .json()
        .await
        .unwrap_or(json!({"message": "failed to parse response"}));
    let error_msg = resp_body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Unknown LINE API error");
    Err(format!("LINE API error ({status}): {error_msg}"))
}

/// Notify the tenant a bill was issued to. Every failure is logged and swallowed.
///
/// Returns whether a message was actually delivered.
pub async fn notify_bill_tenant(
    pool: &PgPool,
    http_client: &Client,
    config: &AppConfig,
    landlord_id: Uuid,
    bill: &Bill,
    text: &str,
) -> bool {
    let Some(tenant_id) = bill.tenant_id else {
        return false;
    };

    let tenant = match find_tenant(pool, tenant_id).await {
        Ok(Some(tenant)) => tenant,
        Ok(None) => return false,
        Err(error) => {
            warn!(bill_id = %bill.id, %tenant_id, %error, "Could not load tenant for notification");
            return false;
        }
    };
    let Some(line_user_id) = tenant.line_user_id.as_deref().filter(|id| !id.is_empty()) else {
        return false;
    };

    let landlord = match get_landlord(pool, landlord_id).await {
        Ok(landlord) => landlord,
        Err(error) => {
            warn!(bill_id = %bill.id, %landlord_id, %error, "Could not load landlord for notification");
            return false;
        }
    };
    let Some(token) = channel_token(&landlord) else {
        return false;
    };

    match push_line_text(http_client, config, token, line_user_id, text).await {
        Ok(()) => {
            info!(bill_id = %bill.id, %tenant_id, "Tenant notified");
            true
        }
        Err(error) => {
            warn!(bill_id = %bill.id, %tenant_id, %error, "Tenant notification failed");
            false
        }
    }
}

fn channel_token(landlord: &Landlord) -> Option<&str> {
    landlord
        .line_channel_access_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn late_fee_message(bill: &Bill, late_fee: Decimal) -> String {
    format!(
        "Your bill for {month} is overdue (due {due}).\n\
         A late payment fee of {fee} has been added.\n\
         New total: {total}",
        month = bill.month,
        due = bill.due_date.format("%d/%m/%Y"),
        fee = format_amount(late_fee),
        total = format_amount(bill.total_amount),
    )
}

pub fn payment_confirmation_message(bill: &Bill) -> String {
    format!(
        "Payment received for {month}.\nAmount: {total}\nThank you!",
        month = bill.month,
        total = format_amount(bill.total_amount),
    )
}

/// `฿1,234.50` style display.
pub fn format_amount(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let text = format!("{:.2}", rounded.abs());
    let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::new();
    for (i, ch) in whole.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let whole = grouped.chars().rev().collect::<String>();
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{sign}฿{whole}.{fraction}")
}
