use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::{multipart, Client};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::AppError,
    models::{Bill, Landlord, PaymentStatus},
    repository::{bills::get_bill, property::get_landlord},
    services::{
        bills::{attach_slip_url, settle_bill},
        charges::{deserialize_amount, Fee},
        notifications::{notify_bill_tenant, payment_confirmation_message},
        storage::{store_slip, SlipUpload},
    },
    state::AppState,
    tenancy::authorize_paying_tenant,
};

/// Sender bank code whose slips carry no comparable receiver details.
pub const RESERVED_SENDER_BANK_CODE: &str = "025";

/// Largest slip-vs-bill difference still treated as the same amount.
pub const AMOUNT_TOLERANCE: Decimal = dec!(0.01);

const NAME_TITLES: [&str; 4] = ["MRS", "MR", "MS", "DR"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStage {
    Received,
    Recognized,
    Matched,
    Rejected,
}

// Recognition service payload

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecognitionResponse {
    pub success: Option<bool>,
    pub status: Option<Value>,
    pub message: Option<String>,
    pub data: Option<SlipData>,
}

impl RecognitionResponse {
    /// `success: true`, or a `status` of `true`, `200`, `"success"` or `"ok"`.
    pub fn is_success(&self) -> bool {
        if let Some(success) = self.success {
            return success;
        }
        match &self.status {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(code)) => code.as_u64() == Some(200),
            Some(Value::String(text)) => {
                let text = text.trim();
                text.eq_ignore_ascii_case("success")
                    || text.eq_ignore_ascii_case("ok")
                    || text == "200"
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SlipData {
    #[serde(deserialize_with = "deserialize_amount")]
    pub amount: Decimal,
    #[serde(alias = "transDate", alias = "transTimestamp")]
    pub date: Option<String>,
    #[serde(alias = "transRef")]
    pub reference: Option<String>,
    pub sender: SlipParty,
    pub receiver: SlipParty,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SlipParty {
    pub bank: SlipBank,
    pub account: SlipAccount,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SlipBank {
    #[serde(deserialize_with = "deserialize_code")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SlipAccount {
    pub name: Option<SlipName>,
    pub bank: Option<SlipAccountNumber>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SlipAccountNumber {
    pub account: Option<String>,
}

/// An account holder name, either plain or localized.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SlipName {
    Plain(String),
    Localized {
        #[serde(default)]
        th: Option<String>,
        #[serde(default)]
        en: Option<String>,
    },
}

impl SlipName {
    /// The name in Latin script, if the slip carries one.
    pub fn english(&self) -> Option<&str> {
        match self {
            SlipName::Plain(name) => {
                non_blank(Some(name)).filter(|text| text.chars().any(|ch| ch.is_ascii_alphabetic()))
            }
            SlipName::Localized { en, .. } => non_blank(en.as_ref()),
        }
    }

    /// English first, then Thai.
    pub fn preferred(&self) -> Option<&str> {
        match self {
            SlipName::Plain(name) => non_blank(Some(name)),
            SlipName::Localized { th, en } => {
                non_blank(en.as_ref()).or_else(|| non_blank(th.as_ref()))
            }
        }
    }
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|text| text.trim()).filter(|text| !text.is_empty())
}

fn deserialize_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

impl SlipData {
    pub fn sender_bank(&self) -> Option<&str> {
        self.sender.bank.id.as_deref()
    }

    pub fn receiver_bank(&self) -> Option<&str> {
        self.receiver.bank.id.as_deref()
    }

    pub fn receiver_account(&self) -> Option<&str> {
        self.receiver
            .account
            .bank
            .as_ref()
            .and_then(|bank| bank.account.as_deref())
    }

    /// Receiver or sender English name; a Thai-only name is the last resort,
    /// since landlord account names are kept in English.
    pub fn holder_name(&self) -> Option<&str> {
        let receiver = self.receiver.account.name.as_ref();
        let sender = self.sender.account.name.as_ref();
        receiver
            .and_then(SlipName::english)
            .or_else(|| sender.and_then(SlipName::english))
            .or_else(|| receiver.and_then(SlipName::preferred))
            .or_else(|| sender.and_then(SlipName::preferred))
    }

    pub fn transferred_at(&self, timezone: Tz) -> Option<DateTime<Utc>> {
        self.date
            .as_deref()
            .and_then(|raw| parse_slip_date(raw, timezone))
    }
}

/// Slip timestamps are RFC 3339, or naive local times in the billing timezone.
pub fn parse_slip_date(raw: &str, timezone: Tz) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

// Matching

fn normalize_bank_code(code: &str) -> String {
    let code = code.trim();
    if !code.is_empty() && code.len() < 3 && code.chars().all(|ch| ch.is_ascii_digit()) {
        format!("{code:0>3}")
    } else {
        code.to_string()
    }
}

fn is_reserved_sender(sender_bank: Option<&str>) -> bool {
    sender_bank.map(normalize_bank_code).as_deref() == Some(RESERVED_SENDER_BANK_CODE)
}

pub fn bank_matches(
    sender_bank: Option<&str>,
    receiver_bank: Option<&str>,
    landlord_bank: &str,
) -> bool {
    if is_reserved_sender(sender_bank) {
        return true;
    }
    let expected = normalize_bank_code(landlord_bank);
    match receiver_bank {
        Some(received) => !expected.is_empty() && normalize_bank_code(received) == expected,
        None => false,
    }
}

/// Slips mask most account digits (`xxx-x-x4567-x`); every visible digit run
/// has to appear in the landlord's account number.
pub fn account_matches(
    sender_bank: Option<&str>,
    slip_account: Option<&str>,
    landlord_account: &str,
) -> bool {
    if is_reserved_sender(sender_bank) {
        return true;
    }
    let expected = landlord_account
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>();
    if expected.is_empty() {
        return false;
    }
    let runs = slip_account
        .unwrap_or_default()
        .split(|ch: char| !ch.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .collect::<Vec<_>>();
    !runs.is_empty() && runs.iter().all(|run| expected.contains(run))
}

pub fn amount_matches(slip_amount: Decimal, bill_total: Decimal) -> bool {
    (slip_amount - bill_total).abs() < AMOUNT_TOLERANCE
}

/// Upper-cased, title-stripped, punctuation-free tokens longer than one character.
pub fn name_tokens(name: &str) -> Vec<String> {
    let upper = name.trim().to_uppercase();
    let mut rest = upper.as_str();
    for title in NAME_TITLES {
        if let Some(after) = rest.strip_prefix(title) {
            if after.starts_with('.') || after.starts_with(char::is_whitespace) {
                rest = after.trim_start_matches('.').trim_start();
                break;
            }
        }
    }

    rest.chars()
        .filter(|ch| ch.is_alphanumeric() || ch.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .filter(|token| token.chars().count() > 1)
        .map(str::to_string)
        .collect()
}

pub fn names_match(slip_name: Option<&str>, account_name: &str) -> bool {
    let slip = name_tokens(slip_name.unwrap_or_default());
    let expected = name_tokens(account_name);
    slip.iter().any(|token| {
        expected
            .iter()
            .any(|other| token.contains(other.as_str()) || other.contains(token.as_str()))
    })
}

/// What the landlord's payout details and the bill say the slip should show.
#[derive(Debug, Clone)]
pub struct PaymentExpectation {
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
    pub total_amount: Decimal,
}

impl PaymentExpectation {
    pub fn new(landlord: &Landlord, bill: &Bill) -> Self {
        let field = |value: &Option<String>| value.as_deref().unwrap_or_default().trim().to_string();
        Self {
            bank_code: field(&landlord.bank_code),
            account_number: field(&landlord.account_number),
            account_name: field(&landlord.account_name),
            total_amount: bill.total_amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub passed: bool,
    pub expected: String,
    pub received: String,
}

impl CheckResult {
    fn new(passed: bool, expected: impl Into<String>, received: Option<&str>) -> Self {
        Self {
            passed,
            expected: expected.into(),
            received: received.unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SlipChecks {
    pub bank: CheckResult,
    pub account: CheckResult,
    pub amount: CheckResult,
    pub name: CheckResult,
}

impl SlipChecks {
    pub fn all_passed(&self) -> bool {
        self.bank.passed && self.account.passed && self.amount.passed && self.name.passed
    }

    pub fn failed(&self) -> Vec<&'static str> {
        [
            ("bank", &self.bank),
            ("account", &self.account),
            ("amount", &self.amount),
            ("name", &self.name),
        ]
        .into_iter()
        .filter(|(_, check)| !check.passed)
        .map(|(label, _)| label)
        .collect()
    }
}

pub fn evaluate_slip(expected: &PaymentExpectation, slip: &SlipData) -> SlipChecks {
    let sender_bank = slip.sender_bank();
    let slip_amount = slip.amount.to_string();

    SlipChecks {
        bank: CheckResult::new(
            bank_matches(sender_bank, slip.receiver_bank(), &expected.bank_code),
            &expected.bank_code,
            slip.receiver_bank().or(sender_bank),
        ),
        account: CheckResult::new(
            account_matches(sender_bank, slip.receiver_account(), &expected.account_number),
            &expected.account_number,
            slip.receiver_account(),
        ),
        amount: CheckResult::new(
            amount_matches(slip.amount, expected.total_amount),
            expected.total_amount.to_string(),
            Some(slip_amount.as_str()),
        ),
        name: CheckResult::new(
            names_match(slip.holder_name(), &expected.account_name),
            &expected.account_name,
            slip.holder_name(),
        ),
    }
}

// Recognition client

/// Submit the slip image to the recognition service.
///
/// Transport errors, timeouts, non-success responses and unreadable bodies all
/// fail the verification.
pub async fn recognize_slip(
    http_client: &Client,
    config: &AppConfig,
    upload: &SlipUpload,
) -> Result<SlipData, AppError> {
    let (Some(api_url), Some(api_key)) = (
        config.slip_api_url.as_deref(),
        config.slip_api_key.as_deref(),
    ) else {
        return Err(AppError::Dependency(
            "Slip verification is not configured. Set SLIP_API_URL and SLIP_API_KEY.".to_string(),
        ));
    };

    let part = multipart::Part::bytes(upload.bytes.clone())
        .file_name(upload.file_name.clone())
        .mime_str(&upload.content_type)
        .map_err(|e| AppError::BadRequest(format!("Unsupported slip content type: {e}")))?;
    let form = multipart::Form::new().part("files", part);

    let response = http_client
        .post(api_url)
        .header("x-authorization", api_key)
        .timeout(Duration::from_secs(config.slip_api_timeout_seconds.max(1)))
        .multipart(form)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                AppError::VerificationFailed("Slip recognition timed out.".to_string())
            } else {
                AppError::VerificationFailed(format!("Slip recognition request failed: {e}"))
            }
        })?;

    let status = response.status();
    let body: RecognitionResponse = response.json().await.map_err(|e| {
        AppError::VerificationFailed(format!(
            "Slip recognition returned an unreadable response ({status}): {e}"
        ))
    })?;

    if !status.is_success() || !body.is_success() {
        let message = body
            .message
            .unwrap_or_else(|| "Unknown recognition error".to_string());
        return Err(AppError::VerificationFailed(format!(
            "Slip could not be verified ({status}): {message}"
        )));
    }

    body.data.ok_or_else(|| {
        AppError::VerificationFailed("Slip recognition returned no slip data.".to_string())
    })
}

// Orchestration

#[derive(Debug, Clone)]
pub struct VerifySlipRequest {
    pub bill_id: Uuid,
    pub tenant_id: Uuid,
    pub landlord_id: Uuid,
    pub upload: SlipUpload,
}

/// The bill's financial state after a successful payment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSummary {
    pub bill_id: Uuid,
    pub month: String,
    pub rent_amount: Decimal,
    pub water_usage: Decimal,
    pub water_rate: Decimal,
    pub water_amount: Decimal,
    pub electricity_usage: Decimal,
    pub electricity_rate: Decimal,
    pub electricity_amount: Decimal,
    pub additional_fees: Vec<Fee>,
    pub total_amount: Decimal,
    pub payment_status: PaymentStatus,
    pub payment_date: Option<DateTime<Utc>>,
    pub slip_url: Option<String>,
}

impl From<&Bill> for PaymentSummary {
    fn from(bill: &Bill) -> Self {
        Self {
            bill_id: bill.id,
            month: bill.month.clone(),
            rent_amount: bill.rent_amount,
            water_usage: bill.water_usage,
            water_rate: bill.water_rate,
            water_amount: bill.water_amount,
            electricity_usage: bill.electricity_usage,
            electricity_rate: bill.electricity_rate,
            electricity_amount: bill.electricity_amount,
            additional_fees: bill.additional_fees.clone(),
            total_amount: bill.total_amount,
            payment_status: bill.payment_status,
            payment_date: bill.payment_date,
            slip_url: bill.slip_data.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub verified: bool,
    pub stage: VerificationStage,
    pub checks: SlipChecks,
    pub failed_checks: Vec<&'static str>,
    pub summary: Option<PaymentSummary>,
}

impl VerificationReport {
    pub fn rejected(checks: SlipChecks) -> Self {
        Self {
            verified: false,
            stage: VerificationStage::Rejected,
            failed_checks: checks.failed(),
            checks,
            summary: None,
        }
    }

    pub fn matched(checks: SlipChecks, bill: &Bill) -> Self {
        Self {
            verified: true,
            stage: VerificationStage::Matched,
            failed_checks: Vec::new(),
            checks,
            summary: Some(PaymentSummary::from(bill)),
        }
    }
}

/// Received -> Recognized -> Matched | Rejected.
///
/// A rejected slip leaves the bill untouched. A matched slip marks the bill paid
/// at the version it was checked against, is then stored and linked (best
/// effort), and the tenant gets a confirmation.
pub async fn verify_slip(
    state: &AppState,
    request: VerifySlipRequest,
    now: DateTime<Utc>,
) -> Result<VerificationReport, AppError> {
    let pool = state.db_pool()?;
    let bill = get_bill(pool, request.bill_id).await?;
    authorize_paying_tenant(state, &bill, request.tenant_id, request.landlord_id).await?;
    if bill.is_paid() {
        return Err(AppError::Conflict("Bill is already paid.".to_string()));
    }
    let landlord = get_landlord(pool, request.landlord_id).await?;
    info!(bill_id = %bill.id, stage = ?VerificationStage::Received, "Slip received");

    let slip = recognize_slip(&state.http_client, &state.config, &request.upload).await?;
    info!(
        bill_id = %bill.id,
        stage = ?VerificationStage::Recognized,
        amount = %slip.amount,
        reference = slip.reference.as_deref().unwrap_or_default(),
        "Slip recognized"
    );

    let checks = evaluate_slip(&PaymentExpectation::new(&landlord, &bill), &slip);
    if !checks.all_passed() {
        let report = VerificationReport::rejected(checks);
        info!(
            bill_id = %bill.id,
            stage = ?VerificationStage::Rejected,
            failed = ?report.failed_checks,
            "Slip rejected"
        );
        return Ok(report);
    }

    let payment_date = slip
        .transferred_at(state.config.billing_timezone)
        .unwrap_or(now);
    let mut paid = settle_bill(pool, bill, payment_date, None).await?;
    info!(bill_id = %paid.id, stage = ?VerificationStage::Matched, "Slip matched");

    // Stored only once the payment is recorded, so a lost race leaves nothing behind.
    match store_slip(state, paid.id, &request.upload).await {
        Ok(url) => match attach_slip_url(pool, paid.clone(), url.clone()).await {
            Ok(with_slip) => paid = with_slip,
            Err(error) => {
                warn!(bill_id = %paid.id, slip_url = %url, %error, "Stored slip could not be linked to bill");
            }
        },
        Err(error) => {
            warn!(bill_id = %paid.id, %error, "Slip storage failed; payment recorded without it");
        }
    }

    notify_bill_tenant(
        pool,
        &state.http_client,
        &state.config,
        request.landlord_id,
        &paid,
        &payment_confirmation_message(&paid),
    )
    .await;

    Ok(VerificationReport::matched(checks, &paid))
}
