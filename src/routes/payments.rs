use axum::{
    extract::{Multipart, State},
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    services::{
        slip_verification::{verify_slip, VerificationReport, VerifySlipRequest},
        storage::SlipUpload,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/payment/verify-slip",
        axum::routing::post(verify_payment_slip),
    )
}

/// Tenant-facing: the tenant is identified by the form's `tenantId`, which is
/// checked against the bill's room and landlord before anything else happens.
async fn verify_payment_slip(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<VerificationReport>> {
    let form = read_slip_form(multipart, state.config.slip_max_upload_bytes).await?;
    let request = form.into_request()?;
    let report = verify_slip(&state, request, Utc::now()).await?;
    Ok(Json(report))
}

#[derive(Debug, Default)]
struct SlipForm {
    bill_id: Option<String>,
    tenant_id: Option<String>,
    landlord_id: Option<String>,
    file: Option<SlipUpload>,
}

impl SlipForm {
    fn into_request(self) -> Result<VerifySlipRequest, AppError> {
        let upload = self
            .file
            .filter(|file| !file.bytes.is_empty())
            .ok_or_else(|| {
                AppError::UnprocessableEntity("A non-empty slip image is required.".to_string())
            })?;

        Ok(VerifySlipRequest {
            bill_id: required_uuid("billId", self.bill_id)?,
            tenant_id: required_uuid("tenantId", self.tenant_id)?,
            landlord_id: required_uuid("landlordId", self.landlord_id)?,
            upload,
        })
    }
}

fn required_uuid(field: &str, raw: Option<String>) -> Result<Uuid, AppError> {
    let raw = raw
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::UnprocessableEntity(format!("{field} is required.")))?;
    Uuid::parse_str(&raw)
        .map_err(|_| AppError::UnprocessableEntity(format!("{field} must be a valid UUID.")))
}

async fn read_slip_form(mut multipart: Multipart, max_bytes: usize) -> Result<SlipForm, AppError> {
    let invalid = |e: axum::extract::multipart::MultipartError| {
        AppError::BadRequest(format!("Invalid multipart body: {e}"))
    };

    let mut form = SlipForm::default();
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "slip" | "files" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| "slip.jpg".to_string());
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| "image/jpeg".to_string());
                let bytes = field.bytes().await.map_err(invalid)?;
                if bytes.len() > max_bytes {
                    return Err(AppError::UnprocessableEntity(format!(
                        "Slip image exceeds the {max_bytes} byte limit."
                    )));
                }
                form.file = Some(SlipUpload {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "billId" | "bill_id" => form.bill_id = Some(field.text().await.map_err(invalid)?),
            "tenantId" | "tenant_id" => form.tenant_id = Some(field.text().await.map_err(invalid)?),
            "landlordId" | "landlord_id" => {
                form.landlord_id = Some(field.text().await.map_err(invalid)?)
            }
            _ => {}
        }
    }
    Ok(form)
}
