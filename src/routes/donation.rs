use crate::SharedAppState;
use crate::donation::{Donation, DonationError, DonationForm};
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum_extra::extract::WithRejection;
use serde_json::json;
use thiserror::Error;
use tracing::info;

/// Responds with a bare JSON boolean: true only when the charge and the CRM
/// gift both succeeded.
pub async fn handler(
    State(state): State<SharedAppState>,
    WithRejection(Json(form), _): WithRejection<Json<DonationForm>, ApiError>,
) -> Result<Json<bool>, ApiError> {
    info!("Donation form received");
    let donation = Donation::from_form(form)?;
    let report = state.orchestrator.process(donation).await?;
    Ok(Json(report.succeeded()))
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    JsonExtractorRejection(#[from] JsonRejection),
    #[error(transparent)]
    InvalidDonation(#[from] DonationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (code, origin) = match &self {
            ApiError::JsonExtractorRejection(x) => (
                match x {
                    JsonRejection::JsonDataError(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    JsonRejection::JsonSyntaxError(_) => StatusCode::BAD_REQUEST,
                    JsonRejection::MissingJsonContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                },
                "with_rejection",
            ),
            ApiError::InvalidDonation(_) => (StatusCode::BAD_REQUEST, "validation"),
        };
        let payload = json!({
            "message": self.to_string(),
            "origin": origin
        });
        (code, Json(payload)).into_response()
    }
}
