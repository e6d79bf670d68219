use axum::{extract::State, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::handlers::parent::BookingResponse;
use crate::AppState;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Deserialize)]
pub struct PaymentNotification {
    pub booking_id: Uuid,
    pub outcome: PaymentOutcome,
    pub external_payment_ref: Option<String>,
}

/// Payment provider callback. Redelivery of a success is harmless.
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<PaymentNotification>,
) -> AppResult<Json<BookingResponse>> {
    tracing::info!(
        booking_id = %payload.booking_id,
        outcome = ?payload.outcome,
        "Payment notification received"
    );

    let booking = match payload.outcome {
        PaymentOutcome::Succeeded => {
            let payment_ref = payload.external_payment_ref.ok_or_else(|| {
                AppError::BadRequest("external_payment_ref is required on success".to_string())
            })?;
            state
                .engine
                .activate(payload.booking_id, &payment_ref)
                .await?
                .booking
        }
        PaymentOutcome::Failed => state.engine.payment_failed(payload.booking_id).await?,
    };

    Ok(Json(booking.into()))
}
