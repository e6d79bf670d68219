use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::error::{AppError, AppResult};
use crate::utils::jwt::{verify_token, Claims, UserRole};
use crate::AppState;

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Extract and validate JWT token from Authorization header
pub async fn auth_middleware(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> AppResult<Response> {
    let TypedHeader(auth) =
        auth.ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
    let claims = verify_token(auth.token(), &state.config.jwt_secret)?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

fn require_role(request: &Request, role: UserRole) -> AppResult<()> {
    let claims = request
        .extensions()
        .get::<Claims>()
        .ok_or_else(|| AppError::Unauthorized("No authentication found".to_string()))?;

    if claims.role != role {
        let label = match role {
            UserRole::Admin => "Admin",
            UserRole::Parent => "Parent",
        };
        return Err(AppError::Forbidden(format!("{label} access required")));
    }
    Ok(())
}

/// Require admin role
pub async fn require_admin(request: Request, next: Next) -> AppResult<Response> {
    require_role(&request, UserRole::Admin)?;
    Ok(next.run(request).await)
}

/// Require parent role
pub async fn require_parent(request: Request, next: Next) -> AppResult<Response> {
    require_role(&request, UserRole::Parent)?;
    Ok(next.run(request).await)
}

/// Shared-secret check for calls from the payment provider
pub async fn require_webhook_secret(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> AppResult<Response> {
    let presented = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing webhook secret".to_string()))?;

    if !constant_time_eq::constant_time_eq(
        presented.as_bytes(),
        state.config.payment_webhook_secret.as_bytes(),
    ) {
        tracing::warn!("Payment webhook called with a wrong secret");
        return Err(AppError::Unauthorized("Invalid webhook secret".to_string()));
    }

    Ok(next.run(request).await)
}
