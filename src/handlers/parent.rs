use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{CreateBooking, Quote};
use crate::entities::booking::{self, BookingStatus, PlanType};
use crate::entities::route;
use crate::error::{AppError, AppResult};
use crate::utils::jwt::Claims;
use crate::AppState;

// ============ Route Browsing ============

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    pub id: Uuid,
    pub name: String,
    pub vehicle_type: Option<String>,
    pub capacity: i32,
    pub available_seats: i64,
    pub requires_pickup: bool,
    pub active: bool,
}

impl RouteResponse {
    pub fn new(route: route::Model, available_seats: i64) -> Self {
        Self {
            id: route.id,
            name: route.name,
            vehicle_type: route.vehicle_type,
            capacity: route.capacity,
            available_seats,
            requires_pickup: route.requires_pickup,
            active: route.active,
        }
    }
}

/// List bookable routes with free seats
pub async fn list_routes(State(state): State<AppState>) -> AppResult<Json<Vec<RouteResponse>>> {
    let routes = state.engine.routes_with_availability().await?;

    Ok(Json(
        routes
            .into_iter()
            .map(|(route, available)| RouteResponse::new(route, available))
            .collect(),
    ))
}

/// Get route details
pub async fn get_route(
    State(state): State<AppState>,
    Path(route_id): Path<Uuid>,
) -> AppResult<Json<RouteResponse>> {
    let route = state.engine.route(route_id).await?;
    if !route.active {
        return Err(AppError::NotFound("Route not found".to_string()));
    }

    let available = state.engine.available_seats(route.id).await?;
    Ok(Json(RouteResponse::new(route, available)))
}

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub plan_type: PlanType,
}

/// Price a plan on a route without booking it
pub async fn quote_route(
    State(state): State<AppState>,
    Path(route_id): Path<Uuid>,
    Query(query): Query<QuoteQuery>,
) -> AppResult<Json<Quote>> {
    let quote = state.engine.quote(query.plan_type, route_id).await?;
    Ok(Json(quote))
}

// ============ Booking Management ============

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub student_id: Uuid,
    pub route_id: Uuid,
    pub plan_type: PlanType,
    pub start_date: NaiveDate,
    pub pickup_point_id: Option<Uuid>,
    pub dropoff_point_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: Uuid,
    pub student_id: Uuid,
    pub route_id: Uuid,
    pub plan_type: PlanType,
    pub status: BookingStatus,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub amount: Decimal,
    pub currency: String,
    pub pickup_point_id: Option<Uuid>,
    pub dropoff_point_id: Option<Uuid>,
    pub external_payment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<booking::Model> for BookingResponse {
    fn from(b: booking::Model) -> Self {
        Self {
            id: b.id,
            student_id: b.student_id,
            route_id: b.route_id,
            plan_type: b.plan_type,
            status: b.status,
            start_date: b.start_date,
            end_date: b.end_date,
            amount: b.price_amount,
            currency: b.currency,
            pickup_point_id: b.pickup_point_id,
            dropoff_point_id: b.dropoff_point_id,
            external_payment_ref: b.external_payment_ref,
            created_at: b.created_at.with_timezone(&Utc),
        }
    }
}

/// Book a seat for a student. The booking starts out pending payment.
pub async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateBookingRequest>,
) -> AppResult<(StatusCode, Json<BookingResponse>)> {
    let booking = state
        .engine
        .create(CreateBooking {
            student_id: payload.student_id,
            route_id: payload.route_id,
            plan_type: payload.plan_type,
            start_date: payload.start_date,
            pickup_point_id: payload.pickup_point_id,
            dropoff_point_id: payload.dropoff_point_id,
            booked_by: claims.sub,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(booking.into())))
}

/// List the caller's bookings
pub async fn my_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<BookingResponse>>> {
    let bookings = state.engine.bookings_by(claims.sub).await?;
    Ok(Json(bookings.into_iter().map(Into::into).collect()))
}

/// Cancel one of the caller's bookings
pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<Uuid>,
) -> AppResult<Json<BookingResponse>> {
    let booking = state.engine.booking(booking_id).await?;

    if booking.booked_by != claims.sub {
        return Err(AppError::Forbidden(
            "You can only cancel your own bookings".to_string(),
        ));
    }

    let outcome = state.engine.cancel(booking_id).await?;
    Ok(Json(outcome.booking.into()))
}
