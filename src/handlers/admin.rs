use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::SweepReport;
use crate::entities::booking::{self, BookingStatus, PlanType};
use crate::entities::{closure_date, pricing_rule, route, vehicle};
use crate::error::{AppError, AppResult};
use crate::handlers::parent::{BookingResponse, RouteResponse};
use crate::AppState;

// ============ Vehicle Management ============

#[derive(Debug, Deserialize)]
pub struct CreateVehicleRequest {
    pub plate: String,
    pub vehicle_type: String,
    pub capacity: i32,
}

/// List all vehicles (admin)
pub async fn list_vehicles(State(state): State<AppState>) -> AppResult<Json<Vec<vehicle::Model>>> {
    let vehicles = vehicle::Entity::find()
        .order_by_asc(vehicle::Column::Plate)
        .all(&state.db)
        .await?;
    Ok(Json(vehicles))
}

/// Register a vehicle (admin)
pub async fn create_vehicle(
    State(state): State<AppState>,
    Json(payload): Json<CreateVehicleRequest>,
) -> AppResult<(StatusCode, Json<vehicle::Model>)> {
    let plate = payload.plate.trim().to_uppercase();
    if plate.is_empty() {
        return Err(AppError::BadRequest("Plate must not be empty".to_string()));
    }
    if payload.capacity <= 0 {
        return Err(AppError::BadRequest("Capacity must be positive".to_string()));
    }

    let existing = vehicle::Entity::find()
        .filter(vehicle::Column::Plate.eq(plate.as_str()))
        .one(&state.db)
        .await?;
    if existing.is_some() {
        return Err(AppError::Conflict(format!("Vehicle {plate} already exists")));
    }

    let vehicle = vehicle::ActiveModel {
        id: Set(Uuid::new_v4()),
        plate: Set(plate),
        vehicle_type: Set(payload.vehicle_type.trim().to_string()),
        capacity: Set(payload.capacity),
        created_at: Set(state.engine.now().into()),
    }
    .insert(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(vehicle)))
}

// ============ Route Management ============

#[derive(Debug, Deserialize)]
pub struct CreateRouteRequest {
    pub name: String,
    pub vehicle_id: Option<Uuid>,
    #[serde(default)]
    pub requires_pickup: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRouteRequest {
    pub name: Option<String>,
    pub active: Option<bool>,
    pub requires_pickup: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AssignVehicleRequest {
    pub vehicle_id: Uuid,
}

/// Load a vehicle that is free to serve `route_id`
async fn assignable_vehicle(
    state: &AppState,
    vehicle_id: Uuid,
    route_id: Option<Uuid>,
) -> AppResult<vehicle::Model> {
    let vehicle = vehicle::Entity::find_by_id(vehicle_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Vehicle not found".to_string()))?;

    let holder = route::Entity::find()
        .filter(route::Column::VehicleId.eq(vehicle_id))
        .one(&state.db)
        .await?;
    if let Some(other) = holder.filter(|r| Some(r.id) != route_id) {
        return Err(AppError::Conflict(format!(
            "Vehicle {} already serves route {}",
            vehicle.plate, other.name
        )));
    }

    Ok(vehicle)
}

/// List all routes, inactive ones included (admin)
pub async fn list_routes(State(state): State<AppState>) -> AppResult<Json<Vec<RouteResponse>>> {
    let routes = route::Entity::find()
        .order_by_asc(route::Column::Name)
        .all(&state.db)
        .await?;

    let mut responses = Vec::with_capacity(routes.len());
    for r in routes {
        let available = state.engine.available_seats(r.id).await?;
        responses.push(RouteResponse::new(r, available));
    }

    Ok(Json(responses))
}

/// Create a route (admin). Capacity and vehicle type follow the vehicle.
pub async fn create_route(
    State(state): State<AppState>,
    Json(payload): Json<CreateRouteRequest>,
) -> AppResult<(StatusCode, Json<route::Model>)> {
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest("Route name must not be empty".to_string()));
    }

    let vehicle = match payload.vehicle_id {
        Some(id) => Some(assignable_vehicle(&state, id, None).await?),
        None => None,
    };

    let route = route::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name),
        vehicle_id: Set(vehicle.as_ref().map(|v| v.id)),
        vehicle_type: Set(vehicle.as_ref().map(|v| v.vehicle_type.clone())),
        capacity: Set(vehicle.as_ref().map_or(0, |v| v.capacity)),
        active: Set(true),
        requires_pickup: Set(payload.requires_pickup),
        created_at: Set(state.engine.now().into()),
    }
    .insert(&state.db)
    .await?;

    tracing::info!(route_id = %route.id, capacity = route.capacity, "Route created");
    Ok((StatusCode::CREATED, Json(route)))
}

/// Update a route (admin)
pub async fn update_route(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRouteRequest>,
) -> AppResult<Json<route::Model>> {
    let route = route::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Route not found".to_string()))?;

    let mut active: route::ActiveModel = route.into();

    if let Some(name) = payload.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::BadRequest("Route name must not be empty".to_string()));
        }
        active.name = Set(name);
    }
    if let Some(is_active) = payload.active {
        active.active = Set(is_active);
    }
    if let Some(requires_pickup) = payload.requires_pickup {
        active.requires_pickup = Set(requires_pickup);
    }

    let result = active.update(&state.db).await?;
    Ok(Json(result))
}

/// Assign a vehicle to a route (admin)
pub async fn assign_vehicle(
    State(state): State<AppState>,
    Path(route_id): Path<Uuid>,
    Json(payload): Json<AssignVehicleRequest>,
) -> AppResult<Json<route::Model>> {
    let route = route::Entity::find_by_id(route_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Route not found".to_string()))?;
    let vehicle = assignable_vehicle(&state, payload.vehicle_id, Some(route_id)).await?;

    let occupied = booking::Entity::find()
        .filter(booking::Column::RouteId.eq(route_id))
        .filter(booking::Column::Status.is_in(BookingStatus::OCCUPYING))
        .count(&state.db)
        .await?;
    if u64::try_from(vehicle.capacity).unwrap_or(0) < occupied {
        // Existing bookings keep their seats; new ones are refused until it drains
        tracing::warn!(
            %route_id,
            capacity = vehicle.capacity,
            occupied,
            "Vehicle is smaller than current occupancy"
        );
    }

    let mut active: route::ActiveModel = route.into();
    active.vehicle_id = Set(Some(vehicle.id));
    active.vehicle_type = Set(Some(vehicle.vehicle_type));
    active.capacity = Set(vehicle.capacity);

    let result = active.update(&state.db).await?;
    Ok(Json(result))
}

// ============ Pricing Rules ============

#[derive(Debug, Deserialize)]
pub struct CreatePricingRuleRequest {
    pub plan_type: PlanType,
    pub route_id: Option<Uuid>,
    pub vehicle_type: Option<String>,
    pub amount: Decimal,
    pub currency: String,
}

/// List pricing rules, inactive ones included (admin)
pub async fn list_pricing_rules(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<pricing_rule::Model>>> {
    let rules = pricing_rule::Entity::find()
        .order_by_desc(pricing_rule::Column::CreatedAt)
        .all(&state.db)
        .await?;
    Ok(Json(rules))
}

/// Add a pricing rule (admin). A rule targets a route, a vehicle type, or
/// neither (global default), never both.
pub async fn create_pricing_rule(
    State(state): State<AppState>,
    Json(payload): Json<CreatePricingRuleRequest>,
) -> AppResult<(StatusCode, Json<pricing_rule::Model>)> {
    if payload.amount <= Decimal::ZERO {
        return Err(AppError::BadRequest("Amount must be positive".to_string()));
    }
    let currency = payload.currency.trim().to_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::BadRequest(
            "Currency must be a 3-letter ISO code".to_string(),
        ));
    }
    if payload.route_id.is_some() && payload.vehicle_type.is_some() {
        return Err(AppError::BadRequest(
            "A rule may target a route or a vehicle type, not both".to_string(),
        ));
    }
    if let Some(route_id) = payload.route_id {
        route::Entity::find_by_id(route_id)
            .one(&state.db)
            .await?
            .ok_or_else(|| AppError::BadRequest("Invalid route".to_string()))?;
    }

    let rule = pricing_rule::ActiveModel {
        id: Set(Uuid::new_v4()),
        plan_type: Set(payload.plan_type),
        route_id: Set(payload.route_id),
        vehicle_type: Set(payload.vehicle_type.map(|v| v.trim().to_string())),
        amount: Set(payload.amount),
        currency: Set(currency),
        active: Set(true),
        created_at: Set(state.engine.now().into()),
    }
    .insert(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(rule)))
}

/// Deactivate a pricing rule (admin). Rules are kept for auditing.
pub async fn deactivate_pricing_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<pricing_rule::Model>> {
    let rule = pricing_rule::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Pricing rule not found".to_string()))?;

    let mut active: pricing_rule::ActiveModel = rule.into();
    active.active = Set(false);

    let result = active.update(&state.db).await?;
    Ok(Json(result))
}

// ============ Closure Dates ============

#[derive(Debug, Deserialize)]
pub struct CreateClosureRequest {
    pub date: NaiveDate,
    pub reason: String,
}

/// List declared closures (admin)
pub async fn list_closures(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<closure_date::Model>>> {
    let closures = closure_date::Entity::find()
        .order_by_asc(closure_date::Column::Date)
        .all(&state.db)
        .await?;
    Ok(Json(closures))
}

/// Declare a day without service (admin)
pub async fn create_closure(
    State(state): State<AppState>,
    Json(payload): Json<CreateClosureRequest>,
) -> AppResult<(StatusCode, Json<closure_date::Model>)> {
    let existing = closure_date::Entity::find_by_id(payload.date)
        .one(&state.db)
        .await?;
    if existing.is_some() {
        return Err(AppError::Conflict(format!(
            "{} is already a closure date",
            payload.date
        )));
    }

    let closure = closure_date::ActiveModel {
        date: Set(payload.date),
        reason: Set(payload.reason.trim().to_string()),
    }
    .insert(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(closure)))
}

/// Remove a closure date (admin)
pub async fn delete_closure(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> AppResult<Json<serde_json::Value>> {
    let result = closure_date::Entity::delete_by_id(date)
        .exec(&state.db)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound("Closure date not found".to_string()));
    }

    Ok(Json(serde_json::json!({ "message": "Closure date removed" })))
}

// ============ Booking Management ============

#[derive(Debug, Deserialize)]
pub struct BookingFilter {
    pub route_id: Option<Uuid>,
    pub status: Option<BookingStatus>,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct ManualActivationRequest {
    pub payment_ref: String,
}

/// List bookings (admin)
pub async fn list_all_bookings(
    State(state): State<AppState>,
    Query(filter): Query<BookingFilter>,
) -> AppResult<Json<Vec<BookingResponse>>> {
    let mut query = booking::Entity::find().order_by_desc(booking::Column::CreatedAt);

    if let Some(route_id) = filter.route_id {
        query = query.filter(booking::Column::RouteId.eq(route_id));
    }
    if let Some(status) = filter.status {
        query = query.filter(booking::Column::Status.eq(status));
    }
    if !filter.include_deleted {
        query = query.filter(booking::Column::DeletedAt.is_null());
    }

    let bookings = query.all(&state.db).await?;
    Ok(Json(bookings.into_iter().map(Into::into).collect()))
}

/// Hold a pending booking for manual review (admin)
pub async fn require_approval(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BookingResponse>> {
    let outcome = state.engine.require_approval(id).await?;
    Ok(Json(outcome.booking.into()))
}

/// Activate a booking paid outside the payment provider (admin)
pub async fn activate_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ManualActivationRequest>,
) -> AppResult<Json<BookingResponse>> {
    let outcome = state.engine.activate(id, &payload.payment_ref).await?;
    Ok(Json(outcome.booking.into()))
}

/// Cancel any booking (admin)
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BookingResponse>> {
    let outcome = state.engine.cancel(id).await?;
    Ok(Json(outcome.booking.into()))
}

/// Hide a booking from listings (admin). Its status, and so its seat, is untouched.
pub async fn delete_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let booking = booking::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;

    if booking.deleted_at.is_some() {
        return Ok(Json(serde_json::json!({ "message": "Booking already deleted" })));
    }

    let mut active: booking::ActiveModel = booking.into();
    active.deleted_at = Set(Some(state.engine.now().into()));
    active.update(&state.db).await?;

    Ok(Json(serde_json::json!({ "message": "Booking deleted" })))
}

// ============ Status Sweep ============

#[derive(Debug, Deserialize)]
pub struct SweepQuery {
    pub as_of: Option<DateTime<Utc>>,
}

/// Run the status sweep now, optionally as of another instant (admin)
pub async fn run_sweep(
    State(state): State<AppState>,
    Query(query): Query<SweepQuery>,
) -> AppResult<Json<SweepReport>> {
    let as_of = query.as_of.unwrap_or_else(|| state.engine.now());
    let report = state.engine.run_status_sweep(as_of).await?;
    Ok(Json(report))
}
