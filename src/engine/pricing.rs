//! Price resolution across overlapping rule scopes.
//!
//! Rules are checked against an ordered list of tiers, most specific first:
//! route, then vehicle type, then the global default. The first tier with a
//! matching active rule for the plan type decides the price. Two rules in the
//! same tier are a data anomaly; the most recently created one wins.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::entities::booking::PlanType;
use crate::entities::{pricing_rule, route};

use super::error::{BookingError, BookingResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingScope {
    Route,
    VehicleType,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub price: Money,
    pub scope: PricingScope,
    pub rule_id: Uuid,
}

struct Tier {
    scope: PricingScope,
    matches: fn(&pricing_rule::Model, &route::Model) -> bool,
}

fn route_scoped(rule: &pricing_rule::Model, route: &route::Model) -> bool {
    rule.route_id == Some(route.id)
}

fn vehicle_scoped(rule: &pricing_rule::Model, route: &route::Model) -> bool {
    rule.route_id.is_none() && rule.vehicle_type.is_some() && rule.vehicle_type == route.vehicle_type
}

fn global(rule: &pricing_rule::Model, _: &route::Model) -> bool {
    rule.route_id.is_none() && rule.vehicle_type.is_none()
}

const TIERS: [Tier; 3] = [
    Tier {
        scope: PricingScope::Route,
        matches: route_scoped,
    },
    Tier {
        scope: PricingScope::VehicleType,
        matches: vehicle_scoped,
    },
    Tier {
        scope: PricingScope::Global,
        matches: global,
    },
];

pub struct PricingResolver;

impl PricingResolver {
    /// Pick the authoritative price for `plan_type` on `route` from a rule snapshot.
    pub fn resolve(
        plan_type: PlanType,
        route: &route::Model,
        rules: &[pricing_rule::Model],
    ) -> BookingResult<Quote> {
        let candidates: Vec<&pricing_rule::Model> = rules
            .iter()
            .filter(|r| r.active && r.plan_type == plan_type)
            .collect();

        for tier in &TIERS {
            let winner = candidates
                .iter()
                .filter(|r| (tier.matches)(r, route))
                .max_by_key(|r| (r.created_at, r.id));

            if let Some(rule) = winner {
                return Ok(Quote {
                    price: Money {
                        amount: rule.amount,
                        currency: rule.currency.clone(),
                    },
                    scope: tier.scope,
                    rule_id: rule.id,
                });
            }
        }

        Err(BookingError::PricingNotConfigured {
            plan_type,
            route_id: route.id,
        })
    }
}
