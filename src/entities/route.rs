use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "route")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub vehicle_id: Option<Uuid>,
    /// Snapshot of the assigned vehicle's type, used for pricing scope.
    pub vehicle_type: Option<String>,
    /// Snapshot of the assigned vehicle's seat count.
    pub capacity: i32,
    pub active: bool,
    pub requires_pickup: bool,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::vehicle::Entity",
        from = "Column::VehicleId",
        to = "super::vehicle::Column::Id"
    )]
    Vehicle,
    #[sea_orm(has_many = "super::booking::Entity")]
    Bookings,
    #[sea_orm(has_many = "super::pricing_rule::Entity")]
    PricingRules,
}

impl Related<super::vehicle::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Vehicle.def()
    }
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bookings.def()
    }
}

impl Related<super::pricing_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PricingRules.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
