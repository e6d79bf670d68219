use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::{DatabaseConnection, EntityTrait};

use crate::engine::{BookingCalendar, StoreError};
use crate::entities::closure_date;

/// Operational calendar backed by the `closure_date` table.
#[derive(Clone)]
pub struct ClosureCalendar {
    db: DatabaseConnection,
}

impl ClosureCalendar {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BookingCalendar for ClosureCalendar {
    async fn is_bookable(&self, date: NaiveDate) -> Result<bool, StoreError> {
        let closure = closure_date::Entity::find_by_id(date).one(&self.db).await?;
        Ok(closure.is_none())
    }
}
