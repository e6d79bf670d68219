pub use sea_orm_migration::prelude::*;

mod m20240801_000001_create_vehicles;
mod m20240801_000002_create_routes;
mod m20240801_000003_create_bookings;
mod m20240801_000004_create_pricing_rules;
mod m20240801_000005_create_closure_dates;
mod m20240801_000006_create_sweep_leases;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240801_000001_create_vehicles::Migration),
            Box::new(m20240801_000002_create_routes::Migration),
            Box::new(m20240801_000003_create_bookings::Migration),
            Box::new(m20240801_000004_create_pricing_rules::Migration),
            Box::new(m20240801_000005_create_closure_dates::Migration),
            Box::new(m20240801_000006_create_sweep_leases::Migration),
        ]
    }
}
