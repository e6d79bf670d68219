pub mod booking;
pub mod closure_date;
pub mod pricing_rule;
pub mod route;
pub mod sweep_lease;
pub mod vehicle;
