pub mod admin;
pub mod parent;
pub mod payment;
