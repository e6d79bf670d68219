use std::env;

use crate::engine::terms::{parse_terms, Term};

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub payment_webhook_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub abandonment_grace_hours: i64,
    pub sweep_interval_secs: u64,
    pub sweep_lease_minutes: i64,
    pub admit_lock_timeout_ms: u64,
    pub admit_max_attempts: u32,
    pub semester_terms: Vec<Term>,
    pub annual_terms: Vec<Term>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            database_url: env::var("DATABASE_URL")
                .expect("DATABASE_URL must be set"),
            jwt_secret: env::var("JWT_SECRET")
                .expect("JWT_SECRET must be set"),
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET")
                .expect("PAYMENT_WEBHOOK_SECRET must be set"),
            server_host: env::var("SERVER_HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("SERVER_PORT must be a number"),
            abandonment_grace_hours: env::var("ABANDONMENT_GRACE_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .expect("ABANDONMENT_GRACE_HOURS must be a number"),
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .expect("SWEEP_INTERVAL_SECS must be a number"),
            sweep_lease_minutes: env::var("SWEEP_LEASE_MINUTES")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .expect("SWEEP_LEASE_MINUTES must be a number"),
            admit_lock_timeout_ms: parse_lock_timeout_ms(
                &env::var("ADMIT_LOCK_TIMEOUT_MS").unwrap_or_else(|_| "2000".to_string()),
            )
            .expect("ADMIT_LOCK_TIMEOUT_MS must be a positive number of milliseconds"),
            admit_max_attempts: env::var("ADMIT_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .expect("ADMIT_MAX_ATTEMPTS must be a number"),
            semester_terms: parse_terms(&env::var("SEMESTER_TERMS").unwrap_or_default())
                .expect("SEMESTER_TERMS must be a list of YYYY-MM-DD..YYYY-MM-DD ranges"),
            annual_terms: parse_terms(&env::var("ANNUAL_TERMS").unwrap_or_default())
                .expect("ANNUAL_TERMS must be a list of YYYY-MM-DD..YYYY-MM-DD ranges"),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

/// A zero lock timeout disables the timeout in Postgres, so it is refused.
fn parse_lock_timeout_ms(raw: &str) -> Option<u64> {
    raw.trim().parse().ok().filter(|ms| *ms > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_must_be_positive() {
        assert_eq!(parse_lock_timeout_ms("2000"), Some(2000));
        assert_eq!(parse_lock_timeout_ms(" 1 "), Some(1));
        assert_eq!(parse_lock_timeout_ms("0"), None);
        assert_eq!(parse_lock_timeout_ms("-5"), None);
        assert_eq!(parse_lock_timeout_ms("soon"), None);
    }
}
