use std::str::FromStr;

use chrono::{Days, Months, NaiveDate};
use thiserror::Error;

use crate::entities::booking::PlanType;

use super::error::{BookingError, BookingResult};

/// An organisational date range, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Term {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Term {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TermParseError {
    #[error("term `{0}` must look like YYYY-MM-DD..YYYY-MM-DD")]
    Format(String),
    #[error("term `{0}` ends before it starts")]
    Inverted(String),
}

impl FromStr for Term {
    type Err = TermParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (start, end) = raw
            .split_once("..")
            .ok_or_else(|| TermParseError::Format(raw.to_string()))?;

        let parse = |v: &str| {
            NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d")
                .map_err(|_| TermParseError::Format(raw.to_string()))
        };
        let term = Term {
            start: parse(start)?,
            end: parse(end)?,
        };

        if term.end < term.start {
            return Err(TermParseError::Inverted(raw.to_string()));
        }
        Ok(term)
    }
}

/// Parse a comma separated list of terms. Blank input yields no terms.
pub fn parse_terms(s: &str) -> Result<Vec<Term>, TermParseError> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| part.parse::<Term>())
        .collect()
}

/// Semester and academic-year boundaries that bound the long plan types.
#[derive(Debug, Clone, Default)]
pub struct TermCalendar {
    semesters: Vec<Term>,
    academic_years: Vec<Term>,
}

impl TermCalendar {
    pub fn new(mut semesters: Vec<Term>, mut academic_years: Vec<Term>) -> Self {
        semesters.sort_by_key(|t| t.start);
        academic_years.sort_by_key(|t| t.start);
        Self {
            semesters,
            academic_years,
        }
    }

    /// Last day covered by a booking of `plan_type` starting on `start`.
    pub fn end_date(&self, plan_type: PlanType, start: NaiveDate) -> BookingResult<NaiveDate> {
        let end = match plan_type {
            PlanType::Weekly => start.checked_add_days(Days::new(7)),
            PlanType::BiWeekly => start.checked_add_days(Days::new(14)),
            PlanType::Monthly => start.checked_add_months(Months::new(1)),
            PlanType::Semester => return Self::term_end(&self.semesters, "semester", start),
            PlanType::Annual => return Self::term_end(&self.academic_years, "academic year", start),
        };

        end.ok_or_else(|| BookingError::Validation(format!("start date {start} is out of range")))
    }

    fn term_end(terms: &[Term], label: &str, start: NaiveDate) -> BookingResult<NaiveDate> {
        terms
            .iter()
            .find(|t| t.contains(start))
            .map(|t| t.end)
            .ok_or_else(|| {
                BookingError::Validation(format!("no {label} is configured covering {start}"))
            })
    }
}
