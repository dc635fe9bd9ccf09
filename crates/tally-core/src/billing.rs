//! Monthly billing periods.
//!
//! A [`BillingPeriod`] is a reporting cache rebuilt from usage records. It is
//! never read when deciding whether an operation may run.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BillingError;
use crate::{AccountId, UsageRecord};

/// A calendar month in UTC, written `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Build a month, validating the month number.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidPeriod` for months outside 1..=12.
    pub fn new(year: i32, month: u32) -> Result<Self, BillingError> {
        if !(1..=12).contains(&month) || NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(BillingError::InvalidPeriod(format!("{year:04}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    /// The month containing a timestamp.
    #[must_use]
    pub fn of(timestamp: DateTime<Utc>) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
        }
    }

    /// The current month.
    #[must_use]
    pub fn current() -> Self {
        Self::of(Utc::now())
    }

    /// Calendar year.
    #[must_use]
    pub const fn year(&self) -> i32 {
        self.year
    }

    /// Calendar month, 1-based.
    #[must_use]
    pub const fn month(&self) -> u32 {
        self.month
    }

    /// First instant of the month.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// The following month.
    #[must_use]
    pub const fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// First instant after the month.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.next().start()
    }

    /// Whether a timestamp falls inside the month.
    #[must_use]
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        Self::of(timestamp) == *self
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BillingError::InvalidPeriod(s.to_string());
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for YearMonth {
    type Error = BillingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}

/// Usage totals for one account and month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    /// The account.
    pub account_id: AccountId,

    /// The month summarized.
    pub year_month: YearMonth,

    /// Sum of completed usage costs.
    pub total_usage_cost: Decimal,

    /// Sum of input and output tokens of completed usage.
    pub total_tokens: u64,

    /// Number of completed operations.
    pub operation_count: u64,

    /// When the summary was last rebuilt.
    pub refreshed_at: DateTime<Utc>,
}

impl BillingPeriod {
    /// Summarize the completed records that fall in the month.
    ///
    /// Records for other accounts or months, and failed records, are ignored.
    pub fn summarize<'a>(
        account_id: AccountId,
        year_month: YearMonth,
        records: impl IntoIterator<Item = &'a UsageRecord>,
    ) -> Self {
        let mut period = Self {
            account_id,
            year_month,
            total_usage_cost: Decimal::ZERO,
            total_tokens: 0,
            operation_count: 0,
            refreshed_at: Utc::now(),
        };

        for record in records.into_iter().filter(|r| {
            r.account_id == account_id && r.is_completed() && year_month.contains(r.created_at)
        }) {
            period.total_usage_cost += record.cost;
            period.total_tokens = period.total_tokens.saturating_add(record.total_tokens());
            period.operation_count += 1;
        }

        period
    }
}
