// =============================================================================
// FLASH SALE WINDOW
// =============================================================================
// Pure functions of (sale, now). A sale's effective state is never stored:
//
//   is_active && start <= now < end   -> Active
//   end <= now                        -> Expired
//   !is_active                        -> Inactive
//   otherwise                         -> Scheduled (waiting for start)
//
// The window is half-open, so at exactly `end_date` the sale is over and
// `time_remaining` agrees.
// =============================================================================

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{round_money, FlashSale, FlashSaleProduct};

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 60 * SECONDS_PER_MINUTE;
const SECONDS_PER_DAY: i64 = 24 * SECONDS_PER_HOUR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TimeRemaining {
    Expired,
    Remaining {
        days: i64,
        hours: i64,
        minutes: i64,
        seconds: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Active,
    Scheduled,
    Inactive,
    Expired,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Active => "active",
            SaleStatus::Scheduled => "scheduled",
            SaleStatus::Inactive => "inactive",
            SaleStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(SaleStatus::Active),
            "scheduled" => Ok(SaleStatus::Scheduled),
            "inactive" => Ok(SaleStatus::Inactive),
            "expired" => Ok(SaleStatus::Expired),
            other => Err(format!("unknown flash sale status: {other}")),
        }
    }
}

pub fn is_expired(sale: &FlashSale, now: DateTime<Utc>) -> bool {
    sale.end_date <= now
}

/// Time left until the sale ends, floored to whole seconds.
pub fn time_remaining(sale: &FlashSale, now: DateTime<Utc>) -> TimeRemaining {
    if is_expired(sale, now) {
        return TimeRemaining::Expired;
    }

    let total = (sale.end_date - now).num_seconds();
    TimeRemaining::Remaining {
        days: total / SECONDS_PER_DAY,
        hours: (total % SECONDS_PER_DAY) / SECONDS_PER_HOUR,
        minutes: (total % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE,
        seconds: total % SECONDS_PER_MINUTE,
    }
}

pub fn is_currently_active(sale: &FlashSale, now: DateTime<Utc>) -> bool {
    sale.is_active && sale.start_date <= now && !is_expired(sale, now)
}

pub fn status(sale: &FlashSale, now: DateTime<Utc>) -> SaleStatus {
    if is_currently_active(sale, now) {
        SaleStatus::Active
    } else if is_expired(sale, now) {
        SaleStatus::Expired
    } else if !sale.is_active {
        SaleStatus::Inactive
    } else {
        SaleStatus::Scheduled
    }
}

/// `(original - sale) / original * 100`, two decimal places.
pub fn discount_percentage(original_price: Decimal, sale_price: Decimal) -> Decimal {
    if original_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    round_money((original_price - sale_price) / original_price * Decimal::ONE_HUNDRED)
}

/// A sale as returned to clients, with its derived window state.
#[derive(Debug, Clone, Serialize)]
pub struct FlashSaleView {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub products: Vec<FlashSaleProduct>,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub status: SaleStatus,
    pub is_currently_active: bool,
    pub time_remaining: TimeRemaining,
}

impl FlashSaleView {
    pub fn at(sale: FlashSale, now: DateTime<Utc>) -> Self {
        let status = status(&sale, now);
        let is_currently_active = is_currently_active(&sale, now);
        let time_remaining = time_remaining(&sale, now);

        Self {
            id: sale.id,
            title: sale.title,
            description: sale.description,
            start_date: sale.start_date,
            end_date: sale.end_date,
            is_active: sale.is_active,
            products: sale.products,
            view_count: sale.view_count,
            created_at: sale.created_at,
            updated_at: sale.updated_at,
            status,
            is_currently_active,
            time_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sale(start: DateTime<Utc>, end: DateTime<Utc>, is_active: bool) -> FlashSale {
        FlashSale {
            id: Uuid::new_v4(),
            title: "Midnight Madness".to_string(),
            description: None,
            start_date: start,
            end_date: end,
            is_active,
            products: Vec::new(),
            view_count: 0,
            created_by: Uuid::new_v4(),
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn running_sale_is_active() {
        let now = Utc::now();
        let s = sale(now - Duration::hours(1), now + Duration::hours(1), true);

        assert_eq!(status(&s, now), SaleStatus::Active);
        assert!(is_currently_active(&s, now));
    }

    #[test]
    fn ended_sale_is_expired_even_when_switched_on() {
        let now = Utc::now();
        let s = sale(now - Duration::hours(2), now - Duration::seconds(1), true);

        assert_eq!(status(&s, now), SaleStatus::Expired);
        assert_eq!(time_remaining(&s, now), TimeRemaining::Expired);
        assert!(!is_currently_active(&s, now));
    }

    #[test]
    fn end_instant_is_outside_the_window() {
        let now = Utc::now();
        let s = sale(now - Duration::hours(1), now, true);

        assert_eq!(status(&s, now), SaleStatus::Expired);
        assert_eq!(time_remaining(&s, now), TimeRemaining::Expired);
    }

    #[test]
    fn start_instant_is_inside_the_window() {
        let now = Utc::now();
        let s = sale(now, now + Duration::minutes(5), true);
        assert_eq!(status(&s, now), SaleStatus::Active);
    }

    #[test]
    fn future_and_switched_off_sales() {
        let now = Utc::now();
        let future = sale(now + Duration::hours(1), now + Duration::hours(2), true);
        let off = sale(now - Duration::hours(1), now + Duration::hours(1), false);

        assert_eq!(status(&future, now), SaleStatus::Scheduled);
        assert_eq!(status(&off, now), SaleStatus::Inactive);
        assert!(!is_currently_active(&off, now));
    }

    #[test]
    fn remaining_time_is_floored() {
        let now = Utc::now();
        let end = now
            + Duration::days(2)
            + Duration::hours(3)
            + Duration::minutes(4)
            + Duration::seconds(5)
            + Duration::milliseconds(999);
        let s = sale(now - Duration::hours(1), end, true);

        assert_eq!(
            time_remaining(&s, now),
            TimeRemaining::Remaining {
                days: 2,
                hours: 3,
                minutes: 4,
                seconds: 5
            }
        );
    }

    #[test]
    fn discount_is_rounded_to_cents() {
        assert_eq!(
            discount_percentage(Decimal::new(30, 0), Decimal::new(20, 0)),
            Decimal::new(3333, 2)
        );
        assert_eq!(
            discount_percentage(Decimal::new(100, 0), Decimal::new(75, 0)),
            Decimal::new(25, 0)
        );
    }

    #[test]
    fn view_serializes_derived_fields() {
        let now = Utc::now();
        let s = sale(now - Duration::hours(1), now + Duration::hours(1), true);
        let json = serde_json::to_value(FlashSaleView::at(s, now)).unwrap();

        assert_eq!(json["status"], "active");
        assert_eq!(json["is_currently_active"], true);
        assert_eq!(json["time_remaining"]["state"], "remaining");
        assert_eq!(json["time_remaining"]["hours"], 1);
    }
}
