use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Half-open `[start, end)` span of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if end < start {
            return Self { start, end: start };
        }
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days().max(0)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day < self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day < end)
    }
}

/// Range as the dashboard asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RangeSpec {
    /// The last `days` days, today included.
    Relative { days: u32 },
    /// A user-picked span; `end` is inclusive.
    Absolute { start: NaiveDate, end: NaiveDate },
}

/// Longest relative range a request may ask for, about ten years.
pub const MAX_RELATIVE_DAYS: u32 = 3660;

impl RangeSpec {
    /// Spans that would run past the calendar's limits are clipped to them.
    pub fn normalize(&self, today: NaiveDate) -> DateRange {
        match *self {
            RangeSpec::Relative { days } => {
                let end = next_day(today);
                let start = end
                    .checked_sub_signed(Duration::days(i64::from(days)))
                    .unwrap_or(NaiveDate::MIN);
                DateRange::new(start, end)
            }
            RangeSpec::Absolute { start, end } => DateRange::new(start, next_day(end)),
        }
    }
}

fn next_day(day: NaiveDate) -> NaiveDate {
    day.succ_opt().unwrap_or(day)
}

impl Default for RangeSpec {
    fn default() -> Self {
        RangeSpec::Relative { days: 30 }
    }
}

/// `YYYYMMDD`, the form the stats endpoints take in their paths.
pub fn url_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}
