use crate::models::{DayRecord, MetricSeries};
use crate::range::DateRange;
use chrono::Duration;

impl MetricSeries {
    /// Days known to be cached, as a half-open range.
    pub fn window(&self) -> Option<DateRange> {
        match (self.mindate, self.maxdate) {
            (Some(min), Some(max)) => Some(DateRange::new(min, max + Duration::days(1))),
            _ => None,
        }
    }

    /// Ranges that must be fetched to cover `wanted`: nothing when the cached
    /// window already spans it, the whole range when there is no window, and
    /// otherwise up to two ranges adjoining the window so it stays contiguous.
    /// Extending forward starts at the newest cached day, whose rollup may
    /// have been partial.
    pub fn missing(&self, wanted: DateRange) -> Vec<DateRange> {
        if wanted.is_empty() {
            return Vec::new();
        }
        let Some(window) = self.window() else {
            return vec![wanted];
        };

        let mut gaps = Vec::with_capacity(2);
        if wanted.end > window.end {
            let newest = window.end.pred_opt().unwrap_or(window.start);
            gaps.push(DateRange::new(newest, wanted.end));
        }
        if wanted.start < window.start {
            gaps.push(DateRange::new(wanted.start, window.start));
        }
        gaps
    }

    /// Stores the rows of a completed fetch of `fetched` and widens the window.
    ///
    /// Days inside the requested span that came back without a row count as
    /// known-absent, except past the newest returned row: those days may not
    /// be rolled up yet and stay outside the window.
    pub fn merge(&mut self, fetched: DateRange, rows: Vec<DayRecord>) {
        let earliest = rows.iter().map(|row| row.date).min();
        let latest = rows.iter().map(|row| row.date).max();
        for row in rows {
            self.days.insert(row.date, row);
        }

        match (earliest, latest) {
            (Some(earliest), Some(latest)) => {
                let low = earliest.min(fetched.start);
                self.mindate = Some(self.mindate.map_or(low, |min| min.min(low)));
                self.maxdate = Some(self.maxdate.map_or(latest, |max| max.max(latest)));
            }
            _ => {
                // An empty answer for the span right before the window still
                // tells us those days have no data.
                if let Some(window) = self.window() {
                    if fetched.end >= window.start && fetched.start < window.start {
                        self.mindate = Some(fetched.start);
                    }
                }
            }
        }
    }

    pub fn rows_in(&self, range: DateRange) -> impl Iterator<Item = &DayRecord> {
        self.days.range(range.start..range.end).map(|(_, row)| row)
    }
}
