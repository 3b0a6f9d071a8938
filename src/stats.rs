use crate::collapse::prepare_row;
use crate::metrics::{Aggregation, MetricSpec, MetricTable, Shape};
use crate::models::{Breakdown, DayRecord, Group, GroupedResult, SiteEvent, Summary, ViewState};
use crate::range::DateRange;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// Aggregates day rows into the view's grouping.
///
/// A week or month grouping over a range too short to hold one complete
/// bucket falls back to days, and the view is updated to say so.
pub fn group_data(
    rows: &BTreeMap<NaiveDate, DayRecord>,
    range: DateRange,
    view: &mut ViewState,
    table: &MetricTable,
) -> GroupedResult {
    let group = effective_group(view.group, range);
    if group != view.group {
        debug!(metric = %view.metric, requested = ?view.group, "range too short, grouping by day");
        view.group = group;
    }
    let spec = table.spec(&view.metric);

    let mut grouped = BTreeMap::new();
    let first_index = match group {
        Group::Day => {
            for (date, row) in rows.range(range.start..range.end) {
                grouped.insert(*date, row.clone());
            }
            (!grouped.is_empty()).then_some(range.start)
        }
        Group::All => {
            let mut bucket = Bucket::new(range.start);
            for day in range.days() {
                bucket.push(rows.get(&day), &spec);
            }
            if let Some(row) = bucket.finish(&spec) {
                grouped.insert(range.start, row);
            }
            grouped.keys().next().copied()
        }
        Group::Week | Group::Month => {
            let mut current: Option<Bucket> = None;
            for day in range.days() {
                if starts_bucket(group, day) {
                    // The previous bucket ran up to this boundary, so it is whole.
                    if let Some(row) = current.take().and_then(|bucket| bucket.finish(&spec)) {
                        grouped.insert(row.date, row);
                    }
                    current = Some(Bucket::new(day));
                }
                // Days before the first boundary belong to no bucket.
                if let Some(bucket) = current.as_mut() {
                    bucket.push(rows.get(&day), &spec);
                }
            }
            if let Some(bucket) = current {
                if Some(bucket.spanned) == bucket_len(group, bucket.start) {
                    if let Some(row) = bucket.finish(&spec) {
                        grouped.insert(row.date, row);
                    }
                }
            }
            grouped.keys().next().copied()
        }
    };

    GroupedResult {
        metric: view.metric.clone(),
        group,
        empty: grouped.is_empty(),
        first_index,
        rows: grouped,
    }
}

fn starts_bucket(group: Group, day: NaiveDate) -> bool {
    match group {
        Group::Week => day.weekday() == Weekday::Sun,
        Group::Month => day.day() == 1,
        Group::Day | Group::All => false,
    }
}

/// Days in the bucket starting at `start`, for calendar groupings.
fn bucket_len(group: Group, start: NaiveDate) -> Option<i64> {
    match group {
        Group::Week => Some(7),
        Group::Month => {
            let (year, month) = if start.month() == 12 {
                (start.year() + 1, 1)
            } else {
                (start.year(), start.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1).map(|next| (next - start).num_days())
        }
        Group::Day | Group::All => None,
    }
}

fn effective_group(group: Group, range: DateRange) -> Group {
    if !matches!(group, Group::Week | Group::Month) {
        return group;
    }
    let has_full_bucket = range
        .days()
        .find(|day| starts_bucket(group, *day))
        .and_then(|start| bucket_len(group, start).map(|len| start + Duration::days(len)))
        .is_some_and(|bucket_end| bucket_end <= range.end);
    if has_full_bucket { group } else { Group::Day }
}

struct Bucket {
    start: NaiveDate,
    spanned: i64,
    present: u32,
    count: f64,
    data: BTreeMap<String, f64>,
    total: f64,
    average: f64,
}

impl Bucket {
    fn new(start: NaiveDate) -> Self {
        Self {
            start,
            spanned: 0,
            present: 0,
            count: 0.0,
            data: BTreeMap::new(),
            total: 0.0,
            average: 0.0,
        }
    }

    fn push(&mut self, row: Option<&DayRecord>, spec: &MetricSpec) {
        self.spanned += 1;
        let Some(row) = row else {
            return;
        };
        self.present += 1;
        self.count += row.count;
        match spec.shape {
            Shape::Breakdown => {
                if let Some(data) = &row.data {
                    for (field, value) in data.flatten() {
                        *self.data.entry(field).or_default() += value;
                    }
                }
            }
            Shape::Contributions => {
                self.total += row.total.unwrap_or_default();
                self.average += row.average.unwrap_or_default();
            }
            Shape::Plain | Shape::NonDate { .. } => {}
        }
    }

    /// Closes the bucket. Means divide by the days that had a row, not by the
    /// bucket's length. Buckets without any row produce nothing.
    fn finish(mut self, spec: &MetricSpec) -> Option<DayRecord> {
        if self.present == 0 {
            return None;
        }
        let divisor = f64::from(self.present);
        let mean = spec.aggregation == Aggregation::Mean;
        if mean {
            self.count /= divisor;
        }
        match &spec.averaged_fields {
            Some(fields) => {
                for field in fields {
                    if let Some(value) = self.data.get_mut(field) {
                        *value /= divisor;
                    }
                }
            }
            None if mean => {
                for value in self.data.values_mut() {
                    *value /= divisor;
                }
            }
            None => {}
        }

        let mut row = DayRecord::new(self.start, self.count);
        match spec.shape {
            Shape::Breakdown => row.data = Some(Breakdown::Flat(self.data)),
            Shape::Contributions => {
                row.total = Some(self.total);
                row.average = Some(self.average / divisor);
            }
            Shape::Plain | Shape::NonDate { .. } => {}
        }
        Some(row)
    }
}

/// Breakdown fields of the cached days in `range`, as `data|{field}`, ranked
/// by their total over the range. Ties keep key order.
pub fn available_fields(
    metric: &str,
    rows: &BTreeMap<NaiveDate, DayRecord>,
    range: DateRange,
    table: &MetricTable,
    precision: usize,
) -> Vec<String> {
    let spec = table.spec(metric);
    match spec.shape {
        Shape::Contributions => {
            return vec!["count".to_string(), "total".to_string(), "average".to_string()];
        }
        Shape::Breakdown => {}
        Shape::Plain | Shape::NonDate { .. } => return vec!["count".to_string()],
    }

    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for (_, row) in rows.range(range.start..range.end) {
        let row = prepare_row(metric, row, table, precision);
        if let Some(data) = &row.data {
            for (field, value) in data.flatten() {
                *totals.entry(field).or_default() += value;
            }
        }
    }

    let mut ranked: Vec<(String, f64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    ranked
        .into_iter()
        .map(|(field, _)| format!("data|{field}"))
        .collect()
}

/// Reads a numeric value out of a row by a `|`-separated path, so
/// `data|api` is the `api` breakdown field. Missing or non-numeric leaves
/// give `None`.
pub fn get_field(row: &DayRecord, field: &str) -> Option<f64> {
    let value = serde_json::to_value(row).ok()?;
    let mut current = &value;
    for part in field.split('|') {
        current = current.get(part)?;
    }
    current.as_f64()
}

/// Sum of `field` over the cached days of `range`, and its mean over the
/// range's length. Rows are collapsed first, so the fields listed by
/// [`available_fields`] resolve. `None` when no day carries the field.
pub fn summarize(
    metric: &str,
    rows: &BTreeMap<NaiveDate, DayRecord>,
    range: DateRange,
    field: &str,
    table: &MetricTable,
    precision: usize,
) -> Option<Summary> {
    let values: Vec<f64> = rows
        .range(range.start..range.end)
        .filter_map(|(_, row)| get_field(&prepare_row(metric, row, table, precision), field))
        .collect();
    if values.is_empty() {
        return None;
    }
    let sum: f64 = values.iter().sum();
    Some(Summary {
        sum,
        mean: sum / range.len_days().max(1) as f64,
    })
}

/// Tags each row with the site event covering its day. Events with an end
/// cover every day from start to end inclusive.
pub fn annotate(rows: &mut BTreeMap<NaiveDate, DayRecord>, events: &[SiteEvent]) {
    for event in events {
        match event.end {
            Some(end) => {
                for (_, row) in rows.range_mut(event.start..=end.max(event.start)) {
                    row.event = Some(event.clone());
                }
            }
            None => {
                if let Some(row) = rows.get_mut(&event.start) {
                    row.event = Some(event.clone());
                }
            }
        }
    }
}
