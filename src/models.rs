use crate::range::{DateRange, RangeSpec};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Per-day breakdown of a metric. The `apps` metric nests versions under each
/// application; every other breakdown metric is flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Breakdown {
    Flat(BTreeMap<String, f64>),
    Nested(BTreeMap<String, BTreeMap<String, f64>>),
}

impl Breakdown {
    /// Flat view of the breakdown; nested entries are keyed `{outer}_{inner}`.
    pub fn flatten(&self) -> BTreeMap<String, f64> {
        match self {
            Breakdown::Flat(map) => map.clone(),
            Breakdown::Nested(outer) => outer
                .iter()
                .flat_map(|(app, inner)| {
                    inner
                        .iter()
                        .map(move |(version, value)| (format!("{app}_{version}"), *value))
                })
                .collect(),
        }
    }
}

impl Default for Breakdown {
    fn default() -> Self {
        Breakdown::Flat(BTreeMap::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    pub date: NaiveDate,
    #[serde(default)]
    pub count: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Breakdown>,
    #[serde(
        default,
        deserialize_with = "lenient_amount",
        skip_serializing_if = "Option::is_none"
    )]
    pub total: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_amount",
        skip_serializing_if = "Option::is_none"
    )]
    pub average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<SiteEvent>,
}

impl DayRecord {
    pub fn new(date: NaiveDate, count: f64) -> Self {
        Self {
            date,
            count,
            data: None,
            total: None,
            average: None,
            event: None,
        }
    }

    pub fn with_data(mut self, data: Breakdown) -> Self {
        self.data = Some(data);
        self
    }
}

/// Contribution amounts come back either as JSON numbers or decimal strings.
fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(f64),
        Text(String),
    }

    match Option::<Amount>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Amount::Number(value)) => Ok(Some(value)),
        Some(Amount::Text(text)) => text
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Site-wide happening (a release, an outage) shown against the charts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteEvent {
    pub start: NaiveDate,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(rename = "type", default)]
    pub kind: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_pretty: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Everything cached for one metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub mindate: Option<NaiveDate>,
    pub maxdate: Option<NaiveDate>,
    pub days: BTreeMap<NaiveDate, DayRecord>,
}

/// The whole persisted cache: dated series plus raw rows of metrics that are
/// not keyed by day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsStore {
    pub series: BTreeMap<String, MetricSeries>,
    #[serde(default)]
    pub non_date: BTreeMap<String, Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    #[default]
    Day,
    Week,
    Month,
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub metric: String,
    #[serde(default)]
    pub range: RangeSpec,
    #[serde(default)]
    pub group: Group,
}

impl ViewState {
    pub fn new(metric: impl Into<String>, range: RangeSpec, group: Group) -> Self {
        Self {
            metric: metric.into(),
            range,
            group,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupedResult {
    pub metric: String,
    pub group: Group,
    pub rows: BTreeMap<NaiveDate, DayRecord>,
    pub first_index: Option<NaiveDate>,
    pub empty: bool,
}

/// What a range lookup yields, by metric shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataRange {
    Dated {
        metric: String,
        range: DateRange,
        rows: BTreeMap<NaiveDate, DayRecord>,
    },
    NonDate {
        metric: String,
        /// Column the rows are broken down by, such as `currency`.
        key: String,
        rows: Vec<serde_json::Value>,
        empty: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewData {
    Grouped(GroupedResult),
    NonDate {
        metric: String,
        key: String,
        rows: Vec<serde_json::Value>,
        empty: bool,
    },
}

/// Payload handed to the chart once a view's data is ready.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataReady {
    pub view: ViewState,
    pub fields: Vec<String>,
    /// Values are money amounts.
    pub currency: bool,
    pub data: ViewData,
    pub events: Vec<SiteEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub sum: f64,
    pub mean: f64,
}

/// Query string shared by the stats endpoints. Either `start` and `end`
/// (inclusive) or `range` in days; thirty days when neither is given.
#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub range: Option<u32>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub group: Group,
    pub field: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub metric: String,
    pub field: String,
    pub sum: Option<f64>,
    pub mean: Option<f64>,
    pub nodata: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrettyNameResponse {
    pub metric: String,
    pub field: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_record_parses_flat_breakdown() {
        let record: DayRecord = serde_json::from_str(
            r#"{"date": "2026-01-05", "count": 12, "data": {"en-US": 8, "fr": 4}}"#,
        )
        .unwrap();
        assert_eq!(record.count, 12.0);
        match record.data {
            Some(Breakdown::Flat(map)) => assert_eq!(map["fr"], 4.0),
            other => panic!("unexpected breakdown: {other:?}"),
        }
    }

    #[test]
    fn day_record_parses_nested_app_versions() {
        let record: DayRecord = serde_json::from_str(
            r#"{"date": "2026-01-05", "count": 3, "data": {"firefox": {"12.0.1": 2, "13.0": 1}}}"#,
        )
        .unwrap();
        let flat = record.data.unwrap().flatten();
        assert_eq!(flat["firefox_12.0.1"], 2.0);
        assert_eq!(flat["firefox_13.0"], 1.0);
    }

    #[test]
    fn contribution_amounts_accept_strings() {
        let record: DayRecord = serde_json::from_str(
            r#"{"date": "2026-01-05", "count": 2, "total": "10.50", "average": 5.25}"#,
        )
        .unwrap();
        assert_eq!(record.total, Some(10.5));
        assert_eq!(record.average, Some(5.25));
    }

    #[test]
    fn store_round_trips_with_date_keys() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let mut store = StatsStore::default();
        let series = store.series.entry("downloads".into()).or_default();
        series.days.insert(date, DayRecord::new(date, 4.0));
        series.mindate = Some(date);
        series.maxdate = Some(date);

        let json = serde_json::to_string(&store).unwrap();
        assert!(json.contains("\"2026-01-05\""));
        let back: StatsStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, store);
    }
}
