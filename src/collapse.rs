use crate::metrics::MetricTable;
use crate::models::{Breakdown, DayRecord};
use std::collections::BTreeMap;

/// Rounds application version keys to `precision` dotted components and sums
/// whatever collides. Precision 0 folds every version of an app together.
///
/// Accepts both the nested `app -> version -> value` shape the server sends
/// and the flat `{app}_{version}` shape this function produces.
pub fn collapse_versions(record: &DayRecord, precision: usize) -> DayRecord {
    let mut collapsed: BTreeMap<String, f64> = BTreeMap::new();
    match &record.data {
        Some(Breakdown::Nested(apps)) => {
            for (app, versions) in apps {
                for (version, value) in versions {
                    *collapsed
                        .entry(version_key(app, version, precision))
                        .or_default() += value;
                }
            }
        }
        Some(Breakdown::Flat(flat)) => {
            for (key, value) in flat {
                let (app, version) = key.split_once('_').unwrap_or((key.as_str(), ""));
                *collapsed
                    .entry(version_key(app, version, precision))
                    .or_default() += value;
            }
        }
        None => {}
    }

    DayRecord {
        data: Some(Breakdown::Flat(collapsed)),
        ..record.clone()
    }
}

fn version_key(app: &str, version: &str, precision: usize) -> String {
    let truncated: Vec<&str> = version.split('.').take(precision).collect();
    format!("{app}_{}", truncated.join("."))
}

/// Merges download sources that display under the same label.
pub fn collapse_sources(record: &DayRecord, table: &MetricTable) -> DayRecord {
    let Some(data) = &record.data else {
        return record.clone();
    };

    let mut collapsed: BTreeMap<String, f64> = BTreeMap::new();
    for (source, value) in data.flatten() {
        *collapsed
            .entry(table.canonical_source(&source).to_string())
            .or_default() += value;
    }

    DayRecord {
        data: Some(Breakdown::Flat(collapsed)),
        ..record.clone()
    }
}

/// Applies the per-metric collapse a row gets before it is shown.
pub fn prepare_row(
    metric: &str,
    record: &DayRecord,
    table: &MetricTable,
    precision: usize,
) -> DayRecord {
    match metric {
        "apps" => collapse_versions(record, precision),
        "sources" => collapse_sources(record, table),
        _ => record.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn apps_row() -> DayRecord {
        let json = r#"{
            "date": "2026-01-05",
            "count": 60,
            "data": {
                "firefox": {"12.0.1": 10, "12.0.2": 5, "13.0": 20},
                "android": {"4.1": 25}
            }
        }"#;
        serde_json::from_str(json).unwrap()
    }

    fn flat(record: &DayRecord) -> BTreeMap<String, f64> {
        match &record.data {
            Some(Breakdown::Flat(map)) => map.clone(),
            other => panic!("expected a flat breakdown, got {other:?}"),
        }
    }

    #[test]
    fn precision_two_merges_patch_releases() {
        let collapsed = flat(&collapse_versions(&apps_row(), 2));
        assert_eq!(collapsed["firefox_12.0"], 15.0);
        assert_eq!(collapsed["firefox_13.0"], 20.0);
        assert_eq!(collapsed["android_4.1"], 25.0);
        assert_eq!(collapsed.len(), 3);
    }

    #[test]
    fn precision_zero_folds_each_app() {
        let collapsed = flat(&collapse_versions(&apps_row(), 0));
        assert_eq!(collapsed["firefox_"], 35.0);
        assert_eq!(collapsed["android_"], 25.0);
        assert_eq!(collapsed.len(), 2);
    }

    #[test]
    fn collapsing_twice_is_a_no_op() {
        let once = collapse_versions(&apps_row(), 2);
        let twice = collapse_versions(&once, 2);
        assert_eq!(once, twice);

        let zero = collapse_versions(&apps_row(), 0);
        assert_eq!(collapse_versions(&zero, 0), zero);
    }

    #[test]
    fn collapse_keeps_the_day_and_count() {
        let collapsed = collapse_versions(&apps_row(), 1);
        assert_eq!(collapsed.date, NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        assert_eq!(collapsed.count, 60.0);
        assert_eq!(flat(&collapsed)["firefox_12"], 15.0);
    }

    #[test]
    fn sources_with_the_same_label_are_summed() {
        let row: DayRecord = serde_json::from_str(
            r#"{"date": "2026-01-05", "count": 9,
                "data": {"homepagepromo": 1, "hp-btn-promo": 2, "hp-dl-promo": 3, "api": 3}}"#,
        )
        .unwrap();
        let collapsed = flat(&collapse_sources(&row, &MetricTable::addons()));
        assert_eq!(collapsed["homepagepromo"], 6.0);
        assert_eq!(collapsed["api"], 3.0);
        assert_eq!(collapsed.len(), 2);
    }

    #[test]
    fn other_metrics_pass_through() {
        let row = DayRecord::new(NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(), 4.0);
        assert_eq!(prepare_row("downloads", &row, &MetricTable::addons(), 2), row);
    }
}
