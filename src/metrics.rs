use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a metric's days combine into a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Sum,
    Mean,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Shape {
    #[default]
    Plain,
    /// Days carry a `data` map of breakdown fields.
    Breakdown,
    /// Days carry `total` and `average` contribution amounts.
    Contributions,
    /// Rows are not keyed by day; `key` names the breakdown column.
    NonDate { key: String },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricSpec {
    pub aggregation: Aggregation,
    pub shape: Shape,
    /// Breakdown fields averaged regardless of `aggregation`. When set, no
    /// other breakdown field is averaged.
    pub averaged_fields: Option<Vec<String>>,
    pub currency: bool,
}

impl MetricSpec {
    pub fn sum() -> Self {
        Self::default()
    }

    pub fn mean() -> Self {
        Self {
            aggregation: Aggregation::Mean,
            ..Self::default()
        }
    }

    pub fn breakdown(mut self) -> Self {
        self.shape = Shape::Breakdown;
        self
    }

    pub fn currency(mut self) -> Self {
        self.currency = true;
        self
    }

    pub fn is_breakdown(&self) -> bool {
        self.shape == Shape::Breakdown
    }
}

/// Static description of every metric the dashboard knows about.
#[derive(Debug, Clone, Default)]
pub struct MetricTable {
    specs: BTreeMap<String, MetricSpec>,
}

impl MetricTable {
    /// Add-ons site metrics.
    pub fn addons() -> Self {
        Self::default()
            .with("downloads", MetricSpec::sum())
            .with("usage", MetricSpec::mean())
            .with("apps", MetricSpec::mean().breakdown())
            .with("locales", MetricSpec::mean().breakdown())
            .with("os", MetricSpec::mean().breakdown())
            .with("versions", MetricSpec::mean().breakdown())
            .with("statuses", MetricSpec::mean().breakdown())
            .with("sources", MetricSpec::sum().breakdown())
            .with("site", MetricSpec::sum().breakdown())
            .with(
                "overview",
                MetricSpec {
                    averaged_fields: Some(vec!["updates".to_string()]),
                    ..MetricSpec::sum().breakdown()
                },
            )
            .with(
                "contributions",
                MetricSpec {
                    shape: Shape::Contributions,
                    ..MetricSpec::sum().currency()
                },
            )
    }

    /// Marketplace metrics: the add-ons set plus revenue reports.
    pub fn marketplace() -> Self {
        let mut table = Self::addons();
        for suffix in ["", "_inapp"] {
            table = table.with(&format!("revenue{suffix}"), MetricSpec::sum().currency());
            for (prefix, key) in [("currency", "currency"), ("source", "source")] {
                for report in ["revenue", "sales", "refunds"] {
                    let spec = MetricSpec {
                        shape: Shape::NonDate {
                            key: key.to_string(),
                        },
                        currency: report == "revenue",
                        ..MetricSpec::sum()
                    };
                    table = table.with(&format!("{prefix}_{report}{suffix}"), spec);
                }
            }
        }
        table
    }

    pub fn with(mut self, metric: &str, spec: MetricSpec) -> Self {
        self.specs.insert(metric.to_string(), spec);
        self
    }

    /// Unknown metrics are plain sums.
    pub fn spec(&self, metric: &str) -> MetricSpec {
        self.specs.get(metric).cloned().unwrap_or_default()
    }

    pub fn is_breakdown(&self, metric: &str) -> bool {
        self.specs.get(metric).is_some_and(MetricSpec::is_breakdown)
    }

    pub fn is_non_date(&self, metric: &str) -> bool {
        self.non_date_key(metric).is_some()
    }

    /// Column a non-date report is broken down by.
    pub fn non_date_key(&self, metric: &str) -> Option<&str> {
        match &self.specs.get(metric)?.shape {
            Shape::NonDate { key } => Some(key.as_str()),
            _ => None,
        }
    }

    pub fn is_currency(&self, metric: &str) -> bool {
        self.specs.get(metric).is_some_and(|spec| spec.currency)
    }

    /// Human label for a field. The part before the first `_` is looked up in
    /// the metric's label table and the rest is appended, so
    /// `{ec8030f7-...}_12.0` under `apps` reads "Firefox 12.0".
    pub fn pretty_name(&self, metric: &str, field: &str) -> String {
        let metric = metric.strip_suffix("_inapp").unwrap_or(metric);
        let (key, rest) = match field.split_once('_') {
            Some((key, rest)) => (key, rest.replace('_', " ")),
            None => (field, String::new()),
        };
        match label(metric, key) {
            Some(label) => format!("{label} {rest}").trim().to_string(),
            None => field.to_string(),
        }
    }

    /// Sources sharing a label collapse onto the first source listed with it.
    pub fn canonical_source<'a>(&self, source: &'a str) -> &'a str {
        label("sources", source)
            .and_then(first_source_with_label)
            .unwrap_or(source)
    }
}

fn first_source_with_label(wanted: &str) -> Option<&'static str> {
    SOURCE_LABELS
        .iter()
        .find(|(_, name)| *name == wanted)
        .map(|(key, _)| *key)
}

fn label(metric: &str, key: &str) -> Option<&'static str> {
    let table = match metric {
        "sources" => SOURCE_LABELS,
        "apps" => APP_LABELS,
        other => LABELS
            .iter()
            .find(|(name, _)| *name == other)
            .map(|(_, fields)| *fields)?,
    };
    table
        .iter()
        .find(|(field, _)| *field == key)
        .map(|(_, name)| *name)
}

const LABELS: &[(&str, &[(&str, &str)])] = &[
    ("downloads", &[("count", "Downloads")]),
    ("usage", &[("count", "Daily Users")]),
    ("collections_created", &[("count", "Collections Created")]),
    ("addons_in_use", &[("count", "Add-ons in Use")]),
    ("addons_created", &[("count", "Add-ons Created")]),
    ("addons_downloaded", &[("count", "Add-ons Downloaded")]),
    ("addons_updated", &[("count", "Add-ons Updated")]),
    ("reviews_created", &[("count", "Reviews Written")]),
    ("users_created", &[("count", "User Signups")]),
    ("subscribers", &[("count", "Subscribers")]),
    ("ratings", &[("count", "Ratings")]),
    ("sales", &[("count", "Sales")]),
    ("installs", &[("count", "Installs")]),
    (
        "contributions",
        &[
            ("count", "Number of Contributions"),
            ("total", "Total Amount Contributed"),
            ("average", "Average Contribution"),
        ],
    ),
    (
        "overview",
        &[("downloads", "Downloads"), ("updates", "Daily Users")],
    ),
    (
        "app_overview",
        &[("installs", "Installs"), ("sales", "Sales"), ("usage", "Usage")],
    ),
];

const APP_LABELS: &[(&str, &str)] = &[
    ("{ec8030f7-c20a-464f-9b0e-13a3a9e97384}", "Firefox"),
    ("{86c18b42-e466-45a9-ae7a-9b95ba6f5640}", "Mozilla"),
    ("{3550f703-e582-4d05-9a08-453d09bdfdc6}", "Thunderbird"),
    ("{718e30fb-e89b-41dd-9da7-e25a45638b28}", "Sunbird"),
    ("{92650c4d-4b8e-4d2a-b7eb-24ecf4f6b63a}", "SeaMonkey"),
    ("{a23983c0-fd0e-11dc-95ff-0800200c9a66}", "Fennec"),
    ("{aa3c5121-dab2-40e2-81ca-7ea25febc110}", "Android"),
];

const SOURCE_LABELS: &[(&str, &str)] = &[
    ("null", "Unknown"),
    ("api", "Add-ons Manager"),
    ("discovery-promo", "Add-ons Manager Promo"),
    ("discovery-featured", "Add-ons Manager Featured"),
    ("discovery-learnmore", "Add-ons Manager Learn More"),
    ("ss", "Search Suggestions"),
    ("search", "Search Results"),
    ("homepagepromo", "Homepage Promo"),
    ("hp-btn-promo", "Homepage Promo"),
    ("hp-dl-promo", "Homepage Promo"),
    ("hp-hc-featured", "Homepage Featured"),
    ("hp-dl-featured", "Homepage Featured"),
    ("hp-hc-upandcoming", "Homepage Up and Coming"),
    ("hp-dl-upandcoming", "Homepage Up and Coming"),
    ("hp-dl-mostpopular", "Homepage Most Popular"),
    ("dp-btn-primary", "Detail Page"),
    ("dp-btn-version", "Detail Page (bottom)"),
    ("addondetail", "Detail Page"),
    ("addon-detail-version", "Detail Page (bottom)"),
    ("dp-btn-devchannel", "Detail Page (Development Channel)"),
    ("oftenusedwith", "Often Used With"),
    ("dp-hc-oftenusedwith", "Often Used With"),
    ("dp-dl-oftenusedwith", "Often Used With"),
    ("dp-hc-othersby", "Others By Author"),
    ("dp-dl-othersby", "Others By Author"),
    ("dp-hc-dependencies", "Dependencies"),
    ("dp-dl-dependencies", "Dependencies"),
    ("dp-hc-upsell", "Upsell"),
    ("dp-dl-upsell", "Upsell"),
    ("developers", "Meet the Developer"),
    ("userprofile", "User Profile"),
    ("version-history", "Version History"),
    ("sharingapi", "Sharing"),
    ("category", "Category Pages"),
    ("collection", "Collections"),
    ("cb-hc-featured", "Category Landing Featured Carousel"),
    ("cb-hc-toprated", "Category Landing Top Rated"),
    ("cb-dl-toprated", "Category Landing Top Rated"),
    ("cb-hc-mostpopular", "Category Landing Most Popular"),
    ("cb-dl-mostpopular", "Category Landing Most Popular"),
    ("cb-hc-recentlyadded", "Category Landing Recently Added"),
    ("cb-dl-recentlyadded", "Category Landing Recently Added"),
    ("cb-btn-featured", "Browse Listing Featured Sort"),
    ("cb-dl-featured", "Browse Listing Featured Sort"),
    ("cb-btn-users", "Browse Listing Users Sort"),
    ("cb-dl-users", "Browse Listing Users Sort"),
    ("cb-btn-rating", "Browse Listing Rating Sort"),
    ("cb-dl-rating", "Browse Listing Rating Sort"),
    ("cb-btn-created", "Browse Listing Created Sort"),
    ("cb-dl-created", "Browse Listing Created Sort"),
    ("cb-btn-name", "Browse Listing Name Sort"),
    ("cb-dl-name", "Browse Listing Name Sort"),
    ("cb-btn-popular", "Browse Listing Popular Sort"),
    ("cb-dl-popular", "Browse Listing Popular Sort"),
    ("cb-btn-updated", "Browse Listing Updated Sort"),
    ("cb-dl-updated", "Browse Listing Updated Sort"),
    ("cb-btn-hotness", "Browse Listing Up and Coming Sort"),
    ("cb-dl-hotness", "Browse Listing Up and Coming Sort"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_kinds_follow_the_table() {
        let table = MetricTable::addons();
        assert_eq!(table.spec("usage").aggregation, Aggregation::Mean);
        assert_eq!(table.spec("downloads").aggregation, Aggregation::Sum);
        assert_eq!(table.spec("not-a-metric").aggregation, Aggregation::Sum);
        assert!(table.is_breakdown("apps"));
        assert!(!table.is_breakdown("downloads"));
    }

    #[test]
    fn marketplace_adds_non_date_revenue_reports() {
        let table = MetricTable::marketplace();
        assert!(table.is_non_date("currency_revenue"));
        assert!(table.is_non_date("source_refunds_inapp"));
        assert_eq!(table.non_date_key("source_refunds_inapp"), Some("source"));
        assert_eq!(table.non_date_key("currency_sales"), Some("currency"));
        assert_eq!(table.non_date_key("revenue"), None);
        assert!(table.is_currency("revenue_inapp"));
        assert!(!table.is_currency("currency_sales"));
        assert!(!MetricTable::addons().is_non_date("currency_revenue"));
    }

    #[test]
    fn pretty_names_append_the_remainder() {
        let table = MetricTable::addons();
        assert_eq!(table.pretty_name("downloads", "count"), "Downloads");
        assert_eq!(
            table.pretty_name("apps", "{ec8030f7-c20a-464f-9b0e-13a3a9e97384}_12.0"),
            "Firefox 12.0"
        );
        assert_eq!(table.pretty_name("sources", "hp-dl-promo"), "Homepage Promo");
        assert_eq!(table.pretty_name("sales_inapp", "count"), "Sales");
        assert_eq!(table.pretty_name("locales", "en-US"), "en-US");
    }

    #[test]
    fn sources_with_one_label_share_a_key() {
        let table = MetricTable::addons();
        assert_eq!(table.canonical_source("hp-dl-promo"), "homepagepromo");
        assert_eq!(table.canonical_source("homepagepromo"), "homepagepromo");
        assert_eq!(table.canonical_source("api"), "api");
        assert_eq!(table.canonical_source("made-up"), "made-up");
    }
}
