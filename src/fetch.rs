use crate::errors::StatsError;
use crate::models::SiteEvent;
use crate::range::{url_date, DateRange};
use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Answer to one series request.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Ready(Vec<serde_json::Value>),
    /// The server accepted the request but has not rolled the data up yet.
    Processing { retry_after: Option<Duration> },
}

#[async_trait]
pub trait SeriesFetcher: Send + Sync {
    async fn fetch_series(&self, metric: &str, range: DateRange) -> Result<FetchOutcome, StatsError>;

    async fn fetch_events(&self, range: DateRange) -> Result<Vec<SiteEvent>, StatsError>;
}

pub fn series_url(base_url: &str, metric: &str, range: DateRange) -> String {
    format!(
        "{base_url}{metric}-day-{}-{}.json",
        url_date(range.start),
        url_date(range.end)
    )
}

pub fn events_url(base_url: &str, range: DateRange) -> String {
    format!(
        "{base_url}events-{}-{}.json",
        url_date(range.start),
        url_date(range.end)
    )
}

/// Fetches series from the stats JSON endpoints.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
    events_url: Option<String>,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>, events_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            events_url,
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, StatsError> {
        debug!(%url, "GET");
        self.client
            .get(url)
            .send()
            .await
            .map_err(|err| StatsError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        url: &str,
        response: reqwest::Response,
    ) -> Result<T, StatsError> {
        let body = response.text().await.map_err(|err| StatsError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        serde_json::from_str(&body).map_err(|err| StatsError::Malformed {
            origin: url.to_string(),
            message: err.to_string(),
        })
    }
}

#[async_trait]
impl SeriesFetcher for HttpFetcher {
    async fn fetch_series(&self, metric: &str, range: DateRange) -> Result<FetchOutcome, StatsError> {
        let url = series_url(&self.base_url, metric, range);
        let response = self.get(&url).await?;
        match response.status() {
            StatusCode::OK => Ok(FetchOutcome::Ready(Self::read_json(&url, response).await?)),
            StatusCode::ACCEPTED => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                Ok(FetchOutcome::Processing { retry_after })
            }
            status => Err(StatsError::Status {
                url,
                status: status.as_u16(),
            }),
        }
    }

    async fn fetch_events(&self, range: DateRange) -> Result<Vec<SiteEvent>, StatsError> {
        let Some(base_url) = &self.events_url else {
            return Ok(Vec::new());
        };
        let url = events_url(base_url, range);
        let response = self.get(&url).await?;
        if !response.status().is_success() {
            return Err(StatsError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        Self::read_json(&url, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::{header, StatusCode as AxumStatus},
        response::{IntoResponse, Response},
        routing::get,
        Router,
    };
    use chrono::NaiveDate;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        )
    }

    #[test]
    fn series_urls_carry_metric_and_days() {
        assert_eq!(
            series_url("/addon/12/statistics/", "downloads", range()),
            "/addon/12/statistics/downloads-day-20260101-20260131.json"
        );
    }

    #[test]
    fn events_urls_carry_days() {
        assert_eq!(
            events_url("/en-US/statistics/", range()),
            "/en-US/statistics/events-20260101-20260131.json"
        );
    }

    #[tokio::test]
    async fn events_are_skipped_without_a_url() {
        let fetcher = HttpFetcher::new("http://127.0.0.1:9/", None);
        assert!(fetcher.fetch_events(range()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let fetcher = HttpFetcher::new("http://127.0.0.1:9/", None);
        let err = fetcher.fetch_series("downloads", range()).await.unwrap_err();
        assert!(matches!(err, StatsError::Transport { .. }));
    }

    /// Answers by metric name: `pending` is still processing with a
    /// `Retry-After`, `waiting` without one, `garbled` sends a broken body.
    async fn upstream(Path(file): Path<String>) -> Response {
        let metric = file.split('-').next().unwrap_or_default();
        match metric {
            "pending" => (AxumStatus::ACCEPTED, [(header::RETRY_AFTER, "5")], "").into_response(),
            "waiting" => AxumStatus::ACCEPTED.into_response(),
            "garbled" => (AxumStatus::OK, "[{\"date\": ").into_response(),
            "events" => (AxumStatus::OK, r#"[{"start": "2026-01-02", "type": 1}]"#).into_response(),
            _ => (AxumStatus::OK, r#"[{"date": "2026-01-01", "count": 3}]"#).into_response(),
        }
    }

    async fn spawn_upstream() -> String {
        let app = Router::new().route("/statistics/:file", get(upstream));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/statistics/")
    }

    #[tokio::test]
    async fn accepted_answers_carry_the_retry_delay() {
        let base_url = spawn_upstream().await;
        let fetcher = HttpFetcher::new(base_url, None);

        assert_eq!(
            fetcher.fetch_series("pending", range()).await.unwrap(),
            FetchOutcome::Processing {
                retry_after: Some(Duration::from_secs(5))
            }
        );
        assert_eq!(
            fetcher.fetch_series("waiting", range()).await.unwrap(),
            FetchOutcome::Processing { retry_after: None }
        );
    }

    #[tokio::test]
    async fn ok_answers_are_parsed_or_rejected() {
        let base_url = spawn_upstream().await;
        let fetcher = HttpFetcher::new(base_url.clone(), Some(base_url));

        match fetcher.fetch_series("downloads", range()).await.unwrap() {
            FetchOutcome::Ready(rows) => assert_eq!(rows[0]["count"], 3),
            other => panic!("expected rows, got {other:?}"),
        }
        let err = fetcher.fetch_series("garbled", range()).await.unwrap_err();
        assert!(matches!(err, StatsError::Malformed { .. }));

        let events = fetcher.fetch_events(range()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, 1);
    }
}
