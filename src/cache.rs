use crate::collapse::prepare_row;
use crate::config::CacheConfig;
use crate::errors::StatsError;
use crate::fetch::{FetchOutcome, SeriesFetcher};
use crate::metrics::MetricTable;
use crate::models::{
    DataRange, DataReady, DayRecord, MetricSeries, SiteEvent, StatsStore, Summary, ViewData,
    ViewState,
};
use crate::range::DateRange;
use crate::stats;
use crate::storage::{cache_key, KeyValueStore, VERSION_KEY};
use chrono::NaiveDate;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Result of [`StatsCache::load_view`].
#[derive(Debug, Clone, PartialEq)]
pub enum ViewOutcome {
    Ready(DataReady),
    /// A newer view was requested while this one was loading.
    Superseded,
}

/// Day-keyed stats cache that fetches only what it is missing.
#[derive(Clone)]
pub struct StatsCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: CacheConfig,
    table: MetricTable,
    fetcher: Arc<dyn SeriesFetcher>,
    store: Arc<dyn KeyValueStore>,
    data: Mutex<StatsStore>,
    pending_write: Mutex<Option<PendingWrite>>,
    /// Held across every store write or removal of the persisted blob.
    io: Mutex<()>,
    generation: AtomicU64,
}

/// A debounced write. It can be called off while it waits, but once it has
/// started writing it runs to the end.
struct PendingWrite {
    handle: JoinHandle<()>,
    cancel: Arc<Notify>,
}

impl PendingWrite {
    /// Calls the write off if it is still waiting, and returns once it is
    /// done either way.
    async fn settle(self) {
        self.cancel.notify_one();
        if let Err(err) = self.handle.await {
            error!("pending stats write failed: {err}");
        }
    }
}

impl StatsCache {
    /// Loads the persisted store, discarding it when its schema version tag
    /// does not match `config.schema_version`.
    pub async fn open(
        config: CacheConfig,
        table: MetricTable,
        fetcher: Arc<dyn SeriesFetcher>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, StatsError> {
        let data = load_store(&config, store.as_ref()).await?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                table,
                fetcher,
                store,
                data: Mutex::new(data),
                pending_write: Mutex::new(None),
                io: Mutex::new(()),
                generation: AtomicU64::new(0),
            }),
        })
    }

    /// Makes sure every day of `range` the server can supply is cached, then
    /// returns the cached rows. At most two fetches run, concurrently.
    pub async fn get_data_range(&self, metric: &str, range: DateRange) -> Result<DataRange, StatsError> {
        if self.inner.table.is_non_date(metric) {
            return self.non_date_range(metric, range).await;
        }

        let gaps = {
            let data = self.inner.data.lock().await;
            match data.series.get(metric) {
                Some(series) => series.missing(range),
                None => MetricSeries::default().missing(range),
            }
        };
        if gaps.is_empty() {
            debug!(metric, "all data found locally");
        }
        try_join_all(gaps.into_iter().map(|gap| self.fill(metric, gap))).await?;

        let precision = self.inner.config.version_precision;
        let data = self.inner.data.lock().await;
        let rows: BTreeMap<NaiveDate, DayRecord> = data
            .series
            .get(metric)
            .map(|series| {
                series
                    .rows_in(range)
                    .map(|row| (row.date, prepare_row(metric, row, &self.inner.table, precision)))
                    .collect()
            })
            .unwrap_or_default();

        Ok(DataRange::Dated {
            metric: metric.to_string(),
            range,
            rows,
        })
    }

    /// Groups a range result per the view. The view's group is rewritten
    /// when it had to fall back to days.
    pub fn group_data(&self, result: DataRange, view: &mut ViewState) -> ViewData {
        match result {
            DataRange::Dated { rows, range, .. } => {
                ViewData::Grouped(stats::group_data(&rows, range, view, &self.inner.table))
            }
            DataRange::NonDate {
                metric,
                key,
                rows,
                empty,
            } => ViewData::NonDate {
                metric,
                key,
                rows,
                empty,
            },
        }
    }

    /// Field identifiers for the view's metric, busiest first.
    pub async fn available_fields(&self, view: &ViewState, today: NaiveDate) -> Result<Vec<String>, StatsError> {
        let range = view.range.normalize(today);
        let data = self.inner.data.lock().await;
        let empty = BTreeMap::new();
        let rows = match data.series.get(&view.metric) {
            Some(series) => &series.days,
            None if self.inner.table.is_breakdown(&view.metric) => {
                return Err(StatsError::NotCached(view.metric.clone()));
            }
            None => &empty,
        };
        Ok(stats::available_fields(
            &view.metric,
            rows,
            range,
            &self.inner.table,
            self.inner.config.version_precision,
        ))
    }

    pub fn pretty_name(&self, metric: &str, field: &str) -> String {
        self.inner.table.pretty_name(metric, field)
    }

    /// Sum and mean of one field over a range, fetching what is missing.
    pub async fn summarize(&self, metric: &str, field: &str, range: DateRange) -> Result<Option<Summary>, StatsError> {
        if self.inner.table.is_non_date(metric) {
            return Ok(None);
        }
        self.get_data_range(metric, range).await?;
        let data = self.inner.data.lock().await;
        Ok(data
            .series
            .get(metric)
            .and_then(|series| {
                stats::summarize(
                    metric,
                    &series.days,
                    range,
                    field,
                    &self.inner.table,
                    self.inner.config.version_precision,
                )
            }))
    }

    /// Site events for a range. Failing to load them is not worth failing a
    /// chart over, so errors come back as no events.
    pub async fn site_events(&self, range: DateRange) -> Vec<SiteEvent> {
        match self.inner.fetcher.fetch_events(range).await {
            Ok(events) => events,
            Err(err) => {
                warn!("failed to load site events: {err}");
                Vec::new()
            }
        }
    }

    /// Everything the chart needs for `view`, unless a newer call to this
    /// method started before this one finished.
    pub async fn load_view(&self, view: ViewState, today: NaiveDate) -> Result<ViewOutcome, StatsError> {
        let ticket = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ready = self.view_data(view, today).await?;
        if self.inner.generation.load(Ordering::SeqCst) != ticket {
            debug!(metric = %ready.view.metric, "dropping stale view");
            return Ok(ViewOutcome::Superseded);
        }
        Ok(ViewOutcome::Ready(ready))
    }

    /// Fetches, groups and annotates the data for one view.
    pub async fn view_data(&self, mut view: ViewState, today: NaiveDate) -> Result<DataReady, StatsError> {
        let range = view.range.normalize(today);
        let (data, events) = tokio::join!(
            self.get_data_range(&view.metric, range),
            self.site_events(range)
        );
        let mut data = self.group_data(data?, &mut view);
        if let ViewData::Grouped(grouped) = &mut data {
            stats::annotate(&mut grouped.rows, &events);
        }
        let fields = self.available_fields(&view, today).await?;
        let currency = self.inner.table.is_currency(&view.metric);
        Ok(DataReady {
            view,
            fields,
            currency,
            data,
            events,
        })
    }

    /// Forgets everything, in memory and in storage.
    pub async fn clear_local_storage(&self) -> Result<(), StatsError> {
        let pending = self.inner.pending_write.lock().await.take();
        if let Some(pending) = pending {
            pending.settle().await;
        }
        let _io = self.inner.io.lock().await;
        *self.inner.data.lock().await = StatsStore::default();
        self.inner.store.remove(&cache_key(&self.inner.config.scope)).await?;
        self.inner.store.remove(VERSION_KEY).await?;
        info!("cleared local stats data");
        Ok(())
    }

    /// Writes the store out now instead of waiting for the debounce.
    pub async fn flush(&self) -> Result<(), StatsError> {
        let pending = self.inner.pending_write.lock().await.take();
        if let Some(pending) = pending {
            pending.settle().await;
        }
        self.inner.persist().await
    }

    pub async fn has_pending_write(&self) -> bool {
        self.inner
            .pending_write
            .lock()
            .await
            .as_ref()
            .is_some_and(|pending| !pending.handle.is_finished())
    }

    pub async fn series(&self, metric: &str) -> Option<MetricSeries> {
        self.inner.data.lock().await.series.get(metric).cloned()
    }

    async fn fill(&self, metric: &str, gap: DateRange) -> Result<(), StatsError> {
        let raw = self.fetch_with_retry(metric, gap).await?;
        let rows = raw
            .into_iter()
            .map(serde_json::from_value::<DayRecord>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| StatsError::Malformed {
                origin: format!("{metric} {}..{}", gap.start, gap.end),
                message: err.to_string(),
            })?;
        debug!(metric, start = %gap.start, end = %gap.end, rows = rows.len(), "merging fetched days");
        {
            let mut data = self.inner.data.lock().await;
            data.series
                .entry(metric.to_string())
                .or_default()
                .merge(gap, rows);
        }
        self.schedule_write().await;
        Ok(())
    }

    async fn non_date_range(&self, metric: &str, range: DateRange) -> Result<DataRange, StatsError> {
        let key = format!("{metric}-{}-{}", range.start, range.end);
        let cached = self.inner.data.lock().await.non_date.get(&key).cloned();
        let rows = match cached {
            Some(rows) => rows,
            None => {
                let rows = self.fetch_with_retry(metric, range).await?;
                self.inner
                    .data
                    .lock()
                    .await
                    .non_date
                    .insert(key, rows.clone());
                self.schedule_write().await;
                rows
            }
        };
        Ok(DataRange::NonDate {
            metric: metric.to_string(),
            key: self
                .inner
                .table
                .non_date_key(metric)
                .unwrap_or_default()
                .to_string(),
            empty: rows.is_empty(),
            rows,
        })
    }

    /// Repeats a fetch while the server says it is still processing, waiting
    /// as long as it asks, up to the configured number of attempts.
    async fn fetch_with_retry(&self, metric: &str, range: DateRange) -> Result<Vec<serde_json::Value>, StatsError> {
        let max_attempts = self.inner.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.inner.fetcher.fetch_series(metric, range).await? {
                FetchOutcome::Ready(rows) => return Ok(rows),
                FetchOutcome::Processing { retry_after } => {
                    if attempt == max_attempts {
                        break;
                    }
                    let delay = retry_after.unwrap_or(self.inner.config.default_retry);
                    info!(metric, attempt, delay_secs = delay.as_secs(), "stats still processing, retrying");
                    sleep(delay).await;
                }
            }
        }
        warn!(metric, attempts = max_attempts, "giving up on stats fetch");
        Err(StatsError::FetchTimedOut {
            metric: metric.to_string(),
            attempts: max_attempts,
        })
    }

    /// Pushes the pending write one debounce delay out.
    async fn schedule_write(&self) {
        let inner = Arc::clone(&self.inner);
        let delay = self.inner.config.write_delay;
        let cancel = Arc::new(Notify::new());
        let cancelled = Arc::clone(&cancel);
        let mut pending = self.inner.pending_write.lock().await;
        if let Some(previous) = pending.take() {
            // A write already under way finishes; the io lock orders it
            // before this one.
            previous.cancel.notify_one();
        }
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => {}
                _ = cancelled.notified() => return,
            }
            if let Err(err) = inner.persist().await {
                error!("failed to write stats cache: {err}");
            }
        });
        *pending = Some(PendingWrite { handle, cancel });
    }
}

impl Inner {
    async fn persist(&self) -> Result<(), StatsError> {
        let _io = self.io.lock().await;
        let payload = {
            let data = self.data.lock().await;
            serde_json::to_string(&*data)?
        };
        self.store
            .set(&cache_key(&self.config.scope), &payload)
            .await?;
        self.store.set(VERSION_KEY, &self.config.schema_version).await?;
        debug!(bytes = payload.len(), "saved local stats data");
        Ok(())
    }
}

async fn load_store(config: &CacheConfig, store: &dyn KeyValueStore) -> Result<StatsStore, StatsError> {
    let key = cache_key(&config.scope);
    let version = store.get(VERSION_KEY).await?;
    if version.as_deref() != Some(config.schema_version.as_str()) {
        info!(found = ?version, expected = %config.schema_version, "stats cache version mismatch, starting empty");
        store.remove(&key).await?;
        store.remove(VERSION_KEY).await?;
        return Ok(StatsStore::default());
    }

    match store.get(&key).await? {
        Some(blob) => match serde_json::from_str(&blob) {
            Ok(data) => {
                info!("loaded local stats data");
                Ok(data)
            }
            Err(err) => {
                error!("failed to parse local stats data: {err}");
                store.remove(&key).await?;
                Ok(StatsStore::default())
            }
        },
        None => Ok(StatsStore::default()),
    }
}
