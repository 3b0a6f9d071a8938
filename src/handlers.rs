use crate::errors::AppError;
use crate::models::{DataReady, PrettyNameResponse, StatsQuery, SummaryResponse, ViewState};
use crate::range::{RangeSpec, MAX_RELATIVE_DAYS};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Local, NaiveDate};

pub async fn health() -> &'static str {
    "ok"
}

pub async fn get_stats(
    State(state): State<AppState>,
    Path(metric): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<DataReady>, AppError> {
    let view = to_view(metric, &query)?;
    let ready = state.cache.view_data(view, today()).await?;
    Ok(Json(ready))
}

pub async fn get_fields(
    State(state): State<AppState>,
    Path(metric): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Vec<String>>, AppError> {
    let view = to_view(metric, &query)?;
    let today = today();
    state
        .cache
        .get_data_range(&view.metric, view.range.normalize(today))
        .await?;
    Ok(Json(state.cache.available_fields(&view, today).await?))
}

pub async fn get_summary(
    State(state): State<AppState>,
    Path(metric): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<SummaryResponse>, AppError> {
    let field = query.field.clone().unwrap_or_else(|| "count".to_string());
    let view = to_view(metric, &query)?;
    let range = view.range.normalize(today());
    let summary = state.cache.summarize(&view.metric, &field, range).await?;

    Ok(Json(SummaryResponse {
        metric: view.metric,
        field,
        sum: summary.map(|summary| summary.sum),
        mean: summary.map(|summary| summary.mean),
        nodata: summary.is_none(),
    }))
}

pub async fn get_pretty_name(
    State(state): State<AppState>,
    Path((metric, field)): Path<(String, String)>,
) -> Json<PrettyNameResponse> {
    let name = state.cache.pretty_name(&metric, &field);
    Json(PrettyNameResponse { metric, field, name })
}

pub async fn clear_cache(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.cache.clear_local_storage().await?;
    Ok(StatusCode::NO_CONTENT)
}

fn to_view(metric: String, query: &StatsQuery) -> Result<ViewState, AppError> {
    let metric = metric.trim().to_string();
    if metric.is_empty() {
        return Err(AppError::bad_request("metric is required"));
    }

    let range = match (query.start, query.end) {
        (Some(start), Some(end)) => {
            if end < start {
                return Err(AppError::bad_request("end must not be before start"));
            }
            RangeSpec::Absolute { start, end }
        }
        (None, None) => match query.range {
            Some(0) => return Err(AppError::bad_request("range must be at least one day")),
            Some(days) if days > MAX_RELATIVE_DAYS => {
                return Err(AppError::bad_request(format!(
                    "range must be at most {MAX_RELATIVE_DAYS} days"
                )));
            }
            Some(days) => RangeSpec::Relative { days },
            None => RangeSpec::default(),
        },
        _ => return Err(AppError::bad_request("start and end go together")),
    };

    Ok(ViewState::new(metric, range, query.group))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
