use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Extension, Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use posbridge_cache::{CacheHealth, LocationTimestamps, RefreshOutcome};
use posbridge_core::{BusinessTimestamps, StoreConfig};
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState, ResponseMeta, LOCATION_TOKEN_HEADER};

#[derive(Debug, Deserialize)]
pub(super) struct ListStoresQuery {
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct TimestampsQuery {
    /// RFC 3339 instant; defaults to now.
    pub at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StoreLookupItem {
    #[serde(flatten)]
    pub store: StoreConfig,
    /// Wall-clock time at the location; absent when its zone is invalid.
    #[serde(serialize_with = "serialize_local", skip_serializing_if = "Option::is_none")]
    pub local_time: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_now: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BusinessTimestampsItem {
    pub store_id: String,
    pub timezone: String,
    #[serde(flatten)]
    pub timestamps: BusinessTimestamps,
    pub modified_time_with_offset: String,
    pub business_day_start: DateTime<Utc>,
    pub business_day_end: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RefreshItem {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<usize>,
    pub cache: CacheHealth,
}

#[allow(clippy::ref_option)]
fn serialize_local<S: serde::Serializer>(
    value: &Option<NaiveDateTime>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(local) => s.collect_str(&local.format("%Y-%m-%dT%H:%M:%S")),
        None => s.serialize_none(),
    }
}

fn location_token(headers: &HeaderMap, request_id: &str) -> Result<String, ApiError> {
    headers
        .get(LOCATION_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            ApiError::new(
                request_id,
                "bad_request",
                format!("missing {LOCATION_TOKEN_HEADER} header"),
            )
        })
}

fn not_found(request_id: String) -> ApiError {
    ApiError::new(request_id, "not_found", "no store configured for this location token")
}

pub(super) async fn list_stores(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(params): Query<ListStoresQuery>,
) -> Json<ApiResponse<Vec<StoreConfig>>> {
    let data = match params.state.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => state.service.list_by_state(code).await,
        _ => state.service.list_active().await,
    };

    Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    })
}

pub(super) async fn lookup_store(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<StoreLookupItem>>, ApiError> {
    let token = location_token(&headers, &req_id.0)?;
    let Some(store) = state.service.get(&token).await else {
        return Err(not_found(req_id.0));
    };

    let local_time = state
        .service
        .resolver()
        .local_time(&store.timezone, state.service.now())
        .ok();
    let open_now = local_time.map(|local| store.is_open_at(local));

    Ok(Json(ApiResponse {
        data: StoreLookupItem {
            store,
            local_time,
            open_now,
        },
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn lookup_business_timestamps(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(params): Query<TimestampsQuery>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<BusinessTimestampsItem>>, ApiError> {
    let token = location_token(&headers, &req_id.0)?;
    let instant = match params.at.as_deref() {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                ApiError::new(
                    req_id.0.clone(),
                    "validation_error",
                    format!("`at` must be an RFC 3339 timestamp: {e}"),
                )
            })?,
        None => state.service.now(),
    };

    let Some(resolved) = state
        .service
        .business_timestamps(&token, instant)
        .await
        .map_err(|e| ApiError::new(req_id.0.clone(), "invalid_timezone", e.to_string()))?
    else {
        return Err(not_found(req_id.0));
    };
    let LocationTimestamps {
        store,
        timestamps,
        business_day_start,
        business_day_end,
    } = resolved;

    Ok(Json(ApiResponse {
        data: BusinessTimestampsItem {
            store_id: store.id,
            timezone: store.timezone,
            modified_time_with_offset: timestamps.modified_time_with_offset(),
            timestamps,
            business_day_start,
            business_day_end,
        },
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn refresh_stores(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<RefreshItem>>, ApiError> {
    let (outcome, entities) = match state.service.refresh_cache().await {
        RefreshOutcome::Refreshed { entities } => ("refreshed", Some(entities)),
        RefreshOutcome::NotDue => ("not_due", None),
        RefreshOutcome::Failed(e) => {
            return Err(ApiError::new(req_id.0, "refresh_failed", e.to_string()));
        }
    };

    Ok(Json(ApiResponse {
        data: RefreshItem {
            outcome,
            entities,
            cache: state.service.health(),
        },
        meta: ResponseMeta::new(req_id.0),
    }))
}
