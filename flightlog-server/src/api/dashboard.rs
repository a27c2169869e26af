//! Dashboard read models

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;

use flightlog_common::access::{Permission, Principal};

use super::YearQuery;
use crate::error::ApiResult;
use crate::services::currency_projector::{ExpiringEntry, YearStatistics};
use crate::AppState;

const DEFAULT_EXPIRING_LIMIT: usize = 10;
const MAX_EXPIRING_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ExpiringQuery {
    pub limit: Option<usize>,
}

/// GET /dashboard/statistics?year=
pub async fn statistics(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<YearQuery>,
) -> ApiResult<Json<YearStatistics>> {
    state.policy.require(&principal, Permission::DashboardRead)?;
    Ok(Json(state.projector.year_statistics(query.year_or_current()).await?))
}

/// GET /dashboard/expiring-soon?limit=
pub async fn expiring_soon(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ExpiringQuery>,
) -> ApiResult<Json<Vec<ExpiringEntry>>> {
    state.policy.require(&principal, Permission::DashboardRead)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EXPIRING_LIMIT)
        .min(MAX_EXPIRING_LIMIT);
    Ok(Json(
        state
            .projector
            .expiring_soon(limit, flightlog_common::time::today())
            .await?,
    ))
}
