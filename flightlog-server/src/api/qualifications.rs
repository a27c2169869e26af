//! Qualification catalog endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use flightlog_common::access::{Permission, Principal};
use flightlog_common::models::{NewQualification, Qualification, QualificationPatch};
use flightlog_common::CrewType;

use crate::error::ApiResult;
use crate::services::catalog::DeleteOutcome;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub crew_type: Option<CrewType>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub cascade: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub id: i64,
    pub outcome: DeleteOutcome,
}

/// GET /qualifications?crew_type=
pub async fn list_qualifications(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Qualification>>> {
    let list = match query.crew_type {
        Some(crew_type) => state.catalog.list_for_crew_type(crew_type).await?,
        None => state.catalog.list().await?,
    };
    Ok(Json(list))
}

/// GET /qualifications/:id
pub async fn get_qualification(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Qualification>> {
    Ok(Json(state.catalog.get(id).await?))
}

/// POST /qualifications
pub async fn create_qualification(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(def): Json<NewQualification>,
) -> ApiResult<(StatusCode, Json<Qualification>)> {
    state.policy.require(&principal, Permission::QualificationsWrite)?;
    let created = state.catalog.create(def).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PATCH /qualifications/:id
pub async fn update_qualification(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    Json(patch): Json<QualificationPatch>,
) -> ApiResult<Json<Qualification>> {
    state.policy.require(&principal, Permission::QualificationsWrite)?;
    Ok(Json(state.catalog.update(id, patch).await?))
}

/// DELETE /qualifications/:id?cascade=true
pub async fn delete_qualification(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Json<DeleteResponse>> {
    state.policy.require(&principal, Permission::QualificationsWrite)?;
    let outcome = state.catalog.delete(id, query.cascade).await?;
    Ok(Json(DeleteResponse { id, outcome }))
}
