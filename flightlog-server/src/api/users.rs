//! Roster endpoints
//!
//! Crew targets are person targets: the gate compares the caller's level
//! against the member's stored level, and any role level being handed out
//! is capped at the caller's own.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use tracing::info;

use flightlog_common::access::{authorize, may_assign_level, Operation, Principal, Subject};
use flightlog_common::models::{CrewMember, CrewMemberPatch, NewCrewMember};
use flightlog_common::RoleLevel;

use crate::error::{ApiError, ApiResult};
use crate::services::currency_projector::CrewCurrency;
use crate::services::roster::BulkReport;
use crate::AppState;

fn check_assignment(principal: &Principal, level: RoleLevel) -> ApiResult<()> {
    if may_assign_level(principal, level) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "level {} may not assign role level {}",
            principal.level, level
        )))
    }
}

/// GET /users
pub async fn list_users(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
) -> ApiResult<Json<Vec<CrewMember>>> {
    Ok(Json(state.roster.list().await?))
}

/// GET /users/:nip
pub async fn get_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(nip): Path<i64>,
) -> ApiResult<Json<CrewMember>> {
    let member = state.roster.get(nip).await?;
    authorize(&principal, &Subject::crew(member.nip, member.role_level), Operation::Read)?;
    Ok(Json(member))
}

/// POST /users
pub async fn create_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(member): Json<NewCrewMember>,
) -> ApiResult<(StatusCode, Json<CrewMember>)> {
    authorize(&principal, &Subject::crew(member.nip, member.role_level), Operation::Create)?;
    check_assignment(&principal, member.role_level)?;

    let created = state.roster.create(member).await?;
    info!(actor = principal.nip, nip = created.nip, "Crew member created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /users/bulk
///
/// The whole request is refused when any entry fails the gate; past the gate
/// each insert stands on its own.
pub async fn bulk_create_users(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(members): Json<Vec<NewCrewMember>>,
) -> ApiResult<Json<BulkReport>> {
    for member in &members {
        authorize(&principal, &Subject::crew(member.nip, member.role_level), Operation::Create)?;
        check_assignment(&principal, member.role_level)?;
    }

    let report = state.roster.bulk_create(members).await;
    info!(
        actor = principal.nip,
        created = report.created,
        failed = report.failed,
        "Bulk crew import finished"
    );
    Ok(Json(report))
}

/// PATCH /users/:nip
pub async fn update_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(nip): Path<i64>,
    Json(patch): Json<CrewMemberPatch>,
) -> ApiResult<Json<CrewMember>> {
    let existing = state.roster.get(nip).await?;
    authorize(&principal, &Subject::crew(existing.nip, existing.role_level), Operation::Modify)?;
    if let Some(level) = patch.role_level {
        check_assignment(&principal, level)?;
    }

    Ok(Json(state.roster.update(nip, patch).await?))
}

/// DELETE /users/:nip
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(nip): Path<i64>,
) -> ApiResult<StatusCode> {
    let existing = state.roster.get(nip).await?;
    authorize(&principal, &Subject::crew(existing.nip, existing.role_level), Operation::Delete)?;

    state.roster.delete(nip).await?;
    info!(actor = principal.nip, nip, "Crew member deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /users/:nip/currency
pub async fn user_currency(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(nip): Path<i64>,
) -> ApiResult<Json<CrewCurrency>> {
    let member = state.roster.get(nip).await?;
    authorize(&principal, &Subject::crew(member.nip, member.role_level), Operation::Read)?;
    Ok(Json(
        state
            .projector
            .per_crew(nip, flightlog_common::time::today())
            .await?,
    ))
}
