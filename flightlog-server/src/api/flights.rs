//! Flight endpoints
//!
//! Flights are guarded by operation thresholds from the `permissions` table
//! rather than by per-record ownership.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use tracing::info;

use flightlog_common::access::{Permission, Principal};
use flightlog_common::models::{Flight, FlightInput};

use super::YearQuery;
use crate::error::ApiResult;
use crate::services::bulk_exporter::ExportAck;
use crate::services::flight_log::FlightPage;
use crate::services::reprocess::ReprocessReport;
use crate::AppState;

/// GET /flights?year=&page=
pub async fn list_flights(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<YearQuery>,
) -> ApiResult<Json<FlightPage>> {
    state.policy.require(&principal, Permission::FlightsList)?;
    let page = state
        .flight_log
        .list_by_year(query.year_or_current(), query.page.unwrap_or(1))
        .await?;
    Ok(Json(page))
}

/// GET /flights/years
pub async fn list_years(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<Vec<i32>>> {
    state.policy.require(&principal, Permission::FlightsList)?;
    Ok(Json(state.flight_log.distinct_years().await?))
}

/// GET /flights/:id
pub async fn get_flight(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Flight>> {
    state.policy.require(&principal, Permission::FlightsList)?;
    Ok(Json(state.flight_log.get(id).await?))
}

/// POST /flights
pub async fn create_flight(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(input): Json<FlightInput>,
) -> ApiResult<(StatusCode, Json<Flight>)> {
    state.policy.require(&principal, Permission::FlightsCreate)?;
    let flight = state.flight_log.create(input).await?;
    Ok((StatusCode::CREATED, Json(flight)))
}

/// PUT /flights/:id
pub async fn update_flight(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    Json(input): Json<FlightInput>,
) -> ApiResult<Json<Flight>> {
    state.policy.require(&principal, Permission::FlightsUpdate)?;
    Ok(Json(state.flight_log.update(id, input).await?))
}

/// DELETE /flights/:id
pub async fn delete_flight(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.policy.require(&principal, Permission::FlightsDelete)?;
    state.flight_log.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /flights/reprocess
pub async fn reprocess(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<ReprocessReport>> {
    state.policy.require(&principal, Permission::FlightsReprocess)?;
    info!(actor = principal.nip, "Currency rebuild requested");
    Ok(Json(state.reprocess.rebuild_all().await?))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub year: Option<i32>,
}

/// POST /flights/export?year=
///
/// Without a year every flight is exported.
pub async fn export(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<(StatusCode, Json<ExportAck>)> {
    state.policy.require(&principal, Permission::FlightsExport)?;

    if !state.exporter.is_enabled() {
        let ticket = state.exporter.export(Vec::new());
        return Ok((StatusCode::OK, Json(ticket.ack)));
    }

    let flights = match query.year {
        Some(year) => state.flight_log.flights_in_year(year).await?,
        None => state.flight_log.all_in_date_order().await?,
    };
    info!(actor = principal.nip, year = ?query.year, flights = flights.len(), "Bulk export requested");

    let ticket = state.exporter.export(flights);
    Ok((StatusCode::ACCEPTED, Json(ticket.ack)))
}
