//! Flight log
//!
//! Append, edit and retract flights with their ordered crew lists. Every write
//! commits the flight row, its participations and the resulting currency
//! changes in a single transaction:
//!
//! - create: insert, then forward-update the cited pairs
//! - update: replace the participation set, reconcile the pre-image and
//!   post-image pairs without this flight, then forward-update the post-image
//! - delete: remove the flight, then reconcile its pairs
//!
//! Committed writes are handed to the exporter when one is attached.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

use flightlog_common::models::{
    Flight, FlightFields, FlightInput, LandingCounts, Participation, QualificationRef,
    MAX_PARTICIPATION_QUALIFICATIONS,
};
use flightlog_common::time::{is_clock_time, year_bounds};
use flightlog_common::{CrewType, Error, FieldViolation, Result};

use super::bulk_exporter::BulkExporter;
use super::catalog::{Catalog, CatalogSnapshot};
use super::currency_index::{citation_keys, CitationKey, CurrencyIndex};
use super::SoftSkip;
use crate::pagination::{calculate_pagination, Pagination, PAGE_SIZE};

const FLIGHT_COLUMNS: &str = "id, airtask, flight_date, origin, destination, departure, arrival, duration, \
     flight_type, flight_action, tail, landings, passengers, doe, cargo, fuel, orm, num_crew, ops_timestamps";

const PARTICIPATION_COLUMNS: &str = "flight_id, crew_nip, position, day_landings, night_landings, prec_app, nprec_app, \
     qual1, qual2, qual3, qual4, qual5, qual6";

/// Max bound parameters per `IN (...)` list
const ID_CHUNK: usize = 500;

/// One page of a year's flights
#[derive(Debug, Clone, Serialize)]
pub struct FlightPage {
    pub year: i32,
    pub total: i64,
    #[serde(flatten)]
    pub pagination: Pagination,
    pub flights: Vec<Flight>,
}

#[derive(Clone)]
pub struct FlightLog {
    db: SqlitePool,
    catalog: Catalog,
    index: CurrencyIndex,
    exporter: Option<BulkExporter>,
}

impl FlightLog {
    pub fn new(db: SqlitePool, catalog: Catalog, index: CurrencyIndex) -> Self {
        Self {
            db,
            catalog,
            index,
            exporter: None,
        }
    }

    /// Ship every committed write to `exporter`
    pub fn with_exporter(mut self, exporter: BulkExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn index(&self) -> CurrencyIndex {
        self.index
    }

    pub async fn create(&self, input: FlightInput) -> Result<Flight> {
        validate_input(&input, self.index.epoch())?;
        let snapshot = self.catalog.snapshot().await?;

        let mut tx = self.db.begin().await?;
        let normalized = normalize(&mut tx, &input, &snapshot).await?;

        let id = insert_flight(&mut tx, &input.fields).await?;
        insert_participations(&mut tx, id, &normalized).await?;

        let keys = keys_of(&normalized, &snapshot);
        self.index.forward(&mut tx, input.fields.date, keys.iter().copied()).await?;
        tx.commit().await?;

        info!(
            flight_id = id,
            airtask = %input.fields.airtask,
            crew = normalized.len(),
            citations = keys.len(),
            "Flight created"
        );

        let flight = into_flight(id, input.fields, normalized);
        self.dispatch(&flight);
        Ok(flight)
    }

    pub async fn update(&self, id: i64, input: FlightInput) -> Result<Flight> {
        validate_input(&input, self.index.epoch())?;
        let snapshot = self.catalog.snapshot().await?;

        let mut tx = self.db.begin().await?;
        let before = fetch_flight(&mut tx, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("flight {id}")))?;
        let normalized = normalize(&mut tx, &input, &snapshot).await?;

        update_flight(&mut tx, id, &input.fields).await?;
        sqlx::query("DELETE FROM flight_pilots WHERE flight_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_participations(&mut tx, id, &normalized).await?;

        let post_keys = keys_of(&normalized, &snapshot);
        let mut affected = keys_of(&before.participations, &snapshot);
        affected.extend(post_keys.iter().copied());

        self.index.reconcile(&mut tx, id, &affected, &snapshot).await?;
        self.index
            .forward(&mut tx, input.fields.date, post_keys.iter().copied())
            .await?;
        tx.commit().await?;

        info!(flight_id = id, reconciled = affected.len(), "Flight updated");

        let flight = into_flight(id, input.fields, normalized);
        self.dispatch(&flight);
        Ok(flight)
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let snapshot = self.catalog.snapshot().await?;

        let mut tx = self.db.begin().await?;
        let before = fetch_flight(&mut tx, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("flight {id}")))?;
        let affected = keys_of(&before.participations, &snapshot);

        sqlx::query("DELETE FROM flights WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        self.index.reconcile(&mut tx, id, &affected, &snapshot).await?;
        tx.commit().await?;

        info!(flight_id = id, reconciled = affected.len(), "Flight deleted");
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Flight> {
        let mut conn = self.db.acquire().await?;
        fetch_flight(&mut conn, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("flight {id}")))
    }

    pub async fn count_by_year(&self, year: i32) -> Result<i64> {
        let (start, end) = bounds(year)?;
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM flights WHERE flight_date >= ? AND flight_date < ?")
            .bind(start)
            .bind(end)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    /// Most recent first, `PAGE_SIZE` per page
    pub async fn list_by_year(&self, year: i32, page: i64) -> Result<FlightPage> {
        let (start, end) = bounds(year)?;
        let total = self.count_by_year(year).await?;
        let pagination = calculate_pagination(total, page);

        let mut conn = self.db.acquire().await?;
        let rows = sqlx::query(&format!(
            "SELECT {FLIGHT_COLUMNS} FROM flights WHERE flight_date >= ? AND flight_date < ? \
             ORDER BY flight_date DESC, id DESC LIMIT ? OFFSET ?"
        ))
        .bind(start)
        .bind(end)
        .bind(PAGE_SIZE)
        .bind(pagination.offset)
        .fetch_all(&mut *conn)
        .await?;

        let flights = with_participations(&mut conn, rows).await?;
        Ok(FlightPage {
            year,
            total,
            pagination,
            flights,
        })
    }

    /// Calendar years that have flights, most recent first
    pub async fn distinct_years(&self) -> Result<Vec<i32>> {
        let years: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT CAST(strftime('%Y', flight_date) AS INTEGER) AS year FROM flights ORDER BY year DESC",
        )
        .fetch_all(&self.db)
        .await?;
        years
            .into_iter()
            .map(|y| i32::try_from(y).map_err(|_| Error::Internal(format!("year out of range: {y}"))))
            .collect()
    }

    /// Every flight ascending by date, id breaking ties
    pub async fn all_in_date_order(&self) -> Result<Vec<Flight>> {
        let mut conn = self.db.acquire().await?;
        let rows = sqlx::query(&format!(
            "SELECT {FLIGHT_COLUMNS} FROM flights ORDER BY flight_date, id"
        ))
        .fetch_all(&mut *conn)
        .await?;
        with_participations(&mut conn, rows).await
    }

    /// One year's flights ascending by date
    pub async fn flights_in_year(&self, year: i32) -> Result<Vec<Flight>> {
        let (start, end) = bounds(year)?;
        let mut conn = self.db.acquire().await?;
        let rows = sqlx::query(&format!(
            "SELECT {FLIGHT_COLUMNS} FROM flights WHERE flight_date >= ? AND flight_date < ? ORDER BY flight_date, id"
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&mut *conn)
        .await?;
        with_participations(&mut conn, rows).await
    }

    fn dispatch(&self, flight: &Flight) {
        if let Some(exporter) = &self.exporter {
            exporter.export_one(flight.clone());
        }
    }
}

// ========================================
// Validation and normalization
// ========================================

fn validate_input(input: &FlightInput, epoch: NaiveDate) -> Result<()> {
    let fields = &input.fields;
    let mut violations = Vec::new();

    let airtask = fields.airtask.trim();
    if airtask.is_empty() || airtask.chars().count() > 7 {
        violations.push(FieldViolation::new("airtask", "must be 1 to 7 characters"));
    }
    if fields.date <= epoch {
        violations.push(FieldViolation::new("date", format!("must be after {epoch}")));
    }
    for (name, value) in [("origin", &fields.origin), ("destination", &fields.destination)] {
        if value.trim().is_empty() {
            violations.push(FieldViolation::new(name, "must not be empty"));
        }
    }
    for (name, value) in [("departure", &fields.departure), ("arrival", &fields.arrival)] {
        if !is_clock_time(value) {
            violations.push(FieldViolation::new(name, "expected HH:MM"));
        }
    }
    if fields.flight_type.trim().is_empty() {
        violations.push(FieldViolation::new("type", "must not be empty"));
    }
    if fields.action.trim().is_empty() {
        violations.push(FieldViolation::new("action", "must not be empty"));
    }
    if fields.tail <= 0 {
        violations.push(FieldViolation::new("tail", "must be a positive number"));
    }
    for (name, value) in [
        ("landings", fields.landings),
        ("passengers", fields.passengers),
        ("doe", fields.doe),
        ("cargo", fields.cargo),
        ("fuel", fields.fuel),
        ("orm", fields.orm),
        ("num_crew", fields.num_crew),
    ] {
        if value < 0 {
            violations.push(FieldViolation::new(name, "must not be negative"));
        }
    }

    if input.participations.is_empty() {
        violations.push(FieldViolation::new("participations", "at least one crew member is required"));
    }
    let mut seen = HashSet::new();
    for (i, p) in input.participations.iter().enumerate() {
        if !seen.insert(p.nip) {
            violations.push(FieldViolation::new(
                format!("participations[{i}].nip"),
                format!("crew member {} appears more than once", p.nip),
            ));
        }
        if p.qualifications.len() > MAX_PARTICIPATION_QUALIFICATIONS {
            violations.push(FieldViolation::new(
                format!("participations[{i}].qualifications"),
                format!("at most {MAX_PARTICIPATION_QUALIFICATIONS} qualifications per crew member"),
            ));
        }
        let landings = [
            p.landings.day_landings,
            p.landings.night_landings,
            p.landings.prec_approaches,
            p.landings.non_prec_approaches,
        ];
        if landings.iter().flatten().any(|c| *c < 0) {
            violations.push(FieldViolation::new(
                format!("participations[{i}]"),
                "landing and approach counts must not be negative",
            ));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(violations))
    }
}

/// Resolve crew and qualification references; unresolved pieces are skipped
async fn normalize(
    conn: &mut SqliteConnection,
    input: &FlightInput,
    snapshot: &CatalogSnapshot,
) -> Result<Vec<Participation>> {
    let mut normalized = Vec::with_capacity(input.participations.len());

    for p in &input.participations {
        let Some(crew_type) = crew_type_of(conn, p.nip).await? else {
            SoftSkip::UnknownCrew { nip: p.nip }.log();
            continue;
        };

        let mut qualifications: Vec<i64> = Vec::with_capacity(p.qualifications.len());
        for reference in &p.qualifications {
            let resolved = match reference {
                QualificationRef::Id(id) => match snapshot.by_id(*id) {
                    Some(q) if q.applicable_to == crew_type => Some(q.id),
                    Some(q) => {
                        SoftSkip::NotApplicable {
                            nip: p.nip,
                            qual_id: q.id,
                            crew_type,
                        }
                        .log();
                        None
                    }
                    None => {
                        SoftSkip::UnknownQualification {
                            nip: p.nip,
                            reference: reference.clone(),
                        }
                        .log();
                        None
                    }
                },
                QualificationRef::Name(name) => {
                    let id = snapshot.resolve_name(name, crew_type);
                    if id.is_none() {
                        SoftSkip::UnknownQualification {
                            nip: p.nip,
                            reference: reference.clone(),
                        }
                        .log();
                    }
                    id
                }
            };

            if let Some(id) = resolved {
                if !qualifications.contains(&id) {
                    qualifications.push(id);
                }
            }
        }

        let landings = if crew_type.logs_landings() {
            p.landings
        } else {
            if !p.landings.is_empty() {
                SoftSkip::LandingsOnNonPilot { nip: p.nip, crew_type }.log();
            }
            LandingCounts::default()
        };

        normalized.push(Participation {
            nip: p.nip,
            position: p.position.trim().to_string(),
            landings,
            qualifications,
        });
    }

    if normalized.is_empty() {
        debug!("Every participation was skipped; flight is stored without crew");
    }
    Ok(normalized)
}

async fn crew_type_of(conn: &mut SqliteConnection, nip: i64) -> Result<Option<CrewType>> {
    let crew_type: Option<String> = sqlx::query_scalar("SELECT crew_type FROM tripulantes WHERE nip = ?")
        .bind(nip)
        .fetch_optional(&mut *conn)
        .await?;
    crew_type.map(|t| t.parse()).transpose()
}

fn keys_of(participations: &[Participation], snapshot: &CatalogSnapshot) -> BTreeSet<CitationKey> {
    citation_keys(participations, snapshot)
}

fn into_flight(id: i64, fields: FlightFields, participations: Vec<Participation>) -> Flight {
    Flight {
        id,
        fields,
        participations,
    }
}

fn bounds(year: i32) -> Result<(NaiveDate, NaiveDate)> {
    year_bounds(year).ok_or_else(|| Error::invalid("year", format!("{year} is out of range")))
}

// ========================================
// Row mapping and persistence
// ========================================

async fn insert_flight(conn: &mut SqliteConnection, f: &FlightFields) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO flights (airtask, flight_date, origin, destination, departure, arrival, duration,
                             flight_type, flight_action, tail, landings, passengers, doe, cargo, fuel, orm,
                             num_crew, ops_timestamps)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(f.airtask.trim())
    .bind(f.date)
    .bind(&f.origin)
    .bind(&f.destination)
    .bind(&f.departure)
    .bind(&f.arrival)
    .bind(&f.duration)
    .bind(&f.flight_type)
    .bind(&f.action)
    .bind(f.tail)
    .bind(f.landings)
    .bind(f.passengers)
    .bind(f.doe)
    .bind(f.cargo)
    .bind(f.fuel)
    .bind(f.orm)
    .bind(f.num_crew)
    .bind(&f.ops_timestamps)
    .execute(&mut *conn)
    .await
    .map_err(|e| Error::from_integrity(e, "flight"))?;
    Ok(result.last_insert_rowid())
}

async fn update_flight(conn: &mut SqliteConnection, id: i64, f: &FlightFields) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE flights
        SET airtask = ?, flight_date = ?, origin = ?, destination = ?, departure = ?, arrival = ?,
            duration = ?, flight_type = ?, flight_action = ?, tail = ?, landings = ?, passengers = ?,
            doe = ?, cargo = ?, fuel = ?, orm = ?, num_crew = ?, ops_timestamps = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(f.airtask.trim())
    .bind(f.date)
    .bind(&f.origin)
    .bind(&f.destination)
    .bind(&f.departure)
    .bind(&f.arrival)
    .bind(&f.duration)
    .bind(&f.flight_type)
    .bind(&f.action)
    .bind(f.tail)
    .bind(f.landings)
    .bind(f.passengers)
    .bind(f.doe)
    .bind(f.cargo)
    .bind(f.fuel)
    .bind(f.orm)
    .bind(f.num_crew)
    .bind(&f.ops_timestamps)
    .bind(id)
    .execute(&mut *conn)
    .await
    .map_err(|e| Error::from_integrity(e, "flight"))?;
    Ok(())
}

async fn insert_participations(
    conn: &mut SqliteConnection,
    flight_id: i64,
    participations: &[Participation],
) -> Result<()> {
    for (seq, p) in participations.iter().enumerate() {
        let mut slots = [None::<i64>; MAX_PARTICIPATION_QUALIFICATIONS];
        for (slot, id) in slots.iter_mut().zip(&p.qualifications) {
            *slot = Some(*id);
        }

        let mut query = sqlx::query(
            r#"
            INSERT INTO flight_pilots (flight_id, crew_nip, seq, position, day_landings, night_landings,
                                       prec_app, nprec_app, qual1, qual2, qual3, qual4, qual5, qual6)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(flight_id)
        .bind(p.nip)
        .bind(seq as i64)
        .bind(&p.position)
        .bind(p.landings.day_landings)
        .bind(p.landings.night_landings)
        .bind(p.landings.prec_approaches)
        .bind(p.landings.non_prec_approaches);
        for slot in slots {
            query = query.bind(slot);
        }
        query
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::from_integrity(e, "participation"))?;
    }
    Ok(())
}

async fn fetch_flight(conn: &mut SqliteConnection, id: i64) -> Result<Option<Flight>> {
    let row = sqlx::query(&format!("SELECT {FLIGHT_COLUMNS} FROM flights WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => Ok(with_participations(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

/// Map flight rows and load their participations in crew order
async fn with_participations(conn: &mut SqliteConnection, rows: Vec<SqliteRow>) -> Result<Vec<Flight>> {
    let mut flights = rows.iter().map(flight_from_row).collect::<Result<Vec<_>>>()?;
    let ids: Vec<i64> = flights.iter().map(|f| f.id).collect();

    let mut by_flight: HashMap<i64, Vec<Participation>> = HashMap::new();
    for chunk in ids.chunks(ID_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT {PARTICIPATION_COLUMNS} FROM flight_pilots WHERE flight_id IN ({placeholders}) ORDER BY flight_id, seq"
        );
        let mut query = sqlx::query(&sql);
        for id in chunk {
            query = query.bind(*id);
        }
        for row in query.fetch_all(&mut *conn).await? {
            let flight_id: i64 = row.try_get("flight_id")?;
            by_flight
                .entry(flight_id)
                .or_default()
                .push(participation_from_row(&row)?);
        }
    }

    for flight in &mut flights {
        flight.participations = by_flight.remove(&flight.id).unwrap_or_default();
    }
    Ok(flights)
}

fn flight_from_row(row: &SqliteRow) -> Result<Flight> {
    Ok(Flight {
        id: row.try_get("id")?,
        fields: FlightFields {
            airtask: row.try_get("airtask")?,
            date: row.try_get("flight_date")?,
            origin: row.try_get("origin")?,
            destination: row.try_get("destination")?,
            departure: row.try_get("departure")?,
            arrival: row.try_get("arrival")?,
            duration: row.try_get("duration")?,
            flight_type: row.try_get("flight_type")?,
            action: row.try_get("flight_action")?,
            tail: row.try_get("tail")?,
            landings: row.try_get("landings")?,
            passengers: row.try_get("passengers")?,
            doe: row.try_get("doe")?,
            cargo: row.try_get("cargo")?,
            fuel: row.try_get("fuel")?,
            orm: row.try_get("orm")?,
            num_crew: row.try_get("num_crew")?,
            ops_timestamps: row.try_get("ops_timestamps")?,
        },
        participations: Vec::new(),
    })
}

/// Map a `flight_pilots` row (qual1..qual6 collapse into an ordered list)
pub(crate) fn participation_from_row(row: &SqliteRow) -> Result<Participation> {
    let mut qualifications = Vec::with_capacity(MAX_PARTICIPATION_QUALIFICATIONS);
    for column in ["qual1", "qual2", "qual3", "qual4", "qual5", "qual6"] {
        if let Some(id) = row.try_get::<Option<i64>, _>(column)? {
            qualifications.push(id);
        }
    }
    Ok(Participation {
        nip: row.try_get("crew_nip")?,
        position: row.try_get("position")?,
        landings: LandingCounts {
            day_landings: row.try_get("day_landings")?,
            night_landings: row.try_get("night_landings")?,
            prec_approaches: row.try_get("prec_app")?,
            non_prec_approaches: row.try_get("nprec_app")?,
        },
        qualifications,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightlog_common::models::ParticipationInput;

    fn input() -> FlightInput {
        FlightInput {
            fields: FlightFields {
                airtask: "1A23".into(),
                date: NaiveDate::from_ymd_opt(2025, 5, 10).unwrap(),
                origin: "LPMT".into(),
                destination: "LPLA".into(),
                departure: "09:30".into(),
                arrival: "12:00".into(),
                duration: "02:30".into(),
                flight_type: "OPER".into(),
                action: "SAR".into(),
                tail: 16701,
                landings: 1,
                passengers: 0,
                doe: 0,
                cargo: 0,
                fuel: 0,
                orm: 0,
                num_crew: 1,
                ops_timestamps: None,
            },
            participations: vec![ParticipationInput {
                nip: 1,
                position: "PC".into(),
                landings: LandingCounts::default(),
                qualifications: vec![],
            }],
        }
    }

    fn epoch() -> NaiveDate {
        flightlog_common::models::default_epoch()
    }

    fn violated_fields(err: Error) -> Vec<String> {
        match err {
            Error::Validation(v) => v.into_iter().map(|f| f.field).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_input_passes() {
        assert!(validate_input(&input(), epoch()).is_ok());
    }

    #[test]
    fn test_date_must_follow_epoch() {
        let mut i = input();
        i.fields.date = epoch();
        assert_eq!(violated_fields(validate_input(&i, epoch()).unwrap_err()), vec!["date"]);
    }

    #[test]
    fn test_airtask_length_and_clock_times() {
        let mut i = input();
        i.fields.airtask = "12345678".into();
        i.fields.departure = "9:30".into();
        i.fields.arrival = "24:00".into();
        assert_eq!(
            violated_fields(validate_input(&i, epoch()).unwrap_err()),
            vec!["airtask", "departure", "arrival"]
        );
    }

    #[test]
    fn test_participation_shape() {
        let mut i = input();
        i.participations.push(i.participations[0].clone());
        i.participations[0].qualifications = (1..=7).map(QualificationRef::Id).collect();
        assert_eq!(
            violated_fields(validate_input(&i, epoch()).unwrap_err()),
            vec!["participations[0].qualifications", "participations[1].nip"]
        );

        let mut empty = input();
        empty.participations.clear();
        assert_eq!(violated_fields(validate_input(&empty, epoch()).unwrap_err()), vec!["participations"]);
    }
}
