//! Currency index
//!
//! Materialized `(crew, qualification) -> last_validated` view over the flight
//! log, stored in `tripulante_qualificacoes`.
//!
//! - Inserting a flight only ever raises dates (forward update).
//! - Editing or deleting a flight recomputes the affected pairs from the
//!   surviving flights (reconciliation). A pair with no surviving citation
//!   falls back to the epoch sentinel; a pair that never had a record keeps
//!   having none.
//!
//! The same [`citations`] function decides what a participation validates for
//! forward updates, reconciliation and full rebuilds, so the three paths cannot
//! drift apart. It reads only what is stored on the participation: landing
//! counts are zeroed for non-pilots when the flight is written, so a later
//! crew type change does not alter what an existing row cites.

use chrono::NaiveDate;
use sqlx::{Row, SqliteConnection};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use flightlog_common::models::{CurrencyRecord, LandingKind, Participation};
use flightlog_common::Result;

use super::catalog::CatalogSnapshot;
use super::flight_log::participation_from_row;
use super::SoftSkip;

/// `(crew nip, qualification id)`
pub type CitationKey = (i64, i64);

/// Qualifications validated by one participation
///
/// Stored qualification ids in order, then the landing qualifications whose
/// count is positive. Duplicates are removed.
pub fn citations(participation: &Participation, catalog: &CatalogSnapshot) -> Vec<i64> {
    let mut cited = Vec::with_capacity(participation.qualifications.len() + LandingKind::ALL.len());
    for id in &participation.qualifications {
        if !cited.contains(id) {
            cited.push(*id);
        }
    }

    for kind in LandingKind::ALL {
        if participation.landings.count(kind) <= 0 {
            continue;
        }
        match catalog.landing_id(kind) {
            Some(id) if !cited.contains(&id) => cited.push(id),
            Some(_) => {}
            None => SoftSkip::MissingLandingQualification { kind }.log(),
        }
    }
    cited
}

/// Citation keys of a whole participation set
pub fn citation_keys<'a, I>(participations: I, catalog: &CatalogSnapshot) -> BTreeSet<CitationKey>
where
    I: IntoIterator<Item = &'a Participation>,
{
    participations
        .into_iter()
        .flat_map(|p| citations(p, catalog).into_iter().map(move |qual_id| (p.nip, qual_id)))
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct CurrencyIndex {
    epoch: NaiveDate,
}

impl CurrencyIndex {
    pub fn new(epoch: NaiveDate) -> Self {
        Self { epoch }
    }

    /// "Never validated" sentinel
    pub fn epoch(&self) -> NaiveDate {
        self.epoch
    }

    /// Raise every key to at least `date`, creating missing records
    pub async fn forward<I>(&self, conn: &mut SqliteConnection, date: NaiveDate, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = CitationKey>,
    {
        for (crew_nip, qual_id) in keys {
            sqlx::query(
                r#"
                INSERT INTO tripulante_qualificacoes (crew_nip, qual_id, last_validated)
                VALUES (?, ?, ?)
                ON CONFLICT(crew_nip, qual_id)
                DO UPDATE SET last_validated = MAX(last_validated, excluded.last_validated)
                "#,
            )
            .bind(crew_nip)
            .bind(qual_id)
            .bind(date)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Recompute `keys` from the surviving flights, ignoring `excluded_flight`
    ///
    /// Idempotent: running it twice over the same state changes nothing.
    pub async fn reconcile(
        &self,
        conn: &mut SqliteConnection,
        excluded_flight: i64,
        keys: &BTreeSet<CitationKey>,
        catalog: &CatalogSnapshot,
    ) -> Result<()> {
        let mut by_crew: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        for (nip, qual_id) in keys {
            by_crew.entry(*nip).or_default().insert(*qual_id);
        }

        for (nip, quals) in by_crew {
            let latest = self
                .surviving_dates(&mut *conn, nip, excluded_flight, &quals, catalog)
                .await?;

            for qual_id in quals {
                match latest.get(&qual_id) {
                    Some(date) => {
                        sqlx::query(
                            r#"
                            INSERT INTO tripulante_qualificacoes (crew_nip, qual_id, last_validated)
                            VALUES (?, ?, ?)
                            ON CONFLICT(crew_nip, qual_id)
                            DO UPDATE SET last_validated = excluded.last_validated
                            "#,
                        )
                        .bind(nip)
                        .bind(qual_id)
                        .bind(*date)
                        .execute(&mut *conn)
                        .await?;
                    }
                    None => {
                        sqlx::query(
                            "UPDATE tripulante_qualificacoes SET last_validated = ? WHERE crew_nip = ? AND qual_id = ?",
                        )
                        .bind(self.epoch)
                        .bind(nip)
                        .bind(qual_id)
                        .execute(&mut *conn)
                        .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Latest surviving flight date per qualification in `quals` for one crew member
    async fn surviving_dates(
        &self,
        conn: &mut SqliteConnection,
        nip: i64,
        excluded_flight: i64,
        quals: &BTreeSet<i64>,
        catalog: &CatalogSnapshot,
    ) -> Result<BTreeMap<i64, NaiveDate>> {
        let rows = sqlx::query(
            r#"
            SELECT f.flight_date, fp.crew_nip, fp.position,
                   fp.day_landings, fp.night_landings, fp.prec_app, fp.nprec_app,
                   fp.qual1, fp.qual2, fp.qual3, fp.qual4, fp.qual5, fp.qual6
            FROM flight_pilots fp
            JOIN flights f ON f.id = fp.flight_id
            WHERE fp.crew_nip = ? AND fp.flight_id <> ?
            "#,
        )
        .bind(nip)
        .bind(excluded_flight)
        .fetch_all(&mut *conn)
        .await?;

        debug!(nip, surviving = rows.len(), "Reconciling currency");

        let mut latest: BTreeMap<i64, NaiveDate> = BTreeMap::new();
        for row in &rows {
            let date: NaiveDate = row.try_get("flight_date")?;
            let participation = participation_from_row(row)?;
            for qual_id in citations(&participation, catalog) {
                if !quals.contains(&qual_id) {
                    continue;
                }
                latest
                    .entry(qual_id)
                    .and_modify(|d| *d = (*d).max(date))
                    .or_insert(date);
            }
        }
        Ok(latest)
    }

    /// Every record, ordered by key
    pub async fn all_records(&self, conn: &mut SqliteConnection) -> Result<Vec<CurrencyRecord>> {
        let rows = sqlx::query(
            "SELECT crew_nip, qual_id, last_validated FROM tripulante_qualificacoes ORDER BY crew_nip, qual_id",
        )
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CurrencyRecord> {
    Ok(CurrencyRecord {
        crew_nip: row.try_get("crew_nip")?,
        qual_id: row.try_get("qual_id")?,
        last_validated: row.try_get("last_validated")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightlog_common::models::{LandingCounts, Qualification, QualificationGroup};
    use flightlog_common::CrewType;

    fn catalog() -> CatalogSnapshot {
        let landing = |id: i64, name: &str| Qualification {
            id,
            name: name.to_string(),
            group: QualificationGroup::Landing,
            validity_days: 90,
            applicable_to: CrewType::Pilot,
            retired_at: None,
        };
        CatalogSnapshot::from_qualifications(vec![
            landing(1, "ATR"),
            landing(2, "ATN"),
            landing(3, "precapp"),
            landing(4, "nprecapp"),
        ])
    }

    fn participation(qualifications: Vec<i64>, landings: LandingCounts) -> Participation {
        Participation {
            nip: 7,
            position: "PC".into(),
            landings,
            qualifications,
        }
    }

    #[test]
    fn test_pilot_landings_add_implicit_citations() {
        let p = participation(
            vec![10, 11],
            LandingCounts {
                day_landings: Some(2),
                night_landings: Some(0),
                prec_approaches: Some(1),
                non_prec_approaches: None,
            },
        );
        assert_eq!(citations(&p, &catalog()), vec![10, 11, 1, 3]);
    }

    #[test]
    fn test_zero_landings_cite_nothing_implicit() {
        let p = participation(vec![20], LandingCounts::default());
        assert_eq!(citations(&p, &catalog()), vec![20]);
    }

    #[test]
    fn test_duplicate_citations_collapse() {
        let p = participation(
            vec![1, 5, 5],
            LandingCounts {
                day_landings: Some(1),
                ..Default::default()
            },
        );
        assert_eq!(citations(&p, &catalog()), vec![1, 5]);
    }

    #[test]
    fn test_missing_landing_entry_is_skipped() {
        let empty = CatalogSnapshot::default();
        let p = participation(
            vec![],
            LandingCounts {
                night_landings: Some(1),
                ..Default::default()
            },
        );
        assert!(citations(&p, &empty).is_empty());
    }
}
