//! Read-side projections over the currency index and flight log
//!
//! "Never validated" (no record, or a record at the epoch sentinel) is `None`
//! throughout; it is never reported as a number of days.

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};

use flightlog_common::models::QualificationGroup;
use flightlog_common::time::{duration_minutes, year_bounds};
use flightlog_common::{CrewType, Error, Result};

use super::catalog::Catalog;

/// Currency of one qualification for one crew member
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualificationStatus {
    pub qual_id: i64,
    pub name: String,
    pub group: QualificationGroup,
    pub validity_days: i64,
    pub last_validated: Option<NaiveDate>,
    pub expires_on: Option<NaiveDate>,
    pub remaining_days: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrewCurrency {
    pub nip: i64,
    pub name: String,
    pub crew_type: CrewType,
    pub qualifications: Vec<QualificationStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpiringEntry {
    pub nip: i64,
    pub name: String,
    pub crew_type: CrewType,
    pub qual_id: i64,
    pub qualification: String,
    pub last_validated: NaiveDate,
    pub expires_on: NaiveDate,
    pub remaining_days: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct YearTotals {
    pub passengers: i64,
    pub doe: i64,
    pub cargo: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopCrew {
    pub nip: i64,
    pub name: String,
    pub minutes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct YearStatistics {
    pub year: i32,
    pub flight_count: i64,
    pub total_minutes: i64,
    pub minutes_by_type: BTreeMap<String, i64>,
    pub minutes_by_action: BTreeMap<String, i64>,
    pub totals: YearTotals,
    /// Keyed by crew type
    pub top_crew_by_type: BTreeMap<String, TopCrew>,
}

/// `(last + validity) - today`; `None` for the epoch sentinel
pub fn remaining(last_validated: NaiveDate, validity_days: i64, today: NaiveDate, epoch: NaiveDate) -> Option<i64> {
    if last_validated <= epoch {
        return None;
    }
    let expires_on = last_validated + Duration::days(validity_days);
    Some((expires_on - today).num_days())
}

#[derive(Clone)]
pub struct CurrencyProjector {
    db: SqlitePool,
    catalog: Catalog,
    epoch: NaiveDate,
}

impl CurrencyProjector {
    pub fn new(db: SqlitePool, catalog: Catalog, epoch: NaiveDate) -> Self {
        Self { db, catalog, epoch }
    }

    pub async fn remaining_days(&self, nip: i64, qual_id: i64, today: NaiveDate) -> Result<Option<i64>> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tripulantes WHERE nip = ?)")
            .bind(nip)
            .fetch_one(&self.db)
            .await?;
        if !exists {
            return Err(Error::NotFound(format!("crew member {nip}")));
        }

        let snapshot = self.catalog.snapshot().await?;
        let qualification = snapshot
            .by_id(qual_id)
            .ok_or_else(|| Error::NotFound(format!("qualification {qual_id}")))?;

        let last: Option<NaiveDate> = sqlx::query_scalar(
            "SELECT last_validated FROM tripulante_qualificacoes WHERE crew_nip = ? AND qual_id = ?",
        )
        .bind(nip)
        .bind(qual_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(last.and_then(|d| remaining(d, qualification.validity_days, today, self.epoch)))
    }

    /// Every active qualification applicable to the member, most urgent first
    pub async fn per_crew(&self, nip: i64, today: NaiveDate) -> Result<CrewCurrency> {
        let row = sqlx::query("SELECT nip, name, crew_type FROM tripulantes WHERE nip = ?")
            .bind(nip)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("crew member {nip}")))?;
        let crew_type: CrewType = row.try_get::<String, _>("crew_type")?.parse()?;

        let mut records: HashMap<i64, NaiveDate> = HashMap::new();
        let record_rows = sqlx::query(
            "SELECT qual_id, last_validated FROM tripulante_qualificacoes WHERE crew_nip = ?",
        )
        .bind(nip)
        .fetch_all(&self.db)
        .await?;
        for r in &record_rows {
            records.insert(r.try_get("qual_id")?, r.try_get("last_validated")?);
        }

        let mut qualifications: Vec<QualificationStatus> = self
            .catalog
            .list_for_crew_type(crew_type)
            .await?
            .into_iter()
            .map(|q| {
                let last = records.get(&q.id).copied().filter(|d| *d > self.epoch);
                QualificationStatus {
                    qual_id: q.id,
                    name: q.name,
                    group: q.group,
                    validity_days: q.validity_days,
                    last_validated: last,
                    expires_on: last.map(|d| d + Duration::days(q.validity_days)),
                    remaining_days: last.and_then(|d| remaining(d, q.validity_days, today, self.epoch)),
                }
            })
            .collect();

        qualifications.sort_by(|a, b| match (a.remaining_days, b.remaining_days) {
            (Some(x), Some(y)) => x.cmp(&y).then(a.qual_id.cmp(&b.qual_id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.qual_id.cmp(&b.qual_id),
        });

        Ok(CrewCurrency {
            nip,
            name: row.try_get("name")?,
            crew_type,
            qualifications,
        })
    }

    /// Validated records of PRESENT crew, least remaining first
    pub async fn expiring_soon(&self, limit: usize, today: NaiveDate) -> Result<Vec<ExpiringEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT tq.crew_nip, t.name AS crew_name, t.crew_type, tq.qual_id, q.name AS qual_name,
                   q.validity_days, tq.last_validated
            FROM tripulante_qualificacoes tq
            JOIN tripulantes t ON t.nip = tq.crew_nip
            JOIN qualifications q ON q.id = tq.qual_id
            WHERE t.status = 'PRESENT' AND q.retired_at IS NULL AND tq.last_validated > ?
            "#,
        )
        .bind(self.epoch)
        .fetch_all(&self.db)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let last_validated: NaiveDate = row.try_get("last_validated")?;
            let validity_days: i64 = row.try_get("validity_days")?;
            let Some(remaining_days) = remaining(last_validated, validity_days, today, self.epoch) else {
                continue;
            };
            entries.push(ExpiringEntry {
                nip: row.try_get("crew_nip")?,
                name: row.try_get("crew_name")?,
                crew_type: row.try_get::<String, _>("crew_type")?.parse()?,
                qual_id: row.try_get("qual_id")?,
                qualification: row.try_get("qual_name")?,
                last_validated,
                expires_on: last_validated + Duration::days(validity_days),
                remaining_days,
            });
        }

        entries.sort_by_key(|e| (e.remaining_days, e.nip, e.qual_id));
        entries.truncate(limit);
        Ok(entries)
    }

    pub async fn year_statistics(&self, year: i32) -> Result<YearStatistics> {
        let (start, end) =
            year_bounds(year).ok_or_else(|| Error::invalid("year", format!("{year} is out of range")))?;

        let mut stats = YearStatistics {
            year,
            ..Default::default()
        };

        let flights = sqlx::query(
            r#"
            SELECT duration, flight_type, flight_action, passengers, doe, cargo
            FROM flights
            WHERE flight_date >= ? AND flight_date < ?
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.db)
        .await?;

        for row in &flights {
            let minutes = duration_minutes(&row.try_get::<String, _>("duration")?);
            stats.flight_count += 1;
            stats.total_minutes += minutes;
            *stats
                .minutes_by_type
                .entry(row.try_get("flight_type")?)
                .or_insert(0) += minutes;
            *stats
                .minutes_by_action
                .entry(row.try_get("flight_action")?)
                .or_insert(0) += minutes;
            stats.totals.passengers += row.try_get::<i64, _>("passengers")?;
            stats.totals.doe += row.try_get::<i64, _>("doe")?;
            stats.totals.cargo += row.try_get::<i64, _>("cargo")?;
        }

        let crew_rows = sqlx::query(
            r#"
            SELECT fp.crew_nip, t.name, t.crew_type, f.duration
            FROM flight_pilots fp
            JOIN flights f ON f.id = fp.flight_id
            JOIN tripulantes t ON t.nip = fp.crew_nip
            WHERE f.flight_date >= ? AND f.flight_date < ? AND t.status = 'PRESENT'
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.db)
        .await?;

        // (crew type, nip) -> (name, minutes)
        let mut per_crew: BTreeMap<(String, i64), (String, i64)> = BTreeMap::new();
        for row in &crew_rows {
            let minutes = duration_minutes(&row.try_get::<String, _>("duration")?);
            let entry = per_crew
                .entry((row.try_get("crew_type")?, row.try_get("crew_nip")?))
                .or_insert_with(|| (String::new(), 0));
            entry.0 = row.try_get("name")?;
            entry.1 += minutes;
        }

        // BTreeMap order is nip ascending within a type, so strict `>` keeps the lowest nip on ties
        for ((crew_type, nip), (name, minutes)) in per_crew {
            let replace = match stats.top_crew_by_type.get(&crew_type) {
                Some(top) => minutes > top.minutes,
                None => true,
            };
            if replace {
                stats
                    .top_crew_by_type
                    .insert(crew_type, TopCrew { nip, name, minutes });
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightlog_common::models::default_epoch;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_remaining_days_counts_from_last_validation() {
        let today = date(2025, 6, 1);
        assert_eq!(remaining(date(2025, 5, 10), 180, today, default_epoch()), Some(158));
        assert_eq!(remaining(date(2024, 1, 1), 90, today, default_epoch()), Some(-427));
    }

    #[test]
    fn test_epoch_is_never_validated() {
        assert_eq!(remaining(default_epoch(), 180, date(2025, 6, 1), default_epoch()), None);
    }
}
