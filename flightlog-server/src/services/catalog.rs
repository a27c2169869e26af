//! Qualification catalog
//!
//! CRUD over the `qualifications` table plus a read-through snapshot that the
//! write paths consult for id lookups and legacy `(name, crew type)` resolution.
//! The snapshot is process-wide and read-mostly; every catalog mutation drops
//! it so the next reader reloads.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use flightlog_common::models::{
    CrewType, LandingKind, NewQualification, Qualification, QualificationGroup, QualificationPatch,
};
use flightlog_common::{Error, FieldViolation, Result};

/// In-memory view of the whole catalog
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    by_id: HashMap<i64, Qualification>,
    by_name: HashMap<(String, CrewType), i64>,
}

impl CatalogSnapshot {
    /// Build indices; retired entries resolve by id only
    pub fn from_qualifications(mut qualifications: Vec<Qualification>) -> Self {
        qualifications.sort_by_key(|q| q.id);

        let mut by_name = HashMap::new();
        for q in qualifications.iter().filter(|q| !q.is_retired()) {
            let key = (name_key(&q.name), q.applicable_to);
            if let Some(existing) = by_name.get(&key) {
                warn!(
                    "Qualification name '{}' ({}) is ambiguous; resolving to id {} over {}",
                    q.name, q.applicable_to, existing, q.id
                );
                continue;
            }
            by_name.insert(key, q.id);
        }

        let by_id = qualifications.into_iter().map(|q| (q.id, q)).collect();
        Self { by_id, by_name }
    }

    pub fn by_id(&self, id: i64) -> Option<&Qualification> {
        self.by_id.get(&id)
    }

    /// Legacy name lookup, case-insensitive
    pub fn resolve_name(&self, name: &str, crew_type: CrewType) -> Option<i64> {
        self.by_name.get(&(name_key(name), crew_type)).copied()
    }

    /// Catalog id of an implicit landing qualification
    pub fn landing_id(&self, kind: LandingKind) -> Option<i64> {
        self.resolve_name(kind.catalog_name(), CrewType::Pilot)
    }

    /// Every entry, retired ones included
    pub fn iter(&self) -> impl Iterator<Item = &Qualification> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

fn name_key(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteOutcome {
    /// Row removed; nothing referenced it
    Deleted,
    /// Referenced entry logically deleted; flight history untouched
    Retired,
}

/// Catalog service
#[derive(Clone)]
pub struct Catalog {
    db: SqlitePool,
    cache: Arc<RwLock<Option<Arc<CatalogSnapshot>>>>,
}

impl Catalog {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Current snapshot, loading it on first use
    ///
    /// Call this before opening a transaction: loading goes through the pool.
    pub async fn snapshot(&self) -> Result<Arc<CatalogSnapshot>> {
        if let Some(snapshot) = self.cache.read().await.as_ref() {
            return Ok(Arc::clone(snapshot));
        }

        let mut guard = self.cache.write().await;
        if let Some(snapshot) = guard.as_ref() {
            return Ok(Arc::clone(snapshot));
        }
        let snapshot = Arc::new(CatalogSnapshot::from_qualifications(self.load_all().await?));
        info!("Catalog snapshot loaded ({} qualifications)", snapshot.len());
        *guard = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Drop the cached snapshot
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn load_all(&self) -> Result<Vec<Qualification>> {
        let rows = sqlx::query(
            "SELECT id, name, qual_group, validity_days, applicable_to, retired_at FROM qualifications ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(qualification_from_row).collect()
    }

    /// Active (non-retired) qualifications
    pub async fn list(&self) -> Result<Vec<Qualification>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, qual_group, validity_days, applicable_to, retired_at
            FROM qualifications
            WHERE retired_at IS NULL
            ORDER BY applicable_to, qual_group, name, id
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(qualification_from_row).collect()
    }

    /// Active qualifications applicable to one crew type
    pub async fn list_for_crew_type(&self, crew_type: CrewType) -> Result<Vec<Qualification>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, qual_group, validity_days, applicable_to, retired_at
            FROM qualifications
            WHERE retired_at IS NULL AND applicable_to = ?
            ORDER BY qual_group, name, id
            "#,
        )
        .bind(crew_type.as_str())
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(qualification_from_row).collect()
    }

    pub async fn get(&self, id: i64) -> Result<Qualification> {
        let row = sqlx::query(
            "SELECT id, name, qual_group, validity_days, applicable_to, retired_at FROM qualifications WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("qualification {id}")))?;
        qualification_from_row(&row)
    }

    pub async fn create(&self, def: NewQualification) -> Result<Qualification> {
        let name = def.name.trim().to_string();
        validate_definition(&name, def.group, def.validity_days, def.applicable_to)?;

        let id = sqlx::query(
            "INSERT INTO qualifications (name, qual_group, validity_days, applicable_to) VALUES (?, ?, ?, ?)",
        )
        .bind(&name)
        .bind(def.group.as_str())
        .bind(def.validity_days)
        .bind(def.applicable_to.as_str())
        .execute(&self.db)
        .await
        .map_err(|e| Error::from_integrity(e, "qualification"))?
        .last_insert_rowid();

        self.invalidate().await;
        info!(qual_id = id, name = %name, crew_type = %def.applicable_to, "Qualification created");
        self.get(id).await
    }

    pub async fn update(&self, id: i64, patch: QualificationPatch) -> Result<Qualification> {
        let current = self.get(id).await?;
        if current.is_retired() {
            return Err(Error::Conflict(format!("qualification {id} is retired")));
        }

        let name = patch.name.map(|n| n.trim().to_string()).unwrap_or(current.name);
        let group = patch.group.unwrap_or(current.group);
        let validity_days = patch.validity_days.unwrap_or(current.validity_days);
        let applicable_to = patch.applicable_to.unwrap_or(current.applicable_to);
        validate_definition(&name, group, validity_days, applicable_to)?;

        if applicable_to != current.applicable_to {
            warn!(
                qual_id = id,
                "Qualification crew type changed from {} to {}; existing citations are kept",
                current.applicable_to,
                applicable_to
            );
        }

        sqlx::query(
            r#"
            UPDATE qualifications
            SET name = ?, qual_group = ?, validity_days = ?, applicable_to = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(&name)
        .bind(group.as_str())
        .bind(validity_days)
        .bind(applicable_to.as_str())
        .bind(id)
        .execute(&self.db)
        .await
        .map_err(|e| Error::from_integrity(e, "qualification"))?;

        self.invalidate().await;
        self.get(id).await
    }

    /// Delete a qualification
    ///
    /// Unreferenced entries are removed outright. Referenced entries need
    /// `cascade`, which retires them instead of rewriting flight history.
    /// The entry a landing kind resolves to is refused, even with `cascade`,
    /// while any participation still carries a positive count of that kind.
    pub async fn delete(&self, id: i64, cascade: bool) -> Result<DeleteOutcome> {
        let current = self.get(id).await?;

        let snapshot = self.snapshot().await?;
        if let Some(kind) = LandingKind::ALL.into_iter().find(|k| snapshot.landing_id(*k) == Some(id)) {
            let landings: i64 =
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM flight_pilots WHERE {} > 0", kind.column()))
                    .fetch_one(&self.db)
                    .await?;
            if landings > 0 {
                return Err(Error::Conflict(format!(
                    "qualification {id} is validated by landing counts on {landings} participations and cannot be removed"
                )));
            }
        }

        let references: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM flight_pilots WHERE ? IN (qual1, qual2, qual3, qual4, qual5, qual6)",
        )
        .bind(id)
        .fetch_one(&self.db)
        .await?;

        let outcome = if references == 0 {
            sqlx::query("DELETE FROM qualifications WHERE id = ?")
                .bind(id)
                .execute(&self.db)
                .await
                .map_err(|e| Error::from_integrity(e, "qualification"))?;
            DeleteOutcome::Deleted
        } else if cascade {
            if current.is_retired() {
                return Ok(DeleteOutcome::Retired);
            }
            sqlx::query("UPDATE qualifications SET retired_at = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
                .bind(Utc::now())
                .bind(id)
                .execute(&self.db)
                .await?;
            DeleteOutcome::Retired
        } else {
            return Err(Error::Conflict(format!(
                "qualification {id} is referenced by {references} participations; delete with cascade to retire it"
            )));
        };

        self.invalidate().await;
        info!(qual_id = id, outcome = ?outcome, "Qualification deleted");
        Ok(outcome)
    }
}

fn validate_definition(
    name: &str,
    group: QualificationGroup,
    validity_days: i64,
    applicable_to: CrewType,
) -> Result<()> {
    let mut violations = Vec::new();
    if name.is_empty() {
        violations.push(FieldViolation::new("name", "must not be empty"));
    }
    if validity_days <= 0 {
        violations.push(FieldViolation::new("validity_days", "must be a positive number of days"));
    }
    if !group.allows(applicable_to) {
        violations.push(FieldViolation::new(
            "applicable_to",
            format!("group {group} does not apply to {applicable_to}"),
        ));
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(violations))
    }
}

pub(crate) fn qualification_from_row(row: &SqliteRow) -> Result<Qualification> {
    let group: String = row.try_get("qual_group")?;
    let applicable_to: String = row.try_get("applicable_to")?;
    Ok(Qualification {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        group: group.parse()?,
        validity_days: row.try_get("validity_days")?,
        applicable_to: applicable_to.parse()?,
        retired_at: row.try_get("retired_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qual(id: i64, name: &str, crew_type: CrewType) -> Qualification {
        Qualification {
            id,
            name: name.to_string(),
            group: QualificationGroup::General,
            validity_days: 180,
            applicable_to: crew_type,
            retired_at: None,
        }
    }

    #[test]
    fn test_snapshot_resolves_names_per_crew_type() {
        let snapshot = CatalogSnapshot::from_qualifications(vec![
            qual(1, "QA1", CrewType::Pilot),
            qual(2, "QA1", CrewType::CabinOp),
            qual(3, "ATR", CrewType::Pilot),
        ]);
        assert_eq!(snapshot.resolve_name("qa1", CrewType::Pilot), Some(1));
        assert_eq!(snapshot.resolve_name(" QA1 ", CrewType::CabinOp), Some(2));
        assert_eq!(snapshot.resolve_name("QA1", CrewType::Ops), None);
        assert_eq!(snapshot.landing_id(LandingKind::Day), Some(3));
        assert_eq!(snapshot.landing_id(LandingKind::Night), None);
    }

    #[test]
    fn test_duplicate_names_resolve_to_lowest_id() {
        let snapshot = CatalogSnapshot::from_qualifications(vec![
            qual(9, "QA1", CrewType::Pilot),
            qual(4, "QA1", CrewType::Pilot),
        ]);
        assert_eq!(snapshot.resolve_name("QA1", CrewType::Pilot), Some(4));
    }

    #[test]
    fn test_retired_entries_resolve_by_id_only() {
        let mut retired = qual(5, "OLD", CrewType::Pilot);
        retired.retired_at = Some(Utc::now());
        let snapshot = CatalogSnapshot::from_qualifications(vec![retired]);
        assert!(snapshot.by_id(5).is_some());
        assert_eq!(snapshot.resolve_name("OLD", CrewType::Pilot), None);
    }

    #[test]
    fn test_definition_validation() {
        assert!(validate_definition("QA1", QualificationGroup::PilotCurrency, 180, CrewType::Pilot).is_ok());
        let err = validate_definition("", QualificationGroup::Cabin, 0, CrewType::Pilot).unwrap_err();
        match err {
            Error::Validation(v) => assert_eq!(v.len(), 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
