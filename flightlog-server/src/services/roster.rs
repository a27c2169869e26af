//! Crew roster
//!
//! Registry of crew members keyed by NIP. The stored `role_level` is the
//! authorization source of truth; the crew type decides which catalog
//! entries apply to a member.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use serde::Serialize;
use tracing::{info, warn};

use flightlog_common::auth::hash_password;
use flightlog_common::models::{CrewMember, CrewMemberPatch, CrewStatus, CrewType, NewCrewMember};
use flightlog_common::{Error, FieldViolation, Result, RoleLevel};

const CREW_COLUMNS: &str = "nip, name, rank, position, email, crew_type, status, role_level";

/// Outcome of a best-effort bulk insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub created: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Roster {
    db: SqlitePool,
}

impl Roster {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn get(&self, nip: i64) -> Result<CrewMember> {
        self.find(nip)
            .await?
            .ok_or_else(|| Error::NotFound(format!("crew member {nip}")))
    }

    pub async fn find(&self, nip: i64) -> Result<Option<CrewMember>> {
        let row = sqlx::query(&format!("SELECT {CREW_COLUMNS} FROM tripulantes WHERE nip = ?"))
            .bind(nip)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(crew_from_row).transpose()
    }

    pub async fn list(&self) -> Result<Vec<CrewMember>> {
        let rows = sqlx::query(&format!(
            "SELECT {CREW_COLUMNS} FROM tripulantes ORDER BY crew_type, nip"
        ))
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(crew_from_row).collect()
    }

    /// PRESENT members of one crew type
    pub async fn list_by_type_present(&self, crew_type: CrewType) -> Result<Vec<CrewMember>> {
        let rows = sqlx::query(&format!(
            "SELECT {CREW_COLUMNS} FROM tripulantes WHERE crew_type = ? AND status = 'PRESENT' ORDER BY nip"
        ))
        .bind(crew_type.as_str())
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(crew_from_row).collect()
    }

    /// Member plus stored password hash, for the credential flow
    pub async fn credentials(&self, nip: i64) -> Result<Option<(CrewMember, Option<String>)>> {
        let row = sqlx::query(&format!(
            "SELECT {CREW_COLUMNS}, password_hash FROM tripulantes WHERE nip = ?"
        ))
        .bind(nip)
        .fetch_optional(&self.db)
        .await?;
        match row {
            Some(row) => Ok(Some((crew_from_row(&row)?, row.try_get("password_hash")?))),
            None => Ok(None),
        }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<CrewMember>> {
        let row = sqlx::query(&format!(
            "SELECT {CREW_COLUMNS} FROM tripulantes WHERE lower(email) = lower(?)"
        ))
        .bind(email.trim())
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(crew_from_row).transpose()
    }

    pub async fn create(&self, member: NewCrewMember) -> Result<CrewMember> {
        validate_member(member.nip, &member.name)?;
        let password_hash = match member.password.as_deref() {
            Some(password) => Some(hash_password(password)?),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO tripulantes (nip, name, rank, position, email, crew_type, status, role_level, password_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(member.nip)
        .bind(member.name.trim())
        .bind(&member.rank)
        .bind(&member.position)
        .bind(normalize_email(member.email.as_deref()))
        .bind(member.crew_type.as_str())
        .bind(member.status.as_str())
        .bind(member.role_level.value())
        .bind(password_hash)
        .execute(&self.db)
        .await
        .map_err(|e| Error::from_integrity(e, "crew member"))?;

        info!(nip = member.nip, crew_type = %member.crew_type, "Crew member created");
        self.get(member.nip).await
    }

    pub async fn update(&self, nip: i64, patch: CrewMemberPatch) -> Result<CrewMember> {
        let current = self.get(nip).await?;

        let name = patch.name.unwrap_or(current.name);
        validate_member(nip, &name)?;
        let email = match patch.email {
            Some(email) => normalize_email(Some(&email)),
            None => current.email,
        };

        sqlx::query(
            r#"
            UPDATE tripulantes
            SET name = ?, rank = ?, position = ?, email = ?, crew_type = ?, status = ?, role_level = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE nip = ?
            "#,
        )
        .bind(name.trim())
        .bind(patch.rank.unwrap_or(current.rank))
        .bind(patch.position.unwrap_or(current.position))
        .bind(email)
        .bind(patch.crew_type.unwrap_or(current.crew_type).as_str())
        .bind(patch.status.unwrap_or(current.status).as_str())
        .bind(patch.role_level.unwrap_or(current.role_level).value())
        .bind(nip)
        .execute(&self.db)
        .await
        .map_err(|e| Error::from_integrity(e, "crew member"))?;

        self.get(nip).await
    }

    /// Remove a member; fails with `Conflict` while flights reference them
    pub async fn delete(&self, nip: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM tripulantes WHERE nip = ?")
            .bind(nip)
            .execute(&self.db)
            .await
            .map_err(|e| Error::from_integrity(e, "crew member"))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("crew member {nip}")));
        }
        info!(nip, "Crew member deleted");
        Ok(())
    }

    /// Insert each member independently; failures are tallied, not raised
    pub async fn bulk_create(&self, members: Vec<NewCrewMember>) -> BulkReport {
        let mut report = BulkReport::default();
        for member in members {
            let nip = member.nip;
            match self.create(member).await {
                Ok(_) => report.created += 1,
                Err(e) => {
                    warn!(nip, "Bulk roster insert failed: {}", e);
                    report.failed += 1;
                }
            }
        }
        info!(created = report.created, failed = report.failed, "Bulk roster import finished");
        report
    }

    pub async fn set_password(&self, nip: i64, password: &str) -> Result<()> {
        if password.len() < 8 {
            return Err(Error::invalid("password", "must be at least 8 characters"));
        }
        let hash = hash_password(password)?;
        let result = sqlx::query(
            "UPDATE tripulantes SET password_hash = ?, updated_at = CURRENT_TIMESTAMP WHERE nip = ?",
        )
        .bind(hash)
        .bind(nip)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("crew member {nip}")));
        }
        Ok(())
    }
}

fn validate_member(nip: i64, name: &str) -> Result<()> {
    let mut violations = Vec::new();
    if nip <= 0 {
        violations.push(FieldViolation::new("nip", "must be a positive number"));
    }
    if name.trim().is_empty() {
        violations.push(FieldViolation::new("name", "must not be empty"));
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(violations))
    }
}

fn normalize_email(email: Option<&str>) -> Option<String> {
    email
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
}

pub(crate) fn crew_from_row(row: &SqliteRow) -> Result<CrewMember> {
    let crew_type: String = row.try_get("crew_type")?;
    let status: String = row.try_get("status")?;
    let role_level: i64 = row.try_get("role_level")?;
    Ok(CrewMember {
        nip: row.try_get("nip")?,
        name: row.try_get("name")?,
        rank: row.try_get("rank")?,
        position: row.try_get("position")?,
        email: row.try_get("email")?,
        crew_type: crew_type.parse()?,
        status: status.parse::<CrewStatus>()?,
        role_level: RoleLevel::try_from(role_level)?,
    })
}
