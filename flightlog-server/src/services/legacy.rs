//! Legacy flight import
//!
//! Older exports come in two shapes that differ only in how a crew member's
//! qualifications are listed:
//!
//! - named: `qual1` .. `qual6` hold qualification names
//! - flagged: `qualifications` is an object of `{name: bool}` flags
//!
//! Both carry landing counts under their catalog names (`ATR`, `ATN`,
//! `precapp`, `nprecapp`). Records are turned into ordinary [`FlightInput`]s
//! with name references and go through the normal write path, so name
//! resolution, soft skips and currency updates behave exactly as for API
//! writes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use flightlog_common::models::{FlightFields, FlightInput, LandingCounts, ParticipationInput, QualificationRef};
use flightlog_common::{Error, Result};

use super::flight_log::FlightLog;

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyFlight {
    #[serde(flatten)]
    pub fields: FlightFields,
    #[serde(alias = "crew")]
    pub pilots: Vec<LegacyParticipant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyParticipant {
    pub nip: i64,
    #[serde(default)]
    pub position: String,
    #[serde(default, rename = "ATR")]
    pub atr: Option<i64>,
    #[serde(default, rename = "ATN")]
    pub atn: Option<i64>,
    #[serde(default)]
    pub precapp: Option<i64>,
    #[serde(default)]
    pub nprecapp: Option<i64>,
    #[serde(flatten)]
    pub qualifications: LegacyQualifications,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LegacyQualifications {
    Flagged {
        qualifications: BTreeMap<String, bool>,
    },
    Named {
        #[serde(default)]
        qual1: Option<String>,
        #[serde(default)]
        qual2: Option<String>,
        #[serde(default)]
        qual3: Option<String>,
        #[serde(default)]
        qual4: Option<String>,
        #[serde(default)]
        qual5: Option<String>,
        #[serde(default)]
        qual6: Option<String>,
    },
}

impl LegacyQualifications {
    /// Qualification names in column/flag order, blanks removed
    pub fn names(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            LegacyQualifications::Flagged { qualifications } => qualifications
                .iter()
                .filter(|(_, set)| **set)
                .map(|(name, _)| name.as_str())
                .collect(),
            LegacyQualifications::Named {
                qual1,
                qual2,
                qual3,
                qual4,
                qual5,
                qual6,
            } => [qual1, qual2, qual3, qual4, qual5, qual6]
                .into_iter()
                .flatten()
                .map(String::as_str)
                .collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Convert one legacy record into a write request
pub fn transform(record: LegacyFlight) -> FlightInput {
    let participations = record
        .pilots
        .into_iter()
        .map(|p| ParticipationInput {
            nip: p.nip,
            position: p.position,
            landings: LandingCounts {
                day_landings: p.atr,
                night_landings: p.atn,
                prec_approaches: p.precapp,
                non_prec_approaches: p.nprecapp,
            },
            qualifications: p
                .qualifications
                .names()
                .into_iter()
                .map(QualificationRef::Name)
                .collect(),
        })
        .collect();

    FlightInput {
        fields: record.fields,
        participations,
    }
}

/// Parse a legacy export: a JSON array of flight records
pub fn parse(content: &str) -> Result<Vec<LegacyFlight>> {
    serde_json::from_str(content).map_err(|e| Error::invalid("file", format!("not a legacy flight export: {e}")))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub failed: usize,
}

/// Import every record in date order; one failing record does not stop the rest
pub async fn import(flight_log: &FlightLog, mut records: Vec<LegacyFlight>) -> ImportReport {
    records.sort_by_key(|r| r.fields.date);

    let mut report = ImportReport::default();
    for record in records {
        let airtask = record.fields.airtask.clone();
        let date = record.fields.date;
        match flight_log.create(transform(record)).await {
            Ok(_) => report.imported += 1,
            Err(e) => {
                warn!(airtask = %airtask, date = %date, "Legacy flight rejected: {}", e);
                report.failed += 1;
            }
        }
    }
    info!(imported = report.imported, failed = report.failed, "Legacy import finished");
    report
}

pub async fn import_file(flight_log: &FlightLog, path: &Path) -> Result<ImportReport> {
    let content = tokio::fs::read_to_string(path).await?;
    let records = parse(&content)?;
    info!("Importing {} legacy flights from {}", records.len(), path.display());
    Ok(import(flight_log, records).await)
}
