//! Full rebuild of the currency index
//!
//! Replays every flight in date order through the same citation function the
//! incremental path uses. Existing keys start from the epoch baseline so a
//! pair whose citations have all disappeared ends up exactly where
//! reconciliation would have put it. Dirty entries are committed every
//! `batch_size` flights, each batch in its own transaction.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{error, info};

use flightlog_common::Result;

use super::catalog::Catalog;
use super::currency_index::{citations, CitationKey, CurrencyIndex};
use super::flight_log::FlightLog;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReprocessReport {
    pub total_flights: usize,
    pub processed: usize,
    /// Failed batch commits
    pub errors: usize,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    last_validated: NaiveDate,
    dirty: bool,
}

#[derive(Clone)]
pub struct ReprocessOrchestrator {
    db: SqlitePool,
    catalog: Catalog,
    flight_log: FlightLog,
    index: CurrencyIndex,
    batch_size: usize,
}

impl ReprocessOrchestrator {
    pub fn new(db: SqlitePool, catalog: Catalog, flight_log: FlightLog, batch_size: usize) -> Self {
        let index = flight_log.index();
        Self {
            db,
            catalog,
            flight_log,
            index,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn rebuild_all(&self) -> Result<ReprocessReport> {
        let started = Instant::now();
        info!("Currency rebuild started");

        let flights = self.flight_log.all_in_date_order().await?;
        self.catalog.invalidate().await;
        let snapshot = self.catalog.snapshot().await?;

        let mut state: HashMap<CitationKey, Entry> = HashMap::new();
        let existing = sqlx::query("SELECT crew_nip, qual_id FROM tripulante_qualificacoes")
            .fetch_all(&self.db)
            .await?;
        for row in &existing {
            state.insert(
                (row.try_get("crew_nip")?, row.try_get("qual_id")?),
                Entry {
                    last_validated: self.index.epoch(),
                    dirty: true,
                },
            );
        }

        let total_flights = flights.len();
        let mut processed = 0;
        let mut errors = 0;

        for flight in &flights {
            let date = flight.fields.date;
            for participation in &flight.participations {
                for qual_id in citations(participation, &snapshot) {
                    state
                        .entry((participation.nip, qual_id))
                        .and_modify(|e| {
                            if date > e.last_validated {
                                e.last_validated = date;
                                e.dirty = true;
                            }
                        })
                        .or_insert(Entry {
                            last_validated: date,
                            dirty: true,
                        });
                }
            }

            processed += 1;
            if processed % self.batch_size == 0 {
                if !self.flush(&mut state).await {
                    errors += 1;
                }
                info!(processed, total = total_flights, "Rebuild progress");
            }
        }

        if !self.flush(&mut state).await {
            errors += 1;
        }

        let report = ReprocessReport {
            total_flights,
            processed,
            errors,
            duration_seconds: started.elapsed().as_secs_f64(),
        };
        info!(
            total_flights = report.total_flights,
            processed = report.processed,
            errors = report.errors,
            "Currency rebuild finished in {:.2}s",
            report.duration_seconds
        );
        Ok(report)
    }

    /// Commit dirty entries; on failure they stay dirty for the next batch
    async fn flush(&self, state: &mut HashMap<CitationKey, Entry>) -> bool {
        let mut dirty: Vec<(CitationKey, NaiveDate)> = state
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(k, e)| (*k, e.last_validated))
            .collect();
        if dirty.is_empty() {
            return true;
        }
        dirty.sort_unstable();

        match self.write_batch(&dirty).await {
            Ok(()) => {
                for (key, _) in &dirty {
                    if let Some(entry) = state.get_mut(key) {
                        entry.dirty = false;
                    }
                }
                true
            }
            Err(e) => {
                error!(entries = dirty.len(), "Rebuild batch rolled back: {}", e);
                false
            }
        }
    }

    async fn write_batch(&self, entries: &[(CitationKey, NaiveDate)]) -> Result<()> {
        let mut tx = self.db.begin().await?;
        for ((crew_nip, qual_id), last_validated) in entries {
            sqlx::query(
                r#"
                INSERT INTO tripulante_qualificacoes (crew_nip, qual_id, last_validated)
                VALUES (?, ?, ?)
                ON CONFLICT(crew_nip, qual_id)
                DO UPDATE SET last_validated = excluded.last_validated
                "#,
            )
            .bind(crew_nip)
            .bind(qual_id)
            .bind(last_validated)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
