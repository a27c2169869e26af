//! Bulk exporter accounting and sink behaviour

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flightlog_common::config::{Environment, ExportConfig};
use flightlog_common::db::init_memory_database;
use flightlog_common::models::{Flight, FlightFields, LandingCounts, NewCrewMember, Participation};
use flightlog_common::{CrewType, RoleLevel};
use flightlog_server::services::bulk_exporter::{DirectorySink, ExportStatus, ObjectSink, SinkError};
use flightlog_server::services::{BulkExporter, Catalog, Roster};

fn export_config(workers: usize) -> ExportConfig {
    ExportConfig {
        workers,
        progress_interval: 2,
        max_attempts: 3,
        retry_backoff_ms: 1,
        queue_capacity: 4,
        ..Default::default()
    }
}

fn flight(id: i64, tail: i64) -> Flight {
    Flight {
        id,
        fields: FlightFields {
            airtask: "1A23".into(),
            date: NaiveDate::from_ymd_opt(2025, 5, 10).unwrap(),
            origin: "LPMT".into(),
            destination: "LPLA".into(),
            departure: format!("{:02}:30", id % 24),
            arrival: "23:59".into(),
            duration: "01:00".into(),
            flight_type: "OPER".into(),
            action: "SAR".into(),
            tail,
            landings: 1,
            passengers: 0,
            doe: 0,
            cargo: 0,
            fuel: 0,
            orm: 0,
            num_crew: 1,
            ops_timestamps: None,
        },
        participations: vec![Participation {
            nip: 135885,
            position: "PC".into(),
            landings: LandingCounts::default(),
            qualifications: vec![],
        }],
    }
}

async fn exporter(environment: Environment, workers: usize, sink: Arc<dyn ObjectSink>) -> BulkExporter {
    let db = init_memory_database().await.unwrap();
    Roster::new(db.clone())
        .create(NewCrewMember {
            nip: 135885,
            name: "Silva".into(),
            rank: "CAP".into(),
            position: "PC".into(),
            email: None,
            crew_type: CrewType::Pilot,
            status: Default::default(),
            role_level: RoleLevel::Viewer,
            password: None,
        })
        .await
        .unwrap();
    let catalog = Catalog::new(db.clone());
    BulkExporter::new(&export_config(workers), environment, sink, db, catalog)
}

/// Fails the first `failures` calls, then succeeds
struct FlakySink {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakySink {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ObjectSink for FlakySink {
    async fn put(&self, _key: &str, _body: &[u8]) -> Result<(), SinkError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(SinkError::Other("unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn describe(&self) -> String {
        "flaky".into()
    }
}

#[tokio::test]
async fn test_directory_export_accounts_every_flight() {
    let dir = tempfile::tempdir().unwrap();
    let sink: Arc<dyn ObjectSink> = Arc::new(DirectorySink::new(dir.path()));
    let exporter = exporter(Environment::Production, 3, sink).await;

    let flights: Vec<Flight> = (1..=10).map(|id| flight(id, 16701)).collect();
    let ticket = exporter.export(flights);
    assert_eq!(ticket.ack.status, ExportStatus::Queued);
    assert_eq!(ticket.ack.queued, 10);

    let handle = ticket.handle.unwrap();
    assert_eq!(Some(handle.batch_id()), ticket.ack.batch_id);
    let report = handle.wait().await.unwrap();
    assert_eq!(Some(report.batch_id), ticket.ack.batch_id);
    assert_eq!(report.total, 10);
    assert_eq!(report.succeeded + report.failed, 10);
    assert_eq!(report.succeeded, 10);

    let path = dir.path().join("1M 1A23 10May2025 0130 16701.1m");
    let body = std::fs::read_to_string(&path).unwrap();
    let document: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(document["filename"], "1M 1A23 10May2025 0130 16701.1m");
    assert_eq!(document["crew"][0]["name"], "Silva");
    assert_eq!(document["flight"]["type"], "OPER");
}

#[tokio::test]
async fn test_failing_sink_counts_failures_after_retries() {
    let sink = Arc::new(FlakySink::new(usize::MAX));
    let exporter = exporter(Environment::Production, 2, sink.clone()).await;

    let ticket = exporter.export((1..=4).map(|id| flight(id, 16701)).collect());
    let report = ticket.handle.unwrap().wait().await.unwrap();

    assert_eq!((report.succeeded, report.failed), (0, 4));
    assert_eq!(sink.calls.load(Ordering::SeqCst), 4 * 3);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let sink = Arc::new(FlakySink::new(2));
    let exporter = exporter(Environment::Production, 1, sink.clone()).await;

    let ticket = exporter.export(vec![flight(1, 16701)]);
    let report = ticket.handle.unwrap().wait().await.unwrap();

    assert_eq!((report.succeeded, report.failed), (1, 0));
    assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unnamed_flights_are_out_of_scope() {
    let sink = Arc::new(FlakySink::new(0));
    let exporter = exporter(Environment::Production, 2, sink.clone()).await;

    let ticket = exporter.export(vec![flight(1, 16701), flight(2, 0), flight(3, 16702)]);
    assert_eq!(ticket.ack.queued, 2);
    assert_eq!(ticket.ack.skipped_out_of_scope, 1);

    let report = ticket.handle.unwrap().wait().await.unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.succeeded, 2);
}

#[tokio::test]
async fn test_development_skips_export() {
    let sink = Arc::new(FlakySink::new(0));
    let exporter = exporter(Environment::Development, 2, sink.clone()).await;
    assert!(!exporter.is_enabled());

    let ticket = exporter.export(vec![flight(1, 16701)]);
    assert_eq!(ticket.ack.status, ExportStatus::Skipped);
    assert!(ticket.ack.batch_id.is_none());
    assert!(ticket.handle.is_none());

    exporter.export_one(flight(2, 16701));
    tokio::task::yield_now().await;
    assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
}
