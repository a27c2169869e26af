//! Archival export of flight documents
//!
//! A fixed pool of worker tasks drains a bounded queue and writes each flight,
//! serialized as a self-contained JSON document, to an [`ObjectSink`] under
//! the key `1M {airtask} {DDMonYYYY} {HHMM} {tail}.1m`.
//!
//! - `export()` acknowledges immediately; documents are built and queued in
//!   the background
//! - each item is attempted up to `max_attempts` times with linear backoff
//! - failures are counted per batch and logged, never returned to callers
//! - in development the exporter is disabled and every call reports `skipped`

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use flightlog_common::config::{Environment, ExportConfig};
use flightlog_common::models::{Flight, FlightFields};
use flightlog_common::time::{compact_clock, compact_date};
use flightlog_common::Result;

use super::catalog::Catalog;

// ========================================
// Sinks
// ========================================

/// Delivery failure; absorbed by the retry loop
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sink rejected object with status {0}")]
    Status(u16),

    #[error("{0}")]
    Other(String),
}

/// Destination for exported documents; writes must be idempotent per key
#[async_trait]
pub trait ObjectSink: Send + Sync {
    async fn put(&self, key: &str, body: &[u8]) -> std::result::Result<(), SinkError>;

    fn describe(&self) -> String;
}

/// Local archive directory
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ObjectSink for DirectorySink {
    async fn put(&self, key: &str, body: &[u8]) -> std::result::Result<(), SinkError> {
        if key.contains('/') || key.contains('\\') {
            return Err(SinkError::Other(format!("invalid object key '{key}'")));
        }
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write-then-rename so a reader never sees half a document
        let tmp = self.dir.join(format!(".{key}.part"));
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, self.dir.join(key)).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }
}

/// Remote object store addressed as `PUT {base_url}/{key}`
pub struct HttpSink {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpSink {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            token,
        }
    }
}

#[async_trait]
impl ObjectSink for HttpSink {
    async fn put(&self, key: &str, body: &[u8]) -> std::result::Result<(), SinkError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| SinkError::Other(format!("invalid sink URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SinkError::Other("sink URL cannot be a base".into()))?
            .pop_if_empty()
            .push(key);

        let mut request = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SinkError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("http {}", self.base_url)
    }
}

/// Sink selected by configuration: remote when `sink_url` is set, else the archive directory
pub fn sink_from_config(config: &ExportConfig) -> Arc<dyn ObjectSink> {
    match &config.sink_url {
        Some(url) => Arc::new(HttpSink::new(url.clone(), config.sink_token.clone())),
        None => Arc::new(DirectorySink::new(config.sink_dir.clone())),
    }
}

// ========================================
// Documents
// ========================================

/// Object key for a flight; `None` when the flight cannot be named
pub fn export_key(fields: &FlightFields) -> Option<String> {
    let airtask = fields.airtask.trim();
    if airtask.is_empty() || fields.tail <= 0 {
        return None;
    }
    let clock = compact_clock(&fields.departure)?;
    Some(format!(
        "1M {} {} {} {}.1m",
        airtask,
        compact_date(fields.date),
        clock,
        fields.tail
    ))
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentCrew {
    pub nip: i64,
    pub name: Option<String>,
    pub position: String,
    pub qualifications: Vec<String>,
}

/// Self-contained archival form of a flight
#[derive(Debug, Clone, Serialize)]
pub struct FlightDocument {
    pub filename: String,
    pub flight: Flight,
    pub crew: Vec<DocumentCrew>,
}

impl FlightDocument {
    fn build(
        filename: String,
        flight: Flight,
        crew_names: &HashMap<i64, String>,
        qual_names: &HashMap<i64, String>,
    ) -> Self {
        let crew = flight
            .participations
            .iter()
            .map(|p| DocumentCrew {
                nip: p.nip,
                name: crew_names.get(&p.nip).cloned(),
                position: p.position.clone(),
                qualifications: p
                    .qualifications
                    .iter()
                    .map(|id| qual_names.get(id).cloned().unwrap_or_else(|| format!("#{id}")))
                    .collect(),
            })
            .collect();
        Self {
            filename,
            flight,
            crew,
        }
    }
}

// ========================================
// Batches
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Queued,
    Skipped,
}

/// Immediate answer to an export request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportAck {
    pub status: ExportStatus,
    pub batch_id: Option<Uuid>,
    pub queued: usize,
    pub skipped_out_of_scope: usize,
}

/// Final accounting of a batch; `succeeded + failed == total`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub batch_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Waits for a batch to finish
pub struct ExportHandle {
    batch_id: Uuid,
    done: oneshot::Receiver<ExportReport>,
}

impl ExportHandle {
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub async fn wait(self) -> Option<ExportReport> {
        self.done.await.ok()
    }
}

pub struct ExportTicket {
    pub ack: ExportAck,
    pub handle: Option<ExportHandle>,
}

struct BatchTracker {
    batch_id: Uuid,
    total: usize,
    progress_interval: usize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    done: Mutex<Option<oneshot::Sender<ExportReport>>>,
}

impl BatchTracker {
    fn new(total: usize, progress_interval: usize) -> (Arc<Self>, ExportHandle) {
        let batch_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let tracker = Arc::new(Self {
            batch_id,
            total,
            progress_interval: progress_interval.max(1),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            done: Mutex::new(Some(tx)),
        });
        if total == 0 {
            tracker.finish();
        }
        (tracker, ExportHandle { batch_id, done: rx })
    }

    fn record(&self, ok: bool) {
        if ok {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        let succeeded = self.succeeded.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let completed = succeeded + failed;

        if completed % self.progress_interval == 0 && completed < self.total {
            info!(
                batch_id = %self.batch_id,
                completed,
                total = self.total,
                succeeded,
                failed,
                "Export progress"
            );
        }
        if completed == self.total {
            self.finish();
        }
    }

    fn finish(&self) {
        let report = ExportReport {
            batch_id: self.batch_id,
            total: self.total,
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        };
        let sender = match self.done.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(sender) = sender {
            info!(
                batch_id = %report.batch_id,
                total = report.total,
                succeeded = report.succeeded,
                failed = report.failed,
                "Export batch finished"
            );
            let _ = sender.send(report);
        }
    }
}

struct ExportJob {
    flight_id: i64,
    key: String,
    body: Vec<u8>,
    batch: Arc<BatchTracker>,
}

// ========================================
// Exporter
// ========================================

#[derive(Clone)]
pub struct BulkExporter {
    inner: Arc<Inner>,
}

struct Inner {
    /// `None` when the environment disables export
    queue: Option<mpsc::Sender<ExportJob>>,
    db: SqlitePool,
    catalog: Catalog,
    progress_interval: usize,
}

impl BulkExporter {
    /// Start the worker pool (production) or a disabled exporter (development)
    pub fn new(
        config: &ExportConfig,
        environment: Environment,
        sink: Arc<dyn ObjectSink>,
        db: SqlitePool,
        catalog: Catalog,
    ) -> Self {
        let queue = if environment.is_production() {
            let (tx, rx) = mpsc::channel::<ExportJob>(config.queue_capacity.max(1));
            let rx = Arc::new(tokio::sync::Mutex::new(rx));
            let backoff = Duration::from_millis(config.retry_backoff_ms);

            for worker_id in 0..config.workers {
                let rx = Arc::clone(&rx);
                let sink = Arc::clone(&sink);
                let max_attempts = config.max_attempts;
                tokio::spawn(async move {
                    worker_task(worker_id, rx, sink, max_attempts, backoff).await;
                });
            }
            info!(
                "Export pool started with {} workers writing to {}",
                config.workers,
                sink.describe()
            );
            Some(tx)
        } else {
            info!("Export disabled in development environment");
            None
        };

        Self {
            inner: Arc::new(Inner {
                queue,
                db,
                catalog,
                progress_interval: config.progress_interval,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.queue.is_some()
    }

    /// Queue flights for export and return at once
    pub fn export(&self, flights: Vec<Flight>) -> ExportTicket {
        let Some(queue) = self.inner.queue.clone() else {
            return ExportTicket {
                ack: ExportAck {
                    status: ExportStatus::Skipped,
                    batch_id: None,
                    queued: 0,
                    skipped_out_of_scope: 0,
                },
                handle: None,
            };
        };

        let mut in_scope = Vec::with_capacity(flights.len());
        let mut skipped_out_of_scope = 0;
        for flight in flights {
            match export_key(&flight.fields) {
                Some(key) => in_scope.push((key, flight)),
                None => {
                    warn!(flight_id = flight.id, "Flight cannot be named for export; skipped");
                    skipped_out_of_scope += 1;
                }
            }
        }

        let (batch, handle) = BatchTracker::new(in_scope.len(), self.inner.progress_interval);
        let ack = ExportAck {
            status: ExportStatus::Queued,
            batch_id: Some(batch.batch_id),
            queued: in_scope.len(),
            skipped_out_of_scope,
        };
        info!(
            batch_id = %batch.batch_id,
            queued = ack.queued,
            skipped_out_of_scope,
            "Export batch accepted"
        );

        if !in_scope.is_empty() {
            let db = self.inner.db.clone();
            let catalog = self.inner.catalog.clone();
            tokio::spawn(async move {
                enqueue_batch(db, catalog, queue, batch, in_scope).await;
            });
        }

        ExportTicket {
            ack,
            handle: Some(handle),
        }
    }

    /// Fire-and-forget export of a single committed flight
    pub fn export_one(&self, flight: Flight) {
        if !self.is_enabled() {
            debug!(flight_id = flight.id, "Export disabled; flight not shipped");
            return;
        }
        let _ = self.export(vec![flight]);
    }
}

/// Build documents and feed the queue; every flight is accounted for exactly once
async fn enqueue_batch(
    db: SqlitePool,
    catalog: Catalog,
    queue: mpsc::Sender<ExportJob>,
    batch: Arc<BatchTracker>,
    flights: Vec<(String, Flight)>,
) {
    let names = match load_names(&db, &catalog).await {
        Ok(names) => names,
        Err(e) => {
            error!(batch_id = %batch.batch_id, "Failed to load names for export: {}", e);
            for _ in &flights {
                batch.record(false);
            }
            return;
        }
    };
    let (crew_names, qual_names) = names;

    for (key, flight) in flights {
        let flight_id = flight.id;
        let document = FlightDocument::build(key.clone(), flight, &crew_names, &qual_names);
        let body = match serde_json::to_vec_pretty(&document) {
            Ok(body) => body,
            Err(e) => {
                error!(flight_id, "Failed to serialize flight document: {}", e);
                batch.record(false);
                continue;
            }
        };

        let job = ExportJob {
            flight_id,
            key,
            body,
            batch: Arc::clone(&batch),
        };
        if let Err(mpsc::error::SendError(job)) = queue.send(job).await {
            error!(flight_id, "Export queue closed");
            job.batch.record(false);
        }
    }
}

async fn load_names(db: &SqlitePool, catalog: &Catalog) -> Result<(HashMap<i64, String>, HashMap<i64, String>)> {
    let mut crew_names = HashMap::new();
    for row in sqlx::query("SELECT nip, name FROM tripulantes").fetch_all(db).await? {
        crew_names.insert(row.try_get("nip")?, row.try_get("name")?);
    }

    let snapshot = catalog.snapshot().await?;
    let qual_names = snapshot.iter().map(|q| (q.id, q.name.clone())).collect();
    Ok((crew_names, qual_names))
}

async fn worker_task(
    worker_id: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<ExportJob>>>,
    sink: Arc<dyn ObjectSink>,
    max_attempts: u32,
    backoff: Duration,
) {
    debug!("Export worker {} started", worker_id);
    loop {
        let job = {
            let mut rx = queue.lock().await;
            match rx.recv().await {
                Some(job) => job,
                None => {
                    debug!("Export worker {} shutting down (queue closed)", worker_id);
                    return;
                }
            }
        };

        let ok = deliver(sink.as_ref(), &job, max_attempts, backoff).await;
        job.batch.record(ok);
    }
}

async fn deliver(sink: &dyn ObjectSink, job: &ExportJob, max_attempts: u32, backoff: Duration) -> bool {
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match sink.put(&job.key, &job.body).await {
            Ok(()) => {
                debug!(flight_id = job.flight_id, key = %job.key, attempt, "Flight exported");
                return true;
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    flight_id = job.flight_id,
                    attempt,
                    "Export attempt failed, retrying: {}",
                    e
                );
                tokio::time::sleep(backoff * attempt).await;
            }
            Err(e) => {
                error!(
                    flight_id = job.flight_id,
                    key = %job.key,
                    attempts = max_attempts,
                    "Export failed: {}",
                    e
                );
            }
        }
    }
    false
}
