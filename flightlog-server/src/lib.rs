//! flightlog-server library - squadron flight log service
//!
//! Flight logging with a derived qualification currency index, served over
//! HTTP/JSON. The binary in `main.rs` wires configuration, the database and
//! the exporter into an [`AppState`] and serves [`build_router`].

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use flightlog_common::access::AccessPolicy;
use flightlog_common::auth::TokenService;
use flightlog_common::config::Config;
use flightlog_common::db::load_access_policy;
use flightlog_common::Result;

pub mod api;
pub mod error;
pub mod pagination;
pub mod services;

use services::bulk_exporter::ObjectSink;
use services::mailer::Mailer;
use services::{
    BulkExporter, Catalog, CurrencyIndex, CurrencyProjector, FlightLog, ReprocessOrchestrator, Roster,
    SessionService,
};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<Config>,
    /// Operation thresholds, read from the `permissions` table at startup
    pub policy: Arc<AccessPolicy>,
    pub catalog: Catalog,
    pub roster: Roster,
    pub flight_log: FlightLog,
    pub projector: CurrencyProjector,
    pub reprocess: ReprocessOrchestrator,
    pub exporter: BulkExporter,
    pub sessions: SessionService,
}

impl AppState {
    /// Wire every service over one pool
    ///
    /// Must run inside a tokio runtime: the exporter spawns its workers here.
    pub async fn build(
        db: SqlitePool,
        config: Config,
        sink: Arc<dyn ObjectSink>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self> {
        config.validate()?;

        let tokens = TokenService::new(
            config.resolve_jwt_secret()?,
            config.auth.access_token_minutes * 60,
            config.auth.refresh_token_days * 24 * 60 * 60,
        )?;
        let policy = load_access_policy(&db).await?;

        let catalog = Catalog::new(db.clone());
        let roster = Roster::new(db.clone());
        let index = CurrencyIndex::new(config.currency.epoch);
        let exporter = BulkExporter::new(&config.export, config.environment, sink, db.clone(), catalog.clone());
        let flight_log = FlightLog::new(db.clone(), catalog.clone(), index).with_exporter(exporter.clone());
        let projector = CurrencyProjector::new(db.clone(), catalog.clone(), config.currency.epoch);
        let reprocess = ReprocessOrchestrator::new(
            db.clone(),
            catalog.clone(),
            flight_log.clone(),
            config.currency.reprocess_batch_size,
        );
        let sessions = SessionService::new(roster.clone(), tokens, mailer, config.smtp.reset_url.clone());

        Ok(Self {
            db,
            config: Arc::new(config),
            policy: Arc::new(policy),
            catalog,
            roster,
            flight_log,
            projector,
            reprocess,
            exporter,
            sessions,
        })
    }
}

/// Build application router
///
/// `/health` and `/auth/*` are public; everything else requires a bearer
/// access token.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    let protected = Router::new()
        .route("/flights", get(api::flights::list_flights).post(api::flights::create_flight))
        .route("/flights/years", get(api::flights::list_years))
        .route("/flights/reprocess", post(api::flights::reprocess))
        .route("/flights/export", post(api::flights::export))
        .route(
            "/flights/:id",
            get(api::flights::get_flight)
                .put(api::flights::update_flight)
                .delete(api::flights::delete_flight),
        )
        .route(
            "/qualifications",
            get(api::qualifications::list_qualifications).post(api::qualifications::create_qualification),
        )
        .route(
            "/qualifications/:id",
            get(api::qualifications::get_qualification)
                .patch(api::qualifications::update_qualification)
                .delete(api::qualifications::delete_qualification),
        )
        .route("/users", get(api::users::list_users).post(api::users::create_user))
        .route("/users/bulk", post(api::users::bulk_create_users))
        .route(
            "/users/:nip",
            get(api::users::get_user)
                .patch(api::users::update_user)
                .delete(api::users::delete_user),
        )
        .route("/users/:nip/currency", get(api::users::user_currency))
        .route("/dashboard/statistics", get(api::dashboard::statistics))
        .route("/dashboard/expiring-soon", get(api::dashboard::expiring_soon))
        .layer(middleware::from_fn_with_state(state.clone(), api::auth_middleware));

    let public = Router::new()
        .merge(api::health_routes())
        .merge(api::session_routes());

    let cors = cors_layer(&state.config.cors_origins);

    let router = Router::new()
        .merge(protected)
        .merge(public)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// Credentialed CORS for the configured origins; `None` when no origin is configured
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(allowed)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
    )
}
