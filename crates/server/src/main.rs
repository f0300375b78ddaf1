mod config;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Local;
use plexback_core::{
    BackupKind, BackupRun, BackupStatus, BackupSummary, DailySize, KindCount, TriggeredBy,
    format_bytes, format_duration, format_instant,
};
use plexback_db::Db;
use reconcile::{
    ReconcileStats, SchedulePolicy, enrich_from_stats, extract_stats_file, import_tracking_file,
    reconcile_full, reconcile_incremental, tracking_path_for,
};
use runner::{BackupSupervisor, SlotStatus, TriggerError};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServerConfig;

#[derive(Serialize)]
struct ApiError {
    error: String,
}

#[derive(Clone)]
struct AppState {
    db_path: PathBuf,
    log_path: PathBuf,
    cache_path: PathBuf,
    schedule: SchedulePolicy,
    extract_timeout: Duration,
    supervisor: Arc<BackupSupervisor>,
}

impl AppState {
    fn from_config(config: &ServerConfig) -> Self {
        Self {
            db_path: config.db_path(),
            log_path: config.backup_log_path.clone(),
            cache_path: config.stats_cache_path(),
            schedule: config.schedule.clone(),
            extract_timeout: Duration::from_secs(config.extract_timeout_secs),
            supervisor: Arc::new(BackupSupervisor::new(
                config.backup_script_path.clone(),
                Duration::from_secs(config.backup_cooldown_secs),
            )),
        }
    }
}

/// Backup run plus the formatted fields the dashboard renders directly.
#[derive(Serialize)]
struct RunView {
    id: i64,
    kind: BackupKind,
    status: BackupStatus,
    started_at: String,
    finished_at: Option<String>,
    duration_seconds: Option<f64>,
    duration_display: String,
    total_size_bytes: Option<i64>,
    size_display: String,
    transferred_bytes: Option<i64>,
    transferred_display: String,
    error_message: Option<String>,
    triggered_by: TriggeredBy,
}

impl From<BackupRun> for RunView {
    fn from(run: BackupRun) -> Self {
        Self {
            id: run.id,
            kind: run.kind,
            status: run.status,
            started_at: run.started_at,
            finished_at: run.finished_at,
            duration_display: run
                .duration_seconds
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string()),
            duration_seconds: run.duration_seconds,
            size_display: run
                .total_size_bytes
                .map(format_bytes)
                .unwrap_or_else(|| "-".to_string()),
            total_size_bytes: run.total_size_bytes,
            transferred_display: run
                .transferred_bytes
                .map(format_bytes)
                .unwrap_or_else(|| "-".to_string()),
            transferred_bytes: run.transferred_bytes,
            error_message: run.error_message,
            triggered_by: run.triggered_by,
        }
    }
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct DaysQuery {
    days: Option<i64>,
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    slot: SlotStatus,
    current: Option<RunView>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = config::resolve_config_path();
    let loaded = match config::load_or_create(&config_path) {
        Ok(loaded) => loaded,
        Err(err) => {
            error!("failed to load config: {}", err);
            std::process::exit(1);
        }
    };
    if loaded.created {
        info!("wrote default config to {}", config_path.display());
    }
    let config = loaded.config;

    if let Err(err) = fs::create_dir_all(&config.data_dir) {
        error!(
            "failed to create data dir {}: {}",
            config.data_dir.display(),
            err
        );
        std::process::exit(1);
    }
    if let Err(err) = setup_db(&config.db_path()) {
        error!("failed to initialize database: {}", err);
        std::process::exit(1);
    }

    let state = AppState::from_config(&config);

    // Initial import of the tracking file plus any cache a previous run left
    // behind. Failure here is logged and otherwise ignored; the poll loop
    // retries every tick anyway.
    let startup_state = state.clone();
    tokio::task::spawn_blocking(move || match startup_reconcile(&startup_state) {
        Ok(stats) if stats.imported > 0 || stats.enriched > 0 => {
            info!(
                imported = stats.imported,
                enriched = stats.enriched,
                "initial log import"
            );
        }
        Ok(_) => {}
        Err(err) => warn!("initial log import failed (non-fatal): {}", err),
    });

    let shutdown = CancellationToken::new();
    let poll_task = tokio::spawn(poll_loop(
        state.clone(),
        Duration::from_secs(config.poll_interval_secs.max(1)),
        shutdown.clone(),
    ));

    let app = build_app(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("bind server");
    info!("listening on {}", addr);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            signal_token.cancel();
        })
        .await
        .expect("serve");

    shutdown.cancel();
    let _ = poll_task.await;
}

fn setup_db(path: &std::path::Path) -> Result<(), plexback_db::DbError> {
    let mut db = Db::open(path)?;
    db.migrate()?;
    Ok(())
}

fn startup_reconcile(state: &AppState) -> Result<ReconcileStats, String> {
    let mut db = Db::open(&state.db_path).map_err(|err| err.to_string())?;
    reconcile_full(&mut db, &state.log_path, &state.cache_path, &state.schedule)
        .map_err(|err| err.to_string())
}

/// Background tick: reconcile new log entries and fold any finished manual
/// backup into the store. Every failure is logged and the loop keeps going;
/// cancellation is observed at the sleep point.
async fn poll_loop(state: AppState, poll_interval: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; startup already did this work.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let tick_state = state.clone();
                match tokio::task::spawn_blocking(move || run_tick(&tick_state)).await {
                    Ok(Ok(stats)) if stats.imported > 0 || stats.enriched > 0 => {
                        info!(
                            imported = stats.imported,
                            enriched = stats.enriched,
                            "reconciled new backup records"
                        );
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => error!("poll tick failed: {}", err),
                    Err(err) => error!("poll tick panicked: {}", err),
                }
            }
        }
    }
}

fn run_tick(state: &AppState) -> Result<ReconcileStats, String> {
    let mut db = Db::open(&state.db_path).map_err(|err| err.to_string())?;
    let stats = reconcile_incremental(
        &mut db,
        &state.log_path,
        &state.cache_path,
        &state.schedule,
        state.extract_timeout,
    )
    .map_err(|err| err.to_string())?;
    if let Some(record) = state
        .supervisor
        .reconcile(&db)
        .map_err(|err| err.to_string())?
    {
        info!(
            id = record.id,
            status = record.status.as_str(),
            "manual backup finished"
        );
    }
    Ok(stats)
}

fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/backups", get(backups))
        .route("/api/backups/stats", get(backup_stats))
        .route("/api/backups/kinds", get(backup_kinds))
        .route("/api/backups/sizes", get(backup_sizes))
        .route("/api/backup/trigger", post(trigger_backup))
        .route("/api/backup/status", get(backup_status))
        .route("/api/reconcile", post(reconcile_now))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn backups(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<RunView>>, (StatusCode, Json<ApiError>)> {
    let limit = query.limit.unwrap_or(20).min(500);
    let db = open_db(&state)?;
    let runs = db.recent_runs(limit).map_err(to_api_error)?;
    Ok(Json(runs.into_iter().map(RunView::from).collect()))
}

async fn backup_stats(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<BackupSummary>, (StatusCode, Json<ApiError>)> {
    let db = open_db(&state)?;
    db.summary(&window_start(query.days))
        .map(Json)
        .map_err(to_api_error)
}

async fn backup_kinds(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<Vec<KindCount>>, (StatusCode, Json<ApiError>)> {
    let db = open_db(&state)?;
    db.counts_by_kind(&window_start(query.days))
        .map(Json)
        .map_err(to_api_error)
}

async fn backup_sizes(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<Vec<DailySize>>, (StatusCode, Json<ApiError>)> {
    let db = open_db(&state)?;
    db.daily_sizes(&window_start(query.days))
        .map(Json)
        .map_err(to_api_error)
}

async fn trigger_backup(
    State(state): State<AppState>,
) -> Result<Json<RunView>, (StatusCode, Json<ApiError>)> {
    let db = open_db(&state)?;
    match state.supervisor.trigger(&db) {
        Ok(record) => {
            info!(id = record.id, "manual backup started");
            Ok(Json(RunView::from(record)))
        }
        Err(err) => {
            warn!("backup trigger refused: {}", err);
            Err(trigger_error_response(err))
        }
    }
}

async fn backup_status(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, (StatusCode, Json<ApiError>)> {
    let slot = state.supervisor.status();
    let current = if slot.running {
        let db = open_db(&state)?;
        db.latest_running(TriggeredBy::Manual)
            .map_err(to_api_error)?
            .map(RunView::from)
    } else {
        None
    };
    Ok(Json(StatusResponse { slot, current }))
}

/// On-demand refresh: import the tracking file and force a fresh extraction
/// before enriching, regardless of whether anything new was imported.
async fn reconcile_now(
    State(state): State<AppState>,
) -> Result<Json<ReconcileStats>, (StatusCode, Json<ApiError>)> {
    let work_state = state.clone();
    let stats = tokio::task::spawn_blocking(move || -> Result<ReconcileStats, String> {
        let mut db = Db::open(&work_state.db_path).map_err(|err| err.to_string())?;
        let tracking_path = tracking_path_for(&work_state.log_path);
        let imported = import_tracking_file(&mut db, &tracking_path, &work_state.schedule)
            .map_err(|err| err.to_string())?;
        let mut enriched = 0;
        if extract_stats_file(
            &work_state.log_path,
            &work_state.cache_path,
            work_state.extract_timeout,
        )
        .is_some()
        {
            enriched = enrich_from_stats(&mut db, &work_state.cache_path)
                .map_err(|err| err.to_string())?;
        }
        Ok(ReconcileStats { imported, enriched })
    })
    .await
    .map_err(to_api_error)?
    .map_err(to_api_error)?;
    Ok(Json(stats))
}

fn window_start(days: Option<i64>) -> String {
    let days = days.unwrap_or(30).clamp(1, 3650);
    format_instant(Local::now().naive_local() - chrono::Duration::days(days))
}

fn open_db(state: &AppState) -> Result<Db, (StatusCode, Json<ApiError>)> {
    Db::open(&state.db_path).map_err(to_api_error)
}

fn to_api_error(err: impl std::fmt::Display) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError {
            error: err.to_string(),
        }),
    )
}

fn trigger_error_response(err: TriggerError) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        TriggerError::Rejected { .. } => StatusCode::CONFLICT,
        TriggerError::ScriptMissing { .. } | TriggerError::Spawn { .. } | TriggerError::Db(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ApiError {
            error: err.to_string(),
        }),
    )
}
