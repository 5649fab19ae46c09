use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use orbtrack_common::{TickSnapshot, SNAPSHOT_FILE};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

mod config;
use config::Config;

const DEFAULT_CONFIG_PATH: &str = "server.toml";

#[derive(Clone)]
struct AppState {
    data_directory: Arc<PathBuf>,
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn read_snapshot(path: &PathBuf) -> anyhow::Result<Option<TickSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path).await?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Stats endpoint - summary of the latest published tick
async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let path = state.data_directory.join(SNAPSHOT_FILE);

    match read_snapshot(&path).await {
        Ok(Some(snapshot)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "running",
                "service": "orbtrack-server",
                "version": env!("CARGO_PKG_VERSION"),
                "tick": snapshot.tick,
                "last_tick": snapshot.instant,
                "objects": snapshot.objects.len(),
                "failed_objects": snapshot.failed_objects(),
                "log_len": snapshot.log_len,
                "warnings": snapshot.warnings.len(),
            })),
        ),
        Ok(None) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "waiting",
                "service": "orbtrack-server",
                "version": env!("CARGO_PKG_VERSION"),
            })),
        ),
        Err(e) => {
            error!("Failed to read snapshot {}: {}", path.display(), e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "status": "error",
                    "error": e.to_string(),
                })),
            )
        }
    }
}

fn build_router(config: &Config) -> Router {
    // Setup CORS if enabled
    let cors = if config.enable_cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    let state = AppState {
        data_directory: Arc::new(PathBuf::from(&config.data_directory)),
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        // Published files under /data/*
        .nest_service(
            &format!("/{}", config.url_prefix.trim_matches('/')),
            ServeDir::new(&config.data_directory),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded configuration: {:?}", config);

    let data_path = PathBuf::from(&config.data_directory);
    if !data_path.exists() {
        error!("Data directory does not exist: {}", config.data_directory);
        anyhow::bail!("Data directory not found: {}", config.data_directory);
    }
    info!("Serving tracker output from: {}", data_path.display());

    let app = build_router(&config);

    let ip = if config.bind_all { [0, 0, 0, 0] } else { [127, 0, 0, 1] };
    let addr = SocketAddr::from((ip, config.port));
    info!("Starting snapshot server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn config_for(dir: &TempDir) -> Config {
        Config {
            data_directory: dir.path().to_string_lossy().to_string(),
            ..Config::default()
        }
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_stats_waits_for_first_snapshot() {
        let dir = TempDir::new().unwrap();
        let app = build_router(&config_for(&dir));

        assert_eq!(get_status(app.clone(), "/health").await, StatusCode::OK);
        assert_eq!(get_status(app, "/stats").await, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_serves_published_snapshot() {
        let dir = TempDir::new().unwrap();
        let snapshot = TickSnapshot {
            tick: 12,
            log_len: 24,
            ..Default::default()
        };
        std::fs::write(
            dir.path().join(SNAPSHOT_FILE),
            serde_json::to_string(&snapshot).unwrap(),
        )
        .unwrap();
        let app = build_router(&config_for(&dir));

        assert_eq!(get_status(app.clone(), "/stats").await, StatusCode::OK);
        assert_eq!(get_status(app.clone(), "/data/snapshot.json").await, StatusCode::OK);
        assert_eq!(get_status(app, "/data/missing.csv").await, StatusCode::NOT_FOUND);
    }
}
