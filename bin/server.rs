// Organisation Registry Cache - Web Server
// Read-only REST API over the stored artifacts, plus a build trigger

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use orgcache::{build, ArtifactStore, BuildOptions, EntityClass, Settings};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Shared application state
#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    store: Arc<Mutex<ArtifactStore>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    error!(status = status.as_u16(), "{}", message);
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
    )
        .into_response()
}

/// Run `f` against the locked store
fn with_store<T>(state: &AppState, f: impl FnOnce(&ArtifactStore) -> orgcache::Result<T>) -> Result<T, Response> {
    let store = state
        .store
        .lock()
        .map_err(|_| failure(StatusCode::INTERNAL_SERVER_ERROR, "artifact store lock poisoned"))?;
    f(&store).map_err(|e| failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Response {
    ApiResponse::ok(orgcache::VERSION)
}

/// GET /api/artifacts - Stored artifacts with fingerprints
async fn get_artifacts(State(state): State<AppState>) -> Response {
    match with_store(&state, |store| store.list_artifacts()) {
        Ok(artifacts) => ApiResponse::ok(artifacts),
        Err(response) => response,
    }
}

/// GET /api/tables/:name - One stored entity table
async fn get_table(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Some(class) = EntityClass::from_name(&name) else {
        return failure(StatusCode::NOT_FOUND, format!("unknown class {}", name));
    };

    let payload = match with_store(&state, |store| store.load_payload(class.as_str())) {
        Ok(Some(payload)) => payload,
        Ok(None) => return failure(StatusCode::NOT_FOUND, format!("no stored {} table", class)),
        Err(response) => return response,
    };

    match serde_json::from_str::<serde_json::Value>(&payload) {
        Ok(table) => ApiResponse::ok(table),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /api/receipt - Latest build receipt
async fn get_receipt(State(state): State<AppState>) -> Response {
    match with_store(&state, |store| store.latest_receipt()) {
        Ok(receipt) => ApiResponse::ok(receipt),
        Err(response) => response,
    }
}

/// POST /api/build - Run a build; the body selects the options
async fn post_build(State(state): State<AppState>, options: Option<Json<BuildOptions>>) -> Response {
    let options = options.map(|Json(options)| options).unwrap_or(BuildOptions {
        historic: state.settings.cache.historic,
        dry_run: false,
        resolve_dar: true,
    });
    info!(?options, "build requested");

    // The pipeline is blocking (reqwest::blocking + rusqlite)
    let task = tokio::task::spawn_blocking(move || {
        with_store(&state, |store| build(&state.settings, store, options).map(|(_, outcome)| outcome))
    });

    match task.await {
        Ok(Ok(outcome)) => ApiResponse::ok(outcome),
        Ok(Err(response)) => response,
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("orgcache=info")))
        .init();

    println!("🌐 Organisation Registry Cache - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = std::env::var("ORGCACHE_CONFIG").unwrap_or_else(|_| "orgcache.toml".to_string());
    let settings = Settings::load(std::path::Path::new(&config))?;
    let store = ArtifactStore::open(&settings.cache.artifact_path)?;
    println!("✓ Artifact store opened: {:?}", settings.cache.artifact_path);

    // Create shared state
    let state = AppState {
        settings: Arc::new(settings),
        store: Arc::new(Mutex::new(store)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/artifacts", get(get_artifacts))
        .route("/tables/:name", get(get_table))
        .route("/receipt", get(get_receipt))
        .route("/build", post(post_build))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr).await?;

    println!("\n🚀 Server running on http://localhost:3000");
    println!("   API: http://localhost:3000/api/artifacts");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
