// Land Parcel Import - Query Server
// Read-only REST API over the imported `lands` table

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use land_parcel_import::{
    db, init_logging, BoundingBox, SearchFilter, ServerConfig, StoredParcel,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    config: Arc<ServerConfig>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Single parcel with its boundary
#[derive(Serialize)]
struct LandResponse {
    #[serde(flatten)]
    parcel: StoredParcel,
    geometry: Option<Value>,
}

impl From<StoredParcel> for LandResponse {
    fn from(parcel: StoredParcel) -> Self {
        let geometry = parcel.boundary.as_ref().map(|ring| ring.to_geojson());
        Self { parcel, geometry }
    }
}

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Deserialize)]
struct PageQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Deserialize)]
struct BboxQuery {
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct SearchQuery {
    city: Option<String>,
    district: Option<String>,
    section_code: Option<String>,
    section_name: Option<String>,
    parcel_no: Option<String>,
    owner_name: Option<String>,
    min_area: Option<f64>,
    max_area: Option<f64>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Deserialize)]
struct AreaQuery {
    city: Option<String>,
    district: Option<String>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Run a read against the shared connection and wrap the result.
fn with_db<T, F>(state: &AppState, what: &str, read: F) -> Response
where
    T: Serialize,
    F: FnOnce(&Connection) -> land_parcel_import::Result<T>,
{
    let conn = match state.db.lock() {
        Ok(conn) => conn,
        Err(_) => {
            error!(what, "Database lock poisoned");
            return internal_error("database unavailable");
        }
    };

    match read(&*conn) {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))).into_response(),
        Err(e) => {
            error!(what, error = %e, "Query failed");
            internal_error(&e.to_string())
        }
    }
}

fn internal_error(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::error(message)),
    )
        .into_response()
}

fn feature_collection(parcels: Vec<StoredParcel>) -> Value {
    let features: Vec<Value> = parcels
        .into_iter()
        .map(|parcel| {
            let geometry = parcel.boundary.as_ref().map(|ring| ring.to_geojson());
            json!({
                "type": "Feature",
                "id": parcel.id,
                "geometry": geometry,
                "properties": parcel,
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/lands - Page through parcels
async fn list_lands(State(state): State<AppState>, Query(page): Query<PageQuery>) -> Response {
    let limit = state.config.page_limit(page.limit);
    let offset = page.offset.unwrap_or(0);
    with_db(&state, "list_lands", |conn| {
        db::list_parcels(conn, limit, offset)
    })
}

/// GET /api/lands/bbox - Parcels whose envelope intersects the box, as GeoJSON
async fn lands_in_bbox(State(state): State<AppState>, Query(query): Query<BboxQuery>) -> Response {
    if query.min_lon > query.max_lon || query.min_lat > query.max_lat {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error("min bound exceeds max bound")),
        )
            .into_response();
    }

    let bbox = BoundingBox::new(query.min_lon, query.min_lat, query.max_lon, query.max_lat);
    let limit = state.config.page_limit(query.limit);
    with_db(&state, "lands_in_bbox", |conn| {
        db::find_in_bbox(conn, &bbox, limit).map(feature_collection)
    })
}

/// GET /api/lands/:id - One parcel with its geometry
async fn get_land(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let conn = match state.db.lock() {
        Ok(conn) => conn,
        Err(_) => return internal_error("database unavailable"),
    };

    match db::get_parcel(&conn, id) {
        Ok(Some(parcel)) => {
            (StatusCode::OK, Json(ApiResponse::ok(LandResponse::from(parcel)))).into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error(format!("Land {} not found", id))),
        )
            .into_response(),
        Err(e) => {
            error!(id, error = %e, "Error getting land");
            internal_error(&e.to_string())
        }
    }
}

/// GET /api/search - Filtered parcel search
async fn search_lands(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
    let filter = SearchFilter {
        city: query.city,
        district: query.district,
        section_code: query.section_code,
        section_name: query.section_name,
        parcel_no: query.parcel_no,
        owner_name: query.owner_name,
        min_area: query.min_area,
        max_area: query.max_area,
        limit: state.config.page_limit(query.limit),
        offset: query.offset.unwrap_or(0),
    };
    with_db(&state, "search", |conn| db::search_parcels(conn, &filter))
}

/// GET /api/search/cities
async fn cities(State(state): State<AppState>) -> Response {
    with_db(&state, "cities", db::list_cities)
}

/// GET /api/search/districts?city=
async fn districts(State(state): State<AppState>, Query(query): Query<AreaQuery>) -> Response {
    with_db(&state, "districts", |conn| {
        db::list_districts(conn, query.city.as_deref())
    })
}

/// GET /api/search/sections?city=&district=
async fn sections(State(state): State<AppState>, Query(query): Query<AreaQuery>) -> Response {
    with_db(&state, "sections", |conn| {
        db::list_sections(conn, query.city.as_deref(), query.district.as_deref())
    })
}

/// GET /api/stats/summary
async fn summary(State(state): State<AppState>) -> Response {
    with_db(&state, "summary", db::summary_stats)
}

/// GET /api/stats/by-city
async fn by_city(State(state): State<AppState>) -> Response {
    with_db(&state, "by_city", db::stats_by_city)
}

/// GET /api/stats/by-district?city=
async fn by_district(State(state): State<AppState>, Query(query): Query<AreaQuery>) -> Response {
    with_db(&state, "by_district", |conn| {
        db::stats_by_district(conn, query.city.as_deref())
    })
}

/// GET /api/sources - Per source pair counts
async fn sources(State(state): State<AppState>) -> Response {
    with_db(&state, "sources", db::source_file_stats)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;
    init_logging(false);

    if !config.database_path.exists() {
        anyhow::bail!(
            "Database not found at {} (run `parcel-import import` first)",
            config.database_path.display()
        );
    }

    let conn = db::open_store(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database opened");

    let bind_addr = config.bind_addr.clone();

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        config: Arc::new(config),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/lands", get(list_lands))
        .route("/lands/bbox", get(lands_in_bbox))
        .route("/lands/:id", get(get_land))
        .route("/search", get(search_lands))
        .route("/search/cities", get(cities))
        .route("/search/districts", get(districts))
        .route("/search/sections", get(sections))
        .route("/stats/summary", get(summary))
        .route("/stats/by-city", get(by_city))
        .route("/stats/by-district", get(by_district))
        .route("/sources", get(sources))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Server running");

    axum::serve(listener, app).await?;
    Ok(())
}
