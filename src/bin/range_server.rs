//! HTTP server for the range engine.
//!
//! Provides REST API endpoints for:
//! - CRUD operations on key-value pairs
//! - Rank lookups and range counts
//! - Paged range reads (optionally deleting what they return)
//! - Tree visualization export
//! - Configuration management

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use btree_range::{
    successor, BTreeConfig, Config, FnFilter, Index, IndexError, IndexStats, RangeFlags, TreeNode,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::process::exit;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Request to configure the node limits
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigRequest {
    max_leaf_keys: Option<usize>,
    max_interior_keys: Option<usize>,
    default_capacity: Option<usize>,
}

/// Request for key-value operations
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutRequest {
    key: String,
    value: String,
}

/// Response for get operations
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetResponse {
    key: String,
    value: Option<String>,
    found: bool,
}

/// Response for rank lookups
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RankResponse {
    key: String,
    /// Raw `index_of` result (negative when absent)
    index: i64,
    found: bool,
    /// Number of keys smaller than `key`
    rank: u64,
}

/// Optional bounds of a half-open range
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoundsQuery {
    from: Option<String>,
    to: Option<String>,
}

/// Response for range counts
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CountResponse {
    from: Option<String>,
    to: Option<String>,
    count: u64,
}

/// Request for one page of a range read
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeRequest {
    from: Option<String>,
    to: Option<String>,
    /// Entries per page (0 selects the configured default)
    #[serde(default)]
    capacity: i32,
    /// Raw flag bits; defaults to KEYS | VALS
    flags: Option<u8>,
    /// Only return keys starting with this prefix
    prefix: Option<String>,
}

/// One entry of a range page
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RangeEntry {
    key: Option<String>,
    value: Option<String>,
}

/// One page of a range read
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RangeResponse {
    entries: Vec<RangeEntry>,
    /// Pass as `from` to fetch the following page; absent on the last page
    next_from: Option<String>,
    deleted: u64,
}

/// Response for operations that return success/failure
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    success: bool,
    message: String,
}

/// Tree visualization response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TreeResponse {
    tree: Option<TreeNode>,
    stats: IndexStats,
}

/// Application state shared across handlers
struct AppState {
    index: RwLock<Index>,
    btree_config: RwLock<BTreeConfig>,
}

impl AppState {
    fn new() -> Self {
        Self {
            index: RwLock::new(Index::default()),
            btree_config: RwLock::new(BTreeConfig::default()),
        }
    }

    /// Handle to the current index
    fn index(&self) -> Index {
        self.index.read().clone()
    }

    /// Replace the index with an empty one using the current config
    fn reset(&self) {
        let config = Config::new().btree_config(self.btree_config.read().clone());
        *self.index.write() = Index::open(config);
    }
}

type SharedState = Arc<AppState>;
type ApiError = (StatusCode, Json<OperationResponse>);

fn failure(status: StatusCode, message: String) -> ApiError {
    (
        status,
        Json(OperationResponse {
            success: false,
            message,
        }),
    )
}

fn index_failure(context: &str, e: IndexError) -> ApiError {
    let status = match &e {
        IndexError::InvalidArgument(_) | IndexError::UnsupportedFlags { .. } | IndexError::InvalidOperation(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    failure(status, format!("{} failed: {}", context, e))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_string()
}

#[tokio::main]
async fn main() {
    let state = Arc::new(AppState::new());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/config", get(get_config))
        .route("/api/config", post(set_config))
        .route("/api/kv/:key", get(get_value))
        .route("/api/kv", post(put_value))
        .route("/api/kv/:key", delete(delete_value))
        .route("/api/rank/:key", get(get_rank))
        .route("/api/count", get(get_count))
        .route("/api/range", post(read_range))
        .route("/api/keys", get(list_keys))
        .route("/api/tree", get(get_tree))
        .route("/api/stats", get(get_stats))
        .route("/api/clear", post(clear_index))
        .route("/api/bulk", post(bulk_insert))
        .layer(cors)
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind("0.0.0.0:3001").await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("ERROR: Failed to bind: {}", e);
            exit(1);
        }
    };
    println!("Range server running on http://localhost:3001");
    println!("API Endpoints:");
    println!("  GET    /api/config      - Get B-tree config");
    println!("  POST   /api/config      - Set B-tree config (resets the index)");
    println!("  GET    /api/kv/:key     - Get value by key");
    println!("  POST   /api/kv          - Put key-value pair");
    println!("  DELETE /api/kv/:key     - Delete key");
    println!("  GET    /api/rank/:key   - Rank of a key");
    println!("  GET    /api/count       - Count keys in [from, to)");
    println!("  POST   /api/range       - Read one page of [from, to)");
    println!("  GET    /api/keys        - List all keys");
    println!("  GET    /api/tree        - Get tree structure for visualization");
    println!("  GET    /api/stats       - Get index stats");
    println!("  POST   /api/clear       - Clear all data");
    println!("  POST   /api/bulk        - Bulk insert key-value pairs");
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("ERROR: Server failed: {}", e);
        exit(1);
    }
}

async fn get_config(State(state): State<SharedState>) -> Json<BTreeConfig> {
    Json(state.btree_config.read().clone())
}

async fn set_config(State(state): State<SharedState>, Json(req): Json<ConfigRequest>) -> Json<OperationResponse> {
    let message = {
        let mut config = state.btree_config.write();
        let mut updated = BTreeConfig::new(
            req.max_leaf_keys.unwrap_or(config.max_leaf_keys),
            req.max_interior_keys.unwrap_or(config.max_interior_keys),
        );
        updated = updated.default_capacity(req.default_capacity.unwrap_or(config.default_capacity));
        *config = updated;
        format!(
            "Config updated: max_leaf_keys={}, max_interior_keys={}, default_capacity={}",
            config.max_leaf_keys, config.max_interior_keys, config.default_capacity
        )
    };
    state.reset();

    Json(OperationResponse {
        success: true,
        message,
    })
}

async fn get_value(State(state): State<SharedState>, Path(key): Path<String>) -> Result<Json<GetResponse>, ApiError> {
    let value = state.index().get(key.as_bytes()).map_err(|e| index_failure("Get", e))?;
    Ok(Json(GetResponse {
        key,
        found: value.is_some(),
        value: value.as_deref().map(lossy),
    }))
}

async fn put_value(State(state): State<SharedState>, Json(req): Json<PutRequest>) -> Result<Json<OperationResponse>, ApiError> {
    let previous = state
        .index()
        .put(req.key.as_bytes(), req.value.as_bytes())
        .map_err(|e| index_failure("Put", e))?;
    Ok(Json(OperationResponse {
        success: true,
        message: match previous {
            Some(_) => format!("Updated key '{}'", req.key),
            None => format!("Inserted key '{}'", req.key),
        },
    }))
}

async fn delete_value(State(state): State<SharedState>, Path(key): Path<String>) -> Result<Json<OperationResponse>, ApiError> {
    let removed = state.index().delete(key.as_bytes()).map_err(|e| index_failure("Delete", e))?;
    Ok(Json(OperationResponse {
        success: true,
        message: match removed {
            Some(_) => format!("Deleted key '{}'", key),
            None => format!("Key '{}' not found", key),
        },
    }))
}

async fn get_rank(State(state): State<SharedState>, Path(key): Path<String>) -> Result<Json<RankResponse>, ApiError> {
    let index = state.index().index_of(key.as_bytes()).map_err(|e| index_failure("Rank", e))?;
    let found = index >= 0;
    let rank = if found { index as u64 } else { (-(index + 1)) as u64 };
    Ok(Json(RankResponse { key, index, found, rank }))
}

async fn get_count(State(state): State<SharedState>, Query(query): Query<BoundsQuery>) -> Result<Json<CountResponse>, ApiError> {
    let count = state
        .index()
        .range_count(query.from.as_deref().map(str::as_bytes), query.to.as_deref().map(str::as_bytes))
        .map_err(|e| index_failure("Count", e))?;
    Ok(Json(CountResponse {
        from: query.from,
        to: query.to,
        count,
    }))
}

async fn read_range(State(state): State<SharedState>, Json(req): Json<RangeRequest>) -> Result<Json<RangeResponse>, ApiError> {
    let index = state.index();
    let requested = match req.flags {
        Some(bits) => RangeFlags::from_bits(bits).map_err(|e| index_failure("Range", e))?,
        None => RangeFlags::KEYS | RangeFlags::VALS,
    };
    let filter = req.prefix.as_deref().map(|prefix| {
        FnFilter::new()
            .with_accept(move |key, _| key.starts_with(prefix.as_bytes()))
            .boxed()
    });

    // Keys are always materialized so the next page can start after the last one.
    let mut cursor = index
        .range_iterator_with(
            req.from.as_deref().map(str::as_bytes),
            req.to.as_deref().map(str::as_bytes),
            req.capacity,
            requested | RangeFlags::KEYS,
            filter,
        )
        .map_err(|e| index_failure("Range", e))?;

    let page_size = cursor.capacity();
    let mut entries = Vec::new();
    let mut last_key = None;
    while entries.len() < page_size && cursor.has_next().map_err(|e| index_failure("Range", e))? {
        let entry = cursor.next().map_err(|e| index_failure("Range", e))?;
        last_key = entry.key().map(<[u8]>::to_vec);
        entries.push(RangeEntry {
            key: if requested.keys() { entry.key().map(lossy) } else { None },
            value: entry.value().map(lossy),
        });
    }
    // Peeking with has_next could refill, and so delete, an unreturned page.
    let more = !cursor.reached_end();
    let deleted = cursor.deleted();

    Ok(Json(RangeResponse {
        entries,
        next_from: if more { last_key.map(|k| lossy(&successor(&k))) } else { None },
        deleted,
    }))
}

async fn list_keys(State(state): State<SharedState>) -> Result<Json<Vec<String>>, ApiError> {
    let pairs = state.index().iter().map_err(|e| index_failure("List keys", e))?;
    Ok(Json(pairs.into_iter().map(|(k, _)| lossy(&k)).collect()))
}

async fn get_tree(State(state): State<SharedState>) -> Json<TreeResponse> {
    let index = state.index();
    Json(TreeResponse {
        tree: index.export_tree().ok(),
        stats: index.stats(),
    })
}

async fn get_stats(State(state): State<SharedState>) -> Json<IndexStats> {
    Json(state.index().stats())
}

async fn clear_index(State(state): State<SharedState>) -> Json<OperationResponse> {
    state.index().clear();
    Json(OperationResponse {
        success: true,
        message: "Index cleared".to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkInsertRequest {
    pairs: Vec<PutRequest>,
}

async fn bulk_insert(
    State(state): State<SharedState>,
    Json(req): Json<BulkInsertRequest>,
) -> Result<Json<OperationResponse>, ApiError> {
    let index = state.index();
    let mut count = 0;
    for pair in req.pairs {
        index
            .put(pair.key.as_bytes(), pair.value.as_bytes())
            .map_err(|e| index_failure(&format!("Bulk insert at key '{}'", pair.key), e))?;
        count += 1;
    }
    Ok(Json(OperationResponse {
        success: true,
        message: format!("Inserted {} key-value pairs", count),
    }))
}
