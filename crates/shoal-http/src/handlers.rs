//! The thin handler layer: parse requests, invoke the balancer and the
//! placement store, emit JSON responses.
//!
//! Handlers never talk to backends directly; presigned URLs and multipart
//! bookkeeping go through `shoal-presign`, placement through
//! `shoal-store`, and selection through the balancer. Placement-store
//! write failures on the upload path are logged and do not fail the
//! request, matching the rest of the reservation machinery's
//! best-effort-then-corrected design.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use shoal_core::balancer::Balancer;
use shoal_core::error::{ShoalError, ShoalResult};
use shoal_core::metrics::GatewayMetrics;
use shoal_core::registry::{BucketInfo, BucketRegistry, OperationCategory};
use shoal_presign::Presigner;
use shoal_store::{PlacementRecord, PlacementStore};

use crate::response::{error_to_response, json_response, ApiBody};
use crate::router::{parse_query, query_param, ApiOperation};

/// Everything the control plane needs, created once at startup and shared
/// across requests.
pub struct ApiState {
    /// The bucket registry.
    pub registry: Arc<BucketRegistry>,
    /// The placement balancer.
    pub balancer: Arc<Balancer>,
    /// The placement metadata store.
    pub store: Arc<PlacementStore>,
    /// The presigned-URL builder.
    pub presigner: Arc<Presigner>,
    /// Gauges; `None` when observability is disabled.
    pub metrics: Option<Arc<GatewayMetrics>>,
    /// Parent token for per-request cancellation; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for ApiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiState")
            .field("buckets", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Run one routed operation to a response.
pub async fn dispatch(
    state: &ApiState,
    operation: ApiOperation,
    body: Bytes,
    query: &str,
) -> Response<ApiBody> {
    let result = match operation {
        ApiOperation::Health => health(),
        ApiOperation::ListBuckets => list_buckets(state),
        ApiOperation::BucketStats { name } => bucket_stats(state, &name),
        ApiOperation::ResetBucket { name } => reset_bucket(state, &name),
        ApiOperation::PresignUpload => presign_upload(state, &body).await,
        ApiOperation::PresignDownload => presign_download(state, &body).await,
        ApiOperation::PresignDelete => presign_delete(state, &body).await,
        ApiOperation::PresignMultipart => presign_multipart(state, &body).await,
        ApiOperation::ListObjects => list_objects(state, query).await,
        ApiOperation::GetObject { key } => get_object(state, &key).await,
        ApiOperation::DeleteObject { key } => delete_object(state, &key).await,
    };
    result.unwrap_or_else(|e| error_to_response(&e))
}

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PresignUploadRequest {
    key: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct KeyRequest {
    key: String,
}

#[derive(Debug, Deserialize)]
struct PresignMultipartRequest {
    key: String,
    part_count: i32,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    time: i64,
}

#[derive(Debug, Serialize)]
struct BucketView {
    name: String,
    endpoint: String,
    region: String,
    max_size: String,
    max_size_bytes: u64,
    used_size: u64,
    available: bool,
    weight: u32,
    enabled: bool,
}

impl BucketView {
    fn from_bucket(bucket: &BucketInfo) -> Self {
        let config = bucket.config();
        Self {
            name: config.name,
            endpoint: config.endpoint,
            region: config.region,
            max_size: config.max_size,
            max_size_bytes: config.max_size_bytes,
            used_size: bucket.used_size(),
            available: bucket.is_available(),
            weight: config.weight,
            enabled: bucket.is_enabled(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ListBucketsResponse {
    buckets: Vec<BucketView>,
    strategy: &'static str,
}

#[derive(Debug, Serialize)]
struct OperationCounts {
    read: u64,
    write: u64,
    delete: u64,
    list: u64,
}

#[derive(Debug, Serialize)]
struct BucketStatsView {
    name: String,
    max_size_bytes: u64,
    used_size: u64,
    available_space: u64,
    available: bool,
    enabled: bool,
    last_checked: Option<DateTime<Utc>>,
    operations: OperationCounts,
}

#[derive(Debug, Serialize)]
struct ListObjectsResponse {
    objects: Vec<PlacementRecord>,
    count: usize,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn health() -> ShoalResult<Response<ApiBody>> {
    Ok(json_response(
        StatusCode::OK,
        &HealthResponse {
            status: "healthy",
            time: Utc::now().timestamp(),
        },
    ))
}

fn list_buckets(state: &ApiState) -> ShoalResult<Response<ApiBody>> {
    let buckets = state
        .registry
        .get_all()
        .iter()
        .map(|b| BucketView::from_bucket(b))
        .collect();
    Ok(json_response(
        StatusCode::OK,
        &ListBucketsResponse {
            buckets,
            strategy: state.balancer.strategy_name(),
        },
    ))
}

fn bucket_stats(state: &ApiState, name: &str) -> ShoalResult<Response<ApiBody>> {
    let bucket = state
        .registry
        .get(name)
        .ok_or_else(|| ShoalError::NotFound(format!("bucket {name}")))?;

    Ok(json_response(
        StatusCode::OK,
        &BucketStatsView {
            name: bucket.name().to_owned(),
            max_size_bytes: bucket.max_size_bytes(),
            used_size: bucket.used_size(),
            available_space: bucket.available_space(),
            available: bucket.is_available(),
            enabled: bucket.is_enabled(),
            last_checked: bucket.last_checked(),
            operations: OperationCounts {
                read: bucket.operation_count(OperationCategory::Read),
                write: bucket.operation_count(OperationCategory::Write),
                delete: bucket.operation_count(OperationCategory::Delete),
                list: bucket.operation_count(OperationCategory::List),
            },
        },
    ))
}

fn reset_bucket(state: &ApiState, name: &str) -> ShoalResult<Response<ApiBody>> {
    state.registry.reset_operations(name)?;
    Ok(json_response(
        StatusCode::OK,
        &MessageResponse {
            message: format!("operation counters reset for {name}"),
        },
    ))
}

async fn presign_upload(state: &ApiState, body: &Bytes) -> ShoalResult<Response<ApiBody>> {
    let request: PresignUploadRequest = parse_body(body)?;
    if request.key.is_empty() {
        return Err(ShoalError::invalid("key is required"));
    }

    let bucket = state.balancer.select_bucket(&request.key, request.size)?;
    if let Some(metrics) = &state.metrics {
        metrics.record_decision(state.balancer.strategy_name(), bucket.name());
    }

    let url = state
        .presigner
        .upload_url(
            &bucket,
            &request.key,
            request.content_type.as_deref(),
            &request.metadata,
        )
        .await?;

    if let Err(e) = state
        .store
        .record(
            &request.key,
            bucket.name(),
            request.size,
            request.content_type.as_deref(),
            &request.metadata,
        )
        .await
    {
        warn!(key = %request.key, error = %e, "failed to record object placement");
    }

    // Reserve the declared size; health probes correct the estimate later.
    bucket.update_used_size(request.size.min(i64::MAX as u64) as i64);
    count_operation(state, &bucket, OperationCategory::Write);

    Ok(json_response(StatusCode::OK, &url))
}

async fn presign_download(state: &ApiState, body: &Bytes) -> ShoalResult<Response<ApiBody>> {
    let request: KeyRequest = parse_body(body)?;
    if request.key.is_empty() {
        return Err(ShoalError::invalid("key is required"));
    }

    let bucket = owning_bucket(state, &request.key).await?;
    let url = state.presigner.download_url(&bucket, &request.key).await?;
    count_operation(state, &bucket, OperationCategory::Read);

    Ok(json_response(StatusCode::OK, &url))
}

async fn presign_delete(state: &ApiState, body: &Bytes) -> ShoalResult<Response<ApiBody>> {
    let request: KeyRequest = parse_body(body)?;
    if request.key.is_empty() {
        return Err(ShoalError::invalid("key is required"));
    }

    let bucket = owning_bucket(state, &request.key).await?;
    let url = state.presigner.delete_url(&bucket, &request.key).await?;
    count_operation(state, &bucket, OperationCategory::Delete);

    Ok(json_response(StatusCode::OK, &url))
}

async fn presign_multipart(state: &ApiState, body: &Bytes) -> ShoalResult<Response<ApiBody>> {
    let request: PresignMultipartRequest = parse_body(body)?;
    if request.key.is_empty() || request.part_count <= 0 {
        return Err(ShoalError::invalid("key and a positive part_count are required"));
    }

    let bucket = state.balancer.select_bucket(&request.key, request.size)?;
    if let Some(metrics) = &state.metrics {
        metrics.record_decision(state.balancer.strategy_name(), bucket.name());
    }

    let token = state.shutdown.child_token();
    let urls = state
        .presigner
        .multipart_upload_urls(&bucket, &request.key, request.part_count, &token)
        .await?;

    if let Err(e) = state
        .store
        .record(&request.key, bucket.name(), request.size, None, &HashMap::new())
        .await
    {
        warn!(key = %request.key, error = %e, "failed to record object placement");
    }

    bucket.update_used_size(request.size.min(i64::MAX as u64) as i64);
    count_operation(state, &bucket, OperationCategory::Write);

    Ok(json_response(StatusCode::OK, &urls))
}

async fn list_objects(state: &ApiState, query: &str) -> ShoalResult<Response<ApiBody>> {
    let params = parse_query(query);
    let bucket = query_param(&params, "bucket");
    let prefix = query_param(&params, "prefix");
    let marker = query_param(&params, "marker");
    let limit = query_param(&params, "limit")
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(0);

    let objects = state.store.list(bucket, prefix, marker, limit).await?;

    if let Some(name) = bucket.filter(|b| !b.is_empty()) {
        if let Some(bucket) = state.registry.get(name) {
            count_operation(state, &bucket, OperationCategory::List);
        }
    }

    let count = objects.len();
    Ok(json_response(
        StatusCode::OK,
        &ListObjectsResponse { objects, count },
    ))
}

async fn get_object(state: &ApiState, key: &str) -> ShoalResult<Response<ApiBody>> {
    let info = state.store.get_info(key).await?;
    Ok(json_response(StatusCode::OK, &info))
}

async fn delete_object(state: &ApiState, key: &str) -> ShoalResult<Response<ApiBody>> {
    let info = state.store.get_info(key).await?;

    // Release the reservation; the owning bucket may already be gone.
    if let Some(bucket) = state.registry.get(&info.bucket_name) {
        bucket.update_used_size(-(info.size.min(i64::MAX as u64) as i64));
    }
    state.store.delete(key).await?;

    Ok(json_response(
        StatusCode::OK,
        &MessageResponse {
            message: "object deleted successfully".to_owned(),
        },
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> ShoalResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| ShoalError::invalid(format!("invalid request body: {e}")))
}

/// Resolve a key to its owning bucket through the placement store.
async fn owning_bucket(state: &ApiState, key: &str) -> ShoalResult<Arc<BucketInfo>> {
    let bucket_name = state.store.find_bucket(key).await?;
    state
        .registry
        .get(&bucket_name)
        .ok_or_else(|| ShoalError::NotFound(format!("bucket {bucket_name}")))
}

/// Count one backend operation against the bucket's ceiling and mirror it
/// onto the gauges.
fn count_operation(state: &ApiState, bucket: &BucketInfo, category: OperationCategory) {
    bucket.record_operation(category);
    if let Some(metrics) = &state.metrics {
        metrics.record_operation(category.as_str(), bucket.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use shoal_core::config::{BalancerConfig, BucketConfig, OperationLimits};

    fn bucket_config(name: &str, max_size_bytes: u64) -> BucketConfig {
        BucketConfig {
            name: name.to_owned(),
            endpoint: format!("http://{name}.example.com:9000"),
            region: "us-east-1".to_owned(),
            access_key: "ak".to_owned(),
            secret_key: "sk".to_owned(),
            max_size: format!("{max_size_bytes}B"),
            max_size_bytes,
            weight: 1,
            enabled: true,
            limits: OperationLimits::default(),
        }
    }

    async fn test_state(strategy: &str, configs: &[BucketConfig]) -> ApiState {
        let registry = Arc::new(BucketRegistry::new());
        registry.apply_snapshot(configs);
        let balancer = Arc::new(
            Balancer::new(
                Arc::clone(&registry),
                &BalancerConfig {
                    strategy: strategy.to_owned(),
                    replicas: 100,
                },
            )
            .unwrap(),
        );
        let store = Arc::new(PlacementStore::connect("sqlite::memory:").await.unwrap());
        ApiState {
            registry,
            balancer,
            store,
            presigner: Arc::new(Presigner::default()),
            metrics: Some(Arc::new(GatewayMetrics::new())),
            shutdown: CancellationToken::new(),
        }
    }

    async fn body_json(response: Response<ApiBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn upload(state: &ApiState, key: &str, size: u64) -> Response<ApiBody> {
        let body = Bytes::from(format!(r#"{{"key":"{key}","size":{size}}}"#));
        dispatch(state, ApiOperation::PresignUpload, body, "").await
    }

    #[tokio::test]
    async fn test_should_place_then_retrieve() {
        let state = test_state(
            "least-space",
            &[bucket_config("a", 100), bucket_config("b", 100)],
        )
        .await;

        // Tie between a and b goes to a.
        let response = upload(&state, "x", 60).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.store.find_bucket("x").await.unwrap(), "a");
        assert_eq!(state.registry.get("a").unwrap().used_size(), 60);

        // With a at 60/100, the next placement prefers b.
        let response = upload(&state, "y", 50).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.store.find_bucket("y").await.unwrap(), "b");

        let response = dispatch(
            &state,
            ApiOperation::GetObject { key: "x".to_owned() },
            Bytes::new(),
            "",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let info = body_json(response).await;
        assert_eq!(info["bucket_name"], "a");
        assert_eq!(info["size"], 60);
    }

    #[tokio::test]
    async fn test_should_enforce_capacity_filter() {
        let state = test_state(
            "round-robin",
            &[bucket_config("a", 100), bucket_config("b", 100)],
        )
        .await;
        state.registry.update_used_size("a", 90).unwrap();
        state.registry.update_used_size("b", 50).unwrap();

        let response = upload(&state, "fits", 20).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.store.find_bucket("fits").await.unwrap(), "b");

        let response = upload(&state, "too-big", 60).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let error = body_json(response).await;
        assert!(error["error"].as_str().unwrap().contains("60 bytes"));
    }

    #[tokio::test]
    async fn test_should_404_for_unknown_objects() {
        let state = test_state("round-robin", &[bucket_config("a", 100)]).await;

        let response = dispatch(
            &state,
            ApiOperation::PresignDownload,
            Bytes::from(r#"{"key":"ghost"}"#),
            "",
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = dispatch(
            &state,
            ApiOperation::GetObject { key: "ghost".to_owned() },
            Bytes::new(),
            "",
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_should_release_usage_on_delete() {
        let state = test_state("round-robin", &[bucket_config("a", 100)]).await;
        upload(&state, "x", 40).await;
        assert_eq!(state.registry.get("a").unwrap().used_size(), 40);

        let response = dispatch(
            &state,
            ApiOperation::DeleteObject { key: "x".to_owned() },
            Bytes::new(),
            "",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.registry.get("a").unwrap().used_size(), 0);
        assert!(matches!(
            state.store.find_bucket("x").await,
            Err(ShoalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_should_reset_counters_through_endpoint() {
        let mut config = bucket_config("a", 100);
        config.limits = OperationLimits {
            write: 1,
            ..OperationLimits::default()
        };
        let state = test_state("round-robin", &[config]).await;

        assert_eq!(upload(&state, "x", 1).await.status(), StatusCode::OK);
        // The ceiling tripped; no backend is eligible any more.
        assert_eq!(
            upload(&state, "y", 1).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        let response = dispatch(
            &state,
            ApiOperation::ResetBucket { name: "a".to_owned() },
            Bytes::new(),
            "",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(upload(&state, "z", 1).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_should_list_objects_with_filters() {
        let state = test_state("round-robin", &[bucket_config("a", 100)]).await;
        upload(&state, "docs/1", 1).await;
        upload(&state, "docs/2", 1).await;
        upload(&state, "img/1", 1).await;

        let response = dispatch(
            &state,
            ApiOperation::ListObjects,
            Bytes::new(),
            "prefix=docs%2F&limit=10",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let listing = body_json(response).await;
        assert_eq!(listing["count"], 2);
        assert_eq!(listing["objects"][0]["key"], "docs/1");
    }

    #[tokio::test]
    async fn test_should_reject_malformed_bodies() {
        let state = test_state("round-robin", &[bucket_config("a", 100)]).await;

        let response = dispatch(
            &state,
            ApiOperation::PresignUpload,
            Bytes::from("not json"),
            "",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = dispatch(
            &state,
            ApiOperation::PresignUpload,
            Bytes::from(r#"{"key":""}"#),
            "",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
