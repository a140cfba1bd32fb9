//! HTTP transport for the pipeline.

use crate::auth::{require_bearer, SharedVerifier};
use crate::error::ApiError;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{get, post},
    Json, Router,
};
use mcda_cloud::ArtifactKey;
use mcda_pipeline::{
    McdaPipeline, OverlayRequest, OverlayResponse, OverlayWeights, Stage, StagingSlot, UploadBundle, UploadResponse,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<McdaPipeline>,
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub max_upload_bytes: usize,
    pub cors_origin: String,
}

pub fn router(state: AppState, verifier: SharedVerifier, options: &ServerOptions) -> Result<Router> {
    let origin: HeaderValue = options
        .cors_origin
        .parse()
        .with_context(|| format!("invalid CORS origin '{}'", options.cors_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    let api = Router::new()
        .route("/api/mcda/upload", post(upload))
        .route("/api/mcda/weighted_overlay", post(weighted_overlay))
        .route_layer(middleware::from_fn_with_state(verifier, require_bearer))
        .layer(DefaultBodyLimit::max(options.max_upload_bytes));

    Ok(Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

fn multipart_error(e: impl std::fmt::Display) -> ApiError {
    ApiError::bad_request(Some(Stage::Upload), format!("invalid multipart body: {}", e))
}

async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<UploadResponse>, ApiError> {
    let mut bundle = UploadBundle::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        let Some(slot) = StagingSlot::from_field(&name) else {
            warn!(field = %name, "ignoring unknown upload field");
            continue;
        };
        let file_name = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| slot.field_name().to_string());
        let data = field.bytes().await.map_err(multipart_error)?;
        bundle.add(slot, file_name, data);
    }

    info!(files = bundle.len(), "upload received");
    let response = state.pipeline.process_upload(bundle).await?;
    Ok(Json(response))
}

/// Body of `POST /api/mcda/weighted_overlay`.
///
/// `inputs` replaces the three role weights with explicit artifact keys.
#[derive(Debug, Deserialize)]
struct OverlayBody {
    request_id: Uuid,
    river_weight: Option<f64>,
    road_weight: Option<f64>,
    settlement_weight: Option<f64>,
    #[serde(default)]
    inputs: Option<Vec<(ArtifactKey, f64)>>,
}

impl OverlayBody {
    fn into_request(self) -> Result<OverlayRequest, ApiError> {
        let weights = match (self.inputs, self.river_weight, self.road_weight, self.settlement_weight) {
            (Some(inputs), ..) => OverlayWeights::Explicit(inputs),
            (None, Some(river), Some(road), Some(settlement)) => OverlayWeights::from_scalars(river, road, settlement),
            _ => {
                return Err(ApiError::bad_request(
                    Some(Stage::Overlay),
                    "river_weight, road_weight and settlement_weight are required",
                ))
            }
        };
        Ok(OverlayRequest {
            request_id: self.request_id,
            weights,
        })
    }
}

async fn weighted_overlay(
    State(state): State<AppState>,
    body: Result<Json<OverlayBody>, JsonRejection>,
) -> Result<Json<OverlayResponse>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(Some(Stage::Overlay), e.body_text()))?;
    let request = body.into_request()?;
    let response = state.pipeline.weighted_overlay(request).await?;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenVerifier;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use mcda_cloud::{ArtifactStore, StoreConfig};
    use mcda_pipeline::PipelineConfig;
    use tower::ServiceExt;

    const TOKEN: &str = "Bearer test-token";

    struct Fixture {
        _dir: tempfile::TempDir,
        app: Router,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(&StoreConfig::local(dir.path().join("store"))).unwrap();
        store.ensure_namespace().await.unwrap();

        let config = PipelineConfig {
            staging_root: dir.path().join("staging"),
            ..Default::default()
        };
        let state = AppState {
            pipeline: Arc::new(McdaPipeline::new(Arc::new(store), config)),
        };
        let options = ServerOptions {
            max_upload_bytes: 1024 * 1024,
            cors_origin: "http://localhost:8080".to_string(),
        };
        let verifier: SharedVerifier = Arc::new(StaticTokenVerifier::new(["test-token"]));
        let app = router(state, verifier, &options).unwrap();
        Fixture { _dir: dir, app }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn overlay_request(body: Value, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/mcda/weighted_overlay")
            .header(CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(AUTHORIZATION, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let f = fixture().await;
        let response = f
            .app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_overlay_requires_token() {
        let f = fixture().await;
        let body = json!({ "request_id": Uuid::new_v4(), "river_weight": 1, "road_weight": 1, "settlement_weight": 1 });
        let response = f.app.oneshot(overlay_request(body, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "unauthorized");
    }

    #[tokio::test]
    async fn test_overlay_unknown_request() {
        let f = fixture().await;
        let body = json!({ "request_id": Uuid::new_v4(), "river_weight": 1, "road_weight": 2, "settlement_weight": 3 });
        let response = f.app.oneshot(overlay_request(body, Some(TOKEN))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = json_body(response).await;
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["stage"], "overlay");
    }

    #[tokio::test]
    async fn test_overlay_missing_weight() {
        let f = fixture().await;
        let body = json!({ "request_id": Uuid::new_v4(), "river_weight": 1, "road_weight": 2 });
        let response = f.app.oneshot(overlay_request(body, Some(TOKEN))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_overlay_malformed_json() {
        let f = fixture().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/mcda/weighted_overlay")
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, TOKEN)
            .body(Body::from("{not json"))
            .unwrap();
        let response = f.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_missing_fields() {
        let f = fixture().await;
        let body = concat!(
            "--BOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"river_shapefile\"; filename=\"river.shp\"\r\n",
            "Content-Type: application/octet-stream\r\n\r\n",
            "not a shapefile\r\n",
            "--BOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"comment\"\r\n\r\n",
            "ignored\r\n",
            "--BOUNDARY--\r\n",
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/mcda/upload")
            .header(CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
            .header(AUTHORIZATION, TOKEN)
            .body(Body::from(body))
            .unwrap();

        let response = f.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert_eq!(body["error"], "invalid_request");
        assert_eq!(body["stage"], "upload");
    }
}
