//! API route definitions.

mod control;
mod health;

use axum::Router;
use axum::http::{HeaderValue, header};
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post};

use crate::auth::require_auth;
use crate::state::AppState;

/// Build the complete API router.
///
/// # Route Structure
///
/// ## Public (no auth)
/// - `GET /health` - Health check
///
/// ## Protected (auth required)
/// - `GET /api/v1/status` - Engine status, breaker and daily counters
/// - `POST /api/v1/pause` - Close the run gate
/// - `POST /api/v1/resume` - Reset the breaker and open the run gate
/// - `POST /api/v1/wake` - Cut the current sleep short
/// - `POST /api/v1/force-wake/{source_id}` - Forget an item and wake
pub fn router(state: AppState) -> Router {
    let public = Router::new().route("/health", get(health::health_check));

    let api_v1 = Router::new()
        .route("/status", get(control::status))
        .route("/pause", post(control::pause))
        .route("/resume", post(control::resume))
        .route("/wake", post(control::wake))
        .route("/force-wake/{source_id}", post(control::force_wake))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(middleware::map_response(no_store));

    Router::new()
        .merge(public)
        .nest("/api/v1", api_v1)
        .with_state(state)
}

/// Engine state changes from one request to the next; never cache it.
async fn no_store(response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    parts
        .headers
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Response::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Config;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use ferry_core::{DestinationRef, PostBody};
    use ferry_relay::{
        Collaborators, Destination, EngineControl, IdentityStore, PassthroughMedia,
        PassthroughTranslator, PublishError, RelayConfig, RelayEngine, events,
    };
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct NullDestination;

    #[async_trait]
    impl Destination for NullDestination {
        fn name(&self) -> &'static str {
            "null"
        }
        async fn publish_standalone(
            &self,
            _body: &PostBody,
            _images: &[PathBuf],
        ) -> Result<String, PublishError> {
            Ok("1".to_string())
        }
        async fn publish_repost(
            &self,
            _body: &PostBody,
            _predecessor_id: &str,
        ) -> Result<String, PublishError> {
            Ok("2".to_string())
        }
        async fn publish_video(
            &self,
            _body: &PostBody,
            _video: &Path,
        ) -> Result<String, PublishError> {
            Ok("3".to_string())
        }
        fn location(&self, d: &DestinationRef) -> String {
            d.id.clone()
        }
    }

    fn setup() -> (TempDir, RelayEngine, Router) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(IdentityStore::open(tmp.path()).unwrap());
        let (events_tx, _) = events::channel();
        let engine = RelayEngine::new(
            RelayConfig::default(),
            store,
            Arc::new(EngineControl::new(events_tx)),
            Collaborators {
                translator: Arc::new(PassthroughTranslator),
                media: Arc::new(PassthroughMedia),
                destination: Arc::new(NullDestination),
            },
        );
        let config = Config {
            bind_addr: "127.0.0.1:0".to_string(),
            api_tokens: HashSet::from(["secret".to_string()]),
        };
        let app = router(AppState::new(config, engine.control_handle()));
        (tmp, engine, app)
    }

    fn authed(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", "Bearer secret")
            .body(Body::empty())
            .unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (_tmp, _engine, app) = setup();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["running"], true);
    }

    #[tokio::test]
    async fn test_api_requires_token() {
        let (_tmp, _engine, app) = setup();
        let response = app
            .clone()
            .oneshot(Request::get("/api/v1/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::get("/api/v1/status")
                    .header("Authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(response).await["error"], "unauthorized");
    }

    #[tokio::test]
    async fn test_pause_then_resume() {
        let (_tmp, _engine, app) = setup();

        let response = app.clone().oneshot(authed("POST", "/api/v1/pause")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
        let body = json(response).await;
        assert_eq!(body["changed"], true);
        assert_eq!(body["running"], false);

        let status = json(app.clone().oneshot(authed("GET", "/api/v1/status")).await.unwrap()).await;
        assert_eq!(status["running"], false);
        assert_eq!(status["breaker"]["state"], "closed");

        let body = json(app.oneshot(authed("POST", "/api/v1/resume")).await.unwrap()).await;
        assert_eq!(body["changed"], true);
        assert_eq!(body["running"], true);
    }

    #[tokio::test]
    async fn test_force_wake_forgets_mapping() {
        let (_tmp, engine, app) = setup();
        engine
            .store()
            .put("src-1", &DestinationRef::post("dyn_1"))
            .unwrap();

        let body = json(
            app.clone()
                .oneshot(authed("POST", "/api/v1/force-wake/src-1"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(body["source_id"], "src-1");
        assert_eq!(body["forgotten"], true);
        assert_eq!(engine.store().get("src-1").unwrap(), None);

        let body = json(
            app.oneshot(authed("POST", "/api/v1/force-wake/src-1"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(body["forgotten"], false);
    }
}
