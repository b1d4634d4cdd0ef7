use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use postbot_core::PostbotConfig;
use postbot_scheduler::SchedulerHandle;
use postbot_store::ViewSync;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Extra request body room on top of the base64-encoded media: JSON keys,
/// the data-URL prefix, the schedule time and the access token.
const BODY_HEADROOM_BYTES: usize = 64 * 1024;

/// Shared by every handler as `Arc<AppState>`.
pub struct AppState {
    pub config: PostbotConfig,
    pub scheduler: SchedulerHandle,
    pub sync: ViewSync,
    /// Active WS connections: conn_id -> connected at.
    pub ws_clients: DashMap<String, DateTime<Utc>>,
}

impl AppState {
    pub fn new(config: PostbotConfig, scheduler: SchedulerHandle, sync: ViewSync) -> Self {
        Self {
            config,
            scheduler,
            sync,
            ws_clients: DashMap::new(),
        }
    }
}

/// Largest accepted request body for a given media ceiling.
pub fn body_limit(max_media_bytes: usize) -> usize {
    max_media_bytes.div_ceil(3) * 4 + BODY_HEADROOM_BYTES
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let limit = body_limit(state.config.scheduler.max_media_bytes);
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/posts",
            get(crate::http::posts::list_posts).post(crate::http::posts::create_post),
        )
        .route("/posts/{id}/media", get(crate::http::posts::post_media))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use postbot_store::{PostStore, SqlitePostStore};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router_with_limit(max_media_bytes: usize) -> Router {
        let store: Arc<dyn PostStore> = Arc::new(SqlitePostStore::open_in_memory().unwrap());
        let mut config = PostbotConfig::default();
        config.scheduler.max_media_bytes = max_media_bytes;
        let scheduler = SchedulerHandle::new(Arc::clone(&store), max_media_bytes);
        let state = Arc::new(AppState::new(config, scheduler, ViewSync::new(store)));
        build_router(state)
    }

    fn router() -> Router {
        router_with_limit(1024)
    }

    fn future() -> String {
        (Utc::now() + chrono::Duration::hours(1)).to_rfc3339()
    }

    fn create(body: Value) -> Request<Body> {
        Request::post("/posts")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let resp = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["ws_clients"], 0);
    }

    #[tokio::test]
    async fn scheduled_post_is_listed_without_credential() {
        let app = router();
        let resp = app
            .clone()
            .oneshot(create(json!({
                "media_url": "data:image/png;base64,iVBORw0K",
                "schedule_time": future(),
                "access_token": "secret-page-token",
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let id = json_body(resp).await["id"].as_str().unwrap().to_string();

        let resp = app
            .oneshot(Request::get("/posts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!text.contains("secret-page-token"));

        let posts: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(posts[0]["id"], id.as_str());
        assert_eq!(posts[0]["status"], "scheduled");
        assert_eq!(posts[0]["media"]["mime_type"], "image/png");
        assert_eq!(posts[0]["media"]["size_bytes"], 6);
    }

    #[tokio::test]
    async fn past_schedule_time_is_bad_request() {
        let resp = router()
            .oneshot(create(json!({
                "media_url": "data:image/png;base64,AAAA",
                "schedule_time": "2001-01-01T00:00:00Z",
                "access_token": "t",
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["code"], "INVALID_SCHEDULE");
    }

    #[tokio::test]
    async fn unparseable_schedule_time_is_bad_request() {
        let resp = router()
            .oneshot(create(json!({
                "media_url": "data:image/png;base64,AAAA",
                "schedule_time": "tomorrow at noon",
                "access_token": "t",
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["code"], "INVALID_SCHEDULE");
    }

    #[tokio::test]
    async fn non_media_payload_is_bad_request() {
        for media_url in [
            "https://example.com/cat.png",
            "data:text/plain;base64,aGk=",
            "data:image/png;base64,***",
        ] {
            let resp = router()
                .oneshot(create(json!({
                    "media_url": media_url,
                    "schedule_time": future(),
                    "access_token": "t",
                })))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{media_url}");
            assert_eq!(json_body(resp).await["code"], "INVALID_MEDIA");
        }
    }

    #[tokio::test]
    async fn oversized_media_is_413() {
        let resp = router_with_limit(4)
            .oneshot(create(json!({
                "media_url": "data:video/mp4;base64,AAAAAAAA",
                "schedule_time": future(),
                "access_token": "t",
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(resp).await["code"], "PAYLOAD_TOO_LARGE");
    }

    #[tokio::test]
    async fn body_over_the_limit_is_413_with_error_body() {
        let payload = "A".repeat(body_limit(3) + 1);
        let resp = router_with_limit(3)
            .oneshot(create(json!({
                "media_url": format!("data:image/png;base64,{payload}"),
                "schedule_time": future(),
                "access_token": "t",
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = json_body(resp).await;
        assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn malformed_json_keeps_error_shape() {
        let resp = router()
            .oneshot(
                Request::post("/posts")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{\"media_url\": "))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn reused_id_is_conflict() {
        let app = router();
        let body = json!({
            "id": "launch-day",
            "media_url": "data:image/jpeg;base64,/9j/",
            "schedule_time": future(),
            "access_token": "t",
        });
        let first = app.clone().oneshot(create(body.clone())).await.unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        assert_eq!(json_body(first).await["id"], "launch-day");

        let second = app.oneshot(create(body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(second).await["code"], "DUPLICATE_ID");
    }

    #[tokio::test]
    async fn media_route_serves_bytes_with_content_type() {
        let app = router();
        let resp = app
            .clone()
            .oneshot(create(json!({
                "id": "clip",
                "media_url": "data:video/mp4;base64,AAECAw==",
                "schedule_time": future(),
                "access_token": "t",
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app
            .clone()
            .oneshot(Request::get("/posts/clip/media").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "video/mp4");
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], &[0, 1, 2, 3]);

        let resp = app
            .oneshot(Request::get("/posts/nope/media").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(resp).await["code"], "NOT_FOUND");
    }

    #[test]
    fn body_limit_covers_base64_growth() {
        assert_eq!(body_limit(3), 4 + BODY_HEADROOM_BYTES);
        assert_eq!(body_limit(4), 8 + BODY_HEADROOM_BYTES);
        assert!(body_limit(50 * 1024 * 1024) > 50 * 1024 * 1024 * 4 / 3);
    }
}
