use axum::{
    routing::{delete, get},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    create_location, delete_sample, health_check, interest_recommendations, list_locations,
    list_samples, overcrowded, owner_trend, planner_report_csv, planner_trends, recommendations,
    record_sample, send_test_alert, AppState,
};
use crate::alerts::{dispatcher_from_config, OvercrowdingMonitor};
use crate::config::AppConfig;
use crate::storage::SqliteStore;

/// HTTP bind settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Alerts
        .route("/alerts/send-test", get(send_test_alert))
        .route("/alerts/overcrowded", get(overcrowded))
        // Visitor-facing data
        .route("/locations", get(list_locations).post(create_location))
        .route("/samples", get(list_samples).post(record_sample))
        .route("/samples/:id", delete(delete_sample))
        .route(
            "/recommendations",
            get(recommendations).post(interest_recommendations),
        )
        // Business owner
        .route("/owner/trend", get(owner_trend))
        // Planner
        .route("/planner/trends", get(planner_trends))
        .route("/planner/report.csv", get(planner_report_csv))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Open the store, start the overcrowding monitor, and serve HTTP until Ctrl-C
pub async fn run_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteStore::open(&config.database_path)?);
    let dispatcher = dispatcher_from_config(&config.mail, &config.alerts.sender)?;
    tracing::info!(dispatcher = dispatcher.kind(), "Notification dispatcher ready");

    let monitor = Arc::new(OvercrowdingMonitor::new(
        store.clone(),
        dispatcher,
        config.alerts.clone(),
    ));
    let monitor_handle = Arc::clone(&monitor).start();

    let state = Arc::new(AppState { store, monitor });
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Starting footfall server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    monitor_handle.stop().await;

    tracing::info!("footfall server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, stopping monitor...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertPolicy, DispatchError, Dispatcher, LogDispatcher, Notification};
    use crate::data::NewLocation;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::util::ServiceExt;

    struct FailingDispatcher;

    #[async_trait]
    impl Dispatcher for FailingDispatcher {
        fn kind(&self) -> &'static str {
            "failing"
        }

        async fn send(&self, _notification: &Notification) -> Result<(), DispatchError> {
            Err(DispatchError::Transport("relay unreachable".to_string()))
        }
    }

    fn app_with(dispatcher: Arc<dyn Dispatcher>) -> (Router, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let monitor = Arc::new(OvercrowdingMonitor::new(
            store.clone(),
            dispatcher,
            AlertPolicy::default().with_recipients(vec!["ops@example.com".to_string()]),
        ));
        let state = Arc::new(AppState {
            store: store.clone(),
            monitor,
        });
        (build_router(state), store)
    }

    fn create_test_app() -> (Router, Arc<SqliteStore>) {
        app_with(Arc::new(LogDispatcher))
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = create_test_app();
        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_send_test_succeeds_with_working_dispatcher() {
        let (app, store) = create_test_app();

        // Overcrowded data present or not, the canned message is the same
        let beach = store
            .create_location(NewLocation::new("Beach", "Wellington"))
            .await
            .unwrap();
        store
            .record_sample(crate::data::NewSample::new(beach.id, 500))
            .await
            .unwrap();

        let response = app.oneshot(get_request("/alerts/send-test")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            "Test email sent! Check your inbox (and spam)."
        );
    }

    #[tokio::test]
    async fn test_send_test_fails_with_broken_dispatcher() {
        let (app, _) = app_with(Arc::new(FailingDispatcher));

        let response = app.oneshot(get_request("/alerts/send-test")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_string(response).await,
            "Test email failed. Check server console."
        );
    }

    #[tokio::test]
    async fn test_record_sample_and_snapshot() {
        let (app, _) = create_test_app();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/locations",
                serde_json::json!({ "name": "Beach", "region": "Wellington", "category": "nature" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let location: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        let location_id = location["id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/samples",
                serde_json::json!({ "location_id": location_id, "visitor_count": 80 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(get_request("/alerts/overcrowded"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(snapshot["threshold"], 50);
        assert_eq!(snapshot["locations"][0]["location_name"], "Beach");
        assert_eq!(snapshot["locations"][0]["visitor_count"], 80);

        let response = app.oneshot(get_request("/samples")).await.unwrap();
        let samples: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(samples.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sample_for_unknown_location_is_not_found() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(json_request(
                "POST",
                "/samples",
                serde_json::json!({ "location_id": 999, "visitor_count": 10 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_missing_sample() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/samples/7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_interest_recommendations() {
        let (app, store) = create_test_app();
        for (name, category, count) in [
            ("Beach", "nature", 40),
            ("Track", "adventure", 70),
            ("Forest", "nature", 90),
        ] {
            let location = store
                .create_location(NewLocation::new(name, "Wellington").with_category(category))
                .await
                .unwrap();
            store
                .record_sample(crate::data::NewSample::new(location.id, count))
                .await
                .unwrap();
        }

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/recommendations",
                serde_json::json!({ "interest": "nature" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let rows: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        let names: Vec<_> = rows
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Forest", "Beach"]);
        assert_eq!(rows[0]["total_visitors"], 90);

        for rejected in [
            serde_json::json!({ "interest": "shopping" }),
            serde_json::json!({ "interest": "" }),
            serde_json::json!({}),
        ] {
            let response = app
                .clone()
                .oneshot(json_request("POST", "/recommendations", rejected))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body: serde_json::Value =
                serde_json::from_str(&body_string(response).await).unwrap();
            assert_eq!(body["error"], "Invalid interest selected");
        }
    }

    #[tokio::test]
    async fn test_owner_trend() {
        let (app, store) = create_test_app();
        let beach = store
            .create_location(NewLocation::new("Beach", "Wellington"))
            .await
            .unwrap();
        let now = chrono::Utc::now();
        for (count, days_ago) in [(10, 0), (5, 0), (20, 3), (99, 8)] {
            store
                .record_sample(
                    crate::data::NewSample::new(beach.id, count)
                        .at(now - chrono::Duration::days(days_ago)),
                )
                .await
                .unwrap();
        }

        let response = app.oneshot(get_request("/owner/trend")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let rows: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        let rows = rows.as_array().unwrap();

        // The eight-day-old sample is outside the week
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["visitors"], 20);
        assert_eq!(rows[1]["location"], "Beach");
        assert_eq!(rows[1]["visitors"], 15);
    }

    #[tokio::test]
    async fn test_planner_endpoints() {
        let (app, store) = create_test_app();
        let beach = store
            .create_location(NewLocation::new("Beach", "Wellington"))
            .await
            .unwrap();
        store
            .record_sample(crate::data::NewSample::new(beach.id, 40))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(get_request("/planner/trends?region=Wellington"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(report["regions"][0]["total_visitors"], 40);
        assert_eq!(report["prediction"], 40);

        let response = app
            .oneshot(get_request("/planner/report.csv"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/csv"));
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("planner_report.csv"));

        let csv = body_string(response).await;
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("region,day,total_visitors"));
        assert!(lines.next().unwrap().starts_with("Wellington,"));
    }
}
