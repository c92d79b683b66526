//! Quiz Payment Server - Main Application Entry Point
//!
//! Creates payments with the Finik acquiring API, reconciles its signed
//! status callbacks into a local ledger, and provisions accounts and
//! subscriptions the first time a payment succeeds.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Processor**: RSA-SHA256 signed requests and callbacks
//! - **Authentication**: HS256 bearer tokens for user routes
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Load processor keys and build the HTTP client
//! 5. Build HTTP router with routes and middleware
//! 6. Start server on configured port

mod config;
mod db;
mod error;
mod finik;
mod handlers;
mod middleware;
mod models;
mod repositories;
mod services;
mod state;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::finik::{FinikClient, WebhookValidator};
use crate::repositories::postgres::{PgTransactionRepository, PgUserRepository};
use crate::services::payment_service::PaymentSettings;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!(finik_env = ?config.finik_env, app_env = ?config.app_env, "Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let validator = WebhookValidator::from_pem(&config.public_key_pem())?;
    let finik = FinikClient::from_config(&config)?;

    let enforce_signatures = config.enforce_webhook_signatures();
    if !enforce_signatures {
        tracing::warn!("Webhook signature enforcement is OFF (SKIP_SIGNATURE_VALIDATION)");
    }
    if config.finik_api_key.is_none() || config.finik_account_id.is_none() {
        tracing::warn!("FINIK_API_KEY or FINIK_ACCOUNT_ID not set; payment creation will fail");
    }

    let state = AppState {
        transactions: Arc::new(PgTransactionRepository::new(pool.clone())),
        users: Arc::new(PgUserRepository::new(pool)),
        finik: Arc::new(finik),
        validator: Arc::new(validator),
        payment_settings: Arc::new(PaymentSettings::from_config(&config)),
        enforce_signatures,
        jwt_secret: config.jwt_secret.as_str().into(),
    };

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // This blocks forever, handling requests concurrently with tokio
    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Build the HTTP router.
fn app(state: AppState) -> Router {
    // Routes that need a signed-in user
    let authenticated_routes = Router::new()
        .route(
            "/api/payments/transactions",
            get(handlers::payments::list_transactions),
        )
        .route(
            "/api/payments/transactions/{id}",
            get(handlers::payments::get_transaction),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_user,
        ));

    Router::new()
        // Public routes (no bearer token required)
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api/payments/create",
            post(handlers::payments::create_payment),
        )
        .route(
            "/api/payments/create-registration",
            post(handlers::payments::create_registration_payment),
        )
        .route(
            "/api/payments/status/{payment_id}",
            get(handlers::payments::payment_status),
        )
        // Authenticated by the processor's signature, not a token
        .route(
            "/api/payments/webhook",
            post(handlers::webhooks::receive_webhook),
        )
        .merge(authenticated_routes)
        // Add distributed tracing middleware for observability
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::finik::signer::RequestSigner;
    use crate::finik::signer::test_keys;
    use crate::finik::validator::canonical_request;
    use crate::middleware::auth::test_token;
    use crate::models::transaction::{NewTransaction, PaymentStatus};
    use crate::repositories::TransactionRepository;
    use crate::repositories::memory::{InMemoryTransactionRepository, InMemoryUserRepository};

    const SECRET: &str = "test-secret";
    const WEBHOOK_PATH: &str = "/api/payments/webhook";

    struct Harness {
        transactions: Arc<InMemoryTransactionRepository>,
        users: Arc<InMemoryUserRepository>,
        router: Router,
    }

    fn harness(enforce_signatures: bool) -> Harness {
        let transactions = Arc::new(InMemoryTransactionRepository::new());
        let users = Arc::new(InMemoryUserRepository::new());
        let state = AppState {
            transactions: transactions.clone(),
            users: users.clone(),
            finik: Arc::new(
                FinikClient::new("http://127.0.0.1:9".to_string(), None, None).unwrap(),
            ),
            validator: Arc::new(WebhookValidator::new(test_keys::merchant().1.clone())),
            payment_settings: Arc::new(PaymentSettings {
                account_id: None,
                merchant_category_code: "0742".to_string(),
                name_en: "stud.kg Payment".to_string(),
                webhook_url: None,
                redirect_url: None,
            }),
            enforce_signatures,
            jwt_secret: SECRET.into(),
        };

        Harness {
            transactions,
            users,
            router: app(state),
        }
    }

    /// A webhook request whose signature covers `signed_body`.
    fn webhook(signed_body: &[u8], sent_body: &[u8]) -> Request<Body> {
        let uri: Uri = WEBHOOK_PATH.parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("quiz.example.kg"));
        headers.insert("x-api-timestamp", HeaderValue::from_static("1700000000000"));

        let canonical = canonical_request(&Method::POST, &uri, &headers, signed_body);
        let signature = RequestSigner::new(test_keys::merchant().0.clone())
            .sign(&canonical)
            .unwrap();

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .header("signature", signature);
        for (name, value) in &headers {
            request = request.header(name, value);
        }
        request.body(Body::from(sent_body.to_vec())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_connected() {
        let h = harness(true);
        let response = h
            .router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["database"], "connected");
    }

    #[tokio::test]
    async fn signed_registration_webhook_creates_account() {
        let h = harness(true);
        let body = json!({
            "transactionId": "P-100",
            "status": "SUCCEEDED",
            "amount": 500,
            "fields": {
                "paymentType": "registration",
                "registrationData": {
                    "username": "ann",
                    "email": "ann@example.com",
                    "password": "secret1"
                }
            }
        })
        .to_string();

        let response = h
            .router
            .oneshot(webhook(body.as_bytes(), body.as_bytes()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["message"], "Webhook processed");

        let rows = h.transactions.all();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, PaymentStatus::Succeeded);

        let users = h.users.all();
        assert_eq!(users.len(), 1);
        assert_eq!(rows[0].user_id, Some(users[0].user.id));
    }

    #[tokio::test]
    async fn tampered_webhook_is_rejected_without_writes() {
        let h = harness(true);
        let signed = br#"{"transactionId":"P-1","status":"PENDING","amount":5}"#;
        let sent = br#"{"transactionId":"P-1","status":"SUCCEEDED","amount":5}"#;

        let response = h.router.oneshot(webhook(signed, sent)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(response).await["error"]["code"],
            "invalid_signature"
        );
        assert!(h.transactions.all().is_empty());
    }

    #[tokio::test]
    async fn bad_signature_is_only_logged_when_enforcement_is_off() {
        let h = harness(false);
        let signed = br#"{"transactionId":"P-2","status":"PENDING"}"#;
        let sent = br#"{"transactionId":"P-2","status":"FAILED"}"#;

        let response = h.router.oneshot(webhook(signed, sent)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.transactions.all()[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn signed_garbage_is_a_bad_request() {
        let h = harness(true);
        let body = b"not json";

        let response = h.router.oneshot(webhook(body, body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "invalid_payload");
    }

    #[tokio::test]
    async fn webhook_without_transaction_id_is_a_bad_request() {
        let h = harness(true);
        let body = br#"{"status":"SUCCEEDED"}"#;

        let response = h.router.oneshot(webhook(body, body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(h.transactions.all().is_empty());
    }

    #[tokio::test]
    async fn transactions_require_a_token() {
        let h = harness(true);
        let response = h
            .router
            .oneshot(
                Request::get("/api/payments/transactions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn transactions_are_scoped_to_the_caller() {
        let h = harness(true);
        let caller = Uuid::new_v4();
        let own = h
            .transactions
            .insert(NewTransaction::pending("P-own".into(), Some(caller), 50_000, json!({})))
            .await
            .unwrap();
        let foreign = h
            .transactions
            .insert(NewTransaction::pending(
                "P-foreign".into(),
                Some(Uuid::new_v4()),
                10_000,
                json!({}),
            ))
            .await
            .unwrap();
        let token = format!("Bearer {}", test_token(caller, SECRET));

        let response = h
            .router
            .clone()
            .oneshot(
                Request::get("/api/payments/transactions")
                    .header("authorization", &token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listed = json_body(response).await;
        assert_eq!(listed["transactions"].as_array().unwrap().len(), 1);
        assert_eq!(listed["transactions"][0]["paymentId"], "P-own");
        assert_eq!(listed["transactions"][0]["amount"], 500);

        let response = h
            .router
            .clone()
            .oneshot(
                Request::get(format!("/api/payments/transactions/{}", own.id))
                    .header("authorization", &token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = h
            .router
            .oneshot(
                Request::get(format!("/api/payments/transactions/{}", foreign.id))
                    .header("authorization", &token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_route_reports_pending_payment() {
        let h = harness(true);
        h.transactions
            .insert(NewTransaction::pending("P-9".into(), None, 50_000, json!({})))
            .await
            .unwrap();

        let response = h
            .router
            .oneshot(
                Request::get("/api/payments/status/P-9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "PENDING");
        assert_eq!(body["accountLinked"], false);
    }

    #[tokio::test]
    async fn status_route_does_not_reveal_the_owner() {
        let h = harness(true);
        let owner = Uuid::new_v4();
        h.transactions
            .insert(NewTransaction::pending(
                "P-10".into(),
                Some(owner),
                50_000,
                json!({}),
            ))
            .await
            .unwrap();

        let response = h
            .router
            .oneshot(
                Request::get("/api/payments/status/P-10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["accountLinked"], true);
        assert!(body.get("userId").is_none());
        assert!(!body.to_string().contains(&owner.to_string()));
    }

    #[tokio::test]
    async fn payment_creation_without_account_id_is_a_configuration_error() {
        let h = harness(true);
        let response = h
            .router
            .oneshot(
                Request::post("/api/payments/create")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"amount":500}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await["error"]["code"],
            "configuration_error"
        );
    }
}
