use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chatrelay::aggregator::TriggerAggregator;
use chatrelay::bridge::Bridge;
use chatrelay::chat::ChatPlatform;
use chatrelay::completion::{CompletionClient, CompletionProvider, CompletionRequest};
use chatrelay::db::{init_memory_db, BotState};
use chatrelay::dispatcher::{RelayCommand, RelayDispatcher, Session};
use chatrelay::failover::FailoverController;
use chatrelay::gate::Gate;
use chatrelay::health::{router, HealthState};
use chatrelay::types::{OperatorId, OperatorRole, Result, SessionIdentity};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tower::ServiceExt;

struct SilentChat;

#[async_trait]
impl ChatPlatform for SilentChat {
    async fn join(&self, _channel: &str) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, _channel: &str, _text: &str) -> Result<()> {
        Ok(())
    }
}

struct AlwaysOk;

struct AlwaysOkClient(String);

#[async_trait]
impl CompletionClient for AlwaysOkClient {
    fn credential(&self) -> &str {
        &self.0
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Ok("Hi".to_string())
    }
}

impl CompletionProvider for AlwaysOk {
    fn bind(&self, credential: &str) -> Arc<dyn CompletionClient> {
        Arc::new(AlwaysOkClient(credential.to_string()))
    }
}

async fn spawn_dispatcher() -> (mpsc::Sender<RelayCommand>, mpsc::Sender<chatrelay::ChatEvent>) {
    let dispatcher = RelayDispatcher::new(
        Session::new(
            FailoverController::new(Arc::new(AlwaysOk)),
            TriggerAggregator::new(fastrand::Rng::with_seed(1)),
        ),
        Gate::new(),
        Bridge::detached(),
        Arc::new(SilentChat),
        fastrand::Rng::with_seed(2),
        1,
    );
    let (tx_chat, rx_chat) = mpsc::channel(8);
    let (tx_cmd, rx_cmd) = mpsc::channel(8);
    tokio::spawn(dispatcher.run(rx_chat, rx_cmd));
    (tx_cmd, tx_chat)
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = match Request::builder().uri(uri).body(Body::empty()) {
        Ok(r) => r,
        Err(e) => panic!("bad request: {}", e),
    };
    let response = match app.oneshot(request).await {
        Ok(r) => r,
        Err(e) => panic!("router failed: {}", e),
    };
    let status = response.status();
    let bytes = match axum::body::to_bytes(response.into_body(), usize::MAX).await {
        Ok(b) => b,
        Err(e) => panic!("body read failed: {}", e),
    };
    let json = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => panic!("body is not json: {}", e),
    };
    (status, json)
}

#[tokio::test]
async fn test_liveness_is_always_ok() {
    let db = match init_memory_db().await {
        Ok(p) => p,
        Err(e) => panic!("db init failed: {:?}", e),
    };
    let (tx_cmd, _tx_chat) = spawn_dispatcher().await;
    let app = router(Arc::new(HealthState { db, tx_cmd }));

    let (status, body) = get_json(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_readiness_requires_a_session_with_credentials() {
    let db = match init_memory_db().await {
        Ok(p) => p,
        Err(e) => panic!("db init failed: {:?}", e),
    };
    let (tx_cmd, _tx_chat) = spawn_dispatcher().await;
    let app = router(Arc::new(HealthState {
        db,
        tx_cmd: tx_cmd.clone(),
    }));

    let (status, body) = get_json(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["database"], "ok");
    assert_eq!(body["session"], "no_session");

    let (resp, rx) = oneshot::channel();
    let login = RelayCommand::Login {
        identity: SessionIdentity {
            operator_id: OperatorId(5),
            role: OperatorRole::Owner,
        },
        credentials: vec!["sk-health".into()],
        stop_words: Vec::new(),
        state: BotState {
            channel: Some("streamer".into()),
            enabled: false,
        },
        resp,
    };
    if tx_cmd.send(login).await.is_err() {
        panic!("dispatcher stopped");
    }
    match rx.await {
        Ok(Ok(report)) => assert!(report.working_credential),
        other => panic!("login failed: {:?}", other.map(|r| r.is_ok())),
    }

    let (status, body) = get_json(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["channel"], "streamer");
    assert_eq!(body["relay_enabled"], false);
}

#[tokio::test]
async fn test_readiness_without_dispatcher() {
    let db = match init_memory_db().await {
        Ok(p) => p,
        Err(e) => panic!("db init failed: {:?}", e),
    };
    let (tx_cmd, rx_cmd) = mpsc::channel(1);
    drop(rx_cmd);
    let app = router(Arc::new(HealthState { db, tx_cmd }));

    let (status, body) = get_json(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["session"], "unavailable");
}
