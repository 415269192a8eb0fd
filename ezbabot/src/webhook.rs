//! Webhook transport. Telegram redelivers anything that is not answered
//! quickly with a success status, so every POST is acknowledged with
//! `200 OK` at once and the update is processed on its own task.
//!
//! The same server carries the web app's `/api/data` routes.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use teloxide::{
    Bot,
    prelude::Requester,
    types::{ChatId, Update},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    farmhand::{Farmhand, SubmitError, Submission},
    handlers::process_update,
    reply,
};

pub const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

const ACK: &str = "OK";

type UpdateSink = Arc<dyn Fn(Update) + Send + Sync>;

/// Sends a text to one chat
pub type Notifier = Arc<dyn Fn(u64, String) + Send + Sync>;

#[derive(Clone)]
struct WebhookState {
    secret: Option<String>,
    sink: UpdateSink,
}

/// What the `/api/data` routes work with
#[derive(Clone)]
pub struct DataApi {
    farmhand: Arc<Farmhand>,
    notify: Notifier,
}

impl DataApi {
    pub fn new(farmhand: Arc<Farmhand>, notify: Notifier) -> Self {
        Self { farmhand, notify }
    }
}

/// Routes: `POST /` takes updates, `GET /` is the health check,
/// `GET /api/data` reads the ledger and `POST /api/data` records into it
pub fn build_router(secret: Option<String>, sink: UpdateSink, data: DataApi) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);
    let api = Router::new()
        .route("/api/data", get(read_data).post(submit_transaction))
        .with_state(data)
        .layer(cors);
    Router::new()
        .route("/", get(health_check).post(receive_update))
        .with_state(WebhookState { secret, sink })
        .merge(api)
}

async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, ACK)
}

async fn receive_update(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if let Some(secret) = &state.secret {
        let given = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if given != Some(secret.as_str()) {
            log::warn!("Dropping webhook call with a missing or wrong secret token");
            return (StatusCode::OK, ACK);
        }
    }

    match serde_json::from_slice::<Update>(&body) {
        Ok(update) => (state.sink)(update),
        Err(e) => log::warn!("Dropping malformed update: {}", e),
    }
    (StatusCode::OK, ACK)
}

fn failure(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(json!({ "ok": false, "error": error.into() }))).into_response()
}

impl IntoResponse for SubmitError {
    fn into_response(self) -> Response {
        let status = match &self {
            SubmitError::NotAllowed(_) => StatusCode::FORBIDDEN,
            SubmitError::Invalid(_) => StatusCode::BAD_REQUEST,
            SubmitError::Store(err) => {
                log::error!("Web app submission failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        failure(status, self.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ViewQuery {
    user_id: u64,
}

async fn read_data(State(api): State<DataApi>, Query(query): Query<ViewQuery>) -> Response {
    if !api.farmhand.is_allowed(query.user_id) {
        log::warn!("Rejected data read by unauthorized user {}", query.user_id);
        return failure(StatusCode::FORBIDDEN, "not authorized");
    }
    match api.farmhand.ledger_view().await {
        Ok(view) => Json(json!({
            "ok": true,
            "transactions": view.transactions,
            "inventory": view.inventory,
            "summary": view.summary,
        }))
        .into_response(),
        Err(e) => {
            log::error!("Failed to read the ledger for the web app: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn submit_transaction(
    State(api): State<DataApi>,
    Json(submission): Json<Submission>,
) -> Result<Json<serde_json::Value>, SubmitError> {
    let transaction = api.farmhand.record_submission(submission).await?;
    let text = reply::app_notification(&transaction);
    for chat in api.farmhand.notify_chats() {
        (api.notify)(chat, text.clone());
    }
    Ok(Json(json!({ "ok": true, "message": "تم التسجيل" })))
}

/// Serve the webhook until the process is stopped
pub async fn serve(
    addr: SocketAddr,
    secret: Option<String>,
    bot: Bot,
    farmhand: Arc<Farmhand>,
) -> std::io::Result<()> {
    let sink_bot = bot.clone();
    let sink_farmhand = farmhand.clone();
    let sink: UpdateSink = Arc::new(move |update| {
        tokio::spawn(process_update(sink_bot.clone(), sink_farmhand.clone(), update));
    });
    let notify: Notifier = Arc::new(move |chat, text| {
        let Ok(chat_id) = i64::try_from(chat) else {
            log::warn!("Chat id {} out of range, not notified", chat);
            return;
        };
        let bot = bot.clone();
        tokio::spawn(async move {
            if let Err(e) = bot.send_message(ChatId(chat_id), text).await {
                log::warn!("Failed to notify chat {}: {}", chat_id, e);
            }
        });
    });
    let listener = TcpListener::bind(addr).await?;
    log::info!("Listening for webhook updates on {}", addr);
    axum::serve(listener, build_router(secret, sink, DataApi::new(farmhand, notify))).await
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::{body::Body, http::Request};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        classifier::{Classifier, LanguageModel, tests::ScriptedModel},
        config::{AllowList, AllowedUser, Role},
        farmhand::FarmSettings,
        storages::{LedgerStore, MemoryLedger},
    };

    const UPDATE: &str = r#"{
        "update_id": 42,
        "message": {
            "message_id": 5,
            "date": 1710496800,
            "chat": {"id": 100, "type": "private", "first_name": "Hamad"},
            "from": {"id": 100, "is_bot": false, "first_name": "Hamad"},
            "text": "بعت بيض بـ 200"
        }
    }"#;

    struct TestApp {
        router: Router,
        seen: Arc<Mutex<Vec<u32>>>,
        notified: Arc<Mutex<Vec<(u64, String)>>>,
        store: Arc<MemoryLedger>,
    }

    fn test_app(secret: Option<&str>) -> TestApp {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: UpdateSink = Arc::new(move |update: Update| {
            sink_seen.lock().unwrap().push(update.id.0);
        });
        let notified = Arc::new(Mutex::new(Vec::new()));
        let notify_log = notified.clone();
        let notify: Notifier = Arc::new(move |chat, text| {
            notify_log.lock().unwrap().push((chat, text));
        });

        let store = Arc::new(MemoryLedger::new());
        let allow_list = AllowList::new([
            AllowedUser {
                id: 100,
                name: "Hamad".to_string(),
                role: Role::Admin,
            },
            AllowedUser {
                id: 200,
                name: "Saeed".to_string(),
                role: Role::Viewer,
            },
        ]);
        let model: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::replying(&[]));
        let farmhand = Arc::new(Farmhand::new(
            store.clone(),
            Classifier::new(model),
            allow_list,
            FarmSettings::default(),
            "ezbabot",
        ));
        let router = build_router(
            secret.map(str::to_string),
            sink,
            DataApi::new(farmhand, notify),
        );
        TestApp {
            router,
            seen,
            notified,
            store,
        }
    }

    fn post(body: &str, secret: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn post_data(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/data")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app(None);
        let response = app
            .router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_update_is_handed_off() {
        let app = test_app(None);
        let response = app.router.oneshot(post(UPDATE, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*app.seen.lock().unwrap(), vec![42]);
    }

    #[tokio::test]
    async fn test_malformed_body_still_acknowledged() {
        let app = test_app(None);
        let response = app.router.oneshot(post("not json", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(app.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_secret_token() {
        let app = test_app(Some("s3cret"));
        let response = app
            .router
            .clone()
            .oneshot(post(UPDATE, Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(app.seen.lock().unwrap().is_empty());

        app.router.oneshot(post(UPDATE, Some("s3cret"))).await.unwrap();
        assert_eq!(*app.seen.lock().unwrap(), vec![42]);
    }

    #[tokio::test]
    async fn test_data_submission_records_and_notifies() {
        let app = test_app(None);
        let response = app
            .router
            .clone()
            .oneshot(post_data(json!({
                "user_id": 100,
                "type": "دخل",
                "item": "بيض",
                "amount": 200
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["ok"], json!(true));

        let stored = app.store.list_transactions().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].recorded_by, "Hamad");

        let notified = app.notified.lock().unwrap().clone();
        let chats: Vec<u64> = notified.iter().map(|(chat, _)| *chat).collect();
        assert_eq!(chats, vec![100, 200]);
        assert!(notified[0].1.contains("بيض"));

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/data?user_id=200")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["transactions"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["summary"]["income"], json!(200.0));
        assert_eq!(body["summary"]["profit"], json!(200.0));
    }

    #[tokio::test]
    async fn test_data_routes_follow_the_allow_list() {
        let app = test_app(None);
        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/data?user_id=999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let viewer = app
            .router
            .clone()
            .oneshot(post_data(json!({
                "user_id": 200,
                "type": "صرف",
                "item": "علف",
                "amount": 50
            })))
            .await
            .unwrap();
        assert_eq!(viewer.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(viewer).await["ok"], json!(false));

        let invalid = app
            .router
            .oneshot(post_data(json!({
                "user_id": 100,
                "type": "صرف",
                "item": "علف",
                "amount": "free"
            })))
            .await
            .unwrap();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        assert!(app.store.list_transactions().await.unwrap().is_empty());
        assert!(app.notified.lock().unwrap().is_empty());
    }
}
