use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use saas_assistant::chat::{Chat, parse_markers};
use saas_assistant::config::{AppConfig, BrokerConfig, ProviderEndpoints};
use saas_assistant::llm::{EventStream, LlmDriver, LlmRequest};
use saas_assistant::normalized::NormalizedEvent;
use saas_assistant::{AppState, router};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "test-secret";
const SCHEDULE: &str = "Schedule a meeting with john@example.com tomorrow at 2pm for 1 hour";

/// Plays back one script per model call; the last script repeats.
struct ScriptedDriver {
    scripts: Vec<Vec<NormalizedEvent>>,
    calls: AtomicUsize,
    tool_counts: Mutex<Vec<usize>>,
}

impl ScriptedDriver {
    fn new(scripts: Vec<Vec<NormalizedEvent>>) -> Arc<Self> {
        Arc::new(Self {
            scripts,
            calls: AtomicUsize::new(0),
            tool_counts: Mutex::new(Vec::new()),
        })
    }

    fn answer(text: &str) -> Arc<Self> {
        Self::new(vec![vec![
            NormalizedEvent::MessageDelta { text: text.into() },
            NormalizedEvent::Done,
        ]])
    }
}

#[async_trait::async_trait]
impl LlmDriver for ScriptedDriver {
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.tool_counts.lock().unwrap().push(req.tools.len());
        let script = self.scripts[n.min(self.scripts.len() - 1)].clone();
        Ok(Box::pin(futures::stream::iter(script.into_iter().map(Ok))))
    }
}

fn calendar_then_answer() -> Arc<ScriptedDriver> {
    ScriptedDriver::new(vec![
        vec![
            NormalizedEvent::ToolCallComplete {
                call_index: 0,
                id: "call_1".into(),
                name: "google_calendar".into(),
                arguments_json: json!({
                    "action": "create_event",
                    "title": "Meeting with John",
                    "date": "tomorrow",
                    "time": "2pm",
                    "duration": "1 hour",
                    "attendees": ["john@example.com"]
                })
                .to_string(),
            },
            NormalizedEvent::Done,
        ],
        vec![
            NormalizedEvent::MessageDelta {
                text: "Please connect your Google Calendar so I can book it.".into(),
            },
            NormalizedEvent::Done,
        ],
    ])
}

fn config(base: &str, jwt_required: bool) -> Arc<AppConfig> {
    let mut config = AppConfig::default();
    config.security.jwt_secret = SECRET.to_string();
    config.security.jwt_required = jwt_required;
    config.broker = BrokerConfig {
        base_url: base.to_string(),
        project_id: "P1".to_string(),
        management_key: "K1".to_string(),
    };
    config.providers = ProviderEndpoints::all_at(base);
    Arc::new(config)
}

fn state(base: &str, driver: Arc<ScriptedDriver>) -> AppState {
    AppState::with_driver(config(base, false), driver)
}

fn bearer(user: &str) -> String {
    let claims = json!({ "sub": user, "name": user, "exp": 4_102_444_800_u64 });
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
}

fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("authorization", bearer(user));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn chat_body(id: &str, text: &str) -> Value {
    json!({
        "id": id,
        "messages": [{ "id": "m-1", "role": "user", "content": text }]
    })
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// `data:` payloads of an SSE body.
fn sse_events(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str(data.trim()).ok())
        .collect()
}

async fn broker_without_connections() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/mgmt/outbound/app/user/token"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    server
}

async fn seed_chat(state: &AppState, id: &str, owner: &str) {
    state
        .chats
        .save_chat(Chat {
            id: id.to_string(),
            user_id: owner.to_string(),
            title: "Seeded".to_string(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn scheduling_without_calendar_connection_asks_to_connect() {
    let server = broker_without_connections().await;
    let driver = calendar_then_answer();
    let state = state(&server.uri(), Arc::clone(&driver));
    let app = router(state.clone());

    let resp = app
        .oneshot(request("POST", "/api/chat", Some("alice"), Some(chat_body("chat-1", SCHEDULE))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let events = sse_events(&body_text(resp).await);
    assert_eq!(events.first().unwrap()["type"], "stream.start");
    assert_eq!(events.last().unwrap()["type"], "done");

    let tool_result = events
        .iter()
        .find(|e| e["type"] == "tool_result")
        .expect("tool result event");
    let result = &tool_result["data"]["result"];
    assert_eq!(result["success"], false);
    assert_eq!(result["ui"]["type"], "connection_required");
    assert_eq!(result["ui"]["service"], "google-calendar");
    assert_eq!(
        result["ui"]["connectButton"]["action"],
        "connection://google-calendar"
    );
    assert!(result.get("data").is_none());

    // Tools were offered because the message mentions scheduling.
    assert!(driver.tool_counts.lock().unwrap()[0] > 0);

    let messages = state.chats.get_messages("chat-1").await.unwrap();
    assert_eq!(messages.len(), 2);
    let markers = parse_markers(&messages[1].text());
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].service, "google-calendar");

    let chat = state.chats.get_chat("chat-1").await.unwrap().unwrap();
    assert_eq!(chat.user_id, "alice");
}

#[tokio::test]
async fn tool_runs_are_listed_in_history() {
    let server = broker_without_connections().await;
    let state = state(&server.uri(), calendar_then_answer());
    let app = router(state);

    let resp = app
        .clone()
        .oneshot(request("POST", "/api/chat", Some("alice"), Some(chat_body("chat-h", SCHEDULE))))
        .await
        .unwrap();
    body_text(resp).await;

    let resp = app
        .oneshot(request("GET", "/api/tools/history", Some("alice"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    let actions = json["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["tool"], "google_calendar");
    assert_eq!(actions[0]["success"], false);
}

#[tokio::test]
async fn anonymous_chat_streams_but_is_not_saved() {
    let driver = calendar_then_answer();
    let state = state("http://127.0.0.1:1", driver);
    let app = router(state.clone());

    let resp = app
        .oneshot(request("POST", "/api/chat", None, Some(chat_body("anon-1", SCHEDULE))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let events = sse_events(&body_text(resp).await);
    let result = events
        .iter()
        .find(|e| e["type"] == "tool_result")
        .map(|e| &e["data"]["result"])
        .unwrap();
    assert_eq!(result["ui"]["type"], "connection_required");

    assert!(state.chats.get_chat("anon-1").await.unwrap().is_none());
    assert!(state.chats.get_messages("anon-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn small_talk_is_not_offered_tools() {
    let driver = ScriptedDriver::answer("Paris.");
    let state = state("http://127.0.0.1:1", Arc::clone(&driver));

    let resp = router(state)
        .oneshot(request(
            "POST",
            "/api/chat",
            Some("alice"),
            Some(chat_body("chat-2", "What is the capital of France?")),
        ))
        .await
        .unwrap();
    let events = sse_events(&body_text(resp).await);

    assert!(events.iter().any(|e| e["type"] == "message.delta" && e["data"]["text"] == "Paris."));
    assert_eq!(*driver.tool_counts.lock().unwrap(), vec![0]);
}

#[tokio::test]
async fn posting_to_someone_elses_chat_is_forbidden() {
    let driver = ScriptedDriver::answer("hi");
    let state = state("http://127.0.0.1:1", Arc::clone(&driver));
    seed_chat(&state, "bobs-chat", "bob").await;

    let resp = router(state.clone())
        .oneshot(request("POST", "/api/chat", Some("alice"), Some(chat_body("bobs-chat", "hello"))))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(driver.calls.load(Ordering::SeqCst), 0);
    assert!(state.chats.get_messages("bobs-chat").await.unwrap().is_empty());
}

#[tokio::test]
async fn request_without_user_message_is_rejected() {
    let state = state("http://127.0.0.1:1", ScriptedDriver::answer("hi"));
    let body = json!({ "id": "c", "messages": [{ "role": "assistant", "content": "hello" }] });

    let resp = router(state)
        .oneshot(request("POST", "/api/chat", Some("alice"), Some(body)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_bodies_get_json_errors() {
    let state = state("http://127.0.0.1:1", ScriptedDriver::answer("hi"));
    let app = router(state);

    let req = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = app
        .clone()
        .oneshot(request("POST", "/api/chat", Some("alice"), Some(json!({ "id": "c" }))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = app
        .oneshot(request("DELETE", "/api/chat", Some("alice"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn delete_requires_session_and_ownership() {
    let state = state("http://127.0.0.1:1", ScriptedDriver::answer("hi"));
    seed_chat(&state, "chat-x", "bob").await;
    let app = router(state.clone());

    let resp = app
        .clone()
        .oneshot(request("DELETE", "/api/chat?id=chat-x", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .clone()
        .oneshot(request("DELETE", "/api/chat?id=missing", Some("alice"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .clone()
        .oneshot(request("DELETE", "/api/chat?id=chat-x", Some("alice"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(state.chats.get_chat("chat-x").await.unwrap().is_some());

    let resp = app
        .oneshot(request("DELETE", "/api/chat?id=chat-x", Some("bob"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let deleted: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(deleted["id"], "chat-x");
    assert!(state.chats.get_chat("chat-x").await.unwrap().is_none());
}

#[tokio::test]
async fn export_returns_messages_to_owner_only() {
    let state = state("http://127.0.0.1:1", ScriptedDriver::answer("Hello Alice"));
    let app = router(state);

    let resp = app
        .clone()
        .oneshot(request("POST", "/api/chat", Some("alice"), Some(chat_body("chat-e", "hi there"))))
        .await
        .unwrap();
    body_text(resp).await;

    let resp = app
        .clone()
        .oneshot(request("GET", "/api/chat?id=chat-e", Some("alice"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let export: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(export["chat"]["title"], "hi there");
    let messages = export["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["parts"][0]["text"], "Hello Alice");

    let resp = app
        .oneshot(request("GET", "/api/chat?id=chat-e", Some("bob"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn invalid_token_is_rejected() {
    let state = state("http://127.0.0.1:1", ScriptedDriver::answer("hi"));
    let req = Request::builder()
        .method("GET")
        .uri("/api/tools")
        .header("authorization", "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();

    let resp = router(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn jwt_required_rejects_anonymous_requests() {
    let state = AppState::with_driver(
        config("http://127.0.0.1:1", true),
        ScriptedDriver::answer("hi"),
    );

    let resp = router(state)
        .oneshot(request("POST", "/api/chat", None, Some(chat_body("c", "hello"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn connections_report_each_provider() {
    let server = broker_without_connections().await;
    let state = state(&server.uri(), ScriptedDriver::answer("hi"));
    let app = router(state);

    let resp = app
        .clone()
        .oneshot(request("GET", "/api/oauth/connections", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .clone()
        .oneshot(request("GET", "/api/oauth/connections", Some("alice"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    let connections = json["connections"].as_object().unwrap();
    assert_eq!(connections.len(), 8);
    assert_eq!(connections["google-calendar"]["connected"], false);
    assert_eq!(connections["google-calendar"]["status"], "not_connected");

    let resp = app
        .oneshot(request(
            "GET",
            "/api/oauth/connections?providers=slack,zoom",
            Some("alice"),
            None,
        ))
        .await
        .unwrap();
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    let keys: Vec<_> = json["connections"].as_object().unwrap().keys().cloned().collect();
    assert_eq!(keys, ["slack", "zoom"]);
}

#[tokio::test]
async fn connect_returns_consent_url() {
    let state = state("https://broker.example.com", ScriptedDriver::answer("hi"));
    let app = router(state);

    let resp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/oauth/connect",
            Some("alice"),
            Some(json!({ "provider": "zoom" })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    let url = json["url"].as_str().unwrap();
    assert!(url.starts_with("https://broker.example.com/v1/outbound/oauth/connect?"));
    assert!(url.contains("appId=zoom"));
    assert!(url.contains("userId=alice"));

    let resp = app
        .oneshot(request(
            "POST",
            "/api/oauth/connect",
            Some("alice"),
            Some(json!({ "provider": "myspace" })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn disconnect_calls_broker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/mgmt/outbound/app/user/tokens/delete"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let state = state(&server.uri(), ScriptedDriver::answer("hi"));

    let resp = router(state)
        .oneshot(request(
            "POST",
            "/api/oauth/disconnect",
            Some("alice"),
            Some(json!({ "provider": "slack" })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn tools_can_be_searched_by_capability() {
    let state = state("http://127.0.0.1:1", ScriptedDriver::answer("hi"));
    let app = router(state);

    let resp = app
        .clone()
        .oneshot(request("GET", "/api/tools", None, None))
        .await
        .unwrap();
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["tools"].as_array().unwrap().len(), 9);

    let resp = app
        .oneshot(request("GET", "/api/tools?capability=calendar", None, None))
        .await
        .unwrap();
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    let ids: Vec<_> = json["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap().to_string())
        .collect();
    assert!(ids.contains(&"google_calendar".to_string()));
    assert!(!ids.contains(&"slack".to_string()));
}
