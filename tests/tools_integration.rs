use std::sync::Arc;
use std::time::Duration;

use saas_assistant::analytics::TracingAnalytics;
use saas_assistant::config::{BrokerConfig, ProviderEndpoints};
use saas_assistant::oauth::{ScopeResolver, SpecCache, TokenBroker};
use saas_assistant::tools::{ToolContext, ToolHistory, ToolId, ToolRegistry, UiKind};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Broker that hands out a token for every provider.
async fn connected_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/mgmt/outbound/app/user/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": { "accessToken": "provider-token", "accessTokenType": "Bearer" }
        })))
        .mount(&server)
        .await;
    server
}

fn registry(server: &MockServer) -> ToolRegistry {
    let resolver = Arc::new(ScopeResolver::new(Arc::new(SpecCache::new(
        Duration::from_secs(60),
    ))));
    let broker = Arc::new(TokenBroker::new(
        BrokerConfig {
            base_url: server.uri(),
            project_id: "P1".into(),
            management_key: "K1".into(),
        },
        resolver,
        Arc::new(TracingAnalytics),
    ));
    let ctx = Arc::new(ToolContext::new(broker, ProviderEndpoints::all_at(&server.uri())));
    ToolRegistry::standard(ctx, Arc::new(ToolHistory::new(Duration::from_secs(60), 10)))
}

#[tokio::test]
async fn calendar_creates_event_with_parsed_times() {
    let server = connected_server().await;
    Mock::given(method("POST"))
        .and(path("/calendar/v3/calendars/primary/events"))
        .and(header("authorization", "Bearer provider-token"))
        .and(body_partial_json(json!({
            "summary": "Roadmap review",
            "start": { "dateTime": "2030-03-19T14:00:00+00:00" },
            "end": { "dateTime": "2030-03-19T15:00:00+00:00" },
            "attendees": [{ "email": "john@example.com" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "evt-1",
            "htmlLink": "https://calendar.google.com/event?eid=evt-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = registry(&server)
        .execute_with_logging(
            ToolId::GoogleCalendar,
            "alice",
            json!({
                "action": "create_event",
                "title": "Roadmap review",
                "date": "2030-03-19",
                "time": "14:00",
                "duration": "1 hour",
                "attendees": ["john@example.com", "not-an-email"]
            }),
        )
        .await;

    assert!(response.success, "{response:?}");
    let data = response.data.unwrap();
    assert_eq!(data["eventId"], "evt-1");
    assert_eq!(data["attendees"], json!(["john@example.com"]));
    assert!(
        data["message"]
            .as_str()
            .unwrap()
            .starts_with("Scheduled \"Roadmap review\" on Tuesday, March 19, 2030 at 2:00 PM")
    );
}

#[tokio::test]
async fn calendar_accepts_connect_scope_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/mgmt/outbound/app/user/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": {
                "accessToken": "provider-token",
                "scopes": ["https://www.googleapis.com/auth/calendar"]
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/calendar/v3/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "evt-2" })))
        .expect(1)
        .mount(&server)
        .await;

    let response = registry(&server)
        .execute_with_logging(
            ToolId::GoogleCalendar,
            "alice",
            json!({ "title": "Sync", "date": "2030-01-15", "time": "2pm" }),
        )
        .await;

    assert!(response.success, "{response:?}");
    assert!(response.ui.is_none());
}

#[tokio::test]
async fn provider_401_asks_for_reconnect() {
    let server = connected_server().await;
    Mock::given(method("POST"))
        .and(path("/zoom/v2/users/me/meetings"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let response = registry(&server)
        .execute_with_logging(
            ToolId::Zoom,
            "alice",
            json!({ "action": "create_meeting", "topic": "Standup", "date": "2030-01-02", "time": "9am" }),
        )
        .await;

    assert!(!response.success);
    let ui = response.ui.unwrap();
    assert_eq!(ui.kind, UiKind::ConnectionRequired);
    assert_eq!(ui.service, "zoom");
    assert_eq!(ui.connect_button.unwrap().action, "connection://zoom");
}

#[tokio::test]
async fn slack_error_is_not_a_connection_prompt() {
    let server = connected_server().await;
    Mock::given(method("POST"))
        .and(path("/slack/api/chat.postMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": false,
            "error": "channel_not_found"
        })))
        .mount(&server)
        .await;

    let response = registry(&server)
        .execute_with_logging(
            ToolId::Slack,
            "alice",
            json!({ "channel": "#nowhere", "text": "hello" }),
        )
        .await;

    assert!(!response.success);
    let ui = response.ui.as_ref().unwrap();
    assert_eq!(ui.kind, UiKind::Error);
    assert!(ui.connect_button.is_none());
    assert!(response.error.unwrap().contains("channel_not_found"));
}

#[tokio::test]
async fn slack_missing_scope_asks_to_reconnect() {
    let server = connected_server().await;
    Mock::given(method("POST"))
        .and(path("/slack/api/chat.postMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": false,
            "error": "missing_scope",
            "needed": "chat:write",
            "provided": "channels:read"
        })))
        .mount(&server)
        .await;

    let response = registry(&server)
        .execute_with_logging(
            ToolId::Slack,
            "alice",
            json!({ "channel": "#general", "text": "hello" }),
        )
        .await;

    let ui = response.ui.unwrap();
    assert_eq!(ui.kind, UiKind::InsufficientScopes);
    assert_eq!(ui.required_scopes, Some(vec!["chat:write".to_string()]));
}

#[tokio::test]
async fn crm_contact_is_created() {
    let server = connected_server().await;
    Mock::given(method("POST"))
        .and(path("/crm/api/contacts"))
        .and(body_partial_json(json!({
            "name": "Jane Doe",
            "email": "jane@acme.com",
            "company": "Acme"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "contact": { "id": "c-9", "name": "Jane Doe", "email": "jane@acme.com" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = registry(&server)
        .execute_with_logging(
            ToolId::CrmContacts,
            "alice",
            json!({ "action": "create", "name": "Jane Doe", "email": "jane@acme.com", "company": "Acme" }),
        )
        .await;

    assert!(response.success, "{response:?}");
    assert_eq!(
        response.message(),
        "Added Jane Doe <jane@acme.com> to your CRM."
    );
}

#[tokio::test]
async fn crm_contact_list_uses_query() {
    let server = connected_server().await;
    Mock::given(method("GET"))
        .and(path("/crm/api/contacts"))
        .and(query_param("search", "jane"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "contacts": [{ "id": "c-9", "name": "Jane Doe", "email": "jane@acme.com" }]
        })))
        .mount(&server)
        .await;

    let response = registry(&server)
        .execute_with_logging(
            ToolId::CrmContacts,
            "alice",
            json!({ "action": "search", "query": "jane" }),
        )
        .await;

    assert!(response.success, "{response:?}");
    assert!(response.message().contains("Jane Doe <jane@acme.com>"));
}

#[tokio::test]
async fn docs_document_gets_content() {
    let server = connected_server().await;
    Mock::given(method("POST"))
        .and(path("/docs/v1/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "documentId": "doc-1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/docs/v1/documents/doc-1:batchUpdate"))
        .and(body_partial_json(json!({
            "requests": [{ "insertText": { "text": "Agenda" } }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let response = registry(&server)
        .execute_with_logging(
            ToolId::GoogleDocs,
            "alice",
            json!({ "title": "Kickoff notes", "content": "Agenda" }),
        )
        .await;

    assert!(response.success, "{response:?}");
    assert_eq!(
        response.data.unwrap()["url"],
        Value::from("https://docs.google.com/document/d/doc-1/edit")
    );
}

#[tokio::test]
async fn docs_failed_insert_still_reports_created_document() {
    let server = connected_server().await;
    Mock::given(method("POST"))
        .and(path("/docs/v1/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "documentId": "doc-2" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/docs/v1/documents/doc-2:batchUpdate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend error"))
        .mount(&server)
        .await;

    let response = registry(&server)
        .execute_with_logging(
            ToolId::GoogleDocs,
            "alice",
            json!({ "title": "Kickoff notes", "content": "Agenda" }),
        )
        .await;

    assert!(response.success, "{response:?}");
    assert!(response.ui.is_none());
    let data = response.data.unwrap();
    assert_eq!(data["documentId"], "doc-2");
    assert_eq!(data["contentAdded"], false);
    assert!(
        data["message"]
            .as_str()
            .unwrap()
            .contains("content could not be added")
    );
}

#[tokio::test]
async fn invalid_input_never_reaches_the_provider() {
    let server = connected_server().await;
    Mock::given(method("POST"))
        .and(path("/slack/api/chat.postMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(0)
        .mount(&server)
        .await;

    let response = registry(&server)
        .execute_with_logging(ToolId::Slack, "alice", json!({ "text": "hello" }))
        .await;

    assert!(!response.success);
    assert_eq!(response.needs_input.unwrap().field, "channel");
}
