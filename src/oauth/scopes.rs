//! OAuth scope resolution per provider and operation.
//!
//! A static table answers the common cases. Operations missing from the
//! table are looked up in the provider's published OpenAPI document, which
//! is cached in a [`SpecCache`] owned by the caller.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;

/// Every provider the assistant can connect to.
pub const SUPPORTED_PROVIDERS: &[&str] = &[
    "google-calendar",
    "google-docs",
    "google-meet",
    "zoom",
    "custom-crm",
    "slack",
    "linkedin",
    "microsoft-teams",
];

#[derive(Debug)]
struct ProviderScopes {
    id: &'static str,
    connect: &'static [&'static str],
    operations: &'static [(&'static str, &'static [&'static str])],
    openapi_url: Option<&'static str>,
}

const GOOGLE_CALENDAR: &str = "https://www.googleapis.com/auth/calendar";
const GOOGLE_CALENDAR_READONLY: &str = "https://www.googleapis.com/auth/calendar.readonly";
const GOOGLE_CALENDAR_EVENTS: &str = "https://www.googleapis.com/auth/calendar.events";
const GOOGLE_DOCUMENTS: &str = "https://www.googleapis.com/auth/documents";
const GOOGLE_DRIVE_FILE: &str = "https://www.googleapis.com/auth/drive.file";

static PROVIDERS: &[ProviderScopes] = &[
    ProviderScopes {
        id: "google-calendar",
        connect: &[GOOGLE_CALENDAR],
        operations: &[
            ("events.list", &[GOOGLE_CALENDAR_READONLY]),
            ("events.create", &[GOOGLE_CALENDAR_EVENTS]),
        ],
        openapi_url: None,
    },
    ProviderScopes {
        id: "google-docs",
        connect: &[GOOGLE_DOCUMENTS, GOOGLE_DRIVE_FILE],
        operations: &[("documents.create", &[GOOGLE_DOCUMENTS, GOOGLE_DRIVE_FILE])],
        openapi_url: None,
    },
    ProviderScopes {
        id: "google-meet",
        connect: &[GOOGLE_CALENDAR_EVENTS],
        operations: &[("meetings.create", &[GOOGLE_CALENDAR_EVENTS])],
        openapi_url: None,
    },
    ProviderScopes {
        id: "zoom",
        connect: &["meeting:write", "meeting:read", "user:read"],
        operations: &[
            ("meetings.create", &["meeting:write"]),
            ("meetings.list", &["meeting:read"]),
        ],
        openapi_url: Some("https://developers.zoom.us/api-hub/meetings/methods/endpoints.json"),
    },
    ProviderScopes {
        id: "custom-crm",
        connect: &["contacts:read", "contacts:write", "deals:read", "deals:write"],
        operations: &[
            ("contacts.list", &["contacts:read"]),
            ("contacts.create", &["contacts:write"]),
            ("deals.list", &["deals:read"]),
            ("deals.create", &["deals:write"]),
        ],
        openapi_url: None,
    },
    ProviderScopes {
        id: "slack",
        connect: &["chat:write", "channels:read", "users:read"],
        operations: &[
            ("messages.send", &["chat:write"]),
            ("channels.list", &["channels:read"]),
        ],
        openapi_url: Some(
            "https://raw.githubusercontent.com/slackapi/slack-api-specs/master/web-api/slack_web_openapi_v2.json",
        ),
    },
    ProviderScopes {
        id: "linkedin",
        connect: &["openid", "profile", "w_member_social"],
        operations: &[("posts.create", &["openid", "profile", "w_member_social"])],
        openapi_url: None,
    },
    ProviderScopes {
        id: "microsoft-teams",
        connect: &["User.Read", "OnlineMeetings.ReadWrite", "ChannelMessage.Send"],
        operations: &[
            ("meetings.create", &["OnlineMeetings.ReadWrite"]),
            ("messages.send", &["ChannelMessage.Send"]),
        ],
        openapi_url: None,
    },
];

const GOOGLE_CALENDAR_EVENTS_READONLY: &str =
    "https://www.googleapis.com/auth/calendar.events.readonly";
const GOOGLE_DOCUMENTS_READONLY: &str = "https://www.googleapis.com/auth/documents.readonly";

/// Broad grants and the narrower scopes they include.
static IMPLIED_SCOPES: &[(&str, &[&str])] = &[
    (
        GOOGLE_CALENDAR,
        &[
            GOOGLE_CALENDAR_READONLY,
            GOOGLE_CALENDAR_EVENTS,
            GOOGLE_CALENDAR_EVENTS_READONLY,
        ],
    ),
    (GOOGLE_CALENDAR_READONLY, &[GOOGLE_CALENDAR_EVENTS_READONLY]),
    (GOOGLE_CALENDAR_EVENTS, &[GOOGLE_CALENDAR_EVENTS_READONLY]),
    (GOOGLE_DOCUMENTS, &[GOOGLE_DOCUMENTS_READONLY]),
    ("OnlineMeetings.ReadWrite", &["OnlineMeetings.Read"]),
];

/// Whether holding `granted` satisfies a requirement for `required`.
#[must_use]
pub fn grant_covers(granted: &str, required: &str) -> bool {
    granted == required
        || IMPLIED_SCOPES
            .iter()
            .any(|(broad, narrower)| *broad == granted && narrower.contains(&required))
}

fn provider_entry(provider: &str) -> Option<&'static ProviderScopes> {
    PROVIDERS.iter().find(|p| p.id == provider)
}

fn to_owned(scopes: &[&str]) -> Vec<String> {
    scopes.iter().map(|s| (*s).to_string()).collect()
}

/// Scopes from the static table. `None` when the operation is not listed.
#[must_use]
pub fn static_scopes(provider: &str, operation: &str) -> Option<Vec<String>> {
    let entry = provider_entry(provider)?;
    if operation == "connect" {
        return Some(to_owned(entry.connect));
    }
    entry
        .operations
        .iter()
        .find(|(op, _)| *op == operation)
        .map(|(_, scopes)| to_owned(scopes))
}

struct CachedSpec {
    fetched_at: Instant,
    doc: Arc<Value>,
}

/// In-memory cache of fetched OpenAPI documents with a fixed time-to-live.
pub struct SpecCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedSpec>>,
}

impl std::fmt::Debug for SpecCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish()
    }
}

impl SpecCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return a cached document if it has not expired.
    pub fn get(&self, url: &str) -> Option<Arc<Value>> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .get(url)
            .filter(|c| c.fetched_at.elapsed() < self.ttl)
            .map(|c| Arc::clone(&c.doc))
    }

    pub fn insert(&self, url: impl Into<String>, doc: Value) -> Arc<Value> {
        let doc = Arc::new(doc);
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        guard.retain(|_, c| c.fetched_at.elapsed() < self.ttl);
        guard.insert(
            url.into(),
            CachedSpec {
                fetched_at: Instant::now(),
                doc: Arc::clone(&doc),
            },
        );
        doc
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves which OAuth scopes a provider operation needs.
#[derive(Debug, Clone)]
pub struct ScopeResolver {
    http: reqwest::Client,
    cache: Arc<SpecCache>,
    spec_urls: HashMap<String, String>,
}

impl ScopeResolver {
    pub fn new(cache: Arc<SpecCache>) -> Self {
        let spec_urls = PROVIDERS
            .iter()
            .filter_map(|p| p.openapi_url.map(|u| (p.id.to_string(), u.to_string())))
            .collect();
        Self {
            http: reqwest::Client::new(),
            cache,
            spec_urls,
        }
    }

    /// Override (or add) the OpenAPI document location for a provider.
    #[must_use]
    pub fn with_spec_url(mut self, provider: &str, url: impl Into<String>) -> Self {
        self.spec_urls.insert(provider.to_string(), url.into());
        self
    }

    pub fn cache(&self) -> &SpecCache {
        &self.cache
    }

    /// Scopes required for `operation` on `provider`.
    ///
    /// Never fails. An empty list means "let the identity provider apply
    /// its defaults".
    pub async fn get_required_scopes(&self, provider: &str, operation: &str) -> Vec<String> {
        if let Some(scopes) = static_scopes(provider, operation) {
            return scopes;
        }

        if let Some(url) = self.spec_urls.get(provider) {
            let scopes = match self.load_spec(url).await {
                Some(doc) => scopes_from_openapi(&doc, operation),
                None => Vec::new(),
            };
            if !scopes.is_empty() {
                tracing::debug!(provider, operation, ?scopes, "Scopes resolved from OpenAPI document");
                return scopes;
            }
        }

        match provider_entry(provider) {
            Some(entry) => to_owned(entry.connect),
            None => {
                tracing::debug!(provider, operation, "No scope mapping for provider");
                Vec::new()
            }
        }
    }

    async fn load_spec(&self, url: &str) -> Option<Arc<Value>> {
        if let Some(doc) = self.cache.get(url) {
            return Some(doc);
        }

        let res = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        let doc = match res {
            Ok(resp) => resp.json::<Value>().await,
            Err(e) => Err(e),
        };

        match doc {
            Ok(doc) => Some(self.cache.insert(url, doc)),
            Err(e) => {
                tracing::warn!(url, error = %e, "Failed to fetch OpenAPI document");
                None
            }
        }
    }
}

const HTTP_METHODS: &[&str] = &["get", "post", "put", "patch", "delete"];

/// Extract the OAuth2 scopes an OpenAPI document declares for an operation.
///
/// `operation` matches either an `operationId` (case-insensitive) or a
/// route written as `"METHOD /path"`. Operation-level `security` wins over
/// the document-level default. Handles both OpenAPI 3 `securitySchemes`
/// and Swagger 2 `securityDefinitions`.
#[must_use]
pub fn scopes_from_openapi(doc: &Value, operation: &str) -> Vec<String> {
    let schemes = doc
        .pointer("/components/securitySchemes")
        .or_else(|| doc.get("securityDefinitions"))
        .and_then(Value::as_object);
    let oauth_schemes: Vec<&str> = schemes
        .map(|m| {
            m.iter()
                .filter(|(_, s)| s.get("type").and_then(Value::as_str) == Some("oauth2"))
                .map(|(name, _)| name.as_str())
                .collect()
        })
        .unwrap_or_default();
    if oauth_schemes.is_empty() {
        return Vec::new();
    }

    let route = operation
        .split_once(' ')
        .map(|(m, p)| (m.trim().to_ascii_lowercase(), p.trim()));

    let Some(paths) = doc.get("paths").and_then(Value::as_object) else {
        return Vec::new();
    };

    let found = paths.iter().find_map(|(path, item)| {
        HTTP_METHODS.iter().find_map(|method| {
            let op = item.get(*method)?;
            let by_id = op
                .get("operationId")
                .and_then(Value::as_str)
                .is_some_and(|id| id.eq_ignore_ascii_case(operation));
            let by_route = route
                .as_ref()
                .is_some_and(|(m, p)| m == method && p == path);
            (by_id || by_route).then_some(op)
        })
    });
    let Some(op) = found else {
        return Vec::new();
    };

    let security = op
        .get("security")
        .or_else(|| doc.get("security"))
        .and_then(Value::as_array);

    let mut scopes: Vec<String> = Vec::new();
    for requirement in security.into_iter().flatten() {
        let Some(req) = requirement.as_object() else {
            continue;
        };
        for (name, list) in req {
            if !oauth_schemes.contains(&name.as_str()) {
                continue;
            }
            for scope in list.as_array().into_iter().flatten().filter_map(Value::as_str) {
                if !scopes.iter().any(|s| s == scope) {
                    scopes.push(scope.to_string());
                }
            }
        }
    }
    scopes
}
