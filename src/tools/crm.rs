//! Custom CRM contacts and deals.
//!
//! The CRM speaks plain JSON over `{CRM_API_URL}/api/contacts` and
//! `{CRM_API_URL}/api/deals`, authorized with the user's `custom-crm` token.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{
    Tool, ToolConfig, ToolContext, ToolError, ToolId, ToolResponse, action, limit_field,
    missing_field, str_field, unknown_action,
};

const PROVIDER: &str = "custom-crm";
const CONTACT_ACTIONS: &[&str] = &["list", "search", "create"];
const DEAL_ACTIONS: &[&str] = &["list", "create"];
const DEAL_STAGES: &[&str] = &[
    "lead",
    "qualified",
    "proposal",
    "negotiation",
    "closed_won",
    "closed_lost",
];

fn crm_url(ctx: &ToolContext, path: &str) -> Result<String, ToolError> {
    let base = ctx
        .endpoints
        .crm
        .as_deref()
        .ok_or_else(|| ToolError::provider(PROVIDER, "CRM_API_URL is not configured"))?;
    Ok(format!("{}/api/{path}", base.trim_end_matches('/')))
}

/// Lists come back bare or wrapped as `{"<key>": [...]}` / `{"data": [...]}`.
fn records(body: &Value, key: &str) -> Vec<Value> {
    body.as_array()
        .or_else(|| body.get(key).and_then(Value::as_array))
        .or_else(|| body.get("data").and_then(Value::as_array))
        .cloned()
        .unwrap_or_default()
}

/// Single records may be wrapped as `{"<key>": {...}}`.
fn record(body: Value, key: &str) -> Value {
    match body.get(key) {
        Some(inner) if inner.is_object() => inner.clone(),
        _ => body,
    }
}

fn text<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or_default()
}

#[derive(Debug)]
pub struct CrmContactsTool {
    ctx: Arc<ToolContext>,
    config: ToolConfig,
}

impl CrmContactsTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        let config = ToolConfig::new(
            ToolId::CrmContacts,
            "CRM Contacts",
            "List, search and create contacts in the CRM.",
        )
        .optional(&["action", "query", "name", "email", "company", "phone", "limit"])
        .capabilities(&["list contacts", "search contacts", "create contacts", "crm"])
        .parameters(json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": CONTACT_ACTIONS, "default": "list" },
                "query": { "type": "string", "description": "Search text for action=search" },
                "name": { "type": "string" },
                "email": { "type": "string" },
                "company": { "type": "string" },
                "phone": { "type": "string" },
                "limit": { "type": "integer" }
            }
        }));
        Self { ctx, config }
    }

    async fn list(&self, user_id: &str, input: &Value) -> Result<ToolResponse, ToolError> {
        let query = str_field(input, "query");
        let operation = "contacts.list";
        let token = self.ctx.token(user_id, PROVIDER, operation).await?;

        let mut request = self
            .ctx
            .http
            .get(crm_url(&self.ctx, "contacts")?)
            .bearer_auth(&token.access_token)
            .query(&[("limit", limit_field(input, 20))]);
        if let Some(q) = query {
            request = request.query(&[("search", q)]);
        }
        let body = self.ctx.send_json(request, PROVIDER, operation).await?;
        let contacts = records(&body, "contacts");

        let mut message = match (query, contacts.len()) {
            (Some(q), 0) => format!("No contacts match \"{q}\"."),
            (Some(q), n) => format!("Found {n} contacts matching \"{q}\":"),
            (None, 0) => "Your CRM has no contacts yet.".to_string(),
            (None, n) => format!("Here are {n} contacts:"),
        };
        for contact in &contacts {
            let _ = write!(message, "\n- {} <{}>", text(contact, "name"), text(contact, "email"));
            if let Some(company) = contact.get("company").and_then(Value::as_str) {
                let _ = write!(message, " ({company})");
            }
        }

        Ok(ToolResponse::ok(json!({ "message": message, "contacts": contacts })))
    }

    async fn create(&self, user_id: &str, input: &Value) -> Result<ToolResponse, ToolError> {
        let operation = "contacts.create";
        let mut body = json!({
            "name": str_field(input, "name"),
            "email": str_field(input, "email"),
        });
        for key in ["company", "phone"] {
            if let Some(v) = str_field(input, key) {
                body[key] = json!(v);
            }
        }

        let token = self.ctx.token(user_id, PROVIDER, operation).await?;
        let created = self
            .ctx
            .send_json(
                self.ctx
                    .http
                    .post(crm_url(&self.ctx, "contacts")?)
                    .bearer_auth(&token.access_token)
                    .json(&body),
                PROVIDER,
                operation,
            )
            .await?;
        let contact = record(created, "contact");

        Ok(ToolResponse::ok(json!({
            "message": format!(
                "Added {} <{}> to your CRM.",
                str_field(input, "name").unwrap_or_default(),
                str_field(input, "email").unwrap_or_default()
            ),
            "contact": contact,
        })))
    }
}

#[async_trait]
impl Tool for CrmContactsTool {
    fn config(&self) -> &ToolConfig {
        &self.config
    }

    fn validate(&self, input: &Value) -> Option<ToolResponse> {
        match action(input, "list") {
            "list" => None,
            "search" => missing_field(input, &[("query", "Who are you looking for?")]),
            "create" => missing_field(
                input,
                &[
                    ("name", "What is the contact's name?"),
                    ("email", "What is the contact's email address?"),
                ],
            )
            .or_else(|| {
                str_field(input, "email")
                    .filter(|e| !e.contains('@'))
                    .map(|e| {
                        ToolResponse::needs_input(
                            "email",
                            format!("\"{e}\" doesn't look like an email address."),
                        )
                    })
            }),
            other => Some(unknown_action(other, CONTACT_ACTIONS)),
        }
    }

    async fn execute(&self, user_id: &str, input: Value) -> Result<ToolResponse, ToolError> {
        match action(&input, "list") {
            "create" => self.create(user_id, &input).await,
            _ => self.list(user_id, &input).await,
        }
    }
}

#[derive(Debug)]
pub struct CrmDealsTool {
    ctx: Arc<ToolContext>,
    config: ToolConfig,
}

impl CrmDealsTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        let config = ToolConfig::new(
            ToolId::CrmDeals,
            "CRM Deals",
            "List deals in the sales pipeline and create new deals.",
        )
        .optional(&["action", "title", "value", "stage", "contactId", "limit"])
        .capabilities(&["list deals", "create deals", "sales pipeline", "crm"])
        .parameters(json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": DEAL_ACTIONS, "default": "list" },
                "title": { "type": "string" },
                "value": { "type": "number", "description": "Deal value" },
                "stage": { "type": "string", "enum": DEAL_STAGES },
                "contactId": { "type": "string" },
                "limit": { "type": "integer" }
            }
        }));
        Self { ctx, config }
    }

    async fn list(&self, user_id: &str, input: &Value) -> Result<ToolResponse, ToolError> {
        let operation = "deals.list";
        let token = self.ctx.token(user_id, PROVIDER, operation).await?;
        let mut request = self
            .ctx
            .http
            .get(crm_url(&self.ctx, "deals")?)
            .bearer_auth(&token.access_token)
            .query(&[("limit", limit_field(input, 20))]);
        if let Some(stage) = str_field(input, "stage") {
            request = request.query(&[("stage", stage)]);
        }
        let body = self.ctx.send_json(request, PROVIDER, operation).await?;
        let deals = records(&body, "deals");

        let total: f64 = deals
            .iter()
            .filter_map(|d| d.get("value").and_then(Value::as_f64))
            .sum();
        let mut message = if deals.is_empty() {
            "No deals found.".to_string()
        } else {
            format!("{} deals worth ${total:.2} in total:", deals.len())
        };
        for deal in &deals {
            let _ = write!(
                message,
                "\n- {} [{}] ${:.2}",
                text(deal, "title"),
                text(deal, "stage"),
                deal.get("value").and_then(Value::as_f64).unwrap_or_default()
            );
        }

        Ok(ToolResponse::ok(json!({ "message": message, "deals": deals, "total": total })))
    }

    async fn create(&self, user_id: &str, input: &Value) -> Result<ToolResponse, ToolError> {
        let operation = "deals.create";
        let title = str_field(input, "title").unwrap_or_default();
        let stage = str_field(input, "stage").unwrap_or("lead");
        let value = deal_value(input).unwrap_or(0.0);
        let mut body = json!({ "title": title, "value": value, "stage": stage });
        if let Some(contact) = str_field(input, "contactId") {
            body["contactId"] = json!(contact);
        }

        let token = self.ctx.token(user_id, PROVIDER, operation).await?;
        let created = self
            .ctx
            .send_json(
                self.ctx
                    .http
                    .post(crm_url(&self.ctx, "deals")?)
                    .bearer_auth(&token.access_token)
                    .json(&body),
                PROVIDER,
                operation,
            )
            .await?;

        Ok(ToolResponse::ok(json!({
            "message": format!("Created deal \"{title}\" (${value:.2}, {stage})."),
            "deal": record(created, "deal"),
        })))
    }
}

/// Deal value from a number or a string like "$12,500".
fn deal_value(input: &Value) -> Option<f64> {
    match input.get("value")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse()
            .ok(),
        _ => None,
    }
}

#[async_trait]
impl Tool for CrmDealsTool {
    fn config(&self) -> &ToolConfig {
        &self.config
    }

    fn validate(&self, input: &Value) -> Option<ToolResponse> {
        match action(input, "list") {
            "list" => None,
            "create" => {
                if let Some(missing) =
                    missing_field(input, &[("title", "What should the deal be called?")])
                {
                    return Some(missing);
                }
                if input.get("value").is_some() && deal_value(input).is_none() {
                    return Some(ToolResponse::needs_input(
                        "value",
                        "The deal value must be a number.",
                    ));
                }
                str_field(input, "stage")
                    .filter(|s| !DEAL_STAGES.contains(s))
                    .map(|s| {
                        ToolResponse::needs_input("stage", format!("Unknown stage \"{s}\"."))
                            .with_options(DEAL_STAGES)
                    })
            }
            other => Some(unknown_action(other, DEAL_ACTIONS)),
        }
    }

    async fn execute(&self, user_id: &str, input: Value) -> Result<ToolResponse, ToolError> {
        match action(&input, "list") {
            "create" => self.create(user_id, &input).await,
            _ => self.list(user_id, &input).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_unwrapping() {
        assert_eq!(records(&json!([{"id": 1}]), "contacts").len(), 1);
        assert_eq!(records(&json!({"contacts": [{"id": 1}, {"id": 2}]}), "contacts").len(), 2);
        assert_eq!(records(&json!({"data": [{"id": 1}]}), "deals").len(), 1);
        assert!(records(&json!({"other": 1}), "deals").is_empty());

        assert_eq!(record(json!({"deal": {"id": 7}}), "deal")["id"], 7);
        assert_eq!(record(json!({"id": 7}), "deal")["id"], 7);
    }

    #[test]
    fn deal_values_accept_currency_strings() {
        assert_eq!(deal_value(&json!({"value": 10})), Some(10.0));
        assert_eq!(deal_value(&json!({"value": "$12,500"})), Some(12500.0));
        assert_eq!(deal_value(&json!({"value": "lots"})), None);
    }
}
