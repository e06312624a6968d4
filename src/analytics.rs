//! Product analytics tracking.
//!
//! Tracking is observability only: a failing sink never affects the caller.
//! Remote sinks send in a background task.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::AnalyticsConfig;

/// A single tracking event.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrackEvent {
    pub name: String,
    pub user_id: String,
    pub properties: Value,
    pub timestamp: DateTime<Utc>,
}

impl TrackEvent {
    pub fn new(name: impl Into<String>, user_id: impl Into<String>, properties: Value) -> Self {
        Self {
            name: name.into(),
            user_id: user_id.into(),
            properties,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Analytics: Send + Sync + std::fmt::Debug {
    async fn track(&self, event: TrackEvent);
}

/// Writes events to the log only.
#[derive(Debug, Default)]
pub struct TracingAnalytics;

#[async_trait]
impl Analytics for TracingAnalytics {
    async fn track(&self, event: TrackEvent) {
        tracing::info!(
            name: "analytics.track",
            event = %event.name,
            user_id = %event.user_id,
            properties = %event.properties,
            "Analytics event"
        );
    }
}

/// PostHog `/capture/` endpoint.
#[derive(Debug, Clone)]
pub struct PostHogAnalytics {
    http: reqwest::Client,
    api_key: String,
    host: String,
}

impl PostHogAnalytics {
    pub fn new(api_key: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            host: host.into(),
        }
    }
}

#[async_trait]
impl Analytics for PostHogAnalytics {
    async fn track(&self, event: TrackEvent) {
        TracingAnalytics.track(event.clone()).await;

        let url = format!("{}/capture/", self.host.trim_end_matches('/'));
        let body = json!({
            "api_key": self.api_key,
            "event": event.name,
            "distinct_id": event.user_id,
            "properties": event.properties,
            "timestamp": event.timestamp.to_rfc3339(),
        });
        let http = self.http.clone();
        tokio::spawn(async move {
            if let Err(e) = http.post(&url).json(&body).send().await {
                tracing::warn!(error = %e, "PostHog capture failed");
            }
        });
    }
}

/// Segment HTTP tracking API.
#[derive(Debug, Clone)]
pub struct SegmentAnalytics {
    http: reqwest::Client,
    write_key: String,
}

impl SegmentAnalytics {
    pub fn new(write_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            write_key: write_key.into(),
        }
    }
}

#[async_trait]
impl Analytics for SegmentAnalytics {
    async fn track(&self, event: TrackEvent) {
        TracingAnalytics.track(event.clone()).await;

        let body = json!({
            "userId": event.user_id,
            "event": event.name,
            "properties": event.properties,
            "timestamp": event.timestamp.to_rfc3339(),
        });
        let http = self.http.clone();
        let write_key = self.write_key.clone();
        tokio::spawn(async move {
            let res = http
                .post("https://api.segment.io/v1/track")
                .basic_auth(write_key, Some(""))
                .json(&body)
                .send()
                .await;
            if let Err(e) = res {
                tracing::warn!(error = %e, "Segment track failed");
            }
        });
    }
}

/// Keeps events in memory; handy for inspecting what was tracked.
#[derive(Debug, Default)]
pub struct MemoryAnalytics {
    events: Mutex<Vec<TrackEvent>>,
}

impl MemoryAnalytics {
    pub fn events(&self) -> Vec<TrackEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Analytics for MemoryAnalytics {
    async fn track(&self, event: TrackEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Pick a sink from configuration: PostHog, then Segment, then logs.
pub fn from_config(cfg: &AnalyticsConfig) -> Arc<dyn Analytics> {
    let non_empty = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();

    if let Some(key) = non_empty(&cfg.posthog_key) {
        return Arc::new(PostHogAnalytics::new(key, cfg.posthog_host.clone()));
    }
    if let Some(key) = non_empty(&cfg.segment_write_key) {
        return Arc::new(SegmentAnalytics::new(key));
    }
    Arc::new(TracingAnalytics)
}
