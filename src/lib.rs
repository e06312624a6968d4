//! SaaS assistant gateway.
//!
//! A chat endpoint that turns natural-language requests into calls against
//! the user's connected SaaS accounts. Provider tokens come from the
//! identity provider's outbound-app token exchange.
//!
//! # Modules
//!
//! - [`api`]: Axum handlers for `/api/chat`, `/api/oauth/*` and `/api/tools`
//! - [`auth`]: session JWT middleware and extractors
//! - [`chat`]: chat storage, tool gating and connection markers
//! - [`dates`]: relative date and time parsing for scheduling tools
//! - [`llm`]: streaming LLM driver and the tool-calling loop
//! - [`normalized`]: streaming event model
//! - [`oauth`]: scope resolution and the token broker client
//! - [`tools`]: tool trait, registry and provider integrations

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod analytics;
pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod dates;
pub mod error;
pub mod llm;
pub mod normalized;
pub mod oauth;
pub mod server;
pub mod telemetry;
pub mod tools;

pub use server::{AppState, router, start_server};
