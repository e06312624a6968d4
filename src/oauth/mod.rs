//! OAuth plumbing: scope resolution, token exchange and connection status.
//!
//! - [`scopes`]: which scopes a provider operation needs
//! - [`broker`]: token exchange against the identity provider
//! - [`token`]: token and token-error data model
//! - [`connections`]: per-provider status for the UI

pub mod broker;
pub mod connections;
pub mod scopes;
pub mod token;

pub use broker::{BrokerError, TokenBroker, TokenOptions};
pub use connections::{ConnectionState, ConnectionStatus, get_connections};
pub use scopes::{SUPPORTED_PROVIDERS, ScopeResolver, SpecCache};
pub use token::{Token, TokenError, TokenErrorKind, TokenLookup};
