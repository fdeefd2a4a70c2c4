//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `SessionManager`: bearer token lifecycle, proactive and reactive refresh
//! - `KeyValueStore`: persistence for the token pair (file, keychain, memory)
//! - `token`: access token expiry decoding
//!
//! The token pair survives restarts under the `tokens` store key.

pub mod session;
pub mod store;
pub mod token;

pub use session::{
    plan_refresh, CredentialPair, LoginCredentials, RefreshPlan, SessionManager, SessionState,
    REFRESH_MARGIN_MS, TOKEN_KEY,
};
pub use store::{FileStore, KeyValueStore, KeyringStore, MemoryStore};
