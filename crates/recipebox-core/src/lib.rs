//! recipebox core - client library for the recipe REST API.
//!
//! The center of the crate is `auth::SessionManager`: it logs users in,
//! persists the token pair, refreshes the access token before it expires,
//! and retries a request once after a 401 with a fresh token.
//! `api::RecipeClient` builds the recipe, ingredient and backup calls on
//! top of it.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use recipebox_core::{api::RecipeClient, auth::LoginCredentials, config::Config};
//!
//! let config = Config::load()?;
//! let session = config.session_manager()?;
//! if !session.is_authenticated() {
//!     session.login(&LoginCredentials::new("cook", "secret")).await?;
//! }
//! let recipes = RecipeClient::new(session).list_recipes().await?;
//! # let _ = recipes;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod logging;
pub mod models;
