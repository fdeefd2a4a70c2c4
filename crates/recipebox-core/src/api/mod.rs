//! REST API access for the recipe service.
//!
//! This module provides the HTTP transport, the structured `ApiError`
//! returned by every call, user-facing message derivation, and
//! `RecipeClient` for the recipe, ingredient and backup endpoints.
//!
//! Authenticated calls go through `auth::SessionManager`, which attaches
//! the bearer token and handles refresh-and-retry on 401.

pub mod error;
pub mod message;
pub mod recipes;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ApiError, ErrorBody, ErrorKind};
pub use message::error_message;
pub use recipes::RecipeClient;
pub use transport::{
    ApiRequest, ApiResponse, FormPart, HttpTransport, Method, RequestBody, ReqwestTransport,
};
