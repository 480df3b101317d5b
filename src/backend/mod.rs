//! Backend API consumed by the session authority: role verification and
//! profile upsert. Property and review endpoints are used directly by pages
//! and are not modelled here.

mod http;
mod memory;

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::identity::ProfileRecord;

pub use http::HttpBackend;
pub use memory::MemoryBackend;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Transport(String),
    #[error("backend rejected credential (HTTP {0})")]
    Unauthorized(u16),
    #[error("backend returned HTTP {0}")]
    Status(u16),
    #[error("malformed backend response: {0}")]
    Decode(String),
}

pub trait BackendApi: Send + Sync {
    /// `POST /verify-admin` with the bearer credential; `true` when the principal is an administrator.
    fn verify_admin<'a>(&'a self, bearer: &'a str) -> BoxFuture<'a, Result<bool, BackendError>>;

    /// `POST /users/profile` with the bearer credential and profile fields.
    fn upsert_profile<'a>(&'a self, bearer: &'a str, profile: &'a ProfileRecord) -> BoxFuture<'a, Result<(), BackendError>>;
}
