//! Backend: the hosted data API and auth service the gateway talks to.
//!
//! Handlers and services depend on the `AuthProvider` / `DataApi` traits;
//! `RestBackend` is the HTTP implementation used in production.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AboutContent, Language, ManagedUser, Post, ReadingHistoryItem, Role, Session, Tag, UserRole,
};

pub mod rest;

#[cfg(test)]
pub mod fake;

pub use rest::RestBackend;

/// Postgres `insufficient_privilege`.
const PG_PERMISSION_DENIED: &str = "42501";
/// PostgREST "JSON object requested, multiple (or no) rows returned".
const PGRST_NO_ROWS: &str = "PGRST116";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No active session")]
    NoSession,

    #[error("Request aborted")]
    Aborted,
}

/// How a failure should be handled by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expired or invalid credentials: one refresh, one retry.
    Auth,
    /// Network trouble or an overloaded backend: retry with backoff.
    Transient,
    /// Never retried.
    Permission,
    NotFound,
    Fatal,
}

impl BackendError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        BackendError::Api {
            status,
            code: None,
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            BackendError::Http(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    ErrorClass::Transient
                } else {
                    match e.status() {
                        Some(status) => classify_status(status.as_u16(), None, &e.to_string()),
                        None => ErrorClass::Transient,
                    }
                }
            }
            BackendError::Api {
                status,
                code,
                message,
            } => classify_status(*status, code.as_deref(), message),
            BackendError::NotFound(_) => ErrorClass::NotFound,
            BackendError::NoSession => ErrorClass::Auth,
            BackendError::Parse(_) | BackendError::Aborted => ErrorClass::Fatal,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, BackendError::Aborted)
    }

    /// Message suitable for showing to a reader or an admin.
    pub fn user_message(&self) -> String {
        match self.class() {
            ErrorClass::Auth => "Your session has expired. Please sign in again.".to_string(),
            ErrorClass::Transient => {
                "Network error. Please check your connection and try again.".to_string()
            }
            ErrorClass::Permission => {
                "You do not have permission to perform this action.".to_string()
            }
            ErrorClass::NotFound => "The requested item was not found.".to_string(),
            ErrorClass::Fatal => self.to_string(),
        }
    }
}

fn classify_status(status: u16, code: Option<&str>, message: &str) -> ErrorClass {
    if status == 403 || code == Some(PG_PERMISSION_DENIED) {
        return ErrorClass::Permission;
    }
    if status == 404 || code == Some(PGRST_NO_ROWS) {
        return ErrorClass::NotFound;
    }
    if status == 401 || mentions_auth(message) {
        return ErrorClass::Auth;
    }
    if status == 408 || status == 429 || (500..600).contains(&status) {
        return ErrorClass::Transient;
    }
    ErrorClass::Fatal
}

fn mentions_auth(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["jwt", "token", "auth"].iter().any(|needle| lower.contains(needle))
}

/// Which posts a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostScope {
    Published,
    All,
}

/// The authentication service.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError>;

    async fn refresh(&self, refresh_token: &str) -> Result<Session, BackendError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError>;

    /// URL the user is sent to for an OAuth sign-in.
    fn oauth_authorize_url(&self, provider: &str, redirect_to: &str) -> String;
}

/// Table and function access. `token` is the caller's access token; `None`
/// means the anonymous role.
#[async_trait]
pub trait DataApi: Send + Sync {
    async fn list_posts(
        &self,
        token: Option<&str>,
        scope: PostScope,
    ) -> Result<Vec<Post>, BackendError>;

    async fn list_posts_with_tag(
        &self,
        token: Option<&str>,
        tag: &str,
    ) -> Result<Vec<Post>, BackendError>;

    /// Fails with `BackendError::NotFound` when no row matches.
    async fn get_post(&self, token: Option<&str>, id: Uuid) -> Result<Post, BackendError>;

    async fn upsert_post(&self, token: Option<&str>, post: &Post) -> Result<Post, BackendError>;

    async fn delete_post(&self, token: Option<&str>, id: Uuid) -> Result<(), BackendError>;

    async fn list_tags(&self, token: Option<&str>) -> Result<Vec<Tag>, BackendError>;

    async fn upsert_tag(&self, token: Option<&str>, tag: &Tag) -> Result<Tag, BackendError>;

    async fn delete_tag(&self, token: Option<&str>, name: &str) -> Result<(), BackendError>;

    async fn list_reading_history(
        &self,
        token: Option<&str>,
        user_id: Uuid,
    ) -> Result<Vec<ReadingHistoryItem>, BackendError>;

    async fn get_reading_entry(
        &self,
        token: Option<&str>,
        user_id: Uuid,
        post_id: Uuid,
    ) -> Result<Option<ReadingHistoryItem>, BackendError>;

    /// Insert or refresh `read_at`; unique on `(user_id, post_id)`.
    async fn upsert_reading_entry(
        &self,
        token: Option<&str>,
        item: &ReadingHistoryItem,
    ) -> Result<(), BackendError>;

    async fn delete_reading_entry(
        &self,
        token: Option<&str>,
        user_id: Uuid,
        post_id: Uuid,
    ) -> Result<(), BackendError>;

    async fn list_user_roles(
        &self,
        token: Option<&str>,
        user_id: Uuid,
    ) -> Result<Vec<UserRole>, BackendError>;

    async fn insert_user_role(
        &self,
        token: Option<&str>,
        role: &UserRole,
    ) -> Result<(), BackendError>;

    async fn delete_user_role(
        &self,
        token: Option<&str>,
        user_id: Uuid,
        role: Role,
    ) -> Result<(), BackendError>;

    /// Calls the `admin-list-users` function; the backend re-checks the admin role.
    async fn list_users(&self, token: Option<&str>) -> Result<Vec<ManagedUser>, BackendError>;

    async fn get_about(
        &self,
        token: Option<&str>,
        language: Language,
    ) -> Result<Option<AboutContent>, BackendError>;

    async fn upsert_about(
        &self,
        token: Option<&str>,
        about: &AboutContent,
    ) -> Result<AboutContent, BackendError>;
}
