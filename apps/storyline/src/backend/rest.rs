//! HTTP implementation of the backend traits.
//!
//! Speaks the hosted backend's conventions: tables under `/rest/v1/<table>`
//! with PostgREST filters, the auth service under `/auth/v1`, and edge
//! functions under `/functions/v1`. Retries live in `resilient`, not here.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{AuthProvider, BackendError, DataApi, PostScope};
use crate::models::{
    AboutContent, Language, ManagedUser, Post, ReadingHistoryItem, Role, Session, SessionUser, Tag,
    UserRole,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;
const UPSERT_PREFER: &str = "resolution=merge-duplicates,return=representation";
const ADMIN_LIST_USERS_FN: &str = "admin-list-users";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: SessionUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self.expires_at.unwrap_or_else(|| {
            chrono::Utc::now().timestamp() + self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
        });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Error bodies differ between the table layer (`code`/`message`) and the
/// auth service (`error`/`error_description`/`msg`).
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListUsersResponse {
    users: Vec<ManagedUser>,
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl RestBackend {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn function_url(&self, name: &str) -> String {
        format!("{}/functions/v1/{}", self.base_url, name)
    }

    fn request(&self, method: Method, url: &str, token: Option<&str>) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token.unwrap_or(&self.anon_key))
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, BackendError> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        debug!("Backend responded {} ({} bytes)", status, body.len());
        Ok(serde_json::from_slice(&body)?)
    }

    async fn send_empty(&self, req: RequestBuilder) -> Result<(), BackendError> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.bytes().await?;
        Err(api_error(status.as_u16(), &body))
    }

    async fn token_grant<B: Serialize>(&self, grant_type: &str, body: &B) -> Result<Session, BackendError> {
        let req = self
            .request(Method::POST, &self.auth_url("token"), None)
            .query(&[("grant_type", grant_type)])
            .json(body);
        let response: TokenResponse = self.send_json(req).await?;
        Ok(response.into_session())
    }
}

fn api_error(status: u16, body: &[u8]) -> BackendError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let code = match parsed.code {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => parsed.error_code,
    };
    let message = parsed
        .message
        .or(parsed.msg)
        .or(parsed.error_description)
        .or(parsed.error)
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    BackendError::Api {
        status,
        code,
        message,
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl AuthProvider for RestBackend {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        self.token_grant("password", &PasswordGrant { email, password })
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, BackendError> {
        self.token_grant("refresh_token", &RefreshGrant { refresh_token })
            .await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        let req = self.request(Method::POST, &self.auth_url("logout"), Some(access_token));
        self.send_empty(req).await
    }

    fn oauth_authorize_url(&self, provider: &str, redirect_to: &str) -> String {
        let base = self.auth_url("authorize");
        Url::parse_with_params(&base, &[("provider", provider), ("redirect_to", redirect_to)])
            .map(String::from)
            .unwrap_or_else(|_| format!("{base}?provider={provider}"))
    }
}

#[async_trait]
impl DataApi for RestBackend {
    async fn list_posts(
        &self,
        token: Option<&str>,
        scope: PostScope,
    ) -> Result<Vec<Post>, BackendError> {
        let mut req = self
            .request(Method::GET, &self.table_url("entries"), token)
            .query(&[("select", "*"), ("order", "date.desc")]);
        if scope == PostScope::Published {
            req = req.query(&[("status", "eq.published")]);
        }
        self.send_json(req).await
    }

    async fn list_posts_with_tag(
        &self,
        token: Option<&str>,
        tag: &str,
    ) -> Result<Vec<Post>, BackendError> {
        let contains = format!("cs.{{\"{}\"}}", tag.replace('"', "\\\""));
        let req = self
            .request(Method::GET, &self.table_url("entries"), token)
            .query(&[("select", "*"), ("tags", contains.as_str())]);
        self.send_json(req).await
    }

    async fn get_post(&self, token: Option<&str>, id: Uuid) -> Result<Post, BackendError> {
        let req = self
            .request(Method::GET, &self.table_url("entries"), token)
            .query(&[("select", "*".to_string()), ("id", eq(id))]);
        let rows: Vec<Post> = self.send_json(req).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("Post {id} not found")))
    }

    async fn upsert_post(&self, token: Option<&str>, post: &Post) -> Result<Post, BackendError> {
        let req = self
            .request(Method::POST, &self.table_url("entries"), token)
            .header("Prefer", UPSERT_PREFER)
            .json(&post.without_timestamps());
        let rows: Vec<Post> = self.send_json(req).await?;
        Ok(rows.into_iter().next().unwrap_or_else(|| post.clone()))
    }

    async fn delete_post(&self, token: Option<&str>, id: Uuid) -> Result<(), BackendError> {
        let req = self
            .request(Method::DELETE, &self.table_url("entries"), token)
            .query(&[("id", eq(id))]);
        self.send_empty(req).await
    }

    async fn list_tags(&self, token: Option<&str>) -> Result<Vec<Tag>, BackendError> {
        let req = self
            .request(Method::GET, &self.table_url("tags"), token)
            .query(&[("select", "*"), ("order", "name.asc")]);
        self.send_json(req).await
    }

    async fn upsert_tag(&self, token: Option<&str>, tag: &Tag) -> Result<Tag, BackendError> {
        let req = self
            .request(Method::POST, &self.table_url("tags"), token)
            .query(&[("on_conflict", "name")])
            .header("Prefer", UPSERT_PREFER)
            .json(tag);
        let rows: Vec<Tag> = self.send_json(req).await?;
        Ok(rows.into_iter().next().unwrap_or_else(|| tag.clone()))
    }

    async fn delete_tag(&self, token: Option<&str>, name: &str) -> Result<(), BackendError> {
        let req = self
            .request(Method::DELETE, &self.table_url("tags"), token)
            .query(&[("name", eq(name))]);
        self.send_empty(req).await
    }

    async fn list_reading_history(
        &self,
        token: Option<&str>,
        user_id: Uuid,
    ) -> Result<Vec<ReadingHistoryItem>, BackendError> {
        let req = self
            .request(Method::GET, &self.table_url("reading_history"), token)
            .query(&[
                ("select", "*".to_string()),
                ("user_id", eq(user_id)),
                ("order", "read_at.desc".to_string()),
            ]);
        self.send_json(req).await
    }

    async fn get_reading_entry(
        &self,
        token: Option<&str>,
        user_id: Uuid,
        post_id: Uuid,
    ) -> Result<Option<ReadingHistoryItem>, BackendError> {
        let req = self
            .request(Method::GET, &self.table_url("reading_history"), token)
            .query(&[
                ("select", "*".to_string()),
                ("user_id", eq(user_id)),
                ("post_id", eq(post_id)),
            ]);
        let rows: Vec<ReadingHistoryItem> = self.send_json(req).await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_reading_entry(
        &self,
        token: Option<&str>,
        item: &ReadingHistoryItem,
    ) -> Result<(), BackendError> {
        let req = self
            .request(Method::POST, &self.table_url("reading_history"), token)
            .query(&[("on_conflict", "user_id,post_id")])
            .header("Prefer", "resolution=merge-duplicates")
            .json(item);
        self.send_empty(req).await
    }

    async fn delete_reading_entry(
        &self,
        token: Option<&str>,
        user_id: Uuid,
        post_id: Uuid,
    ) -> Result<(), BackendError> {
        let req = self
            .request(Method::DELETE, &self.table_url("reading_history"), token)
            .query(&[("user_id", eq(user_id)), ("post_id", eq(post_id))]);
        self.send_empty(req).await
    }

    async fn list_user_roles(
        &self,
        token: Option<&str>,
        user_id: Uuid,
    ) -> Result<Vec<UserRole>, BackendError> {
        let req = self
            .request(Method::GET, &self.table_url("user_roles"), token)
            .query(&[("select", "*".to_string()), ("user_id", eq(user_id))]);
        self.send_json(req).await
    }

    async fn insert_user_role(
        &self,
        token: Option<&str>,
        role: &UserRole,
    ) -> Result<(), BackendError> {
        let req = self
            .request(Method::POST, &self.table_url("user_roles"), token)
            .query(&[("on_conflict", "user_id,role")])
            .header("Prefer", "resolution=ignore-duplicates")
            .json(role);
        self.send_empty(req).await
    }

    async fn delete_user_role(
        &self,
        token: Option<&str>,
        user_id: Uuid,
        role: Role,
    ) -> Result<(), BackendError> {
        let role = serde_json::to_value(role)?;
        let role = role.as_str().unwrap_or_default().to_string();
        let req = self
            .request(Method::DELETE, &self.table_url("user_roles"), token)
            .query(&[("user_id", eq(user_id)), ("role", eq(role))]);
        self.send_empty(req).await
    }

    async fn list_users(&self, token: Option<&str>) -> Result<Vec<ManagedUser>, BackendError> {
        let token = token.ok_or(BackendError::NoSession)?;
        let req = self.request(Method::POST, &self.function_url(ADMIN_LIST_USERS_FN), Some(token));
        let response: ListUsersResponse = self.send_json(req).await?;
        Ok(response.users)
    }

    async fn get_about(
        &self,
        token: Option<&str>,
        language: Language,
    ) -> Result<Option<AboutContent>, BackendError> {
        let req = self
            .request(Method::GET, &self.table_url("about_content"), token)
            .query(&[("select", "*".to_string()), ("language", eq(language))]);
        let rows: Vec<AboutContent> = self.send_json(req).await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_about(
        &self,
        token: Option<&str>,
        about: &AboutContent,
    ) -> Result<AboutContent, BackendError> {
        let payload = AboutContent {
            updated_at: None,
            ..about.clone()
        };
        let req = self
            .request(Method::POST, &self.table_url("about_content"), token)
            .query(&[("on_conflict", "language")])
            .header("Prefer", UPSERT_PREFER)
            .json(&payload);
        let rows: Vec<AboutContent> = self.send_json(req).await?;
        Ok(rows.into_iter().next().unwrap_or(payload))
    }
}
