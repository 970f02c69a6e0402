//! In-memory backend for tests: seeded tables, call counters, queued
//! failures per operation, and gates that hold an operation until released.
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::backend::{AuthProvider, BackendError, DataApi, PostScope};
use crate::models::{
    AboutContent, Language, ManagedUser, Post, ReadingHistoryItem, Role, Session, SessionUser, Tag,
    UserRole,
};

#[derive(Default)]
struct Tables {
    accounts: HashMap<String, (String, Uuid)>,
    refresh_tokens: HashMap<String, SessionUser>,
    posts: BTreeMap<Uuid, Post>,
    tags: BTreeMap<String, Tag>,
    reading: BTreeMap<(Uuid, Uuid), ReadingHistoryItem>,
    roles: Vec<UserRole>,
    about: BTreeMap<Language, AboutContent>,
}

#[derive(Default)]
pub struct FakeBackend {
    tables: Mutex<Tables>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, VecDeque<(u16, String)>>>,
    gates: Mutex<HashMap<&'static str, Arc<Semaphore>>>,
    issued: AtomicU64,
    /// Seconds; zero means one hour.
    token_lifetime: AtomicI64,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, email: &str, password: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.tables
            .lock()
            .unwrap()
            .accounts
            .insert(email.to_string(), (password.to_string(), id));
        id
    }

    pub fn set_token_lifetime(&self, secs: i64) {
        self.token_lifetime.store(secs, Ordering::SeqCst);
    }

    pub fn issue_session(&self, user_id: Uuid) -> Session {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let mut tables = self.tables.lock().unwrap();
        let email = tables
            .accounts
            .iter()
            .find(|(_, (_, id))| *id == user_id)
            .map(|(email, _)| email.clone());
        let user = SessionUser { id: user_id, email };
        let session = Session {
            access_token: format!("access-{n}"),
            refresh_token: format!("refresh-{n}"),
            expires_at: chrono::Utc::now().timestamp() + self.lifetime_secs(),
            user: user.clone(),
        };
        tables
            .refresh_tokens
            .insert(session.refresh_token.clone(), user);
        session
    }

    pub fn grant(&self, user_id: Uuid, role: Role) {
        self.tables
            .lock()
            .unwrap()
            .roles
            .push(UserRole { user_id, role });
    }

    pub fn insert_post(&self, post: Post) {
        self.tables.lock().unwrap().posts.insert(post.id, post);
    }

    pub fn insert_tag(&self, tag: Tag) {
        self.tables.lock().unwrap().tags.insert(tag.name.clone(), tag);
    }

    pub fn post(&self, id: Uuid) -> Option<Post> {
        self.tables.lock().unwrap().posts.get(&id).cloned()
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.tables.lock().unwrap().tags.keys().cloned().collect()
    }

    pub fn reading_rows(&self) -> Vec<ReadingHistoryItem> {
        self.tables.lock().unwrap().reading.values().cloned().collect()
    }

    pub fn roles_of(&self, user_id: Uuid) -> Vec<Role> {
        self.tables
            .lock()
            .unwrap()
            .roles
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.role)
            .collect()
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    /// Makes the next call to `op` fail with an API error.
    pub fn fail_next(&self, op: &'static str, status: u16, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back((status, message.to_string()));
    }

    /// Calls to `op` wait until released.
    pub fn hold(&self, op: &'static str) {
        self.gates
            .lock()
            .unwrap()
            .insert(op, Arc::new(Semaphore::new(0)));
    }

    /// Lets `n` held calls to `op` through.
    pub fn release(&self, op: &'static str, n: usize) {
        if let Some(gate) = self.gates.lock().unwrap().get(op) {
            gate.add_permits(n);
        }
    }

    fn lifetime_secs(&self) -> i64 {
        match self.token_lifetime.load(Ordering::SeqCst) {
            0 => 3600,
            secs => secs,
        }
    }

    async fn enter(&self, op: &'static str) -> Result<(), BackendError> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;

        let gate = self.gates.lock().unwrap().get(op).cloned();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(op)
            .and_then(|queue| queue.pop_front());
        match failure {
            Some((status, message)) => Err(BackendError::api(status, message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AuthProvider for FakeBackend {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        self.enter("sign_in").await?;
        let account = self.tables.lock().unwrap().accounts.get(email).cloned();
        match account {
            Some((expected, id)) if expected == password => Ok(self.issue_session(id)),
            _ => Err(BackendError::api(400, "Invalid login credentials")),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, BackendError> {
        self.enter("refresh").await?;
        let user = self
            .tables
            .lock()
            .unwrap()
            .refresh_tokens
            .get(refresh_token)
            .cloned();
        match user {
            Some(user) => Ok(self.issue_session(user.id)),
            None => Err(BackendError::api(400, "Invalid Refresh Token: Refresh Token Not Found")),
        }
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), BackendError> {
        self.enter("sign_out").await
    }

    fn oauth_authorize_url(&self, provider: &str, redirect_to: &str) -> String {
        format!("https://auth.test/authorize?provider={provider}&redirect_to={redirect_to}")
    }
}

#[async_trait]
impl DataApi for FakeBackend {
    async fn list_posts(
        &self,
        _token: Option<&str>,
        scope: PostScope,
    ) -> Result<Vec<Post>, BackendError> {
        self.enter("list_posts").await?;
        let tables = self.tables.lock().unwrap();
        let mut posts: Vec<Post> = tables
            .posts
            .values()
            .filter(|p| scope == PostScope::All || p.is_published())
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(posts)
    }

    async fn list_posts_with_tag(
        &self,
        _token: Option<&str>,
        tag: &str,
    ) -> Result<Vec<Post>, BackendError> {
        self.enter("list_posts_with_tag").await?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .posts
            .values()
            .filter(|p| p.has_tag(tag))
            .cloned()
            .collect())
    }

    async fn get_post(&self, _token: Option<&str>, id: Uuid) -> Result<Post, BackendError> {
        self.enter("get_post").await?;
        self.post(id)
            .ok_or_else(|| BackendError::NotFound(format!("Post {id} not found")))
    }

    async fn upsert_post(&self, _token: Option<&str>, post: &Post) -> Result<Post, BackendError> {
        self.enter("upsert_post").await?;
        let mut stored = post.without_timestamps();
        let now = chrono::Utc::now();
        let mut tables = self.tables.lock().unwrap();
        stored.created_at = tables
            .posts
            .get(&post.id)
            .and_then(|p| p.created_at)
            .or(Some(now));
        stored.updated_at = Some(now);
        tables.posts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn delete_post(&self, _token: Option<&str>, id: Uuid) -> Result<(), BackendError> {
        self.enter("delete_post").await?;
        self.tables.lock().unwrap().posts.remove(&id);
        Ok(())
    }

    async fn list_tags(&self, _token: Option<&str>) -> Result<Vec<Tag>, BackendError> {
        self.enter("list_tags").await?;
        Ok(self.tables.lock().unwrap().tags.values().cloned().collect())
    }

    async fn upsert_tag(&self, _token: Option<&str>, tag: &Tag) -> Result<Tag, BackendError> {
        self.enter("upsert_tag").await?;
        self.insert_tag(tag.clone());
        Ok(tag.clone())
    }

    async fn delete_tag(&self, _token: Option<&str>, name: &str) -> Result<(), BackendError> {
        self.enter("delete_tag").await?;
        self.tables.lock().unwrap().tags.remove(name);
        Ok(())
    }

    async fn list_reading_history(
        &self,
        _token: Option<&str>,
        user_id: Uuid,
    ) -> Result<Vec<ReadingHistoryItem>, BackendError> {
        self.enter("list_reading_history").await?;
        Ok(self
            .reading_rows()
            .into_iter()
            .filter(|r| r.user_id == user_id)
            .collect())
    }

    async fn get_reading_entry(
        &self,
        _token: Option<&str>,
        user_id: Uuid,
        post_id: Uuid,
    ) -> Result<Option<ReadingHistoryItem>, BackendError> {
        self.enter("get_reading_entry").await?;
        Ok(self
            .tables
            .lock()
            .unwrap()
            .reading
            .get(&(user_id, post_id))
            .cloned())
    }

    async fn upsert_reading_entry(
        &self,
        _token: Option<&str>,
        item: &ReadingHistoryItem,
    ) -> Result<(), BackendError> {
        self.enter("upsert_reading_entry").await?;
        self.tables
            .lock()
            .unwrap()
            .reading
            .insert((item.user_id, item.post_id), item.clone());
        Ok(())
    }

    async fn delete_reading_entry(
        &self,
        _token: Option<&str>,
        user_id: Uuid,
        post_id: Uuid,
    ) -> Result<(), BackendError> {
        self.enter("delete_reading_entry").await?;
        self.tables.lock().unwrap().reading.remove(&(user_id, post_id));
        Ok(())
    }

    async fn list_user_roles(
        &self,
        _token: Option<&str>,
        user_id: Uuid,
    ) -> Result<Vec<UserRole>, BackendError> {
        self.enter("list_user_roles").await?;
        Ok(self
            .roles_of(user_id)
            .into_iter()
            .map(|role| UserRole { user_id, role })
            .collect())
    }

    async fn insert_user_role(
        &self,
        _token: Option<&str>,
        role: &UserRole,
    ) -> Result<(), BackendError> {
        self.enter("insert_user_role").await?;
        let mut tables = self.tables.lock().unwrap();
        if !tables.roles.contains(role) {
            tables.roles.push(role.clone());
        }
        Ok(())
    }

    async fn delete_user_role(
        &self,
        _token: Option<&str>,
        user_id: Uuid,
        role: Role,
    ) -> Result<(), BackendError> {
        self.enter("delete_user_role").await?;
        self.tables
            .lock()
            .unwrap()
            .roles
            .retain(|r| !(r.user_id == user_id && r.role == role));
        Ok(())
    }

    async fn list_users(&self, token: Option<&str>) -> Result<Vec<ManagedUser>, BackendError> {
        self.enter("list_users").await?;
        token.ok_or(BackendError::NoSession)?;
        let tables = self.tables.lock().unwrap();
        let mut users: Vec<ManagedUser> = tables
            .accounts
            .iter()
            .map(|(email, (_, id))| ManagedUser {
                id: *id,
                email: Some(email.clone()),
                created_at: None,
                last_sign_in_at: None,
                roles: tables
                    .roles
                    .iter()
                    .filter(|r| r.user_id == *id)
                    .map(|r| r.role)
                    .collect(),
            })
            .collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn get_about(
        &self,
        _token: Option<&str>,
        language: Language,
    ) -> Result<Option<AboutContent>, BackendError> {
        self.enter("get_about").await?;
        Ok(self.tables.lock().unwrap().about.get(&language).cloned())
    }

    async fn upsert_about(
        &self,
        _token: Option<&str>,
        about: &AboutContent,
    ) -> Result<AboutContent, BackendError> {
        self.enter("upsert_about").await?;
        let stored = AboutContent {
            updated_at: Some(chrono::Utc::now()),
            ..about.clone()
        };
        self.tables
            .lock()
            .unwrap()
            .about
            .insert(about.language, stored.clone());
        Ok(stored)
    }
}
