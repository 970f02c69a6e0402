//! User management for admins: list accounts and grant or revoke the admin role.
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::backend::DataApi;
use crate::errors::AppError;
use crate::models::{ManagedUser, Role, UserRole};
use crate::resilient::{Remote, RetryPolicy};

pub struct UserAdminService {
    api: Arc<dyn DataApi>,
    remote: Remote,
}

impl UserAdminService {
    pub fn new(api: Arc<dyn DataApi>, remote: Remote) -> Self {
        Self { api, remote }
    }

    pub async fn list(&self) -> Result<Vec<ManagedUser>, AppError> {
        let api = &self.api;
        let users = self
            .remote
            .call("list_users", move |token| async move {
                api.list_users(token.as_deref()).await
            })
            .await?;
        Ok(users)
    }

    pub async fn grant_admin(&self, user_id: Uuid) -> Result<(), AppError> {
        let role = UserRole {
            user_id,
            role: Role::Admin,
        };
        let api = &self.api;
        let role_ref = &role;
        self.remote
            .with_policy(RetryPolicy::no_retries())
            .call("grant_admin", move |token| async move {
                api.insert_user_role(token.as_deref(), role_ref).await
            })
            .await?;
        info!("Granted admin to {user_id}");
        Ok(())
    }

    /// Admins cannot revoke their own role.
    pub async fn revoke_admin(&self, user_id: Uuid) -> Result<(), AppError> {
        if self.remote.session().user_id() == Some(user_id) {
            return Err(AppError::Validation(
                "You cannot remove your own admin role".to_string(),
            ));
        }
        let api = &self.api;
        self.remote
            .with_policy(RetryPolicy::no_retries())
            .call("revoke_admin", move |token| async move {
                api.delete_user_role(token.as_deref(), user_id, Role::Admin).await
            })
            .await?;
        info!("Revoked admin from {user_id}");
        Ok(())
    }
}
