// User entity and directory interface
// The directory is a collaborator: the gateway core reads and updates users
// through this trait and never owns the backing storage. An in-memory
// implementation backs the test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum UserError {
    #[error("user not found")]
    NotFound,

    #[error("username or email already registered")]
    AlreadyExists,

    #[error("directory error: {0}")]
    Directory(String),
}

/// User identity record.
///
/// The password hash is the only credential authority; the MFA secret is
/// opaque to everything except the authenticator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub roles: Vec<String>,
    pub mfa_enabled: bool,
    pub mfa_secret: Option<String>,
    pub verified: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Lookup and mutation surface of the user store.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        roles: Vec<String>,
    ) -> Result<User, UserError>;

    async fn find_by_id(&self, user_id: &str) -> Result<User, UserError>;

    async fn find_by_username(&self, username: &str) -> Result<User, UserError>;

    async fn find_by_email(&self, email: &str) -> Result<User, UserError>;

    /// Replace the stored record for `user.id`.
    async fn update_user(&self, user: User) -> Result<User, UserError>;
}

/// Higher-level mutations shared by all directory implementations.
pub struct UserOperations;

impl UserOperations {
    pub async fn enable_mfa(
        directory: &dyn UserDirectory,
        user_id: &str,
        mfa_secret: &str,
    ) -> Result<User, UserError> {
        let mut user = directory.find_by_id(user_id).await?;
        user.mfa_enabled = true;
        user.mfa_secret = Some(mfa_secret.to_string());
        directory.update_user(user).await
    }

    pub async fn disable_mfa(
        directory: &dyn UserDirectory,
        user_id: &str,
    ) -> Result<User, UserError> {
        let mut user = directory.find_by_id(user_id).await?;
        user.mfa_enabled = false;
        user.mfa_secret = None;
        directory.update_user(user).await
    }

    pub async fn mark_verified(
        directory: &dyn UserDirectory,
        user_id: &str,
    ) -> Result<User, UserError> {
        let mut user = directory.find_by_id(user_id).await?;
        user.verified = true;
        directory.update_user(user).await
    }

    pub async fn deactivate(
        directory: &dyn UserDirectory,
        user_id: &str,
    ) -> Result<User, UserError> {
        let mut user = directory.find_by_id(user_id).await?;
        user.active = false;
        directory.update_user(user).await
    }

    pub async fn reactivate(
        directory: &dyn UserDirectory,
        user_id: &str,
    ) -> Result<User, UserError> {
        let mut user = directory.find_by_id(user_id).await?;
        user.active = true;
        directory.update_user(user).await
    }

    pub async fn add_role(
        directory: &dyn UserDirectory,
        user_id: &str,
        role: &str,
    ) -> Result<User, UserError> {
        let mut user = directory.find_by_id(user_id).await?;
        if !user.has_role(role) {
            user.roles.push(role.to_string());
        }
        directory.update_user(user).await
    }

    pub async fn remove_role(
        directory: &dyn UserDirectory,
        user_id: &str,
        role: &str,
    ) -> Result<User, UserError> {
        let mut user = directory.find_by_id(user_id).await?;
        user.roles.retain(|r| r != role);
        directory.update_user(user).await
    }
}

/// In-memory directory used by tests and local development.
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashMap<String, User>>>,
    clock: Arc<dyn crate::utils::clock::Clock>,
}

impl InMemoryUserDirectory {
    pub fn new(clock: Arc<dyn crate::utils::clock::Clock>) -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        roles: Vec<String>,
    ) -> Result<User, UserError> {
        let mut users = self.users.write().await;

        if users
            .values()
            .any(|u| u.username == username || u.email == email)
        {
            return Err(UserError::AlreadyExists);
        }

        let now = self.clock.now();
        let roles = if roles.is_empty() {
            vec!["account_holder".to_string()]
        } else {
            roles
        };

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            roles,
            mfa_enabled: false,
            mfa_secret: None,
            verified: false,
            active: true,
            created_at: now,
            updated_at: now,
        };

        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, user_id: &str) -> Result<User, UserError> {
        self.users
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or(UserError::NotFound)
    }

    async fn find_by_username(&self, username: &str) -> Result<User, UserError> {
        self.users
            .read()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or(UserError::NotFound)
    }

    async fn find_by_email(&self, email: &str) -> Result<User, UserError> {
        self.users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(UserError::NotFound)
    }

    async fn update_user(&self, mut user: User) -> Result<User, UserError> {
        let mut users = self.users.write().await;

        if !users.contains_key(&user.id) {
            return Err(UserError::NotFound);
        }

        user.updated_at = self.clock.now();
        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }
}
