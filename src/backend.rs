use async_trait::async_trait;

use crate::auth::SessionId;
use crate::feedback::{Feedback, NewFeedback};
use crate::user::{NewUser, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    NotFound,
    /// A uniqueness constraint was hit.
    Conflict,
    Internal,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// An entity together with its not-yet-persisted form.
pub trait Entity {
    type New: Send + 'static;
}

#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<E>;

    /// Persist `new`, returning it with its assigned id.
    async fn save(&self, new: E::New) -> Result<E>;

    async fn delete(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait UserStore: Repository<User> {
    async fn find_by_username(&self, username: &str) -> Result<User>;

    /// Deletes the user after their feedback and sessions, in one transaction.
    async fn delete_with_feedback(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait FeedbackStore: Repository<Feedback> {
    async fn for_user(&self, user_id: i64) -> Result<Vec<Feedback>>;

    async fn update(&self, feedback: &Feedback) -> Result<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// A new session for `user_id`, replacing any the user already had.
    async fn create_session(&self, user_id: i64) -> Result<SessionId>;

    /// The user the session belongs to, `NotFound` for unknown sessions.
    async fn session_user(&self, id: SessionId) -> Result<i64>;

    async fn delete_session(&self, id: SessionId) -> Result<()>;
}

impl Entity for User {
    type New = NewUser;
}

impl Entity for Feedback {
    type New = NewFeedback;
}

mod backend_sql;
pub use backend_sql::*;
