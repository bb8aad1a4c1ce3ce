use log::warn;

use crate::app::{Error, Result};
use crate::backend::{Repository, StoreError, UserStore};

#[derive(Debug, Clone, sqlx::FromRow)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct Feedback {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub user_id: Option<i64>,
}

#[derive(Debug)]
pub struct NewFeedback {
    pub title: String,
    pub content: String,
    pub user_id: Option<i64>,
}

/// Changes to a feedback. `None` leaves a field as it is.
#[derive(Debug, Default)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct FeedbackUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl NewFeedback {
    pub fn with_id(self, id: i64) -> Feedback {
        let Self {
            title,
            content,
            user_id,
        } = self;

        Feedback {
            id,
            title,
            content,
            user_id,
        }
    }
}

impl Feedback {
    pub async fn add(
        users: &dyn UserStore,
        title: &str,
        content: &str,
        user_id: i64,
    ) -> Result<NewFeedback> {
        users.find_by_id(user_id).await.map_err(|e| {
            if e == StoreError::NotFound {
                warn!("feedback for non-existant user {user_id}");
            }
            Error::from(e)
        })?;

        Ok(NewFeedback {
            title: title.into(),
            content: content.into(),
            user_id: Some(user_id),
        })
    }

    pub fn apply(&mut self, update: FeedbackUpdate) {
        let FeedbackUpdate { title, content } = update;

        if let Some(title) = title {
            self.title = title;
        }
        if let Some(content) = content {
            self.content = content;
        }
    }
}

impl FeedbackUpdate {
    /// Blank fields are left unchanged.
    pub fn from_fields(title: String, content: String) -> Self {
        let non_blank = |s: String| (!s.is_empty()).then_some(s);

        Self {
            title: non_blank(title),
            content: non_blank(content),
        }
    }
}
