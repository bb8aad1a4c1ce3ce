use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{error, info};
use sqlx::{
    query, query_as, query_scalar,
    sqlite::{SqliteConnectOptions, SqlitePool},
    Pool, Sqlite, Transaction,
};

use super::{FeedbackStore, Repository, Result, SessionStore, StoreError, UserStore};
use crate::auth::SessionId;
use crate::feedback::{Feedback, NewFeedback};
use crate::user::{NewUser, User};

pub struct Backend(pub Pool<Sqlite>);

fn into_sql(path: &Path) -> PathBuf {
    path.join("feedback.sql")
}

/// Removes the database along with its WAL files.
fn reset(db_path: &Path) -> std::result::Result<(), ()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut path = db_path.as_os_str().to_owned();
        path.push(suffix);

        match std::fs::remove_file(&path) {
            Ok(()) => info!("removed {path:?}"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                error!("couldn't remove {path:?}: {e}");
                return Err(());
            }
        }
    }
    Ok(())
}

fn internal(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        error!("{context}: {e:?}");
        StoreError::Internal
    }
}

fn find_error(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| match e {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        e => internal(context)(e),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    // SQLITE_CONSTRAINT_UNIQUE
    match e {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("2067")
                || db_err.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

impl Backend {
    pub async fn new(data_dir: &Path, wipe: bool) -> std::result::Result<Self, ()> {
        let db_path = into_sql(data_dir);

        if wipe {
            reset(&db_path)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            error!("couldn't open {}: {e}", db_path.display());
        })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                error!("migration: {e}");
            })?;

        info!("Using {}", db_path.display());

        Ok(Self(pool))
    }
}

impl Backend {
    async fn transact<'t, T, R, F>(&self, transaction: T) -> Result<R>
    where
        T: FnOnce(Transaction<'t, Sqlite>) -> F,
        F: Future<Output = Result<(Transaction<'t, Sqlite>, R)>>,
    {
        let tx = self
            .0
            .begin()
            .await
            .map_err(internal("error beginning transaction"))?;

        // dropping `tx` on error rolls back
        let (tx, r) = transaction(tx).await?;

        tx.commit()
            .await
            .map_err(internal("error committing transaction"))?;

        Ok(r)
    }
}

#[async_trait]
impl Repository<User> for Backend {
    async fn find_by_id(&self, id: i64) -> Result<User> {
        query_as::<_, User>(
            "
            SELECT id, username, password, email, first_name, last_name
            FROM users
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_one(&self.0)
        .await
        .map_err(find_error("find user by id"))
    }

    async fn save(&self, new: NewUser) -> Result<User> {
        let id = query(
            "
            INSERT INTO users
            (username, password, email, first_name, last_name)
            VALUES
            (?, ?, ?, ?, ?)
            ",
        )
        .bind(&new.username)
        .bind(&new.password)
        .bind(&new.email)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .execute(&self.0)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                info!("username {} taken at insert", new.username);
                StoreError::Conflict
            } else {
                internal("insert user")(e)
            }
        })?
        .last_insert_rowid();

        Ok(new.with_id(id))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let done = query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.0)
            .await
            .map_err(internal("delete user"))?;

        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for Backend {
    async fn find_by_username(&self, username: &str) -> Result<User> {
        query_as::<_, User>(
            "
            SELECT id, username, password, email, first_name, last_name
            FROM users
            WHERE username = ?
            ",
        )
        .bind(username)
        .fetch_one(&self.0)
        .await
        .map_err(find_error("find user by username"))
    }

    async fn delete_with_feedback(&self, id: i64) -> Result<()> {
        let removed = self
            .transact(|mut tx| async move {
                let feedbacks = query("DELETE FROM feedbacks WHERE user_id = ?")
                    .bind(id)
                    .execute(&mut tx)
                    .await
                    .map_err(internal("delete user's feedback"))?
                    .rows_affected();

                query("DELETE FROM sessions WHERE user_id = ?")
                    .bind(id)
                    .execute(&mut tx)
                    .await
                    .map_err(internal("delete user's sessions"))?;

                let users = query("DELETE FROM users WHERE id = ?")
                    .bind(id)
                    .execute(&mut tx)
                    .await
                    .map_err(internal("delete user"))?
                    .rows_affected();

                Ok((tx, (users, feedbacks)))
            })
            .await?;

        match removed {
            (0, _) => Err(StoreError::NotFound),
            (_, feedbacks) => {
                info!("deleted user {id} and {feedbacks} feedback");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Repository<Feedback> for Backend {
    async fn find_by_id(&self, id: i64) -> Result<Feedback> {
        query_as::<_, Feedback>(
            "
            SELECT id, title, content, user_id
            FROM feedbacks
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_one(&self.0)
        .await
        .map_err(find_error("find feedback"))
    }

    async fn save(&self, new: NewFeedback) -> Result<Feedback> {
        let id = query(
            "
            INSERT INTO feedbacks
            (title, content, user_id)
            VALUES
            (?, ?, ?)
            ",
        )
        .bind(&new.title)
        .bind(&new.content)
        .bind(new.user_id)
        .execute(&self.0)
        .await
        .map_err(internal("insert feedback"))?
        .last_insert_rowid();

        Ok(new.with_id(id))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let done = query("DELETE FROM feedbacks WHERE id = ?")
            .bind(id)
            .execute(&self.0)
            .await
            .map_err(internal("delete feedback"))?;

        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl FeedbackStore for Backend {
    async fn for_user(&self, user_id: i64) -> Result<Vec<Feedback>> {
        query_as::<_, Feedback>(
            "
            SELECT id, title, content, user_id
            FROM feedbacks
            WHERE user_id = ?
            ORDER BY id
            ",
        )
        .bind(user_id)
        .fetch_all(&self.0)
        .await
        .map_err(internal("select user's feedback"))
    }

    async fn update(&self, feedback: &Feedback) -> Result<()> {
        let done = query(
            "
            UPDATE feedbacks
            SET title = ?, content = ?
            WHERE id = ?
            ",
        )
        .bind(&feedback.title)
        .bind(&feedback.content)
        .bind(feedback.id)
        .execute(&self.0)
        .await
        .map_err(internal("update feedback"))?;

        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Backend {
    async fn create_session(&self, user_id: i64) -> Result<SessionId> {
        let id = SessionId::new();

        let replaced = self
            .transact(|mut tx| async move {
                let replaced = query("DELETE FROM sessions WHERE user_id = ?")
                    .bind(user_id)
                    .execute(&mut tx)
                    .await
                    .map_err(internal("delete old sessions"))?
                    .rows_affected();

                query("INSERT INTO sessions (id, user_id) VALUES (?, ?)")
                    .bind(id.to_string())
                    .bind(user_id)
                    .execute(&mut tx)
                    .await
                    .map_err(internal("insert session"))?;

                Ok((tx, replaced))
            })
            .await?;

        if replaced > 0 {
            info!("user {user_id}: replaced {replaced} old session(s)");
        }

        Ok(id)
    }

    async fn session_user(&self, id: SessionId) -> Result<i64> {
        query_scalar::<_, i64>("SELECT user_id FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&self.0)
            .await
            .map_err(find_error("find session"))
    }

    async fn delete_session(&self, id: SessionId) -> Result<()> {
        query("DELETE FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.0)
            .await
            .map(|_| ())
            .map_err(internal("delete session"))
    }
}
