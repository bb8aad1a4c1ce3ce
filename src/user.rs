use log::{info, warn};

use crate::app::{Error, Result};
use crate::auth::Hasher;
use crate::backend::{StoreError, UserStore};

#[derive(Debug, Clone, sqlx::FromRow)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Password digest, never the password itself.
    pub password: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// A user that has been registered but not yet saved.
#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl NewUser {
    pub fn with_id(self, id: i64) -> User {
        let Self {
            username,
            password,
            email,
            first_name,
            last_name,
        } = self;

        User {
            id,
            username,
            password,
            email,
            first_name,
            last_name,
        }
    }
}

impl User {
    pub async fn register(
        users: &dyn UserStore,
        hasher: &Hasher,
        username: &str,
        password: &str,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<NewUser> {
        match users.find_by_username(username).await {
            Ok(_) => {
                info!("username {username} already taken");
                return Err(Error::UsernameTaken);
            }
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let password = hasher.hash(password).await.map_err(|()| Error::Internal)?;

        Ok(NewUser {
            username: username.into(),
            password,
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
        })
    }

    pub async fn authenticate(
        users: &dyn UserStore,
        hasher: &Hasher,
        username: &str,
        password: &str,
    ) -> Result<User> {
        let user = users.find_by_username(username).await.map_err(|e| {
            if e == StoreError::NotFound {
                warn!("rejecting non-existant user {username}");
                Error::InvalidCredentials
            } else {
                e.into()
            }
        })?;

        if !hasher.verify(password, &user.password).await {
            warn!("wrong password for user {username}");
            return Err(Error::InvalidCredentials);
        }

        Ok(user)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::backend::{self, Repository};

    async fn register(users: &dyn UserStore, hasher: &Hasher, username: &str) -> Result<User> {
        let new = User::register(
            users,
            hasher,
            username,
            "pw1",
            "someone@example.com",
            "Some",
            "One",
        )
        .await?;

        Ok(users.save(new).await?)
    }

    #[tokio::test]
    async fn second_registration_of_a_name_fails() {
        let backend = backend::test::create_db().await;
        let hasher = Hasher::fast();

        let alice = register(&backend, &hasher, "alice").await.unwrap();
        assert_eq!(alice.username, "alice");
        assert_ne!(alice.password, "pw1");

        assert_eq!(
            register(&backend, &hasher, "alice").await,
            Err(Error::UsernameTaken)
        );
        assert!(register(&backend, &hasher, "bob").await.is_ok());
    }

    #[tokio::test]
    async fn authenticate_needs_user_and_matching_password() {
        let backend = backend::test::create_db().await;
        let hasher = Hasher::fast();
        let alice = register(&backend, &hasher, "alice").await.unwrap();

        assert_eq!(
            User::authenticate(&backend, &hasher, "alice", "pw1").await,
            Ok(alice)
        );
        assert_eq!(
            User::authenticate(&backend, &hasher, "alice", "pw2").await,
            Err(Error::InvalidCredentials)
        );
        assert_eq!(
            User::authenticate(&backend, &hasher, "bob", "pw1").await,
            Err(Error::InvalidCredentials)
        );
    }
}
