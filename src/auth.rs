use std::fmt;
use std::str::FromStr;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use log::{error, warn};
use password_hash::rand_core::OsRng;
use tokio::task;
use uuid::Uuid;

/// Hashes and verifies passwords. Digests are self-describing PHC strings,
/// so a digest made with one set of parameters still verifies after they change.
pub struct Hasher(Argon2<'static>);

impl Hasher {
    pub fn new() -> Self {
        Self(Argon2::default())
    }

    /// Cheapest parameters argon2 accepts, to keep tests quick.
    #[cfg(test)]
    pub fn fast() -> Self {
        use argon2::{Algorithm, Params, Version};

        let params = Params::new(Params::MIN_M_COST, Params::MIN_T_COST, 1, None).unwrap();
        Self(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Argon2 is CPU bound, so this and `verify` run on the blocking pool.
    pub async fn hash(&self, password: &str) -> Result<String, ()> {
        let argon2 = self.0.clone();
        let password = password.to_owned();

        task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);

            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| {
                    error!("couldn't hash password: {e}");
                })
        })
        .await
        .map_err(|e| {
            error!("password hashing task failed: {e}");
        })?
    }

    pub async fn verify(&self, password: &str, digest: &str) -> bool {
        let argon2 = self.0.clone();
        let password = password.to_owned();
        let digest = digest.to_owned();

        let verified = task::spawn_blocking(move || {
            let parsed = match PasswordHash::new(&digest) {
                Ok(parsed) => parsed,
                Err(e) => {
                    error!("invalid stored password digest: {e}");
                    return false;
                }
            };

            argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .await;

        verified.unwrap_or_else(|e| {
            error!("password verification task failed: {e}");
            false
        })
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for SessionId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(Self).map_err(|e| {
            warn!("invalid session id {s:?}: {e}");
        })
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

/// A client's session, resolved from its cookie at the start of a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Session {
    id: Option<SessionId>,
    user_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denied {
    Anonymous,
    /// Logged in, but as someone other than the resource's owner.
    NotOwner { user_id: i64 },
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(id: SessionId, user_id: i64) -> Self {
        Self {
            id: Some(id),
            user_id: Some(user_id),
        }
    }

    pub fn id(&self) -> Option<SessionId> {
        self.id
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn require_authenticated(&self) -> Result<i64, Denied> {
        self.user_id.ok_or(Denied::Anonymous)
    }

    /// `owner` is None for resources nobody owns, which nobody may touch.
    pub fn require_owner(&self, owner: Option<i64>) -> Result<i64, Denied> {
        let user_id = self.require_authenticated()?;

        if owner == Some(user_id) {
            Ok(user_id)
        } else {
            Err(Denied::NotOwner { user_id })
        }
    }
}
