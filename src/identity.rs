//! The signed-in user and the storage lookup the session codec relies on.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::handler::BoxFuture;

/// Placeholder written over the password digest once an identity has been
/// resolved from a cookie.
pub const REDACTED: &str = "******";

/// A resolved user, as attached to the request by the authentication stage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub admin: bool,
    /// Password digest. Redacted to [`REDACTED`] on every identity that came
    /// out of a session cookie.
    pub passwd: String,
}

impl Identity {
    pub fn redacted(mut self) -> Self {
        self.passwd = REDACTED.to_owned();
        self
    }
}

/// Finds a user by id. Implemented by the application's storage layer.
///
/// `Ok(None)` means "no such user"; `Err` is a storage failure.
pub trait UserLookup: Send + Sync + 'static {
    fn find_user<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Identity>, Error>>;
}
