//! Layered TOML configuration.
//!
//! Three sources, later ones winning key by key: the built-in defaults, a
//! defaults document, and an optional override document. Keys the structs
//! below do not know are ignored.
//!
//! ```toml
//! [server]
//! addr = "127.0.0.1:9000"
//! max_body_size = 1048576
//!
//! [session]
//! secret = "change me to something long"
//! cookie_name = "awesession"
//! max_age = 86400
//!
//! [auth]
//! admin_prefix = "/manage/"
//! signin_path = "/signin"
//! ```

use std::path::Path;

use ::config::builder::DefaultState;
use ::config::{ConfigBuilder, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub auth: AuthConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// Request bodies larger than this many bytes are answered with `413`.
    pub max_body_size: u64,
}

/// 1 MiB.
pub const DEFAULT_MAX_BODY_SIZE: u64 = 1024 * 1024;

impl Default for ServerConfig {
    fn default() -> Self {
        Self { addr: "127.0.0.1:9000".to_owned(), max_body_size: DEFAULT_MAX_BODY_SIZE }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Key the session signatures are computed with.
    pub secret: String,
    pub cookie_name: String,
    /// Token and cookie lifetime in seconds.
    pub max_age: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: "awesome".to_owned(),
            cookie_name: "awesession".to_owned(),
            max_age: 86_400,
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"<redacted>")
            .field("cookie_name", &self.cookie_name)
            .field("max_age", &self.max_age)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Paths under this prefix require an admin user.
    pub admin_prefix: String,
    /// Where anonymous or non-admin visitors of the admin prefix are sent.
    pub signin_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { admin_prefix: "/manage/".to_owned(), signin_path: "/signin".to_owned() }
    }
}

impl Config {
    /// Layers `defaults` and then `overrides` (both TOML documents) over the
    /// built-in defaults, then validates the result.
    pub fn from_layers(defaults: &str, overrides: Option<&str>) -> Result<Self, Error> {
        let mut builder = builtin()?.add_source(File::from_str(defaults, FileFormat::Toml));
        if let Some(overrides) = overrides {
            builder = builder.add_source(File::from_str(overrides, FileFormat::Toml));
        }
        finish(builder)
    }

    /// Reads the defaults file and, when it exists, the override file.
    pub fn load(default_path: &Path, override_path: Option<&Path>) -> Result<Self, Error> {
        let mut builder = builtin()?.add_source(File::from(default_path).format(FileFormat::Toml));
        if let Some(path) = override_path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }
        finish(builder)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.session.secret.is_empty() {
            return Err(Error::Config("session.secret must not be empty".to_owned()));
        }
        if self.session.cookie_name.is_empty() {
            return Err(Error::Config("session.cookie_name must not be empty".to_owned()));
        }
        if self.auth.admin_prefix.is_empty() {
            return Err(Error::Config("auth.admin_prefix must not be empty".to_owned()));
        }
        if !self.auth.signin_path.starts_with('/') {
            return Err(Error::Config("auth.signin_path must be an absolute path".to_owned()));
        }
        if self.session.secret.len() < 16 {
            warn!("session.secret is shorter than 16 bytes");
        }
        Ok(())
    }
}

/// Builder seeded with the values of `Config::default()`.
fn builtin() -> Result<ConfigBuilder<DefaultState>, Error> {
    let d = Config::default();
    Ok(::config::Config::builder()
        .set_default("server.addr", d.server.addr)?
        .set_default("server.max_body_size", to_i64(d.server.max_body_size))?
        .set_default("session.secret", d.session.secret)?
        .set_default("session.cookie_name", d.session.cookie_name)?
        .set_default("session.max_age", to_i64(d.session.max_age))?
        .set_default("auth.admin_prefix", d.auth.admin_prefix)?
        .set_default("auth.signin_path", d.auth.signin_path)?)
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Config, Error> {
    let config: Config = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}
