//! Settings for the extension and for each logical table.
//!
//! Values are layered: built-in defaults, then an optional settings file,
//! then `SQLATTR_*` environment variables. The identity and rewrite policy
//! can be overridden per table through module arguments, e.g.
//! `create virtual table t using attributes(identity=engine, append_only=true)`.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AttrError, Result};

pub const ENV_PREFIX: &str = "SQLATTR";

/// Who may choose an entity identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityPolicy {
    /// Callers may supply identities; missing ones are generated.
    #[default]
    Caller,
    /// Identities are always generated, a supplied one is refused.
    Engine,
}

impl std::str::FromStr for IdentityPolicy {
    type Err = AttrError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "caller" => Ok(Self::Caller),
            "engine" => Ok(Self::Engine),
            other => Err(AttrError::Config(format!(
                "identity must be 'caller' or 'engine', not '{other}'"
            ))),
        }
    }
}

/// Write policy of one logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableOptions {
    #[serde(default)]
    pub identity: IdentityPolicy,
    /// Refuse update and delete, only inserts are accepted.
    #[serde(default)]
    pub append_only: bool,
}

impl TableOptions {
    /// Applies `key=value` module arguments on top of `self`. Arguments that
    /// are not options are extra column declarations, which the fixed
    /// two-column shape ignores.
    pub fn with_arguments<'a, I>(mut self, arguments: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for argument in arguments {
            let Some((key, value)) = argument.split_once('=') else {
                debug!(argument, "ignoring column declaration");
                continue;
            };
            let value = unquote(value.trim());
            match key.trim().to_ascii_lowercase().as_str() {
                "identity" => self.identity = value.parse()?,
                "append_only" => self.append_only = parse_flag(value)?,
                _ => debug!(argument, "ignoring column declaration"),
            }
        }
        Ok(self)
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AttrError::Config(format!(
            "append_only expects a boolean, not '{other}'"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Defaults for every logical table created or connected.
    #[serde(flatten)]
    pub table: TableOptions,
    /// Entities fetched per cursor refill.
    pub batch_size: usize,
    /// Prepared statements kept per logical-table handle.
    pub statement_cache: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            table: TableOptions::default(),
            batch_size: 256,
            statement_cache: 16,
        }
    }
}

impl Settings {
    /// Loads settings, reading `path` when given (missing file is fine) and
    /// `SQLATTR_*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("identity", "caller")?
            .set_default("append_only", defaults.table.append_only)?
            .set_default("batch_size", defaults.batch_size as u64)?
            .set_default("statement_cache", defaults.statement_cache as u64)?;
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let settings: Settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        if settings.batch_size == 0 {
            return Err(AttrError::Config("batch_size must be at least 1".into()));
        }
        Ok(settings)
    }
}
