//! Per-endpoint collection naming.
//!
//! Every collection the harvester touches for one endpoint is derived from a
//! (database, collection prefix) pair, so two endpoints with different
//! prefixes never share a collection.

use std::fmt;

/// Collection scope for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    database: String,
    prefix: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            prefix: prefix.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn identity(&self) -> String {
        self.collection("identity")
    }

    pub fn records_checkpoint(&self) -> String {
        self.collection("records_checkpoint")
    }

    pub fn sets_checkpoint(&self) -> String {
        self.collection("sets_checkpoint")
    }

    pub fn records(&self) -> String {
        self.collection("records")
    }

    pub fn sets(&self) -> String {
        self.collection("sets")
    }

    pub fn deleted(&self) -> String {
        self.collection("deleted")
    }

    pub fn errors(&self) -> String {
        self.collection("errors")
    }

    fn collection(&self, suffix: &str) -> String {
        format!("{}_{suffix}", self.prefix)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.prefix)
    }
}

/// Check that `prefix` is usable as a collection prefix: non-empty ASCII
/// alphanumerics, `_` or `-`.
pub fn validate_prefix(prefix: &str) -> Result<(), String> {
    if prefix.is_empty() {
        return Err("collection prefix must not be empty".to_string());
    }
    if let Some(bad) = prefix
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(format!(
            "collection prefix {prefix:?} contains invalid character {bad:?}"
        ));
    }
    Ok(())
}
