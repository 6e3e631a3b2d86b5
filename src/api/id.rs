use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a run within its experiment's namespace.
///
/// Counting allocators hand out numbers, databases hand out generated
/// strings, and callers may bring either.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunId {
    Number(u64),
    Text(String),
}

impl RunId {
    /// Renders the id for use as a directory or index key.
    ///
    /// Numbers are zero-padded to `width` digits, text is used verbatim.
    pub fn padded(&self, width: usize) -> String {
        match self {
            RunId::Number(n) => format!("{:0width$}", n, width = width),
            RunId::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunId::Number(n) => write!(f, "{}", n),
            RunId::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for RunId {
    fn from(id: u64) -> Self {
        RunId::Number(id)
    }
}

impl From<String> for RunId {
    fn from(id: String) -> Self {
        RunId::Text(id)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        RunId::Text(id.to_owned())
    }
}
