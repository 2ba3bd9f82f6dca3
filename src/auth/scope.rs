//! Operations, scopes and role presets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An operation a request wants to perform on an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Write => write!(f, "write"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// A permission grant carried inside a token.
///
/// Wire form:
///
/// ```text
/// read            read own assets
/// write           upload assets owned by the subject
/// delete          delete own assets
/// read:*          read assets of any owner, the subject's own included
/// read:<owner>    read assets of one specific owner only
/// ```
///
/// `read:<owner>` does not extend to the subject's own assets unless it
/// names the subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    Read,
    Write,
    Delete,
    ReadAny,
    ReadOwner(String),
}

impl Scope {
    /// Whether this scope permits the operation on the subject's own assets.
    pub fn grants(&self, op: Operation) -> bool {
        match (self, op) {
            (Scope::Read | Scope::ReadAny, Operation::Read) => true,
            (Scope::Write, Operation::Write) => true,
            (Scope::Delete, Operation::Delete) => true,
            _ => false,
        }
    }

    /// Whether this is any of the read scopes.
    pub fn is_read(&self) -> bool {
        matches!(self, Scope::Read | Scope::ReadAny | Scope::ReadOwner(_))
    }

    /// Whether this scope permits reading assets owned by `owner`.
    pub fn grants_cross_owner_read(&self, owner: &str) -> bool {
        match self {
            Scope::ReadAny => true,
            Scope::ReadOwner(allowed) => allowed == owner,
            _ => false,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Read => write!(f, "read"),
            Scope::Write => write!(f, "write"),
            Scope::Delete => write!(f, "delete"),
            Scope::ReadAny => write!(f, "read:*"),
            Scope::ReadOwner(owner) => write!(f, "read:{}", owner),
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Scope::Read),
            "write" => Ok(Scope::Write),
            "delete" => Ok(Scope::Delete),
            "read:*" => Ok(Scope::ReadAny),
            other => match other.strip_prefix("read:") {
                Some(owner) if !owner.is_empty() => Ok(Scope::ReadOwner(owner.to_string())),
                _ => Err(format!("unknown scope '{}'", other)),
            },
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

/// Role presets expanding to scope sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    /// Read own assets
    User,
    /// Upload, read and delete own assets
    Manager,
    /// Manager rights plus read access to every owner's assets
    Admin,
}

impl Role {
    pub fn scopes(&self) -> Vec<Scope> {
        match self {
            Role::User => vec![Scope::Read],
            Role::Manager => vec![Scope::Read, Scope::Write, Scope::Delete],
            Role::Admin => vec![Scope::Read, Scope::Write, Scope::Delete, Scope::ReadAny],
        }
    }
}
