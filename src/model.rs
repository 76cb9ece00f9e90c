use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    Corporation,
    Character,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::Corporation => "corporation",
            OwnerKind::Character => "character",
        }
    }

    /// Column that holds the owner ID in every synced table.
    pub fn column(&self) -> &'static str {
        match self {
            OwnerKind::Corporation => "corporation_id",
            OwnerKind::Character => "character_id",
        }
    }
}

/// The corporation or character a sync run is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Corporation(i64),
    Character(i64),
}

impl Owner {
    pub fn new(kind: OwnerKind, id: i64) -> Self {
        match kind {
            OwnerKind::Corporation => Owner::Corporation(id),
            OwnerKind::Character => Owner::Character(id),
        }
    }

    pub fn kind(&self) -> OwnerKind {
        match self {
            Owner::Corporation(_) => OwnerKind::Corporation,
            Owner::Character(_) => OwnerKind::Character,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Owner::Corporation(id) | Owner::Character(id) => *id,
        }
    }

    pub fn column(&self) -> &'static str {
        self.kind().column()
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.id())
    }
}

/// Identity of one sync run: the owner plus the resource being synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncScope {
    pub owner: Owner,
    pub resource: &'static str,
}

impl SyncScope {
    pub fn new(owner: Owner, resource: &'static str) -> Self {
        Self { owner, resource }
    }
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.resource)
    }
}

/// What an owner's token is allowed to read. Token issuance and refresh
/// happen elsewhere; this only carries the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Credentials {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.is_empty() || roles.iter().any(|r| self.roles.iter().any(|held| held == r))
    }
}
