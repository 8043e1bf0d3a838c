use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marketplace actor kinds. Matches the `*_kind` discriminator columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum PartyKind {
    Customer,
    Agent,
    Provider,
    Admin,
}

impl PartyKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(PartyKind::Customer),
            "agent" => Some(PartyKind::Agent),
            "provider" => Some(PartyKind::Provider),
            "admin" => Some(PartyKind::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PartyKind::Customer => "customer",
            PartyKind::Agent => "agent",
            PartyKind::Provider => "provider",
            PartyKind::Admin => "admin",
        }
    }
}

/// A strongly typed reference to a marketplace party.
///
/// Ownership checks compare both the kind and the id, so a customer and an
/// agent that happen to share a UUID are never confused for one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PartyRef {
    Customer(Uuid),
    Agent(Uuid),
    Provider(Uuid),
    Admin(Uuid),
}

impl PartyRef {
    pub fn new(kind: PartyKind, id: Uuid) -> Self {
        match kind {
            PartyKind::Customer => PartyRef::Customer(id),
            PartyKind::Agent => PartyRef::Agent(id),
            PartyKind::Provider => PartyRef::Provider(id),
            PartyKind::Admin => PartyRef::Admin(id),
        }
    }

    pub fn kind(&self) -> PartyKind {
        match self {
            PartyRef::Customer(_) => PartyKind::Customer,
            PartyRef::Agent(_) => PartyKind::Agent,
            PartyRef::Provider(_) => PartyKind::Provider,
            PartyRef::Admin(_) => PartyKind::Admin,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            PartyRef::Customer(id)
            | PartyRef::Agent(id)
            | PartyRef::Provider(id)
            | PartyRef::Admin(id) => *id,
        }
    }

    /// Parse "kind:uuid" (e.g. "agent:7f3c...") as sent in the X-Actor header.
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, id) = s.split_once(':')?;
        let kind = PartyKind::from_str(kind.trim())?;
        let id = Uuid::parse_str(id.trim()).ok()?;
        Some(PartyRef::new(kind, id))
    }
}

impl std::fmt::Display for PartyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.id())
    }
}

// ── Tests ───────────────────────────────────────────────────────
