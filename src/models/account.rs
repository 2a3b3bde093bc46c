use serde::{Deserialize, Serialize};

/// Subscription tier. Limits and concurrency caps come from
/// `TierPolicy` in the config so deployments can tune them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Starter,
    Professional,
    Agency,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Starter => "starter",
            Tier::Professional => "professional",
            Tier::Agency => "agency",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "starter" => Some(Tier::Starter),
            "professional" => Some(Tier::Professional),
            "agency" => Some(Tier::Agency),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub tier: Tier,
    pub created_at: i64,
}

impl Account {
    pub fn new(id: String, email: String, password_hash: String, tier: Tier) -> Self {
        Self {
            id,
            email,
            password_hash,
            tier,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Verified caller identity, attached to requests by the auth
/// middleware and to WebSocket sessions by ticket redemption.
#[derive(Debug, Clone)]
pub struct AccountIdentity {
    pub account_id: String,
    pub tier: Tier,
}
