use crate::models::{AccountIdentity, Tier};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use dashmap::DashMap;
use rand::RngCore;

struct PendingTicket {
    account_id: String,
    tier: Tier,
    expires_at: i64,
}

/// One-time exchange tokens for the streaming handshake. A client
/// trades its bearer credential for a short-lived opaque ticket over
/// POST, then presents the ticket in the first WebSocket frame, so
/// long-lived credentials never ride in URLs or access logs.
pub struct TicketIssuer {
    tickets: DashMap<String, PendingTicket>,
    ttl_secs: i64,
}

impl TicketIssuer {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            tickets: DashMap::new(),
            ttl_secs,
        }
    }

    pub fn issue(&self, identity: &AccountIdentity) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let ticket = URL_SAFE_NO_PAD.encode(bytes);
        self.tickets.insert(
            ticket.clone(),
            PendingTicket {
                account_id: identity.account_id.clone(),
                tier: identity.tier,
                expires_at: chrono::Utc::now().timestamp() + self.ttl_secs,
            },
        );
        ticket
    }

    /// Single use: the remove is the redemption, so two racing
    /// handshakes with one ticket admit exactly one.
    pub fn redeem(&self, ticket: &str) -> Option<AccountIdentity> {
        let (_, pending) = self.tickets.remove(ticket)?;
        if pending.expires_at <= chrono::Utc::now().timestamp() {
            return None;
        }
        Some(AccountIdentity {
            account_id: pending.account_id,
            tier: pending.tier,
        })
    }

    pub fn purge_expired(&self) -> usize {
        let now = chrono::Utc::now().timestamp();
        let before = self.tickets.len();
        self.tickets.retain(|_, t| t.expires_at > now);
        before - self.tickets.len()
    }
}
