pub mod authority;
pub mod claims;
pub mod denylist;
pub mod ticket;

pub use authority::{CredentialPair, TokenAuthority};
pub use claims::{Claims, TokenKind};
pub use denylist::RevocationList;
pub use ticket::TicketIssuer;

use sha2::Digest;

/// Password verification itself is an external concern; the stored
/// digest comparison below is the stand-in at that boundary.
pub fn hash_password(password: &str) -> String {
    format!("{:x}", sha2::Sha256::digest(password.as_bytes()))
}

pub fn password_matches(password: &str, stored_hash: &str) -> bool {
    constant_time_str_eq(&hash_password(password), stored_hash)
}

pub(crate) fn constant_time_str_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    let max_len = left_bytes.len().max(right_bytes.len());
    let mut diff = left_bytes.len() ^ right_bytes.len();

    for i in 0..max_len {
        let l = left_bytes.get(i).copied().unwrap_or(0);
        let r = right_bytes.get(i).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }

    diff == 0
}
