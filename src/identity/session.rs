use parking_lot::RwLock;
use std::collections::HashSet;

/// Server-side record of revoked refresh-token identifiers.
///
/// Access tokens are never revoked (they expire), so the only thing worth
/// remembering is which refresh `jti`s logout has invalidated. Owned by the
/// server state and passed explicitly, not a module global.
#[derive(Debug, Default)]
pub struct RevocationLedger {
    revoked: RwLock<HashSet<String>>,
}

impl RevocationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a revocation. Returns false if the id was already revoked.
    pub fn revoke(&self, jti: &str) -> bool {
        self.revoked.write().insert(jti.to_string())
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        self.revoked.read().contains(jti)
    }
}
