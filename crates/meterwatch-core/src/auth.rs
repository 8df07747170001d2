//! Authentication context shared by every API call.
//!
//! The credential is opaque: it is obtained outside this program and is
//! never refreshed or inspected here. The only state transition is
//! "accepted" to "rejected", triggered by the API refusing it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Holds the merchant credential and whether the API has rejected it.
///
/// The rejected flag is sticky for the lifetime of the process.
pub struct AuthContext {
    token: String,
    rejected: AtomicBool,
}

impl AuthContext {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            rejected: AtomicBool::new(false),
        }
    }

    /// The credential, unchanged from construction.
    pub fn credential(&self) -> &str {
        &self.token
    }

    /// Record that the API refused the credential.
    pub fn mark_rejected(&self) {
        self.rejected.store(true, Ordering::SeqCst);
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("token", &"<redacted>")
            .field("rejected", &self.is_rejected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_not_rejected() {
        let auth = AuthContext::new("secret");
        assert!(!auth.is_rejected());
        assert_eq!(auth.credential(), "secret");
    }

    #[test]
    fn test_rejection_is_sticky() {
        let auth = AuthContext::new("secret");
        auth.mark_rejected();
        auth.mark_rejected();
        assert!(auth.is_rejected());
        assert_eq!(auth.credential(), "secret");
    }

    #[test]
    fn test_debug_redacts_token() {
        let auth = AuthContext::new("super-secret-token");
        let debug = format!("{:?}", auth);
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("redacted"));
    }
}
