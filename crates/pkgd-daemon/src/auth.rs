//! Caller identity and the authorization gate.
//!
//! Every privileged operation starts with
//! [`AuthorizationGate::check_permission`]. The gate asks an
//! [`AuthorizationAuthority`] once per caller and remembers grants for the
//! lifetime of the daemon. Denials and authority failures are never
//! remembered, so a refused caller is asked again on its next call.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{DaemonError, DaemonResult};

/// Unix root.
const ROOT_UID: u32 = 0;

// =============================================================================
// Caller identity
// =============================================================================

/// Credentials of the peer process behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerCredentials {
    /// Effective user id.
    pub uid: u32,
    /// Effective group id.
    pub gid: u32,
    /// Process id, when the platform reports it.
    pub pid: Option<i32>,
}

/// Identity of the invoking peer.
///
/// The name is the lock owner and the authorization cache key; the
/// credentials are only read by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    name: String,
    credentials: Option<PeerCredentials>,
}

impl CallerIdentity {
    /// Creates an identity from a connection name and its credentials.
    pub fn new(name: impl Into<String>, credentials: Option<PeerCredentials>) -> Self {
        Self {
            name: name.into(),
            credentials,
        }
    }

    /// Bus-style unique name of the `n`th connection.
    #[must_use]
    pub fn connection(n: u64, credentials: Option<PeerCredentials>) -> Self {
        Self::new(format!(":1.{n}"), credentials)
    }

    /// Unique caller name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Peer credentials, if known.
    #[must_use]
    pub const fn credentials(&self) -> Option<&PeerCredentials> {
        self.credentials.as_ref()
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// =============================================================================
// Authority
// =============================================================================

/// The authority could not reach a decision.
#[derive(Debug, Error)]
#[error("authorization check failed: {0}")]
pub struct AuthorityError(pub String);

/// External authorization collaborator.
#[async_trait]
pub trait AuthorizationAuthority: Send + Sync {
    /// Returns `Ok(true)` when `caller` may run privileged package
    /// operations.
    async fn check_authorization(&self, caller: &CallerIdentity) -> Result<bool, AuthorityError>;
}

/// Decides from the peer credentials of the connection.
///
/// Root is always allowed; otherwise the peer uid or gid must be listed.
/// Callers without credentials are refused.
#[derive(Debug, Clone, Default)]
pub struct PeerCredentialAuthority {
    allowed_uids: HashSet<u32>,
    allowed_gids: HashSet<u32>,
}

impl PeerCredentialAuthority {
    /// Creates an authority from allow lists.
    #[must_use]
    pub fn new(
        allowed_uids: impl IntoIterator<Item = u32>,
        allowed_gids: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self {
            allowed_uids: allowed_uids.into_iter().collect(),
            allowed_gids: allowed_gids.into_iter().collect(),
        }
    }
}

#[async_trait]
impl AuthorizationAuthority for PeerCredentialAuthority {
    async fn check_authorization(&self, caller: &CallerIdentity) -> Result<bool, AuthorityError> {
        let Some(creds) = caller.credentials() else {
            return Err(AuthorityError(format!(
                "no peer credentials for {caller}"
            )));
        };
        Ok(creds.uid == ROOT_UID
            || self.allowed_uids.contains(&creds.uid)
            || self.allowed_gids.contains(&creds.gid))
    }
}

// =============================================================================
// Gate
// =============================================================================

/// Caches authorization grants per caller name.
pub struct AuthorizationGate {
    authority: Arc<dyn AuthorizationAuthority>,
    granted: Mutex<HashSet<String>>,
}

impl AuthorizationGate {
    /// Creates a gate with an empty cache.
    #[must_use]
    pub fn new(authority: Arc<dyn AuthorizationAuthority>) -> Self {
        Self {
            authority,
            granted: Mutex::new(HashSet::new()),
        }
    }

    /// Checks that `caller` may run privileged operations.
    ///
    /// A cached grant returns immediately. Otherwise the authority is asked
    /// once; only a grant is cached.
    pub async fn check_permission(&self, caller: &CallerIdentity) -> DaemonResult<()> {
        if caller.name().is_empty() {
            return Err(DaemonError::InvalidCaller);
        }
        if self.is_granted(caller) {
            return Ok(());
        }

        match self.authority.check_authorization(caller).await {
            Ok(true) => {
                self.granted_set().insert(caller.name().to_string());
                info!(caller = %caller, "Caller authorized");
                Ok(())
            },
            Ok(false) => {
                warn!(caller = %caller, "Caller not authorized");
                Err(DaemonError::AccessDenied {
                    caller: caller.name().to_string(),
                    reason: "not authorized".to_string(),
                })
            },
            Err(e) => {
                warn!(caller = %caller, error = %e, "Authorization check failed");
                Err(DaemonError::AccessDenied {
                    caller: caller.name().to_string(),
                    reason: e.to_string(),
                })
            },
        }
    }

    /// Returns `true` if `caller` holds a cached grant.
    #[must_use]
    pub fn is_granted(&self, caller: &CallerIdentity) -> bool {
        let granted = self.granted_set().contains(caller.name());
        if granted {
            debug!(caller = %caller, "Using cached authorization");
        }
        granted
    }

    fn granted_set(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // A poisoned set only ever misses an insert; keep serving it.
        self.granted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for AuthorizationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationGate")
            .field("granted", &self.granted_set().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Authority that answers from a script and counts round trips.
    struct Scripted {
        answer: Result<bool, String>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(answer: Result<bool, String>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AuthorizationAuthority for Scripted {
        async fn check_authorization(
            &self,
            _caller: &CallerIdentity,
        ) -> Result<bool, AuthorityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone().map_err(AuthorityError)
        }
    }

    fn caller(name: &str) -> CallerIdentity {
        CallerIdentity::new(name, None)
    }

    #[tokio::test]
    async fn test_grant_is_cached() {
        let authority = Scripted::new(Ok(true));
        let gate = AuthorizationGate::new(authority.clone());

        gate.check_permission(&caller(":1.1")).await.unwrap();
        gate.check_permission(&caller(":1.1")).await.unwrap();
        assert_eq!(authority.calls.load(Ordering::SeqCst), 1);
        assert!(gate.is_granted(&caller(":1.1")));
        assert!(!gate.is_granted(&caller(":1.2")));
    }

    #[tokio::test]
    async fn test_denial_is_not_cached() {
        let authority = Scripted::new(Ok(false));
        let gate = AuthorizationGate::new(authority.clone());

        for _ in 0..2 {
            let err = gate.check_permission(&caller(":1.1")).await.unwrap_err();
            assert!(matches!(err, DaemonError::AccessDenied { .. }));
        }
        assert_eq!(authority.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_authority_failure_is_access_denied() {
        let gate = AuthorizationGate::new(Scripted::new(Err("bus unreachable".into())));
        let err = gate.check_permission(&caller(":1.1")).await.unwrap_err();
        match err {
            DaemonError::AccessDenied { reason, .. } => assert!(reason.contains("bus unreachable")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_caller_skips_authority() {
        let authority = Scripted::new(Ok(true));
        let gate = AuthorizationGate::new(authority.clone());

        let err = gate.check_permission(&caller("")).await.unwrap_err();
        assert!(matches!(err, DaemonError::InvalidCaller));
        assert_eq!(authority.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_peer_credential_policy() {
        let authority = PeerCredentialAuthority::new([1000], [10]);
        let creds = |uid, gid| {
            CallerIdentity::connection(
                1,
                Some(PeerCredentials {
                    uid,
                    gid,
                    pid: Some(4242),
                }),
            )
        };

        assert!(authority.check_authorization(&creds(0, 0)).await.unwrap());
        assert!(authority.check_authorization(&creds(1000, 100)).await.unwrap());
        assert!(authority.check_authorization(&creds(1001, 10)).await.unwrap());
        assert!(!authority.check_authorization(&creds(1001, 100)).await.unwrap());
        assert!(authority.check_authorization(&caller(":1.9")).await.is_err());
    }
}
