//! Request-time access gate.
//!
//! Combines the route resolver with a live permission lookup. The gate owns
//! no HTTP types; the API layer feeds it the method, path and the `token`
//! query value and maps the outcome onto status codes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::debug;

use wacrm_core::{UserId, WorkspaceId};

use crate::permissions::{PermissionCode, PermissionSet};
use crate::resolver::{self, Method};

/// Authenticated caller, as established by the auth layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: UserId,
    pub workspace_id: WorkspaceId,
}

/// Request-scoped context threaded through the gate into handlers.
///
/// `permissions` is filled by the gate whenever it had to look them up, so
/// handlers can reuse the set instead of querying again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub auth: Option<AuthContext>,
    pub permissions: Option<PermissionSet>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(auth: AuthContext) -> Self {
        Self {
            auth: Some(auth),
            permissions: None,
        }
    }

    /// Whether the (already looked-up) permission set contains `code`.
    pub fn has_permission(&self, code: &PermissionCode) -> bool {
        self.permissions.as_ref().is_some_and(|p| p.contains(code))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("permission lookup failed: {0}")]
    Backend(String),
}

/// Source of a user's current permission codes within a workspace.
///
/// Implementations must reflect current state: nothing is cached beyond the
/// request (or job) that asked.
pub trait PermissionLookup: Send + Sync {
    fn permission_codes(
        &self,
        user_id: UserId,
        workspace_id: WorkspaceId,
    ) -> Result<PermissionSet, LookupError>;
}

impl<L> PermissionLookup for Arc<L>
where
    L: PermissionLookup + ?Sized,
{
    fn permission_codes(
        &self,
        user_id: UserId,
        workspace_id: WorkspaceId,
    ) -> Result<PermissionSet, LookupError> {
        (**self).permission_codes(user_id, workspace_id)
    }
}

/// Why a request was let through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// The route requires no permission.
    Public,
    /// Unauthenticated download carrying a link token; the download handler
    /// verifies the token itself.
    DownloadToken,
    /// The caller holds the required code.
    Granted(PermissionCode),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("authentication required for '{required}'")]
    Unauthenticated { required: PermissionCode },

    #[error("Forbidden: missing permission '{required}'")]
    Forbidden { required: PermissionCode },

    #[error(transparent)]
    Lookup(#[from] LookupError),
}

impl AccessError {
    /// The permission the request needed.
    pub fn required(&self) -> Option<&PermissionCode> {
        match self {
            AccessError::Unauthenticated { required } | AccessError::Forbidden { required } => {
                Some(required)
            }
            AccessError::Lookup(_) => None,
        }
    }
}

/// Allow/deny decision for inbound requests.
#[derive(Debug, Clone)]
pub struct AccessGate<L> {
    lookup: L,
}

impl<L: PermissionLookup> AccessGate<L> {
    pub fn new(lookup: L) -> Self {
        Self { lookup }
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    /// Decide whether the request may proceed.
    ///
    /// On the permission path the looked-up set is attached to `ctx`, whether
    /// the request is then allowed or not.
    pub fn check(
        &self,
        ctx: &mut RequestContext,
        method: Method,
        path: &str,
        download_token: Option<&str>,
    ) -> Result<Access, AccessError> {
        let Some(required) = resolver::resolve(method, path) else {
            return Ok(Access::Public);
        };

        let Some(auth) = ctx.auth else {
            if download_token.is_some_and(|t| !t.is_empty()) && resolver::is_report_download(path) {
                debug!(path, "report download admitted by link token");
                return Ok(Access::DownloadToken);
            }
            return Err(AccessError::Unauthenticated { required });
        };

        let permissions = self
            .lookup
            .permission_codes(auth.user_id, auth.workspace_id)?;
        let allowed = permissions.contains(&required);
        ctx.permissions = Some(permissions);

        if allowed {
            Ok(Access::Granted(required))
        } else {
            debug!(
                user_id = %auth.user_id,
                workspace_id = %auth.workspace_id,
                required = %required,
                "access denied"
            );
            Err(AccessError::Forbidden { required })
        }
    }
}

/// In-memory permission grants for tests/dev.
#[derive(Debug, Default)]
pub struct StaticPermissions {
    grants: RwLock<HashMap<(UserId, WorkspaceId), PermissionSet>>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, user_id: UserId, workspace_id: WorkspaceId, code: PermissionCode) {
        self.grants
            .write()
            .unwrap()
            .entry((user_id, workspace_id))
            .or_default()
            .insert(code);
    }

    /// Replace the caller's whole set (e.g. to simulate a revocation).
    pub fn set(&self, user_id: UserId, workspace_id: WorkspaceId, codes: PermissionSet) {
        self.grants
            .write()
            .unwrap()
            .insert((user_id, workspace_id), codes);
    }
}

impl PermissionLookup for StaticPermissions {
    fn permission_codes(
        &self,
        user_id: UserId,
        workspace_id: WorkspaceId,
    ) -> Result<PermissionSet, LookupError> {
        Ok(self
            .grants
            .read()
            .unwrap()
            .get(&(user_id, workspace_id))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::permissions::codes;

    /// Counts lookups so tests can assert the public path never consults it.
    #[derive(Default)]
    struct CountingLookup {
        inner: StaticPermissions,
        calls: AtomicUsize,
    }

    impl PermissionLookup for CountingLookup {
        fn permission_codes(
            &self,
            user_id: UserId,
            workspace_id: WorkspaceId,
        ) -> Result<PermissionSet, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.permission_codes(user_id, workspace_id)
        }
    }

    struct FailingLookup;

    impl PermissionLookup for FailingLookup {
        fn permission_codes(&self, _: UserId, _: WorkspaceId) -> Result<PermissionSet, LookupError> {
            Err(LookupError::Backend("db down".into()))
        }
    }

    fn caller() -> AuthContext {
        AuthContext {
            user_id: UserId::new(),
            workspace_id: WorkspaceId::new(),
        }
    }

    #[test]
    fn public_routes_skip_lookup() {
        let gate = AccessGate::new(CountingLookup::default());
        let mut ctx = RequestContext::anonymous();

        let access = gate.check(&mut ctx, Method::Get, "/health", None).unwrap();
        assert_eq!(access, Access::Public);

        let mut ctx = RequestContext::authenticated(caller());
        gate.check(&mut ctx, Method::Post, "/v1/auth/login", None).unwrap();

        assert_eq!(gate.lookup().calls.load(Ordering::SeqCst), 0);
        assert!(ctx.permissions.is_none());
    }

    #[test]
    fn granted_attaches_permission_set() {
        let auth = caller();
        let lookup = CountingLookup::default();
        lookup.inner.grant(auth.user_id, auth.workspace_id, codes::REPORTS_READ);
        let gate = AccessGate::new(lookup);

        let mut ctx = RequestContext::authenticated(auth);
        let access = gate.check(&mut ctx, Method::Get, "/v1/reports/exports", None).unwrap();

        assert_eq!(access, Access::Granted(codes::REPORTS_READ));
        assert!(ctx.has_permission(&codes::REPORTS_READ));
        assert_eq!(gate.lookup().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_code_is_forbidden_with_required_code() {
        let auth = caller();
        let lookup = StaticPermissions::new();
        lookup.grant(auth.user_id, auth.workspace_id, codes::WA_ACCOUNTS_WRITE);
        let gate = AccessGate::new(lookup);

        let mut ctx = RequestContext::authenticated(auth);
        let err = gate
            .check(&mut ctx, Method::Post, "/v1/wa-accounts/abc/connect", None)
            .unwrap_err();

        assert_eq!(
            err,
            AccessError::Forbidden {
                required: codes::WA_ACCOUNTS_CONNECT
            }
        );
        assert_eq!(err.required(), Some(&codes::WA_ACCOUNTS_CONNECT));
        // The set is attached even on deny.
        assert!(ctx.has_permission(&codes::WA_ACCOUNTS_WRITE));
    }

    #[test]
    fn anonymous_download_with_token_is_admitted() {
        let gate = AccessGate::new(CountingLookup::default());
        let mut ctx = RequestContext::anonymous();

        let access = gate
            .check(&mut ctx, Method::Get, "/v1/reports/exports/e1/download", Some("tok"))
            .unwrap();

        assert_eq!(access, Access::DownloadToken);
        assert_eq!(gate.lookup().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn token_bypass_is_limited_to_download_paths() {
        let gate = AccessGate::new(StaticPermissions::new());

        let mut ctx = RequestContext::anonymous();
        let err = gate
            .check(&mut ctx, Method::Get, "/v1/reports/exports", Some("tok"))
            .unwrap_err();
        assert!(matches!(err, AccessError::Unauthenticated { .. }));

        let mut ctx = RequestContext::anonymous();
        let err = gate
            .check(&mut ctx, Method::Get, "/v1/reports/exports/e1/download", Some(""))
            .unwrap_err();
        assert!(matches!(err, AccessError::Unauthenticated { .. }));
    }

    #[test]
    fn authenticated_download_uses_permissions_not_token() {
        let gate = AccessGate::new(StaticPermissions::new());
        let mut ctx = RequestContext::authenticated(caller());

        let err = gate
            .check(&mut ctx, Method::Get, "/v1/reports/exports/e1/download", Some("tok"))
            .unwrap_err();

        assert_eq!(
            err,
            AccessError::Forbidden {
                required: codes::REPORTS_READ
            }
        );
    }

    #[test]
    fn lookup_failure_surfaces() {
        let gate = AccessGate::new(FailingLookup);
        let mut ctx = RequestContext::authenticated(caller());

        let err = gate.check(&mut ctx, Method::Get, "/v1/contacts", None).unwrap_err();
        assert!(matches!(err, AccessError::Lookup(_)));
        assert!(ctx.permissions.is_none());
    }
}
