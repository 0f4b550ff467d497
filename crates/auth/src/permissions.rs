use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Permission code.
///
/// Codes are opaque `resource:action` strings (e.g. `reports:export`).
/// Equality is exact string match: there is no wildcard and no hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionCode(Cow<'static, str>);

impl PermissionCode {
    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    pub const fn from_static(code: &'static str) -> Self {
        Self(Cow::Borrowed(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `resource` half of `resource:action`, if the code is namespaced.
    pub fn resource(&self) -> Option<&str> {
        self.0.split_once(':').map(|(resource, _)| resource)
    }
}

impl core::fmt::Display for PermissionCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for PermissionCode {
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

/// A caller's effective permission codes within one workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<PermissionCode>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, code: &PermissionCode) -> bool {
        self.0.contains(code)
    }

    pub fn insert(&mut self, code: PermissionCode) -> bool {
        self.0.insert(code)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PermissionCode> {
        self.0.iter()
    }
}

impl FromIterator<PermissionCode> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = PermissionCode>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Well-known permission codes.
pub mod codes {
    use super::PermissionCode;

    pub const RBAC_MANAGE: PermissionCode = PermissionCode::from_static("rbac:manage");

    pub const WA_ACCOUNTS_READ: PermissionCode = PermissionCode::from_static("wa_accounts:read");
    pub const WA_ACCOUNTS_WRITE: PermissionCode = PermissionCode::from_static("wa_accounts:write");
    pub const WA_ACCOUNTS_CONNECT: PermissionCode =
        PermissionCode::from_static("wa_accounts:connect");
    pub const WA_ACCOUNTS_RECONNECT: PermissionCode =
        PermissionCode::from_static("wa_accounts:reconnect");
    pub const WA_ACCOUNTS_RESET_CREDS: PermissionCode =
        PermissionCode::from_static("wa_accounts:reset_creds");

    pub const CAMPAIGNS_READ: PermissionCode = PermissionCode::from_static("campaigns:read");
    pub const CAMPAIGNS_WRITE: PermissionCode = PermissionCode::from_static("campaigns:write");
    pub const CAMPAIGNS_RUN: PermissionCode = PermissionCode::from_static("campaigns:run");
    pub const CAMPAIGNS_PAUSE: PermissionCode = PermissionCode::from_static("campaigns:pause");
    pub const CAMPAIGNS_CANCEL: PermissionCode = PermissionCode::from_static("campaigns:cancel");

    pub const AUTO_REPLY_READ: PermissionCode = PermissionCode::from_static("auto_reply:read");
    pub const AUTO_REPLY_WRITE: PermissionCode = PermissionCode::from_static("auto_reply:write");
    pub const AUTO_REPLY_TEST: PermissionCode = PermissionCode::from_static("auto_reply:test");

    pub const CONTACTS_READ: PermissionCode = PermissionCode::from_static("contacts:read");
    pub const CONTACTS_WRITE: PermissionCode = PermissionCode::from_static("contacts:write");
    pub const CONTACTS_IMPORT: PermissionCode = PermissionCode::from_static("contacts:import");

    pub const AUDIT_READ: PermissionCode = PermissionCode::from_static("audit:read");

    pub const REPORTS_READ: PermissionCode = PermissionCode::from_static("reports:read");
    pub const REPORTS_EXPORT: PermissionCode = PermissionCode::from_static("reports:export");
}
