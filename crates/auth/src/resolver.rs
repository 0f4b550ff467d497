//! Route → permission resolution.
//!
//! The mapping from `(method, path)` to a required permission is a single
//! ordered table ([`ROUTE_RULES`]). Rules are evaluated top to bottom and the
//! first match wins, so fine-grained sub-action rules sit above the general
//! resource rule they refine.
//!
//! - No IO
//! - No panics
//! - Total: unmatched input resolves to `None` (no permission required)

use crate::permissions::{codes, PermissionCode};

/// HTTP verb, as far as permission resolution cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Other,
}

impl Method {
    /// Case-insensitive parse. Unknown verbs become [`Method::Other`].
    pub fn parse(method: &str) -> Self {
        const KNOWN: [(&str, Method); 5] = [
            ("GET", Method::Get),
            ("POST", Method::Post),
            ("PUT", Method::Put),
            ("PATCH", Method::Patch),
            ("DELETE", Method::Delete),
        ];

        KNOWN
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(method))
            .map(|(_, m)| *m)
            .unwrap_or(Method::Other)
    }
}

/// One path segment of a rule pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seg {
    /// Literal segment, compared exactly.
    Lit(&'static str),
    /// Path parameter: exactly one non-empty segment.
    Param,
}

impl Seg {
    fn matches(&self, segment: &str) -> bool {
        match self {
            Seg::Lit(lit) => *lit == segment,
            Seg::Param => !segment.is_empty(),
        }
    }
}

/// Path predicate of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPattern {
    /// The path has exactly these segments.
    Exact(&'static [Seg]),
    /// The path starts with these segments (whole segments only).
    Prefix(&'static [Seg]),
}

impl PathPattern {
    fn matches(&self, segments: &[&str]) -> bool {
        let (pattern, exact) = match self {
            PathPattern::Exact(p) => (*p, true),
            PathPattern::Prefix(p) => (*p, false),
        };

        if segments.len() < pattern.len() || (exact && segments.len() != pattern.len()) {
            return false;
        }

        pattern.iter().zip(segments).all(|(seg, actual)| seg.matches(actual))
    }
}

/// Method predicate of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodMatch {
    Any,
    Only(Method),
    Except(Method),
}

impl MethodMatch {
    fn matches(&self, method: Method) -> bool {
        match self {
            MethodMatch::Any => true,
            MethodMatch::Only(m) => *m == method,
            MethodMatch::Except(m) => *m != method,
        }
    }
}

/// Ordered predicate over `(method, path)` mapping to a permission (or none).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    /// Stable label, used in logs and tests.
    pub name: &'static str,
    pub method: MethodMatch,
    pub path: PathPattern,
    /// `None` means the route is explicitly public.
    pub permission: Option<PermissionCode>,
}

impl RouteRule {
    pub fn matches(&self, method: Method, segments: &[&str]) -> bool {
        self.method.matches(method) && self.path.matches(segments)
    }
}

const V1: Seg = Seg::Lit("v1");
const ANY: MethodMatch = MethodMatch::Any;
const GET: MethodMatch = MethodMatch::Only(Method::Get);
const POST: MethodMatch = MethodMatch::Only(Method::Post);
const NOT_GET: MethodMatch = MethodMatch::Except(Method::Get);

const fn rule(
    name: &'static str,
    method: MethodMatch,
    path: PathPattern,
    permission: Option<PermissionCode>,
) -> RouteRule {
    RouteRule {
        name,
        method,
        path,
        permission,
    }
}

const fn exact(segments: &'static [Seg]) -> PathPattern {
    PathPattern::Exact(segments)
}

const fn prefix(segments: &'static [Seg]) -> PathPattern {
    PathPattern::Prefix(segments)
}

/// The route table, in evaluation order.
pub static ROUTE_RULES: &[RouteRule] = &[
    // Public surfaces.
    rule("auth", ANY, prefix(&[V1, Seg::Lit("auth")]), None),
    rule("events", ANY, prefix(&[V1, Seg::Lit("events")]), None),
    rule("health", ANY, prefix(&[Seg::Lit("health")]), None),
    rule("health.v1", ANY, prefix(&[V1, Seg::Lit("health")]), None),
    // RBAC / team management.
    rule("rbac", ANY, prefix(&[V1, Seg::Lit("rbac")]), Some(codes::RBAC_MANAGE)),
    rule("team", ANY, prefix(&[V1, Seg::Lit("team")]), Some(codes::RBAC_MANAGE)),
    // Workspaces.
    rule(
        "workspaces.list",
        GET,
        exact(&[V1, Seg::Lit("workspaces"), Seg::Lit("list")]),
        Some(codes::RBAC_MANAGE),
    ),
    rule("workspaces.read", GET, prefix(&[V1, Seg::Lit("workspaces")]), None),
    rule(
        "workspaces.write",
        NOT_GET,
        prefix(&[V1, Seg::Lit("workspaces")]),
        Some(codes::RBAC_MANAGE),
    ),
    // WhatsApp account sub-actions.
    rule(
        "wa_accounts.connect",
        POST,
        exact(&[V1, Seg::Lit("wa-accounts"), Seg::Param, Seg::Lit("connect")]),
        Some(codes::WA_ACCOUNTS_CONNECT),
    ),
    rule(
        "wa_accounts.reconnect",
        POST,
        exact(&[V1, Seg::Lit("wa-accounts"), Seg::Param, Seg::Lit("reconnect")]),
        Some(codes::WA_ACCOUNTS_RECONNECT),
    ),
    rule(
        "wa_accounts.reset_creds",
        POST,
        exact(&[V1, Seg::Lit("wa-accounts"), Seg::Param, Seg::Lit("reset-creds")]),
        Some(codes::WA_ACCOUNTS_RESET_CREDS),
    ),
    rule(
        "wa_accounts.qr",
        GET,
        exact(&[V1, Seg::Lit("wa-accounts"), Seg::Param, Seg::Lit("qr")]),
        Some(codes::WA_ACCOUNTS_READ),
    ),
    // WhatsApp accounts.
    rule(
        "wa_accounts.read",
        GET,
        prefix(&[V1, Seg::Lit("wa-accounts")]),
        Some(codes::WA_ACCOUNTS_READ),
    ),
    rule(
        "wa_accounts.write",
        ANY,
        prefix(&[V1, Seg::Lit("wa-accounts")]),
        Some(codes::WA_ACCOUNTS_WRITE),
    ),
    // Campaigns.
    rule(
        "campaigns.start",
        POST,
        exact(&[V1, Seg::Lit("campaigns"), Seg::Param, Seg::Lit("start")]),
        Some(codes::CAMPAIGNS_RUN),
    ),
    rule(
        "campaigns.pause",
        POST,
        exact(&[V1, Seg::Lit("campaigns"), Seg::Param, Seg::Lit("pause")]),
        Some(codes::CAMPAIGNS_PAUSE),
    ),
    rule(
        "campaigns.cancel",
        POST,
        exact(&[V1, Seg::Lit("campaigns"), Seg::Param, Seg::Lit("cancel")]),
        Some(codes::CAMPAIGNS_CANCEL),
    ),
    rule(
        "campaigns.read",
        GET,
        prefix(&[V1, Seg::Lit("campaigns")]),
        Some(codes::CAMPAIGNS_READ),
    ),
    rule(
        "campaigns.write",
        ANY,
        prefix(&[V1, Seg::Lit("campaigns")]),
        Some(codes::CAMPAIGNS_WRITE),
    ),
    // Auto-replies.
    rule(
        "auto_reply.test",
        POST,
        exact(&[V1, Seg::Lit("auto-replies"), Seg::Lit("test")]),
        Some(codes::AUTO_REPLY_TEST),
    ),
    rule(
        "auto_reply.test_rule",
        POST,
        exact(&[V1, Seg::Lit("auto-replies"), Seg::Param, Seg::Lit("test")]),
        Some(codes::AUTO_REPLY_TEST),
    ),
    rule(
        "auto_reply.read",
        GET,
        prefix(&[V1, Seg::Lit("auto-replies")]),
        Some(codes::AUTO_REPLY_READ),
    ),
    rule(
        "auto_reply.write",
        ANY,
        prefix(&[V1, Seg::Lit("auto-replies")]),
        Some(codes::AUTO_REPLY_WRITE),
    ),
    // Contacts.
    rule(
        "contacts.import",
        ANY,
        prefix(&[V1, Seg::Lit("contacts"), Seg::Lit("import")]),
        Some(codes::CONTACTS_IMPORT),
    ),
    rule(
        "contacts.export",
        POST,
        exact(&[V1, Seg::Lit("contacts"), Seg::Lit("export")]),
        Some(codes::REPORTS_EXPORT),
    ),
    rule(
        "contacts.messages",
        GET,
        exact(&[V1, Seg::Lit("contacts"), Seg::Param, Seg::Lit("messages")]),
        Some(codes::CONTACTS_READ),
    ),
    rule(
        "contacts.read",
        GET,
        prefix(&[V1, Seg::Lit("contacts")]),
        Some(codes::CONTACTS_READ),
    ),
    rule(
        "contacts.write",
        ANY,
        prefix(&[V1, Seg::Lit("contacts")]),
        Some(codes::CONTACTS_WRITE),
    ),
    // Tags.
    rule("tags.read", GET, prefix(&[V1, Seg::Lit("tags")]), Some(codes::CONTACTS_READ)),
    rule("tags.write", ANY, prefix(&[V1, Seg::Lit("tags")]), Some(codes::CONTACTS_WRITE)),
    // Messaging.
    rule(
        "messages.threads",
        GET,
        exact(&[V1, Seg::Lit("messages"), Seg::Lit("threads")]),
        Some(codes::CONTACTS_READ),
    ),
    rule(
        "messages.send",
        POST,
        exact(&[V1, Seg::Lit("messages"), Seg::Lit("send")]),
        Some(codes::CONTACTS_WRITE),
    ),
    rule(
        "messages",
        ANY,
        prefix(&[V1, Seg::Lit("messages")]),
        Some(codes::CONTACTS_WRITE),
    ),
    // Audit log.
    rule("audit", ANY, prefix(&[V1, Seg::Lit("audit")]), Some(codes::AUDIT_READ)),
    // Report exports.
    rule(
        "reports.exports.read",
        GET,
        prefix(&[V1, Seg::Lit("reports"), Seg::Lit("exports")]),
        Some(codes::REPORTS_READ),
    ),
    rule(
        "reports.exports.create",
        ANY,
        prefix(&[V1, Seg::Lit("reports"), Seg::Lit("exports")]),
        Some(codes::REPORTS_EXPORT),
    ),
    // Operational read surfaces.
    rule("dlq", ANY, prefix(&[V1, Seg::Lit("dlq")]), Some(codes::REPORTS_READ)),
    rule("analytics", ANY, prefix(&[V1, Seg::Lit("analytics")]), Some(codes::REPORTS_READ)),
    rule("metrics", ANY, prefix(&[V1, Seg::Lit("metrics")]), Some(codes::AUDIT_READ)),
];

/// Download sub-path of a report export: `/v1/reports/exports/:id/download`.
static REPORT_DOWNLOAD: PathPattern = PathPattern::Exact(&[
    V1,
    Seg::Lit("reports"),
    Seg::Lit("exports"),
    Seg::Param,
    Seg::Lit("download"),
]);

/// Split a request path into its non-empty segments, ignoring any query string.
pub fn segments(path: &str) -> Vec<&str> {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// The first rule matching `(method, path)`, if any.
pub fn matching_rule(method: Method, path: &str) -> Option<&'static RouteRule> {
    let segments = segments(path);
    ROUTE_RULES.iter().find(|rule| rule.matches(method, &segments))
}

/// Resolve the permission required for `(method, path)`.
///
/// `None` means no permission is required, either because a public rule
/// matched or because nothing matched at all.
pub fn resolve(method: Method, path: &str) -> Option<PermissionCode> {
    matching_rule(method, path).and_then(|rule| rule.permission.clone())
}

/// Whether `path` is a report-export download link.
pub fn is_report_download(path: &str) -> bool {
    REPORT_DOWNLOAD.matches(&segments(path))
}
