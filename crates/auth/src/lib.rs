//! `wacrm-auth`: route permission resolution and the request access gate.
//!
//! This crate is intentionally decoupled from HTTP frameworks and storage.

pub mod claims;
pub mod download;
pub mod gate;
pub mod permissions;
pub mod resolver;

pub use claims::{validate_window, AccessClaims, Hs256JwtValidator, JwtValidator, TokenError};
pub use download::{DownloadClaims, DownloadTokens};
pub use gate::{
    Access, AccessError, AccessGate, AuthContext, LookupError, PermissionLookup, RequestContext,
    StaticPermissions,
};
pub use permissions::{codes, PermissionCode, PermissionSet};
pub use resolver::{resolve, Method, RouteRule, ROUTE_RULES};
