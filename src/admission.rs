//! Component "Admission" (spec §6 "Status/exit" behaviour): applies
//! already-parsed [`crate::config::Config`] rules to an already-
//! authenticated request's remote address and mapped identity, and
//! decides whether the gateway proceeds to open a [`crate::session::Session`].
//!
//! No teacher analogue (the teacher never performed host-level admission
//! checks); built from the rule grammar spec §6 defines. Authentication
//! itself — verifying *who* the remote user is — is explicitly out of
//! scope (spec §1 Non-goals); this module only ever consumes already-
//! authenticated attributes.

use std::net::IpAddr;

use crate::config::{AccessRule, Config, SsoRule};

/// The only `Sec-WebSocket-Version` this gateway understands (spec §6
/// "on version mismatch").
pub const SUPPORTED_VERSION: &str = "13";

/// What the gateway should tell the harness to do with this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Proceed to accept the WebSocket upgrade (status 101).
    Admit,
    /// No matching access rule, cleartext without `ws:` permission, or
    /// configuration undefined: reply 403.
    Forbidden,
    /// `Sec-WebSocket-Version` doesn't match `SUPPORTED_VERSION`: reply 426.
    UpgradeRequired,
}

/// Attributes the CGI harness hands over after completing the HTTP
/// upgrade handshake and any transport-layer TLS negotiation (spec §1:
/// "the core consumes ... a map of named request attributes").
pub struct RequestAttributes {
    pub remote_addr: IpAddr,
    pub is_cleartext: bool,
    pub ws_version: String,
}

pub fn evaluate(config: &Config, request: &RequestAttributes) -> AdmissionDecision {
    if request.ws_version != SUPPORTED_VERSION {
        return AdmissionDecision::UpgradeRequired;
    }

    let rules = match config.access_rules() {
        Ok(rules) => rules,
        Err(_) => return AdmissionDecision::Forbidden,
    };

    let address_allowed = rules.iter().any(|rule| matches_address(rule, request.remote_addr));
    if !address_allowed {
        return AdmissionDecision::Forbidden;
    }

    if request.is_cleartext && !rules.contains(&AccessRule::AllowCleartext) {
        return AdmissionDecision::Forbidden;
    }

    AdmissionDecision::Admit
}

/// Renders the literal HTTP status line (plus any required header) the
/// harness writes back for a decision (spec §6 "Status/exit").
pub fn status_line(config: &Config, decision: &AdmissionDecision) -> String {
    match decision {
        AdmissionDecision::Admit => "Status: 101 Switching Protocols\r\n\r\n".to_string(),
        AdmissionDecision::UpgradeRequired => {
            format!("Status: 426 Upgrade Required\r\nSec-Websocket-Version: {SUPPORTED_VERSION}\r\n\r\n")
        }
        AdmissionDecision::Forbidden => match config.access_rules() {
            Err(e) => format!("Status: 403 {}\r\n\r\n", e.reason()),
            Ok(_) => "Status: 403 access denied\r\n\r\n".to_string(),
        },
    }
}

fn matches_address(rule: &AccessRule, addr: IpAddr) -> bool {
    match rule {
        AccessRule::Any => true,
        AccessRule::Exact(allowed) => *allowed == addr,
        AccessRule::Cidr { network, prefix_len } => address_in_cidr(addr, *network, *prefix_len),
        AccessRule::AllowCleartext => false,
    }
}

fn address_in_cidr(addr: IpAddr, network: IpAddr, prefix_len: u8) -> bool {
    match (addr, network) {
        (IpAddr::V4(a), IpAddr::V4(n)) => {
            let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len.min(32)) };
            (u32::from(a) & mask) == (u32::from(n) & mask)
        }
        (IpAddr::V6(a), IpAddr::V6(n)) => {
            let mask = if prefix_len == 0 { 0u128 } else { u128::MAX << (128 - prefix_len.min(128)) };
            (u128::from(a) & mask) == (u128::from(n) & mask)
        }
        _ => false,
    }
}

/// What an SSO lookup resolved to for `(realm, user)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsoResolution {
    /// Spawn a shell directly under `user`, skipping the login prompt.
    MappedUser(String),
    /// No SSO rule matched; fall back to a login-prompting terminal.
    NoMapping,
    /// An explicit deny rule matched.
    Denied,
}

/// Resolves `<prog>_SSO` rules for one `(realm, user)` pair (spec §4.8
/// "if a single-sign-on rule matches ... spawn a detached interactive
/// shell process under the mapped host user account").
pub fn resolve_sso(config: &Config, realm: &str, user: &str) -> SsoResolution {
    for rule in config.sso_rules() {
        match rule {
            SsoRule::Deny { realm: r, user: u } if r == realm && u == user => {
                return SsoResolution::Denied;
            }
            SsoRule::Allow { realm: r, users } if r == realm && users.iter().any(|u| u == user) => {
                return SsoResolution::MappedUser(user.to_string());
            }
            SsoRule::AllowAnyUnprivileged(r) if r == realm => {
                return SsoResolution::MappedUser(user.to_string());
            }
            SsoRule::AllowAny(r) if r == realm => {
                return SsoResolution::MappedUser(user.to_string());
            }
            SsoRule::DenyAllUnmapped(r) if r == realm => return SsoResolution::Denied,
            _ => {}
        }
    }
    SsoResolution::NoMapping
}
