//! Component "Config" (spec §6 "Configuration inputs"): named-value
//! lookups the gateway reads from a host configuration service (an
//! environment-like store, out of scope to parse — spec §1 lists it among
//! the external collaborators).
//!
//! Generalized from the teacher's `ServerConfig`/`WebSocketConfig`
//! (a typed settings struct with sane defaults) into the gateway's
//! five named-value keys (`*_ENABLE`, `*_SSO`, `*_ANNOUNCE`, `*_ALERT`,
//! `*_IDLE`), each parsed per spec §6's grammar.

use std::env;

use crate::error::Error;

/// Where named values come from. A trait so tests (and, eventually, the
/// CGI harness's real logical-name service) can supply lookups without
/// this crate depending on that harness.
pub trait ConfigSource {
    fn lookup(&self, name: &str) -> Option<String>;
    fn lookup_multi(&self, name: &str) -> Vec<String>;
}

/// Reads `<PROG>_<SUFFIX>` from the process environment; multi-valued
/// names are modeled as `<PROG>_<SUFFIX>_0`, `<PROG>_<SUFFIX>_1`, ...
/// until a lookup misses, mirroring the logical-name-table idiom the
/// original's host environment uses for repeated names.
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn lookup(&self, name: &str) -> Option<String> {
        env::var(name).ok()
    }

    fn lookup_multi(&self, name: &str) -> Vec<String> {
        let mut values = Vec::new();
        let mut i = 0;
        while let Ok(value) = env::var(format!("{name}_{i}")) {
            values.push(value);
            i += 1;
        }
        values
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRule {
    Any,
    Exact(std::net::IpAddr),
    Cidr { network: std::net::IpAddr, prefix_len: u8 },
    AllowCleartext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsoRule {
    Allow { realm: String, users: Vec<String> },
    Deny { realm: String, user: String },
    AllowAnyUnprivileged(String),
    AllowAny(String),
    DenyAllUnmapped(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleConfig {
    pub idle_mins: i32,
    pub warn_mins: i32,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self { idle_mins: 120, warn_mins: 5 }
    }
}

pub struct Config<'a> {
    source: &'a dyn ConfigSource,
    prog: String,
}

impl<'a> Config<'a> {
    pub fn new(source: &'a dyn ConfigSource, prog: impl Into<String>) -> Self {
        Self { source, prog: prog.into() }
    }

    fn named(&self, suffix: &str) -> String {
        format!("{}_{}", self.prog, suffix)
    }

    /// `<prog>_ENABLE`: access-control rules. Undefined means "refuse to
    /// admit" (spec §6), surfaced as [`Error::ConfigUndefined`].
    pub fn access_rules(&self) -> Result<Vec<AccessRule>, Error> {
        let raw = self
            .source
            .lookup(&self.named("ENABLE"))
            .ok_or_else(|| Error::ConfigUndefined(self.named("ENABLE")))?;

        Ok(raw.split(',').map(str::trim).filter(|s| !s.is_empty()).filter_map(parse_access_rule).collect())
    }

    /// `<prog>_SSO`: single-sign-on mapping, 0..127 values.
    pub fn sso_rules(&self) -> Vec<SsoRule> {
        self.source.lookup_multi(&self.named("SSO")).iter().filter_map(|v| parse_sso_rule(v)).collect()
    }

    /// `<prog>_ANNOUNCE`: banner lines appended after successful SSO.
    pub fn announce_lines(&self) -> Vec<String> {
        self.source.lookup_multi(&self.named("ANNOUNCE"))
    }

    /// `<prog>_ALERT`: current broadcast alert, if any.
    pub fn alert(&self) -> Option<String> {
        self.source.lookup(&self.named("ALERT")).filter(|s| !s.is_empty())
    }

    /// `<prog>_IDLE`: `<idle-mins>,<warn-mins>,<warn-message>`. Returns the
    /// parsed numeric fields and the warn message separately (spec §4.8's
    /// `%d` substitution is the caller's job, done against `warn_mins`).
    pub fn idle(&self) -> (IdleConfig, String) {
        let default_message = "Your session will be disconnected in %d minutes".to_string();
        let Some(raw) = self.source.lookup(&self.named("IDLE")) else {
            return (IdleConfig::default(), default_message);
        };

        let mut parts = raw.splitn(3, ',');
        let idle_mins = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(120);
        let warn_mins = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(5);
        let warn_message = parts.next().map(str::to_string).unwrap_or(default_message);

        (IdleConfig { idle_mins, warn_mins }, warn_message)
    }
}

fn parse_access_rule(token: &str) -> Option<AccessRule> {
    if token == "*" {
        return Some(AccessRule::Any);
    }
    if token == "ws:" {
        return Some(AccessRule::AllowCleartext);
    }
    if let Some((network, prefix)) = token.split_once('/') {
        let network = network.parse().ok()?;
        let prefix_len = prefix.parse().ok()?;
        return Some(AccessRule::Cidr { network, prefix_len });
    }
    token.parse().ok().map(AccessRule::Exact)
}

fn parse_sso_rule(token: &str) -> Option<SsoRule> {
    let (realm, users) = token.split_once('=')?;
    let realm = realm.to_string();
    if users == "!*" {
        return Some(SsoRule::DenyAllUnmapped(realm));
    }
    if users == "**" {
        return Some(SsoRule::AllowAny(realm));
    }
    if users == "*" {
        return Some(SsoRule::AllowAnyUnprivileged(realm));
    }
    if let Some(denied) = users.strip_prefix('!') {
        return Some(SsoRule::Deny { realm, user: denied.to_string() });
    }
    Some(SsoRule::Allow { realm, users: users.split(',').map(str::to_string).collect() })
}
