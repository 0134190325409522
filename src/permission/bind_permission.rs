use std::fmt;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

use config::ConfigError;
use tracing::debug;
use tracing::trace;

use crate::listener::resolve_ip;
use crate::AddressFamily;
use crate::BindTarget;
use crate::Error;
use crate::PermissionConfig;
use crate::Result;

/// Host part of an allow rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRule {
    /// `*`
    Any,
    Ip(IpAddr),
    /// `ip/prefix` or `ip/dotted-mask`
    Network(IpNetwork),
    /// Host name or unix socket path, compared literally
    Name(String),
}

/// Port part of an allow rule. A missing port means every port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRule {
    Any,
    Exact(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    network: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    pub fn new(
        addr: IpAddr,
        prefix: u8,
    ) -> Option<Self> {
        if prefix > max_prefix(&addr) {
            return None;
        }
        let network = match addr {
            IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(u32::from(v4) & v4_mask(prefix))),
            IpAddr::V6(v6) => IpAddr::V6(Ipv6Addr::from(u128::from(v6) & v6_mask(prefix))),
        };
        Some(Self { network, prefix })
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn contains(
        &self,
        ip: &IpAddr,
    ) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => u32::from(*ip) & v4_mask(self.prefix) == u32::from(net),
            (IpAddr::V6(net), IpAddr::V6(ip)) => u128::from(*ip) & v6_mask(self.prefix) == u128::from(net),
            _ => false,
        }
    }

    fn covers(
        &self,
        other: &IpNetwork,
    ) -> bool {
        other.prefix >= self.prefix && self.contains(&other.network)
    }
}

fn max_prefix(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn v4_mask(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0)
}

fn v6_mask(prefix: u8) -> u128 {
    u128::MAX.checked_shl(128 - prefix as u32).unwrap_or(0)
}

/// One `host[/mask][:port]` allow rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetRule {
    host: HostRule,
    port: PortRule,
}

impl NetRule {
    pub fn host(&self) -> &HostRule {
        &self.host
    }

    pub fn port(&self) -> PortRule {
        self.port
    }

    /// Parses `*`, `host`, `host:port`, `host:*`, `*:port`,
    /// `ip/mask[:port]`, `[ipv6][/prefix][:port]` and unix socket paths.
    pub fn parse(rule: &str) -> std::result::Result<Self, String> {
        let rule = rule.trim();
        if rule.is_empty() {
            return Err("empty rule".into());
        }
        if rule.starts_with('/') || rule.starts_with('.') {
            return Ok(Self {
                host: HostRule::Name(rule.to_string()),
                port: PortRule::Any,
            });
        }
        // Bare IPv6 address without brackets or port
        if let Ok(ip) = rule.parse::<Ipv6Addr>() {
            return Ok(Self {
                host: HostRule::Ip(IpAddr::V6(ip)),
                port: PortRule::Any,
            });
        }

        let (host, mask, port) = match rule.strip_prefix('[') {
            Some(rest) => {
                let (host, rest) = rest.split_once(']').ok_or("unterminated '['")?;
                let (mask, port) = match rest.split_once(':') {
                    Some((mask, port)) => (mask, Some(port)),
                    None => (rest, None),
                };
                let mask = match mask {
                    "" => None,
                    m => Some(m.strip_prefix('/').ok_or("unexpected text after ']'")?),
                };
                (host, mask, port)
            }
            None => {
                let (host_mask, port) = match rule.rsplit_once(':') {
                    Some((host_mask, port)) => (host_mask, Some(port)),
                    None => (rule, None),
                };
                match host_mask.split_once('/') {
                    Some((host, mask)) => (host, Some(mask), port),
                    None => (host_mask, None, port),
                }
            }
        };

        Ok(Self {
            host: parse_host(host, mask)?,
            port: parse_port(port)?,
        })
    }

    fn covers(
        &self,
        query: &NetRule,
    ) -> bool {
        host_covers(&self.host, &query.host) && port_covers(self.port, query.port)
    }
}

fn parse_host(
    host: &str,
    mask: Option<&str>,
) -> std::result::Result<HostRule, String> {
    if host.is_empty() {
        return Err("missing host".into());
    }
    if host == "*" {
        return match mask {
            None | Some("*") => Ok(HostRule::Any),
            Some(_) => Err("netmask requires an IP address".into()),
        };
    }
    let ip = host.parse::<IpAddr>().ok();
    match (ip, mask) {
        (Some(ip), None) => Ok(HostRule::Ip(ip)),
        (None, None) => Ok(HostRule::Name(host.to_ascii_lowercase())),
        (None, Some(_)) => Err(format!("netmask requires an IP address, got {host:?}")),
        (Some(ip), Some(mask)) => {
            let prefix = parse_prefix(&ip, mask)?;
            IpNetwork::new(ip, prefix)
                .map(HostRule::Network)
                .ok_or_else(|| format!("prefix /{prefix} too long for {ip}"))
        }
    }
}

/// Accepts a prefix length or a contiguous dotted/colon mask of the same
/// family as `ip`.
fn parse_prefix(
    ip: &IpAddr,
    mask: &str,
) -> std::result::Result<u8, String> {
    if !mask.is_empty() && mask.bytes().all(|b| b.is_ascii_digit()) {
        return mask.parse::<u8>().map_err(|_| format!("invalid prefix length {mask:?}"));
    }
    let bits = match (ip, mask.parse::<IpAddr>()) {
        (IpAddr::V4(_), Ok(IpAddr::V4(m))) => (u32::from(m) as u128) << 96,
        (IpAddr::V6(_), Ok(IpAddr::V6(m))) => u128::from(m),
        _ => return Err(format!("invalid netmask {mask:?}")),
    };
    let prefix = bits.leading_ones();
    if bits.checked_shl(prefix).unwrap_or(0) != 0 {
        return Err(format!("netmask {mask:?} is not contiguous"));
    }
    Ok(prefix as u8)
}

fn parse_port(port: Option<&str>) -> std::result::Result<PortRule, String> {
    match port {
        None | Some("") | Some("*") => Ok(PortRule::Any),
        Some(p) => p
            .parse::<u16>()
            .map(PortRule::Exact)
            .map_err(|_| format!("invalid port {p:?}")),
    }
}

fn host_covers(
    rule: &HostRule,
    query: &HostRule,
) -> bool {
    match (rule, query) {
        (HostRule::Any, _) => true,
        (_, HostRule::Any) => false,
        (HostRule::Ip(a), HostRule::Ip(b)) => a == b,
        (HostRule::Ip(a), HostRule::Network(n)) => n.prefix() == max_prefix(a) && n.network() == *a,
        (HostRule::Network(n), HostRule::Ip(ip)) => n.contains(ip),
        (HostRule::Network(n), HostRule::Network(m)) => n.covers(m),
        (HostRule::Name(a), HostRule::Name(b)) => a == b,
        _ => false,
    }
}

fn port_covers(
    rule: PortRule,
    query: PortRule,
) -> bool {
    match (rule, query) {
        (PortRule::Any, _) => true,
        (PortRule::Exact(a), PortRule::Exact(b)) => a == b,
        (PortRule::Exact(_), PortRule::Any) => false,
    }
}

impl fmt::Display for NetRule {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.host {
            HostRule::Any => write!(f, "*")?,
            HostRule::Ip(IpAddr::V6(ip)) => write!(f, "[{ip}]")?,
            HostRule::Ip(ip) => write!(f, "{ip}")?,
            HostRule::Network(n) => match n.network() {
                IpAddr::V6(ip) => write!(f, "[{ip}]/{}", n.prefix())?,
                ip => write!(f, "{ip}/{}", n.prefix())?,
            },
            HostRule::Name(name) => write!(f, "{name}")?,
        }
        match self.port {
            PortRule::Any => write!(f, ":*"),
            PortRule::Exact(p) => write!(f, ":{p}"),
        }
    }
}

/// Allow-list of bind targets.
///
/// A disabled policy grants everything. An enabled policy denies
/// everything until rules are granted; `*` (or `*/*`) grants everything.
#[derive(Debug, Clone, Default)]
pub struct BindPermission {
    enabled: bool,
    allow_all: bool,
    rules: Vec<NetRule>,
}

impl BindPermission {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn deny_all() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    /// Rules are parsed even when the policy is disabled so a malformed
    /// rule is reported at startup.
    pub fn from_config(config: &PermissionConfig) -> Result<Self> {
        let mut permission = Self::deny_all();
        for rules in &config.allow {
            permission.grant(rules)?;
        }
        permission.enabled = config.enabled;
        debug!(
            enabled = permission.enabled,
            rules = permission.rules.len(),
            allow_all = permission.allow_all,
            "bind permission loaded"
        );
        Ok(permission)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rules(&self) -> &[NetRule] {
        &self.rules
    }

    /// Grants a comma-separated list of rules.
    pub fn grant(
        &mut self,
        rules: &str,
    ) -> Result<()> {
        for raw in rules.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            if raw == "*" || raw == "*/*" {
                self.allow_all = true;
                self.rules.clear();
                continue;
            }
            let rule = NetRule::parse(raw).map_err(|reason| {
                Error::Config(ConfigError::Message(format!(
                    "invalid bind permission rule {raw:?}: {reason}"
                )))
            })?;
            if self.allow_all {
                continue;
            }
            self.insert(rule);
        }
        Ok(())
    }

    fn insert(
        &mut self,
        rule: NetRule,
    ) {
        // An every-port rule for a host absorbs the host's narrower rules.
        let host_all_ports = NetRule {
            host: rule.host.clone(),
            port: PortRule::Any,
        };
        if self.rules.contains(&host_all_ports) || self.rules.contains(&rule) {
            return;
        }
        if rule.port == PortRule::Any {
            self.rules.retain(|r| r.host != rule.host);
        }
        trace!(%rule, "bind rule granted");
        self.rules.push(rule);
    }

    /// Whether `resource` (same syntax as a rule) is covered. An empty
    /// resource asks whether every target is allowed.
    pub fn has(
        &self,
        resource: &str,
    ) -> bool {
        if !self.enabled || self.allow_all {
            return true;
        }
        if resource.trim().is_empty() {
            return false;
        }
        match NetRule::parse(resource) {
            Ok(query) => self.covers(&query),
            Err(_) => false,
        }
    }

    /// Whether a worker may attach to `target`.
    pub fn is_granted(
        &self,
        target: &BindTarget,
    ) -> bool {
        if !self.enabled || self.allow_all {
            return true;
        }
        let queries = match target.family() {
            AddressFamily::Unix => vec![NetRule {
                host: HostRule::Name(target.address().to_string()),
                port: PortRule::Any,
            }],
            AddressFamily::Ipv4 | AddressFamily::Ipv6 => {
                let port = PortRule::Exact(target.port());
                let mut queries = Vec::with_capacity(2);
                if let Ok(ip) = resolve_ip(target) {
                    queries.push(NetRule {
                        host: HostRule::Ip(ip),
                        port,
                    });
                }
                if target.address().parse::<IpAddr>().is_err() && !target.address().is_empty() {
                    queries.push(NetRule {
                        host: HostRule::Name(target.address().to_ascii_lowercase()),
                        port,
                    });
                }
                queries
            }
        };
        queries.iter().any(|q| self.covers(q))
    }

    fn covers(
        &self,
        query: &NetRule,
    ) -> bool {
        self.rules.iter().any(|rule| rule.covers(query))
    }
}
