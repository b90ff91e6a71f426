//! Egress Guard
//!
//! Pre-flight validation of every outbound URL. Components call
//! [`EgressGuard::assert_safe`] before issuing a request; a rejection is a
//! [`EgressViolation`] and is never retried.
//!
//! Checks run in order:
//! 1. scheme is `http` or `https`
//! 2. plaintext `http` only when policy allows it (or the host is internal)
//! 3. a host is present
//! 4. the host matches the allowlist, if one is configured
//! 5. every resolved address is outside private/reserved ranges
//!
//! The pre-flight check and the connection resolve the host separately, so
//! HTTP clients also install [`EgressGuard::dns_resolver`]. It applies the
//! same range check to the addresses the connection actually uses, which
//! closes the window for a name that re-resolves to a private address.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::Url;
use thiserror::Error;

use crate::config::RoutingConfig;

/// Why an outbound URL was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EgressViolation {
    /// The URL could not be parsed
    #[error("malformed url {url}: {reason}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Parser message
        reason: String,
    },

    /// Scheme other than http/https
    #[error("scheme '{scheme}' is not allowed")]
    UnsupportedScheme {
        /// Rejected scheme
        scheme: String,
    },

    /// Plaintext http to a non-internal host
    #[error("plaintext http to {host} is not allowed")]
    PlaintextHttp {
        /// Target host
        host: String,
    },

    /// URL without a host component
    #[error("url {url} has no host")]
    MissingHost {
        /// Offending URL
        url: String,
    },

    /// Host outside the configured allowlist
    #[error("host {host} is not in the egress allowlist")]
    NotAllowlisted {
        /// Target host
        host: String,
    },

    /// Host resolves into a blocked address range
    #[error("host {host} resolves to {addr} ({range})")]
    BlockedAddress {
        /// Target host
        host: String,
        /// First blocked address
        addr: IpAddr,
        /// Name of the matched range
        range: &'static str,
    },

    /// DNS lookup failed; treated as unsafe
    #[error("could not resolve {host}: {reason}")]
    ResolutionFailed {
        /// Target host
        host: String,
        /// Resolver message
        reason: String,
    },
}

// ============================================================================
// Policy
// ============================================================================

/// Egress policy derived from [`RoutingConfig`]
#[derive(Debug, Clone, Default)]
pub struct EgressPolicy {
    /// Allowed hosts (and subdomains); empty means no allowlist
    pub allowlist: Vec<String>,
    /// Reject private/reserved resolved addresses
    pub block_private_ranges: bool,
    /// Permit plaintext http to external hosts
    pub allow_plaintext_http: bool,
    /// Configured internal services: plaintext allowed, address and
    /// allowlist checks skipped
    pub internal_hosts: Vec<String>,
}

impl EgressPolicy {
    /// Build the policy from the configuration snapshot
    #[must_use]
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self {
            allowlist: config
                .security
                .egress_allowlist
                .iter()
                .map(|h| h.trim().trim_start_matches("*.").to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            block_private_ranges: config.security.block_private_ranges,
            allow_plaintext_http: config.security.allow_plaintext_http,
            internal_hosts: config.internal_hosts(),
        }
    }

    /// Strictest policy: https only, private ranges blocked, nothing internal
    #[must_use]
    pub fn strict() -> Self {
        Self {
            block_private_ranges: true,
            ..Default::default()
        }
    }

    fn is_internal(&self, host: &str) -> bool {
        self.internal_hosts.iter().any(|h| h == host)
    }

    fn is_allowlisted(&self, host: &str) -> bool {
        self.allowlist.is_empty()
            || self
                .allowlist
                .iter()
                .any(|allowed| host == allowed || host.ends_with(&format!(".{allowed}")))
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolves a hostname to addresses
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Look up every address for `host`
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// System resolver via `tokio::net::lookup_host`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Name of the blocked range `ip` falls in, if any
#[must_use]
pub fn blocked_range(ip: IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => blocked_v4(v4),
        IpAddr::V6(v6) => blocked_v6(v6),
    }
}

fn blocked_v4(ip: Ipv4Addr) -> Option<&'static str> {
    let [a, b, ..] = ip.octets();
    if ip.is_unspecified() || a == 0 {
        Some("unspecified")
    } else if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_private() {
        Some("private")
    } else if ip.is_link_local() {
        Some("link-local")
    } else if a == 100 && (64..128).contains(&b) {
        Some("shared address space")
    } else if ip.is_multicast() {
        Some("multicast")
    } else if ip.is_broadcast()
        || a >= 240
        || ip.is_documentation()
        || (a == 198 && (b == 18 || b == 19))
    {
        Some("reserved")
    } else {
        None
    }
}

/// IPv4 address carried inside a NAT64 (`64:ff9b::/96`) or 6to4
/// (`2002::/16`) address
fn embedded_v4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    let s = ip.segments();
    let pair = |hi: u16, lo: u16| {
        let [a, b] = hi.to_be_bytes();
        let [c, d] = lo.to_be_bytes();
        Ipv4Addr::new(a, b, c, d)
    };
    if s[0] == 0x0064 && s[1] == 0xff9b && s[2..6].iter().all(|&x| x == 0) {
        Some(pair(s[6], s[7]))
    } else if s[0] == 0x2002 {
        Some(pair(s[1], s[2]))
    } else {
        None
    }
}

fn blocked_v6(ip: Ipv6Addr) -> Option<&'static str> {
    if let Some(v4) = ip.to_ipv4_mapped().or_else(|| embedded_v4(ip)) {
        return blocked_v4(v4);
    }
    let first = ip.segments()[0];
    if ip.is_unspecified() {
        Some("unspecified")
    } else if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_multicast() {
        Some("multicast")
    } else if first & 0xfe00 == 0xfc00 {
        Some("private")
    } else if first & 0xffc0 == 0xfe80 {
        Some("link-local")
    } else if first == 0x2001 && ip.segments()[1] == 0x0db8 {
        Some("reserved")
    } else {
        None
    }
}

/// First blocked address in `addrs`, with its range name
fn first_blocked(addrs: &[IpAddr]) -> Option<(IpAddr, &'static str)> {
    addrs
        .iter()
        .find_map(|&addr| blocked_range(addr).map(|range| (addr, range)))
}

/// Connection-time resolver that enforces the egress policy
///
/// Installed on every outbound HTTP client, so the addresses a connection
/// dials pass the same range check as the pre-flight lookup.
#[derive(Clone)]
pub struct GuardedResolver {
    policy: EgressPolicy,
    resolver: Arc<dyn HostResolver>,
}

impl std::fmt::Debug for GuardedResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedResolver")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl GuardedResolver {
    /// Resolve `host` and refuse any blocked address
    ///
    /// Internal hosts resolve unchecked, as does everything when private
    /// range blocking is off. Ports are left at zero; the client fills in the
    /// URL's port.
    ///
    /// # Errors
    ///
    /// [`EgressViolation::ResolutionFailed`] when the lookup fails or is
    /// empty, [`EgressViolation::BlockedAddress`] when any address is in a
    /// blocked range.
    pub async fn resolve_checked(&self, host: &str) -> Result<Vec<SocketAddr>, EgressViolation> {
        let addrs = self
            .resolver
            .resolve(host, 0)
            .await
            .map_err(|e| EgressViolation::ResolutionFailed {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        let checked = self.policy.block_private_ranges && !self.policy.is_internal(host);
        if checked {
            if addrs.is_empty() {
                return Err(EgressViolation::ResolutionFailed {
                    host: host.to_string(),
                    reason: "no addresses".to_string(),
                });
            }
            if let Some((addr, range)) = first_blocked(&addrs) {
                tracing::warn!(
                    host = %host,
                    addr = %addr,
                    range,
                    "Connection to blocked address refused"
                );
                return Err(EgressViolation::BlockedAddress {
                    host: host.to_string(),
                    addr,
                    range,
                });
            }
        }
        Ok(addrs.into_iter().map(|ip| SocketAddr::new(ip, 0)).collect())
    }
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let this = self.clone();
        Box::pin(async move {
            let addrs = this.resolve_checked(name.as_str()).await?;
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok(addrs)
        })
    }
}

// ============================================================================
// Guard
// ============================================================================

/// Mandatory pre-flight check for outbound requests
#[derive(Clone)]
pub struct EgressGuard {
    policy: EgressPolicy,
    resolver: Arc<dyn HostResolver>,
}

impl std::fmt::Debug for EgressGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EgressGuard")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl EgressGuard {
    /// Guard using the system resolver
    #[must_use]
    pub fn new(policy: EgressPolicy) -> Self {
        Self::with_resolver(policy, Arc::new(SystemResolver))
    }

    /// Guard with an explicit resolver
    #[must_use]
    pub fn with_resolver(policy: EgressPolicy, resolver: Arc<dyn HostResolver>) -> Self {
        Self { policy, resolver }
    }

    /// Guard built from the configuration snapshot
    #[must_use]
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new(EgressPolicy::from_config(config))
    }

    /// Active policy
    #[must_use]
    pub fn policy(&self) -> &EgressPolicy {
        &self.policy
    }

    /// Resolver for HTTP clients, enforcing this policy at connect time
    #[must_use]
    pub fn dns_resolver(&self) -> GuardedResolver {
        GuardedResolver {
            policy: self.policy.clone(),
            resolver: Arc::clone(&self.resolver),
        }
    }

    /// Validate `url` before it is requested
    ///
    /// # Errors
    ///
    /// Returns the first [`EgressViolation`] encountered. DNS failures are
    /// violations.
    pub async fn assert_safe(&self, url: &str, purpose: &str) -> Result<(), EgressViolation> {
        let result = self.check(url).await;
        if let Err(ref violation) = result {
            tracing::warn!(purpose = %purpose, reason = %violation, "Outbound request blocked");
        }
        result
    }

    async fn check(&self, url: &str) -> Result<(), EgressViolation> {
        let parsed = Url::parse(url).map_err(|e| EgressViolation::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(EgressViolation::UnsupportedScheme {
                scheme: scheme.to_string(),
            });
        }

        // Url lower-cases domain hosts; IPv6 literals keep their brackets
        let host = match parsed.host_str() {
            Some(h) if !h.is_empty() => h.trim_start_matches('[').trim_end_matches(']'),
            _ => {
                return Err(EgressViolation::MissingHost {
                    url: url.to_string(),
                })
            }
        };
        let internal = self.policy.is_internal(host);

        if scheme == "http" && !self.policy.allow_plaintext_http && !internal {
            return Err(EgressViolation::PlaintextHttp {
                host: host.to_string(),
            });
        }

        if internal {
            return Ok(());
        }

        if !self.policy.is_allowlisted(host) {
            return Err(EgressViolation::NotAllowlisted {
                host: host.to_string(),
            });
        }

        if !self.policy.block_private_ranges {
            return Ok(());
        }

        let addrs = match host.parse::<IpAddr>() {
            Ok(ip) => vec![ip],
            Err(_) => {
                let port = parsed.port_or_known_default().unwrap_or(443);
                self.resolver
                    .resolve(host, port)
                    .await
                    .map_err(|e| EgressViolation::ResolutionFailed {
                        host: host.to_string(),
                        reason: e.to_string(),
                    })?
            }
        };

        if addrs.is_empty() {
            return Err(EgressViolation::ResolutionFailed {
                host: host.to_string(),
                reason: "no addresses".to_string(),
            });
        }

        match first_blocked(&addrs) {
            Some((addr, range)) => Err(EgressViolation::BlockedAddress {
                host: host.to_string(),
                addr,
                range,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticResolver(HashMap<&'static str, Vec<IpAddr>>);

    #[async_trait]
    impl HostResolver for StaticResolver {
        async fn resolve(&self, host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
            self.0.get(host).cloned().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such host")
            })
        }
    }

    fn guard(policy: EgressPolicy) -> EgressGuard {
        let mut table = HashMap::new();
        table.insert("api.example.com", vec!["93.184.216.34".parse().unwrap()]);
        table.insert("rebind.example.com", vec!["10.0.0.7".parse().unwrap()]);
        EgressGuard::with_resolver(policy, Arc::new(StaticResolver(table)))
    }

    #[tokio::test]
    async fn test_metadata_endpoint_blocked_without_allowlist() {
        let g = guard(EgressPolicy::strict());
        let err = g
            .assert_safe("http://169.254.169.254/latest/meta-data", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, EgressViolation::PlaintextHttp { .. }));

        // Even with plaintext permitted the address itself is refused
        let g = guard(EgressPolicy {
            allow_plaintext_http: true,
            ..EgressPolicy::strict()
        });
        let err = g
            .assert_safe("http://169.254.169.254/latest/meta-data", "x")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EgressViolation::BlockedAddress {
                range: "link-local",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_scheme_and_host_checks() {
        let g = guard(EgressPolicy::strict());
        assert!(matches!(
            g.assert_safe("file:///etc/passwd", "x").await,
            Err(EgressViolation::UnsupportedScheme { .. })
        ));
        assert!(matches!(
            g.assert_safe("not a url", "x").await,
            Err(EgressViolation::InvalidUrl { .. })
        ));
        assert!(g.assert_safe("https://api.example.com/v1", "x").await.is_ok());
    }

    #[tokio::test]
    async fn test_allowlist_accepts_subdomains_only() {
        let g = guard(EgressPolicy {
            allowlist: vec!["example.com".into()],
            ..EgressPolicy::strict()
        });
        assert!(g.assert_safe("https://api.example.com/", "x").await.is_ok());
        assert!(matches!(
            g.assert_safe("https://evilexample.com/", "x").await,
            Err(EgressViolation::NotAllowlisted { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolution_failure_fails_closed() {
        let g = guard(EgressPolicy::strict());
        assert!(matches!(
            g.assert_safe("https://unknown.invalid/", "x").await,
            Err(EgressViolation::ResolutionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_hostname_resolving_to_private_range_is_blocked() {
        let g = guard(EgressPolicy::strict());
        assert!(matches!(
            g.assert_safe("https://rebind.example.com/", "x").await,
            Err(EgressViolation::BlockedAddress {
                range: "private",
                ..
            })
        ));
    }

    /// Answers with a public address once, then a private one
    struct FlippingResolver {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl HostResolver for FlippingResolver {
        async fn resolve(&self, _host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
            let ip = if self.lookups.fetch_add(1, Ordering::SeqCst) == 0 {
                "93.184.216.34"
            } else {
                "169.254.169.254"
            };
            Ok(vec![ip.parse().unwrap()])
        }
    }

    #[tokio::test]
    async fn test_connect_time_resolution_rechecks_addresses() {
        let g = EgressGuard::with_resolver(
            EgressPolicy::strict(),
            Arc::new(FlippingResolver {
                lookups: AtomicUsize::new(0),
            }),
        );
        assert!(g.assert_safe("https://flip.example.com/", "x").await.is_ok());

        let err = g
            .dns_resolver()
            .resolve_checked("flip.example.com")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EgressViolation::BlockedAddress {
                range: "link-local",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_connect_time_resolution_follows_policy() {
        let resolver = guard(EgressPolicy::strict()).dns_resolver();
        let addrs = resolver.resolve_checked("api.example.com").await.unwrap();
        assert_eq!(addrs, vec!["93.184.216.34:0".parse::<SocketAddr>().unwrap()]);
        assert!(resolver.resolve_checked("unknown.invalid").await.is_err());

        let internal = guard(EgressPolicy {
            internal_hosts: vec!["rebind.example.com".into()],
            ..EgressPolicy::strict()
        })
        .dns_resolver();
        assert!(internal.resolve_checked("rebind.example.com").await.is_ok());

        let open = guard(EgressPolicy::default()).dns_resolver();
        assert!(open.resolve_checked("rebind.example.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_internal_hosts_bypass_address_checks() {
        let g = guard(EgressPolicy {
            internal_hosts: vec!["localhost".into()],
            ..EgressPolicy::strict()
        });
        assert!(g.assert_safe("http://localhost:8080/health", "x").await.is_ok());
        assert!(g.assert_safe("http://127.0.0.1:8080/health", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_private_range_blocking_can_be_disabled() {
        let g = guard(EgressPolicy {
            block_private_ranges: false,
            ..EgressPolicy::strict()
        });
        assert!(g.assert_safe("https://10.1.2.3/", "x").await.is_ok());
    }

    #[test]
    fn test_blocked_ranges() {
        let cases = [
            ("127.0.0.1", Some("loopback")),
            ("10.0.0.1", Some("private")),
            ("172.16.5.4", Some("private")),
            ("192.168.1.1", Some("private")),
            ("100.64.0.1", Some("shared address space")),
            ("224.0.0.1", Some("multicast")),
            ("0.0.0.0", Some("unspecified")),
            ("255.255.255.255", Some("reserved")),
            ("::1", Some("loopback")),
            ("fd00::1", Some("private")),
            ("fe80::1", Some("link-local")),
            ("::ffff:10.0.0.1", Some("private")),
            ("64:ff9b::a00:1", Some("private")),
            ("64:ff9b::a9fe:a9fe", Some("link-local")),
            ("2002:a00:1::1", Some("private")),
            ("2002:7f00:1::", Some("loopback")),
            ("64:ff9b::808:808", None),
            ("2002:808:808::1", None),
            ("8.8.8.8", None),
            ("2606:4700::1111", None),
        ];
        for (addr, expected) in cases {
            let ip: IpAddr = addr.parse().unwrap();
            assert_eq!(blocked_range(ip), expected, "{addr}");
        }
    }
}
