//! Address guard.
//!
//! # Responsibilities
//! - Resolve a URL's host to every address it maps to
//! - Classify each address against internal and reserved ranges (IPv4 and IPv6)
//! - Deny the URL if any address is disallowed or resolution fails
//!
//! # Design Decisions
//! - Verdicts are never cached; name-to-address bindings can change between
//!   requests and between redirect hops
//! - An allowed verdict carries the verified addresses so the connection can
//!   be pinned to exactly what was checked
//! - Resolution is behind the [`Resolve`] trait so tests need no DNS

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use url::{Host, Url};

use crate::config::GuardConfig;
use crate::relay::error::PRIVATE_ADDRESS_DENIED;

/// Name resolution used by the guard.
pub trait Resolve: Send + Sync {
    /// Resolve `host` to socket addresses on `port`.
    fn resolve<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, io::Result<Vec<SocketAddr>>>;
}

/// Resolver backed by the operating system (`getaddrinfo` via Tokio).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, io::Result<Vec<SocketAddr>>> {
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((host, port)).await?;
            Ok(addrs.collect())
        })
    }
}

/// Outcome of verifying one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressVerdict {
    /// Every resolved address is public; connect only to these.
    Allowed(Vec<SocketAddr>),
    /// The URL must not be fetched.
    Denied(String),
}

impl AddressVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AddressVerdict::Allowed(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            AddressVerdict::Allowed(_) => None,
            AddressVerdict::Denied(reason) => Some(reason),
        }
    }
}

/// Validates that a URL points at public address space.
#[derive(Clone)]
pub struct AddressGuard {
    resolver: Arc<dyn Resolve>,
    trusted: Arc<[IpAddr]>,
}

impl std::fmt::Debug for AddressGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressGuard")
            .field("trusted", &self.trusted)
            .finish_non_exhaustive()
    }
}

impl AddressGuard {
    /// Create a guard using the system resolver.
    pub fn new(config: &GuardConfig) -> Self {
        Self::with_resolver(config, Arc::new(SystemResolver))
    }

    /// Create a guard with a custom resolver.
    pub fn with_resolver(config: &GuardConfig, resolver: Arc<dyn Resolve>) -> Self {
        Self {
            resolver,
            trusted: config.trusted_addresses.clone().into(),
        }
    }

    /// Resolve and classify the target of `url`.
    pub async fn verify(&self, url: &Url) -> AddressVerdict {
        match url.scheme() {
            "http" | "https" => {}
            other => return AddressVerdict::Denied(format!("unsupported url scheme: {}", other)),
        }
        let Some(port) = url.port_or_known_default() else {
            return AddressVerdict::Denied("url has no port".to_string());
        };

        let addrs = match url.host() {
            None => return AddressVerdict::Denied("url has no host".to_string()),
            Some(Host::Ipv4(ip)) => vec![SocketAddr::new(IpAddr::V4(ip), port)],
            Some(Host::Ipv6(ip)) => vec![SocketAddr::new(IpAddr::V6(ip), port)],
            Some(Host::Domain(name)) => match self.resolver.resolve(name, port).await {
                Ok(addrs) if !addrs.is_empty() => addrs,
                Ok(_) => return AddressVerdict::Denied(format!("no addresses found for {}", name)),
                Err(e) => return AddressVerdict::Denied(format!("unable to resolve {}: {}", name, e)),
            },
        };

        if let Some(addr) = addrs.iter().find(|a| !self.is_trusted(a.ip()) && is_disallowed(a.ip())) {
            tracing::info!(url = %url, address = %addr.ip(), "Rejected private address");
            return AddressVerdict::Denied(PRIVATE_ADDRESS_DENIED.to_string());
        }

        tracing::trace!(url = %url, addresses = ?addrs, "Address verified");
        AddressVerdict::Allowed(addrs)
    }

    fn is_trusted(&self, ip: IpAddr) -> bool {
        self.trusted.contains(&ip)
    }
}

/// Returns true if `ip` lies in a range the relay must never connect to.
pub fn is_disallowed(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_disallowed_v4(v4),
        IpAddr::V6(v6) => is_disallowed_v6(v6),
    }
}

fn is_disallowed_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();

    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_documentation()
        // 0.0.0.0/8 "this network"
        || octets[0] == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (64..=127).contains(&octets[1]))
        // 192.0.0.0/24 IETF protocol assignments
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
        // 198.18.0.0/15 benchmarking
        || (octets[0] == 198 && (18..=19).contains(&octets[1]))
        // 240.0.0.0/4 reserved
        || octets[0] >= 240
}

fn is_disallowed_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_disallowed_v4(v4);
    }

    let segments = ip.segments();

    // ::a.b.c.d (deprecated IPv4-compatible) and 64:ff9b::/96 (NAT64)
    let embeds_v4 = segments[..6] == [0, 0, 0, 0, 0, 0]
        || segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0];
    if embeds_v4 && !ip.is_unspecified() && !ip.is_loopback() {
        let [a, b] = segments[6].to_be_bytes();
        let [c, d] = segments[7].to_be_bytes();
        return is_disallowed_v4(Ipv4Addr::new(a, b, c, d));
    }

    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (segments[0] & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (segments[0] & 0xffc0) == 0xfe80
        // fec0::/10 deprecated site-local
        || (segments[0] & 0xffc0) == 0xfec0
        // 2001:db8::/32 documentation
        || (segments[0] == 0x2001 && segments[1] == 0x0db8)
}
