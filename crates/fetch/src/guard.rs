use crate::error::{ErrorKind, Result};
use crate::ip::is_public;
use crate::sanitize::{has_forbidden_chars, sanitize_for_log};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use url::{Host, Url};

/// Hostname suffixes that only ever name machines on a private network.
const LOCAL_SUFFIXES: &[&str] = &[
    ".localhost",
    ".local",
    ".localdomain",
    ".internal",
    ".intranet",
    ".lan",
    ".home.arpa",
    ".corp",
];

/// Name resolution used by [`UrlGuard`]. Swappable so tests never touch DNS.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>>;
}

/// Resolves through the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolve for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

/// A URL that passed every check, together with the addresses it was
/// checked against. Connections must go to exactly these addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeUrl {
    url: Url,
    addrs: Vec<SocketAddr>,
}
impl SafeUrl {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Domain to pin, `None` for IP-literal URLs.
    pub fn domain(&self) -> Option<&str> {
        self.url.domain()
    }
}

/// Server-side request forgery filter.
///
/// Checks run cheapest first and the first failure wins:
/// 1. raw input characters;
/// 2. scheme, host presence, no embedded credentials;
/// 3. local-only hostnames (after IDNA normalisation by the URL parser);
/// 4. non-public IP literals;
/// 5. every resolved address of a hostname.
#[derive(Clone)]
pub struct UrlGuard {
    resolver: Arc<dyn Resolve>,
    permit: fn(IpAddr) -> bool,
}

impl std::fmt::Debug for UrlGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlGuard").finish_non_exhaustive()
    }
}

impl Default for UrlGuard {
    fn default() -> Self {
        Self::new(Arc::new(SystemResolver))
    }
}

impl UrlGuard {
    pub fn new(resolver: Arc<dyn Resolve>) -> Self {
        Self { resolver, permit: is_public }
    }

    /// A guard with a different address policy, for exercising the fetch
    /// path against servers on loopback.
    #[cfg(test)]
    pub(crate) fn permitting(resolver: Arc<dyn Resolve>, permit: fn(IpAddr) -> bool) -> Self {
        Self { resolver, permit }
    }

    pub async fn is_safe(&self, raw: &str) -> bool {
        self.validate(raw).await.is_ok()
    }

    pub async fn validate(&self, raw: &str) -> Result<SafeUrl> {
        let url = parse_static(raw, self.permit)?;
        let port = url.port_or_known_default().ok_or_else(|| unsafe_url("no port for scheme"))?;
        let addrs = match url.host() {
            Some(Host::Ipv4(ip)) => vec![SocketAddr::new(IpAddr::V4(ip), port)],
            Some(Host::Ipv6(ip)) => vec![SocketAddr::new(IpAddr::V6(ip), port)],
            Some(Host::Domain(domain)) => self.resolve_public(domain, port).await?,
            None => exn::bail!(ErrorKind::Unsafe("missing host".to_string())),
        };
        tracing::debug!(url = %sanitize_for_log(raw), ?addrs, "URL passed safety checks");
        Ok(SafeUrl { url, addrs })
    }

    async fn resolve_public(&self, domain: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let addrs = match self.resolver.resolve(domain, port).await {
            Ok(addrs) => addrs,
            Err(err) => {
                tracing::info!(host = %domain, error = %err, "Rejecting URL whose host does not resolve");
                exn::bail!(ErrorKind::Unsafe("host does not resolve".to_string()));
            },
        };
        if addrs.is_empty() {
            exn::bail!(ErrorKind::Unsafe("host does not resolve".to_string()));
        }
        if let Some(blocked) = addrs.iter().find(|addr| !(self.permit)(addr.ip())) {
            tracing::warn!(host = %domain, address = %blocked.ip(), "Rejecting URL resolving to a non-public address");
            exn::bail!(ErrorKind::Unsafe("host resolves to a non-public address".to_string()));
        }
        Ok(addrs)
    }
}

fn unsafe_url(reason: &str) -> exn::Exn<ErrorKind> {
    exn::Exn::from(ErrorKind::Unsafe(reason.to_string()))
}

/// Every check that needs no network access.
fn parse_static(raw: &str, permit: fn(IpAddr) -> bool) -> Result<Url> {
    if has_forbidden_chars(raw) {
        exn::bail!(ErrorKind::Unsafe("forbidden characters".to_string()));
    }
    let url = Url::parse(raw).map_err(|_| unsafe_url("unparsable URL"))?;
    if !matches!(url.scheme(), "http" | "https") {
        exn::bail!(ErrorKind::Unsafe("only http and https are allowed".to_string()));
    }
    if !url.username().is_empty() || url.password().is_some() {
        exn::bail!(ErrorKind::Unsafe("credentials in URL".to_string()));
    }
    match url.host() {
        None => exn::bail!(ErrorKind::Unsafe("missing host".to_string())),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if domain.is_empty() || domain == "localhost" || LOCAL_SUFFIXES.iter().any(|s| domain.ends_with(s)) {
                exn::bail!(ErrorKind::Unsafe("local hostname".to_string()));
            }
        },
        Some(Host::Ipv4(ip)) if !permit(IpAddr::V4(ip)) => {
            exn::bail!(ErrorKind::Unsafe("non-public address".to_string()))
        },
        Some(Host::Ipv6(ip)) if !permit(IpAddr::V6(ip)) => {
            exn::bail!(ErrorKind::Unsafe("non-public address".to_string()))
        },
        Some(_) => {},
    }
    Ok(url)
}
