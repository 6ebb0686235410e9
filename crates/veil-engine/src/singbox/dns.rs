//! DNS block synthesis: default resolvers, custom upstream normalisation and
//! resolver kind inference.

use crate::singbox::document::{DnsBlock, DnsServer};
use crate::singbox::policy::{DnsSettings, DnsUpstream};

pub const DEFAULT_DNS_STRATEGY: &str = "prefer_ipv4";

/// The two resolvers used when no custom upstream survives normalisation.
pub fn default_servers() -> Vec<DnsServer> {
    vec![
        DnsServer {
            tag: "secure".into(),
            kind: "https".into(),
            server: Some("dns.google".into()),
            domain_resolver: Some("local".into()),
            detour: None,
            strategy: None,
        },
        DnsServer {
            tag: "local".into(),
            kind: "local".into(),
            server: None,
            domain_resolver: None,
            detour: None,
            strategy: None,
        },
    ]
}

/// Build the DNS block from optional user settings.
pub fn build_dns(settings: Option<&DnsSettings>) -> DnsBlock {
    let mut block = DnsBlock {
        servers: default_servers(),
        strategy: DEFAULT_DNS_STRATEGY.into(),
    };
    let Some(settings) = settings else {
        return block;
    };

    let custom: Vec<DnsServer> = settings.servers.iter().filter_map(upstream_to_server).collect();
    if !custom.is_empty() {
        block.servers = custom;
    }
    let strategy = settings.strategy.trim();
    if !strategy.is_empty() {
        block.strategy = strategy.to_string();
    }
    block
}

/// Normalise one upstream. Blank addresses are dropped.
fn upstream_to_server(up: &DnsUpstream) -> Option<DnsServer> {
    let address = up.address.trim();
    if address.is_empty() {
        return None;
    }
    let kind = match up.kind.trim() {
        "" => infer_kind(address).to_string(),
        k => k.to_string(),
    };
    let tag = match up.tag.trim() {
        "" => address_tag(address),
        t => t.to_string(),
    };
    let server = (kind != "local").then(|| address.to_string());
    Some(DnsServer {
        tag,
        kind,
        server,
        domain_resolver: None,
        detour: non_empty(&up.detour),
        strategy: non_empty(&up.strategy),
    })
}

/// Resolver kind from the address scheme. Schemes are case-sensitive.
pub fn infer_kind(address: &str) -> &'static str {
    let address = address.trim();
    if address.starts_with("https://") || (address.contains("://") && address.starts_with("https")) {
        "https"
    } else if address.starts_with("tls://") {
        "tls"
    } else if address == "local" {
        "local"
    } else {
        "udp"
    }
}

/// Fallback tag: the address without scheme or path. `dns` only for a blank
/// address; a bare scheme yields an empty tag.
pub fn address_tag(address: &str) -> String {
    let mut rest = address.trim();
    if rest.is_empty() {
        return "dns".into();
    }
    for scheme in ["https://", "tls://", "udp://", "tcp://"] {
        rest = rest.strip_prefix(scheme).unwrap_or(rest);
    }
    // a leading slash is kept as part of the tag
    if let Some(idx) = rest.find('/').filter(|&i| i > 0) {
        rest = &rest[..idx];
    }
    rest.to_string()
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
