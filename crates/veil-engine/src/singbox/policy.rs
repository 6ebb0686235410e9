//! User policy settings layered on top of a profile: split tunnelling, DNS,
//! region routing and metrics. Field names match the host UI payloads.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Split tunnel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-destination routing overrides. Every list is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SplitTunnelSettings {
    pub bypass_domains: Vec<String>,
    #[serde(rename = "bypassIPs")]
    pub bypass_ips: Vec<String>,
    pub bypass_processes: Vec<String>,
    pub proxy_domains: Vec<String>,
    #[serde(rename = "proxyIPs")]
    pub proxy_ips: Vec<String>,
    pub proxy_processes: Vec<String>,
    pub block_domains: Vec<String>,
    #[serde(rename = "blockIPs")]
    pub block_ips: Vec<String>,
    pub block_processes: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  DNS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One user-configured upstream resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsUpstream {
    pub tag: String,
    /// Resolver kind (`https`, `tls`, `udp`, `local`); inferred when blank.
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detour: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub strategy: String,
}

impl DnsUpstream {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSettings {
    pub strategy: String,
    pub servers: Vec<DnsUpstream>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Region routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Country-code (GeoIP) routing lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegionRoutingSettings {
    pub proxy_countries: Vec<String>,
    pub direct_countries: Vec<String>,
    pub block_countries: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsSettings {
    pub enable_observatory: bool,
    pub observatory_listen: String,
    pub observatory_token: String,
}

impl MetricsSettings {
    /// Listen address with the default applied.
    pub fn listen(&self) -> String {
        let listen = self.observatory_listen.trim();
        if listen.is_empty() {
            crate::singbox::types::DEFAULT_OBSERVATORY_LISTEN.to_string()
        } else {
            listen.to_string()
        }
    }

    /// Token, if one was set.
    pub fn token(&self) -> Option<String> {
        let token = self.observatory_token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Connection options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mode plus the four optional policy groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionOptions {
    pub mode: String,
    pub split_tunnel: Option<SplitTunnelSettings>,
    pub dns: Option<DnsSettings>,
    pub region_routing: Option<RegionRoutingSettings>,
    pub metrics: Option<MetricsSettings>,
}

impl ConnectionOptions {
    pub fn with_mode(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            ..Default::default()
        }
    }

    /// Metrics settings when the observability endpoint is switched on.
    pub fn observatory(&self) -> Option<&MetricsSettings> {
        self.metrics.as_ref().filter(|m| m.enable_observatory)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  List normalisation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trim every entry and drop the blank ones, keeping order.
pub fn clean_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// [`clean_list`] followed by upper-casing (country codes).
pub fn uppercase_codes(values: &[String]) -> Vec<String> {
    clean_list(values)
        .into_iter()
        .map(|v| v.to_uppercase())
        .collect()
}
