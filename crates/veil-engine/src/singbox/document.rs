//! Typed sing-box configuration document. Built by [`crate::singbox::config`]
//! and serialized with `serde_json`; nothing here is templated as text.

use crate::singbox::types::*;
use serde::Serialize;
use std::path::Path;

/// Root of the engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigDocument {
    pub log: LogBlock,
    pub dns: DnsBlock,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    pub route: RouteBlock,
    pub experimental: Experimental,
}

impl ConfigDocument {
    /// Point the cache-file slot at the resolved path.
    pub fn bind_cache_path(&mut self, path: &Path) {
        self.experimental.cache_file.path = path.to_string_lossy().into_owned();
    }

    /// Whether the cache slot still holds the placeholder.
    pub fn cache_path_unbound(&self) -> bool {
        self.experimental.cache_file.path == CACHE_PATH_PLACEHOLDER
    }

    pub fn to_json_pretty(&self) -> Result<String, SingBoxError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, SingBoxError> {
        Ok(serde_json::to_value(self)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Log / DNS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogBlock {
    pub level: String,
    pub timestamp: bool,
}

impl Default for LogBlock {
    fn default() -> Self {
        Self {
            level: "info".into(),
            timestamp: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsBlock {
    pub servers: Vec<DnsServer>,
    pub strategy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsServer {
    pub tag: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_resolver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detour: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Inbounds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inbound {
    Socks {
        tag: String,
        listen: String,
        listen_port: u16,
    },
    Http {
        tag: String,
        listen: String,
        listen_port: u16,
    },
    Tun {
        tag: String,
        interface_name: String,
        address: Vec<String>,
        auto_route: bool,
        strict_route: bool,
        stack: String,
    },
}

impl Inbound {
    pub fn tag(&self) -> &str {
        match self {
            Self::Socks { tag, .. } | Self::Http { tag, .. } | Self::Tun { tag, .. } => tag,
        }
    }

    /// Listener set for a connection mode.
    pub fn for_mode(mode: ConnectionMode) -> Vec<Self> {
        let mut inbounds = vec![
            Self::Socks {
                tag: SOCKS_INBOUND_TAG.into(),
                listen: LOOPBACK.into(),
                listen_port: SOCKS_PORT,
            },
            Self::Http {
                tag: HTTP_INBOUND_TAG.into(),
                listen: LOOPBACK.into(),
                listen_port: HTTP_PORT,
            },
        ];
        if mode == ConnectionMode::Tun {
            inbounds.push(Self::Tun {
                tag: TUN_INBOUND_TAG.into(),
                interface_name: TUN_INTERFACE_NAME.into(),
                address: vec![TUN_ADDRESS.into()],
                auto_route: true,
                strict_route: true,
                stack: "mixed".into(),
            });
        }
        inbounds
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Outbounds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    Vless(Box<VlessOutbound>),
    Direct { tag: OutboundTag },
    Block { tag: OutboundTag },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VlessOutbound {
    pub tag: OutboundTag,
    pub server: String,
    pub server_port: u16,
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_encoding: Option<String>,
    pub tls: TlsBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportBlock>,
    pub multiplex: MultiplexBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TlsBlock {
    pub enabled: bool,
    pub server_name: String,
    pub utls: UtlsBlock,
    pub reality: RealityBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtlsBlock {
    pub enabled: bool,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealityBlock {
    pub enabled: bool,
    pub public_key: String,
    pub short_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportBlock {
    Grpc {
        service_name: String,
        idle_timeout: String,
        permit_without_stream: bool,
    },
}

/// Stream multiplexing. Disabled blocks serialize as `{"enabled": false}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiplexBlock {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_streams: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_streams: Option<u32>,
}

impl MultiplexBlock {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_connections: None,
            min_streams: None,
            max_streams: None,
        }
    }

    pub fn grpc_defaults() -> Self {
        Self {
            enabled: true,
            max_connections: Some(8),
            min_streams: Some(4),
            max_streams: Some(32),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Route
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteBlock {
    /// First match wins; order is significant.
    pub rules: Vec<RouteRule>,
    pub rule_set: Vec<RuleSetRef>,
    pub auto_detect_interface: bool,
}

/// One routing rule: a single matcher plus its target outbound.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteRule {
    #[serde(flatten)]
    pub matcher: RuleMatch,
    pub outbound: OutboundTag,
}

impl RouteRule {
    pub fn new(matcher: RuleMatch, outbound: OutboundTag) -> Self {
        Self { matcher, outbound }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMatch {
    Domain(Vec<String>),
    IpCidr(Vec<String>),
    ProcessName(Vec<String>),
    Geoip(Vec<String>),
    RuleSet(String),
    IpIsPrivate(bool),
    Inbound(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSetRef {
    pub tag: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    pub url: String,
    pub download_detour: OutboundTag,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Experimental
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Experimental {
    pub cache_file: CacheFileBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observatory: Option<ObservatoryBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clash_api: Option<ClashApiBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheFileBlock {
    pub enabled: bool,
    pub path: String,
}

impl Default for CacheFileBlock {
    fn default() -> Self {
        Self {
            enabled: true,
            path: CACHE_PATH_PLACEHOLDER.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservatoryBlock {
    pub enabled: bool,
    pub listen: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClashApiBlock {
    pub external_controller: String,
    pub access_control_allow_origin: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}
