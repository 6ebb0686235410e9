//! Shared types, enums, constants and the error type for the sing-box engine crate.

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Fixed listener / tag constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Loopback address every local inbound binds to.
pub const LOOPBACK: &str = "127.0.0.1";
/// SOCKS inbound port.
pub const SOCKS_PORT: u16 = 10808;
/// HTTP inbound port; also the address handed to the system proxy.
pub const HTTP_PORT: u16 = 10809;

pub const SOCKS_INBOUND_TAG: &str = "socks-in";
pub const HTTP_INBOUND_TAG: &str = "http-in";
pub const TUN_INBOUND_TAG: &str = "tun-in";

pub const TUN_INTERFACE_NAME: &str = "veilbox-tun";
pub const TUN_ADDRESS: &str = "172.19.0.1/30";

/// Placeholder written into `experimental.cache_file.path` until the
/// supervisor resolves the real cache file.
pub const CACHE_PATH_PLACEHOLDER: &str = "__CACHE_FILE_PATH__";

/// Default observability listen address when metrics are enabled without one.
pub const DEFAULT_OBSERVATORY_LISTEN: &str = "127.0.0.1:9090";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Outbound tags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The three outbounds every document carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundTag {
    Proxy,
    Direct,
    Block,
}

impl OutboundTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::Direct => "direct",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for OutboundTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Mode / transport / template
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How local traffic reaches the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// SOCKS + HTTP listeners only.
    Proxy,
    /// SOCKS + HTTP listeners plus a TUN interface capturing all traffic.
    Tun,
}

impl Default for ConnectionMode {
    fn default() -> Self {
        Self::Proxy
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proxy => write!(f, "proxy"),
            Self::Tun => write!(f, "tun"),
        }
    }
}

impl ConnectionMode {
    /// Parse a user-facing mode string. Blank means proxy.
    pub fn parse(s: &str) -> Result<Self, SingBoxError> {
        match s.trim().to_lowercase().as_str() {
            "" | "proxy" => Ok(Self::Proxy),
            "tun" => Ok(Self::Tun),
            _ => Err(SingBoxError::new(
                SingBoxErrorKind::UnsupportedMode,
                format!("unsupported mode {:?}", s),
            )),
        }
    }

    /// Inbound tags the catch-all proxy rule must match for this mode.
    pub fn inbound_tags(&self) -> Vec<&'static str> {
        match self {
            Self::Proxy => vec![SOCKS_INBOUND_TAG, HTTP_INBOUND_TAG],
            Self::Tun => vec![SOCKS_INBOUND_TAG, HTTP_INBOUND_TAG, TUN_INBOUND_TAG],
        }
    }
}

/// Wire transport between the proxy outbound and the remote server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Grpc,
    Tcp,
}

impl Default for TransportKind {
    fn default() -> Self {
        Self::Grpc
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grpc => write!(f, "grpc"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

impl TransportKind {
    /// Parse a transport name from a profile. Blank means gRPC.
    pub fn parse(s: &str) -> Result<Self, SingBoxError> {
        match s.trim().to_lowercase().as_str() {
            "" | "grpc" => Ok(Self::Grpc),
            "tcp" => Ok(Self::Tcp),
            _ => Err(SingBoxError::new(
                SingBoxErrorKind::UnsupportedTransport,
                format!("unsupported transport {:?}", s),
            )),
        }
    }
}

/// One concrete document shape: listener set × outbound transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    ProxyGrpc { service_name: String },
    ProxyTcp,
    TunGrpc { service_name: String },
    TunTcp,
}

impl Template {
    /// Select the template for a mode string and a profile.
    pub fn select(mode: &str, profile: &Profile) -> Result<Self, SingBoxError> {
        let mode = ConnectionMode::parse(mode)?;
        let transport = TransportKind::parse(profile.transport())?;
        let service_name = profile.service_name().to_string();
        Ok(match (mode, transport) {
            (ConnectionMode::Proxy, TransportKind::Grpc) => Self::ProxyGrpc { service_name },
            (ConnectionMode::Proxy, TransportKind::Tcp) => Self::ProxyTcp,
            (ConnectionMode::Tun, TransportKind::Grpc) => Self::TunGrpc { service_name },
            (ConnectionMode::Tun, TransportKind::Tcp) => Self::TunTcp,
        })
    }

    pub fn mode(&self) -> ConnectionMode {
        match self {
            Self::ProxyGrpc { .. } | Self::ProxyTcp => ConnectionMode::Proxy,
            Self::TunGrpc { .. } | Self::TunTcp => ConnectionMode::Tun,
        }
    }

    /// gRPC service name, if the template uses gRPC.
    pub fn service_name(&self) -> Option<&str> {
        match self {
            Self::ProxyGrpc { service_name } | Self::TunGrpc { service_name } => {
                Some(service_name.as_str())
            }
            Self::ProxyTcp | Self::TunTcp => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Profile
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serialized form of a profile, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileFields {
    pub uuid: String,
    pub host: String,
    pub port: u16,
    pub sni: String,
    pub public_key: String,
    pub short_id: String,
    pub transport: String,
    pub service_name: String,
    pub flow: String,
    pub packet_encoding: String,
    pub spider_x: String,
}

/// A validated connection profile. Host, port and UUID are always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ProfileFields", into = "ProfileFields")]
pub struct Profile {
    uuid: String,
    host: String,
    port: u16,
    sni: String,
    public_key: String,
    short_id: String,
    transport: String,
    service_name: String,
    flow: String,
    packet_encoding: String,
    spider_x: String,
}

impl Profile {
    pub fn new(
        uuid: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Result<Self, SingBoxError> {
        Self::try_from(ProfileFields {
            uuid: uuid.into(),
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    pub fn with_sni(mut self, sni: impl Into<String>) -> Self {
        self.sni = sni.into();
        self
    }

    pub fn with_reality(mut self, public_key: impl Into<String>, short_id: impl Into<String>) -> Self {
        self.public_key = public_key.into();
        self.short_id = short_id.into();
        self
    }

    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = transport.into();
        self
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_flow(mut self, flow: impl Into<String>) -> Self {
        self.flow = flow.into();
        self
    }

    pub fn with_packet_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.packet_encoding = encoding.into();
        self
    }

    pub fn with_spider_x(mut self, spider_x: impl Into<String>) -> Self {
        self.spider_x = spider_x.into();
        self
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }
    pub fn host(&self) -> &str {
        &self.host
    }
    pub fn port(&self) -> u16 {
        self.port
    }
    pub fn sni(&self) -> &str {
        &self.sni
    }
    pub fn public_key(&self) -> &str {
        &self.public_key
    }
    pub fn short_id(&self) -> &str {
        &self.short_id
    }
    /// Raw transport name as supplied; resolved during synthesis.
    pub fn transport(&self) -> &str {
        &self.transport
    }
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
    pub fn flow(&self) -> &str {
        &self.flow
    }
    pub fn packet_encoding(&self) -> &str {
        &self.packet_encoding
    }
    /// Carried for the descriptor round-trip; sing-box has no field for it.
    pub fn spider_x(&self) -> &str {
        &self.spider_x
    }
}

impl TryFrom<ProfileFields> for Profile {
    type Error = SingBoxError;

    fn try_from(f: ProfileFields) -> Result<Self, Self::Error> {
        let missing: Vec<&str> = [
            ("uuid", f.uuid.trim().is_empty()),
            ("host", f.host.trim().is_empty()),
            ("port", f.port == 0),
        ]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| *name)
        .collect();
        if !missing.is_empty() {
            return Err(SingBoxError::new(
                SingBoxErrorKind::InvalidProfile,
                "profile is missing required fields",
            )
            .with_detail(missing.join(", ")));
        }
        Ok(Self {
            uuid: f.uuid.trim().to_string(),
            host: f.host.trim().to_string(),
            port: f.port,
            sni: f.sni,
            public_key: f.public_key,
            short_id: f.short_id,
            transport: f.transport,
            service_name: f.service_name,
            flow: f.flow,
            packet_encoding: f.packet_encoding,
            spider_x: f.spider_x,
        })
    }
}

impl From<Profile> for ProfileFields {
    fn from(p: Profile) -> Self {
        Self {
            uuid: p.uuid,
            host: p.host,
            port: p.port,
            sni: p.sni,
            public_key: p.public_key,
            short_id: p.short_id,
            transport: p.transport,
            service_name: p.service_name,
            flow: p.flow,
            packet_encoding: p.packet_encoding,
            spider_x: p.spider_x,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingBoxErrorKind {
    UnsupportedMode,
    UnsupportedTransport,
    InvalidProfile,
    DataDirCreate,
    CacheUnavailable,
    ConfigWrite,
    Serialization,
    EngineNotFound,
    ProcessSpawnFailed,
    SettingsInvalid,
    NotConnected,
    Collaborator,
    IoError,
}

/// Crate error type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingBoxError {
    pub kind: SingBoxErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl fmt::Display for SingBoxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)?;
        if let Some(d) = &self.detail {
            write!(f, " ({})", d)?;
        }
        Ok(())
    }
}

impl std::error::Error for SingBoxError {}

impl SingBoxError {
    pub fn new(kind: SingBoxErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Wrap an I/O failure under the given kind.
    pub fn io(kind: SingBoxErrorKind, msg: impl Into<String>, err: &std::io::Error) -> Self {
        Self::new(kind, msg).with_detail(err.to_string())
    }
}

impl From<SingBoxError> for String {
    fn from(e: SingBoxError) -> String {
        e.to_string()
    }
}

impl From<serde_json::Error> for SingBoxError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(SingBoxErrorKind::Serialization, "JSON (de)serialization failed")
            .with_detail(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile::new("b831381d-6324-4d53-ad4f-8cda48b30811", "edge.example.net", 443).unwrap()
    }

    // ── Mode ─────────────────────────────────────────────────────

    #[test]
    fn mode_blank_is_proxy() {
        assert_eq!(ConnectionMode::parse("").unwrap(), ConnectionMode::Proxy);
        assert_eq!(ConnectionMode::parse("  ").unwrap(), ConnectionMode::Proxy);
    }

    #[test]
    fn mode_is_case_insensitive() {
        assert_eq!(ConnectionMode::parse("TUN").unwrap(), ConnectionMode::Tun);
        assert_eq!(ConnectionMode::parse("Proxy").unwrap(), ConnectionMode::Proxy);
    }

    #[test]
    fn mode_unknown_rejected() {
        let err = ConnectionMode::parse("bogus").unwrap_err();
        assert_eq!(err.kind, SingBoxErrorKind::UnsupportedMode);
        assert!(err.message.contains("bogus"));
    }

    #[test]
    fn tun_mode_adds_tun_inbound() {
        assert_eq!(ConnectionMode::Proxy.inbound_tags(), vec!["socks-in", "http-in"]);
        assert_eq!(
            ConnectionMode::Tun.inbound_tags(),
            vec!["socks-in", "http-in", "tun-in"]
        );
    }

    // ── Transport / template ─────────────────────────────────────

    #[test]
    fn transport_defaults_to_grpc() {
        assert_eq!(TransportKind::parse("").unwrap(), TransportKind::Grpc);
        assert_eq!(TransportKind::parse("GRPC").unwrap(), TransportKind::Grpc);
        assert_eq!(TransportKind::parse("tcp").unwrap(), TransportKind::Tcp);
    }

    #[test]
    fn transport_unknown_rejected() {
        let err = TransportKind::parse("ws").unwrap_err();
        assert_eq!(err.kind, SingBoxErrorKind::UnsupportedTransport);
    }

    #[test]
    fn template_carries_service_name() {
        let p = profile().with_service_name("veil");
        let t = Template::select("tun", &p).unwrap();
        assert_eq!(t, Template::TunGrpc { service_name: "veil".into() });
        assert_eq!(t.mode(), ConnectionMode::Tun);
        assert_eq!(t.service_name(), Some("veil"));
    }

    #[test]
    fn template_tcp_has_no_service_name() {
        let p = profile().with_transport("tcp").with_service_name("ignored");
        let t = Template::select("proxy", &p).unwrap();
        assert_eq!(t, Template::ProxyTcp);
        assert_eq!(t.service_name(), None);
    }

    // ── Profile ──────────────────────────────────────────────────

    #[test]
    fn profile_requires_host_port_uuid() {
        let err = Profile::new("", "", 0).unwrap_err();
        assert_eq!(err.kind, SingBoxErrorKind::InvalidProfile);
        let detail = err.detail.unwrap();
        assert!(detail.contains("uuid"));
        assert!(detail.contains("host"));
        assert!(detail.contains("port"));
    }

    #[test]
    fn profile_deserialize_validates() {
        let bad = r#"{"uuid":"abc","host":"","port":443}"#;
        assert!(serde_json::from_str::<Profile>(bad).is_err());

        let good = r#"{"uuid":"abc","host":"h.example","port":443,"serviceName":"svc"}"#;
        let p: Profile = serde_json::from_str(good).unwrap();
        assert_eq!(p.host(), "h.example");
        assert_eq!(p.service_name(), "svc");
        assert_eq!(p.transport(), "");
    }

    #[test]
    fn profile_builders() {
        let p = profile()
            .with_sni("www.example.com")
            .with_reality("pk", "sid")
            .with_flow("xtls-rprx-vision")
            .with_packet_encoding("xudp")
            .with_spider_x("/");
        assert_eq!(p.sni(), "www.example.com");
        assert_eq!(p.public_key(), "pk");
        assert_eq!(p.short_id(), "sid");
        assert_eq!(p.flow(), "xtls-rprx-vision");
        assert_eq!(p.packet_encoding(), "xudp");
        assert_eq!(p.spider_x(), "/");
    }

    // ── Errors ───────────────────────────────────────────────────

    #[test]
    fn error_display() {
        let e = SingBoxError::new(SingBoxErrorKind::EngineNotFound, "sing-box missing");
        assert!(e.to_string().contains("sing-box missing"));
        let e2 = e.with_detail("/opt/core/sing-box");
        assert!(e2.to_string().contains("/opt/core/sing-box"));
        assert!(e2.to_string().starts_with("[EngineNotFound]"));
    }

    #[test]
    fn error_into_string() {
        let e = SingBoxError::new(SingBoxErrorKind::ConfigWrite, "disk full");
        let s: String = e.into();
        assert!(s.contains("disk full"));
    }

    #[test]
    fn outbound_tag_names() {
        assert_eq!(OutboundTag::Proxy.to_string(), "proxy");
        assert_eq!(
            serde_json::to_string(&OutboundTag::Block).unwrap(),
            "\"block\""
        );
    }
}
