//! VeilBox connection service.
//!
//! Ties the synthesizer and the supervisor to the host collaborators:
//! parse → synthesize → start on connect, stop on disconnect, replay of the
//! last request on reconnect, metrics feed and system proxy toggling.

use crate::singbox::collaborators::{MetricsEndpoint, MetricsFeed, ProfileParser, SystemProxy};
use crate::singbox::config::synthesize;
use crate::singbox::logging::SharedLogSink;
use crate::singbox::policy::*;
use crate::singbox::settings::SupervisorSettings;
use crate::singbox::supervisor::{EngineInfo, EngineSupervisor, SupervisorPhase};
use crate::singbox::types::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type VeilServiceState = Arc<VeilService>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Requests / status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connect request as sent by the UI: a descriptor plus policy settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectRequest {
    #[serde(rename = "VLESSURI")]
    pub descriptor: String,
    #[serde(rename = "Mode")]
    pub mode: String,
    #[serde(rename = "SplitTunnel")]
    pub split_tunnel: Option<SplitTunnelSettings>,
    #[serde(rename = "DNS")]
    pub dns: Option<DnsSettings>,
    #[serde(rename = "RegionRouting")]
    pub region_routing: Option<RegionRoutingSettings>,
    #[serde(rename = "Metrics")]
    pub metrics: Option<MetricsSettings>,
}

impl ConnectRequest {
    pub fn options(&self) -> ConnectionOptions {
        ConnectionOptions {
            mode: self.mode.clone(),
            split_tunnel: self.split_tunnel.clone(),
            dns: self.dns.clone(),
            region_routing: self.region_routing.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Connect request with an already-decoded profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRequest {
    pub profile: Profile,
    #[serde(default)]
    pub options: ConnectionOptions,
}

/// What `reconnect` replays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastRequest {
    Descriptor(ConnectRequest),
    Profile(ProfileRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub connected: bool,
    pub phase: SupervisorPhase,
    pub engine: Option<EngineInfo>,
    pub system_proxy: bool,
}

#[derive(Debug, Default)]
struct Session {
    connected: bool,
    system_proxy: bool,
    last: Option<LastRequest>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct VeilService {
    supervisor: EngineSupervisor,
    parser: Option<Arc<dyn ProfileParser>>,
    system_proxy: Option<Arc<dyn SystemProxy>>,
    metrics: Option<Arc<dyn MetricsFeed>>,
    session: RwLock<Session>,
}

impl VeilService {
    pub fn new(settings: SupervisorSettings, sink: SharedLogSink) -> Self {
        Self {
            supervisor: EngineSupervisor::new(settings, sink),
            parser: None,
            system_proxy: None,
            metrics: None,
            session: RwLock::new(Session::default()),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn ProfileParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn with_system_proxy(mut self, proxy: Arc<dyn SystemProxy>) -> Self {
        self.system_proxy = Some(proxy);
        self
    }

    pub fn with_metrics_feed(mut self, feed: Arc<dyn MetricsFeed>) -> Self {
        self.metrics = Some(feed);
        self
    }

    pub fn shared(self) -> VeilServiceState {
        Arc::new(self)
    }

    pub fn supervisor(&self) -> &EngineSupervisor {
        &self.supervisor
    }

    // ── Connect / disconnect ─────────────────────────────────────

    /// Parse the descriptor, synthesize, and (re)start the engine.
    pub async fn connect(&self, request: ConnectRequest) -> Result<EngineInfo, SingBoxError> {
        let parser = self.parser.as_ref().ok_or_else(|| {
            SingBoxError::new(
                SingBoxErrorKind::Collaborator,
                "No profile parser registered",
            )
        })?;
        let profile = parser.parse(&request.descriptor)?;
        let options = request.options();
        self.launch(&profile, &options, LastRequest::Descriptor(request))
            .await
    }

    /// Connect with a decoded profile.
    pub async fn connect_profile(
        &self,
        profile: Profile,
        options: ConnectionOptions,
    ) -> Result<EngineInfo, SingBoxError> {
        let request = ProfileRequest { profile, options };
        self.launch(
            &request.profile,
            &request.options,
            LastRequest::Profile(request.clone()),
        )
        .await
    }

    /// Replay the last successful request.
    pub async fn reconnect(&self) -> Result<EngineInfo, SingBoxError> {
        let last = self.session.read().await.last.clone();
        match last {
            Some(LastRequest::Descriptor(req)) => self.connect(req).await,
            Some(LastRequest::Profile(req)) => self.connect_profile(req.profile, req.options).await,
            None => Err(SingBoxError::new(
                SingBoxErrorKind::NotConnected,
                "No previous connection to restore",
            )),
        }
    }

    /// Stop the engine and the metrics feed. Idempotent.
    pub async fn disconnect(&self) -> Result<(), SingBoxError> {
        self.supervisor.shutdown().await?;
        self.session.write().await.connected = false;
        if let Some(feed) = &self.metrics {
            feed.stop().await;
        }
        Ok(())
    }

    async fn launch(
        &self,
        profile: &Profile,
        options: &ConnectionOptions,
        last: LastRequest,
    ) -> Result<EngineInfo, SingBoxError> {
        let document = synthesize(profile, options)?;
        let info = self.supervisor.start(document).await?;

        {
            let mut session = self.session.write().await;
            session.connected = true;
            session.last = Some(last);
        }

        if let Some(feed) = &self.metrics {
            feed.stop().await;
            if let Some(metrics) = options.observatory() {
                feed.start(MetricsEndpoint::from_settings(metrics)).await;
            }
        }
        log::info!(
            "connected to {}:{} ({})",
            profile.host(),
            profile.port(),
            if options.mode.trim().is_empty() { "proxy" } else { options.mode.trim() }
        );
        Ok(info)
    }

    // ── System proxy ─────────────────────────────────────────────

    /// Point the OS proxy at the local HTTP listener.
    pub async fn enable_system_proxy(&self) -> Result<(), SingBoxError> {
        self.proxy()?.enable(LOOPBACK, HTTP_PORT).await?;
        self.session.write().await.system_proxy = true;
        Ok(())
    }

    pub async fn disable_system_proxy(&self) -> Result<(), SingBoxError> {
        self.proxy()?.disable().await?;
        self.session.write().await.system_proxy = false;
        Ok(())
    }

    fn proxy(&self) -> Result<&Arc<dyn SystemProxy>, SingBoxError> {
        self.system_proxy.as_ref().ok_or_else(|| {
            SingBoxError::new(
                SingBoxErrorKind::Collaborator,
                "No system proxy controller registered",
            )
        })
    }

    // ── Status ───────────────────────────────────────────────────

    pub async fn status(&self) -> ServiceStatus {
        let engine = self.supervisor.current();
        let session = self.session.read().await;
        ServiceStatus {
            // an engine that exited on its own no longer counts
            connected: session.connected && engine.is_some(),
            phase: self.supervisor.phase(),
            engine,
            system_proxy: session.system_proxy,
        }
    }

    pub async fn last_request(&self) -> Option<LastRequest> {
        self.session.read().await.last.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::singbox::logging::NullSink;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedParser;

    impl ProfileParser for FixedParser {
        fn parse(&self, descriptor: &str) -> Result<Profile, SingBoxError> {
            if descriptor.starts_with("vless://") {
                Profile::new("11111111-2222-3333-4444-555555555555", "srv.example", 443)
            } else {
                Err(SingBoxError::new(
                    SingBoxErrorKind::InvalidProfile,
                    "not a vless descriptor",
                ))
            }
        }
    }

    #[derive(Default)]
    struct RecordingProxy {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SystemProxy for RecordingProxy {
        async fn enable(&self, host: &str, port: u16) -> Result<(), SingBoxError> {
            self.calls.lock().unwrap().push(format!("enable {}:{}", host, port));
            Ok(())
        }
        async fn disable(&self) -> Result<(), SingBoxError> {
            self.calls.lock().unwrap().push("disable".into());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingFeed {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MetricsFeed for RecordingFeed {
        async fn start(&self, endpoint: MetricsEndpoint) {
            self.calls.lock().unwrap().push(format!("start {}", endpoint.url));
        }
        async fn stop(&self) {
            self.calls.lock().unwrap().push("stop".into());
        }
    }

    fn service(dir: &std::path::Path) -> VeilService {
        let mut settings = SupervisorSettings::with_data_dir(dir.join("data"));
        settings.engine_path = Some(dir.join("no-engine"));
        VeilService::new(settings, Arc::new(NullSink))
    }

    #[tokio::test]
    async fn connect_without_parser() {
        let tmp = tempfile::tempdir().unwrap();
        let err = service(tmp.path())
            .connect(ConnectRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, SingBoxErrorKind::Collaborator);
    }

    #[tokio::test]
    async fn parser_error_passes_through() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path()).with_parser(Arc::new(FixedParser));
        let err = svc
            .connect(ConnectRequest {
                descriptor: "trojan://x".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, SingBoxErrorKind::InvalidProfile);
    }

    #[tokio::test]
    async fn bad_mode_fails_before_side_effects() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path()).with_parser(Arc::new(FixedParser));
        let err = svc
            .connect(ConnectRequest {
                descriptor: "vless://ok".into(),
                mode: "bogus".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, SingBoxErrorKind::UnsupportedMode);
        assert!(!tmp.path().join("data").exists());
        assert_eq!(svc.supervisor().phase(), SupervisorPhase::Idle);
        assert!(svc.last_request().await.is_none());
    }

    #[tokio::test]
    async fn missing_engine_leaves_service_disconnected() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path()).with_parser(Arc::new(FixedParser));
        let err = svc
            .connect(ConnectRequest {
                descriptor: "vless://ok".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, SingBoxErrorKind::EngineNotFound);
        // config was still written, the engine simply was not there
        assert!(tmp.path().join("data").join("sb_config.json").exists());
        let status = svc.status().await;
        assert!(!status.connected);
        assert_eq!(status.phase, SupervisorPhase::Idle);
        assert!(status.engine.is_none());
    }

    #[tokio::test]
    async fn reconnect_without_history() {
        let tmp = tempfile::tempdir().unwrap();
        let err = service(tmp.path()).reconnect().await.unwrap_err();
        assert_eq!(err.kind, SingBoxErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_stops_feed() {
        let tmp = tempfile::tempdir().unwrap();
        let feed = Arc::new(RecordingFeed::default());
        let svc = service(tmp.path()).with_metrics_feed(feed.clone());
        tokio_test::assert_ok!(svc.disconnect().await);
        tokio_test::assert_ok!(svc.disconnect().await);
        assert_eq!(*feed.calls.lock().unwrap(), vec!["stop", "stop"]);
    }

    #[tokio::test]
    async fn system_proxy_uses_http_listener() {
        let tmp = tempfile::tempdir().unwrap();
        let proxy = Arc::new(RecordingProxy::default());
        let svc = service(tmp.path()).with_system_proxy(proxy.clone());
        svc.enable_system_proxy().await.unwrap();
        assert!(svc.status().await.system_proxy);
        svc.disable_system_proxy().await.unwrap();
        assert!(!svc.status().await.system_proxy);
        assert_eq!(
            *proxy.calls.lock().unwrap(),
            vec!["enable 127.0.0.1:10809", "disable"]
        );
    }

    #[tokio::test]
    async fn system_proxy_requires_controller() {
        let tmp = tempfile::tempdir().unwrap();
        let err = service(tmp.path()).enable_system_proxy().await.unwrap_err();
        assert_eq!(err.kind, SingBoxErrorKind::Collaborator);
    }

    #[test]
    fn connect_request_wire_names() {
        let json = r#"{
            "VLESSURI": "vless://abc@h:443",
            "Mode": "tun",
            "RegionRouting": {"proxyCountries": ["us"]},
            "Metrics": {"enableObservatory": true}
        }"#;
        let req: ConnectRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.descriptor, "vless://abc@h:443");
        let opts = req.options();
        assert_eq!(opts.mode, "tun");
        assert_eq!(opts.region_routing.unwrap().proxy_countries, vec!["us"]);
        assert!(opts.metrics.unwrap().enable_observatory);
        assert!(opts.split_tunnel.is_none());
    }

    #[test]
    fn profile_request_options_default() {
        let json = r#"{"profile":{"uuid":"u","host":"h","port":1}}"#;
        let req: ProfileRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.profile.port(), 1);
        assert_eq!(req.options, ConnectionOptions::default());
    }
}
