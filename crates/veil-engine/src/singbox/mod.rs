//! sing-box module root – re-exports the public API surface.

pub mod types;
pub mod policy;
pub mod document;
pub mod dns;
pub mod routing;
pub mod config;
pub mod settings;
pub mod cache;
pub mod process;
pub mod supervisor;
pub mod logging;
pub mod collaborators;
pub mod service;

pub use types::*;
pub use policy::{
    ConnectionOptions, DnsSettings, DnsUpstream, MetricsSettings, RegionRoutingSettings,
    SplitTunnelSettings,
};
pub use document::ConfigDocument;
pub use config::synthesize;
pub use settings::{CachePolicy, SupervisorSettings};
pub use supervisor::{EngineInfo, EngineSupervisor, SupervisorPhase};
pub use logging::{EngineLogLine, FnSink, LogFacadeSink, LogSink, LogStream, SharedLogSink};
pub use collaborators::{MetricsEndpoint, MetricsFeed, ProfileParser, SystemProxy};
pub use service::{ConnectRequest, ProfileRequest, ServiceStatus, VeilService, VeilServiceState};
