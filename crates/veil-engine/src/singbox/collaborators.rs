//! Interfaces to the host-side collaborators the service drives but does not
//! implement: descriptor parsing, OS system-proxy toggling and the traffic
//! metrics poller.

use crate::singbox::policy::MetricsSettings;
use crate::singbox::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Turns a connection descriptor (e.g. a `vless://` URI) into a [`Profile`].
pub trait ProfileParser: Send + Sync {
    fn parse(&self, descriptor: &str) -> Result<Profile, SingBoxError>;
}

/// OS-level system proxy switch.
#[async_trait]
pub trait SystemProxy: Send + Sync {
    async fn enable(&self, host: &str, port: u16) -> Result<(), SingBoxError>;
    async fn disable(&self) -> Result<(), SingBoxError>;
}

/// Side-channel traffic metrics reader.
#[async_trait]
pub trait MetricsFeed: Send + Sync {
    /// Begin polling; replaces any running poll.
    async fn start(&self, endpoint: MetricsEndpoint);
    async fn stop(&self);
}

/// Where the metrics feed reads traffic samples from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsEndpoint {
    /// Full URL of the streaming traffic endpoint.
    pub url: String,
    /// Bearer token, if the endpoint is protected.
    pub token: Option<String>,
}

impl MetricsEndpoint {
    /// `http://<listen>/traffic`, keeping an explicit scheme if present.
    pub fn from_settings(settings: &MetricsSettings) -> Self {
        let listen = settings.listen();
        let base = if listen.contains("://") {
            listen
        } else {
            format!("http://{}", listen)
        };
        Self {
            url: format!("{}/traffic", base.trim_end_matches('/')),
            token: settings.token(),
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {}", t))
    }
}
