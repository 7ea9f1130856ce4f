//! Client configuration

use crate::correlator::MatchStrategy;
use dlms_application::Authentication;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for dialing and talking to one meter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Meter or modem host name
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Client SAP sent in the AARQ
    #[serde(default = "default_client_id")]
    pub client_id: u8,

    #[serde(default)]
    pub authentication: Authentication,

    /// Timeout for reads, writes and actions, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Timeout for profile buffer reads, in seconds
    #[serde(default = "default_profile_timeout")]
    pub profile_timeout: u64,

    /// Timeout for TCP connect and each SNRM/AARQ/RLRQ/DISC step, in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,

    #[serde(default)]
    pub match_strategy: MatchStrategy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            authentication: Authentication::None,
            request_timeout: default_request_timeout(),
            profile_timeout: default_profile_timeout(),
            handshake_timeout: default_handshake_timeout(),
            match_strategy: MatchStrategy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_authentication(mut self, authentication: Authentication) -> Self {
        self.authentication = authentication;
        self
    }

    pub fn with_client_id(mut self, client_id: u8) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_match_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.match_strategy = strategy;
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn profile_timeout(&self) -> Duration {
        Duration::from_secs(self.profile_timeout)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4059
}

fn default_client_id() -> u8 {
    16
}

fn default_request_timeout() -> u64 {
    30
}

fn default_profile_timeout() -> u64 {
    60
}

fn default_handshake_timeout() -> u64 {
    5
}
