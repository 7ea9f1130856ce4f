//! Gateway configuration file

use anyhow::{Context, Result};
use dlms_server::{ServerConfig, StaticMeterDirectory};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

/// Top-level YAML document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Meters allowed to dial in
    #[serde(default)]
    pub meters: Vec<MeterEntry>,
}

/// One known meter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterEntry {
    /// Meter number the meter announces when associating
    pub number: String,
    /// Backend id readings are reported under
    pub id: String,
    /// Fixed address, for meters that do not announce their number
    #[serde(default)]
    pub ip: Option<IpAddr>,
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid configuration file: {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(text).context("Failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut numbers = std::collections::HashSet::new();
        for meter in &self.meters {
            if meter.number.is_empty() || meter.id.is_empty() {
                anyhow::bail!("meter entries need both a number and an id");
            }
            if !numbers.insert(meter.number.as_str()) {
                anyhow::bail!("meter number {} listed twice", meter.number);
            }
        }
        Ok(())
    }

    pub fn directory(&self) -> StaticMeterDirectory {
        let mut directory = StaticMeterDirectory::new();
        for meter in &self.meters {
            directory.insert(meter.number.clone(), meter.id.clone(), meter.ip);
        }
        directory
    }
}
