//! Configuration handling for the collector daemon.
//!
//! Settings resolve in layers: built-in defaults, then the optional YAML
//! config file, then environment variables, then command-line flags.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use ipfix_collector::{BindAddress, CollectorConfig};
use serde::Deserialize;
use tracing::{info, warn};

/// Default listen endpoint (the IANA-assigned IPFIX port)
pub const DEFAULT_LISTEN: &str = "tcp://0.0.0.0:4739";

const DEFAULT_MAX_BUFFER_SIZE: usize = 65535;

/// Optional settings read from the YAML config file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Listen endpoint, e.g. `udp://0.0.0.0:4739`
    pub listen: Option<String>,
    /// Largest acceptable message in bytes
    pub max_buffer_size: Option<usize>,
    /// Template lifetime for UDP exporters in seconds; 0 disables expiry
    pub template_ttl: Option<u64>,
    /// Fail messages declaring unregistered elements
    pub strict_elements: Option<bool>,
}

impl FileConfig {
    /// Read the config file, falling back to defaults when it is missing
    /// or does not parse.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_yaml::from_str(&content) {
                Ok(config) => {
                    info!("loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(e) => {
                    warn!(
                        "cannot parse config file {:?} ({}), using defaults",
                        path.as_ref(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => {
                warn!("config file {:?} not found, using defaults", path.as_ref());
                Self::default()
            }
        }
    }

    fn apply_environment_overrides(&mut self) {
        if let Ok(listen) = std::env::var("IPFIX_LISTEN") {
            info!("listen endpoint overridden by environment: {}", listen);
            self.listen = Some(listen);
        }
        if let Ok(value) = std::env::var("IPFIX_MAX_BUFFER_SIZE") {
            if let Ok(size) = value.parse() {
                self.max_buffer_size = Some(size);
            }
        }
        if let Ok(value) = std::env::var("IPFIX_TEMPLATE_TTL") {
            if let Ok(seconds) = value.parse() {
                self.template_ttl = Some(seconds);
            }
        }
    }

    /// Resolve the final collector configuration; `None` flags fall back
    /// to environment, file, and defaults in that order.
    pub fn resolve(
        mut self,
        listen: Option<BindAddress>,
        max_buffer_size: Option<usize>,
        template_ttl: Option<Duration>,
        strict_elements: bool,
    ) -> Result<CollectorConfig> {
        self.apply_environment_overrides();

        let bind = match listen {
            Some(bind) => bind,
            None => self.listen.as_deref().unwrap_or(DEFAULT_LISTEN).parse()?,
        };

        let mut config = CollectorConfig::new(bind);
        config.max_buffer_size = max_buffer_size
            .or(self.max_buffer_size)
            .unwrap_or(DEFAULT_MAX_BUFFER_SIZE);
        config.template_ttl = template_ttl
            .or_else(|| self.template_ttl.map(Duration::from_secs))
            .unwrap_or(Duration::ZERO);
        config.strict_elements = strict_elements || self.strict_elements.unwrap_or(false);
        Ok(config)
    }
}
