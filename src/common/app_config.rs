// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

static GLOBAL: OnceLock<MicaRocksConfig> = OnceLock::new();

/// The process-wide configuration, loaded on first use. Search order:
/// `$MICAROCKS_CONFIG`, then `./micarocks.toml`.
pub fn config() -> Result<&'static MicaRocksConfig> {
    if let Some(cfg) = GLOBAL.get() {
        return Ok(cfg);
    }
    let path = locate_config_file()?;
    install(MicaRocksConfig::load_from_file(&path)?)
}

/// Load from an explicit path. A configuration that was already installed
/// wins; the file is not re-read.
pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static MicaRocksConfig> {
    if let Some(cfg) = GLOBAL.get() {
        return Ok(cfg);
    }
    install(MicaRocksConfig::load_from_file(path.as_ref())?)
}

fn install(cfg: MicaRocksConfig) -> Result<&'static MicaRocksConfig> {
    Ok(GLOBAL.get_or_init(|| cfg))
}

fn locate_config_file() -> Result<PathBuf> {
    if let Some(path) = env::var_os("MICAROCKS_CONFIG").filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let fallback = Path::new("micarocks.toml");
    if fallback.exists() {
        return Ok(fallback.to_path_buf());
    }
    Err(anyhow!(
        "no configuration found: set MICAROCKS_CONFIG or place micarocks.toml \
         in the working directory"
    ))
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct MicaRocksConfig {
    pub log: LogConfig,
    pub server: ServerConfig,
    pub tablet: TabletConfig,
    pub rpc: RpcConfig,
}

impl MicaRocksConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let cfg: Self =
            toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
        cfg.validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.tablet.validate()?;
        validate_transaction_memory_and_rpc_size(&self.tablet, &self.rpc)?;
        Ok(())
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Base log level ("info", "debug", ...).
    pub level: String,
    /// Full tracing `EnvFilter` expression; overrides `level` when set.
    /// Example: "micarocks=debug,info".
    pub filter: Option<String>,
}

impl LogConfig {
    /// The filter string handed to the subscriber.
    pub fn effective_filter(&self) -> &str {
        self.filter.as_deref().unwrap_or(&self.level)
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            filter: None,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub data_dir: String,
    pub report_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            data_dir: "micarocks-data".to_string(),
            report_interval_secs: 30,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TabletConfig {
    /// Maximum memory consumed by all in-flight transactions of one tablet,
    /// in MiB. When the limit is reached new transactions are rejected and
    /// clients must retry. -1 disables transaction memory tracking.
    pub transaction_memory_limit_mb: i64,
    /// Number of threads available to open tablets at startup.
    pub num_tablets_to_open_simultaneously: usize,
    /// A tablet taking longer than this to start logs a warning with a trace.
    pub start_warn_threshold_ms: u64,
}

impl TabletConfig {
    pub fn transaction_memory_limit_bytes(&self) -> i64 {
        if self.transaction_memory_limit_mb < 0 {
            -1
        } else {
            self.transaction_memory_limit_mb * 1024 * 1024
        }
    }

    fn validate(&self) -> Result<()> {
        if self.transaction_memory_limit_mb < -1 {
            bail!(
                "{}: invalid value for tablet.transaction_memory_limit_mb",
                self.transaction_memory_limit_mb
            );
        }
        if self.num_tablets_to_open_simultaneously == 0 {
            bail!("tablet.num_tablets_to_open_simultaneously must be positive");
        }
        if self.start_warn_threshold_ms == 0 {
            bail!("tablet.start_warn_threshold_ms must be positive");
        }
        Ok(())
    }
}

impl Default for TabletConfig {
    fn default() -> Self {
        Self {
            transaction_memory_limit_mb: 64,
            num_tablets_to_open_simultaneously: 50,
            start_warn_threshold_ms: 500,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Largest inbound RPC message accepted, in bytes. Referenced here only
    /// by the cross-check against the transaction memory limit.
    pub max_message_size: i64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_message_size: 50 * 1024 * 1024,
        }
    }
}

/// A transaction memory limit smaller than the largest admissible RPC would
/// reject every maximum-size write outright, so the combination is refused
/// at startup.
fn validate_transaction_memory_and_rpc_size(tablet: &TabletConfig, rpc: &RpcConfig) -> Result<()> {
    let transaction_max_size = tablet.transaction_memory_limit_bytes();
    if transaction_max_size >= 0 && transaction_max_size < rpc.max_message_size {
        let suggested_mb = (rpc.max_message_size + 1024 * 1024 - 1) / (1024 * 1024);
        bail!(
            "tablet.transaction_memory_limit_mb is set too low compared with \
             rpc.max_message_size; increase tablet.transaction_memory_limit_mb \
             at least up to {suggested_mb}"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{LogConfig, MicaRocksConfig, RpcConfig, TabletConfig};

    #[test]
    fn defaults_pass_validation() {
        let cfg = MicaRocksConfig::default();
        cfg.validate().expect("defaults are valid");
        assert_eq!(cfg.tablet.transaction_memory_limit_mb, 64);
        assert_eq!(cfg.tablet.num_tablets_to_open_simultaneously, 50);
        assert_eq!(cfg.tablet.start_warn_threshold_ms, 500);
    }

    #[test]
    fn memory_limit_below_sentinel_is_rejected() {
        let cfg = MicaRocksConfig {
            tablet: TabletConfig {
                transaction_memory_limit_mb: -2,
                ..TabletConfig::default()
            },
            ..MicaRocksConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sentinel_disables_memory_tracking_and_cross_check() {
        let cfg = MicaRocksConfig {
            tablet: TabletConfig {
                transaction_memory_limit_mb: -1,
                ..TabletConfig::default()
            },
            rpc: RpcConfig {
                max_message_size: i64::MAX,
            },
            ..MicaRocksConfig::default()
        };
        cfg.validate().expect("-1 skips the cross-check");
        assert_eq!(cfg.tablet.transaction_memory_limit_bytes(), -1);
    }

    #[test]
    fn cross_check_suggests_smallest_acceptable_limit() {
        let cfg = MicaRocksConfig {
            tablet: TabletConfig {
                transaction_memory_limit_mb: 1,
                ..TabletConfig::default()
            },
            rpc: RpcConfig {
                max_message_size: 3 * 1024 * 1024 + 1,
            },
            ..MicaRocksConfig::default()
        };
        let err = cfg.validate().expect_err("limit below rpc max");
        let msg = format!("{err:#}");
        assert!(msg.contains("at least up to 4"), "{msg}");
    }

    #[test]
    fn filter_overrides_level() {
        let log = LogConfig {
            level: "info".to_string(),
            filter: Some("micarocks=debug,warn".to_string()),
        };
        assert_eq!(log.effective_filter(), "micarocks=debug,warn");
        assert_eq!(LogConfig::default().effective_filter(), "info");
    }

    #[test]
    fn toml_round_trip_with_overrides() {
        let cfg: MicaRocksConfig = toml::from_str(
            r#"
            [log]
            level = "debug"

            [tablet]
            transaction_memory_limit_mb = 128
            num_tablets_to_open_simultaneously = 4
            "#,
        )
        .expect("parse");
        cfg.validate().expect("valid");
        assert_eq!(cfg.log.level, "debug");
        assert_eq!(cfg.tablet.transaction_memory_limit_mb, 128);
        assert_eq!(cfg.tablet.num_tablets_to_open_simultaneously, 4);
        assert_eq!(cfg.tablet.start_warn_threshold_ms, 500);
    }
}
