use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::parser::ParserOptions;
use crate::sink::aggregated::AggregatorOptions;

/// Top-level configuration for the trackoor pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Fixed `serverid` label on every metric. Default: empty.
    #[serde(default)]
    pub server_id: String,

    /// Fixed `sdpinst` label on every metric. Default: empty.
    #[serde(default)]
    pub sdp_instance: String,

    /// Wall-clock flush/publish interval for live runs. Default: 10s.
    #[serde(default = "default_update_interval", with = "humantime_serde")]
    pub update_interval: Duration,

    /// Emit per-user command metrics. Default: true.
    #[serde(default = "default_true")]
    pub output_cmds_by_user: bool,

    /// When non-empty, emit per-(user, command) metrics for users matching
    /// this regex. Default: empty.
    #[serde(default)]
    pub output_cmds_by_user_regex: String,

    /// Emit per-client-address command metrics. Default: true.
    #[serde(default = "default_true")]
    pub output_cmds_by_ip: bool,

    /// Keep user names as-is; when false, lowercase before keying.
    /// Default: true.
    #[serde(default = "default_true")]
    pub case_sensitive_server: bool,

    /// Log-time grace for records awaiting their completion header.
    /// Default: 30s.
    #[serde(default = "default_completion_wait", with = "humantime_serde")]
    pub completion_wait: Duration,

    /// Log-time grace after the completion header for trailing track
    /// records. Default: 1s.
    #[serde(default = "default_finalize_wait", with = "humantime_serde")]
    pub finalize_wait: Duration,

    /// Close records on the next start header for the pid instead of
    /// waiting for completion headers. Default: false.
    #[serde(default)]
    pub no_completion_records: bool,

    /// Drive flushing and publish ticks from log timestamps instead of wall
    /// time (deterministic replay of old logs). Default: false.
    #[serde(default)]
    pub historical: bool,

    /// Emit verbose diagnostics for this pid. Default: 0 (disabled).
    #[serde(default)]
    pub debug_pid: i64,

    /// Emit verbose diagnostics for this command name. Default: empty.
    #[serde(default)]
    pub debug_command_name: String,

    /// Metric output destinations.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metric output destinations; empty paths disable an output.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Keyed-pair snapshot file, atomically rewritten each publish.
    #[serde(default)]
    pub prom_file: String,

    /// Semicolon-tagged sample file, appended each publish (historical).
    #[serde(default)]
    pub tagged_file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_update_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_completion_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_finalize_wait() -> Duration {
    Duration::from_secs(1)
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server_id: String::new(),
            sdp_instance: String::new(),
            update_interval: default_update_interval(),
            output_cmds_by_user: true,
            output_cmds_by_user_regex: String::new(),
            output_cmds_by_ip: true,
            case_sensitive_server: true,
            completion_wait: default_completion_wait(),
            finalize_wait: default_finalize_wait(),
            no_completion_records: false,
            historical: false,
            debug_pid: 0,
            debug_command_name: String::new(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load from a YAML file and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let cfg: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject invalid values synchronously, before anything starts.
    pub fn validate(&self) -> Result<()> {
        if self.update_interval.is_zero() {
            bail!("update_interval must be > 0");
        }
        if self.completion_wait.is_zero() {
            bail!("completion_wait must be > 0");
        }
        if self.finalize_wait.is_zero() {
            bail!("finalize_wait must be > 0");
        }
        self.user_regex().map(|_| ())
    }

    /// Compile the user-detail regex; None when unset.
    pub fn user_regex(&self) -> Result<Option<Regex>> {
        if self.output_cmds_by_user_regex.is_empty() {
            return Ok(None);
        }
        let re = Regex::new(&self.output_cmds_by_user_regex).with_context(|| {
            format!(
                "invalid output_cmds_by_user_regex: {}",
                self.output_cmds_by_user_regex
            )
        })?;
        Ok(Some(re))
    }

    /// Parser knobs.
    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            completion_wait: self.completion_wait,
            finalize_wait: self.finalize_wait,
            update_interval: self.update_interval,
            no_completion_records: self.no_completion_records,
            historical: self.historical,
            debug_pid: self.debug_pid,
            debug_command_name: self.debug_command_name.clone(),
        }
    }

    /// Aggregator knobs; fails on an invalid user regex.
    pub fn aggregator_options(&self) -> Result<AggregatorOptions> {
        Ok(AggregatorOptions {
            server_id: self.server_id.clone(),
            sdp_instance: self.sdp_instance.clone(),
            output_cmds_by_user: self.output_cmds_by_user,
            output_cmds_by_ip: self.output_cmds_by_ip,
            case_sensitive_server: self.case_sensitive_server,
            user_regex: self.user_regex()?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.update_interval, Duration::from_secs(10));
        assert_eq!(cfg.completion_wait, Duration::from_secs(30));
        assert_eq!(cfg.finalize_wait, Duration::from_secs(1));
        assert!(cfg.output_cmds_by_user);
        assert!(cfg.output_cmds_by_ip);
        assert!(cfg.case_sensitive_server);
        assert!(!cfg.no_completion_records);
        assert!(!cfg.historical);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_full_yaml() {
        let cfg: Config = serde_yaml::from_str(
            r"
server_id: master.1
sdp_instance: '1'
update_interval: 15s
output_cmds_by_user: false
output_cmds_by_user_regex: '^svc_'
case_sensitive_server: false
completion_wait: 45s
finalize_wait: 2s
no_completion_records: true
historical: true
debug_pid: 1616
debug_command_name: user-sync
metrics:
  prom_file: /tmp/p4.prom
  tagged_file: /tmp/p4.metrics
",
        )
        .unwrap();

        assert_eq!(cfg.server_id, "master.1");
        assert_eq!(cfg.update_interval, Duration::from_secs(15));
        assert_eq!(cfg.completion_wait, Duration::from_secs(45));
        assert!(!cfg.output_cmds_by_user);
        assert!(cfg.historical);
        assert_eq!(cfg.metrics.prom_file, "/tmp/p4.prom");
        assert!(cfg.validate().is_ok());
        assert!(cfg.user_regex().unwrap().is_some());
    }

    #[test]
    fn test_invalid_regex_rejected_at_validation() {
        let cfg: Config =
            serde_yaml::from_str("output_cmds_by_user_regex: '['").unwrap();
        assert!(cfg.validate().is_err());
        assert!(cfg.aggregator_options().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let cfg: Config = serde_yaml::from_str("update_interval: 0s").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let res: Result<Config, _> = serde_yaml::from_str("no_such_key: 1");
        assert!(res.is_err());
    }

    #[test]
    fn test_options_conversion() {
        let cfg = Config::default();
        let popts = cfg.parser_options();
        assert_eq!(popts.completion_wait, Duration::from_secs(30));
        let aopts = cfg.aggregator_options().unwrap();
        assert!(aopts.user_regex.is_none());
        assert!(aopts.output_cmds_by_user);
    }
}
