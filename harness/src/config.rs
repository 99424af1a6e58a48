//! Environment driven configuration of the harness.
use std::time::Duration;

use clap::Parser;

use crate::retry::Timeouts;

/// Settings shared by every test of a suite run.
///
/// Every field is read from an `E2E_*` environment variable and falls back to the
/// defaults of a stock Open Data Hub installation.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "kube-eventually", about = "e2e harness settings")]
pub struct HarnessConfig {
    /// Namespace the operator runs in.
    #[arg(
        long,
        env = "E2E_OPERATOR_NAMESPACE",
        default_value = "opendatahub-operator-system"
    )]
    pub operator_namespace: String,

    /// Namespace applications are deployed to.
    #[arg(long, env = "E2E_APPS_NAMESPACE", default_value = "opendatahub")]
    pub apps_namespace: String,

    /// Namespace notebooks are created in.
    #[arg(
        long,
        env = "E2E_WORKBENCHES_NAMESPACE",
        default_value = "opendatahub"
    )]
    pub workbenches_namespace: String,

    /// Namespace the monitoring stack is deployed to.
    #[arg(
        long,
        env = "E2E_MONITORING_NAMESPACE",
        default_value = "opendatahub"
    )]
    pub monitoring_namespace: String,

    /// Name of the DSCInitialization resource.
    #[arg(long, env = "E2E_DSCI_NAME", default_value = "default-dsci")]
    pub dsci_name: String,

    /// Name of the DataScienceCluster resource.
    #[arg(long, env = "E2E_DSC_NAME", default_value = "default-dsc")]
    pub dsc_name: String,

    /// How long eventually assertions keep trying.
    #[arg(long, env = "E2E_EVENTUALLY_TIMEOUT", default_value = "5m", value_parser = parse_duration)]
    pub eventually_timeout: Duration,

    /// Pause between eventually attempts.
    #[arg(long, env = "E2E_EVENTUALLY_POLL_INTERVAL", default_value = "2s", value_parser = parse_duration)]
    pub eventually_poll_interval: Duration,

    /// How long consistently assertions keep checking.
    #[arg(long, env = "E2E_CONSISTENTLY_DURATION", default_value = "10s", value_parser = parse_duration)]
    pub consistently_duration: Duration,

    /// Pause between consistently checks.
    #[arg(long, env = "E2E_CONSISTENTLY_POLL_INTERVAL", default_value = "2s", value_parser = parse_duration)]
    pub consistently_poll_interval: Duration,

    /// Time for controller caches to observe a deletion.
    #[arg(long, env = "E2E_CACHE_REFRESH_DELAY", default_value = "5s", value_parser = parse_duration)]
    pub cache_refresh_delay: Duration,
}

impl HarnessConfig {
    /// Read the configuration from the environment only.
    pub fn from_env() -> Result<Self, clap::Error> {
        Self::try_parse_from(["kube-eventually"])
    }

    /// The timing derived from this configuration.
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            eventually_timeout: self.eventually_timeout,
            eventually_poll_interval: self.eventually_poll_interval,
            consistently_duration: self.consistently_duration,
            consistently_poll_interval: self.consistently_poll_interval,
            cache_refresh_delay: self.cache_refresh_delay,
        }
    }
}

/// Parse `500ms`, `10s`, `5m`, `1h` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{s}': expected a number"))?;
    let seconds = |per_unit: u64| {
        value
            .checked_mul(per_unit)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("invalid duration '{s}': too large"))
    };
    match unit {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => seconds(60),
        "h" => seconds(60 * 60),
        other => Err(format!("invalid duration '{s}': unknown unit '{other}'")),
    }
}
