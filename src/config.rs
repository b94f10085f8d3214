//! Command-line and environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use simcloud_common::telemetry::{LogFormat, TelemetryConfig};
use simcloud_driver::{DeletePolicy, DriverSettings};

/// Simulated cloud provider for machine-controller-manager
#[derive(Parser, Debug)]
#[command(name = "simcloud-provider", version, about, long_about = None)]
pub struct Cli {
    /// Path to a kubeconfig for the cluster state store (inferred if unset)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace holding the MachineClasses
    #[arg(long, env = "SIMCLOUD_NAMESPACE")]
    pub namespace: String,

    /// Quota policy file; derived from the MachineClasses if missing
    #[arg(
        long,
        env = "SIMCLOUD_POLICY_PATH",
        default_value = simcloud_driver::policy::DEFAULT_POLICY_PATH
    )]
    pub policy_path: PathBuf,

    /// Seconds between policy file checks
    #[arg(
        long,
        env = "SIMCLOUD_POLICY_POLL_SECS",
        default_value = "10",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub policy_poll_interval: u64,

    /// Amount for quotas derived from MachineClasses
    #[arg(long, env = "SIMCLOUD_DEFAULT_QUOTA", default_value = "5")]
    pub default_quota: u32,

    /// DeleteMachine behaviour: forget or remove-from-store
    #[arg(long, env = "SIMCLOUD_DELETE_POLICY", default_value = "forget")]
    pub delete_policy: DeletePolicy,

    /// Address the driver API listens on
    #[arg(long, env = "SIMCLOUD_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// Log output: text or json
    #[arg(long, env = "SIMCLOUD_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Settings handed to the driver
    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            namespace: self.namespace.clone(),
            policy_path: self.policy_path.clone(),
            poll_interval: Duration::from_secs(self.policy_poll_interval),
            default_quota: self.default_quota,
            delete_policy: self.delete_policy,
        }
    }

    /// Logging setup
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            format: self.log_format,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_only_namespace_given() {
        let cli = Cli::try_parse_from(["simcloud-provider", "--namespace", "shoot--dev"]).unwrap();
        let settings = cli.driver_settings();

        assert_eq!(settings.namespace, "shoot--dev");
        assert_eq!(settings.policy_path, PathBuf::from("gen/simulation-config.json"));
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.default_quota, 5);
        assert_eq!(settings.delete_policy, DeletePolicy::Forget);
        assert_eq!(cli.listen_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(cli.telemetry_config().format, LogFormat::Text);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "simcloud-provider",
            "--namespace",
            "shoot--dev",
            "--policy-path",
            "/etc/simcloud/policy.json",
            "--policy-poll-interval",
            "2",
            "--default-quota",
            "12",
            "--delete-policy",
            "remove-from-store",
            "--listen-addr",
            "127.0.0.1:9000",
            "--log-format",
            "json",
        ])
        .unwrap();
        let settings = cli.driver_settings();

        assert_eq!(settings.policy_path, PathBuf::from("/etc/simcloud/policy.json"));
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
        assert_eq!(settings.default_quota, 12);
        assert_eq!(settings.delete_policy, DeletePolicy::RemoveFromStore);
        assert_eq!(cli.listen_addr.port(), 9000);
        assert_eq!(cli.telemetry_config().format, LogFormat::Json);
    }

    #[test]
    fn rejects_zero_poll_interval_and_unknown_delete_policy() {
        assert!(Cli::try_parse_from([
            "simcloud-provider",
            "--namespace",
            "ns",
            "--policy-poll-interval",
            "0"
        ])
        .is_err());
        assert!(Cli::try_parse_from([
            "simcloud-provider",
            "--namespace",
            "ns",
            "--delete-policy",
            "purge"
        ])
        .is_err());
    }
}
