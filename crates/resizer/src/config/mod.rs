pub mod action;
pub mod cli;
pub mod daemon;
pub mod execute;

use std::time::Duration;

/// Timeouts, retry budgets and the placeholder scheduler used by one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionConfig {
    pub lock_timeout: Duration,
    pub lock_poll_interval: Duration,
    pub scheduler_retries: u32,
    pub controller_mutation_retries: u32,
    pub bare_pod_mutation_retries: u32,
    pub verify_attempts: u32,
    pub verify_interval: Duration,
    pub placeholder_scheduler: String,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(300),
            lock_poll_interval: Duration::from_secs(10),
            scheduler_retries: 3,
            controller_mutation_retries: 3,
            bare_pod_mutation_retries: 6,
            verify_attempts: 6,
            verify_interval: Duration::from_secs(30),
            placeholder_scheduler: "turbo-none-exist-scheduler".to_string(),
        }
    }
}

impl From<&action::ActionArgs> for ActionConfig {
    fn from(args: &action::ActionArgs) -> Self {
        let overrides = args.action_config.clone().unwrap_or_default();
        Self {
            lock_timeout: Duration::from_secs(
                overrides.lock_timeout_seconds.unwrap_or(args.lock_timeout_secs),
            ),
            lock_poll_interval: Duration::from_secs(
                overrides
                    .lock_poll_interval_seconds
                    .unwrap_or(args.lock_poll_interval_secs)
                    .max(1),
            ),
            scheduler_retries: overrides
                .scheduler_retries
                .unwrap_or(args.scheduler_retries)
                .max(1),
            controller_mutation_retries: overrides
                .controller_mutation_retries
                .unwrap_or(args.controller_mutation_retries)
                .max(1),
            bare_pod_mutation_retries: overrides
                .bare_pod_mutation_retries
                .unwrap_or(args.bare_pod_mutation_retries)
                .max(1),
            verify_attempts: overrides
                .verify_attempts
                .unwrap_or(args.verify_attempts)
                .max(1),
            verify_interval: Duration::from_secs(
                overrides
                    .verify_interval_seconds
                    .unwrap_or(args.verify_interval_secs),
            ),
            placeholder_scheduler: overrides
                .placeholder_scheduler
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| args.placeholder_scheduler.clone()),
        }
    }
}

/// Lease lifetime and the sweep period of the lease registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseConfig {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl From<&daemon::DaemonArgs> for LeaseConfig {
    fn from(args: &daemon::DaemonArgs) -> Self {
        Self {
            ttl: Duration::from_secs(args.action.lease_ttl_secs.max(1)),
            sweep_interval: Duration::from_secs(args.lease_sweep_interval_secs.max(1)),
        }
    }
}

pub use cli::*;
pub use daemon::*;
pub use execute::*;

#[cfg(test)]
mod tests {
    use clap::Parser;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn daemon_defaults_match_action_defaults() {
        let cli = Cli::try_parse_from(["resizer", "daemon"]).expect("should parse daemon");
        let Commands::Daemon(args) = cli.command else {
            panic!("expected the daemon subcommand");
        };

        assert_eq!(ActionConfig::from(&args.action), ActionConfig::default());
        assert_eq!(
            LeaseConfig::from(&*args),
            LeaseConfig {
                ttl: Duration::from_secs(30),
                sweep_interval: Duration::from_secs(5),
            }
        );
    }

    #[test]
    fn json_overrides_take_precedence_over_flags() {
        let cli = Cli::try_parse_from([
            "resizer",
            "execute",
            "--action",
            "/tmp/action.json",
            "--lock-timeout-secs",
            "60",
            "--verify-attempts",
            "2",
            "--action-config",
            r#"{"verifyAttempts": "4", "placeholderScheduler": "parked"}"#,
        ])
        .expect("should parse execute");
        let Commands::Execute(args) = cli.command else {
            panic!("expected the execute subcommand");
        };

        let config = ActionConfig::from(&args.tunables);
        assert_eq!(config.lock_timeout, Duration::from_secs(60));
        assert_eq!(config.verify_attempts, 4);
        assert_eq!(config.placeholder_scheduler, "parked");
        assert_eq!(config.bare_pod_mutation_retries, 6);
    }

    #[test]
    fn zero_retry_budgets_are_raised_to_one() {
        let cli = Cli::try_parse_from(["resizer", "daemon", "--scheduler-retries", "0"])
            .expect("should parse daemon");
        let Commands::Daemon(args) = cli.command else {
            panic!("expected the daemon subcommand");
        };
        assert_eq!(ActionConfig::from(&args.action).scheduler_retries, 1);
    }
}
