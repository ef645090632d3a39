use std::fmt::Display;
use std::str::FromStr;

use clap::Args;
use serde::Deserialize;
use serde::Deserializer;

/// Tunables of the resize workflow shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ActionArgs {
    #[arg(
        long,
        env = "RESIZER_LEASE_TTL_SECS",
        default_value = "30",
        help = "Lifetime of a lock lease in seconds unless renewed"
    )]
    pub lease_ttl_secs: u64,

    #[arg(
        long,
        env = "RESIZER_LOCK_TIMEOUT_SECS",
        default_value = "300",
        help = "How long an action waits for its pod or controller lock"
    )]
    pub lock_timeout_secs: u64,

    #[arg(
        long,
        env = "RESIZER_LOCK_POLL_INTERVAL_SECS",
        default_value = "10",
        help = "Interval between lock attempts in seconds"
    )]
    pub lock_poll_interval_secs: u64,

    #[arg(
        long,
        default_value = "3",
        help = "Attempts to swap a controller's scheduler when writes conflict"
    )]
    pub scheduler_retries: u32,

    #[arg(
        long,
        default_value = "3",
        help = "Attempts to replace a controlled pod when writes conflict"
    )]
    pub controller_mutation_retries: u32,

    #[arg(
        long,
        default_value = "6",
        help = "Attempts to replace a bare pod when writes conflict"
    )]
    pub bare_pod_mutation_retries: u32,

    #[arg(
        long,
        default_value = "6",
        help = "Number of checks that the resized pod is running"
    )]
    pub verify_attempts: u32,

    #[arg(
        long,
        default_value = "30",
        help = "Interval between running checks in seconds"
    )]
    pub verify_interval_secs: u64,

    #[arg(
        long,
        env = "RESIZER_PLACEHOLDER_SCHEDULER",
        default_value = "turbo-none-exist-scheduler",
        help = "Scheduler name that no scheduler serves, used to park controller pods"
    )]
    pub placeholder_scheduler: String,

    #[arg(
        long,
        env = "RESIZER_ACTION_CONFIG",
        help = "Action tunables as a JSON string, overriding the flags above",
        value_parser = parse_action_overrides
    )]
    pub action_config: Option<ActionOverrides>,
}

/// JSON override of the action tunables. Numbers may be given as strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionOverrides {
    #[serde(deserialize_with = "deserialize_optional_number_from_string")]
    pub lock_timeout_seconds: Option<u64>,

    #[serde(deserialize_with = "deserialize_optional_number_from_string")]
    pub lock_poll_interval_seconds: Option<u64>,

    #[serde(deserialize_with = "deserialize_optional_number_from_string")]
    pub scheduler_retries: Option<u32>,

    #[serde(deserialize_with = "deserialize_optional_number_from_string")]
    pub controller_mutation_retries: Option<u32>,

    #[serde(deserialize_with = "deserialize_optional_number_from_string")]
    pub bare_pod_mutation_retries: Option<u32>,

    #[serde(deserialize_with = "deserialize_optional_number_from_string")]
    pub verify_attempts: Option<u32>,

    #[serde(deserialize_with = "deserialize_optional_number_from_string")]
    pub verify_interval_seconds: Option<u64>,

    pub placeholder_scheduler: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber<T> {
    String(String),
    Number(T),
}

/// Accepts `"30"` as well as `30`.
fn deserialize_optional_number_from_string<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    match Option::<StringOrNumber<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(StringOrNumber::String(s)) => s.trim().parse::<T>().map(Some).map_err(|e| {
            serde::de::Error::custom(format!("Failed to parse number from string '{s}': {e}"))
        }),
        Some(StringOrNumber::Number(n)) => Ok(Some(n)),
    }
}

fn parse_action_overrides(s: &str) -> Result<ActionOverrides, String> {
    serde_json::from_str(s).map_err(|e| format!("Failed to parse action config JSON: {e}"))
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn deserialize_overrides_from_string_numbers() {
        let json = r#"{
            "lockTimeoutSeconds": "120",
            "schedulerRetries": "5",
            "verifyIntervalSeconds": 10,
            "placeholderScheduler": "parked"
        }"#;

        let overrides: ActionOverrides =
            serde_json::from_str(json).expect("should deserialize overrides with string numbers");

        assert_eq!(
            overrides,
            ActionOverrides {
                lock_timeout_seconds: Some(120),
                scheduler_retries: Some(5),
                verify_interval_seconds: Some(10),
                placeholder_scheduler: Some("parked".to_string()),
                ..Default::default()
            }
        );
    }

    #[test]
    fn empty_overrides_change_nothing() {
        let overrides = parse_action_overrides("{}").expect("should parse empty object");
        assert_eq!(overrides, ActionOverrides::default());
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = parse_action_overrides(r#"{"verifyAttempts": "many"}"#).unwrap_err();
        assert!(err.contains("Failed to parse action config JSON"), "{err}");

        parse_action_overrides(r#"{"verifyAttempts": -1}"#).unwrap_err();
    }
}
