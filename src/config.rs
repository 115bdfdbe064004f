//! Runtime configuration, read from the environment.

use crate::InitError;
use std::{path::PathBuf, str::FromStr, time::Duration};

const DEFAULT_ENDPOINT: &str = "http://localhost:4317";
const DEFAULT_LOG_PATH: &str = "otel_sla_logs.json";
const DEFAULT_LOG_MESSAGE: &str = "otel-sla-logs";
const DEFAULT_SERVICE_NAME: &str = "otel-sla";
const DEFAULT_GAUGE_NAME: &str = "otel.sla.metric";
const DEFAULT_COUNTER_NAME: &str = "allocated_memory_in_mb";

const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything tunable about the process. [`Config::default`] reproduces the
/// fixed constants the process has always used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// OTLP/gRPC collector endpoint. Plaintext, gzip compressed.
    pub endpoint: String,
    /// How often the periodic reader collects and exports metrics.
    pub export_interval: Duration,
    /// How often the sampling loop ticks.
    pub tick_interval: Duration,
    /// Upper bound on exporter construction.
    pub setup_timeout: Duration,
    pub log_path: PathBuf,
    pub log_message: String,
    pub service_name: String,
    /// Name of the pulled memory gauge.
    pub gauge_name: String,
    /// Name of the pushed memory counter.
    pub counter_name: String,
    /// Serve self-metrics in Prometheus format on this port.
    pub prometheus_port: Option<u16>,
    /// Export tracing spans to the collector as well as metrics.
    pub export_traces: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            export_interval: DEFAULT_EXPORT_INTERVAL,
            tick_interval: DEFAULT_TICK_INTERVAL,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            log_message: DEFAULT_LOG_MESSAGE.to_owned(),
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            gauge_name: DEFAULT_GAUGE_NAME.to_owned(),
            counter_name: DEFAULT_COUNTER_NAME.to_owned(),
            prometheus_port: None,
            export_traces: false,
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, InitError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names. Unset variables keep
    /// their defaults; set but unparseable ones are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, InitError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(endpoint) = lookup("OTEL_SLA_ENDPOINT")
            .or_else(|| lookup("OTEL_EXPORTER_OTLP_ENDPOINT"))
        {
            config.endpoint = endpoint;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "OTEL_SLA_EXPORT_INTERVAL_SECS")? {
            config.export_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "OTEL_SLA_TICK_INTERVAL_SECS")? {
            config.tick_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "OTEL_SLA_SETUP_TIMEOUT_SECS")? {
            config.setup_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = lookup("OTEL_SLA_LOG_PATH") {
            config.log_path = PathBuf::from(path);
        }
        if let Some(message) = lookup("OTEL_SLA_LOG_MESSAGE") {
            config.log_message = message;
        }
        if let Some(name) = lookup("OTEL_SLA_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Some(name) = lookup("OTEL_SLA_GAUGE_NAME") {
            config.gauge_name = name;
        }
        if let Some(name) = lookup("OTEL_SLA_COUNTER_NAME") {
            config.counter_name = name;
        }
        config.prometheus_port = parse_var(&lookup, "OTEL_SLA_PROMETHEUS_PORT")?;
        config.export_traces = parse_var(&lookup, "OTEL_SLA_EXPORT_TRACES")?.unwrap_or(false);

        config.validate()?;
        Ok(config)
    }

    /// Reject values the emitter or loop cannot work with.
    pub fn validate(&self) -> Result<(), InitError> {
        if self.service_name.trim().is_empty() {
            return Err(InitError::Configuration("service name is empty".into()));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(InitError::Configuration(format!(
                "endpoint {:?} must be an http:// or https:// URI",
                self.endpoint
            )));
        }
        for (name, interval) in [
            ("export interval", self.export_interval),
            ("tick interval", self.tick_interval),
            ("setup timeout", self.setup_timeout),
        ] {
            if interval.is_zero() {
                return Err(InitError::Configuration(format!("{name} must be non-zero")));
            }
        }
        validate_instrument_name(&self.gauge_name)?;
        validate_instrument_name(&self.counter_name)?;
        Ok(())
    }
}

/// Instrument names must start with a letter and contain at most 255
/// characters from `[A-Za-z0-9_./-]`.
fn validate_instrument_name(name: &str) -> Result<(), InitError> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && name.len() <= 255
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/'));

    if valid {
        Ok(())
    } else {
        Err(InitError::Instrument(format!(
            "{name:?} is not a valid instrument name"
        )))
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, InitError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|err| {
                InitError::Configuration(format!("{key}={raw:?} could not be parsed: {err}"))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_fixed_constants() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.endpoint, "http://localhost:4317");
        assert_eq!(config.export_interval, Duration::from_secs(10));
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.setup_timeout, Duration::from_secs(5));
        assert_eq!(config.log_path, PathBuf::from("otel_sla_logs.json"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("OTEL_SLA_ENDPOINT", "http://collector:4317"),
            ("OTEL_SLA_TICK_INTERVAL_SECS", "1"),
            ("OTEL_SLA_PROMETHEUS_PORT", "9000"),
            ("OTEL_SLA_EXPORT_TRACES", "true"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint, "http://collector:4317");
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.prometheus_port, Some(9000));
        assert!(config.export_traces);
    }

    #[test]
    fn own_endpoint_wins_over_generic_otlp_variable() {
        let config = Config::from_lookup(lookup_from(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://generic:4317"),
            ("OTEL_SLA_ENDPOINT", "http://specific:4317"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint, "http://specific:4317");

        let config = Config::from_lookup(lookup_from(&[(
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            "http://generic:4317",
        )]))
        .unwrap();
        assert_eq!(config.endpoint, "http://generic:4317");
    }

    #[test]
    fn unparseable_value_names_the_variable() {
        let err = Config::from_lookup(lookup_from(&[("OTEL_SLA_TICK_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, InitError::Configuration(_)));
        assert!(err.to_string().contains("OTEL_SLA_TICK_INTERVAL_SECS"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("OTEL_SLA_EXPORT_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert!(matches!(err, InitError::Configuration(_)));
    }

    #[test]
    fn endpoint_without_scheme_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("OTEL_SLA_ENDPOINT", "localhost:4317")]))
            .unwrap_err();
        assert!(matches!(err, InitError::Configuration(_)));
    }

    #[test]
    fn bad_instrument_name_is_rejected_at_load() {
        let err = Config::from_lookup(lookup_from(&[("OTEL_SLA_GAUGE_NAME", "memory usage")]))
            .unwrap_err();
        assert!(matches!(err, InitError::Instrument(_)));
    }

    #[test]
    fn instrument_names() {
        assert!(validate_instrument_name("otel.sla.metric").is_ok());
        assert!(validate_instrument_name("allocated_memory_in_mb").is_ok());
        assert!(validate_instrument_name("a/b-c").is_ok());
        assert!(validate_instrument_name("").is_err());
        assert!(validate_instrument_name("_leading").is_err());
        assert!(validate_instrument_name("has space").is_err());
        assert!(validate_instrument_name(&"a".repeat(256)).is_err());
    }
}
