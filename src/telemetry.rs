use crate::models::Config;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("log_level '{level}' is not a valid filter directive")]
    Filter {
        level: String,
        #[source]
        source: ParseError,
    },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Filter for this run: `RUST_LOG` when set and valid, else `log_level` from
/// the config file.
fn filter_for(config: &Config) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.log_level).map_err(|source| TelemetryError::Filter {
        level: config.log_level.clone(),
        source,
    })
}

/// Diagnostics go to stderr so they never mix with the result table on stdout.
pub fn init(config: &Config) -> Result<(), TelemetryError> {
    let filter = filter_for(config)?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .try_init()
        .map_err(TelemetryError::AlreadyInstalled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_configured_level_names_the_value() {
        // Only meaningful when RUST_LOG does not override the config.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = Config {
            log_level: "seat_predictor=loudest".to_string(),
            ..Config::default()
        };
        let err = filter_for(&config).unwrap_err();
        assert!(matches!(err, TelemetryError::Filter { .. }));
        assert!(err.to_string().contains("seat_predictor=loudest"));
    }

    #[test]
    fn configured_level_is_used_without_env_override() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = Config {
            log_level: "debug".to_string(),
            ..Config::default()
        };
        assert!(filter_for(&config).is_ok());
    }
}
