use std::time::Duration;

use url::Url;

use super::{Config, ConfigBuilder, RetryPolicy};
use crate::error::DriverError;

const SCHEME: &str = "file";

pub(super) fn parse(dsn: &str) -> Result<Config, DriverError> {
    let url = Url::parse(dsn)
        .map_err(|e| DriverError::ConfigError(format!("invalid connection string: {e}")))?;
    if url.scheme() != SCHEME {
        return Err(DriverError::ConfigError(format!(
            "unsupported scheme '{}', expected '{SCHEME}://<directory>'",
            url.scheme()
        )));
    }
    let directory = url.to_file_path().map_err(|()| {
        DriverError::ConfigError(format!(
            "connection string must name an absolute local directory: {dsn}"
        ))
    })?;

    let mut builder = ConfigBuilder::new(directory);
    let mut name = None;
    let mut email = None;
    let mut policy = RetryPolicy::default();
    let mut retry_params = false;

    for (key, value) in url.query_pairs() {
        let key = key.to_ascii_lowercase();
        let value = value.into_owned();
        if key.starts_with("open_retry") || key.starts_with("openretry") {
            return Err(DriverError::ConfigError(format!(
                "'{key}' is no longer supported; configure open retries with ConfigBuilder::open_backoff"
            )));
        }
        match key.as_str() {
            "commitname" => name = Some(value),
            "commitemail" => email = Some(value),
            "database" => builder = builder.database(value),
            "multistatements" => builder = builder.multi_statements(parse_bool(&key, &value)?),
            "clientfoundrows" => builder = builder.client_found_rows(parse_bool(&key, &value)?),
            "retry" => {
                policy.enabled = parse_bool(&key, &value)?;
                retry_params = true;
            }
            "retrytimeout" => {
                policy.timeout = parse_optional_duration(&key, &value)?;
                retry_params = true;
            }
            "retrymaxattempts" => {
                let attempts: u32 = value.parse().map_err(|_| {
                    DriverError::ConfigError(format!("{key}: expected a whole number, got '{value}'"))
                })?;
                policy.max_attempts = (attempts > 0).then_some(attempts);
                retry_params = true;
            }
            "retryinitialdelay" => {
                policy.initial_delay = parse_duration(&key, &value)?;
                retry_params = true;
            }
            "retrymaxdelay" => {
                policy.max_delay = parse_optional_duration(&key, &value)?;
                retry_params = true;
            }
            _ => builder = builder.param(key, value),
        }
    }

    builder = builder.committer(name.unwrap_or_default(), email.unwrap_or_default());
    if retry_params {
        builder = builder.dsn_retry_policy(policy);
    }
    Ok(builder.build())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, DriverError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(DriverError::ConfigError(format!(
            "{key}: expected a boolean, got '{value}'"
        ))),
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, DriverError> {
    humantime::parse_duration(value)
        .map_err(|e| DriverError::ConfigError(format!("{key}: invalid duration '{value}': {e}")))
}

/// `none` or `0` disables the limit.
fn parse_optional_duration(key: &str, value: &str) -> Result<Option<Duration>, DriverError> {
    if value.eq_ignore_ascii_case("none") || value == "0" {
        return Ok(None);
    }
    parse_duration(key, value).map(Some)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn parses_identity_flags_and_database() {
        let config = parse(
            "file:///srv/data?commitname=ci&commitemail=ci%40example.com&database=sales&multistatements=true&clientfoundrows=1",
        )
        .expect("valid dsn");
        assert_eq!(config.directory(), Path::new("/srv/data"));
        assert_eq!(config.identity().email, "ci@example.com");
        assert_eq!(config.database(), Some("sales"));
        assert!(config.multi_statements());
        assert!(config.client_found_rows());
        assert!(!config.retry_policy().enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_retry_family() {
        let config = parse(
            "file:///srv/data?commitname=ci&commitemail=ci@example.com&retry=true&retrytimeout=5s&retrymaxattempts=7&retryinitialdelay=25ms&retrymaxdelay=500ms",
        )
        .expect("valid dsn");
        let policy = config.retry_policy();
        assert!(policy.enabled);
        assert_eq!(policy.timeout, Some(Duration::from_secs(5)));
        assert_eq!(policy.max_attempts, Some(7));
        assert_eq!(policy.initial_delay, Duration::from_millis(25));
        assert_eq!(policy.max_delay, Some(Duration::from_millis(500)));
    }

    #[test]
    fn rejects_legacy_open_retry_params() {
        for key in ["open_retry", "openretry", "open_retry_max_elapsed", "OpenRetryMaxTries"] {
            let dsn = format!("file:///srv/data?commitname=ci&commitemail=e&{key}=true");
            let err = parse(&dsn).expect_err("legacy parameter");
            assert!(
                matches!(&err, DriverError::ConfigError(msg) if msg.contains("open_backoff")),
                "{key}: {err}"
            );
        }
    }

    #[test]
    fn rejects_bad_values_and_schemes() {
        assert!(parse("file:///srv/data?multistatements=maybe").is_err());
        assert!(parse("file:///srv/data?retrytimeout=soon").is_err());
        assert!(parse("mysql://localhost/db").is_err());
        assert!(parse("not a url").is_err());
    }

    #[test]
    fn keeps_unknown_params_and_defers_identity_check() {
        let config = parse("file:///srv/data?cache=shared").expect("parses");
        assert_eq!(config.param("cache"), Some("shared"));
        assert!(matches!(config.validate(), Err(DriverError::ConfigError(_))));
    }

    #[test]
    fn zero_disables_limits() {
        let config = parse("file:///srv/data?retrytimeout=0&retrymaxattempts=0").expect("parses");
        assert_eq!(config.retry_policy().timeout, None);
        assert_eq!(config.retry_policy().max_attempts, None);
    }
}
