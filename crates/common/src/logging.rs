//! Subscriber setup for the `animmuf` binary.
//!
//! Logs go to stderr; stdout belongs to the run summary and `--json`.
//! A bare level such as `debug` applies to AnimMUF's own crates while the
//! HTTP and TLS stack stays at `warn`. `RUST_LOG` overrides both.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Dependencies that flood debug output with connection chatter.
const QUIET_DEPENDENCIES: &[&str] = &["h2", "hyper", "hyper_util", "reqwest", "rustls"];

/// Filter directives for a configured level.
///
/// Anything already containing `=` or `,` is a full directive string and
/// passes through untouched.
pub fn filter_directives(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    let mut directives = vec![level.to_string()];
    directives.extend(QUIET_DEPENDENCIES.iter().map(|name| format!("{name}=warn")));
    directives.join(",")
}

/// Install the global subscriber. Later calls leave the first one in place.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config.level)));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.with_target(true).with_line_number(true).try_init()
    };
    if let Err(err) = installed {
        tracing::debug!(error = %err, "Subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_level_quiets_http_stack() {
        let directives = filter_directives("debug");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(directives.contains("hyper=warn"));
        assert!(directives.parse::<EnvFilter>().is_ok());
    }

    #[test]
    fn test_explicit_directives_pass_through() {
        assert_eq!(
            filter_directives(" animmuf_pipeline=trace,info "),
            "animmuf_pipeline=trace,info"
        );
    }

    #[test]
    fn test_second_init_is_harmless() {
        let config = LoggingConfig::default();
        init_logging(&config);
        init_logging(&config);
    }
}
