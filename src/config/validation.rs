#![allow(clippy::collapsible_if)]

use std::{collections::HashSet, net::SocketAddr};

use eyre::Result;
use regex::Regex;
use url::Url;

use crate::config::models::{DevServerConfig, WatchConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid base path '{base}': {reason}")]
    InvalidBase { base: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Dev server configuration validator
pub struct DevServerConfigValidator;

impl DevServerConfigValidator {
    /// Validate the entire configuration, collecting every problem found
    pub fn validate(config: &DevServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_base(&config.base) {
            errors.push(e);
        }

        if let Some(site) = &config.site {
            if let Err(e) = Self::validate_site(site) {
                errors.push(e);
            }
        }

        if config.pages_dir.as_os_str().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "pages_dir".to_string(),
            });
        }

        if let Err(mut extension_errors) =
            Self::validate_extensions(&config.page_extensions, &config.endpoint_extensions)
        {
            errors.append(&mut extension_errors);
        }

        for name in config.client_directives.keys() {
            if let Err(e) = Self::validate_directive_name(name) {
                errors.push(e);
            }
        }

        if config.renderers.iter().any(|name| name.trim().is_empty()) {
            errors.push(ValidationError::InvalidField {
                field: "renderers".to_string(),
                message: "Renderer names cannot be empty".to_string(),
            });
        }

        if let Err(e) = Self::validate_watch_config(&config.watch) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:4321' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// The base must be an absolute URL path without query or fragment
    fn validate_base(base: &str) -> ValidationResult<()> {
        let invalid = |reason: &str| ValidationError::InvalidBase {
            base: base.to_string(),
            reason: reason.to_string(),
        };

        if !base.starts_with('/') {
            return Err(invalid("Base path must start with '/'"));
        }
        if base.contains("//") {
            return Err(invalid("Base path cannot contain empty segments"));
        }
        if base.contains(['?', '#']) {
            return Err(invalid("Base path cannot contain a query or fragment"));
        }
        if base.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(invalid("Base path cannot contain relative segments"));
        }
        Ok(())
    }

    fn validate_site(site: &str) -> ValidationResult<()> {
        match Url::parse(site) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
            Ok(url) => Err(ValidationError::InvalidField {
                field: "site".to_string(),
                message: format!("Unsupported scheme '{}', use http or https", url.scheme()),
            }),
            Err(e) => Err(ValidationError::InvalidField {
                field: "site".to_string(),
                message: format!("Invalid URL '{site}': {e}"),
            }),
        }
    }

    fn validate_extensions(
        page_extensions: &[String],
        endpoint_extensions: &[String],
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if page_extensions.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "page_extensions".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for ext in page_extensions.iter().chain(endpoint_extensions) {
            if ext.is_empty() || ext.starts_with('.') {
                errors.push(ValidationError::InvalidField {
                    field: format!("extension '{ext}'"),
                    message: "Extensions are written without the leading dot".to_string(),
                });
            } else if !seen.insert(ext.as_str()) {
                errors.push(ValidationError::InvalidField {
                    field: format!("extension '{ext}'"),
                    message: "Extension is listed more than once".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_directive_name(name: &str) -> ValidationResult<()> {
        let directive_regex = Regex::new(r"^[a-z][a-z0-9-]*$").expect("invalid directive regex");
        if !directive_regex.is_match(name) {
            return Err(ValidationError::InvalidField {
                field: format!("client_directives.{name}"),
                message: "Directive names must be lowercase kebab-case".to_string(),
            });
        }
        Ok(())
    }

    fn validate_watch_config(config: &WatchConfig) -> ValidationResult<()> {
        if config.queue_capacity == 0 {
            return Err(ValidationError::InvalidField {
                field: "watch.queue_capacity".to_string(),
                message: "Queue capacity must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_default_config() {
        assert!(DevServerConfigValidator::validate(&DevServerConfig::default()).is_ok());
    }

    #[test]
    fn validate_rejects_relative_base() {
        let config = DevServerConfig::builder().base("app").build();
        let err = DevServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("must start with '/'"));
    }

    #[test]
    fn validate_rejects_base_with_query() {
        let config = DevServerConfig::builder().base("/app?x=1").build();
        assert!(DevServerConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_non_http_site() {
        let config = DevServerConfig::builder().site("ftp://example.com").build();
        let err = DevServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("Unsupported scheme"));
    }

    #[test]
    fn validate_rejects_overlapping_extensions() {
        let mut config = DevServerConfig::default();
        config.endpoint_extensions.push("html".to_string());
        let err = DevServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn validate_collects_multiple_errors() {
        let mut config = DevServerConfig::builder()
            .listen_addr("localhost")
            .client_directive("Bad Name", "/x.js")
            .build();
        config.watch.queue_capacity = 0;
        let err = DevServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("Found 3 validation errors"));
    }
}
