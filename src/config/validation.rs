//! Configuration validation.
//!
//! Only listen addresses need semantic checks beyond parsing: they must be
//! `host:port` with a numeric port. The host may be empty (`:3000`), which
//! binds every interface.

use crate::config::loader::ConfigError;

/// Check that `value` is usable as a listen address for `key`.
pub fn validate_listen_addr(key: &'static str, value: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &'static str| ConfigError::InvalidAddress {
        key,
        value: value.to_string(),
        reason,
    };

    let (host, port) = value.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
    if port.is_empty() {
        return Err(invalid("missing port"));
    }
    port.parse::<u16>().map_err(|_| invalid("port is not a number in 0-65535"))?;

    if host.starts_with('[') != host.ends_with(']') {
        return Err(invalid("unbalanced brackets around IPv6 host"));
    }
    if host.contains(char::is_whitespace) {
        return Err(invalid("host contains whitespace"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_forms() {
        assert!(validate_listen_addr("API_HOST", "0.0.0.0:3000").is_ok());
        assert!(validate_listen_addr("API_HOST", "localhost:8080").is_ok());
        assert!(validate_listen_addr("API_HOST", ":3000").is_ok());
        assert!(validate_listen_addr("API_HOST", "[::1]:0").is_ok());
    }

    #[test]
    fn rejects_missing_or_bad_port() {
        for value in ["localhost", "localhost:", "host:http", "host:70000", "[::1:80"] {
            let err = validate_listen_addr("DEBUG_HOST", value).unwrap_err();
            assert_eq!(err.key(), "DEBUG_HOST", "value {value:?}");
        }
    }
}
