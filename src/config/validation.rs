//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, ports valid)
//! - Detect ports claimed by more than one endpoint
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashMap;

use thiserror::Error;

use crate::config::schema::{Protocol, ProxyConfig};
use crate::observability::logging::parse_level;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no [[proxy]] endpoints configured")]
    NoEndpoints,

    #[error("{protocol} endpoint #{index} has no ports")]
    EmptyPorts { index: usize, protocol: Protocol },

    #[error("{protocol} endpoint #{index} uses port 0")]
    ZeroPort { index: usize, protocol: Protocol },

    #[error("port {port} is claimed by both {first} and {second}")]
    DuplicatePort {
        port: u16,
        first: Protocol,
        second: Protocol,
    },

    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("unknown log level {0:?}")]
    UnknownLogLevel(String),
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.endpoints.is_empty() {
        errors.push(ValidationError::NoEndpoints);
    }

    let mut owners: HashMap<u16, Protocol> = HashMap::new();
    for (index, endpoint) in config.endpoints.iter().enumerate() {
        if endpoint.ports.is_empty() {
            errors.push(ValidationError::EmptyPorts {
                index,
                protocol: endpoint.protocol,
            });
        }
        for &port in &endpoint.ports {
            if port == 0 {
                errors.push(ValidationError::ZeroPort {
                    index,
                    protocol: endpoint.protocol,
                });
                continue;
            }
            if let Some(first) = owners.insert(port, endpoint.protocol) {
                errors.push(ValidationError::DuplicatePort {
                    port,
                    first,
                    second: endpoint.protocol,
                });
            }
        }
    }

    let positive = [
        ("listener.queue_capacity", config.listener.queue_capacity as u64),
        ("listener.max_header_bytes", config.listener.max_header_bytes as u64),
        ("admission.max_concurrent", config.admission.max_concurrent as u64),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.tunnel_idle_secs", config.timeouts.tunnel_idle_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::MustBePositive { field });
        }
    }

    if parse_level(&config.log.min_level).is_none() {
        errors.push(ValidationError::UnknownLogLevel(config.log.min_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ProxyEndpoint;

    fn valid() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.endpoints.push(ProxyEndpoint::new(Protocol::Http, [8080]));
        config.endpoints.push(ProxyEndpoint::new(Protocol::Https, [8443, 8444]));
        config
    }

    #[test]
    fn accepts_valid_config() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn rejects_missing_endpoints() {
        let errors = validate_config(&ProxyConfig::default()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::NoEndpoints]);
    }

    #[test]
    fn reports_every_problem() {
        let mut config = valid();
        config.endpoints.push(ProxyEndpoint::new(Protocol::Aggregate, [8080, 0]));
        config.endpoints.push(ProxyEndpoint::new(Protocol::Http, []));
        config.admission.max_concurrent = 0;
        config.log.min_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::ZeroPort {
            index: 2,
            protocol: Protocol::Aggregate
        }));
        assert!(errors.contains(&ValidationError::DuplicatePort {
            port: 8080,
            first: Protocol::Http,
            second: Protocol::Aggregate
        }));
        assert!(errors.contains(&ValidationError::EmptyPorts {
            index: 3,
            protocol: Protocol::Http
        }));
        assert!(errors.contains(&ValidationError::MustBePositive {
            field: "admission.max_concurrent"
        }));
        assert!(errors.contains(&ValidationError::UnknownLogLevel("loud".into())));
    }
}
