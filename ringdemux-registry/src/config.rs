use crate::error::Error;

/// Configuration for a [`Registry`](crate::Registry).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of simultaneously live connections. `create` fails
    /// with [`Error::ResourceExhausted`] once reached. Default: 16000.
    pub max_connections: usize,
    /// Slots and index buckets reserved up front. Default: 64.
    pub initial_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 16000,
            initial_capacity: 64,
        }
    }
}

impl RegistryConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_connections == 0 {
            return Err(Error::InvalidConfig("max_connections must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(RegistryConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_capacity_rejected() {
        let config = RegistryConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
