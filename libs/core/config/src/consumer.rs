use crate::{env_or_default, ConfigError, FromEnv};

/// Consumer identity for stream consumer groups.
///
/// Each process that consumes from a stream registers with the group under a
/// stable name derived from its ordinal. Process managers that run multiple
/// instances assign each one a distinct ordinal via `CONSUMER_ID`; a single
/// unmanaged process falls back to ordinal `0`.
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub ordinal: String,
}

impl ConsumerConfig {
    pub fn new(ordinal: impl Into<String>) -> Self {
        Self {
            ordinal: ordinal.into(),
        }
    }

    /// Name this instance registers under within a consumer group.
    pub fn consumer_name(&self) -> String {
        format!("consumer:{}", self.ordinal)
    }
}

impl FromEnv for ConsumerConfig {
    /// CONSUMER_ID is optional; unmanaged instances default to ordinal 0
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            ordinal: env_or_default("CONSUMER_ID", "0"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_config_default_ordinal() {
        temp_env::with_var_unset("CONSUMER_ID", || {
            let config = ConsumerConfig::from_env().unwrap();
            assert_eq!(config.ordinal, "0");
            assert_eq!(config.consumer_name(), "consumer:0");
        });
    }

    #[test]
    fn test_consumer_config_env_override() {
        temp_env::with_var("CONSUMER_ID", Some("3"), || {
            let config = ConsumerConfig::from_env().unwrap();
            assert_eq!(config.ordinal, "3");
            assert_eq!(config.consumer_name(), "consumer:3");
        });
    }

    #[test]
    fn test_consumer_config_new() {
        let config = ConsumerConfig::new("7");
        assert_eq!(config.consumer_name(), "consumer:7");
    }
}
