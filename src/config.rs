use std::time::Duration;

///
/// Connection settings for an [`EtcdRepository`](crate::repository::EtcdRepository).
///
/// Settings are carried as a plain struct and checked by [`validate`](Self::validate)
/// before any connection is attempted, so a misconfigured repository fails at
/// construction rather than on first use.
///
#[derive(Debug, Clone, Default)]
pub struct RepositoryConfig {
    /// etcd endpoints, e.g. `http://localhost:2379`.
    pub endpoints: Vec<String>,
    /// Timeout for establishing the initial connection.
    pub connect_timeout: Option<Duration>,
    /// Per-request timeout applied by the transport.
    pub request_timeout: Option<Duration>,
    /// User/password pair when etcd authentication is enabled.
    pub auth: Option<(String, String)>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one etcd endpoint is required")]
    NoEndpoint,
    #[error("endpoints must not be empty strings")]
    EmptyEndpoint,
}

impl RepositoryConfig {
    pub fn new(endpoints: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoint);
        }
        if self.endpoints.iter().any(|endpoint| endpoint.is_empty()) {
            return Err(ConfigError::EmptyEndpoint);
        }
        Ok(())
    }

    pub(crate) fn connect_options(&self) -> Option<etcd_client::ConnectOptions> {
        let mut options = etcd_client::ConnectOptions::new();
        let mut any = false;
        if let Some(timeout) = self.connect_timeout {
            options = options.with_connect_timeout(timeout);
            any = true;
        }
        if let Some(timeout) = self.request_timeout {
            options = options.with_timeout(timeout);
            any = true;
        }
        if let Some((user, password)) = &self.auth {
            options = options.with_user(user.clone(), password.clone());
            any = true;
        }
        any.then_some(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_endpoint_list_is_rejected() {
        let config = RepositoryConfig::new(Vec::<String>::new());
        assert_eq!(config.validate(), Err(ConfigError::NoEndpoint));
    }

    #[test]
    fn blank_endpoint_is_rejected() {
        let config = RepositoryConfig::new(["http://localhost:2379", ""]);
        assert_eq!(config.validate(), Err(ConfigError::EmptyEndpoint));
    }

    #[test]
    fn minimal_config_is_valid() {
        let config = RepositoryConfig::new(["http://localhost:2379"]);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn connect_options_are_only_built_when_something_is_set() {
        let mut config = RepositoryConfig::new(["http://localhost:2379"]);
        assert!(config.connect_options().is_none());

        config.connect_timeout = Some(Duration::from_secs(1));
        assert!(config.connect_options().is_some());
    }
}
