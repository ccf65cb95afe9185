//! Request configuration: the peer's URL plus the default header, loaded
//! from a JSON document.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use xroad_core::MessageHeader;

/// Where to send requests and which header to start from.
///
/// ```json
/// {
///   "url": "https://security-server.example/",
///   "header": {
///     "userId": "EE12345",
///     "client": {"xRoadInstance": "FI", "memberClass": "GOV", "memberCode": "1", "subsystemCode": "app"},
///     "service": {"xRoadInstance": "FI", "memberClass": "COM", "memberCode": "2",
///                 "subsystemCode": "registry", "serviceCode": "getPerson", "serviceVersion": "v1"}
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub header: MessageHeader,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} empty")]
    Missing(&'static str),
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// One validation rule over a loaded config.
pub type ConfigCheck = fn(&RequestConfig) -> Result<(), ConfigError>;

impl RequestConfig {
    /// Reads and parses the JSON document at `path`. Nothing is validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Json`] if it is not a config document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Runs `checks` in order and stops at the first failure.
    ///
    /// # Errors
    ///
    /// The first failing check's error.
    pub fn check(&self, checks: &[ConfigCheck]) -> Result<(), ConfigError> {
        checks.iter().try_for_each(|check| check(self))
    }

    /// Runs [`url_check`], [`client_check`] and [`service_check`].
    ///
    /// # Errors
    ///
    /// The first failing check's error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check(&[url_check, client_check, service_check])
    }
}

fn require(value: &str, name: &'static str) -> Result<(), ConfigError> {
    if value.is_empty() {
        Err(ConfigError::Missing(name))
    } else {
        Ok(())
    }
}

/// The URL is present and parses.
///
/// # Errors
///
/// [`ConfigError::Missing`] or [`ConfigError::InvalidUrl`].
pub fn url_check(config: &RequestConfig) -> Result<(), ConfigError> {
    require(&config.url, "url")?;
    reqwest::Url::parse(&config.url).map_err(|e| ConfigError::InvalidUrl {
        url: config.url.clone(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// The client subsystem is fully identified.
///
/// # Errors
///
/// [`ConfigError::Missing`] naming the first empty field.
pub fn client_check(config: &RequestConfig) -> Result<(), ConfigError> {
    let client = &config.header.client;
    require(&client.instance, "client.xRoadInstance")?;
    require(&client.member_class, "client.memberClass")?;
    require(&client.member_code, "client.memberCode")?;
    require(&client.subsystem_code, "client.subsystemCode")
}

/// The target is fully identified: either a member service with its code
/// and version, or a central service.
///
/// # Errors
///
/// [`ConfigError::Missing`] naming the first empty field.
pub fn service_check(config: &RequestConfig) -> Result<(), ConfigError> {
    if let Some(central) = &config.header.central_service {
        require(&central.instance, "centralService.xRoadInstance")?;
        return require(&central.service_code, "centralService.serviceCode");
    }
    let Some(service) = &config.header.service else {
        return Err(ConfigError::Missing("service"));
    };
    require(&service.instance, "service.xRoadInstance")?;
    require(&service.member_class, "service.memberClass")?;
    require(&service.member_code, "service.memberCode")?;
    require(&service.subsystem_code, "service.subsystemCode")?;
    require(&service.service_code, "service.serviceCode")?;
    require(&service.service_version, "service.serviceVersion")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const DOCUMENT: &str = r#"{
        "url": "http://localhost:8080/",
        "header": {
            "userId": "EE12345",
            "client": {"xRoadInstance": "FI", "memberClass": "GOV", "memberCode": "1", "subsystemCode": "app"},
            "service": {"xRoadInstance": "FI", "memberClass": "COM", "memberCode": "2",
                        "subsystemCode": "registry", "serviceCode": "getPerson", "serviceVersion": "v1"}
        }
    }"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn loaded() -> RequestConfig {
        let file = write_config(DOCUMENT);
        RequestConfig::load(file.path()).unwrap()
    }

    #[test]
    fn loads_and_validates_document() {
        let config = loaded();
        assert_eq!(config.url, "http://localhost:8080/");
        assert_eq!(config.header.user_id, "EE12345");
        assert_eq!(config.header.client.fqdn(), "FI/GOV/1/app");
        config.validate().unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RequestConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("absent.json"));
    }

    #[test]
    fn malformed_document_is_json_error() {
        let file = write_config("{ not json");
        assert!(matches!(
            RequestConfig::load(file.path()),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn url_check_rejects_empty_and_relative() {
        let mut config = loaded();
        config.url.clear();
        assert!(matches!(url_check(&config), Err(ConfigError::Missing("url"))));

        config.url = "/relative/path".into();
        assert!(matches!(url_check(&config), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn client_check_names_first_empty_field() {
        let mut config = loaded();
        config.header.client.member_code.clear();
        let err = client_check(&config).unwrap_err();
        assert_eq!(err.to_string(), "client.memberCode empty");
    }

    #[test]
    fn service_check_requires_code_and_version() {
        let mut config = loaded();
        if let Some(service) = config.header.service.as_mut() {
            service.service_version.clear();
        }
        assert!(matches!(
            service_check(&config),
            Err(ConfigError::Missing("service.serviceVersion"))
        ));

        config.header.service = None;
        assert!(matches!(service_check(&config), Err(ConfigError::Missing("service"))));
    }

    #[test]
    fn central_service_satisfies_service_check() {
        let mut config = loaded();
        config.header.service = None;
        config.header.central_service =
            Some(xroad_core::CentralServiceIdentity::new("FI", "lookup"));
        service_check(&config).unwrap();
    }

    #[test]
    fn check_stops_at_first_failure() {
        let mut config = loaded();
        config.url.clear();
        config.header.client.instance.clear();
        let err = config.check(&[client_check, url_check]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("client.xRoadInstance")));
    }
}
