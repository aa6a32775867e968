use std::fmt::{Display, Formatter};

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::policy::declaration::{DeclarationError, OverrideTable, PolicyDeclaration};
use crate::policy::{Directives, OverrideStrategy};

pub const ENV_PREFIX: &str = "CACHE_POLICY_";

#[derive(Debug)]
pub enum ConfigError {
    Load(figment::Error),
    Declaration(DeclarationError),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Load(e)
    }
}

impl From<DeclarationError> for ConfigError {
    fn from(e: DeclarationError) -> Self {
        ConfigError::Declaration(e)
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Load(e) => write!(f, "failed to load configuration: {}", e),
            ConfigError::Declaration(e) => write!(f, "invalid default cache policy: {}", e),
        }
    }
}

#[derive(Serialize, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub override_strategy: OverrideStrategy,
    pub exclude_status: Vec<u16>,
    pub default_cache: Directives,
    #[serde(rename = "override")]
    pub overrides: OverrideTable,
    pub bind: String,
    pub log_level: String,
    pub log_config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            override_strategy: OverrideStrategy::Replace,
            exclude_status: Vec::new(),
            default_cache: Directives::new(),
            overrides: OverrideTable::new(),
            bind: String::from("127.0.0.1:8080"),
            log_level: String::from("info"),
            log_config: None,
        }
    }
}

impl Config {
    /// Defaults, then the YAML file at `path` (if it exists), then `CACHE_POLICY_*` variables.
    pub fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn load(path: &str) -> Result<Config, ConfigError> {
        let config: Config = Config::figment(path).extract()?;
        config.default_declaration().to_rule()?;
        Ok(config)
    }

    /// The application-wide policy, registered at the lowest priority.
    pub fn default_declaration(&self) -> PolicyDeclaration {
        PolicyDeclaration {
            value: self.default_cache.clone(),
            overrides: self.overrides.clone(),
            exclude_status: self.exclude_status.clone(),
            override_strategy: Some(self.override_strategy),
            timestamped_parameter: None,
        }
    }
}
