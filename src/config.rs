use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

use crate::update::UpdatePolicy;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub http_bind: SocketAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Repository prefixes a replacement image must start with.
    pub allowed_image_repos: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Only manage containers labelled `io.updraft.enable=true`.
    pub label_enable: bool,
    pub include_stopped: bool,
    pub stop_timeout_secs: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            api_token: None,
            allowed_image_repos: Vec::new(),
            scope: None,
            label_enable: false,
            include_stopped: false,
            stop_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("updraft.toml"))
                .merge(Json::file("updraft.json"))
                .merge(Env::prefixed("UPDRAFT_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(token_file) = std::env::var("UPDRAFT_API_TOKEN_FILE") {
            config.api_token = Some(std::fs::read_to_string(token_file)?.trim().to_string());
        }
        config.api_token = config.api_token.filter(|t| !t.is_empty());

        if config.stop_timeout_secs < 0 {
            anyhow::bail!("stop_timeout_secs must not be negative");
        }

        Ok(config)
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy {
            allowed_image_repos: self.allowed_image_repos.clone(),
            scope: self.scope.clone(),
            label_enable: self.label_enable,
        }
    }
}
