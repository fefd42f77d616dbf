//! Environment-provided configuration.
//!
//! The server reads [`GatewayConfig`]; clients read a [`ConnectionProfile`].
//! Both accept a lookup function so tests never touch the process environment.

use crate::error::{GatewayError, GatewayResult};
use crate::types::{AuthMode, ConnectionProfile};
use std::fmt;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_BIND_ADDR: &str = "127.0.0.1";
const DEFAULT_LLM_BASE_URL: &str = "https://llm-api-development.us01.treasuredata.com";
const DEFAULT_AUTH_SCHEME: &str = "TD1";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";
const DEFAULT_COMMUNITY_FILE_PATH: &str = "community-agents.json";
const DEFAULT_COMMUNITY_BRANCH: &str = "main";
const DEFAULT_STATIC_DIR: &str = "public";

const LOCAL_GATEWAY_URL: &str = "http://localhost:3001";

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Reads a variable, treating blank values as unset.
fn read<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Reads `key`, then `legacy` when `key` is unset.
fn read_or<F>(lookup: &F, key: &str, legacy: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    read(lookup, key).or_else(|| read(lookup, legacy))
}

fn read_parsed<F, T>(lookup: &F, key: &str, default: T) -> GatewayResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match read(lookup, key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| GatewayError::configuration(format!("{key}={raw}: {e}"))),
        None => Ok(default),
    }
}

// ============================================
// Server configuration
// ============================================

/// Upstream LLM API connection held by the relay.
#[derive(Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub auth_scheme: String,
    pub default_agent_id: Option<String>,
    pub timeout: Duration,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("auth_scheme", &self.auth_scheme)
            .field("default_agent_id", &self.default_agent_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Content host holding the community catalog.
#[derive(Clone)]
pub struct CommunityConfig {
    pub api_base: String,
    pub repo: Option<String>,
    pub token: Option<String>,
    pub file_path: String,
    pub branch: String,
}

impl CommunityConfig {
    /// Name of the first variable the publish flow still needs, if any.
    pub fn missing_setting(&self) -> Option<&'static str> {
        if self.token.is_none() {
            Some("GITHUB_TOKEN")
        } else if self.repo.is_none() {
            Some("GITHUB_REPO")
        } else {
            None
        }
    }
}

impl fmt::Debug for CommunityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommunityConfig")
            .field("api_base", &self.api_base)
            .field("repo", &self.repo)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("file_path", &self.file_path)
            .field("branch", &self.branch)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub port: u16,
    pub llm: LlmConfig,
    pub community: CommunityConfig,
    pub static_dir: String,
}

impl GatewayConfig {
    pub fn from_env() -> GatewayResult<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> GatewayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timeout_secs = read_parsed(&lookup, "UPSTREAM_TIMEOUT_SECS", DEFAULT_UPSTREAM_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(GatewayError::configuration(
                "UPSTREAM_TIMEOUT_SECS must be greater than zero",
            ));
        }

        let repo = read(&lookup, "GITHUB_REPO");
        if let Some(repo) = &repo
            && repo.split('/').filter(|part| !part.is_empty()).count() != 2
        {
            return Err(GatewayError::configuration(format!(
                "GITHUB_REPO must look like owner/repo, got '{repo}'"
            )));
        }

        Ok(Self {
            bind_addr: read(&lookup, "BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            port: read_parsed(&lookup, "PORT", DEFAULT_PORT)?,
            llm: LlmConfig {
                base_url: read_or(&lookup, "LLM_BASE_URL", "TD_LLM_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                api_key: read_or(&lookup, "LLM_API_KEY", "TD_API_KEY"),
                auth_scheme: read(&lookup, "LLM_AUTH_SCHEME")
                    .unwrap_or_else(|| DEFAULT_AUTH_SCHEME.to_string()),
                default_agent_id: read_or(&lookup, "LLM_AGENT_ID", "TD_AGENT_ID"),
                timeout: Duration::from_secs(timeout_secs),
            },
            community: CommunityConfig {
                api_base: read(&lookup, "GITHUB_API_BASE")
                    .unwrap_or_else(|| DEFAULT_GITHUB_API_BASE.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                repo,
                token: read(&lookup, "GITHUB_TOKEN"),
                file_path: read(&lookup, "COMMUNITY_FILE_PATH")
                    .unwrap_or_else(|| DEFAULT_COMMUNITY_FILE_PATH.to_string()),
                branch: read(&lookup, "COMMUNITY_BRANCH")
                    .unwrap_or_else(|| DEFAULT_COMMUNITY_BRANCH.to_string()),
            },
            static_dir: read(&lookup, "STATIC_DIR").unwrap_or_else(|| DEFAULT_STATIC_DIR.to_string()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.llm.api_key.is_some()
    }
}

// ============================================
// Client connection profiles
// ============================================

/// Named deployment a client can be pointed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeploymentProfile {
    Local,
    Internal,
    Hosted,
    Demo,
}

impl DeploymentProfile {
    pub fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Internal => "internal",
            Self::Hosted => "hosted",
            Self::Demo => "demo",
        }
    }

    fn default_auth_mode(self) -> AuthMode {
        match self {
            Self::Local | Self::Demo => AuthMode::None,
            Self::Internal => AuthMode::Sso,
            Self::Hosted => AuthMode::ApiKey,
        }
    }
}

impl std::str::FromStr for DeploymentProfile {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "internal" => Ok(Self::Internal),
            "hosted" => Ok(Self::Hosted),
            "demo" => Ok(Self::Demo),
            other => Err(GatewayError::configuration(format!(
                "unknown GATEWAY_PROFILE '{other}' (expected local, internal, hosted or demo)"
            ))),
        }
    }
}

impl ConnectionProfile {
    pub fn from_env() -> GatewayResult<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> GatewayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let profile: DeploymentProfile = match read(&lookup, "GATEWAY_PROFILE") {
            Some(raw) => raw.parse()?,
            None => DeploymentProfile::Local,
        };

        let url_override = read(&lookup, "GATEWAY_URL").map(|url| url.trim_end_matches('/').to_string());
        let api_base_url = match profile {
            DeploymentProfile::Local => {
                Some(url_override.unwrap_or_else(|| LOCAL_GATEWAY_URL.to_string()))
            }
            DeploymentProfile::Internal | DeploymentProfile::Hosted => {
                Some(url_override.ok_or_else(|| {
                    GatewayError::configuration(format!(
                        "GATEWAY_URL is required for the {} profile",
                        profile.name()
                    ))
                })?)
            }
            DeploymentProfile::Demo => None,
        };

        let auth_mode = match read(&lookup, "GATEWAY_AUTH_MODE") {
            Some(raw) => raw
                .parse::<AuthMode>()
                .map_err(GatewayError::Configuration)?,
            None => profile.default_auth_mode(),
        };

        Ok(Self {
            name: profile.name().to_string(),
            api_base_url,
            auth_mode,
            api_key: read(&lookup, "GATEWAY_API_KEY"),
            streaming: profile != DeploymentProfile::Demo,
        })
    }
}
