use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::DEFAULT_TIMEOUT;

pub const CONFIG_PATH_ENV: &str = "RELMAN_CONFIG_PATH";
pub const PROFILE_ENV: &str = "RELMAN_PROFILE";
pub const TOKEN_ENV: &str = "RELMAN_TOKEN";

pub const DEFAULT_PROFILE: &str = "local";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

/// A server the CLI can talk to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    /// `http(s)://` API root or `file://` snapshot path
    pub base_url: String,
    #[serde(default)]
    pub description: String,
    /// Session token from the last successful login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    /// Per-request HTTP timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Profile {
    pub fn new(base_url: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            description: description.into(),
            token: None,
            user_email: None,
            timeout_secs: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Token to send; `RELMAN_TOKEN` wins over the stored one
    pub fn effective_token(&self) -> Option<String> {
        env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.token.clone())
    }
}

/// Named profiles plus an optional default
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))
    }

    /// Loads the config, writing the default one first if it is missing
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            Self::create_default(&path)?;
        }
        Self::load(path)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(&self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Creates a config with a single `local` profile if none exists
    pub fn create_default<P: AsRef<Path>>(path: P) -> Result<()> {
        if path.as_ref().exists() {
            return Ok(());
        }

        let mut config = Config::default();
        config.add_profile(
            DEFAULT_PROFILE.to_string(),
            Profile::new(DEFAULT_BASE_URL, "Local development server"),
        );
        config.save(path)
    }

    pub fn get_profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn list_profiles(&self) -> Vec<&str> {
        self.profiles.keys().map(|k| k.as_str()).collect()
    }

    /// Adds a profile or replaces the settings of an existing one
    ///
    /// A replaced profile keeps its session only if the URL is unchanged.
    pub fn add_profile(&mut self, name: String, profile: Profile) {
        match self.profiles.get_mut(&name) {
            Some(existing) if existing.base_url == profile.base_url => {
                existing.description = profile.description;
                existing.timeout_secs = profile.timeout_secs;
            }
            _ => {
                self.profiles.insert(name, profile);
            }
        }
    }

    pub fn set_default_profile(&mut self, name: &str) -> Result<()> {
        if !self.profiles.contains_key(name) {
            anyhow::bail!("Profile '{}' not found in config", name);
        }
        self.default_profile = Some(name.to_string());
        Ok(())
    }

    pub fn get_default_profile(&self) -> Option<(&str, &Profile)> {
        let name = self.default_profile.as_deref()?;
        self.profiles.get(name).map(|p| (name, p))
    }

    /// Picks the active profile
    ///
    /// Priority: explicit name, then `RELMAN_PROFILE`, then the only
    /// profile, then the default profile.
    pub fn resolve_profile(&self, explicit: Option<&str>) -> Result<(String, Profile)> {
        self.resolve_profile_from(explicit, env::var(PROFILE_ENV).ok().as_deref())
    }

    fn resolve_profile_from(
        &self,
        explicit: Option<&str>,
        from_env: Option<&str>,
    ) -> Result<(String, Profile)> {
        if let Some(name) = explicit {
            return self
                .get_profile(name)
                .map(|p| (name.to_string(), p.clone()))
                .with_context(|| format!("Profile '{}' not found in config", name));
        }

        if let Some(name) = from_env.filter(|n| !n.is_empty()) {
            return self
                .get_profile(name)
                .map(|p| (name.to_string(), p.clone()))
                .with_context(|| {
                    format!("Profile '{}' from {} not found in config", name, PROFILE_ENV)
                });
        }

        if self.profiles.len() == 1 {
            if let Some((name, profile)) = self.profiles.iter().next() {
                return Ok((name.clone(), profile.clone()));
            }
        }

        if let Some((name, profile)) = self.get_default_profile() {
            return Ok((name.to_string(), profile.clone()));
        }

        anyhow::bail!(
            "Several profiles are configured and none is the default; \
             pass --profile or run `relman profile use <name>`"
        )
    }

    /// Stores the session returned by a login
    pub fn set_session(&mut self, name: &str, token: String, email: String) -> Result<()> {
        let profile = self
            .profiles
            .get_mut(name)
            .with_context(|| format!("Profile '{}' not found in config", name))?;
        profile.token = Some(token);
        profile.user_email = Some(email);
        Ok(())
    }

    /// Forgets the session of a profile; returns whether there was one
    pub fn clear_session(&mut self, name: &str) -> bool {
        match self.profiles.get_mut(name) {
            Some(profile) => {
                profile.user_email = None;
                profile.token.take().is_some()
            }
            None => false,
        }
    }
}

/// Gets the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }

    let home_dir = dirs::home_dir().context("Failed to determine home directory")?;

    Ok(home_dir.join(".relman.config"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn two_profiles() -> Config {
        let mut config = Config::default();
        config.add_profile("local".into(), Profile::new(DEFAULT_BASE_URL, "dev"));
        config.add_profile(
            "prod".into(),
            Profile::new("https://relman.example.com/api", "production"),
        );
        config
    }

    #[test]
    fn test_default_config_has_local_profile() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join(".relman.config");

        let config = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.list_profiles(), vec!["local"]);
        assert_eq!(config.profiles["local"].base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_resolution_priority() {
        let mut config = two_profiles();

        let (name, _) = config.resolve_profile_from(Some("prod"), Some("local")).unwrap();
        assert_eq!(name, "prod");

        let (name, _) = config.resolve_profile_from(None, Some("local")).unwrap();
        assert_eq!(name, "local");

        assert!(config.resolve_profile_from(None, None).is_err());
        assert!(config.resolve_profile_from(Some("missing"), None).is_err());

        config.set_default_profile("prod").unwrap();
        let (name, profile) = config.resolve_profile_from(None, None).unwrap();
        assert_eq!(name, "prod");
        assert_eq!(profile.description, "production");

        assert!(config.set_default_profile("missing").is_err());
    }

    #[test]
    fn test_single_profile_wins_without_default() {
        let mut config = Config::default();
        config.add_profile("only".into(), Profile::new(DEFAULT_BASE_URL, ""));
        let (name, _) = config.resolve_profile_from(None, None).unwrap();
        assert_eq!(name, "only");
    }

    #[test]
    fn test_session_round_trips_through_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".relman.config");

        let mut config = two_profiles();
        config
            .set_session("prod", "tok-123".into(), "dev@example.com".into())
            .unwrap();
        config.save(&path).unwrap();

        let mut loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.profiles["prod"].token.as_deref(), Some("tok-123"));

        assert!(loaded.clear_session("prod"));
        assert!(!loaded.clear_session("prod"));
        assert_eq!(loaded.profiles["prod"].user_email, None);
    }

    #[test]
    fn test_re_adding_profile_keeps_session_for_same_url() {
        let mut config = two_profiles();
        config
            .set_session("prod", "tok".into(), "dev@example.com".into())
            .unwrap();

        config.add_profile(
            "prod".into(),
            Profile::new("https://relman.example.com/api", "renamed"),
        );
        assert_eq!(config.profiles["prod"].token.as_deref(), Some("tok"));
        assert_eq!(config.profiles["prod"].description, "renamed");

        config.add_profile("prod".into(), Profile::new("https://other/api", "moved"));
        assert_eq!(config.profiles["prod"].token, None);
    }

    #[test]
    fn test_profile_timeout_from_file() {
        let config: Config = serde_yaml::from_str(
            "profiles:\n  slow:\n    base_url: https://relman.example.com/api\n    timeout_secs: 90\n  plain:\n    base_url: http://localhost:8080/api\n",
        )
        .unwrap();
        assert_eq!(config.profiles["slow"].timeout(), Duration::from_secs(90));
        assert_eq!(config.profiles["plain"].timeout(), DEFAULT_TIMEOUT);

        let mut zero = Profile::new(DEFAULT_BASE_URL, "");
        zero.timeout_secs = Some(0);
        assert_eq!(zero.timeout(), DEFAULT_TIMEOUT);
    }
}
