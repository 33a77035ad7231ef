//! Configuration for mofa-script
//!
//! Settings are layered with figment: built-in defaults, then an optional
//! TOML, YAML or JSON file, then `MOFA_SCRIPT_*` environment variables
//! (nested keys separated by `__`, e.g. `MOFA_SCRIPT_RETRY__MAX_ATTEMPTS`).
//! Secrets can be given as `env:VAR` references and are resolved at use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::client::{Endpoint, DEFAULT_API_URL};
use crate::error::ConfigError;
use crate::request::GenerationParams;
use crate::retry::RetryPolicy;
use crate::truncation::TruncationConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "MOFA_SCRIPT_CONFIG";
/// Prefix for environment overrides, nested keys separated by `__`.
pub const ENV_PREFIX: &str = "MOFA_SCRIPT_";
const LOCAL_CONFIG_FILE: &str = "mofa_script.toml";

/// Main configuration structure.
///
/// Built from defaults, then a TOML/YAML/JSON file, then `MOFA_SCRIPT_`
/// environment variables (e.g. `MOFA_SCRIPT_GENERATION__MAX_PARTS=5`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub default_model: String,
    pub default_template: String,
    pub log_level: String,
    pub provider: ProviderConfig,
    pub retry: RetryPolicy,
    pub generation: GenerationParams,
    pub truncation: TruncationConfig,
    /// Extra templates, or overrides of built-in ones by name.
    pub templates: BTreeMap<String, TemplateConfig>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o-mini".to_string(),
            default_template: "podcast".to_string(),
            log_level: "info".to_string(),
            provider: ProviderConfig::default(),
            retry: RetryPolicy::default(),
            generation: GenerationParams::default(),
            truncation: TruncationConfig::default(),
            templates: BTreeMap::new(),
        }
    }
}

/// OpenAI-compatible provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub id: String,
    /// Literal key or `env:VAR`.
    pub api_key: String,
    /// Literal URL or `env:VAR`.
    pub api_url: String,
    /// Honour system proxy settings.
    pub proxy: bool,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: "openai".to_string(),
            api_key: "env:OPENAI_API_KEY".to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            proxy: false,
            // Long single-shot completions can take minutes.
            request_timeout_secs: 600,
            connect_timeout_secs: 10,
        }
    }
}

/// A template declared in the config file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub description: Option<String>,
    /// Instruction text with a `{content}` placeholder.
    pub body: String,
    /// Line the first part must open with.
    pub opening_line: Option<String>,
    /// Speaker labels the script should use.
    pub role_labels: Vec<String>,
}

impl ScriptConfig {
    /// Load configuration from the first file found among:
    /// `MOFA_SCRIPT_CONFIG`, `./mofa_script.toml`,
    /// `<config dir>/mofa-script/config.toml`. Defaults apply when none
    /// exists.
    pub fn load() -> Result<Self, ConfigError> {
        let path = match std::env::var(CONFIG_PATH_ENV) {
            Ok(explicit) => {
                let path = PathBuf::from(explicit);
                if !path.exists() {
                    return Err(ConfigError::Invalid(format!(
                        "config file not found at {}",
                        path.display()
                    )));
                }
                Some(path)
            }
            Err(_) => Self::discover_path(),
        };
        Self::load_from(path.as_deref())
    }

    /// Load from an explicit file (or defaults + env when `None`).
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => log::info!("Loading configuration from {}", path.display()),
            None => log::info!("No configuration file found, using defaults"),
        }
        let config: ScriptConfig = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The layered figment behind [`ScriptConfig::load_from`].
    pub fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(ScriptConfig::default()));
        let figment = match path {
            Some(path) => match path.extension().and_then(|s| s.to_str()) {
                Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            },
            None => figment,
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn discover_path() -> Option<PathBuf> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        let mut user = dirs::config_dir()?;
        user.push("mofa-script");
        user.push("config.toml");
        user.exists().then_some(user)
    }

    /// Reject settings the orchestrator cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.generation;
        if g.min_parts == 0 || g.min_parts > g.max_parts {
            return Err(ConfigError::Invalid(format!(
                "generation.min_parts ({}) must be between 1 and max_parts ({})",
                g.min_parts, g.max_parts
            )));
        }
        if g.default_parts < g.min_parts || g.default_parts > g.max_parts {
            return Err(ConfigError::Invalid(format!(
                "generation.default_parts ({}) must be within [{}, {}]",
                g.default_parts, g.min_parts, g.max_parts
            )));
        }
        self.retry.validate().map_err(ConfigError::Invalid)?;
        for (name, template) in &self.templates {
            if !template.body.contains("{content}") {
                return Err(ConfigError::InvalidTemplate {
                    name: name.clone(),
                    reason: "body must contain a {content} placeholder".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Resolve the provider's URL and key into an [`Endpoint`].
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(
            get_env_or_value(&self.provider.api_url),
            get_env_or_value(&self.provider.api_key),
        )
    }
}

/// Resolve `env:VAR` references in configuration values.
///
/// `"env:OPENAI_API_KEY"` looks up the variable; anything else is returned
/// trimmed. Only a masked form of the value is ever logged.
pub fn get_env_or_value(value: &str) -> String {
    let Some(env_var) = value.strip_prefix("env:") else {
        return value.trim().to_string();
    };

    let result = std::env::var(env_var)
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    if result.is_empty() {
        log::warn!("Environment variable {} is not set or empty", env_var);
    } else {
        log::debug!("{} = {}", env_var, mask(&result));
    }
    result
}

fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{} (len={})", head, tail, chars.len())
    } else {
        format!("*** (len={})", chars.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScriptConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.generation.rounds_per_part, 67);
        assert_eq!(config.truncation.min_length, 2000);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_load_toml_with_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "script.toml",
                r#"
                default_model = "deepseek-chat"

                [provider]
                api_url = "https://api.deepseek.com/v1"
                api_key = "env:TEST_SCRIPT_KEY"

                [generation]
                rounds_per_part = 100
                max_parts = 6

                [templates.radio]
                body = "Turn this into a radio play: {content}"
                role_labels = ["narrator", "hero"]
                "#,
            )?;
            jail.set_env("MOFA_SCRIPT_GENERATION__MAX_PARTS", "4");
            jail.set_env("TEST_SCRIPT_KEY", "sk-abcdefghijkl");

            let config = ScriptConfig::load_from(Some(Path::new("script.toml")))
                .map_err(|e| e.to_string())?;

            assert_eq!(config.default_model, "deepseek-chat");
            assert_eq!(config.generation.rounds_per_part, 100);
            assert_eq!(config.generation.max_parts, 4);
            // Untouched sections keep their defaults.
            assert_eq!(config.generation.context_window_chars, 8000);
            assert_eq!(config.templates["radio"].role_labels.len(), 2);

            let endpoint = config.endpoint();
            assert_eq!(endpoint.api_url, "https://api.deepseek.com/v1");
            assert_eq!(endpoint.api_key, "sk-abcdefghijkl");
            Ok(())
        });
    }

    #[test]
    fn test_load_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "script.yaml",
                "retry:\n  max_attempts: 3\n  base_delay_secs: 1.5\n",
            )?;
            let config = ScriptConfig::load_from(Some(Path::new("script.yaml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.retry.max_attempts, 3);
            assert_eq!(config.retry.base_delay_secs, 1.5);
            assert_eq!(config.retry.multiplier, 2.0);
            Ok(())
        });
    }

    #[test]
    fn test_template_without_placeholder_is_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "[templates.bad]\nbody = \"no placeholder\"\n")?;
            let err = ScriptConfig::load_from(Some(Path::new("bad.toml"))).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidTemplate { ref name, .. } if name == "bad"));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_part_bounds() {
        let mut config = ScriptConfig::default();
        config.generation.default_parts = 12;
        assert!(config.validate().is_err());

        let mut config = ScriptConfig::default();
        config.generation.min_parts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unusable_retry_delays_are_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("retry.toml", "[retry]\nmax_delay_secs = inf\n")?;
            let err = ScriptConfig::load_from(Some(Path::new("retry.toml"))).unwrap_err();
            assert!(err.to_string().contains("retry.max_delay_secs"));

            jail.create_file("ok.toml", "[retry]\nmax_delay_secs = 30.0\n")?;
            jail.set_env("MOFA_SCRIPT_RETRY__BASE_DELAY_SECS", "-3.5");
            let err = ScriptConfig::load_from(Some(Path::new("ok.toml"))).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("base_delay_secs")));
            Ok(())
        });
    }

    #[test]
    fn test_get_env_or_value() {
        assert_eq!(get_env_or_value("  sk-literal  "), "sk-literal");
        assert_eq!(get_env_or_value("env:MOFA_SCRIPT_TEST_UNSET_VAR"), "");
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("sk-1234567890"), "sk-1...7890 (len=13)");
        assert_eq!(mask("short"), "*** (len=5)");
    }
}
