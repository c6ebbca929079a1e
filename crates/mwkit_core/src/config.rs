use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::site::{Site, SiteConfig, SiteRegistry};

pub const DEFAULT_USER_AGENT: &str = "mwkit/0.1";
pub const DEFAULT_SITE: &str = "enwiki";
pub const DEFAULT_CONFIG_FILENAME: &str = "mwkit.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ToolConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub site: Option<String>,
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub maxlag: Option<u64>,
}

impl ToolConfig {
    /// Resolve the site identifier: env MW_SITE > config > DEFAULT_SITE.
    pub fn site_uid(&self) -> String {
        env_override("MW_SITE")
            .or_else(|| self.wiki.site.clone())
            .unwrap_or_else(|| DEFAULT_SITE.to_string())
    }

    /// Resolve an API URL override: env MW_API_URL > config > None.
    pub fn api_url_override(&self) -> Option<String> {
        env_override("MW_API_URL").or_else(|| self.wiki.api_url.clone())
    }

    /// Resolve user agent: env MW_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("MW_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Resolve the maxlag parameter: env MW_MAXLAG > config > None.
    pub fn maxlag(&self) -> Option<u64> {
        env_override("MW_MAXLAG")
            .and_then(|value| value.parse::<u64>().ok())
            .or(self.wiki.maxlag)
    }

    /// Builtin sites plus the ones declared under `[[sites]]`.
    pub fn registry(&self) -> Result<SiteRegistry> {
        let mut registry = SiteRegistry::builtin();
        for site in &self.sites {
            registry
                .register(site)
                .with_context(|| format!("invalid [[sites]] entry `{}`", site.uid))?;
        }
        Ok(registry)
    }

    /// The configured site, pointed at the overridden API URL if there is one.
    pub fn resolve_site(&self, uid_override: Option<&str>) -> Result<Arc<Site>> {
        let registry = self.registry()?;
        let uid = uid_override
            .map(ToString::to_string)
            .unwrap_or_else(|| self.site_uid());
        let site = registry.require(&uid)?;
        Ok(match self.api_url_override() {
            Some(api_url) if api_url != site.api_url() => Arc::new(site.with_api_url(&api_url)),
            _ => site,
        })
    }
}

/// Load and parse a ToolConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ToolConfig> {
    if !config_path.exists() {
        return Ok(ToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{NS_CATEGORY, TitlePatternResolver};
    use tempfile::tempdir;

    #[test]
    fn default_config_has_no_overrides() {
        let config = ToolConfig::default();
        assert!(config.wiki.site.is_none());
        assert!(config.wiki.api_url.is_none());
        assert!(config.sites.is_empty());
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/mwkit.toml")).expect("load config");
        assert_eq!(config, ToolConfig::default());
    }

    #[test]
    fn load_config_parses_wiki_and_sites() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(DEFAULT_CONFIG_FILENAME);
        fs::write(
            &config_path,
            r#"
[wiki]
site = "examplewiki"
user_agent = "test-agent/1.0"
maxlag = 5

[[sites]]
uid = "examplewiki"
api_url = "https://wiki.example.org/api.php"

[[sites.namespaces]]
id = 14
name = "Kategorie"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.wiki.site.as_deref(), Some("examplewiki"));
        assert_eq!(config.wiki.user_agent.as_deref(), Some("test-agent/1.0"));
        assert_eq!(config.wiki.maxlag, Some(5));
        assert_eq!(config.sites.len(), 1);
        assert_eq!(config.sites[0].namespaces[0].id, NS_CATEGORY);

        let registry = config.registry().expect("registry");
        let site = registry.require("examplewiki").expect("custom site");
        assert_eq!(site.api_url(), "https://wiki.example.org/api.php");
        assert_eq!(site.render_category_link("X", None), "[[Kategorie:X]]");
        assert!(registry.get("enwiki").is_some());
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(DEFAULT_CONFIG_FILENAME);
        fs::write(&config_path, "[other]\nkey = \"value\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.wiki.site.is_none());
        assert!(config.sites.is_empty());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(DEFAULT_CONFIG_FILENAME);
        fs::write(&config_path, "[wiki\nsite = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn invalid_site_entry_is_reported() {
        let config = ToolConfig {
            wiki: WikiSection::default(),
            sites: vec![SiteConfig {
                uid: "brokenwiki".to_string(),
                api_url: String::new(),
                namespaces: Vec::new(),
            }],
        };
        let error = config.registry().expect_err("must fail");
        assert!(format!("{error:#}").contains("brokenwiki"));
    }

    #[test]
    fn resolve_site_prefers_explicit_uid() {
        let config = ToolConfig {
            wiki: WikiSection {
                site: Some("enwiki".to_string()),
                ..WikiSection::default()
            },
            sites: Vec::new(),
        };
        let site = config.resolve_site(Some("commonswiki")).expect("site");
        assert_eq!(site.uid(), "commonswiki");
        assert!(config.resolve_site(Some("nowhere")).is_err());
    }
}
