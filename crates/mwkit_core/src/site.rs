use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

pub const NS_MAIN: i32 = 0;
pub const NS_FILE: i32 = 6;
pub const NS_CATEGORY: i32 = 14;

const DEFAULT_NAMESPACES: &[(i32, &str)] = &[
    (-2, "Media"),
    (-1, "Special"),
    (0, ""),
    (1, "Talk"),
    (2, "User"),
    (3, "User talk"),
    (4, "Project"),
    (5, "Project talk"),
    (6, "File"),
    (7, "File talk"),
    (8, "MediaWiki"),
    (9, "MediaWiki talk"),
    (10, "Template"),
    (11, "Template talk"),
    (12, "Help"),
    (13, "Help talk"),
    (14, "Category"),
    (15, "Category talk"),
];

/// How a category link pattern treats the sort key after the pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKeyPolicy {
    Exact(String),
    Any,
}

/// What the wikitext engine needs from a site to find and write category links.
pub trait TitlePatternResolver {
    /// Regex source matching a link to `name` in the category namespace.
    fn category_link_pattern(&self, name: &str, sort_key: &SortKeyPolicy) -> String;

    /// Wikitext of a category link, e.g. `[[Category:Name|Sortkey]]`.
    fn render_category_link(&self, name: &str, sort_key: Option<&str>) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

pub fn default_namespaces() -> Vec<Namespace> {
    DEFAULT_NAMESPACES
        .iter()
        .map(|(id, name)| Namespace {
            id: *id,
            name: (*name).to_string(),
            aliases: if *id == NS_FILE {
                vec!["Image".to_string()]
            } else {
                Vec::new()
            },
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub uid: String,
    pub api_url: String,
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
}

#[derive(Debug, Clone)]
pub struct Site {
    uid: String,
    api_url: String,
    namespaces: BTreeMap<i32, Namespace>,
}

/// Build a site from its configuration on top of MediaWiki's default
/// namespaces. A configured namespace replaces the default name of the same id
/// and the default name stays usable as an alias.
pub fn build_site(config: &SiteConfig) -> Site {
    let mut namespaces: BTreeMap<i32, Namespace> = default_namespaces()
        .into_iter()
        .map(|ns| (ns.id, ns))
        .collect();

    for custom in &config.namespaces {
        let merged = match namespaces.remove(&custom.id) {
            Some(previous) => {
                let mut aliases = custom.aliases.clone();
                for name in std::iter::once(previous.name).chain(previous.aliases) {
                    if !name.is_empty()
                        && !name.eq_ignore_ascii_case(&custom.name)
                        && !aliases.contains(&name)
                    {
                        aliases.push(name);
                    }
                }
                Namespace {
                    id: custom.id,
                    name: custom.name.clone(),
                    aliases,
                }
            }
            None => custom.clone(),
        };
        namespaces.insert(custom.id, merged);
    }

    Site {
        uid: config.uid.clone(),
        api_url: config.api_url.clone(),
        namespaces,
    }
}

impl Site {
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn namespace(&self, id: i32) -> Option<&Namespace> {
        self.namespaces.get(&id)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.values()
    }

    /// Find the namespace a title prefix such as `category` or `File_talk` names.
    pub fn resolve_namespace(&self, prefix: &str) -> Option<&Namespace> {
        let wanted = normalize_name(prefix).to_lowercase();
        self.namespaces().find(|ns| {
            std::iter::once(&ns.name)
                .chain(ns.aliases.iter())
                .any(|name| normalize_name(name).to_lowercase() == wanted)
        })
    }

    /// A copy of this site talking to another API endpoint.
    pub fn with_api_url(&self, api_url: &str) -> Site {
        Site {
            api_url: api_url.to_string(),
            ..self.clone()
        }
    }

    fn category_prefix(&self) -> &str {
        self.namespace(NS_CATEGORY)
            .map(|ns| ns.name.as_str())
            .unwrap_or("Category")
    }

    fn namespace_prefix_pattern(&self, id: i32) -> String {
        let Some(ns) = self.namespace(id) else {
            return "Category".to_string();
        };
        std::iter::once(&ns.name)
            .chain(ns.aliases.iter())
            .filter(|name| !name.is_empty())
            .map(|name| {
                normalize_name(name)
                    .split(' ')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join("[ _]+")
            })
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl TitlePatternResolver for Site {
    fn category_link_pattern(&self, name: &str, sort_key: &SortKeyPolicy) -> String {
        let prefixes = self.namespace_prefix_pattern(NS_CATEGORY);
        let title = title_pattern(name);
        let sort = match sort_key {
            SortKeyPolicy::Any => r"(?:\s*\|[^\]]*)?".to_string(),
            SortKeyPolicy::Exact(key) => format!(r"\s*\|\s*{}", regex::escape(key.trim())),
        };
        format!(r"\[\[\s*(?i:{prefixes})\s*:\s*{title}{sort}\s*\]\]")
    }

    fn render_category_link(&self, name: &str, sort_key: Option<&str>) -> String {
        let prefix = self.category_prefix();
        let name = normalize_name(name);
        match sort_key {
            Some(key) => format!("[[{prefix}:{name}|{key}]]"),
            None => format!("[[{prefix}:{name}]]"),
        }
    }
}

/// Pattern for a page title: spaces and underscores are interchangeable and
/// the first letter is case-insensitive.
fn title_pattern(name: &str) -> String {
    let normalized = normalize_name(name);
    let mut output = String::new();
    for (index, ch) in normalized.chars().enumerate() {
        if ch == ' ' {
            output.push_str("[ _]+");
            continue;
        }
        let single = ch.to_string();
        if index == 0 {
            let upper: String = ch.to_uppercase().collect();
            let lower: String = ch.to_lowercase().collect();
            if upper != lower {
                output.push_str(&format!(
                    "(?:{}|{})",
                    regex::escape(&upper),
                    regex::escape(&lower)
                ));
                continue;
            }
        }
        output.push_str(&regex::escape(&single));
    }
    output
}

fn normalize_name(name: &str) -> String {
    name.replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn builtin_site_configs() -> Vec<SiteConfig> {
    let plain = |uid: &str, api_url: &str| SiteConfig {
        uid: uid.to_string(),
        api_url: api_url.to_string(),
        namespaces: Vec::new(),
    };
    vec![
        plain("enwiki", "https://en.wikipedia.org/w/api.php"),
        SiteConfig {
            uid: "itwiki".to_string(),
            api_url: "https://it.wikipedia.org/w/api.php".to_string(),
            namespaces: vec![Namespace {
                id: NS_CATEGORY,
                name: "Categoria".to_string(),
                aliases: Vec::new(),
            }],
        },
        plain("commonswiki", "https://commons.wikimedia.org/w/api.php"),
        plain("wikidatawiki", "https://www.wikidata.org/w/api.php"),
        plain("metawiki", "https://meta.wikimedia.org/w/api.php"),
    ]
}

/// Shared, immutable sites looked up by identifier.
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: BTreeMap<String, Arc<Site>>,
}

impl SiteRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for config in builtin_site_configs() {
            registry
                .sites
                .insert(config.uid.clone(), Arc::new(build_site(&config)));
        }
        registry
    }

    /// Add or replace a site. Later registrations win over builtin ones.
    pub fn register(&mut self, config: &SiteConfig) -> Result<Arc<Site>> {
        if config.uid.trim().is_empty() {
            bail!("site uid cannot be empty");
        }
        if config.api_url.trim().is_empty() {
            bail!("site {} has an empty api_url", config.uid);
        }
        let site = Arc::new(build_site(config));
        self.sites.insert(config.uid.clone(), Arc::clone(&site));
        Ok(site)
    }

    pub fn get(&self, uid: &str) -> Option<Arc<Site>> {
        self.sites.get(uid).cloned()
    }

    pub fn require(&self, uid: &str) -> Result<Arc<Site>> {
        match self.get(uid) {
            Some(site) => Ok(site),
            None => bail!(
                "unknown site `{uid}` (known: {})",
                self.uids().collect::<Vec<_>>().join(", ")
            ),
        }
    }

    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.sites.keys().map(String::as_str)
    }

    pub fn sites(&self) -> impl Iterator<Item = &Arc<Site>> {
        self.sites.values()
    }
}
