use crate::cli::CliArgs;
use crate::model::ResourceKind;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const DEFAULT_REFRESH_MS: u64 = 1_500;
const MIN_REFRESH_MS: u64 = 500;
const DEFAULT_STATUS_DELAY_MS: u64 = 1_000;

/// Effective settings after merging the config file with the command line.
#[derive(Debug, Clone)]
pub struct Settings {
    pub source: Option<String>,
    pub refresh: Duration,
    pub status_delay: Duration,
    pub root_page: ResourceKind,
    pub pages: Vec<ResourceKind>,
    pub aliases: HashMap<String, ResourceKind>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source: None,
            refresh: Duration::from_millis(DEFAULT_REFRESH_MS),
            status_delay: Duration::from_millis(DEFAULT_STATUS_DELAY_MS),
            root_page: ResourceKind::Pods,
            pages: ResourceKind::ALL.to_vec(),
            aliases: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct AxeConfigFile {
    #[serde(default)]
    refresh_ms: Option<u64>,
    #[serde(default, alias = "status_delay")]
    status_delay_ms: Option<u64>,
    #[serde(default, alias = "root")]
    root_page: Option<String>,
    #[serde(default)]
    pages: Vec<String>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

impl Settings {
    pub fn load(args: &CliArgs) -> Result<Self> {
        let path = args.config.clone().or_else(discover_config_path);
        let mut settings = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        if let Some(refresh_ms) = args.refresh_ms {
            settings.refresh = Duration::from_millis(refresh_ms.max(MIN_REFRESH_MS));
        }
        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut settings = Self::from_yaml(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        settings.source = Some(path.display().to_string());
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let parsed: AxeConfigFile = if raw.trim().is_empty() {
            AxeConfigFile::default()
        } else {
            serde_yaml::from_str(raw)?
        };

        let mut settings = Self::default();
        if let Some(refresh_ms) = parsed.refresh_ms {
            settings.refresh = Duration::from_millis(refresh_ms.max(MIN_REFRESH_MS));
        }
        if let Some(delay_ms) = parsed.status_delay_ms {
            settings.status_delay = Duration::from_millis(delay_ms);
        }
        if let Some(root) = parsed.root_page {
            settings.root_page = ResourceKind::from_token(&root)
                .with_context(|| format!("unknown root_page '{root}'"))?;
        }

        let mut pages = Vec::new();
        for page in &parsed.pages {
            match ResourceKind::from_token(page) {
                Some(kind) if !pages.contains(&kind) => pages.push(kind),
                Some(_) => {}
                None => warn!(page = %page, "ignoring unknown page in config"),
            }
        }
        if !pages.is_empty() {
            settings.pages = pages;
        }
        if !settings.pages.contains(&settings.root_page) {
            settings.pages.insert(0, settings.root_page);
        }

        for (alias, target) in parsed.aliases {
            match ResourceKind::from_token(&target) {
                Some(kind) => {
                    settings.aliases.insert(alias.trim().to_ascii_lowercase(), kind);
                }
                None => warn!(alias = %alias, target = %target, "ignoring alias to unknown page"),
            }
        }

        Ok(settings)
    }

    pub fn resolve_page(&self, token: &str) -> Option<ResourceKind> {
        let token = token.trim().to_ascii_lowercase();
        self.aliases
            .get(&token)
            .copied()
            .or_else(|| ResourceKind::from_token(&token))
    }
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("AXE_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [PathBuf::from("axe.yaml"), PathBuf::from("axe.yml")];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let user_candidates = [
            PathBuf::from(&home).join(".config/axe/config.yaml"),
            PathBuf::from(&home).join(".config/axe/config.yml"),
        ];
        for candidate in user_candidates {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::Settings;
    use crate::model::ResourceKind;
    use std::time::Duration;

    #[test]
    fn empty_file_yields_defaults() {
        let settings = Settings::from_yaml("").expect("settings");
        assert_eq!(settings.refresh, Duration::from_millis(1_500));
        assert_eq!(settings.status_delay, Duration::from_secs(1));
        assert_eq!(settings.root_page, ResourceKind::Pods);
        assert_eq!(settings.pages.len(), ResourceKind::ALL.len());
    }

    #[test]
    fn file_values_are_parsed_and_clamped() {
        let raw = r#"
refresh_ms: 100
status_delay_ms: 2500
root_page: deploy
pages: [svc, deploy, bogus, svc]
aliases:
  web: ingresses
  broken: nothing
"#;
        let settings = Settings::from_yaml(raw).expect("settings");
        assert_eq!(settings.refresh, Duration::from_millis(500));
        assert_eq!(settings.status_delay, Duration::from_millis(2_500));
        assert_eq!(settings.root_page, ResourceKind::Deployments);
        assert_eq!(
            settings.pages,
            vec![ResourceKind::Services, ResourceKind::Deployments]
        );
        assert_eq!(settings.resolve_page("WEB"), Some(ResourceKind::Ingresses));
        assert_eq!(settings.resolve_page("broken"), None);
        assert_eq!(settings.resolve_page("po"), Some(ResourceKind::Pods));
    }

    #[test]
    fn root_page_is_always_navigable() {
        let settings = Settings::from_yaml("root_page: nodes\npages: [pods]").expect("settings");
        assert_eq!(settings.pages, vec![ResourceKind::Nodes, ResourceKind::Pods]);
    }

    #[test]
    fn unknown_root_page_is_an_error() {
        let error = Settings::from_yaml("root_page: widgets").expect_err("should fail");
        assert!(error.to_string().contains("widgets"));
    }
}
