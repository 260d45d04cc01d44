use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::espn::{self, EspnConfig};
use crate::facebook::{self, FacebookConfig};
use crate::pipeline::PipelineConfig;
use crate::schedule::Schedule;
use crate::stylist::{self, StylistConfig};

const APP_DIR: &str = "sports-poster";
const DEFAULT_SCHEDULE: &str = "01:00,04:00,08:00,12:00,16:00,21:00";
const DEFAULT_TIMEZONE: &str = "Asia/Bangkok";
const DEFAULT_MAX_POSTS: usize = 5;
const DEFAULT_PANEL_ADDR: &str = "127.0.0.1:8080";

const SETUP_HINT: &str = "To fix this, create ~/.config/sports-poster/.env with:\n  \
    OPENROUTER_API_KEY=your_key_here\n  \
    FACEBOOK_PAGE_ID=your_page_id\n  \
    FACEBOOK_ACCESS_TOKEN=your_page_token";

/// Settings for the whole service, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub espn: EspnConfig,
    pub stylist: StylistConfig,
    pub facebook: FacebookConfig,
    pub pipeline: PipelineConfig,
    pub schedule: Schedule,
    pub ledger_path: PathBuf,
    pub panel_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Try to load .env from multiple locations
        Self::try_load_dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_keys = get("OPENROUTER_API_KEYS")
            .or_else(|| get("OPENROUTER_API_KEY"))
            .map(|v| split_list(&v))
            .unwrap_or_default();
        if api_keys.is_empty() {
            anyhow::bail!(
                "OPENROUTER_API_KEY not found.\n\n{}\n\n\
                Get an OpenRouter API key from: https://openrouter.ai/keys",
                SETUP_HINT
            );
        }

        let page_id = get("FACEBOOK_PAGE_ID")
            .with_context(|| format!("FACEBOOK_PAGE_ID not found.\n\n{}", SETUP_HINT))?;
        let access_token = get("FACEBOOK_ACCESS_TOKEN")
            .with_context(|| format!("FACEBOOK_ACCESS_TOKEN not found.\n\n{}", SETUP_HINT))?;

        let categories = get("ESPN_LEAGUES")
            .map(|v| split_list(&v))
            .unwrap_or_else(|| espn::DEFAULT_LEAGUES.iter().map(|s| s.to_string()).collect());
        if categories.is_empty() {
            anyhow::bail!("ESPN_LEAGUES must name at least one league code");
        }

        let max_posts = match get("MAX_POSTS_PER_RUN") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .with_context(|| format!("MAX_POSTS_PER_RUN must be a number, got '{}'", v))?,
            None => DEFAULT_MAX_POSTS,
        };
        if max_posts == 0 {
            anyhow::bail!("MAX_POSTS_PER_RUN must be at least 1; 0 would defer every article");
        }

        let schedule = Schedule::parse(
            &get("SCHEDULE_TIMES").unwrap_or_else(|| DEFAULT_SCHEDULE.to_string()),
            &get("SCHEDULE_TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
        )
        .context("Invalid schedule configuration")?;

        let ledger_path = match get("LEDGER_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_ledger_path()?,
        };

        let panel_addr = get("CONTROL_PANEL_ADDR")
            .unwrap_or_else(|| DEFAULT_PANEL_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("CONTROL_PANEL_ADDR must look like 127.0.0.1:8080")?;

        Ok(Self {
            espn: EspnConfig::default(),
            stylist: StylistConfig {
                api_keys,
                model: get("OPENROUTER_MODEL").unwrap_or_else(|| stylist::DEFAULT_MODEL.to_string()),
                endpoint: stylist::DEFAULT_ENDPOINT.to_string(),
            },
            facebook: FacebookConfig {
                page_id,
                access_token,
                graph_url: facebook::DEFAULT_GRAPH_URL.to_string(),
            },
            pipeline: PipelineConfig {
                categories,
                max_posts,
            },
            schedule,
            ledger_path,
            panel_addr,
        })
    }

    fn try_load_dotenv() {
        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/sports-poster/.env (standard config location)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join(APP_DIR).join(".env");
            if config_path.exists() && dotenvy::from_path(&config_path).is_ok() {
                return;
            }
        }

        // 3. ~/.env (home directory)
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            if home_path.exists() {
                let _ = dotenvy::from_path(&home_path);
            }
        }
    }
}

/// `<local data dir>/sports-poster/posted_articles.txt`
pub fn default_ledger_path() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .context("Could not determine local data directory; set LEDGER_PATH")?
        .join(APP_DIR);
    Ok(data_dir.join("posted_articles.txt"))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("OPENROUTER_API_KEY", "sk-or-1"),
        ("FACEBOOK_PAGE_ID", "1234"),
        ("FACEBOOK_ACCESS_TOKEN", "EAAB"),
        ("LEDGER_PATH", "/var/lib/poster/posted.txt"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(config.stylist.api_keys, vec!["sk-or-1"]);
        assert_eq!(config.stylist.model, "openai/gpt-3.5-turbo");
        assert_eq!(
            config.pipeline.categories,
            vec!["eng.1", "esp.1", "ger.1", "ita.1"]
        );
        assert_eq!(config.pipeline.max_posts, 5);
        assert_eq!(config.schedule.times().len(), 6);
        assert_eq!(config.schedule.timezone().name(), "Asia/Bangkok");
        assert_eq!(config.panel_addr.port(), 8080);
        assert_eq!(config.ledger_path, PathBuf::from("/var/lib/poster/posted.txt"));
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend_from_slice(&[
            ("OPENROUTER_API_KEYS", "k1, k2 ,,k3"),
            ("ESPN_LEAGUES", "eng.1,uefa.champions"),
            ("MAX_POSTS_PER_RUN", "3"),
            ("SCHEDULE_TIMES", "07:30,19:00"),
            ("SCHEDULE_TIMEZONE", "Europe/London"),
            ("CONTROL_PANEL_ADDR", "0.0.0.0:9090"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.stylist.api_keys, vec!["k1", "k2", "k3"]);
        assert_eq!(config.pipeline.categories, vec!["eng.1", "uefa.champions"]);
        assert_eq!(config.pipeline.max_posts, 3);
        assert_eq!(config.schedule.describe(), "07:30, 19:00 (Europe/London)");
        assert_eq!(config.panel_addr.port(), 9090);
    }

    #[test]
    fn test_missing_credentials_fail() {
        let err = Config::from_lookup(lookup(&[("FACEBOOK_PAGE_ID", "1")])).unwrap_err();
        assert!(err.to_string().contains("OPENROUTER_API_KEY"));

        let err = Config::from_lookup(lookup(&[("OPENROUTER_API_KEY", "k")])).unwrap_err();
        assert!(err.to_string().contains("FACEBOOK_PAGE_ID"));
    }

    #[test]
    fn test_bad_numbers_fail() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MAX_POSTS_PER_RUN", "five"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_zero_max_posts_fails() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MAX_POSTS_PER_RUN", "0"));
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }
}
