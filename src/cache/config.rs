//! Page pipeline cache configuration.
//!
//! Controls the page directory refresh cadence, the preload lock and whether
//! rendered pages are cached at all.

use std::time::Duration;

use crate::domain::types::AppMode;

// Default values for cache configuration
const DEV_DIRECTORY_TTL: Duration = Duration::from_secs(120);
const PROD_DIRECTORY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_PAGE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_PRELOAD_FLAG_TTL: Duration = Duration::from_secs(30);
const DEFAULT_PRELOAD_WAIT: Duration = Duration::from_millis(500);
const DEFAULT_PRELOAD_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WcmConfig {
    /// Serve pages through the resolver at all.
    pub enabled: bool,
    /// Cache rendered pages.
    pub cache: bool,
    /// Cache rendered pages even if `cache` is off.
    pub force_page_cache: bool,
    pub mode: AppMode,
    /// Overrides the mode-dependent directory TTL.
    pub directory_ttl_override: Option<Duration>,
    /// Age after which a cached render is discarded on read.
    pub page_ttl: Duration,
    /// Lifetime of the preloading flag; bounds how long a crashed rebuilder
    /// can block others.
    pub preload_flag_ttl: Duration,
    /// Pause between attempts while another worker rebuilds.
    pub preload_wait: Duration,
    /// Give up waiting for another worker's rebuild after this long.
    pub preload_deadline: Duration,
}

impl Default for WcmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache: false,
            force_page_cache: false,
            mode: AppMode::Development,
            directory_ttl_override: None,
            page_ttl: DEFAULT_PAGE_TTL,
            preload_flag_ttl: DEFAULT_PRELOAD_FLAG_TTL,
            preload_wait: DEFAULT_PRELOAD_WAIT,
            preload_deadline: DEFAULT_PRELOAD_DEADLINE,
        }
    }
}

impl From<&crate::config::WcmSettings> for WcmConfig {
    fn from(settings: &crate::config::WcmSettings) -> Self {
        Self {
            enabled: settings.enabled,
            cache: settings.cache,
            force_page_cache: settings.force_page_cache,
            mode: settings.mode,
            directory_ttl_override: settings.directory_ttl_seconds.map(Duration::from_secs),
            page_ttl: Duration::from_secs(settings.page_ttl_seconds.get()),
            preload_flag_ttl: Duration::from_secs(settings.preload_flag_ttl_seconds.get()),
            preload_wait: Duration::from_millis(settings.preload_wait_ms.get()),
            preload_deadline: Duration::from_millis(settings.preload_deadline_ms.get()),
        }
    }
}

impl WcmConfig {
    /// Whether rendered pages are read from and written to the render cache.
    ///
    /// Only production workers cache; authoring environments always render.
    pub fn page_cache_enabled(&self) -> bool {
        self.enabled && (self.cache || self.force_page_cache) && self.mode.is_production()
    }

    /// How long a directory snapshot stays current.
    pub fn directory_ttl(&self) -> Duration {
        self.directory_ttl_override.unwrap_or(match self.mode {
            AppMode::Development => DEV_DIRECTORY_TTL,
            AppMode::Production => PROD_DIRECTORY_TTL,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = WcmConfig::default();
        assert!(config.enabled);
        assert!(!config.page_cache_enabled());
        assert_eq!(config.directory_ttl(), Duration::from_secs(120));
        assert_eq!(config.page_ttl, Duration::from_secs(86_400));
        assert_eq!(config.preload_flag_ttl, Duration::from_secs(30));
        assert_eq!(config.preload_wait, Duration::from_millis(500));
    }

    #[test]
    fn production_directory_ttl_is_a_day() {
        let config = WcmConfig {
            mode: AppMode::Production,
            ..WcmConfig::default()
        };
        assert_eq!(config.directory_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn directory_ttl_override_wins() {
        let config = WcmConfig {
            mode: AppMode::Production,
            directory_ttl_override: Some(Duration::from_secs(5)),
            ..WcmConfig::default()
        };
        assert_eq!(config.directory_ttl(), Duration::from_secs(5));
    }

    #[test]
    fn page_cache_requires_production() {
        let mut config = WcmConfig {
            cache: true,
            ..WcmConfig::default()
        };
        assert!(!config.page_cache_enabled());

        config.mode = AppMode::Production;
        assert!(config.page_cache_enabled());

        config.enabled = false;
        assert!(!config.page_cache_enabled());
    }

    #[test]
    fn force_flag_turns_cache_on() {
        let config = WcmConfig {
            mode: AppMode::Production,
            force_page_cache: true,
            ..WcmConfig::default()
        };
        assert!(config.page_cache_enabled());
    }
}
