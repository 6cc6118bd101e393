//! Service Configuration Module
//!
//! Configuration for the keyword cache process, loaded from environment
//! variables with defaults suitable for development.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use gcmd_core::{ConfigError, LocationOverrides, Scheme};
use gcmd_index::IndexConfig;
use gcmd_storage::CacheConfig;

use crate::constants::{
    DEFAULT_FALLBACK_MAX_SIZE_MB, DEFAULT_FALLBACK_PATH, DEFAULT_REFRESH_INTERVAL_SECS,
    DEFAULT_REFRESH_ON_START,
};
use crate::jobs::KeywordRefreshConfig;

// ============================================================================
// SERVICE CONFIGURATION
// ============================================================================

/// Everything needed to assemble a [`KeywordService`](crate::KeywordService).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Refresh job schedule.
    pub refresh: KeywordRefreshConfig,

    /// Multi-tier cache timeouts and consistency checks.
    pub cache: CacheConfig,

    /// Upper bound on fetching a single scheme.
    pub scheme_timeout: Duration,

    /// Schemes fetched on each load. Defaults to every known scheme.
    pub schemes: Vec<Scheme>,

    /// Directory of the LMDB fallback tier.
    pub fallback_path: PathBuf,

    /// LMDB map size in megabytes.
    pub fallback_max_size_mb: usize,

    /// Index construction inputs (location overrides).
    pub index: IndexConfig,

    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            refresh: KeywordRefreshConfig::default(),
            cache: CacheConfig::default(),
            scheme_timeout: gcmd_storage::DEFAULT_SCHEME_TIMEOUT,
            schemes: Scheme::ALL.to_vec(),
            fallback_path: PathBuf::from(DEFAULT_FALLBACK_PATH),
            fallback_max_size_mb: DEFAULT_FALLBACK_MAX_SIZE_MB,
            index: IndexConfig::default(),
            log_json: false,
        }
    }
}

impl ServiceConfig {
    /// Create ServiceConfig from environment variables.
    ///
    /// Unparseable numbers and zero durations fall back to their defaults,
    /// unknown scheme names are skipped and an unreadable override file
    /// leaves the built-in table in place. Each of these is logged. Use [`try_from_env`](Self::try_from_env)
    /// to reject such input instead.
    ///
    /// # Environment Variables
    /// - `GCMD_REFRESH_INTERVAL_SECS`: Seconds between refreshes (default: 14400)
    /// - `GCMD_REFRESH_ON_START`: Refresh as soon as the job starts (default: true)
    /// - `GCMD_FETCH_TIMEOUT_SECS`: Bound on one full remote fetch (default: 300)
    /// - `GCMD_SCHEME_TIMEOUT_SECS`: Bound on fetching one scheme (default: 60)
    /// - `GCMD_FALLBACK_TIMEOUT_SECS`: Bound on one fallback tier operation (default: 10)
    /// - `GCMD_CONSISTENCY_TIMEOUT_SECS`: Bound on one consistency tier operation (default: 5)
    /// - `GCMD_CONSISTENCY_CHECK_SECS`: Seconds between consistency checks, 0 disables (default: 60)
    /// - `GCMD_FALLBACK_PATH`: LMDB directory (default: ./data/gcmd-keyword-cache)
    /// - `GCMD_FALLBACK_MAX_SIZE_MB`: LMDB map size (default: 256)
    /// - `GCMD_SCHEMES`: Comma-separated scheme names (default: all)
    /// - `GCMD_LOCATION_OVERRIDES_PATH`: JSON file replacing the built-in override table
    /// - `GCMD_LOG_JSON`: "true" for JSON logs (default: false)
    pub fn from_env() -> Self {
        let mut config = Self::numeric_from_env(Parse::Lenient).unwrap_or_default();

        if let Some(raw) = env_string("GCMD_SCHEMES") {
            let schemes: Vec<Scheme> = split_list(&raw)
                .filter_map(|name| match Scheme::from_str(name) {
                    Ok(scheme) => Some(scheme),
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring unknown scheme in GCMD_SCHEMES");
                        None
                    }
                })
                .collect();
            if !schemes.is_empty() {
                config.schemes = schemes;
            }
        }

        if let Some(path) = env_string("GCMD_LOCATION_OVERRIDES_PATH") {
            match LocationOverrides::from_json_file(&path) {
                Ok(overrides) => config.index = config.index.with_location_overrides(overrides),
                Err(e) => {
                    tracing::warn!(error = %e, "Keeping built-in location overrides");
                }
            }
        }

        config
    }

    /// Like [`from_env`](Self::from_env), but zero durations, unknown scheme
    /// names and an unreadable override file are errors.
    /// `GCMD_CONSISTENCY_CHECK_SECS=0` still means "disabled".
    pub fn try_from_env() -> Result<Self, ConfigError> {
        let mut config = Self::numeric_from_env(Parse::Strict)?;

        if let Some(raw) = env_string("GCMD_SCHEMES") {
            let schemes = split_list(&raw)
                .map(Scheme::from_str)
                .collect::<Result<Vec<_>, _>>()?;
            if schemes.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "GCMD_SCHEMES".to_string(),
                    value: raw,
                    reason: "no scheme names given".to_string(),
                });
            }
            config.schemes = schemes;
        }

        if let Some(path) = env_string("GCMD_LOCATION_OVERRIDES_PATH") {
            let overrides = LocationOverrides::from_json_file(&path)?;
            config.index = config.index.with_location_overrides(overrides);
        }

        Ok(config)
    }

    fn numeric_from_env(mode: Parse) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let refresh = KeywordRefreshConfig {
            interval: env_secs(
                "GCMD_REFRESH_INTERVAL_SECS",
                Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
                mode,
            )?,
            refresh_on_start: env_flag("GCMD_REFRESH_ON_START", DEFAULT_REFRESH_ON_START),
        };

        let consistency_check_secs = env_parse(
            "GCMD_CONSISTENCY_CHECK_SECS",
            defaults
                .cache
                .consistency_check_interval
                .map_or(0, |interval| interval.as_secs()),
        );

        let cache = CacheConfig::new()
            .with_fetch_timeout(env_secs(
                "GCMD_FETCH_TIMEOUT_SECS",
                defaults.cache.fetch_timeout,
                mode,
            )?)
            .with_fallback_timeout(env_secs(
                "GCMD_FALLBACK_TIMEOUT_SECS",
                defaults.cache.fallback_timeout,
                mode,
            )?)
            .with_consistency_timeout(env_secs(
                "GCMD_CONSISTENCY_TIMEOUT_SECS",
                defaults.cache.consistency_timeout,
                mode,
            )?)
            .with_consistency_check_interval(
                (consistency_check_secs > 0).then(|| Duration::from_secs(consistency_check_secs)),
            );

        Ok(Self {
            refresh,
            cache,
            scheme_timeout: env_secs("GCMD_SCHEME_TIMEOUT_SECS", defaults.scheme_timeout, mode)?,
            fallback_path: env_string("GCMD_FALLBACK_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.fallback_path),
            fallback_max_size_mb: env_parse(
                "GCMD_FALLBACK_MAX_SIZE_MB",
                DEFAULT_FALLBACK_MAX_SIZE_MB,
            ),
            log_json: env_flag("GCMD_LOG_JSON", false),
            ..defaults
        })
    }
}

/// How [`ServiceConfig`] treats values it cannot use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parse {
    /// Log and use the default.
    Lenient,
    /// Return [`ConfigError::InvalidValue`].
    Strict,
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env_string(name)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// A whole number of seconds that must not be zero.
fn env_secs(name: &str, default: Duration, mode: Parse) -> Result<Duration, ConfigError> {
    match env_parse(name, default.as_secs()) {
        0 if mode == Parse::Strict => Err(ConfigError::InvalidValue {
            field: name.to_string(),
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        0 => {
            tracing::warn!(
                var = name,
                default_secs = default.as_secs(),
                "Ignoring zero duration"
            );
            Ok(default)
        }
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env_string(name)
        .map(|s| matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Serializes tests that touch process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    const ALL_VARS: [&str; 12] = [
        "GCMD_REFRESH_INTERVAL_SECS",
        "GCMD_REFRESH_ON_START",
        "GCMD_FETCH_TIMEOUT_SECS",
        "GCMD_SCHEME_TIMEOUT_SECS",
        "GCMD_FALLBACK_TIMEOUT_SECS",
        "GCMD_CONSISTENCY_TIMEOUT_SECS",
        "GCMD_CONSISTENCY_CHECK_SECS",
        "GCMD_FALLBACK_PATH",
        "GCMD_FALLBACK_MAX_SIZE_MB",
        "GCMD_SCHEMES",
        "GCMD_LOCATION_OVERRIDES_PATH",
        "GCMD_LOG_JSON",
    ];

    fn clear_env() -> Vec<EnvVarGuard> {
        ALL_VARS
            .iter()
            .map(|key| EnvVarGuard::set(key, None))
            .collect()
    }

    #[test]
    fn test_defaults_without_environment() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_env();

        let config = ServiceConfig::try_from_env().unwrap();
        assert_eq!(config.refresh.interval, Duration::from_secs(14_400));
        assert!(config.refresh.refresh_on_start);
        assert_eq!(config.schemes, Scheme::ALL.to_vec());
        assert_eq!(config.fallback_max_size_mb, 256);
        assert_eq!(
            config.cache.consistency_check_interval,
            Some(Duration::from_secs(60))
        );
        assert!(!config.log_json);
    }

    #[test]
    fn test_numeric_overrides_and_bad_numbers() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_env();
        let _a = EnvVarGuard::set("GCMD_REFRESH_INTERVAL_SECS", Some("600"));
        let _b = EnvVarGuard::set("GCMD_FETCH_TIMEOUT_SECS", Some("not-a-number"));
        let _c = EnvVarGuard::set("GCMD_CONSISTENCY_CHECK_SECS", Some("0"));
        let _d = EnvVarGuard::set("GCMD_LOG_JSON", Some("TRUE"));
        let _e = EnvVarGuard::set("GCMD_REFRESH_ON_START", Some("false"));

        let config = ServiceConfig::from_env();
        assert_eq!(config.refresh.interval, Duration::from_secs(600));
        assert!(!config.refresh.refresh_on_start);
        assert_eq!(config.cache.fetch_timeout, CacheConfig::default().fetch_timeout);
        assert_eq!(config.cache.consistency_check_interval, None);
        assert!(config.log_json);
    }

    #[test]
    fn test_zero_timeouts_rejected_by_try_from_env() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        for var in [
            "GCMD_REFRESH_INTERVAL_SECS",
            "GCMD_FETCH_TIMEOUT_SECS",
            "GCMD_SCHEME_TIMEOUT_SECS",
            "GCMD_FALLBACK_TIMEOUT_SECS",
            "GCMD_CONSISTENCY_TIMEOUT_SECS",
        ] {
            let _guards = clear_env();
            let _zero = EnvVarGuard::set(var, Some("0"));

            assert_eq!(
                ServiceConfig::try_from_env().unwrap_err(),
                ConfigError::InvalidValue {
                    field: var.to_string(),
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                },
                "{var}"
            );
        }
    }

    #[test]
    fn test_zero_timeouts_use_defaults_in_from_env() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_env();
        let _a = EnvVarGuard::set("GCMD_FETCH_TIMEOUT_SECS", Some("0"));
        let _b = EnvVarGuard::set("GCMD_SCHEME_TIMEOUT_SECS", Some("0"));
        let _c = EnvVarGuard::set("GCMD_REFRESH_INTERVAL_SECS", Some("0"));
        let _d = EnvVarGuard::set("GCMD_CONSISTENCY_TIMEOUT_SECS", Some("7"));

        let config = ServiceConfig::from_env();
        let defaults = ServiceConfig::default();
        assert_eq!(config.cache.fetch_timeout, defaults.cache.fetch_timeout);
        assert_eq!(config.scheme_timeout, defaults.scheme_timeout);
        assert_eq!(config.refresh.interval, defaults.refresh.interval);
        assert_eq!(config.cache.consistency_timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_zero_consistency_check_still_disables() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_env();
        let _c = EnvVarGuard::set("GCMD_CONSISTENCY_CHECK_SECS", Some("0"));

        let config = ServiceConfig::try_from_env().unwrap();
        assert_eq!(config.cache.consistency_check_interval, None);
    }

    #[test]
    fn test_scheme_list() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_env();
        let _s = EnvVarGuard::set("GCMD_SCHEMES", Some("providers, locations ,platforms"));

        let config = ServiceConfig::try_from_env().unwrap();
        assert_eq!(
            config.schemes,
            vec![Scheme::Providers, Scheme::SpatialKeywords, Scheme::Platforms]
        );
    }

    #[test]
    fn test_unknown_scheme_is_lenient_only_in_from_env() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_env();
        let _s = EnvVarGuard::set("GCMD_SCHEMES", Some("providers,volcanoes"));

        assert_eq!(ServiceConfig::from_env().schemes, vec![Scheme::Providers]);
        assert_eq!(
            ServiceConfig::try_from_env().unwrap_err(),
            ConfigError::UnknownScheme {
                name: "volcanoes".to_string()
            }
        );
    }

    #[test]
    fn test_override_file() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_env();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"PACIFIC": {{"uuid": "00000000-0000-0000-0000-000000000009", "category": "OCEAN", "type": "PACIFIC OCEAN"}}}}"#
        )
        .unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let _p = EnvVarGuard::set("GCMD_LOCATION_OVERRIDES_PATH", Some(&path));

        let config = ServiceConfig::try_from_env().unwrap();
        let overrides = &config.index.location_overrides;
        assert_eq!(overrides.len(), 1);
        assert!(overrides.get("PACIFIC").is_some());
    }

    #[test]
    fn test_missing_override_file() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_env();
        let _p = EnvVarGuard::set(
            "GCMD_LOCATION_OVERRIDES_PATH",
            Some("/nonexistent/gcmd/overrides.json"),
        );

        assert!(matches!(
            ServiceConfig::try_from_env(),
            Err(ConfigError::OverrideFile { .. })
        ));
        assert_eq!(
            ServiceConfig::from_env().index.location_overrides,
            LocationOverrides::builtin()
        );
    }
}
