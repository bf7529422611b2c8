use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "https://api.opensuse.org";
pub const DEFAULT_REVIEWER: &str = "factory-repo-checker";
pub const DEFAULT_CHECKER_SCRIPT: &str = "/suse/coolo/checker/repo-checker.pl";

/// The two architectures every accepted package must build for.
///
/// Binaries built on `secondary` whose own architecture is `primary` (for
/// example 32-bit compat packages produced in a 64-bit build) are treated as
/// part of the primary set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchPair {
    pub primary: String,
    pub secondary: String,
}

impl Default for ArchPair {
    fn default() -> Self {
        Self {
            primary: "x86_64".to_string(),
            secondary: "i586".to_string(),
        }
    }
}

impl ArchPair {
    pub fn contains(&self, arch: &str) -> bool {
        arch == self.primary || arch == self.secondary
    }

    /// Both architectures, primary first.
    pub fn both(&self) -> [&str; 2] {
        [&self.primary, &self.secondary]
    }
}

/// Settings the review engine needs at runtime.
#[derive(Debug, Clone)]
pub struct ReviewSettings {
    /// Identity the reviews are assigned to and posted as.
    pub reviewer: String,
    pub archs: ArchPair,
    /// Trusted project whose packages may only depend on its own binaries.
    pub base_project: String,
    /// Repository of the base project holding its binaries.
    pub base_repository: String,
    /// Repository of the target project holding already-shipped binaries.
    pub released_repository: String,
    /// Parent of the per-group download directories.
    pub work_dir: PathBuf,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            reviewer: DEFAULT_REVIEWER.to_string(),
            archs: ArchPair::default(),
            base_project: "Base:build".to_string(),
            base_repository: "standard".to_string(),
            released_repository: "standard".to_string(),
            work_dir: PathBuf::from("co"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    /// Optional HTTP basic credentials.
    pub credentials: Option<(String, String)>,
    /// Directory for the persistent lookup cache (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    pub checker_script: PathBuf,
    pub review: ReviewSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_url = env::var("OBS_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let credentials = parse_credentials(
            non_empty(env::var("OBS_USER").ok()),
            non_empty(env::var("OBS_PASSWORD").ok()),
        )?;

        let state_dir = env::var("REPOCHECKER_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let work_dir = match env::var("REPOCHECKER_WORK_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => default_work_dir(env::var("HOME").ok())
                .context("REPOCHECKER_WORK_DIR is unset and HOME is not available")?,
        };

        let checker_script = env::var("REPOCHECKER_CHECKER")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CHECKER_SCRIPT));

        let defaults = ReviewSettings::default();
        let review = ReviewSettings {
            reviewer: non_empty(env::var("REPOCHECKER_REVIEWER").ok()).unwrap_or(defaults.reviewer),
            archs: ArchPair {
                primary: non_empty(env::var("REPOCHECKER_PRIMARY_ARCH").ok())
                    .unwrap_or(defaults.archs.primary),
                secondary: non_empty(env::var("REPOCHECKER_SECONDARY_ARCH").ok())
                    .unwrap_or(defaults.archs.secondary),
            },
            base_project: non_empty(env::var("REPOCHECKER_BASE_PROJECT").ok())
                .unwrap_or(defaults.base_project),
            base_repository: non_empty(env::var("REPOCHECKER_BASE_REPO").ok())
                .unwrap_or(defaults.base_repository),
            released_repository: non_empty(env::var("REPOCHECKER_RELEASED_REPO").ok())
                .unwrap_or(defaults.released_repository),
            work_dir,
        };

        if review.archs.primary == review.archs.secondary {
            bail!(
                "primary and secondary architecture must differ (both are {})",
                review.archs.primary
            );
        }

        Ok(Config {
            api_url,
            credentials,
            state_dir,
            checker_script,
            review,
        })
    }

    pub fn cache_db_path(&self) -> PathBuf {
        self.state_dir.join("repochecker-cache.db")
    }
}

/// Treat missing, empty and whitespace-only values alike.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Credentials need both halves; one without the other is a mistake.
pub fn parse_credentials(
    user: Option<String>,
    password: Option<String>,
) -> Result<Option<(String, String)>> {
    match (user, password) {
        (Some(user), Some(password)) => Ok(Some((user, password))),
        (None, None) => Ok(None),
        (Some(_), None) => bail!("OBS_USER is set but OBS_PASSWORD is not"),
        (None, Some(_)) => bail!("OBS_PASSWORD is set but OBS_USER is not"),
    }
}

pub fn default_work_dir(home: Option<String>) -> Option<PathBuf> {
    non_empty(home).map(|home| PathBuf::from(home).join("co"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty_filters_whitespace() {
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some("".to_string())), None);
        assert_eq!(non_empty(Some(" \t".to_string())), None);
        assert_eq!(non_empty(Some("x".to_string())), Some("x".to_string()));
    }

    #[test]
    fn test_parse_credentials_requires_both() {
        assert!(parse_credentials(None, None).unwrap().is_none());
        assert_eq!(
            parse_credentials(Some("u".to_string()), Some("p".to_string())).unwrap(),
            Some(("u".to_string(), "p".to_string()))
        );
        assert!(parse_credentials(Some("u".to_string()), None).is_err());
        assert!(parse_credentials(None, Some("p".to_string())).is_err());
    }

    #[test]
    fn test_default_work_dir_under_home() {
        assert_eq!(
            default_work_dir(Some("/home/checker".to_string())),
            Some(PathBuf::from("/home/checker/co"))
        );
        assert_eq!(default_work_dir(None), None);
    }

    #[test]
    fn test_base_and_released_repositories_are_separate_settings() {
        let settings = ReviewSettings {
            released_repository: "openSUSE_Factory".to_string(),
            ..ReviewSettings::default()
        };
        assert_eq!(settings.base_repository, "standard");
        assert_eq!(settings.released_repository, "openSUSE_Factory");
    }

    #[test]
    fn test_arch_pair() {
        let archs = ArchPair::default();
        assert!(archs.contains("x86_64"));
        assert!(archs.contains("i586"));
        assert!(!archs.contains("aarch64"));
        assert_eq!(archs.both(), ["x86_64", "i586"]);
    }
}
