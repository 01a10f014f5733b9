pub mod generate;
pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub use parse::{load_config, ConfigError};
pub use types::Config;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is a valid regex")
});

/// Expands environment variables written as `$env{VAR_NAME}`.
/// Variables that are not set are left unchanged.
pub fn expand_env_vars(text: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(text, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
}

/// Names of `$env{...}` references still present in `text`, sorted and deduplicated.
pub(crate) fn unexpanded_env_vars(text: &str) -> Vec<String> {
    let mut names: Vec<String> = ENV_VAR_PATTERN
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file path. Returns the first match of:
/// 1. Explicit path (with tilde expansion)
/// 2. ~/.config/logship/config.yml
/// 3. /etc/logship/config.yml
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/logship/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from("/etc/logship/config.yml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_single() {
        std::env::set_var("LOGSHIP_TEST_BUCKET", "alb-logs");
        let result = expand_env_vars("bucket: $env{LOGSHIP_TEST_BUCKET}");
        assert_eq!(result, "bucket: alb-logs");
        std::env::remove_var("LOGSHIP_TEST_BUCKET");
    }

    #[test]
    fn test_expand_env_vars_unset_left_alone() {
        let result = expand_env_vars("prefix: $env{LOGSHIP_SURELY_UNSET}/x");
        assert_eq!(result, "prefix: $env{LOGSHIP_SURELY_UNSET}/x");
        assert_eq!(unexpanded_env_vars(&result), vec!["LOGSHIP_SURELY_UNSET"]);
    }

    #[test]
    fn test_unexpanded_env_vars_dedup() {
        let names = unexpanded_env_vars("$env{B} $env{A} $env{B}");
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/logs")), home.join("logs"));
            assert_eq!(expand_tilde(Path::new("~")), home);
        }
        assert_eq!(expand_tilde(Path::new("/var/logs")), Path::new("/var/logs"));
    }

    #[test]
    fn test_resolve_explicit_path_wins() {
        let resolved = resolve_config_path(Some(Path::new("/tmp/custom.yml")));
        assert_eq!(resolved, Some(PathBuf::from("/tmp/custom.yml")));
    }
}
