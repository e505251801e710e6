//! `${VAR}` expansion in manifest paths.

use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::{Captures, Regex};

static VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Expand `${VAR}` references using the process environment.
pub fn expand_env(input: &str) -> Result<String> {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Expand `${VAR}` references with a custom lookup. Unset variables are an error.
pub fn expand_with<F>(input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = Vec::new();
    let expanded = VAR_PATTERN.replace_all(input, |caps: &Captures<'_>| {
        let name = &caps[1];
        match lookup(name) {
            Some(value) => value,
            None => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        bail!(
            "environment variable(s) {} referenced by `{}` are not set",
            missing.join(", "),
            input
        );
    }

    Ok(expanded.into_owned())
}

/// Whether the string contains any `${VAR}` reference.
pub fn has_vars(input: &str) -> bool {
    VAR_PATTERN.is_match(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "JAVA_HOME" => Some("/opt/jdk".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_expands_known_variable() {
        let out = expand_with("${JAVA_HOME}/lib/tools.jar", lookup).unwrap();
        assert_eq!(out, "/opt/jdk/lib/tools.jar");
    }

    #[test]
    fn test_plain_path_untouched() {
        assert_eq!(
            expand_with("libdownloads/xz-1.5.jar", lookup).unwrap(),
            "libdownloads/xz-1.5.jar"
        );
        assert!(!has_vars("libdownloads/xz-1.5.jar"));
    }

    #[test]
    fn test_unset_variable_is_error() {
        let err = expand_with("${NOPE}/x", lookup).unwrap_err();
        assert!(err.to_string().contains("NOPE"));
    }
}
