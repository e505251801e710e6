//! Test fixtures for common test scenarios.
//!
//! This module provides pre-built suite manifests and an on-disk suite
//! writer for tests that need real files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Fixture for a suite directory: a manifest plus arbitrary files.
#[derive(Debug, Clone)]
pub struct SuiteFixture {
    /// Directory name under the base path.
    pub name: String,
    /// suite.toml content.
    pub manifest: String,
    /// Extra files (path relative to the suite directory -> content).
    pub files: BTreeMap<PathBuf, Vec<u8>>,
}

impl SuiteFixture {
    pub fn new(name: impl Into<String>, manifest: impl Into<String>) -> Self {
        SuiteFixture {
            name: name.into(),
            manifest: manifest.into(),
            files: BTreeMap::new(),
        }
    }

    /// Add a file.
    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl AsRef<[u8]>) -> Self {
        self.files.insert(path.into(), content.as_ref().to_vec());
        self
    }

    /// Write this fixture to a real directory, returning the manifest path.
    pub fn write_to(&self, base_path: &Path) -> std::io::Result<PathBuf> {
        let suite_dir = base_path.join(&self.name);
        std::fs::create_dir_all(&suite_dir)?;

        let manifest = suite_dir.join("suite.toml");
        std::fs::write(&manifest, &self.manifest)?;

        for (rel_path, content) in &self.files {
            let full_path = suite_dir.join(rel_path);
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full_path, content)?;
        }

        Ok(manifest)
    }
}

/// Common manifest templates.
pub mod manifests {
    /// Projects chained `A -> B -> ... ` in the given order, each depending
    /// on the next.
    pub fn chain(suite: &str, projects: &[&str]) -> String {
        let mut out = format!("name = \"{}\"\n", suite);
        for (i, project) in projects.iter().enumerate() {
            out.push_str(&format!("[projects.\"{}\"]\n", project));
            if let Some(next) = projects.get(i + 1) {
                out.push_str(&format!("dependencies = [\"{}\"]\n", next));
            }
        }
        out
    }

    /// A suite with one library served from `url`, checked against `sha1`,
    /// and one project depending on it.
    pub fn downloaded_library(suite: &str, url: &str, sha1: &str) -> String {
        format!(
            r#"name = "{suite}"

[libraries.LIB]
urls = ["{url}"]
sha1 = "{sha1}"

[projects.app]
dependencies = ["LIB"]

[distributions.APP]
dependencies = ["app"]
"#
        )
    }
}
