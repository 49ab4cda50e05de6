use std::{
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    error::{EvalError, EvalResult},
    uri::{ModuleUri, PackageUri},
};

/// The sentinel checksum value that disables verification (test-only).
pub const SKIP_CHECKSUM_VERIFICATION: &str = "$skipChecksumVerification";

/// File name of the resolved-dependency manifest next to `PklProject`.
pub const DEPS_FILE_NAME: &str = "PklProject.deps.json";

/// The bit-exact `PklProject.deps.json` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDeps {
    pub schema_version: u32,
    pub resolved_dependencies: IndexMap<String, ResolvedDependency>,
}

/// One resolved dependency, keyed by canonical package URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResolvedDependency {
    Remote { uri: String, checksums: Checksums },
    Local { uri: String, path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checksums {
    pub sha256: String,
}

impl ProjectDeps {
    pub fn parse(text: &str) -> EvalResult<Self> {
        let deps: Self = serde_json::from_str(text)
            .map_err(|e| EvalError::resolve(format!("Cannot parse `{DEPS_FILE_NAME}`: {e}.")))?;
        if deps.schema_version != 1 {
            return Err(EvalError::resolve(format!(
                "`{DEPS_FILE_NAME}` has unsupported schema version {}.",
                deps.schema_version
            )));
        }
        Ok(deps)
    }

    /// Finds the dependency entry for a package, matching the exact
    /// canonical URI first and falling back to a same-major-version key
    /// (the manifest is keyed by major version).
    #[must_use]
    pub fn find(&self, pkg: &PackageUri) -> Option<&ResolvedDependency> {
        let canonical = pkg.canonical();
        if let Some(dep) = self.resolved_dependencies.get(&canonical) {
            return Some(dep);
        }
        let major = pkg.version.split('.').next()?;
        let prefix = format!("package://{}/{}@{major}", pkg.host, pkg.name);
        self.resolved_dependencies
            .iter()
            .find(|(key, _)| **key == prefix || key.starts_with(&format!("{prefix}.")))
            .map(|(_, dep)| dep)
    }

    /// Finds a dependency by its short alias (the final segment of the
    /// package name), used to rewrite `@alias/…` imports.
    #[must_use]
    pub fn find_by_alias(&self, alias: &str) -> Option<(&String, &ResolvedDependency)> {
        self.resolved_dependencies.iter().find(|(key, _)| {
            key.rsplit_once('@')
                .map(|(head, _)| head.rsplit('/').next() == Some(alias))
                .unwrap_or(false)
        })
    }
}

/// A project: the directory holding `PklProject` plus its resolved
/// dependency manifest.
#[derive(Debug, Clone)]
pub struct Project {
    pub dir: PathBuf,
    pub deps: ProjectDeps,
}

impl Project {
    /// Loads `PklProject.deps.json` from a project directory.
    pub fn load(dir: &Path) -> EvalResult<Self> {
        let path = dir.join(DEPS_FILE_NAME);
        let text = fs::read_to_string(&path)
            .map_err(|e| EvalError::io(format!("Cannot read `{}`: {e}.", path.display())))?;
        Ok(Self {
            dir: dir.to_owned(),
            deps: ProjectDeps::parse(&text)?,
        })
    }

    /// Rewrites a dependency-notation import (`@alias/rest.pkl`) into an
    /// absolute module URI: `projectpackage://…#/rest.pkl` for remote
    /// dependencies, a `file:` URI for local ones.
    pub fn rewrite_dependency_import(&self, target: &str) -> EvalResult<ModuleUri> {
        debug_assert!(target.starts_with('@'));
        let rest = &target[1..];
        let (alias, path) = match rest.split_once('/') {
            Some((alias, path)) => (alias, path),
            None => (rest, ""),
        };
        let Some(dep) = self.deps.find_by_alias(alias).map(|(_, dep)| dep) else {
            return Err(EvalError::resolve(format!(
                "Cannot find a dependency named `@{alias}` in this project."
            )));
        };
        match dep {
            ResolvedDependency::Remote { uri, .. } => {
                let module = ModuleUri::parse(uri)?;
                let pkg = PackageUri::parse(&module)?;
                let raw = format!(
                    "projectpackage://{}/{}@{}#/{path}",
                    pkg.host, pkg.name, pkg.version
                );
                ModuleUri::parse(&raw)
            }
            ResolvedDependency::Local { path: local, .. } => {
                let joined = self.dir.join(local).join(path);
                Ok(ModuleUri::from_file_path(&joined))
            }
        }
    }

    /// The declared checksum for a package, if this project pins one.
    #[must_use]
    pub fn declared_checksum(&self, pkg: &PackageUri) -> Option<String> {
        match self.deps.find(pkg)? {
            ResolvedDependency::Remote { checksums, .. } => Some(checksums.sha256.clone()),
            ResolvedDependency::Local { .. } => None,
        }
    }
}

/// Verifies the SHA-256 of a fetched package archive against the
/// declared checksum.
pub fn verify_checksum(bytes: &[u8], declared: &str, dependency: &str) -> EvalResult<()> {
    if declared == SKIP_CHECKSUM_VERIFICATION {
        return Ok(());
    }
    let computed = hex_digest(bytes);
    if computed == declared {
        Ok(())
    } else {
        Err(EvalError::resolve(format!(
            "Computed checksum did not match declared checksum for dependency `{dependency}`.\n\
             Computed checksum: \"{computed}\"\n\
             Declared checksum: \"{declared}\""
        )))
    }
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPS_JSON: &str = r#"{
      "schemaVersion": 1,
      "resolvedDependencies": {
        "package://example.com/birds@0": {
          "type": "remote",
          "uri": "package://example.com/birds@0.5.0",
          "checksums": { "sha256": "abc123" }
        },
        "package://example.com/nest/fruit@1": {
          "type": "local",
          "uri": "package://example.com/nest/fruit@1.1.0",
          "path": "../fruit"
        }
      }
    }"#;

    #[test]
    fn parses_both_dependency_kinds() {
        let deps = ProjectDeps::parse(DEPS_JSON).unwrap();
        assert_eq!(deps.schema_version, 1);
        assert_eq!(deps.resolved_dependencies.len(), 2);
        let uri = ModuleUri::parse("package://example.com/birds@0.5.0#/Bird.pkl").unwrap();
        let pkg = PackageUri::parse(&uri).unwrap();
        match deps.find(&pkg).unwrap() {
            ResolvedDependency::Remote { checksums, .. } => assert_eq!(checksums.sha256, "abc123"),
            ResolvedDependency::Local { .. } => panic!("expected remote"),
        }
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let err = ProjectDeps::parse(r#"{"schemaVersion": 2, "resolvedDependencies": {}}"#).unwrap_err();
        assert!(err.message().contains("schema version"));
    }

    #[test]
    fn alias_lookup_rewrites_remote_imports() {
        let project = Project {
            dir: PathBuf::from("/proj"),
            deps: ProjectDeps::parse(DEPS_JSON).unwrap(),
        };
        let uri = project.rewrite_dependency_import("@birds/catalog/Ostrich.pkl").unwrap();
        assert_eq!(
            uri.as_str(),
            "projectpackage://example.com/birds@0.5.0#/catalog/Ostrich.pkl"
        );
    }

    #[test]
    fn alias_lookup_substitutes_local_paths() {
        let project = Project {
            dir: PathBuf::from("/proj"),
            deps: ProjectDeps::parse(DEPS_JSON).unwrap(),
        };
        let uri = project.rewrite_dependency_import("@fruit/Apple.pkl").unwrap();
        assert_eq!(uri.as_str(), "file:///fruit/Apple.pkl");
    }

    #[test]
    fn checksum_mismatch_reports_both_digests() {
        let err = verify_checksum(b"archive bytes", "deadbeef", "birds").unwrap_err();
        let message = err.message();
        assert!(message.starts_with("Computed checksum did not match declared checksum for dependency `birds`"));
        assert!(message.contains("deadbeef"));
        assert!(message.contains(&hex_digest(b"archive bytes")));
    }

    #[test]
    fn skip_sentinel_disables_verification() {
        verify_checksum(b"anything", SKIP_CHECKSUM_VERIFICATION, "birds").unwrap();
    }
}
