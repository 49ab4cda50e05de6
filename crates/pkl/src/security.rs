use std::path::{Path, PathBuf};

use regex::Regex;

use crate::{
    error::{EvalError, EvalResult},
    uri::ModuleUri,
};

/// Trust level of a module origin. An importer may only import modules
/// of equal or lower trust, so REPL text can import anything while a
/// module fetched over HTTP cannot reach into the local filesystem.
/// The standard library sits at the bottom: importable from everywhere,
/// importing nothing but itself.
fn trust_level(uri: &ModuleUri) -> u8 {
    match uri.scheme() {
        "repl" => 40,
        "file" | "modulepath" => 35,
        "package" | "projectpackage" => 30,
        "pkl" => 10,
        _ => 20,
    }
}

/// Enforces the evaluation security policy: allowlists for module and
/// resource URIs, import trust ordering, and the optional `root_dir`
/// jail for `file:` access.
#[derive(Debug)]
pub struct SecurityManager {
    allowed_modules: Vec<Regex>,
    allowed_resources: Vec<Regex>,
    root_dir: Option<PathBuf>,
}

impl SecurityManager {
    #[must_use]
    pub fn builder() -> SecurityManagerBuilder {
        SecurityManagerBuilder::default()
    }

    /// The standard policy: all schemes this crate ships loaders for.
    pub fn default_policy() -> Self {
        Self::builder()
            .allow_modules(Self::DEFAULT_ALLOWED_MODULES.iter().map(|s| (*s).to_owned()))
            .allow_resources(Self::DEFAULT_ALLOWED_RESOURCES.iter().map(|s| (*s).to_owned()))
            .build()
            .expect("default patterns are valid regexes")
    }

    pub const DEFAULT_ALLOWED_MODULES: &'static [&'static str] = &[
        "^pkl:",
        "^repl:",
        "^file:",
        "^modulepath:",
        "^https:",
        "^package:",
        "^projectpackage:",
    ];

    pub const DEFAULT_ALLOWED_RESOURCES: &'static [&'static str] =
        &["^env:", "^prop:", "^file:", "^https:", "^modulepath:", "^package:", "^projectpackage:"];

    /// Checks a module URI against the module allowlist.
    pub fn check_module(&self, uri: &ModuleUri) -> EvalResult<()> {
        if self.allowed_modules.iter().any(|p| p.is_match(uri.as_str())) {
            Ok(())
        } else {
            Err(EvalError::resolve(format!(
                "Refusing to load module `{uri}` because it does not match any entry in the module allowlist."
            )))
        }
    }

    /// Checks a resource URI against the resource allowlist.
    pub fn check_resource(&self, uri: &ModuleUri) -> EvalResult<()> {
        if self.allowed_resources.iter().any(|p| p.is_match(uri.as_str())) {
            Ok(())
        } else {
            Err(EvalError::resolve(format!(
                "Refusing to read resource `{uri}` because it does not match any entry in the resource allowlist."
            )))
        }
    }

    /// Checks the import trust ordering between two modules.
    pub fn check_import(&self, importer: &ModuleUri, imported: &ModuleUri) -> EvalResult<()> {
        if trust_level(importer) >= trust_level(imported) {
            Ok(())
        } else {
            Err(EvalError::resolve(format!(
                "Refusing to load module `{imported}`: modules loaded from `{}:` cannot import modules loaded from `{}:`.",
                importer.scheme(),
                imported.scheme()
            )))
        }
    }

    /// Canonicalizes `path` (expanding symlinks) and enforces the
    /// `root_dir` jail when one is configured.
    pub fn check_file_path(&self, uri: &ModuleUri, path: &Path) -> EvalResult<PathBuf> {
        let real = path
            .canonicalize()
            .map_err(|e| EvalError::io(format!("Cannot find module `{uri}`: {e}")))?;
        if let Some(root) = &self.root_dir {
            let real_root = root
                .canonicalize()
                .map_err(|e| EvalError::io(format!("Cannot resolve root directory `{}`: {e}", root.display())))?;
            if !real.starts_with(&real_root) {
                return Err(EvalError::resolve(format!(
                    "Refusing to load module `{uri}` because it lies outside the configured root directory."
                )));
            }
        }
        Ok(real)
    }

    #[must_use]
    pub fn root_dir(&self) -> Option<&Path> {
        self.root_dir.as_deref()
    }
}

/// Assembles a [`SecurityManager`].
///
/// Patterns are regexes matched against the full URI text; anchor them
/// at the scheme (`^file:`) to express scheme allowlists.
#[derive(Debug, Default)]
pub struct SecurityManagerBuilder {
    allowed_modules: Vec<String>,
    allowed_resources: Vec<String>,
    root_dir: Option<PathBuf>,
}

impl SecurityManagerBuilder {
    #[must_use]
    pub fn allow_module(mut self, pattern: impl Into<String>) -> Self {
        self.allowed_modules.push(pattern.into());
        self
    }

    #[must_use]
    pub fn allow_modules(mut self, patterns: impl IntoIterator<Item = String>) -> Self {
        self.allowed_modules.extend(patterns);
        self
    }

    #[must_use]
    pub fn allow_resource(mut self, pattern: impl Into<String>) -> Self {
        self.allowed_resources.push(pattern.into());
        self
    }

    #[must_use]
    pub fn allow_resources(mut self, patterns: impl IntoIterator<Item = String>) -> Self {
        self.allowed_resources.extend(patterns);
        self
    }

    #[must_use]
    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> EvalResult<SecurityManager> {
        let compile = |patterns: Vec<String>| -> EvalResult<Vec<Regex>> {
            patterns
                .into_iter()
                .map(|p| {
                    Regex::new(&p)
                        .map_err(|e| EvalError::resolve(format!("Invalid allowlist pattern `{p}`: {e}")))
                })
                .collect()
        };
        Ok(SecurityManager {
            allowed_modules: compile(self.allowed_modules)?,
            allowed_resources: compile(self.allowed_resources)?,
            root_dir: self.root_dir,
        })
    }
}
