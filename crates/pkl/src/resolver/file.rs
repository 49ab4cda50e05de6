use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::{EvalError, EvalResult},
    resolver::{ModuleKey, ModuleKeyFactory, PathElement, ResolveContext, ResolvedModule},
    uri::ModuleUri,
};

/// Loads `file:` modules from the local filesystem.
#[derive(Debug, Default)]
pub struct FileModuleKeyFactory;

impl ModuleKeyFactory for FileModuleKeyFactory {
    fn create(&self, uri: &ModuleUri) -> Option<Box<dyn ModuleKey>> {
        (uri.scheme() == "file").then(|| Box::new(FileModuleKey { uri: uri.clone() }) as Box<dyn ModuleKey>)
    }
}

#[derive(Debug)]
struct FileModuleKey {
    uri: ModuleUri,
}

impl ModuleKey for FileModuleKey {
    fn uri(&self) -> &ModuleUri {
        &self.uri
    }

    fn resolve(&self, ctx: &ResolveContext<'_>) -> EvalResult<Box<dyn ResolvedModule>> {
        ctx.security.check_module(&self.uri)?;
        let path = self
            .uri
            .file_path()
            .ok_or_else(|| EvalError::resolve(format!("`{}` is not a file URI.", self.uri)))?;
        let real = ctx.security.check_file_path(&self.uri, &path)?;
        Ok(Box::new(ResolvedFileModule {
            uri: ModuleUri::from_file_path(&real),
            path: real,
        }))
    }

    fn is_globbable(&self) -> bool {
        true
    }

    fn is_local(&self) -> bool {
        true
    }

    fn has_element(&self, ctx: &ResolveContext<'_>, uri: &ModuleUri) -> EvalResult<bool> {
        ctx.security.check_module(uri)?;
        Ok(uri.file_path().is_some_and(|p| p.exists()))
    }

    fn list_elements(&self, ctx: &ResolveContext<'_>, base: &ModuleUri) -> EvalResult<Vec<PathElement>> {
        ctx.limits.check_deadline()?;
        ctx.security.check_module(base)?;
        let dir = base
            .file_path()
            .ok_or_else(|| EvalError::resolve(format!("`{base}` is not a file URI.")))?;
        list_directory(&dir)
    }
}

pub(crate) fn list_directory(dir: &Path) -> EvalResult<Vec<PathElement>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| EvalError::io(format!("Cannot list directory `{}`: {e}.", dir.display())))?;
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| EvalError::io(format!("Cannot list directory `{}`: {e}.", dir.display())))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_directory = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        out.push(PathElement { name, is_directory });
    }
    out.sort();
    Ok(out)
}

#[derive(Debug)]
struct ResolvedFileModule {
    uri: ModuleUri,
    path: PathBuf,
}

impl ResolvedModule for ResolvedFileModule {
    fn uri(&self) -> &ModuleUri {
        &self.uri
    }

    fn load_source(&self, ctx: &ResolveContext<'_>) -> EvalResult<String> {
        ctx.limits.check_deadline()?;
        fs::read_to_string(&self.path)
            .map_err(|e| EvalError::io(format!("Cannot read module `{}`: {e}.", self.uri)))
    }
}
