use std::path::PathBuf;

use crate::{
    error::{EvalError, EvalResult},
    resolver::{ModuleKey, ModuleKeyFactory, PathElement, ResolveContext, ResolvedModule},
    uri::ModuleUri,
};

/// Resolves `modulepath:/…` URIs against an ordered list of search
/// roots, classpath-style: the first root containing the path wins.
#[derive(Debug)]
pub struct ModulePathFactory {
    roots: Vec<PathBuf>,
}

impl ModulePathFactory {
    #[must_use]
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

impl ModuleKeyFactory for ModulePathFactory {
    fn create(&self, uri: &ModuleUri) -> Option<Box<dyn ModuleKey>> {
        (uri.scheme() == "modulepath").then(|| {
            Box::new(ModulePathKey {
                uri: uri.clone(),
                roots: self.roots.clone(),
            }) as Box<dyn ModuleKey>
        })
    }
}

#[derive(Debug)]
struct ModulePathKey {
    uri: ModuleUri,
    roots: Vec<PathBuf>,
}

impl ModulePathKey {
    fn relative_path(uri: &ModuleUri) -> EvalResult<&str> {
        let rest = uri.scheme_specific();
        rest.strip_prefix('/').ok_or_else(|| {
            EvalError::resolve(format!(
                "Module path URI `{uri}` must start with `modulepath:/`."
            ))
        })
    }

    fn locate(&self, uri: &ModuleUri) -> EvalResult<Option<PathBuf>> {
        let rest = Self::relative_path(uri)?;
        Ok(self.roots.iter().map(|root| root.join(rest)).find(|p| p.exists()))
    }
}

impl ModuleKey for ModulePathKey {
    fn uri(&self) -> &ModuleUri {
        &self.uri
    }

    fn resolve(&self, ctx: &ResolveContext<'_>) -> EvalResult<Box<dyn ResolvedModule>> {
        ctx.security.check_module(&self.uri)?;
        let path = self.locate(&self.uri)?.ok_or_else(|| {
            EvalError::io(format!("Cannot find module `{}` in the module path.", self.uri))
        })?;
        let real = ctx.security.check_file_path(&self.uri, &path)?;
        Ok(Box::new(ResolvedModulePathModule {
            uri: self.uri.clone(),
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
        Ok(self.locate(uri)?.is_some())
    }

    fn list_elements(&self, ctx: &ResolveContext<'_>, base: &ModuleUri) -> EvalResult<Vec<PathElement>> {
        ctx.limits.check_deadline()?;
        ctx.security.check_module(base)?;
        let rest = Self::relative_path(base)?;
        // Merge across roots; the first root claiming a name wins.
        let mut out: Vec<PathElement> = Vec::new();
        for root in &self.roots {
            let dir = root.join(rest);
            if !dir.is_dir() {
                continue;
            }
            for element in super::file::list_directory(&dir)? {
                if !out.iter().any(|e| e.name == element.name) {
                    out.push(element);
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

#[derive(Debug)]
struct ResolvedModulePathModule {
    uri: ModuleUri,
    path: PathBuf,
}

impl ResolvedModule for ResolvedModulePathModule {
    fn uri(&self) -> &ModuleUri {
        &self.uri
    }

    fn load_source(&self, ctx: &ResolveContext<'_>) -> EvalResult<String> {
        ctx.limits.check_deadline()?;
        std::fs::read_to_string(&self.path)
            .map_err(|e| EvalError::io(format!("Cannot read module `{}`: {e}.", self.uri)))
    }
}
