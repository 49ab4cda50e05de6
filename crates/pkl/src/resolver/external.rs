use std::{cell::RefCell, rc::Rc};

use crate::{
    error::{EvalError, EvalResult},
    external_reader::{ExternalReaderProcess, ModuleReaderSpec},
    resolver::{ModuleKey, ModuleKeyFactory, PathElement, ResolveContext, ResolvedModule},
    uri::ModuleUri,
};

/// Serves the scheme an external reader child process advertised in its
/// `InitializeModuleReaderResponse`.
#[derive(Debug)]
pub struct ExternalModuleKeyFactory {
    process: Rc<RefCell<ExternalReaderProcess>>,
    spec: ModuleReaderSpec,
}

impl ExternalModuleKeyFactory {
    /// Initializes the reader for `scheme`; returns `None` when the
    /// child does not read that scheme.
    pub fn initialize(
        process: Rc<RefCell<ExternalReaderProcess>>,
        scheme: &str,
    ) -> EvalResult<Option<Self>> {
        let spec = process.borrow_mut().transport().initialize_module_reader(scheme)?;
        Ok(spec.map(|spec| Self { process, spec }))
    }

    #[must_use]
    pub fn spec(&self) -> &ModuleReaderSpec {
        &self.spec
    }
}

impl ModuleKeyFactory for ExternalModuleKeyFactory {
    fn create(&self, uri: &ModuleUri) -> Option<Box<dyn ModuleKey>> {
        (uri.scheme() == self.spec.scheme).then(|| {
            Box::new(ExternalModuleKey {
                uri: uri.clone(),
                process: Rc::clone(&self.process),
                spec: self.spec.clone(),
            }) as Box<dyn ModuleKey>
        })
    }
}

#[derive(Debug)]
struct ExternalModuleKey {
    uri: ModuleUri,
    process: Rc<RefCell<ExternalReaderProcess>>,
    spec: ModuleReaderSpec,
}

impl ModuleKey for ExternalModuleKey {
    fn uri(&self) -> &ModuleUri {
        &self.uri
    }

    fn resolve(&self, ctx: &ResolveContext<'_>) -> EvalResult<Box<dyn ResolvedModule>> {
        ctx.security.check_module(&self.uri)?;
        Ok(Box::new(ResolvedExternalModule {
            uri: self.uri.clone(),
            process: Rc::clone(&self.process),
        }))
    }

    fn is_globbable(&self) -> bool {
        self.spec.is_globbable
    }

    fn is_local(&self) -> bool {
        self.spec.is_local
    }

    fn has_element(&self, ctx: &ResolveContext<'_>, uri: &ModuleUri) -> EvalResult<bool> {
        if !self.spec.is_globbable {
            return Ok(false);
        }
        ctx.limits.check_deadline()?;
        let parent = uri.resolve_import(".")?;
        let elements = self.process.borrow_mut().transport().list_modules(&parent)?;
        Ok(uri
            .last_segment()
            .is_some_and(|name| elements.iter().any(|e| e.name == name)))
    }

    fn list_elements(&self, ctx: &ResolveContext<'_>, base: &ModuleUri) -> EvalResult<Vec<PathElement>> {
        if !self.spec.is_globbable {
            return Err(EvalError::resolve(format!(
                "Cannot expand glob pattern: scheme `{}:` is not globbable.",
                self.spec.scheme
            )));
        }
        ctx.limits.check_deadline()?;
        self.process.borrow_mut().transport().list_modules(base)
    }
}

#[derive(Debug)]
struct ResolvedExternalModule {
    uri: ModuleUri,
    process: Rc<RefCell<ExternalReaderProcess>>,
}

impl ResolvedModule for ResolvedExternalModule {
    fn uri(&self) -> &ModuleUri {
        &self.uri
    }

    fn load_source(&self, ctx: &ResolveContext<'_>) -> EvalResult<String> {
        ctx.limits.check_deadline()?;
        self.process.borrow_mut().transport().read_module(&self.uri)
    }
}
