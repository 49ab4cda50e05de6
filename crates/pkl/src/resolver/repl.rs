use std::{cell::RefCell, collections::HashMap, rc::Rc};

use crate::{
    error::{EvalError, EvalResult},
    resolver::{ModuleKey, ModuleKeyFactory, ResolveContext, ResolvedModule},
    uri::ModuleUri,
};

/// In-memory registry of text fragments evaluated through the
/// string-eval API; each fragment is assigned a `repl:<name>` URI.
#[derive(Debug, Default)]
pub struct ReplSources {
    sources: RefCell<HashMap<String, String>>,
}

impl ReplSources {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Registers `source` under `repl:<name>` and returns the URI.
    pub fn register(&self, name: &str, source: impl Into<String>) -> ModuleUri {
        self.sources.borrow_mut().insert(name.to_owned(), source.into());
        ModuleUri::parse(&format!("repl:{name}")).expect("repl URIs are absolute")
    }

    fn get(&self, name: &str) -> Option<String> {
        self.sources.borrow().get(name).cloned()
    }
}

/// Serves `repl:` URIs from the in-memory fragment registry.
#[derive(Debug)]
pub struct ReplModuleKeyFactory {
    sources: Rc<ReplSources>,
}

impl ReplModuleKeyFactory {
    #[must_use]
    pub fn new(sources: Rc<ReplSources>) -> Self {
        Self { sources }
    }
}

impl ModuleKeyFactory for ReplModuleKeyFactory {
    fn create(&self, uri: &ModuleUri) -> Option<Box<dyn ModuleKey>> {
        (uri.scheme() == "repl").then(|| {
            Box::new(ReplModuleKey {
                uri: uri.clone(),
                sources: Rc::clone(&self.sources),
            }) as Box<dyn ModuleKey>
        })
    }
}

#[derive(Debug)]
struct ReplModuleKey {
    uri: ModuleUri,
    sources: Rc<ReplSources>,
}

impl ModuleKey for ReplModuleKey {
    fn uri(&self) -> &ModuleUri {
        &self.uri
    }

    fn resolve(&self, ctx: &ResolveContext<'_>) -> EvalResult<Box<dyn ResolvedModule>> {
        ctx.security.check_module(&self.uri)?;
        let name = self.uri.scheme_specific();
        let source = self
            .sources
            .get(name)
            .ok_or_else(|| EvalError::resolve(format!("Cannot find module `{}`.", self.uri)))?;
        Ok(Box::new(ResolvedReplModule {
            uri: self.uri.clone(),
            source,
        }))
    }
}

#[derive(Debug)]
struct ResolvedReplModule {
    uri: ModuleUri,
    source: String,
}

impl ResolvedModule for ResolvedReplModule {
    fn uri(&self) -> &ModuleUri {
        &self.uri
    }

    fn load_source(&self, _ctx: &ResolveContext<'_>) -> EvalResult<String> {
        Ok(self.source.clone())
    }
}
