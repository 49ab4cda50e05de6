use crate::{
    error::{EvalError, EvalResult},
    resolver::{ModuleKey, ModuleKeyFactory, ResolveContext, ResolvedModule},
    stdlib,
    uri::ModuleUri,
};

/// Resolves `pkl:` URIs to the built-in standard-library modules.
///
/// Standard-library modules are implemented natively (they are never
/// parsed); this factory exists so that `pkl:` URIs participate in the
/// ordinary resolution pipeline — policy checks, cache keying, and the
/// import-graph analyzer all see them as regular leaves.
#[derive(Debug, Default)]
pub struct StdlibModuleKeyFactory;

impl ModuleKeyFactory for StdlibModuleKeyFactory {
    fn create(&self, uri: &ModuleUri) -> Option<Box<dyn ModuleKey>> {
        (uri.scheme() == "pkl").then(|| Box::new(StdlibModuleKey { uri: uri.clone() }) as Box<dyn ModuleKey>)
    }
}

#[derive(Debug)]
struct StdlibModuleKey {
    uri: ModuleUri,
}

impl ModuleKey for StdlibModuleKey {
    fn uri(&self) -> &ModuleUri {
        &self.uri
    }

    fn resolve(&self, ctx: &ResolveContext<'_>) -> EvalResult<Box<dyn ResolvedModule>> {
        ctx.security.check_module(&self.uri)?;
        let name = self.uri.scheme_specific();
        if !stdlib::is_stdlib_module(name) {
            return Err(EvalError::resolve(format!(
                "Cannot find standard library module `{}`.",
                self.uri
            )));
        }
        Ok(Box::new(ResolvedStdlibModule { uri: self.uri.clone() }))
    }
}

#[derive(Debug)]
struct ResolvedStdlibModule {
    uri: ModuleUri,
}

impl ResolvedModule for ResolvedStdlibModule {
    fn uri(&self) -> &ModuleUri {
        &self.uri
    }

    fn load_source(&self, _ctx: &ResolveContext<'_>) -> EvalResult<String> {
        // Native modules carry no source; the evaluator builds them
        // without parsing.
        Ok(String::new())
    }
}
