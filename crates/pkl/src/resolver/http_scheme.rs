use std::rc::Rc;

use crate::{
    error::EvalResult,
    http::HttpClient,
    resolver::{ModuleKey, ModuleKeyFactory, ResolveContext, ResolvedModule},
    uri::ModuleUri,
};

/// Loads `https:` / `http:` modules through the configured HTTP client.
///
/// Not globbable: a web server exposes no directory listing contract.
#[derive(Debug)]
pub struct HttpModuleKeyFactory {
    client: Rc<HttpClient>,
}

impl HttpModuleKeyFactory {
    #[must_use]
    pub fn new(client: Rc<HttpClient>) -> Self {
        Self { client }
    }
}

impl ModuleKeyFactory for HttpModuleKeyFactory {
    fn create(&self, uri: &ModuleUri) -> Option<Box<dyn ModuleKey>> {
        matches!(uri.scheme(), "https" | "http").then(|| {
            Box::new(HttpModuleKey {
                uri: uri.clone(),
                client: Rc::clone(&self.client),
            }) as Box<dyn ModuleKey>
        })
    }
}

#[derive(Debug)]
struct HttpModuleKey {
    uri: ModuleUri,
    client: Rc<HttpClient>,
}

impl ModuleKey for HttpModuleKey {
    fn uri(&self) -> &ModuleUri {
        &self.uri
    }

    fn resolve(&self, ctx: &ResolveContext<'_>) -> EvalResult<Box<dyn ResolvedModule>> {
        ctx.security.check_module(&self.uri)?;
        Ok(Box::new(ResolvedHttpModule {
            uri: self.uri.clone(),
            client: Rc::clone(&self.client),
        }))
    }
}

#[derive(Debug)]
struct ResolvedHttpModule {
    uri: ModuleUri,
    client: Rc<HttpClient>,
}

impl ResolvedModule for ResolvedHttpModule {
    fn uri(&self) -> &ModuleUri {
        &self.uri
    }

    fn load_source(&self, ctx: &ResolveContext<'_>) -> EvalResult<String> {
        ctx.limits.check_deadline()?;
        self.client.get_string(self.uri.as_str(), ctx.limits.deadline())
    }
}
