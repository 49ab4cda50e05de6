//! Resource readers backing `read`, `read?`, and `read*`.

use std::{cell::RefCell, collections::HashMap, fmt, fs, rc::Rc};

use crate::{
    error::{EvalError, EvalResult},
    external_reader::{ExternalReaderProcess, ResourceReaderSpec},
    resolver::PathElement,
    uri::ModuleUri,
};

/// The raw contents of a successfully read resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub uri: String,
    pub bytes: Vec<u8>,
}

/// A scheme handler for resource reads.
///
/// `read` distinguishes "not found" (`Ok(None)`, which `read?` converts
/// to `null`) from read failures (`Err`), which always surface.
pub trait ResourceReader: fmt::Debug {
    fn scheme(&self) -> &str;

    fn read(&self, uri: &ModuleUri) -> EvalResult<Option<Resource>>;

    /// Whether `read*` can enumerate this scheme.
    fn is_globbable(&self) -> bool {
        false
    }

    fn list_elements(&self, base: &ModuleUri) -> EvalResult<Vec<PathElement>> {
        let _ = base;
        Err(EvalError::resolve(format!(
            "Cannot expand glob pattern: resource scheme `{}:` is not globbable.",
            self.scheme()
        )))
    }
}

/// Reads `file:` resources.
#[derive(Debug, Default)]
pub struct FileResourceReader;

impl ResourceReader for FileResourceReader {
    fn scheme(&self) -> &str {
        "file"
    }

    fn read(&self, uri: &ModuleUri) -> EvalResult<Option<Resource>> {
        let Some(path) = uri.file_path() else {
            return Err(EvalError::resolve(format!("`{uri}` is not a file URI.")));
        };
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| EvalError::io(format!("Cannot read resource `{uri}`: {e}.")))?;
        Ok(Some(Resource {
            uri: uri.as_str().to_owned(),
            bytes,
        }))
    }

    fn is_globbable(&self) -> bool {
        true
    }

    fn list_elements(&self, base: &ModuleUri) -> EvalResult<Vec<PathElement>> {
        let Some(dir) = base.file_path() else {
            return Err(EvalError::resolve(format!("`{base}` is not a file URI.")));
        };
        crate::resolver::list_directory_elements(&dir)
    }
}

/// Reads `env:NAME` resources from the configured environment map.
#[derive(Debug, Default)]
pub struct EnvResourceReader {
    vars: HashMap<String, String>,
}

impl EnvResourceReader {
    #[must_use]
    pub fn new(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }
}

impl ResourceReader for EnvResourceReader {
    fn scheme(&self) -> &str {
        "env"
    }

    fn read(&self, uri: &ModuleUri) -> EvalResult<Option<Resource>> {
        Ok(self.vars.get(uri.scheme_specific()).map(|value| Resource {
            uri: uri.as_str().to_owned(),
            bytes: value.clone().into_bytes(),
        }))
    }
}

/// Reads `prop:NAME` resources from the configured external properties.
#[derive(Debug, Default)]
pub struct PropResourceReader {
    props: HashMap<String, String>,
}

impl PropResourceReader {
    #[must_use]
    pub fn new(props: HashMap<String, String>) -> Self {
        Self { props }
    }
}

impl ResourceReader for PropResourceReader {
    fn scheme(&self) -> &str {
        "prop"
    }

    fn read(&self, uri: &ModuleUri) -> EvalResult<Option<Resource>> {
        Ok(self.props.get(uri.scheme_specific()).map(|value| Resource {
            uri: uri.as_str().to_owned(),
            bytes: value.clone().into_bytes(),
        }))
    }
}

/// A resource reader served by an external reader child process.
#[derive(Debug)]
pub struct ExternalResourceReader {
    process: Rc<RefCell<ExternalReaderProcess>>,
    spec: ResourceReaderSpec,
}

impl ExternalResourceReader {
    /// Initializes the reader for `scheme`; `None` when the child does
    /// not read that scheme.
    pub fn initialize(process: Rc<RefCell<ExternalReaderProcess>>, scheme: &str) -> EvalResult<Option<Self>> {
        let spec = process.borrow_mut().transport().initialize_resource_reader(scheme)?;
        Ok(spec.map(|spec| Self { process, spec }))
    }
}

impl ResourceReader for ExternalResourceReader {
    fn scheme(&self) -> &str {
        &self.spec.scheme
    }

    fn read(&self, uri: &ModuleUri) -> EvalResult<Option<Resource>> {
        match self.process.borrow_mut().transport().read_resource(uri) {
            Ok(bytes) => Ok(Some(Resource {
                uri: uri.as_str().to_owned(),
                bytes,
            })),
            Err(e) if e.message().contains("Cannot read resource") => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn is_globbable(&self) -> bool {
        self.spec.is_globbable
    }

    fn list_elements(&self, base: &ModuleUri) -> EvalResult<Vec<PathElement>> {
        self.process.borrow_mut().transport().list_resources(base)
    }
}
