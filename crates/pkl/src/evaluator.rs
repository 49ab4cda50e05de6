//! The public evaluator API.
//!
//! An [`EvaluatorBuilder`] gathers the security policy, parser, scheme
//! loaders, resource readers, timeout, and project configuration; the
//! resulting [`Evaluator`] evaluates modules, renders outputs, runs
//! test modules, and analyzes import graphs. Closing an evaluator
//! invalidates every subsequent call (and every still-unread file
//! output) with a "closed" error.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    path::PathBuf,
    rc::Rc,
    sync::Arc,
    time::Duration,
};

use crate::{
    analyzer::{ImportAnalyzer, ImportGraph},
    cache::ModuleCache,
    error::{EvalError, EvalResult},
    eval::Machine,
    external_reader::ExternalReaderProcess,
    harness::{self, TestResults},
    http::HttpClient,
    io::{StderrTrace, TraceWriter},
    object::ObjectKind,
    parser::{ModuleParser, NoParser},
    project::Project,
    render,
    resolver::{
        ExternalModuleKeyFactory, FileModuleKeyFactory, HttpModuleKeyFactory, ModuleKeyFactory, ModulePathFactory,
        ModuleResolver, PackageModuleKeyFactory, PackageStore, ReplModuleKeyFactory, ReplSources,
        StdlibModuleKeyFactory,
    },
    resource::EvalLimits,
    resources::{
        EnvResourceReader, ExternalResourceReader, FileResourceReader, PropResourceReader, ResourceReader,
    },
    security::SecurityManager,
    uri::ModuleUri,
    value::{Exported, Value},
};

/// Builds an [`Evaluator`].
#[derive(Default)]
pub struct EvaluatorBuilder {
    security: Option<SecurityManager>,
    parser: Option<Rc<dyn ModuleParser>>,
    timeout: Option<Duration>,
    module_path: Vec<PathBuf>,
    external_properties: HashMap<String, String>,
    environment_variables: HashMap<String, String>,
    module_cache_dir: Option<PathBuf>,
    project_dir: Option<PathBuf>,
    trace: Option<Box<dyn TraceWriter>>,
    module_cache: Option<Arc<ModuleCache>>,
    factories: Vec<Rc<dyn ModuleKeyFactory>>,
    readers: Vec<Rc<dyn ResourceReader>>,
    external_reader: Option<(String, Vec<String>, Vec<String>)>,
}

impl EvaluatorBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the default security policy.
    #[must_use]
    pub fn with_security(mut self, security: SecurityManager) -> Self {
        self.security = Some(security);
        self
    }

    /// Sets the external parser producing the CST.
    #[must_use]
    pub fn with_parser(mut self, parser: Rc<dyn ModuleParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Sets the evaluation deadline shared by the evaluator's lifetime.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds `modulepath:` search roots, in priority order.
    #[must_use]
    pub fn with_module_path(mut self, roots: Vec<PathBuf>) -> Self {
        self.module_path = roots;
        self
    }

    /// Sets the external properties served by `prop:` reads.
    #[must_use]
    pub fn with_external_properties(mut self, properties: HashMap<String, String>) -> Self {
        self.external_properties = properties;
        self
    }

    /// Sets the environment variables served by `env:` reads.
    #[must_use]
    pub fn with_environment_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.environment_variables = variables;
        self
    }

    /// Sets the directory caching downloaded package archives.
    #[must_use]
    pub fn with_module_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.module_cache_dir = Some(dir.into());
        self
    }

    /// Associates a project directory (holding `PklProject.deps.json`).
    #[must_use]
    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// Replaces the trace sink (stderr by default).
    #[must_use]
    pub fn with_trace_writer(mut self, trace: Box<dyn TraceWriter>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Shares a module cache across evaluators of one builder.
    #[must_use]
    pub fn with_module_cache(mut self, cache: Arc<ModuleCache>) -> Self {
        self.module_cache = Some(cache);
        self
    }

    /// Registers a custom scheme factory.
    #[must_use]
    pub fn with_module_key_factory(mut self, factory: Rc<dyn ModuleKeyFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// Registers a custom resource reader.
    #[must_use]
    pub fn with_resource_reader(mut self, reader: Rc<dyn ResourceReader>) -> Self {
        self.readers.push(reader);
        self
    }

    /// Spawns `command args…` as an external reader serving `schemes`.
    #[must_use]
    pub fn with_external_reader(mut self, command: impl Into<String>, args: Vec<String>, schemes: Vec<String>) -> Self {
        self.external_reader = Some((command.into(), args, schemes));
        self
    }

    pub fn build(self) -> EvalResult<Evaluator> {
        let security = Rc::new(match self.security {
            Some(security) => security,
            None => SecurityManager::default_policy(),
        });
        let parser: Rc<dyn ModuleParser> = self.parser.unwrap_or_else(|| Rc::new(NoParser));
        let limits = EvalLimits::with_timeout(self.timeout);
        let http = Rc::new(HttpClient::new());
        let repl_sources = ReplSources::new();

        let project = match &self.project_dir {
            Some(dir) => Some(Rc::new(Project::load(dir)?)),
            None => None,
        };
        let cache_dir = self.module_cache_dir.or_else(default_cache_dir);
        let store = PackageStore::new(Rc::clone(&http), cache_dir);

        let mut factories: Vec<Rc<dyn ModuleKeyFactory>> = vec![
            Rc::new(FileModuleKeyFactory),
            Rc::new(StdlibModuleKeyFactory),
            Rc::new(ModulePathFactory::new(self.module_path)),
            Rc::new(HttpModuleKeyFactory::new(Rc::clone(&http))),
            Rc::new(PackageModuleKeyFactory::new(Rc::clone(&store), project.clone())),
            Rc::new(ReplModuleKeyFactory::new(Rc::clone(&repl_sources))),
        ];
        factories.extend(self.factories);

        let mut readers: Vec<Rc<dyn ResourceReader>> = vec![
            Rc::new(FileResourceReader),
            Rc::new(EnvResourceReader::new(self.environment_variables)),
            Rc::new(PropResourceReader::new(self.external_properties)),
        ];
        readers.extend(self.readers);

        let mut external = None;
        if let Some((command, args, schemes)) = self.external_reader {
            let process = Rc::new(RefCell::new(ExternalReaderProcess::spawn(&command, &args)?));
            for scheme in &schemes {
                if let Some(factory) = ExternalModuleKeyFactory::initialize(Rc::clone(&process), scheme)? {
                    factories.push(Rc::new(factory));
                }
                if let Some(reader) = ExternalResourceReader::initialize(Rc::clone(&process), scheme)? {
                    readers.push(Rc::new(reader));
                }
            }
            external = Some(process);
        }

        let resolver = ModuleResolver::new(factories, project);
        let cache = self.module_cache.unwrap_or_else(ModuleCache::new);
        let trace = self.trace.unwrap_or_else(|| Box::new(StderrTrace));
        let machine = Machine::new(limits, security, resolver, cache, parser, trace, readers);
        Ok(Evaluator {
            machine,
            repl_sources,
            closed: Rc::new(Cell::new(false)),
            repl_counter: 0,
            external,
        })
    }
}

fn default_cache_dir() -> Option<PathBuf> {
    let base = if let Ok(cache) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(cache)
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache")
    } else {
        return None;
    };
    Some(base.join("pkl").join("packages"))
}

/// One entry of `output.files`.
///
/// The text is materialized at evaluation time, but reading it is
/// gated on the owning evaluator still being open.
#[derive(Debug, Clone)]
pub struct FileOutput {
    name: String,
    text: String,
    closed: Rc<Cell<bool>>,
}

impl FileOutput {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> EvalResult<String> {
        if self.closed.get() {
            return Err(EvalError::closed());
        }
        Ok(self.text.clone())
    }
}

/// A single-threaded evaluator.
///
/// Evaluators may be instantiated concurrently (sharing a module cache
/// through their builder) but do not share mutable state.
pub struct Evaluator {
    machine: Machine,
    repl_sources: Rc<ReplSources>,
    closed: Rc<Cell<bool>>,
    repl_counter: u32,
    external: Option<Rc<RefCell<ExternalReaderProcess>>>,
}

impl Evaluator {
    #[must_use]
    pub fn builder() -> EvaluatorBuilder {
        EvaluatorBuilder::new()
    }

    fn ensure_open(&self) -> EvalResult<()> {
        if self.closed.get() {
            Err(EvalError::closed())
        } else {
            Ok(())
        }
    }

    /// Evaluates a module and exports its value.
    pub fn evaluate(&mut self, uri: &str) -> EvalResult<Exported> {
        self.ensure_open()?;
        let uri = ModuleUri::parse(uri)?;
        let (_, exported) = self.machine.evaluate_module(&uri)?;
        Ok(exported)
    }

    /// Evaluates a text fragment under a fresh `repl:` URI.
    pub fn evaluate_text(&mut self, source: &str) -> EvalResult<Exported> {
        self.ensure_open()?;
        self.repl_counter += 1;
        let name = if self.repl_counter == 1 {
            "text".to_owned()
        } else {
            format!("text{}", self.repl_counter)
        };
        let uri = self.repl_sources.register(&name, source);
        let (_, exported) = self.machine.evaluate_module(&uri)?;
        Ok(exported)
    }

    /// Evaluates a module's `output.text` (falling back to the default
    /// PCF rendering of the module).
    pub fn evaluate_output_text(&mut self, uri: &str) -> EvalResult<String> {
        self.ensure_open()?;
        let uri = ModuleUri::parse(uri)?;
        let module = self.machine.load_module(&uri, None)?;
        if let Some(output) = module.visible_property("output") {
            let output_value = self.machine.force_member(&module, &output, "output")?;
            if let Value::Object(output_obj) = &output_value {
                if let Some(text) = output_obj.visible_property("text") {
                    let text_value = self.machine.force_member(output_obj, &text, "text")?;
                    return text_value.as_str().map(str::to_owned).ok_or_else(|| {
                        EvalError::type_error(format!(
                            "Expected `output.text` to be a `String`, but got a value of type `{}`.",
                            text_value.type_name()
                        ))
                    });
                }
            }
        }
        let exported = self.machine.export_value(&Value::Object(module))?;
        Ok(render::render_document(&exported))
    }

    /// Evaluates a module's `output.files` into file-output handles.
    pub fn evaluate_output_files(&mut self, uri: &str) -> EvalResult<Vec<FileOutput>> {
        self.ensure_open()?;
        let uri = ModuleUri::parse(uri)?;
        let module = self.machine.load_module(&uri, None)?;
        let Some(output) = module.visible_property("output") else {
            return Ok(Vec::new());
        };
        let output_value = self.machine.force_member(&module, &output, "output")?;
        let Value::Object(output_obj) = &output_value else {
            return Ok(Vec::new());
        };
        let Some(files) = output_obj.visible_property("files") else {
            return Ok(Vec::new());
        };
        let files_value = self.machine.force_member(output_obj, &files, "files")?;
        let Value::Object(files_obj) = &files_value else {
            return Err(EvalError::type_error(format!(
                "Expected `output.files` to be a `Mapping`, but got a value of type `{}`.",
                files_value.type_name()
            )));
        };
        if files_obj.kind != ObjectKind::Mapping && files_obj.kind != ObjectKind::Dynamic {
            return Err(EvalError::type_error(format!(
                "Expected `output.files` to be a `Mapping`, but got an object of type `{}`.",
                files_obj.class.name
            )));
        }
        let entries = files_obj.entries.borrow().clone();
        let mut outputs = Vec::with_capacity(entries.len());
        for (key, member) in &entries {
            let Some(name) = key.as_str().map(str::to_owned) else {
                return Err(EvalError::type_error(
                    "Expected `output.files` keys to be file names (`String`).",
                ));
            };
            let entry_value = self.machine.force_member(files_obj, member, &name)?;
            let text = match &entry_value {
                Value::Str(s) => s.to_string(),
                Value::Object(entry_obj) => {
                    let text = entry_obj.visible_property("text").ok_or_else(|| {
                        EvalError::type_error(format!("Output file `{name}` does not define `text`."))
                    })?;
                    let text_value = self.machine.force_member(entry_obj, &text, "text")?;
                    text_value.as_str().map(str::to_owned).ok_or_else(|| {
                        EvalError::type_error(format!(
                            "Expected `text` of output file `{name}` to be a `String`, but got a value of type `{}`.",
                            text_value.type_name()
                        ))
                    })?
                }
                other => {
                    return Err(EvalError::type_error(format!(
                        "Output file `{name}` must be an object with a `text` property, but got a value of type `{}`.",
                        other.type_name()
                    )));
                }
            };
            outputs.push(FileOutput {
                name,
                text,
                closed: Rc::clone(&self.closed),
            });
        }
        Ok(outputs)
    }

    /// Runs a test module (one amending `pkl:test`).
    pub fn evaluate_test(&mut self, uri: &str, overwrite: bool) -> EvalResult<TestResults> {
        self.ensure_open()?;
        let uri = ModuleUri::parse(uri)?;
        harness::run_test_module(&mut self.machine, &uri, overwrite)
    }

    /// Analyzes the transitive import graph of the given roots.
    pub fn analyze_imports(&mut self, roots: &[&str]) -> EvalResult<ImportGraph> {
        self.ensure_open()?;
        let roots: EvalResult<Vec<ModuleUri>> = roots.iter().map(|r| ModuleUri::parse(r)).collect();
        let analyzer = ImportAnalyzer::new(&self.machine.resolver, self.machine.parser.as_ref(), &self.machine.security)
            .with_limits(self.machine.limits.clone());
        analyzer.analyze(&roots?)
    }

    /// Signals cancellation: the current call is the last to succeed;
    /// subsequent calls (and unread file outputs) fail with a "closed"
    /// error. Values returned before closing remain valid.
    pub fn close(&mut self) {
        if self.closed.replace(true) {
            return;
        }
        if let Some(external) = &self.external {
            external.borrow_mut().close();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Drop for Evaluator {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("closed", &self.closed.get())
            .finish_non_exhaustive()
    }
}
