use std::{
    collections::HashMap,
    sync::{Arc, Condvar, Mutex},
    thread::{self, ThreadId},
};

use crate::{
    cst::Tree,
    error::{EvalError, EvalResult},
    prepare::CompiledModule,
};

/// State of one cache slot, keyed by normalized module URI.
///
/// Transitions are monotone: absent (unresolved) → `InFlight` →
/// `Parsed` → `Compiled`, or → `Failed`. Failures are retained so that
/// repeated evaluations of a broken module yield identical error text.
#[derive(Debug)]
enum Entry {
    /// Resolution has begun on the owning thread.
    InFlight { owner: ThreadId },
    /// Source has been parsed; compilation is still running.
    Parsed { owner: ThreadId, tree: Arc<Tree> },
    Compiled(Arc<CompiledModule>),
    Failed(Box<EvalError>),
}

/// The module cache shared between evaluators of one builder.
///
/// A mutex-protected map with a condition variable: concurrent requests
/// for an in-flight URI block until the owner completes; re-entry from
/// the owning thread is a cyclic import.
#[derive(Debug, Default)]
pub struct ModuleCache {
    inner: Mutex<HashMap<String, Entry>>,
    ready: Condvar,
}

impl ModuleCache {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Looks up `uri`, claiming the slot when it is unresolved.
    ///
    /// Returns `Ok(Some(_))` on a compiled hit, `Ok(None)` when the
    /// caller now owns the slot and must finish with [`Self::complete`],
    /// and the retained error for failed slots.
    pub(crate) fn begin(&self, uri: &str) -> EvalResult<Option<Arc<CompiledModule>>> {
        let mut map = self.inner.lock().expect("module cache poisoned");
        loop {
            match map.get(uri) {
                None => {
                    map.insert(
                        uri.to_owned(),
                        Entry::InFlight {
                            owner: thread::current().id(),
                        },
                    );
                    return Ok(None);
                }
                Some(Entry::Compiled(module)) => return Ok(Some(Arc::clone(module))),
                Some(Entry::Failed(error)) => return Err(error.clone()),
                Some(Entry::InFlight { owner } | Entry::Parsed { owner, .. }) => {
                    if *owner == thread::current().id() {
                        return Err(EvalError::resolve(format!(
                            "Cyclic module import detected while loading `{uri}`."
                        )));
                    }
                    map = self.ready.wait(map).expect("module cache poisoned");
                }
            }
        }
    }

    /// Records the parsed tree for an in-flight slot.
    pub(crate) fn note_parsed(&self, uri: &str, tree: Arc<Tree>) {
        let mut map = self.inner.lock().expect("module cache poisoned");
        if let Some(Entry::InFlight { owner }) = map.get(uri) {
            let owner = *owner;
            map.insert(uri.to_owned(), Entry::Parsed { owner, tree });
        }
    }

    /// The parsed tree of a slot, if resolution got at least that far.
    #[must_use]
    pub fn parsed(&self, uri: &str) -> Option<Arc<Tree>> {
        let map = self.inner.lock().expect("module cache poisoned");
        match map.get(uri) {
            Some(Entry::Parsed { tree, .. }) => Some(Arc::clone(tree)),
            Some(Entry::Compiled(module)) => Some(Arc::clone(module.tree())),
            _ => None,
        }
    }

    /// Finishes an owned slot and wakes waiting threads.
    pub(crate) fn complete(&self, uri: &str, result: &EvalResult<Arc<CompiledModule>>) {
        let mut map = self.inner.lock().expect("module cache poisoned");
        let entry = match result {
            Ok(module) => Entry::Compiled(Arc::clone(module)),
            Err(error) => Entry::Failed(error.clone()),
        };
        map.insert(uri.to_owned(), entry);
        drop(map);
        self.ready.notify_all();
    }

    /// Number of terminal (compiled or failed) entries; used by tests.
    #[must_use]
    pub fn settled_count(&self) -> usize {
        let map = self.inner.lock().expect("module cache poisoned");
        map.values()
            .filter(|e| matches!(e, Entry::Compiled(_) | Entry::Failed(_)))
            .count()
    }
}
