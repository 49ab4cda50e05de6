//! The import-graph analyzer.
//!
//! Walks imports transitively from a set of root modules using only the
//! parser and the resolver (no evaluation). Glob imports are expanded
//! through `list_elements`; cycles are reported faithfully via
//! Tarjan's strongly connected components.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use crate::{
    cst::{Expr, ModuleClause, NodeKind, Tree},
    error::EvalResult,
    parser::{parse_with, ModuleParser},
    resolver::{ModuleResolver, ResolveContext},
    resource::EvalLimits,
    security::SecurityManager,
    uri::ModuleUri,
};

type Edges = IndexSet<String, ahash::RandomState>;

/// The transitive import graph of a set of root modules.
///
/// Nodes are canonical URIs (real paths for local files, canonical
/// package URIs for packages); `resolved` maps every requested URI to
/// its canonical form.
#[derive(Debug, Default)]
pub struct ImportGraph {
    pub imports: IndexMap<String, Edges, ahash::RandomState>,
    pub resolved: IndexMap<String, String, ahash::RandomState>,
}

impl ImportGraph {
    /// The imports of one module, if it was reached.
    #[must_use]
    pub fn imports_of(&self, uri: &str) -> Option<&Edges> {
        self.imports.get(uri)
    }

    /// All cycles in the graph, canonically as Tarjan strongly
    /// connected components: a self-import is a 1-cycle, a pair of
    /// mutually importing modules a 2-cycle, and so on.
    #[must_use]
    pub fn cycles(&self) -> Vec<Vec<String>> {
        Tarjan::new(self).run()
    }
}

/// Walks imports without evaluating.
pub struct ImportAnalyzer<'a> {
    resolver: &'a ModuleResolver,
    parser: &'a dyn ModuleParser,
    security: &'a SecurityManager,
    limits: EvalLimits,
}

impl<'a> ImportAnalyzer<'a> {
    #[must_use]
    pub fn new(resolver: &'a ModuleResolver, parser: &'a dyn ModuleParser, security: &'a SecurityManager) -> Self {
        Self {
            resolver,
            parser,
            security,
            limits: EvalLimits::unlimited(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: EvalLimits) -> Self {
        self.limits = limits;
        self
    }

    fn ctx(&self) -> ResolveContext<'_> {
        ResolveContext {
            security: self.security,
            limits: &self.limits,
        }
    }

    /// Resolves a URI to its canonical form, recording the mapping.
    fn canonicalize(&self, graph: &mut ImportGraph, uri: &ModuleUri) -> EvalResult<ModuleUri> {
        if let Some(known) = graph.resolved.get(uri.as_str()) {
            return ModuleUri::parse(known);
        }
        let key = self.resolver.create_key(uri)?;
        let canonical = if uri.scheme() == "pkl" {
            uri.clone()
        } else {
            key.resolve(&self.ctx())?.uri().clone()
        };
        graph
            .resolved
            .insert(uri.as_str().to_owned(), canonical.as_str().to_owned());
        Ok(canonical)
    }

    /// Analyzes the transitive import graph reachable from `roots`.
    pub fn analyze(&self, roots: &[ModuleUri]) -> EvalResult<ImportGraph> {
        let mut graph = ImportGraph::default();
        let mut worklist: Vec<ModuleUri> = Vec::new();
        for root in roots {
            let canonical = self.canonicalize(&mut graph, root)?;
            worklist.push(canonical);
        }
        while let Some(uri) = worklist.pop() {
            if graph.imports.contains_key(uri.as_str()) {
                continue;
            }
            self.limits.check_deadline()?;
            let targets = self.module_imports(&uri)?;
            let mut edges = Edges::default();
            for target in targets {
                let canonical = self.canonicalize(&mut graph, &target)?;
                edges.insert(canonical.as_str().to_owned());
                if !graph.imports.contains_key(canonical.as_str()) {
                    worklist.push(canonical);
                }
            }
            graph.imports.insert(uri.as_str().to_owned(), edges);
        }
        Ok(graph)
    }

    /// The direct imports of one module: import declarations,
    /// `amends`/`extends` clauses, and `import()` / `import*()`
    /// expressions anywhere in the tree, with glob patterns expanded.
    fn module_imports(&self, uri: &ModuleUri) -> EvalResult<Vec<ModuleUri>> {
        // Standard-library modules are native leaves.
        if uri.scheme() == "pkl" {
            return Ok(Vec::new());
        }
        let key = self.resolver.create_key(uri)?;
        let resolved = key.resolve(&self.ctx())?;
        let source = resolved.load_source(&self.ctx())?;
        let tree = parse_with(self.parser, &source, uri)?;

        let mut out = Vec::new();
        let root = tree.root();
        if let NodeKind::Module { decl, imports, .. } = tree.kind(root) {
            if let Some(decl) = decl {
                if let NodeKind::ModuleDecl {
                    clause: Some(ModuleClause::Amends(target) | ModuleClause::Extends(target)),
                    ..
                } = tree.kind(*decl)
                {
                    self.push_target(&mut out, uri, target, false)?;
                }
            }
            for import in imports.clone() {
                if let NodeKind::Import {
                    uri: target, is_glob, ..
                } = tree.kind(import)
                {
                    self.push_target(&mut out, uri, target, *is_glob)?;
                }
            }
        }
        self.collect_import_exprs(&tree, uri, &mut out)?;
        Ok(out)
    }

    fn collect_import_exprs(&self, tree: &Tree, uri: &ModuleUri, out: &mut Vec<ModuleUri>) -> EvalResult<()> {
        let mut stack = vec![tree.root()];
        while let Some(node) = stack.pop() {
            if let NodeKind::Expr(Expr::ImportExpr { uri: target, is_glob }) = tree.kind(node) {
                self.push_target(out, uri, target, *is_glob)?;
            }
            stack.extend(tree.children(node));
        }
        Ok(())
    }

    fn push_target(&self, out: &mut Vec<ModuleUri>, base: &ModuleUri, target: &str, is_glob: bool) -> EvalResult<()> {
        if is_glob {
            for (_, resolved) in self.resolver.expand_glob(&self.ctx(), base, target)? {
                out.push(resolved);
            }
        } else {
            out.push(self.resolver.resolve_reference(base, target)?);
        }
        Ok(())
    }
}

/// Iterative Tarjan SCC over the import graph.
struct Tarjan<'a> {
    graph: &'a ImportGraph,
    index: HashMap<&'a str, usize>,
    lowlink: HashMap<&'a str, usize>,
    on_stack: HashMap<&'a str, bool>,
    stack: Vec<&'a str>,
    next_index: usize,
    components: Vec<Vec<String>>,
}

impl<'a> Tarjan<'a> {
    fn new(graph: &'a ImportGraph) -> Self {
        Self {
            graph,
            index: HashMap::new(),
            lowlink: HashMap::new(),
            on_stack: HashMap::new(),
            stack: Vec::new(),
            next_index: 0,
            components: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Vec<String>> {
        for node in self.graph.imports.keys() {
            if !self.index.contains_key(node.as_str()) {
                self.strong_connect(node);
            }
        }
        // Keep genuine cycles: multi-node components, or single nodes
        // with a self-edge.
        self.components
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self
                        .graph
                        .imports
                        .get(&component[0])
                        .is_some_and(|edges| edges.contains(&component[0]))
            })
            .collect()
    }

    fn strong_connect(&mut self, node: &'a str) {
        // Explicit DFS stack: (node, next-edge-index).
        let mut work: Vec<(&'a str, usize)> = vec![(node, 0)];
        while let Some((v, edge_index)) = work.pop() {
            if edge_index == 0 {
                self.index.insert(v, self.next_index);
                self.lowlink.insert(v, self.next_index);
                self.next_index += 1;
                self.stack.push(v);
                self.on_stack.insert(v, true);
            }
            let edges: Vec<&'a str> = self
                .graph
                .imports
                .get(v)
                .map(|e| e.iter().map(String::as_str).collect())
                .unwrap_or_default();
            let mut recursed = false;
            for (i, w) in edges.iter().enumerate().skip(edge_index) {
                if !self.index.contains_key(w) {
                    work.push((v, i + 1));
                    work.push((*w, 0));
                    recursed = true;
                    break;
                }
                if self.on_stack.get(w).copied().unwrap_or(false) {
                    let w_index = self.index[w];
                    let v_low = self.lowlink[v].min(w_index);
                    self.lowlink.insert(v, v_low);
                }
            }
            if recursed {
                continue;
            }
            if let Some(&(parent, _)) = work.last() {
                let v_low = self.lowlink[v];
                let parent_low = self.lowlink[parent].min(v_low);
                self.lowlink.insert(parent, parent_low);
            }
            if self.lowlink[v] == self.index[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack.insert(w, false);
                    component.push(w.to_owned());
                    if w == v {
                        break;
                    }
                }
                component.reverse();
                self.components.push(component);
            }
        }
    }
}
