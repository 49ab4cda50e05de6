//! The per-module compilation pass.
//!
//! Runs once after parsing: splits the module into its declaration,
//! imports, and entries, and resolves every unqualified identifier
//! reference to a binding descriptor. The descriptors drive tooling and
//! sanity checks; the evaluator performs the same resolution order
//! dynamically (lexical binders shadow receivers, receivers shadow
//! module scope, module scope shadows the standard library).

use std::{collections::HashMap, sync::Arc};

use indexmap::IndexMap;

use crate::{
    cst::{Expr, MemberNode, ModuleClause, NodeId, NodeKind, Param, Tree},
    error::{EvalError, EvalResult},
    stdlib,
    uri::ModuleUri,
};

/// One import declaration of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportInfo {
    pub uri: String,
    pub is_glob: bool,
    pub alias: Option<String>,
    pub node: NodeId,
}

impl ImportInfo {
    /// The name this import binds in module scope: the alias if given,
    /// otherwise the stem of the imported file.
    #[must_use]
    pub fn binding_name(&self) -> Option<String> {
        if let Some(alias) = &self.alias {
            return Some(alias.clone());
        }
        if self.is_glob {
            return None;
        }
        let stem = self
            .uri
            .rsplit('/')
            .next()?
            .trim_end_matches(".pkl");
        (!stem.is_empty()).then(|| stem.to_owned())
    }
}

/// Where an unqualified identifier reference binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// A lexical binder: `let`, parameter, `for` variable.
    Lexical,
    /// A module-level property of this module.
    ModuleProperty,
    /// A module-level method of this module.
    ModuleMethod,
    /// An import binding (index into [`CompiledModule::imports`]).
    Import(usize),
    /// A class declared by this module.
    Class(String),
    /// A type alias declared by this module.
    TypeAlias(String),
    /// A standard-library member.
    StdLib,
    /// Late-bound: may be a property of some receiver, decided during
    /// evaluation.
    Deferred,
}

/// Binding descriptors per identifier-reference node.
#[derive(Debug, Default)]
pub struct Resolutions(HashMap<NodeId, Binding, ahash::RandomState>);

impl Resolutions {
    #[must_use]
    pub fn binding(&self, node: NodeId) -> Option<&Binding> {
        self.0.get(&node)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A parsed, name-resolved module, shareable across evaluators.
#[derive(Debug)]
pub struct CompiledModule {
    pub uri: ModuleUri,
    pub tree: Arc<Tree>,
    /// The declared (qualified) module name, if any.
    pub name: Option<String>,
    pub clause: Option<ModuleClause>,
    pub imports: Vec<ImportInfo>,
    /// Module-level property/method entry nodes, in source order.
    pub properties: Vec<NodeId>,
    pub methods: IndexMap<String, NodeId, ahash::RandomState>,
    pub classes: IndexMap<String, NodeId, ahash::RandomState>,
    pub type_aliases: IndexMap<String, NodeId, ahash::RandomState>,
    pub resolutions: Resolutions,
}

impl CompiledModule {
    #[must_use]
    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    /// The `amends`/`extends` target, if the module declares one.
    #[must_use]
    pub fn parent_uri(&self) -> Option<&str> {
        match &self.clause {
            Some(ModuleClause::Amends(uri) | ModuleClause::Extends(uri)) => Some(uri),
            None => None,
        }
    }
}

/// Compiles a parsed tree into a [`CompiledModule`].
pub fn compile(uri: ModuleUri, tree: Arc<Tree>) -> EvalResult<Arc<CompiledModule>> {
    let NodeKind::Module { decl, imports, entries } = tree.kind(tree.root()) else {
        return Err(EvalError::parse(format!(
            "Module `{uri}` does not parse to a module root node."
        )));
    };

    let mut name = None;
    let mut clause = None;
    if let Some(decl) = decl {
        if let NodeKind::ModuleDecl {
            name: decl_name,
            clause: decl_clause,
            ..
        } = tree.kind(*decl)
        {
            name = decl_name.as_ref().map(ToString::to_string);
            clause = decl_clause.clone();
        }
    }

    let mut import_infos = Vec::with_capacity(imports.len());
    for import in imports {
        let NodeKind::Import { uri, is_glob, alias } = tree.kind(*import) else {
            return Err(EvalError::parse("Import entry is not an import node.".to_owned()));
        };
        import_infos.push(ImportInfo {
            uri: uri.clone(),
            is_glob: *is_glob,
            alias: alias.clone(),
            node: *import,
        });
    }

    let mut properties = Vec::new();
    let mut methods = IndexMap::default();
    let mut classes = IndexMap::default();
    let mut type_aliases = IndexMap::default();
    for entry in entries {
        match tree.kind(*entry) {
            NodeKind::Class { name, .. } => {
                classes.insert(name.clone(), *entry);
            }
            NodeKind::TypeAlias { name, .. } => {
                type_aliases.insert(name.clone(), *entry);
            }
            NodeKind::ClassMethod { name, .. } => {
                methods.insert(name.clone(), *entry);
                properties.push(*entry);
            }
            NodeKind::ClassProperty { .. }
            | NodeKind::ClassPropertyExpr { .. }
            | NodeKind::ClassPropertyBody { .. } => properties.push(*entry),
            other => {
                return Err(EvalError::parse(format!(
                    "Unexpected module entry node: {other:?}."
                )));
            }
        }
    }

    let mut resolver = NameResolver {
        tree: &tree,
        module: ModuleScope {
            properties: collect_property_names(&tree, &properties),
            methods: methods.keys().cloned().collect(),
            classes: classes.keys().cloned().collect(),
            type_aliases: type_aliases.keys().cloned().collect(),
            imports: &import_infos,
        },
        scopes: Vec::new(),
        resolutions: HashMap::default(),
    };
    resolver.visit(tree.root());
    let resolutions = Resolutions(resolver.resolutions);

    Ok(Arc::new(CompiledModule {
        uri,
        tree: Arc::clone(&tree),
        name,
        clause,
        imports: import_infos,
        properties,
        methods,
        classes,
        type_aliases,
        resolutions,
    }))
}

fn collect_property_names(tree: &Tree, properties: &[NodeId]) -> Vec<String> {
    properties
        .iter()
        .filter_map(|id| match tree.kind(*id) {
            NodeKind::ClassProperty { name, .. }
            | NodeKind::ClassPropertyExpr { name, .. }
            | NodeKind::ClassPropertyBody { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

struct ModuleScope<'a> {
    properties: Vec<String>,
    methods: Vec<String>,
    classes: Vec<String>,
    type_aliases: Vec<String>,
    imports: &'a [ImportInfo],
}

struct NameResolver<'a> {
    tree: &'a Tree,
    module: ModuleScope<'a>,
    /// Stack of lexical binder names; inner binders shadow outer ones.
    scopes: Vec<String>,
    resolutions: HashMap<NodeId, Binding, ahash::RandomState>,
}

impl NameResolver<'_> {
    fn visit(&mut self, id: NodeId) {
        match self.tree.kind(id) {
            NodeKind::Expr(Expr::UnqualifiedAccess { name, args }) => {
                let binding = self.resolve(name);
                self.resolutions.insert(id, binding);
                if let Some(args) = args {
                    for arg in args.clone() {
                        self.visit(arg);
                    }
                }
            }
            NodeKind::Expr(Expr::Let { param, binding, body }) => {
                let (param, binding, body) = (param.clone(), *binding, *body);
                self.visit_param_type(&param);
                self.visit(binding);
                self.in_scope(&[param.name], |r| r.visit(body));
            }
            NodeKind::Expr(Expr::FunctionLiteral { params, body }) => {
                let (params, body) = (params.clone(), *body);
                for p in &params {
                    self.visit_param_type(p);
                }
                let names: Vec<String> = params.iter().map(|p| p.name.clone()).collect();
                self.in_scope(&names, |r| r.visit(body));
            }
            NodeKind::Member(MemberNode::For {
                key_param,
                value_param,
                source,
                body,
            }) => {
                let (key_param, value_param, source, body) =
                    (key_param.clone(), value_param.clone(), *source, *body);
                self.visit_param_type(&key_param);
                if let Some(p) = &value_param {
                    self.visit_param_type(p);
                }
                self.visit(source);
                let mut names = vec![key_param.name];
                if let Some(p) = value_param {
                    names.push(p.name);
                }
                self.in_scope(&names, |r| r.visit(body));
            }
            NodeKind::ClassMethod { params, body, .. } => {
                let (params, body) = (params.clone(), *body);
                for p in &params {
                    self.visit_param_type(p);
                }
                if let Some(body) = body {
                    let names: Vec<String> = params.iter().map(|p| p.name.clone()).collect();
                    self.in_scope(&names, |r| r.visit(body));
                }
            }
            NodeKind::Member(MemberNode::Method { params, body, .. }) => {
                let (params, body) = (params.clone(), *body);
                for p in &params {
                    self.visit_param_type(p);
                }
                let names: Vec<String> = params.iter().map(|p| p.name.clone()).collect();
                self.in_scope(&names, |r| r.visit(body));
            }
            NodeKind::ObjectBody { params, members } => {
                let (params, members) = (params.clone(), members.clone());
                for p in &params {
                    self.visit_param_type(p);
                }
                let names: Vec<String> = params.iter().map(|p| p.name.clone()).collect();
                self.in_scope(&names, |r| {
                    for member in members {
                        r.visit(member);
                    }
                });
            }
            _ => {
                for child in self.tree.children(id) {
                    self.visit(child);
                }
            }
        }
    }

    fn visit_param_type(&mut self, param: &Param) {
        if let Some(ty) = param.ty {
            self.visit(ty);
        }
    }

    fn in_scope(&mut self, names: &[impl AsRef<str>], f: impl FnOnce(&mut Self)) {
        let depth = self.scopes.len();
        self.scopes.extend(names.iter().map(|n| n.as_ref().to_owned()));
        f(self);
        self.scopes.truncate(depth);
    }

    fn resolve(&self, name: &str) -> Binding {
        if self.scopes.iter().rev().any(|n| n == name) {
            return Binding::Lexical;
        }
        if self.module.classes.iter().any(|n| n == name) {
            return Binding::Class(name.to_owned());
        }
        if self.module.type_aliases.iter().any(|n| n == name) {
            return Binding::TypeAlias(name.to_owned());
        }
        if let Some(index) = self
            .module
            .imports
            .iter()
            .position(|i| i.binding_name().as_deref() == Some(name))
        {
            return Binding::Import(index);
        }
        if self.module.methods.iter().any(|n| n == name) {
            return Binding::ModuleMethod;
        }
        if self.module.properties.iter().any(|n| n == name) {
            return Binding::ModuleProperty;
        }
        if stdlib::is_global(name) {
            return Binding::StdLib;
        }
        Binding::Deferred
    }
}
