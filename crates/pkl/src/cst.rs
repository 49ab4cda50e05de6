use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::span::{LineIndex, SourceLocation, Span};

/// Index of a node in its owning [`Tree`]'s arena.
///
/// Parent/child links are indices rather than references: the tree owns
/// every node in a `Vec`, which gives us parent back-references without
/// reference cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    #[must_use]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The closed set of declaration modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    pub external: bool,
    pub is_abstract: bool,
    pub is_open: bool,
    pub local: bool,
    pub hidden: bool,
    pub fixed: bool,
    pub is_const: bool,
}

impl Modifiers {
    pub const NONE: Self = Self {
        external: false,
        is_abstract: false,
        is_open: false,
        local: false,
        hidden: false,
        fixed: false,
        is_const: false,
    };

    #[must_use]
    pub fn hidden() -> Self {
        Self {
            hidden: true,
            ..Self::NONE
        }
    }

    #[must_use]
    pub fn local() -> Self {
        Self {
            local: true,
            ..Self::NONE
        }
    }

    #[must_use]
    pub fn fixed() -> Self {
        Self {
            fixed: true,
            ..Self::NONE
        }
    }

    #[must_use]
    pub fn open() -> Self {
        Self {
            is_open: true,
            ..Self::NONE
        }
    }
}

/// A non-empty dot-separated identifier sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName(pub SmallVec<[String; 2]>);

impl QualifiedName {
    #[must_use]
    pub fn simple(name: impl Into<String>) -> Self {
        Self(SmallVec::from_vec(vec![name.into()]))
    }

    /// The last identifier of the sequence.
    #[must_use]
    pub fn leaf(&self) -> &str {
        self.0.last().expect("qualified names are non-empty")
    }

    #[must_use]
    pub fn is_simple(&self) -> bool {
        self.0.len() == 1
    }
}

impl From<&str> for QualifiedName {
    fn from(text: &str) -> Self {
        Self(text.split('.').map(str::to_owned).collect())
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// A parameter of a method, lambda, or `for`/`let` binder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    /// Declared type annotation, a [`TypeNode`] in the arena.
    pub ty: Option<NodeId>,
    pub span: Span,
}

impl Param {
    #[must_use]
    pub fn untyped(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            ty: None,
            span,
        }
    }
}

/// One segment of an interpolated string literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StringPart {
    Literal(String),
    /// An interpolated expression; its `toString` form is spliced in.
    Interpolation(NodeId),
}

/// The closed binary operator set. `is` / `as` are dedicated
/// [`Expr::TypeCheck`] / [`Expr::TypeCast`] nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, Serialize, Deserialize)]
pub enum BinaryOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "~/")]
    IntDiv,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "**")]
    Pow,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
    #[strum(serialize = "??")]
    NullCoalesce,
    #[strum(serialize = "|>")]
    Pipe,
}

/// An expression node payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    This,
    Outer,
    /// A reference to the enclosing module object.
    Module,
    Null,
    /// The deletion marker; only legal as the right-hand side of a
    /// member definition inside an object body.
    Delete,
    Bool(bool),
    /// Integer literal, digits as written (including `_` separators and
    /// `0x`/`0b`/`0o` prefixes); parsed at evaluation time.
    Int(String),
    /// Float literal, digits as written.
    Float(String),
    Str(String),
    InterpolatedString {
        parts: Vec<StringPart>,
    },
    /// Multi-line string; `indent` is the column of the closing
    /// delimiter, stripped from every line at evaluation time.
    InterpolatedMultiString {
        parts: Vec<StringPart>,
        indent: u32,
    },
    Throw(NodeId),
    Trace(NodeId),
    ImportExpr {
        uri: String,
        is_glob: bool,
    },
    Read(NodeId),
    ReadGlob(NodeId),
    ReadNull(NodeId),
    UnqualifiedAccess {
        name: String,
        /// `Some` makes this a method/function call.
        args: Option<Vec<NodeId>>,
    },
    QualifiedAccess {
        receiver: NodeId,
        name: String,
        /// `?.` access: a null receiver yields null.
        is_nullable: bool,
        args: Option<Vec<NodeId>>,
    },
    SuperAccess {
        name: String,
        args: Option<Vec<NodeId>>,
    },
    SuperSubscript {
        index: NodeId,
    },
    Subscript {
        receiver: NodeId,
        index: NodeId,
    },
    If {
        condition: NodeId,
        then_branch: NodeId,
        else_branch: NodeId,
    },
    Let {
        param: Param,
        binding: NodeId,
        body: NodeId,
    },
    FunctionLiteral {
        params: Vec<Param>,
        body: NodeId,
    },
    Parenthesized(NodeId),
    New {
        /// Declared type; `None` instantiates `Dynamic`.
        ty: Option<NodeId>,
        body: NodeId,
    },
    Amends {
        parent: NodeId,
        body: NodeId,
    },
    NonNull(NodeId),
    UnaryMinus(NodeId),
    LogicalNot(NodeId),
    BinaryOp {
        left: NodeId,
        right: NodeId,
        op: BinaryOp,
    },
    TypeCheck {
        expr: NodeId,
        ty: NodeId,
    },
    TypeCast {
        expr: NodeId,
        ty: NodeId,
    },
}

/// A type annotation node payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeNode {
    Unknown,
    Nothing,
    /// The type of the enclosing module.
    Module,
    /// A string-literal type.
    StringConstant(String),
    Declared {
        name: QualifiedName,
        args: Vec<NodeId>,
    },
    Parenthesized(NodeId),
    Nullable(NodeId),
    Constrained {
        base: NodeId,
        predicates: Vec<NodeId>,
    },
    /// Marks the default alternative of a union type.
    DefaultUnion(NodeId),
    Union {
        left: NodeId,
        right: NodeId,
    },
    Function {
        params: Vec<NodeId>,
        ret: NodeId,
    },
}

/// An object-body member node payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemberNode {
    /// A positional element.
    Element(NodeId),
    Property {
        modifiers: Modifiers,
        name: String,
        ty: Option<NodeId>,
        expr: NodeId,
    },
    /// `name { … }` — recursive amendment of the inherited value.
    PropertyBody {
        modifiers: Modifiers,
        name: String,
        bodies: Vec<NodeId>,
    },
    Method {
        modifiers: Modifiers,
        name: String,
        type_params: Vec<String>,
        params: Vec<Param>,
        return_ty: Option<NodeId>,
        body: NodeId,
    },
    /// `[[pred]] = expr`.
    Predicate {
        predicate: NodeId,
        expr: NodeId,
    },
    /// `[[pred]] { … }`.
    PredicateBody {
        predicate: NodeId,
        bodies: Vec<NodeId>,
    },
    /// `[key] = value` — entry definition or subscript override.
    Entry {
        key: NodeId,
        value: NodeId,
    },
    /// `[key] { … }`.
    EntryBody {
        key: NodeId,
        bodies: Vec<NodeId>,
    },
    /// `...expr` / `...?expr`.
    Spread {
        expr: NodeId,
        is_nullable: bool,
    },
    When {
        condition: NodeId,
        then_body: NodeId,
        else_body: Option<NodeId>,
    },
    For {
        key_param: Param,
        value_param: Option<Param>,
        source: NodeId,
        body: NodeId,
    },
}

/// `extends`/`amends` clause of a module declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleClause {
    Extends(String),
    Amends(String),
}

/// The tagged node family of the concrete syntax tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Module {
        decl: Option<NodeId>,
        imports: Vec<NodeId>,
        entries: Vec<NodeId>,
    },
    ModuleDecl {
        doc: Option<String>,
        annotations: Vec<NodeId>,
        modifiers: Modifiers,
        name: Option<QualifiedName>,
        clause: Option<ModuleClause>,
    },
    Import {
        uri: String,
        is_glob: bool,
        alias: Option<String>,
    },
    Class {
        doc: Option<String>,
        annotations: Vec<NodeId>,
        modifiers: Modifiers,
        name: String,
        type_params: Vec<String>,
        superclass: Option<QualifiedName>,
        entries: Vec<NodeId>,
    },
    TypeAlias {
        doc: Option<String>,
        modifiers: Modifiers,
        name: String,
        type_params: Vec<String>,
        body: NodeId,
    },
    /// `name: Type` — declared property without a default.
    ClassProperty {
        doc: Option<String>,
        modifiers: Modifiers,
        name: String,
        ty: NodeId,
    },
    /// `name: Type = expr` / `name = expr`.
    ClassPropertyExpr {
        doc: Option<String>,
        modifiers: Modifiers,
        name: String,
        ty: Option<NodeId>,
        expr: NodeId,
    },
    /// `name { … }` at class/module level.
    ClassPropertyBody {
        doc: Option<String>,
        modifiers: Modifiers,
        name: String,
        bodies: Vec<NodeId>,
    },
    ClassMethod {
        doc: Option<String>,
        modifiers: Modifiers,
        name: String,
        type_params: Vec<String>,
        params: Vec<Param>,
        return_ty: Option<NodeId>,
        body: Option<NodeId>,
    },
    ObjectBody {
        /// Lambda parameters when the body doubles as a function body.
        params: Vec<Param>,
        members: Vec<NodeId>,
    },
    Member(MemberNode),
    Expr(Expr),
    Type(TypeNode),
}

impl NodeKind {
    /// Calls `f` with every direct child id, in source order.
    pub fn visit_children(&self, f: &mut impl FnMut(NodeId)) {
        let visit_params = |params: &[Param], f: &mut dyn FnMut(NodeId)| {
            for p in params {
                if let Some(ty) = p.ty {
                    f(ty);
                }
            }
        };
        let visit_parts = |parts: &[StringPart], f: &mut dyn FnMut(NodeId)| {
            for part in parts {
                if let StringPart::Interpolation(id) = part {
                    f(*id);
                }
            }
        };
        match self {
            Self::Module { decl, imports, entries } => {
                if let Some(d) = decl {
                    f(*d);
                }
                imports.iter().chain(entries).for_each(|id| f(*id));
            }
            Self::ModuleDecl { annotations, .. } => annotations.iter().for_each(|id| f(*id)),
            Self::Import { .. } => {}
            Self::Class {
                annotations, entries, ..
            } => annotations.iter().chain(entries).for_each(|id| f(*id)),
            Self::TypeAlias { body, .. } => f(*body),
            Self::ClassProperty { ty, .. } => f(*ty),
            Self::ClassPropertyExpr { ty, expr, .. } => {
                if let Some(t) = ty {
                    f(*t);
                }
                f(*expr);
            }
            Self::ClassPropertyBody { bodies, .. } => bodies.iter().for_each(|id| f(*id)),
            Self::ClassMethod {
                params,
                return_ty,
                body,
                ..
            } => {
                visit_params(params, f);
                if let Some(t) = return_ty {
                    f(*t);
                }
                if let Some(b) = body {
                    f(*b);
                }
            }
            Self::ObjectBody { params, members } => {
                visit_params(params, f);
                members.iter().for_each(|id| f(*id));
            }
            Self::Member(member) => match member {
                MemberNode::Element(e) => f(*e),
                MemberNode::Property { ty, expr, .. } => {
                    if let Some(t) = ty {
                        f(*t);
                    }
                    f(*expr);
                }
                MemberNode::PropertyBody { bodies, .. } | MemberNode::EntryBody { bodies, .. } => {
                    if let MemberNode::EntryBody { key, .. } = member {
                        f(*key);
                    }
                    bodies.iter().for_each(|id| f(*id));
                }
                MemberNode::Method {
                    params,
                    return_ty,
                    body,
                    ..
                } => {
                    visit_params(params, f);
                    if let Some(t) = return_ty {
                        f(*t);
                    }
                    f(*body);
                }
                MemberNode::Predicate { predicate, expr } => {
                    f(*predicate);
                    f(*expr);
                }
                MemberNode::PredicateBody { predicate, bodies } => {
                    f(*predicate);
                    bodies.iter().for_each(|id| f(*id));
                }
                MemberNode::Entry { key, value } => {
                    f(*key);
                    f(*value);
                }
                MemberNode::Spread { expr, .. } => f(*expr),
                MemberNode::When {
                    condition,
                    then_body,
                    else_body,
                } => {
                    f(*condition);
                    f(*then_body);
                    if let Some(e) = else_body {
                        f(*e);
                    }
                }
                MemberNode::For {
                    key_param,
                    value_param,
                    source,
                    body,
                } => {
                    if let Some(ty) = key_param.ty {
                        f(ty);
                    }
                    if let Some(p) = value_param {
                        if let Some(ty) = p.ty {
                            f(ty);
                        }
                    }
                    f(*source);
                    f(*body);
                }
            },
            Self::Expr(expr) => match expr {
                Expr::This
                | Expr::Outer
                | Expr::Module
                | Expr::Null
                | Expr::Delete
                | Expr::Bool(_)
                | Expr::Int(_)
                | Expr::Float(_)
                | Expr::Str(_)
                | Expr::ImportExpr { .. } => {}
                Expr::InterpolatedString { parts } | Expr::InterpolatedMultiString { parts, .. } => {
                    visit_parts(parts, f);
                }
                Expr::Throw(e)
                | Expr::Trace(e)
                | Expr::Read(e)
                | Expr::ReadGlob(e)
                | Expr::ReadNull(e)
                | Expr::Parenthesized(e)
                | Expr::NonNull(e)
                | Expr::UnaryMinus(e)
                | Expr::LogicalNot(e)
                | Expr::SuperSubscript { index: e } => f(*e),
                Expr::UnqualifiedAccess { args, .. } | Expr::SuperAccess { args, .. } => {
                    if let Some(args) = args {
                        args.iter().for_each(|id| f(*id));
                    }
                }
                Expr::QualifiedAccess { receiver, args, .. } => {
                    f(*receiver);
                    if let Some(args) = args {
                        args.iter().for_each(|id| f(*id));
                    }
                }
                Expr::Subscript { receiver, index } => {
                    f(*receiver);
                    f(*index);
                }
                Expr::If {
                    condition,
                    then_branch,
                    else_branch,
                } => {
                    f(*condition);
                    f(*then_branch);
                    f(*else_branch);
                }
                Expr::Let { param, binding, body } => {
                    if let Some(ty) = param.ty {
                        f(ty);
                    }
                    f(*binding);
                    f(*body);
                }
                Expr::FunctionLiteral { params, body } => {
                    visit_params(params, f);
                    f(*body);
                }
                Expr::New { ty, body } => {
                    if let Some(t) = ty {
                        f(*t);
                    }
                    f(*body);
                }
                Expr::Amends { parent, body } => {
                    f(*parent);
                    f(*body);
                }
                Expr::BinaryOp { left, right, .. } => {
                    f(*left);
                    f(*right);
                }
                Expr::TypeCheck { expr, ty } | Expr::TypeCast { expr, ty } => {
                    f(*expr);
                    f(*ty);
                }
            },
            Self::Type(ty) => match ty {
                TypeNode::Unknown
                | TypeNode::Nothing
                | TypeNode::Module
                | TypeNode::StringConstant(_) => {}
                TypeNode::Declared { args, .. } => args.iter().for_each(|id| f(*id)),
                TypeNode::Parenthesized(t) | TypeNode::Nullable(t) | TypeNode::DefaultUnion(t) => f(*t),
                TypeNode::Constrained { base, predicates } => {
                    f(*base);
                    predicates.iter().for_each(|id| f(*id));
                }
                TypeNode::Union { left, right } => {
                    f(*left);
                    f(*right);
                }
                TypeNode::Function { params, ret } => {
                    params.iter().for_each(|id| f(*id));
                    f(*ret);
                }
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct NodeData {
    kind: NodeKind,
    span: Span,
    parent: Option<NodeId>,
}

/// An immutable concrete syntax tree for one module.
///
/// Owns the arena of nodes, the module URI, and the source text with its
/// line index, so every diagnostic can be produced from the tree alone.
#[derive(Debug, Clone)]
pub struct Tree {
    uri: String,
    source: Arc<str>,
    line_index: LineIndex,
    nodes: Vec<NodeData>,
    root: NodeId,
}

impl Tree {
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    #[must_use]
    pub fn span(&self, id: NodeId) -> Span {
        self.nodes[id.index()].span
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    /// The direct children of `id`, in source order.
    #[must_use]
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.nodes[id.index()].kind.visit_children(&mut |child| out.push(child));
        out
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The expression payload of `id`; panics if `id` is not an
    /// expression node (an internal contract violation).
    #[must_use]
    pub(crate) fn expr(&self, id: NodeId) -> &Expr {
        match self.kind(id) {
            NodeKind::Expr(e) => e,
            other => panic!("node {id} is not an expression: {other:?}"),
        }
    }

    #[must_use]
    pub fn location(&self, id: NodeId) -> SourceLocation {
        self.line_index.location(self.span(id))
    }

    /// The source text covered by `span`, trimmed to its first line.
    ///
    /// Spans count code points; synthetic trees with spans beyond the
    /// stored source produce an empty snippet.
    #[must_use]
    pub fn snippet(&self, span: Span) -> String {
        let text: String = self
            .source
            .chars()
            .skip(usize::try_from(span.char_index).unwrap_or(usize::MAX))
            .take(span.length as usize)
            .collect();
        match text.split_once('\n') {
            Some((first, _)) => format!("{}\u{2026}", first.trim_end()),
            None => text,
        }
    }

    /// Checks the structural invariants: every non-root node has exactly
    /// one parent that lists it among its children, child spans nest
    /// within parent spans, and sibling spans are ordered.
    pub fn validate(&self) -> Result<(), String> {
        for (index, node) in self.nodes.iter().enumerate() {
            let id = NodeId(u32::try_from(index).expect("arena fits in u32"));
            match node.parent {
                None if id != self.root => {
                    if !self.is_reachable(id) {
                        continue;
                    }
                    return Err(format!("node {id} is reachable but has no parent"));
                }
                Some(parent) => {
                    if !self.children(parent).contains(&id) {
                        return Err(format!("node {id} is not listed among its parent's children"));
                    }
                    if !self.span(parent).contains(node.span) {
                        return Err(format!(
                            "span of {id} ({}) escapes its parent's span ({})",
                            node.span,
                            self.span(parent)
                        ));
                    }
                }
                None => {}
            }
            let children = self.children(id);
            for pair in children.windows(2) {
                if self.span(pair[0]).char_index > self.span(pair[1]).char_index {
                    return Err(format!("children of {id} are not span-ordered"));
                }
            }
        }
        Ok(())
    }

    fn is_reachable(&self, target: NodeId) -> bool {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            stack.extend(self.children(id));
        }
        false
    }
}

/// Constructs a [`Tree`] bottom-up.
///
/// Children are created first; creating a node wires the parent link of
/// every child id mentioned in its kind. Attaching the same child twice
/// is a construction bug and panics.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<NodeData>,
}

impl TreeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and claims every child id in `kind`.
    pub fn add(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("arena fits in u32"));
        let mut children = Vec::new();
        kind.visit_children(&mut |child| children.push(child));
        for child in children {
            let slot = self
                .nodes
                .get_mut(child.index())
                .unwrap_or_else(|| panic!("child {child} does not exist yet"));
            assert!(
                slot.parent.is_none(),
                "child {child} already has a parent; every node has exactly one"
            );
            slot.parent = Some(id);
        }
        self.nodes.push(NodeData {
            kind,
            span,
            parent: None,
        });
        id
    }

    /// Convenience for expression nodes.
    pub fn expr(&mut self, expr: Expr, span: Span) -> NodeId {
        self.add(NodeKind::Expr(expr), span)
    }

    /// Convenience for type nodes.
    pub fn ty(&mut self, ty: TypeNode, span: Span) -> NodeId {
        self.add(NodeKind::Type(ty), span)
    }

    /// Convenience for member nodes.
    pub fn member(&mut self, member: MemberNode, span: Span) -> NodeId {
        self.add(NodeKind::Member(member), span)
    }

    /// Finishes the tree with `root` and the module's identity.
    #[must_use]
    pub fn finish(self, root: NodeId, uri: impl Into<String>, source: &str) -> Tree {
        Tree {
            uri: uri.into(),
            line_index: LineIndex::new(source),
            source: Arc::from(source),
            nodes: self.nodes,
            root,
        }
    }
}

/// Parses an integer literal as written in source (underscore
/// separators; `0x`/`0b`/`0o` radix prefixes).
pub(crate) fn parse_int_literal(text: &str) -> Option<i64> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let (digits, radix) = match cleaned.as_bytes() {
        [b'0', b'x' | b'X', ..] => (&cleaned[2..], 16),
        [b'0', b'b' | b'B', ..] => (&cleaned[2..], 2),
        [b'0', b'o' | b'O', ..] => (&cleaned[2..], 8),
        _ => (cleaned.as_str(), 10),
    };
    i64::from_str_radix(digits, radix).ok()
}

/// Parses a float literal as written in source.
pub(crate) fn parse_float_literal(text: &str) -> Option<f64> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    match cleaned.as_str() {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        other => other.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_literals() {
        assert_eq!(parse_int_literal("42"), Some(42));
        assert_eq!(parse_int_literal("1_000_000"), Some(1_000_000));
        assert_eq!(parse_int_literal("0x10"), Some(16));
        assert_eq!(parse_int_literal("0b101"), Some(5));
        assert_eq!(parse_int_literal("0o17"), Some(15));
        assert_eq!(parse_int_literal("9223372036854775808"), None);
    }

    #[test]
    fn float_literals() {
        assert_eq!(parse_float_literal("1.5"), Some(1.5));
        assert_eq!(parse_float_literal("1_0.5"), Some(10.5));
        assert!(parse_float_literal("NaN").unwrap().is_nan());
        assert_eq!(parse_float_literal("Infinity"), Some(f64::INFINITY));
    }
}
