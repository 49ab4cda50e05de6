//! Shared test fixtures: an ergonomic CST builder for evaluator tests,
//! a parser that serves pre-built trees, and a small line-oriented
//! fixture parser that stands in for the external parser in
//! resolver/analyzer/harness tests.

#![allow(dead_code, reason = "each integration test binary uses a subset")]

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use pkl::{
    cst::{BinaryOp, Expr, MemberNode, ModuleClause, NodeId, NodeKind, Param, QualifiedName, Tree, TreeBuilder},
    ModuleParser, ModuleUri, ParseError, Span,
};

/// A zero-length placeholder span; nesting invariants hold trivially.
pub fn span0() -> Span {
    Span::new(0, 0)
}

/// Fluent builder for hand-written module trees.
///
/// All nodes carry zero-length spans; tests that care about spans and
/// snippets go through [`FixtureParser`] instead.
pub struct ModuleBuilder {
    pub b: TreeBuilder,
    decl: Option<NodeId>,
    imports: Vec<NodeId>,
    entries: Vec<NodeId>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self {
            b: TreeBuilder::new(),
            decl: None,
            imports: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn amends(&mut self, target: &str) {
        let decl = self.b.add(
            NodeKind::ModuleDecl {
                doc: None,
                annotations: vec![],
                modifiers: Default::default(),
                name: None,
                clause: Some(ModuleClause::Amends(target.to_owned())),
            },
            span0(),
        );
        self.decl = Some(decl);
    }

    pub fn import(&mut self, uri: &str, alias: Option<&str>) {
        let import = self.b.add(
            NodeKind::Import {
                uri: uri.to_owned(),
                is_glob: false,
                alias: alias.map(str::to_owned),
            },
            span0(),
        );
        self.imports.push(import);
    }

    // --- expressions -------------------------------------------------------

    pub fn int(&mut self, value: i64) -> NodeId {
        self.b.expr(Expr::Int(value.to_string()), span0())
    }

    pub fn float(&mut self, digits: &str) -> NodeId {
        self.b.expr(Expr::Float(digits.to_owned()), span0())
    }

    pub fn bool(&mut self, value: bool) -> NodeId {
        self.b.expr(Expr::Bool(value), span0())
    }

    pub fn str(&mut self, value: &str) -> NodeId {
        self.b.expr(Expr::Str(value.to_owned()), span0())
    }

    pub fn null(&mut self) -> NodeId {
        self.b.expr(Expr::Null, span0())
    }

    pub fn delete(&mut self) -> NodeId {
        self.b.expr(Expr::Delete, span0())
    }

    pub fn this(&mut self) -> NodeId {
        self.b.expr(Expr::This, span0())
    }

    pub fn name(&mut self, name: &str) -> NodeId {
        self.b.expr(
            Expr::UnqualifiedAccess {
                name: name.to_owned(),
                args: None,
            },
            span0(),
        )
    }

    pub fn call(&mut self, name: &str, args: Vec<NodeId>) -> NodeId {
        self.b.expr(
            Expr::UnqualifiedAccess {
                name: name.to_owned(),
                args: Some(args),
            },
            span0(),
        )
    }

    pub fn get(&mut self, receiver: NodeId, name: &str) -> NodeId {
        self.b.expr(
            Expr::QualifiedAccess {
                receiver,
                name: name.to_owned(),
                is_nullable: false,
                args: None,
            },
            span0(),
        )
    }

    pub fn get_nullable(&mut self, receiver: NodeId, name: &str) -> NodeId {
        self.b.expr(
            Expr::QualifiedAccess {
                receiver,
                name: name.to_owned(),
                is_nullable: true,
                args: None,
            },
            span0(),
        )
    }

    pub fn invoke(&mut self, receiver: NodeId, name: &str, args: Vec<NodeId>) -> NodeId {
        self.b.expr(
            Expr::QualifiedAccess {
                receiver,
                name: name.to_owned(),
                is_nullable: false,
                args: Some(args),
            },
            span0(),
        )
    }

    pub fn super_access(&mut self, name: &str) -> NodeId {
        self.b.expr(
            Expr::SuperAccess {
                name: name.to_owned(),
                args: None,
            },
            span0(),
        )
    }

    pub fn subscript(&mut self, receiver: NodeId, index: NodeId) -> NodeId {
        self.b.expr(Expr::Subscript { receiver, index }, span0())
    }

    pub fn binop(&mut self, op: BinaryOp, left: NodeId, right: NodeId) -> NodeId {
        self.b.expr(Expr::BinaryOp { left, right, op }, span0())
    }

    pub fn unary_minus(&mut self, inner: NodeId) -> NodeId {
        self.b.expr(Expr::UnaryMinus(inner), span0())
    }

    pub fn non_null(&mut self, inner: NodeId) -> NodeId {
        self.b.expr(Expr::NonNull(inner), span0())
    }

    pub fn trace(&mut self, inner: NodeId) -> NodeId {
        self.b.expr(Expr::Trace(inner), span0())
    }

    pub fn throw(&mut self, inner: NodeId) -> NodeId {
        self.b.expr(Expr::Throw(inner), span0())
    }

    pub fn if_(&mut self, condition: NodeId, then_branch: NodeId, else_branch: NodeId) -> NodeId {
        self.b.expr(
            Expr::If {
                condition,
                then_branch,
                else_branch,
            },
            span0(),
        )
    }

    pub fn let_(&mut self, name: &str, binding: NodeId, body: NodeId) -> NodeId {
        self.b.expr(
            Expr::Let {
                param: Param::untyped(name, span0()),
                binding,
                body,
            },
            span0(),
        )
    }

    pub fn lambda(&mut self, params: &[&str], body: NodeId) -> NodeId {
        self.b.expr(
            Expr::FunctionLiteral {
                params: params.iter().map(|p| Param::untyped(*p, span0())).collect(),
                body,
            },
            span0(),
        )
    }

    pub fn interpolated(&mut self, parts: Vec<pkl::cst::StringPart>) -> NodeId {
        self.b.expr(Expr::InterpolatedString { parts }, span0())
    }

    pub fn type_check(&mut self, expr: NodeId, ty: NodeId) -> NodeId {
        self.b.expr(Expr::TypeCheck { expr, ty }, span0())
    }

    pub fn type_cast(&mut self, expr: NodeId, ty: NodeId) -> NodeId {
        self.b.expr(Expr::TypeCast { expr, ty }, span0())
    }

    pub fn declared_type(&mut self, name: &str) -> NodeId {
        self.b.ty(
            pkl::cst::TypeNode::Declared {
                name: QualifiedName::from(name),
                args: vec![],
            },
            span0(),
        )
    }

    // --- object bodies -----------------------------------------------------

    pub fn body(&mut self, members: Vec<NodeId>) -> NodeId {
        self.b.add(
            NodeKind::ObjectBody {
                params: vec![],
                members,
            },
            span0(),
        )
    }

    pub fn prop(&mut self, name: &str, expr: NodeId) -> NodeId {
        self.b.member(
            MemberNode::Property {
                modifiers: Default::default(),
                name: name.to_owned(),
                ty: None,
                expr,
            },
            span0(),
        )
    }

    pub fn prop_body(&mut self, name: &str, bodies: Vec<NodeId>) -> NodeId {
        self.b.member(
            MemberNode::PropertyBody {
                modifiers: Default::default(),
                name: name.to_owned(),
                bodies,
            },
            span0(),
        )
    }

    pub fn element(&mut self, expr: NodeId) -> NodeId {
        self.b.member(MemberNode::Element(expr), span0())
    }

    pub fn entry(&mut self, key: NodeId, value: NodeId) -> NodeId {
        self.b.member(MemberNode::Entry { key, value }, span0())
    }

    pub fn predicate(&mut self, predicate: NodeId, expr: NodeId) -> NodeId {
        self.b.member(MemberNode::Predicate { predicate, expr }, span0())
    }

    pub fn spread(&mut self, expr: NodeId, is_nullable: bool) -> NodeId {
        self.b.member(MemberNode::Spread { expr, is_nullable }, span0())
    }

    pub fn when(&mut self, condition: NodeId, then_body: NodeId, else_body: Option<NodeId>) -> NodeId {
        self.b.member(
            MemberNode::When {
                condition,
                then_body,
                else_body,
            },
            span0(),
        )
    }

    pub fn for_(&mut self, key: &str, value: Option<&str>, source: NodeId, body: NodeId) -> NodeId {
        self.b.member(
            MemberNode::For {
                key_param: Param::untyped(key, span0()),
                value_param: value.map(|v| Param::untyped(v, span0())),
                source,
                body,
            },
            span0(),
        )
    }

    pub fn new_dynamic(&mut self, body: NodeId) -> NodeId {
        self.b.expr(Expr::New { ty: None, body }, span0())
    }

    pub fn new_typed(&mut self, class_name: &str, body: NodeId) -> NodeId {
        let ty = self.declared_type(class_name);
        self.b.expr(Expr::New { ty: Some(ty), body }, span0())
    }

    pub fn amend_expr(&mut self, parent: NodeId, body: NodeId) -> NodeId {
        self.b.expr(Expr::Amends { parent, body }, span0())
    }

    // --- module entries ----------------------------------------------------

    pub fn module_prop(&mut self, name: &str, expr: NodeId) -> NodeId {
        let entry = self.b.add(
            NodeKind::ClassPropertyExpr {
                doc: None,
                modifiers: Default::default(),
                name: name.to_owned(),
                ty: None,
                expr,
            },
            span0(),
        );
        self.entries.push(entry);
        entry
    }

    pub fn module_prop_typed(&mut self, name: &str, type_name: &str, expr: NodeId) -> NodeId {
        let ty = self.declared_type(type_name);
        let entry = self.b.add(
            NodeKind::ClassPropertyExpr {
                doc: None,
                modifiers: Default::default(),
                name: name.to_owned(),
                ty: Some(ty),
                expr,
            },
            span0(),
        );
        self.entries.push(entry);
        entry
    }

    /// Declares `class <name> [extends <superclass>] { <entries> }`.
    pub fn class(
        &mut self,
        name: &str,
        superclass: Option<&str>,
        open: bool,
        entries: Vec<NodeId>,
    ) -> NodeId {
        let mut modifiers = pkl::cst::Modifiers::NONE;
        modifiers.is_open = open;
        let entry = self.b.add(
            NodeKind::Class {
                doc: None,
                annotations: vec![],
                modifiers,
                name: name.to_owned(),
                type_params: vec![],
                superclass: superclass.map(QualifiedName::from),
                entries,
            },
            span0(),
        );
        self.entries.push(entry);
        entry
    }

    /// A `name: Type = expr` class entry (not registered at module level).
    pub fn class_prop_typed(&mut self, name: &str, type_name: &str, expr: NodeId) -> NodeId {
        let ty = self.declared_type(type_name);
        self.b.add(
            NodeKind::ClassPropertyExpr {
                doc: None,
                modifiers: Default::default(),
                name: name.to_owned(),
                ty: Some(ty),
                expr,
            },
            span0(),
        )
    }

    /// A `name = expr` class entry (not registered at module level).
    pub fn class_prop(&mut self, name: &str, expr: NodeId) -> NodeId {
        self.b.add(
            NodeKind::ClassPropertyExpr {
                doc: None,
                modifiers: Default::default(),
                name: name.to_owned(),
                ty: None,
                expr,
            },
            span0(),
        )
    }

    pub fn finish(mut self, uri: &str) -> Tree {
        let root = self.b.add(
            NodeKind::Module {
                decl: self.decl,
                imports: self.imports,
                entries: self.entries,
            },
            span0(),
        );
        self.b.finish(root, uri, "")
    }
}

/// Serves pre-built trees by URI, ignoring the source text.
#[derive(Debug, Default)]
pub struct MapParser {
    trees: RefCell<HashMap<String, Tree>>,
}

impl MapParser {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn insert(&self, uri: &str, tree: Tree) {
        self.trees.borrow_mut().insert(uri.to_owned(), tree);
    }
}

impl ModuleParser for MapParser {
    fn parse(&self, _source: &str, uri: &ModuleUri) -> Result<Tree, ParseError> {
        self.trees
            .borrow()
            .get(uri.as_str())
            .cloned()
            .ok_or_else(|| ParseError::new(Span::new(0, 0), format!("no fixture tree for `{uri}`")))
    }
}

/// Convenience: an evaluator whose parser serves one hand-built tree
/// under `repl:text`, ready for `evaluate_text`.
pub fn evaluator_for(tree: Tree) -> pkl::Evaluator {
    let parser = MapParser::new();
    parser.insert("repl:text", tree);
    pkl::EvaluatorBuilder::new()
        .with_parser(parser)
        .build()
        .expect("evaluator builds")
}

/// Evaluates a hand-built `repl:text` tree and returns the exported
/// module value.
pub fn eval_module(tree: Tree) -> Result<pkl::Exported, Box<pkl::EvalError>> {
    evaluator_for(tree).evaluate_text("fixture")
}

// =============================================================================
// FixtureParser: a tiny line-oriented parser
// =============================================================================

/// Parses the fixture module syntax used by resolver, analyzer, and
/// harness tests:
///
/// ```text
/// amends "pkl:test"
/// import "dep.pkl" as dep
/// import* "*.pkl" as all
/// name = <expr>
/// fact "group" <expr>
/// example "name" <expr>
/// ```
///
/// Expressions support literals, identifiers, qualified access, and
/// the `== != < <= > >= + - * /` operators, with real spans into the
/// source text (the harness slices fact sources out of it).
#[derive(Debug, Default)]
pub struct FixtureParser;

impl ModuleParser for FixtureParser {
    fn parse(&self, source: &str, uri: &ModuleUri) -> Result<Tree, ParseError> {
        FixtureState::parse_module(source, uri)
    }
}

struct FixtureState<'a> {
    b: TreeBuilder,
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
}

impl<'a> FixtureState<'a> {
    fn parse_module(source: &'a str, uri: &ModuleUri) -> Result<Tree, ParseError> {
        let mut state = FixtureState {
            b: TreeBuilder::new(),
            chars: source.chars().collect(),
            pos: 0,
            source,
        };
        let mut decl = None;
        let mut imports = Vec::new();
        let mut entries = Vec::new();
        let mut facts: Vec<(String, NodeId)> = Vec::new();
        let mut examples: Vec<(String, NodeId)> = Vec::new();

        loop {
            state.skip_whitespace();
            if state.pos >= state.chars.len() {
                break;
            }
            let start = state.pos;
            let word = state.ident()?;
            match word.as_str() {
                "amends" | "extends" => {
                    let target = state.string_literal()?;
                    let clause = if word == "amends" {
                        ModuleClause::Amends(target)
                    } else {
                        ModuleClause::Extends(target)
                    };
                    decl = Some(state.b.add(
                        NodeKind::ModuleDecl {
                            doc: None,
                            annotations: vec![],
                            modifiers: Default::default(),
                            name: None,
                            clause: Some(clause),
                        },
                        state.span_from(start),
                    ));
                }
                "import" => {
                    let is_glob = state.eat('*');
                    let target = state.string_literal()?;
                    let alias = state.alias()?;
                    imports.push(state.b.add(
                        NodeKind::Import {
                            uri: target,
                            is_glob,
                            alias,
                        },
                        state.span_from(start),
                    ));
                }
                "fact" => {
                    let group = state.string_literal()?;
                    let expr = state.expr()?;
                    facts.push((group, expr));
                }
                "example" => {
                    let name = state.string_literal()?;
                    let expr = state.expr()?;
                    examples.push((name, expr));
                }
                name => {
                    state.expect('=')?;
                    let expr = state.expr()?;
                    entries.push(state.b.add(
                        NodeKind::ClassPropertyExpr {
                            doc: None,
                            modifiers: Default::default(),
                            name: name.to_owned(),
                            ty: None,
                            expr,
                        },
                        state.span_from(start),
                    ));
                }
            }
        }

        if !facts.is_empty() {
            let entry = state.grouped_mapping("facts", facts);
            entries.push(entry);
        }
        if !examples.is_empty() {
            let entry = state.grouped_mapping("examples", examples);
            entries.push(entry);
        }

        let len = u32::try_from(state.chars.len()).unwrap_or(u32::MAX);
        let root = state.b.add(
            NodeKind::Module {
                decl,
                imports,
                entries,
            },
            Span::new(0, len),
        );
        Ok(state.b.finish(root, uri.as_str(), source))
    }

    /// Builds `facts`/`examples` as `new Mapping { ["group"] = new
    /// Listing { … } }` module properties.
    fn grouped_mapping(&mut self, property: &str, groups: Vec<(String, NodeId)>) -> NodeId {
        let mut grouped: Vec<(String, Vec<NodeId>)> = Vec::new();
        for (name, expr) in groups {
            if let Some((_, exprs)) = grouped.iter_mut().find(|(n, _)| *n == name) {
                exprs.push(expr);
            } else {
                grouped.push((name, vec![expr]));
            }
        }
        let mut entry_members = Vec::new();
        for (name, exprs) in grouped {
            let elements: Vec<NodeId> = exprs
                .into_iter()
                .map(|e| self.b.member(MemberNode::Element(e), span0()))
                .collect();
            let listing_body = self.b.add(
                NodeKind::ObjectBody {
                    params: vec![],
                    members: elements,
                },
                span0(),
            );
            let listing_ty = self.b.ty(
                pkl::cst::TypeNode::Declared {
                    name: QualifiedName::from("Listing"),
                    args: vec![],
                },
                span0(),
            );
            let listing = self.b.expr(
                Expr::New {
                    ty: Some(listing_ty),
                    body: listing_body,
                },
                span0(),
            );
            let key = self.b.expr(Expr::Str(name), span0());
            entry_members.push(self.b.member(MemberNode::Entry { key, value: listing }, span0()));
        }
        let mapping_body = self.b.add(
            NodeKind::ObjectBody {
                params: vec![],
                members: entry_members,
            },
            span0(),
        );
        let mapping_ty = self.b.ty(
            pkl::cst::TypeNode::Declared {
                name: QualifiedName::from("Mapping"),
                args: vec![],
            },
            span0(),
        );
        let mapping = self.b.expr(
            Expr::New {
                ty: Some(mapping_ty),
                body: mapping_body,
            },
            span0(),
        );
        self.b.add(
            NodeKind::ClassPropertyExpr {
                doc: None,
                modifiers: Default::default(),
                name: property.to_owned(),
                ty: None,
                expr: mapping,
            },
            span0(),
        )
    }

    // --- lexing helpers ----------------------------------------------------

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(Span::new(self.pos as u64, 1), message)
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start as u64, u32::try_from(self.pos - start).unwrap_or(u32::MAX))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn skip_spaces(&mut self) {
        while self.peek().is_some_and(|c| c == ' ' || c == '\t') {
            self.pos += 1;
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ParseError> {
        self.skip_spaces();
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{c}`")))
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        self.skip_spaces();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected an identifier"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn string_literal(&mut self) -> Result<String, ParseError> {
        self.skip_spaces();
        if !self.eat('"') {
            return Err(self.error("expected a string literal"));
        }
        let start = self.pos;
        while self.peek().is_some_and(|c| c != '"') {
            self.pos += 1;
        }
        if !self.eat('"') {
            return Err(self.error("unterminated string literal"));
        }
        Ok(self.chars[start..self.pos - 1].iter().collect())
    }

    fn alias(&mut self) -> Result<Option<String>, ParseError> {
        self.skip_spaces();
        let save = self.pos;
        if self.peek().is_some_and(|c| c.is_alphabetic()) {
            let word = self.ident()?;
            if word == "as" {
                return Ok(Some(self.ident()?));
            }
            self.pos = save;
        }
        Ok(None)
    }

    // --- expression parsing (precedence climbing) --------------------------

    fn expr(&mut self) -> Result<NodeId, ParseError> {
        self.skip_spaces();
        let start = self.pos;
        self.equality(start)
    }

    fn equality(&mut self, start: usize) -> Result<NodeId, ParseError> {
        let mut left = self.comparison(start)?;
        loop {
            self.skip_spaces();
            let op = if self.starts_with("==") {
                BinaryOp::Eq
            } else if self.starts_with("!=") {
                BinaryOp::Ne
            } else {
                return Ok(left);
            };
            self.pos += 2;
            self.skip_spaces();
            let right_start = self.pos;
            let right = self.comparison(right_start)?;
            left = self.binop_node(op, left, right, start);
        }
    }

    fn comparison(&mut self, start: usize) -> Result<NodeId, ParseError> {
        let mut left = self.additive(start)?;
        loop {
            self.skip_spaces();
            let (op, width) = if self.starts_with("<=") {
                (BinaryOp::Lte, 2)
            } else if self.starts_with(">=") {
                (BinaryOp::Gte, 2)
            } else if self.peek() == Some('<') {
                (BinaryOp::Lt, 1)
            } else if self.peek() == Some('>') {
                (BinaryOp::Gt, 1)
            } else {
                return Ok(left);
            };
            self.pos += width;
            self.skip_spaces();
            let right_start = self.pos;
            let right = self.additive(right_start)?;
            left = self.binop_node(op, left, right, start);
        }
    }

    fn additive(&mut self, start: usize) -> Result<NodeId, ParseError> {
        let mut left = self.multiplicative(start)?;
        loop {
            self.skip_spaces();
            let op = match self.peek() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            self.skip_spaces();
            let right_start = self.pos;
            let right = self.multiplicative(right_start)?;
            left = self.binop_node(op, left, right, start);
        }
    }

    fn multiplicative(&mut self, start: usize) -> Result<NodeId, ParseError> {
        let mut left = self.atom()?;
        loop {
            self.skip_spaces();
            let op = match self.peek() {
                Some('*') => BinaryOp::Mul,
                Some('/') => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.pos += 1;
            self.skip_spaces();
            let right = self.atom()?;
            left = self.binop_node(op, left, right, start);
        }
    }

    fn starts_with(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c))
    }

    fn binop_node(&mut self, op: BinaryOp, left: NodeId, right: NodeId, start: usize) -> NodeId {
        let span = self.span_from(start);
        self.b.expr(Expr::BinaryOp { left, right, op }, span)
    }

    fn atom(&mut self) -> Result<NodeId, ParseError> {
        self.skip_spaces();
        let start = self.pos;
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(')')?;
                Ok(self.b.expr(Expr::Parenthesized(inner), self.span_from(start)))
            }
            Some('"') => {
                let text = self.string_literal()?;
                Ok(self.b.expr(Expr::Str(text), self.span_from(start)))
            }
            Some(c) if c.is_ascii_digit() => {
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
                if self.peek() == Some('.') && self.chars.get(self.pos + 1).is_some_and(char::is_ascii_digit) {
                    self.pos += 1;
                    while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                        self.pos += 1;
                    }
                    let digits: String = self.chars[start..self.pos].iter().collect();
                    return Ok(self.b.expr(Expr::Float(digits), self.span_from(start)));
                }
                let digits: String = self.chars[start..self.pos].iter().collect();
                Ok(self.b.expr(Expr::Int(digits), self.span_from(start)))
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let word = self.ident()?;
                let node = match word.as_str() {
                    "true" => self.b.expr(Expr::Bool(true), self.span_from(start)),
                    "false" => self.b.expr(Expr::Bool(false), self.span_from(start)),
                    "null" => self.b.expr(Expr::Null, self.span_from(start)),
                    name => self.b.expr(
                        Expr::UnqualifiedAccess {
                            name: name.to_owned(),
                            args: None,
                        },
                        self.span_from(start),
                    ),
                };
                let mut node = node;
                while self.eat('.') {
                    let member = self.ident()?;
                    node = self.b.expr(
                        Expr::QualifiedAccess {
                            receiver: node,
                            name: member,
                            is_nullable: false,
                            args: None,
                        },
                        self.span_from(start),
                    );
                }
                Ok(node)
            }
            _ => Err(self.error("expected an expression")),
        }
    }
}
