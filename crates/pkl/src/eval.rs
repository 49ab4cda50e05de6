//! The lazy evaluator.
//!
//! One [`Machine`] is a single-threaded cooperative computation: it
//! walks CST expression nodes, materializes object members on demand
//! with per-object memoization, and threads the receiver chain
//! (`this`, `outer`, `module`) and the per-thunk `super` object through
//! every step. The timeout deadline is checked on an expression-step
//! counter and at every I/O suspension point.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    rc::Rc,
    sync::Arc,
};

use smallvec::SmallVec;

use crate::{
    amend,
    cache::ModuleCache,
    class::{ClassInfo, ClassSource, Classes, DeclaredProperty},
    cst::{BinaryOp, Expr, Modifiers, NodeId, NodeKind, StringPart, Tree},
    error::{EvalError, EvalResult, StackFrame},
    io::TraceWriter,
    object::{
        Env, ExprThunk, Member, MemberDef, MemberState, MethodDef, ObjRef, ObjectData, ObjectKind, Receivers, TypeRef,
    },
    ops,
    parser::{parse_with, ModuleParser},
    prepare::{self, CompiledModule},
    render,
    resolver::{ModuleResolver, ResolveContext},
    resource::EvalLimits,
    resources::ResourceReader,
    security::SecurityManager,
    stdlib, typecheck,
    uri::ModuleUri,
    value::{Exported, FunctionValue, Value},
};

/// How a `read` expression treats a missing resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadMode {
    /// `read`: missing is an error.
    Fail,
    /// `read?`: missing is `null`.
    NullIfMissing,
}

pub(crate) struct Machine {
    pub limits: EvalLimits,
    pub security: Rc<SecurityManager>,
    pub resolver: ModuleResolver,
    pub cache: Arc<ModuleCache>,
    pub parser: Rc<dyn ModuleParser>,
    pub classes: Classes,
    pub trace: Box<dyn TraceWriter>,
    pub readers: Vec<Rc<dyn ResourceReader>>,
    /// Instantiated module objects, by normalized URI.
    modules: RefCell<HashMap<String, ObjRef>>,
    /// URIs whose module objects are being built (amend/extend cycle
    /// detection).
    loading: RefCell<HashSet<String>>,
    /// Built class descriptors, keyed by `module-uri#ClassName`.
    module_classes: RefCell<HashMap<String, Rc<ClassInfo>>>,
    /// Class keys currently being built (extends-cycle detection).
    building_classes: RefCell<HashSet<String>>,
    /// The `super` object of each in-flight thunk evaluation.
    super_stack: Vec<Option<ObjRef>>,
}

impl Machine {
    pub fn new(
        limits: EvalLimits,
        security: Rc<SecurityManager>,
        resolver: ModuleResolver,
        cache: Arc<ModuleCache>,
        parser: Rc<dyn ModuleParser>,
        trace: Box<dyn TraceWriter>,
        readers: Vec<Rc<dyn ResourceReader>>,
    ) -> Self {
        Self {
            limits,
            security,
            resolver,
            cache,
            parser,
            classes: Classes::new(),
            trace,
            readers,
            modules: RefCell::new(HashMap::new()),
            loading: RefCell::new(HashSet::new()),
            module_classes: RefCell::new(HashMap::new()),
            building_classes: RefCell::new(HashSet::new()),
            super_stack: Vec::new(),
        }
    }

    pub fn ctx(&self) -> ResolveContext<'_> {
        ResolveContext {
            security: &self.security,
            limits: &self.limits,
        }
    }

    fn frame_for(tree: &Tree, id: NodeId) -> StackFrame {
        StackFrame {
            uri: tree.uri().to_owned(),
            location: tree.location(id),
            snippet: tree.snippet(tree.span(id)),
        }
    }

    // =========================================================================
    // Expression evaluation
    // =========================================================================

    pub fn eval(&mut self, tree: &Arc<Tree>, id: NodeId, env: &Env, recv: &Receivers) -> EvalResult<Value> {
        self.limits.on_step()?;
        match self.eval_inner(tree, id, env, recv) {
            Ok(value) => Ok(value),
            Err(mut error) => {
                // Innermost frame only; member/call boundaries add the rest.
                if error.frames().is_empty() {
                    error.push_frame(Self::frame_for(tree, id));
                }
                Err(error)
            }
        }
    }

    fn eval_inner(&mut self, tree: &Arc<Tree>, id: NodeId, env: &Env, recv: &Receivers) -> EvalResult<Value> {
        let expr = tree.expr(id).clone();
        match expr {
            Expr::This => recv
                .this()
                .ok_or_else(|| EvalError::name_error("`this` is not available here.")),
            Expr::Outer => recv
                .outer_object()
                .map(|o| Value::Object(Rc::clone(o)))
                .ok_or_else(|| EvalError::name_error("`outer` is not available here.")),
            Expr::Module => recv
                .module_object()
                .map(|o| Value::Object(Rc::clone(o)))
                .ok_or_else(|| EvalError::name_error("`module` is not available here.")),
            Expr::Null => Ok(Value::Null),
            Expr::Delete => Err(EvalError::type_error(
                "`delete` may only appear as the value of an object member.",
            )),
            Expr::Bool(b) => Ok(Value::Bool(b)),
            Expr::Int(digits) => crate::cst::parse_int_literal(&digits)
                .map(Value::Int)
                .ok_or_else(|| EvalError::arithmetic(format!("Integer literal `{digits}` is out of range."))),
            Expr::Float(digits) => crate::cst::parse_float_literal(&digits)
                .map(Value::Float)
                .ok_or_else(|| EvalError::arithmetic(format!("Invalid float literal `{digits}`."))),
            Expr::Str(text) => Ok(Value::string(text)),
            Expr::InterpolatedString { parts } => self.interpolate(tree, &parts, env, recv),
            Expr::InterpolatedMultiString { parts, indent } => {
                let joined = self.interpolate(tree, &parts, env, recv)?;
                let text = joined.as_str().expect("interpolation yields a string");
                Ok(Value::string(strip_indent(text, indent)))
            }
            Expr::Throw(inner) => {
                let value = self.eval(tree, inner, env, recv)?;
                let message = self.value_to_string(&value)?;
                Err(EvalError::user(message))
            }
            Expr::Trace(inner) => {
                let value = self.eval(tree, inner, env, recv)?;
                let rendered = self.value_to_string(&value)?;
                let snippet = tree.snippet(tree.span(inner));
                self.trace.trace(&format!("{snippet} = {rendered}"));
                Ok(value)
            }
            Expr::ImportExpr { uri, is_glob } => {
                let base = ModuleUri::parse(tree.uri())?;
                self.import_value(&base, &uri, is_glob)
            }
            Expr::Read(inner) => {
                let target = self.eval_to_string(tree, inner, env, recv)?;
                self.read_resource_value(tree, &target, ReadMode::Fail)
            }
            Expr::ReadNull(inner) => {
                let target = self.eval_to_string(tree, inner, env, recv)?;
                self.read_resource_value(tree, &target, ReadMode::NullIfMissing)
            }
            Expr::ReadGlob(inner) => {
                let target = self.eval_to_string(tree, inner, env, recv)?;
                self.read_glob_value(tree, &target, recv)
            }
            Expr::UnqualifiedAccess { name, args } => match args {
                None => self.unqualified_property(tree, &name, env, recv),
                Some(arg_ids) => {
                    let args = self.eval_args(tree, &arg_ids, env, recv)?;
                    self.unqualified_call(tree, id, &name, args, env, recv)
                }
            },
            Expr::QualifiedAccess {
                receiver,
                name,
                is_nullable,
                args,
            } => {
                let value = self.eval(tree, receiver, env, recv)?;
                if value.is_null() && is_nullable {
                    return Ok(Value::Null);
                }
                match args {
                    None => self.value_property(tree, &value, &name),
                    Some(arg_ids) => {
                        let args = self.eval_args(tree, &arg_ids, env, recv)?;
                        self.value_method(tree, id, &value, &name, args, recv)
                    }
                }
            }
            Expr::SuperAccess { name, args } => self.super_access(tree, id, &name, args.as_deref(), env, recv),
            Expr::SuperSubscript { index } => {
                let index_value = self.eval(tree, index, env, recv)?;
                let super_obj = self
                    .current_super()
                    .ok_or_else(|| EvalError::name_error("`super` is not available here."))?;
                let this_obj = recv
                    .this_object()
                    .cloned()
                    .ok_or_else(|| EvalError::name_error("`this` is not available here."))?;
                match (&index_value, super_obj.kind) {
                    (Value::Int(i), _) if !super_obj.elements.borrow().is_empty() || super_obj.kind == ObjectKind::Listing => {
                        let index = usize::try_from(*i).ok().and_then(|i| super_obj.element(i)).ok_or_else(|| {
                            EvalError::type_error(format!("Element index {i} is out of bounds."))
                        })?;
                        self.force_member(&this_obj, &index.fresh_copy(), "super element")
                    }
                    _ => {
                        let member = super_obj.entry(&index_value).ok_or_else(|| {
                            EvalError::name_error(format!(
                                "Cannot find an entry with key `{}`.",
                                index_value.display_scalar().unwrap_or_else(|| index_value.type_name())
                            ))
                        })?;
                        self.force_member(&this_obj, &member.fresh_copy(), "super entry")
                    }
                }
            }
            Expr::Subscript { receiver, index } => {
                let receiver_value = self.eval(tree, receiver, env, recv)?;
                let index_value = self.eval(tree, index, env, recv)?;
                self.subscript(&receiver_value, &index_value)
            }
            Expr::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond = self.eval(tree, condition, env, recv)?;
                match cond.as_bool() {
                    Some(true) => self.eval(tree, then_branch, env, recv),
                    Some(false) => self.eval(tree, else_branch, env, recv),
                    None => Err(EvalError::type_error(format!(
                        "Expected a `Boolean` condition, but got a value of type `{}`.",
                        cond.type_name()
                    ))),
                }
            }
            Expr::Let { param, binding, body } => {
                let bound = self.eval(tree, binding, env, recv)?;
                if let Some(ty) = param.ty {
                    let type_ref = TypeRef {
                        tree: Arc::clone(tree),
                        node: ty,
                        env: env.clone(),
                    };
                    typecheck::check(self, &bound, &type_ref, recv)?;
                }
                let inner = env.bind(param.name, bound);
                self.eval(tree, body, &inner, recv)
            }
            Expr::FunctionLiteral { params, body } => Ok(Value::Function(Rc::new(FunctionValue {
                params,
                body,
                tree: Arc::clone(tree),
                env: env.clone(),
                receivers: recv.clone(),
            }))),
            Expr::Parenthesized(inner) => self.eval(tree, inner, env, recv),
            Expr::New { ty, body } => {
                let class = match ty {
                    None => Rc::clone(&self.classes.dynamic),
                    Some(ty) => typecheck::resolve_new_class(self, tree, ty, env, recv)?,
                };
                if class.is_abstract() {
                    return Err(EvalError::type_error(format!(
                        "Cannot instantiate abstract class `{}`.",
                        class.name
                    )));
                }
                let value = amend::instantiate_new(self, &class, Some((Arc::clone(tree), body)), env, recv)?;
                Ok(Value::Object(value))
            }
            Expr::Amends { parent, body } => {
                let parent_value = self.eval(tree, parent, env, recv)?;
                let Some(parent_obj) = parent_value.as_object() else {
                    return Err(EvalError::type_error(format!(
                        "Cannot amend a value of type `{}`.",
                        parent_value.type_name()
                    )));
                };
                let child = amend::amend_object(self, parent_obj, (Arc::clone(tree), body), env, recv)?;
                Ok(Value::Object(child))
            }
            Expr::NonNull(inner) => {
                let value = self.eval(tree, inner, env, recv)?;
                if value.is_null() {
                    Err(EvalError::type_error("Expected a non-null value, but got `null`."))
                } else {
                    Ok(value)
                }
            }
            Expr::UnaryMinus(inner) => {
                let value = self.eval(tree, inner, env, recv)?;
                match value {
                    Value::Int(i) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| EvalError::arithmetic(format!("Integer overflow computing `-({i})`."))),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    Value::Duration(d) => Ok(Value::Duration(crate::types::Duration::new(-d.value, d.unit))),
                    Value::DataSize(d) => Ok(Value::DataSize(crate::types::DataSize::new(-d.value, d.unit))),
                    other => Err(EvalError::type_error(format!(
                        "Operator `-` is not defined for a value of type `{}`.",
                        other.type_name()
                    ))),
                }
            }
            Expr::LogicalNot(inner) => {
                let value = self.eval(tree, inner, env, recv)?;
                value.as_bool().map(|b| Value::Bool(!b)).ok_or_else(|| {
                    EvalError::type_error(format!(
                        "Operator `!` is not defined for a value of type `{}`.",
                        value.type_name()
                    ))
                })
            }
            Expr::BinaryOp { left, right, op } => self.binary_op(tree, op, left, right, env, recv),
            Expr::TypeCheck { expr, ty } => {
                let value = self.eval(tree, expr, env, recv)?;
                let matched = typecheck::matches(self, &value, tree, ty, env, recv)?;
                Ok(Value::Bool(matched))
            }
            Expr::TypeCast { expr, ty } => {
                let value = self.eval(tree, expr, env, recv)?;
                if typecheck::matches(self, &value, tree, ty, env, recv)? {
                    Ok(value)
                } else {
                    Err(EvalError::type_error(format!(
                        "Expected a value of type `{}`, but got a value of type `{}`.",
                        typecheck::render_type(tree, ty),
                        value.type_name()
                    )))
                }
            }
        }
    }

    fn binary_op(
        &mut self,
        tree: &Arc<Tree>,
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
        env: &Env,
        recv: &Receivers,
    ) -> EvalResult<Value> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let lhs = self.eval(tree, left, env, recv)?;
                let Some(l) = lhs.as_bool() else {
                    return Err(EvalError::type_error(format!(
                        "Operator `{op}` expects `Boolean` operands, but got a value of type `{}`.",
                        lhs.type_name()
                    )));
                };
                if (op == BinaryOp::And && !l) || (op == BinaryOp::Or && l) {
                    return Ok(Value::Bool(l));
                }
                let rhs = self.eval(tree, right, env, recv)?;
                rhs.as_bool().map(Value::Bool).ok_or_else(|| {
                    EvalError::type_error(format!(
                        "Operator `{op}` expects `Boolean` operands, but got a value of type `{}`.",
                        rhs.type_name()
                    ))
                })
            }
            // `??` recovers only from null, never from errors.
            BinaryOp::NullCoalesce => {
                let lhs = self.eval(tree, left, env, recv)?;
                if lhs.is_null() {
                    self.eval(tree, right, env, recv)
                } else {
                    Ok(lhs)
                }
            }
            BinaryOp::Pipe => {
                let lhs = self.eval(tree, left, env, recv)?;
                let rhs = self.eval(tree, right, env, recv)?;
                match rhs {
                    Value::Function(f) => self.apply_function(&f, vec![lhs]),
                    other => Err(EvalError::type_error(format!(
                        "Operator `|>` expects a `Function` on the right, but got a value of type `{}`.",
                        other.type_name()
                    ))),
                }
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                let lhs = self.eval(tree, left, env, recv)?;
                let rhs = self.eval(tree, right, env, recv)?;
                let equal = self.deep_equals(&lhs, &rhs)?;
                Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
            }
            _ => {
                let lhs = self.eval(tree, left, env, recv)?;
                let rhs = self.eval(tree, right, env, recv)?;
                ops::binary(op, &lhs, &rhs)
            }
        }
    }

    fn interpolate(&mut self, tree: &Arc<Tree>, parts: &[StringPart], env: &Env, recv: &Receivers) -> EvalResult<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                StringPart::Literal(text) => out.push_str(text),
                StringPart::Interpolation(id) => {
                    let value = self.eval(tree, *id, env, recv)?;
                    out.push_str(&self.value_to_string(&value)?);
                }
            }
        }
        Ok(Value::string(out))
    }

    fn eval_args(&mut self, tree: &Arc<Tree>, ids: &[NodeId], env: &Env, recv: &Receivers) -> EvalResult<Vec<Value>> {
        ids.iter().map(|id| self.eval(tree, *id, env, recv)).collect()
    }

    fn eval_to_string(&mut self, tree: &Arc<Tree>, id: NodeId, env: &Env, recv: &Receivers) -> EvalResult<String> {
        let value = self.eval(tree, id, env, recv)?;
        value.as_str().map(str::to_owned).ok_or_else(|| {
            EvalError::type_error(format!(
                "Expected a `String`, but got a value of type `{}`.",
                value.type_name()
            ))
        })
    }

    // =========================================================================
    // Name resolution
    // =========================================================================

    fn unqualified_property(&mut self, tree: &Arc<Tree>, name: &str, env: &Env, recv: &Receivers) -> EvalResult<Value> {
        let _ = tree;
        if let Some(value) = env.lookup(name) {
            return Ok(value);
        }
        // Value receiver (member predicates) participates first.
        if let Some(Value::Object(obj)) = &recv.this_value {
            if let Some(member) = obj.visible_property(name) {
                return self.force_member(&Rc::clone(obj), &member, name);
            }
        }
        for obj in recv.chain.clone() {
            if let Some(member) = obj.visible_property(name) {
                return self.force_member(&obj, &member, name);
            }
        }
        if let Some(module) = recv.module_object().cloned() {
            if let Some(class) = self.class_for(&module, name)? {
                return Ok(Value::Class(class));
            }
            if let Some(alias) = self.alias_for(&module, name)? {
                return Ok(Value::TypeAlias(alias));
            }
        }
        if let Some(value) = stdlib::global_value(self, name)? {
            return Ok(value);
        }
        Err(EvalError::name_error(format!("Cannot resolve identifier `{name}`.")))
    }

    fn unqualified_call(
        &mut self,
        tree: &Arc<Tree>,
        id: NodeId,
        name: &str,
        args: Vec<Value>,
        env: &Env,
        recv: &Receivers,
    ) -> EvalResult<Value> {
        if let Some(value) = env.lookup(name) {
            return match value {
                Value::Function(f) => self.with_call_frame(tree, id, |m| m.apply_function(&f, args)),
                other => Err(EvalError::type_error(format!(
                    "`{name}` is not a `Function` (it is a value of type `{}`).",
                    other.type_name()
                ))),
            };
        }
        for obj in recv.chain.clone() {
            if let Some(method) = obj.method(name) {
                return self.with_call_frame(tree, id, |m| m.call_method(&obj, &method, args));
            }
        }
        if let Some(value) = stdlib::call_global(self, name, &args)? {
            return Ok(value);
        }
        Err(EvalError::name_error(format!("Cannot resolve method `{name}`.")))
    }

    fn with_call_frame<T>(
        &mut self,
        tree: &Arc<Tree>,
        id: NodeId,
        f: impl FnOnce(&mut Self) -> EvalResult<T>,
    ) -> EvalResult<T> {
        f(self).map_err(|mut e| {
            e.push_frame(Self::frame_for(tree, id));
            e
        })
    }

    fn value_property(&mut self, tree: &Arc<Tree>, value: &Value, name: &str) -> EvalResult<Value> {
        let _ = tree;
        if let Value::Object(obj) = value {
            if let Some(member) = obj.visible_property(name) {
                return self.force_member(&Rc::clone(obj), &member, name);
            }
        }
        if let Some(result) = stdlib::value_property(self, value, name)? {
            return Ok(result);
        }
        Err(self.missing_property_error(value, name))
    }

    fn missing_property_error(&self, value: &Value, name: &str) -> Box<EvalError> {
        match value {
            Value::Object(obj) => {
                let mut names = obj.visible_property_names();
                names.sort();
                EvalError::name_error(format!(
                    "Object of type `{}` does not have a property named `{name}`. Available properties: [{}]",
                    obj.class.name,
                    names.join(", ")
                ))
            }
            other => EvalError::name_error(format!(
                "Value of type `{}` does not have a property named `{name}`.",
                other.type_name()
            )),
        }
    }

    fn value_method(
        &mut self,
        tree: &Arc<Tree>,
        id: NodeId,
        value: &Value,
        name: &str,
        args: Vec<Value>,
        recv: &Receivers,
    ) -> EvalResult<Value> {
        if let Value::Object(obj) = value {
            if let Some(method) = obj.method(name) {
                let obj = Rc::clone(obj);
                return self.with_call_frame(tree, id, |m| m.call_method(&obj, &method, args));
            }
        }
        if let Value::Function(f) = value {
            if name == "apply" {
                let f = Rc::clone(f);
                return self.with_call_frame(tree, id, |m| m.apply_function(&f, args));
            }
        }
        if let Some(result) = stdlib::value_method(self, value, name, &args, recv)? {
            return Ok(result);
        }
        Err(EvalError::name_error(format!(
            "Value of type `{}` does not have a method named `{name}`.",
            value.type_name()
        )))
    }

    fn super_access(
        &mut self,
        tree: &Arc<Tree>,
        id: NodeId,
        name: &str,
        args: Option<&[NodeId]>,
        env: &Env,
        recv: &Receivers,
    ) -> EvalResult<Value> {
        let super_obj = self
            .current_super()
            .ok_or_else(|| EvalError::name_error("`super` is not available here."))?;
        let this_obj = recv
            .this_object()
            .cloned()
            .ok_or_else(|| EvalError::name_error("`this` is not available here."))?;
        match args {
            None => {
                let member = super_obj.visible_property(name).ok_or_else(|| {
                    self.missing_property_error(&Value::Object(Rc::clone(&super_obj)), name)
                })?;
                // Evaluate the parent's definition, but against the
                // current receiver chain: late binding threads `this`
                // to the youngest object.
                self.force_member(&this_obj, &member.fresh_copy(), name)
            }
            Some(arg_ids) => {
                let args = self.eval_args(tree, arg_ids, env, recv)?;
                let method = super_obj.method(name).ok_or_else(|| {
                    EvalError::name_error(format!(
                        "Object of type `{}` does not have a method named `{name}`.",
                        super_obj.class.name
                    ))
                })?;
                self.with_call_frame(tree, id, |m| m.call_method(&this_obj, &method, args))
            }
        }
    }

    fn subscript(&mut self, receiver: &Value, index: &Value) -> EvalResult<Value> {
        match receiver {
            Value::Object(obj) => match obj.kind {
                ObjectKind::Listing => self.element_at(obj, index),
                ObjectKind::Mapping => self.entry_at(obj, index),
                _ => {
                    if let Value::Int(i) = index {
                        if usize::try_from(*i).map(|i| i < obj.element_count()).unwrap_or(false) {
                            return self.element_at(obj, index);
                        }
                    }
                    self.entry_at(obj, index)
                }
            },
            Value::List(items) => {
                let i = self.list_index(index, items.len())?;
                Ok(items[i].clone())
            }
            Value::Bytes(bytes) => {
                let i = self.list_index(index, bytes.len())?;
                Ok(Value::Int(i64::from(bytes[i])))
            }
            Value::Map(map) => map.get(index).cloned().ok_or_else(|| {
                EvalError::name_error(format!(
                    "Cannot find an entry with key `{}`.",
                    index.display_scalar().unwrap_or_else(|| index.type_name())
                ))
            }),
            Value::Str(s) => {
                let i = self.list_index(index, s.chars().count())?;
                let c = s.chars().nth(i).expect("index checked against length");
                Ok(Value::string(c.to_string()))
            }
            other => Err(EvalError::type_error(format!(
                "Values of type `{}` cannot be subscripted.",
                other.type_name()
            ))),
        }
    }

    fn list_index(&self, index: &Value, len: usize) -> EvalResult<usize> {
        let Value::Int(i) = index else {
            return Err(EvalError::type_error(format!(
                "Expected an `Int` index, but got a value of type `{}`.",
                index.type_name()
            )));
        };
        usize::try_from(*i).ok().filter(|i| *i < len).ok_or_else(|| {
            EvalError::type_error(format!("Element index {i} is out of bounds (length {len})."))
        })
    }

    fn element_at(&mut self, obj: &ObjRef, index: &Value) -> EvalResult<Value> {
        let Value::Int(i) = index else {
            return Err(EvalError::type_error(format!(
                "Expected an `Int` index, but got a value of type `{}`.",
                index.type_name()
            )));
        };
        let member = usize::try_from(*i).ok().and_then(|i| obj.element(i)).ok_or_else(|| {
            EvalError::type_error(format!(
                "Element index {i} is out of bounds (length {}).",
                obj.element_count()
            ))
        })?;
        self.force_member(obj, &member, &format!("[{i}]"))
    }

    fn entry_at(&mut self, obj: &ObjRef, key: &Value) -> EvalResult<Value> {
        let member = obj.entry(key).ok_or_else(|| {
            EvalError::name_error(format!(
                "Cannot find an entry with key `{}`.",
                key.display_scalar().unwrap_or_else(|| key.type_name())
            ))
        })?;
        self.force_member(obj, &member, "entry")
    }

    // =========================================================================
    // Member forcing and memoization
    // =========================================================================

    pub fn current_super(&self) -> Option<ObjRef> {
        self.super_stack.last().cloned().flatten()
    }

    /// Forces a member's value with memoization and cycle detection.
    ///
    /// `owner` fixes the receiver chain the member's thunk evaluates
    /// against; the transition `Unevaluated → InFlight → Computed` is
    /// guarded by the member's cell, and observing `InFlight` on entry
    /// is the cycle error.
    pub fn force_member(&mut self, owner: &ObjRef, member: &Member, label: &str) -> EvalResult<Value> {
        {
            let state = member.state.borrow();
            match &*state {
                MemberState::Computed(value) => return Ok(value.clone()),
                MemberState::InFlight => return Err(EvalError::stack_overflow()),
                MemberState::Unevaluated => {}
            }
        }
        *member.state.borrow_mut() = MemberState::InFlight;
        let result = self.compute_member(owner, member, label);
        match result {
            Ok(value) => {
                *member.state.borrow_mut() = MemberState::Computed(value.clone());
                Ok(value)
            }
            Err(error) => {
                // Reset so that retained objects fail identically on
                // re-access rather than reporting a bogus cycle.
                *member.state.borrow_mut() = MemberState::Unevaluated;
                Err(error)
            }
        }
    }

    fn compute_member(&mut self, owner: &ObjRef, member: &Member, label: &str) -> EvalResult<Value> {
        let recv = Receivers::for_object(owner);
        let value = match &member.def {
            MemberDef::Expr(thunk) => {
                let thunk = thunk.clone();
                self.super_stack.push(thunk.super_obj.clone());
                let result = self.eval(&thunk.tree, thunk.expr, &thunk.env, &recv);
                self.super_stack.pop();
                result.map_err(|mut e| {
                    e.push_frame(Self::frame_for(&thunk.tree, thunk.expr));
                    e
                })?
            }
            MemberDef::Amend { base, bodies, env } => {
                let (base, bodies, env) = (base.clone(), bodies.clone(), env.clone());
                let mut value = self.force_member(owner, &base, label)?;
                for body in bodies {
                    let Some(parent_obj) = value.as_object() else {
                        return Err(EvalError::type_error(format!(
                            "Cannot amend `{label}`: it is a value of type `{}`.",
                            value.type_name()
                        )));
                    };
                    let child = amend::amend_object(self, parent_obj, body, &env, &recv)?;
                    value = Value::Object(child);
                }
                value
            }
            MemberDef::Value(value) => value.clone(),
            MemberDef::Import { target, is_glob, base } => {
                let (target, is_glob, base) = (target.clone(), *is_glob, base.clone());
                self.import_value(&base, &target, is_glob)?
            }
            MemberDef::Undefined { name } => {
                return Err(EvalError::type_error(format!(
                    "Property `{name}` is declared but has no value."
                )));
            }
            MemberDef::Deleted => {
                return Err(EvalError::name_error(format!("Member `{label}` has been deleted.")));
            }
        };
        if let Some(ty) = &member.ty {
            let ty = ty.clone();
            typecheck::check(self, &value, &ty, &recv)?;
        }
        Ok(value)
    }

    // =========================================================================
    // Calls
    // =========================================================================

    pub fn apply_function(&mut self, function: &FunctionValue, args: Vec<Value>) -> EvalResult<Value> {
        if function.params.len() != args.len() {
            return Err(EvalError::type_error(format!(
                "Expected {} argument(s), but got {}.",
                function.params.len(),
                args.len()
            )));
        }
        let mut env = function.env.clone();
        for (param, arg) in function.params.iter().zip(args) {
            if let Some(ty) = param.ty {
                let type_ref = TypeRef {
                    tree: Arc::clone(&function.tree),
                    node: ty,
                    env: function.env.clone(),
                };
                typecheck::check(self, &arg, &type_ref, &function.receivers)?;
            }
            env = env.bind(param.name.clone(), arg);
        }
        let tree = Arc::clone(&function.tree);
        let receivers = function.receivers.clone();
        self.eval(&tree, function.body, &env, &receivers)
    }

    pub fn call_method(&mut self, this_obj: &ObjRef, method: &Rc<MethodDef>, args: Vec<Value>) -> EvalResult<Value> {
        if method.params.len() != args.len() {
            return Err(EvalError::type_error(format!(
                "Method `{}` expects {} argument(s), but got {}.",
                method.name,
                method.params.len(),
                args.len()
            )));
        }
        let recv = Receivers::for_object(this_obj);
        let mut env = method.env.clone();
        for (param, arg) in method.params.iter().zip(args) {
            if let Some(ty) = param.ty {
                let type_ref = TypeRef {
                    tree: Arc::clone(&method.tree),
                    node: ty,
                    env: method.env.clone(),
                };
                typecheck::check(self, &arg, &type_ref, &recv)?;
            }
            env = env.bind(param.name.clone(), arg);
        }
        self.super_stack.push(None);
        let result = self.eval(&Arc::clone(&method.tree), method.body, &env, &recv);
        self.super_stack.pop();
        if let (Ok(value), Some(ty)) = (&result, method.return_ty) {
            let type_ref = TypeRef {
                tree: Arc::clone(&method.tree),
                node: ty,
                env: method.env.clone(),
            };
            typecheck::check(self, value, &type_ref, &recv)?;
        }
        result
    }

    // =========================================================================
    // Modules
    // =========================================================================

    /// Loads (compiling and instantiating as needed) the module at `uri`.
    pub fn load_module(&mut self, uri: &ModuleUri, importer: Option<&ModuleUri>) -> EvalResult<ObjRef> {
        if let Some(importer) = importer {
            self.security.check_import(importer, uri)?;
        }
        if let Some(obj) = self.modules.borrow().get(uri.as_str()) {
            return Ok(Rc::clone(obj));
        }
        if uri.scheme() == "pkl" {
            self.security.check_module(uri)?;
            let module = stdlib::instantiate_module(self, uri)?;
            self.modules.borrow_mut().insert(uri.as_str().to_owned(), Rc::clone(&module));
            return Ok(module);
        }
        let compiled = self.compile_module(uri)?;
        self.instantiate_module(&compiled, uri)
    }

    fn compile_module(&mut self, uri: &ModuleUri) -> EvalResult<Arc<CompiledModule>> {
        if let Some(compiled) = self.cache.begin(uri.as_str())? {
            return Ok(compiled);
        }
        let result = self.compile_module_uncached(uri);
        self.cache.complete(uri.as_str(), &result);
        result
    }

    fn compile_module_uncached(&mut self, uri: &ModuleUri) -> EvalResult<Arc<CompiledModule>> {
        self.limits.check_deadline()?;
        let key = self.resolver.create_key(uri)?;
        let resolved = key.resolve(&self.ctx())?;
        let canonical = resolved.uri().clone();
        let source = resolved.load_source(&self.ctx())?;
        let tree = Arc::new(parse_with(self.parser.as_ref(), &source, &canonical)?);
        self.cache.note_parsed(uri.as_str(), Arc::clone(&tree));
        prepare::compile(canonical, tree)
    }

    fn instantiate_module(&mut self, compiled: &Arc<CompiledModule>, requested: &ModuleUri) -> EvalResult<ObjRef> {
        let canonical = compiled.uri.as_str().to_owned();
        let existing = self.modules.borrow().get(&canonical).cloned();
        if let Some(obj) = existing {
            self.modules.borrow_mut().insert(requested.as_str().to_owned(), Rc::clone(&obj));
            return Ok(obj);
        }
        if !self.loading.borrow_mut().insert(canonical.clone()) {
            return Err(EvalError::resolve(format!(
                "Cycle detected while loading module `{canonical}`."
            )));
        }
        let result = self.instantiate_module_inner(compiled);
        self.loading.borrow_mut().remove(&canonical);
        let module = result?;
        let mut modules = self.modules.borrow_mut();
        modules.insert(canonical, Rc::clone(&module));
        modules.insert(requested.as_str().to_owned(), Rc::clone(&module));
        Ok(module)
    }

    fn instantiate_module_inner(&mut self, compiled: &Arc<CompiledModule>) -> EvalResult<ObjRef> {
        let tree = Arc::clone(&compiled.tree);
        let is_amends = matches!(compiled.clause, Some(crate::cst::ModuleClause::Amends(_)));
        let parent = match compiled.parent_uri() {
            Some(target) => {
                let target_uri = self.resolver.resolve_reference(&compiled.uri, target)?;
                Some(self.load_module(&target_uri, Some(&compiled.uri))?)
            }
            None => None,
        };

        let module_name = compiled
            .name
            .clone()
            .or_else(|| compiled.uri.last_segment().map(|s| s.trim_end_matches(".pkl").to_owned()))
            .unwrap_or_else(|| compiled.uri.as_str().to_owned());
        let superclass = parent
            .as_ref()
            .map(|p| Rc::clone(&p.class))
            .unwrap_or_else(|| Rc::clone(&self.classes.module));
        let class = Rc::new(ClassInfo {
            name: module_name,
            modifiers: Modifiers::open(),
            superclass: Some(superclass),
            instance_kind: ObjectKind::Module,
            declared: Default::default(),
            source: None,
            prototype: RefCell::new(None),
        });

        let module = ObjectData::new_module(
            class,
            parent.clone(),
            Some(Arc::clone(compiled)),
            compiled.uri.as_str().to_owned(),
        );

        if let Some(parent) = &parent {
            amend::inherit_members(&module, parent);
        }

        // Import bindings come first so module entries may shadow them.
        for import in &compiled.imports {
            let Some(name) = import.binding_name() else {
                continue;
            };
            let member = Member::new(
                Modifiers::local(),
                None,
                MemberDef::Import {
                    target: import.uri.clone(),
                    is_glob: import.is_glob,
                    base: compiled.uri.clone(),
                },
            );
            module.set_property(name, member);
        }

        for entry in &compiled.properties {
            self.apply_module_entry(&module, compiled, &tree, *entry, is_amends && parent.is_some())?;
        }
        Ok(module)
    }

    fn apply_module_entry(
        &mut self,
        module: &ObjRef,
        compiled: &Arc<CompiledModule>,
        tree: &Arc<Tree>,
        entry: NodeId,
        amends_strictly: bool,
    ) -> EvalResult<()> {
        let parent = module.parent.clone();
        match tree.kind(entry).clone() {
            NodeKind::ClassProperty { modifiers, name, ty, .. } => {
                let type_ref = TypeRef {
                    tree: Arc::clone(tree),
                    node: ty,
                    env: Env::default(),
                };
                let def = match module.property(&name) {
                    Some(existing) => existing.def,
                    None => MemberDef::Undefined { name: name.clone() },
                };
                module.set_property(name, Member::new(modifiers, Some(type_ref), def));
            }
            NodeKind::ClassPropertyExpr {
                modifiers, name, ty, expr, ..
            } => {
                let existing = module.property(&name);
                if let Some(existing) = &existing {
                    check_overridable(&name, existing)?;
                } else if amends_strictly {
                    return Err(EvalError::type_error(format!(
                        "Cannot define new property `{name}` in a module that amends another module."
                    )));
                }
                let ty_ref = ty.map(|node| TypeRef {
                    tree: Arc::clone(tree),
                    node,
                    env: Env::default(),
                });
                let inherited_ty = existing.as_ref().and_then(|m| m.ty.clone());
                let member = Member::new(
                    modifiers,
                    ty_ref.or(inherited_ty),
                    MemberDef::Expr(ExprThunk {
                        tree: Arc::clone(tree),
                        expr,
                        env: Env::default(),
                        super_obj: parent,
                    }),
                );
                module.set_property(name, member);
            }
            NodeKind::ClassPropertyBody { modifiers, name, bodies, .. } => {
                let base = match module.property(&name) {
                    Some(existing) => {
                        check_overridable(&name, &existing)?;
                        existing.fresh_copy()
                    }
                    None if amends_strictly => {
                        return Err(EvalError::type_error(format!(
                            "Cannot define new property `{name}` in a module that amends another module."
                        )));
                    }
                    None => Member::new(Modifiers::NONE, None, MemberDef::Undefined { name: name.clone() }),
                };
                let member = Member::new(
                    modifiers,
                    base.ty.clone(),
                    MemberDef::Amend {
                        base: Box::new(base),
                        bodies: bodies.iter().map(|b| (Arc::clone(tree), *b)).collect(),
                        env: Env::default(),
                    },
                );
                module.set_property(name, member);
            }
            NodeKind::ClassMethod {
                modifiers,
                name,
                params,
                return_ty,
                body,
                ..
            } => {
                if let Some(body) = body {
                    module.methods.borrow_mut().insert(
                        name.clone(),
                        Rc::new(MethodDef {
                            modifiers,
                            name,
                            params,
                            return_ty,
                            body,
                            tree: Arc::clone(tree),
                            env: Env::default(),
                        }),
                    );
                }
            }
            other => {
                let _ = compiled;
                return Err(EvalError::parse(format!("Unexpected module entry: {other:?}.")));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Classes
    // =========================================================================

    /// The class named `name` declared by (or imported into) `module`.
    pub fn class_for(&mut self, module: &ObjRef, name: &str) -> EvalResult<Option<Rc<ClassInfo>>> {
        if let Some(builtin) = self.classes.by_name(name) {
            return Ok(Some(Rc::clone(builtin)));
        }
        let Some(compiled) = module.compiled.clone() else {
            return Ok(None);
        };
        let key = format!("{}#{name}", compiled.uri);
        if let Some(class) = self.module_classes.borrow().get(&key) {
            return Ok(Some(Rc::clone(class)));
        }
        let Some(node) = compiled.classes.get(name).copied() else {
            // Walk the module amend/extend chain.
            if let Some(parent) = module.parent.clone() {
                return self.class_for(&parent, name);
            }
            return Ok(None);
        };
        let tree = Arc::clone(&compiled.tree);
        let NodeKind::Class {
            modifiers,
            name: class_name,
            superclass,
            entries,
            ..
        } = tree.kind(node).clone()
        else {
            return Err(EvalError::parse(format!("Node for class `{name}` is not a class.")));
        };
        if !self.building_classes.borrow_mut().insert(key.clone()) {
            return Err(EvalError::type_error(format!(
                "Class `{name}` extends itself (directly or transitively)."
            )));
        }
        let superclass_result = self.resolve_superclass(module, superclass.as_ref());
        self.building_classes.borrow_mut().remove(&key);
        let superclass = superclass_result?;
        if !superclass.is_open() && superclass.source.is_some() {
            return Err(EvalError::type_error(format!(
                "Cannot extend class `{}` because it is not declared `open`.",
                superclass.name
            )));
        }
        let mut declared = indexmap::IndexMap::default();
        for entry in &entries {
            match tree.kind(*entry) {
                NodeKind::ClassProperty { modifiers, name, ty, .. } => {
                    declared.insert(
                        name.clone(),
                        DeclaredProperty {
                            modifiers: *modifiers,
                            ty: Some(TypeRef {
                                tree: Arc::clone(&tree),
                                node: *ty,
                                env: Env::default(),
                            }),
                        },
                    );
                }
                NodeKind::ClassPropertyExpr { modifiers, name, ty, .. } => {
                    declared.insert(
                        name.clone(),
                        DeclaredProperty {
                            modifiers: *modifiers,
                            ty: ty.map(|node| TypeRef {
                                tree: Arc::clone(&tree),
                                node,
                                env: Env::default(),
                            }),
                        },
                    );
                }
                _ => {}
            }
        }
        let class = Rc::new(ClassInfo {
            name: class_name,
            modifiers,
            instance_kind: superclass.instance_kind,
            superclass: Some(superclass),
            declared,
            source: Some(ClassSource {
                tree,
                entries,
                env: Env::default(),
                module: Some(Rc::clone(module)),
            }),
            prototype: RefCell::new(None),
        });
        self.module_classes.borrow_mut().insert(key, Rc::clone(&class));
        Ok(Some(class))
    }

    fn resolve_superclass(
        &mut self,
        module: &ObjRef,
        superclass: Option<&crate::cst::QualifiedName>,
    ) -> EvalResult<Rc<ClassInfo>> {
        let Some(qn) = superclass else {
            return Ok(Rc::clone(&self.classes.typed));
        };
        if qn.is_simple() {
            return self
                .class_for(module, qn.leaf())?
                .ok_or_else(|| EvalError::name_error(format!("Cannot find superclass `{qn}`.")));
        }
        // `import.Class`: resolve the import, then the class.
        let import_value = self.eval_module_scope_value(module, &qn.0[0])?;
        let Value::Object(imported) = import_value else {
            return Err(EvalError::type_error(format!("`{}` is not a module.", qn.0[0])));
        };
        self.class_for(&imported, qn.leaf())?
            .ok_or_else(|| EvalError::name_error(format!("Cannot find superclass `{qn}`.")))
    }

    /// The type alias named `name` declared by `module`.
    pub fn alias_for(&mut self, module: &ObjRef, name: &str) -> EvalResult<Option<Rc<crate::class::TypeAliasInfo>>> {
        let Some(compiled) = module.compiled.clone() else {
            return Ok(None);
        };
        let Some(node) = compiled.type_aliases.get(name).copied() else {
            if let Some(parent) = module.parent.clone() {
                return self.alias_for(&parent, name);
            }
            return Ok(None);
        };
        let tree = Arc::clone(&compiled.tree);
        let NodeKind::TypeAlias {
            name: alias_name,
            type_params,
            body,
            ..
        } = tree.kind(node).clone()
        else {
            return Err(EvalError::parse(format!("Node for alias `{name}` is not a type alias.")));
        };
        Ok(Some(Rc::new(crate::class::TypeAliasInfo {
            name: alias_name,
            params: type_params,
            body: TypeRef {
                tree,
                node: body,
                env: Env::default(),
            },
        })))
    }

    /// A module-scope property value (used for qualified superclass
    /// resolution).
    pub(crate) fn eval_module_scope_value(&mut self, module: &ObjRef, name: &str) -> EvalResult<Value> {
        let member = module
            .visible_property(name)
            .ok_or_else(|| self.missing_property_error(&Value::Object(Rc::clone(module)), name))?;
        self.force_member(module, &member, name)
    }

    /// The prototype object of a class (None for builtin classes).
    pub fn prototype(&mut self, class: &Rc<ClassInfo>) -> EvalResult<Option<ObjRef>> {
        let Some(source) = class.source.clone() else {
            return Ok(None);
        };
        if let Some(proto) = class.prototype.borrow().as_ref() {
            return Ok(Some(Rc::clone(proto)));
        }
        let parent_proto = match &class.superclass {
            Some(superclass) => self.prototype(&Rc::clone(superclass))?,
            None => None,
        };
        let outers: SmallVec<[ObjRef; 4]> = source.module.iter().cloned().collect();
        let proto = ObjectData::new(
            class.instance_kind,
            Rc::clone(class),
            parent_proto.clone(),
            outers,
            None,
        );
        if let Some(parent_proto) = &parent_proto {
            amend::inherit_members(&proto, parent_proto);
        }
        for entry in &source.entries {
            amend::apply_class_entry(self, &proto, &source, *entry, parent_proto.as_ref())?;
        }
        *class.prototype.borrow_mut() = Some(Rc::clone(&proto));
        Ok(Some(proto))
    }

    // =========================================================================
    // Imports and resources
    // =========================================================================

    /// The value of an `import` / `import*` expression.
    pub fn import_value(&mut self, base: &ModuleUri, target: &str, is_glob: bool) -> EvalResult<Value> {
        if is_glob {
            let expansions = {
                let ctx = ResolveContext {
                    security: &self.security,
                    limits: &self.limits,
                };
                self.resolver.expand_glob(&ctx, base, target)?
            };
            let entries: Vec<(Value, Member)> = expansions
                .into_iter()
                .map(|(rel, uri)| {
                    (
                        Value::string(rel),
                        Member::new(
                            Modifiers::NONE,
                            None,
                            MemberDef::Import {
                                target: uri.as_str().to_owned(),
                                is_glob: false,
                                base: base.clone(),
                            },
                        ),
                    )
                })
                .collect();
            return Ok(Value::Object(self.new_mapping(entries)));
        }
        let uri = self.resolver.resolve_reference(base, target)?;
        let module = self.load_module(&uri, Some(base))?;
        Ok(Value::Object(module))
    }

    fn reader_for(&self, scheme: &str) -> EvalResult<Rc<dyn ResourceReader>> {
        self.readers
            .iter()
            .find(|r| r.scheme() == scheme)
            .cloned()
            .ok_or_else(|| {
                EvalError::resolve(format!("No resource reader is registered for scheme `{scheme}:`."))
            })
    }

    pub(crate) fn read_resource_value(&mut self, tree: &Arc<Tree>, target: &str, mode: ReadMode) -> EvalResult<Value> {
        self.limits.check_deadline()?;
        let base = ModuleUri::parse(tree.uri())?;
        let uri = base.resolve_import(target)?;
        self.security.check_resource(&uri)?;
        let reader = self.reader_for(uri.scheme())?;
        match reader.read(&uri)? {
            Some(resource) => self.resource_to_value(&uri, resource.bytes),
            None => match mode {
                ReadMode::Fail => Err(EvalError::io(format!("Cannot find resource `{uri}`."))),
                ReadMode::NullIfMissing => Ok(Value::Null),
            },
        }
    }

    fn read_glob_value(&mut self, tree: &Arc<Tree>, pattern: &str, recv: &Receivers) -> EvalResult<Value> {
        let _ = recv;
        self.limits.check_deadline()?;
        let base = ModuleUri::parse(tree.uri())?;
        let regex = crate::glob::glob_to_regex(pattern)?;
        let crosses_dirs = pattern.contains("**");
        let static_prefix = {
            let meta = pattern.find(['*', '?', '[', '{', '\\']).unwrap_or(pattern.len());
            match pattern[..meta].rfind('/') {
                Some(slash) => &pattern[..=slash],
                None => "",
            }
        };
        let base_dir = if static_prefix.is_empty() {
            base.resolve_import(".")?
        } else {
            base.resolve_import(static_prefix)?
        };
        self.security.check_resource(&base_dir)?;
        let reader = self.reader_for(base_dir.scheme())?;
        if !reader.is_globbable() {
            return Err(EvalError::resolve(format!(
                "Cannot expand glob pattern `{pattern}`: resource scheme `{}:` is not globbable.",
                base_dir.scheme()
            )));
        }
        let mut matches: Vec<(String, ModuleUri)> = Vec::new();
        let mut stack = vec![(base_dir, static_prefix.to_owned())];
        while let Some((dir, rel_prefix)) = stack.pop() {
            for element in reader.list_elements(&dir)? {
                let rel = format!("{rel_prefix}{}", element.name);
                if element.is_directory {
                    if crosses_dirs {
                        stack.push((dir.resolve_import(&format!("{}/", element.name))?, format!("{rel}/")));
                    }
                } else if regex.is_match(&rel) {
                    matches.push((rel, dir.resolve_import(&element.name)?));
                }
            }
        }
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        let mut entries = Vec::with_capacity(matches.len());
        for (rel, uri) in matches {
            self.security.check_resource(&uri)?;
            let resource = reader
                .read(&uri)?
                .ok_or_else(|| EvalError::io(format!("Cannot find resource `{uri}`.")))?;
            let value = self.resource_to_value(&uri, resource.bytes)?;
            entries.push((Value::string(rel), Member::of_value(value)));
        }
        Ok(Value::Object(self.new_mapping(entries)))
    }

    fn resource_to_value(&mut self, uri: &ModuleUri, bytes: Vec<u8>) -> EvalResult<Value> {
        if matches!(uri.scheme(), "env" | "prop") {
            let text = String::from_utf8(bytes)
                .map_err(|e| EvalError::io(format!("Resource `{uri}` is not UTF-8: {e}.")))?;
            return Ok(Value::string(text));
        }
        let text = String::from_utf8(bytes.clone()).ok();
        let mut props: Vec<(String, Value)> = vec![
            ("uri".to_owned(), Value::string(uri.as_str())),
            ("bytes".to_owned(), Value::Bytes(Rc::from(bytes.into_boxed_slice()))),
        ];
        if let Some(text) = text {
            props.push(("text".to_owned(), Value::string(text)));
        }
        Ok(Value::Object(self.new_dynamic(props)))
    }

    // =========================================================================
    // Object construction helpers
    // =========================================================================

    pub fn new_dynamic(&mut self, props: Vec<(String, Value)>) -> ObjRef {
        let obj = ObjectData::new(
            ObjectKind::Dynamic,
            Rc::clone(&self.classes.dynamic),
            None,
            SmallVec::new(),
            None,
        );
        for (name, value) in props {
            obj.set_property(name, Member::of_value(value));
        }
        obj
    }

    pub fn new_mapping(&mut self, entries: Vec<(Value, Member)>) -> ObjRef {
        let obj = ObjectData::new(
            ObjectKind::Mapping,
            Rc::clone(&self.classes.mapping),
            None,
            SmallVec::new(),
            None,
        );
        {
            let mut table = obj.entries.borrow_mut();
            for (key, member) in entries {
                table.insert(key, member);
            }
        }
        obj
    }

    pub fn new_listing(&mut self, elements: Vec<Member>) -> ObjRef {
        let obj = ObjectData::new(
            ObjectKind::Listing,
            Rc::clone(&self.classes.listing),
            None,
            SmallVec::new(),
            None,
        );
        *obj.elements.borrow_mut() = elements;
        obj
    }

    // =========================================================================
    // Equality, export, rendering
    // =========================================================================

    /// Structural equality, forcing lazy members as needed.
    ///
    /// Objects are equal iff they have the same shape and class and
    /// their materialized visible member sets are equal.
    pub fn deep_equals(&mut self, left: &Value, right: &Value) -> EvalResult<bool> {
        match (left, right) {
            (Value::Object(a), Value::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                if a.kind != b.kind || !Rc::ptr_eq(&root_class(a), &root_class(b)) {
                    return Ok(false);
                }
                let a_props = visible_properties(a);
                let b_props = visible_properties(b);
                if a_props.len() != b_props.len() {
                    return Ok(false);
                }
                for (name, member) in &a_props {
                    let Some(other) = b_props.iter().find(|(n, _)| n == name).map(|(_, m)| m.clone()) else {
                        return Ok(false);
                    };
                    let av = self.force_member(a, member, name)?;
                    let bv = self.force_member(b, &other, name)?;
                    if !self.deep_equals(&av, &bv)? {
                        return Ok(false);
                    }
                }
                let a_elements = a.elements.borrow().clone();
                let b_elements = b.elements.borrow().clone();
                if a_elements.len() != b_elements.len() {
                    return Ok(false);
                }
                for (i, (am, bm)) in a_elements.iter().zip(&b_elements).enumerate() {
                    let label = format!("[{i}]");
                    let av = self.force_member(a, am, &label)?;
                    let bv = self.force_member(b, bm, &label)?;
                    if !self.deep_equals(&av, &bv)? {
                        return Ok(false);
                    }
                }
                let a_entries = a.entries.borrow().clone();
                let b_entries = b.entries.borrow().clone();
                if a_entries.len() != b_entries.len() {
                    return Ok(false);
                }
                for (key, am) in &a_entries {
                    let Some(bm) = b_entries.get(key) else {
                        return Ok(false);
                    };
                    let av = self.force_member(a, am, "entry")?;
                    let bv = self.force_member(b, bm, "entry")?;
                    if !self.deep_equals(&av, &bv)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::List(a), Value::List(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.iter().zip(b.iter()) {
                    if !self.deep_equals(x, y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Pair(a), Value::Pair(b)) => Ok(self.deep_equals(&a.first, &b.first)?
                && self.deep_equals(&a.second, &b.second)?),
            _ => Ok(left == right),
        }
    }

    /// Forces and converts a value for the host API boundary.
    pub fn export_value(&mut self, value: &Value) -> EvalResult<Exported> {
        Ok(match value {
            Value::Null => Exported::Null,
            Value::Bool(b) => Exported::Bool(*b),
            Value::Int(i) => Exported::Int(*i),
            Value::Float(f) => Exported::Float(*f),
            Value::Str(s) => Exported::String(s.to_string()),
            Value::Duration(d) => Exported::Duration(*d),
            Value::DataSize(d) => Exported::DataSize(*d),
            Value::Pair(p) => Exported::Pair(Box::new((self.export_value(&p.first)?, self.export_value(&p.second)?))),
            Value::Regex(r) => Exported::Regex(r.pattern.clone()),
            Value::Bytes(b) => Exported::Bytes(b.to_vec()),
            Value::IntSeq(_) | Value::Function(_) => {
                return Err(EvalError::type_error(format!(
                    "Values of type `{}` cannot be exported.",
                    value.type_name()
                )));
            }
            Value::List(items) => {
                Exported::List(items.iter().map(|v| self.export_value(v)).collect::<EvalResult<_>>()?)
            }
            Value::Set(items) => {
                Exported::Set(items.iter().map(|v| self.export_value(v)).collect::<EvalResult<_>>()?)
            }
            Value::Map(map) => {
                let mut out = Vec::with_capacity(map.len());
                for (k, v) in map.iter() {
                    out.push((self.export_value(k)?, self.export_value(v)?));
                }
                Exported::Map(out)
            }
            Value::Class(c) => Exported::Class(c.name.clone()),
            Value::TypeAlias(t) => Exported::TypeAlias(t.name.clone()),
            Value::Object(obj) => self.export_object(obj)?,
        })
    }

    fn export_object(&mut self, obj: &ObjRef) -> EvalResult<Exported> {
        let obj = Rc::clone(obj);
        match obj.kind {
            ObjectKind::Listing => {
                let elements = obj.elements.borrow().clone();
                let mut out = Vec::with_capacity(elements.len());
                for (i, member) in elements.iter().enumerate() {
                    let value = self.force_member(&obj, member, &format!("[{i}]"))?;
                    out.push(self.export_value(&value)?);
                }
                Ok(Exported::List(out))
            }
            ObjectKind::Mapping => {
                let entries = obj.entries.borrow().clone();
                let mut out = Vec::with_capacity(entries.len());
                for (key, member) in &entries {
                    let value = self.force_member(&obj, member, "entry")?;
                    out.push((self.export_value(key)?, self.export_value(&value)?));
                }
                Ok(Exported::Map(out))
            }
            ObjectKind::Typed | ObjectKind::Dynamic | ObjectKind::Module => {
                let mut properties = Vec::new();
                for (name, member) in visible_properties(&obj) {
                    let value = self.force_member(&obj, &member, &name)?;
                    properties.push((name, self.export_value(&value)?));
                }
                let elements = obj.elements.borrow().clone();
                let mut exported_elements = Vec::with_capacity(elements.len());
                for (i, member) in elements.iter().enumerate() {
                    let value = self.force_member(&obj, member, &format!("[{i}]"))?;
                    exported_elements.push(self.export_value(&value)?);
                }
                let entries = obj.entries.borrow().clone();
                let mut exported_entries = Vec::with_capacity(entries.len());
                for (key, member) in &entries {
                    let value = self.force_member(&obj, member, "entry")?;
                    exported_entries.push((self.export_value(key)?, self.export_value(&value)?));
                }
                Ok(Exported::Object {
                    class_name: obj.class.name.clone(),
                    properties,
                    elements: exported_elements,
                    entries: exported_entries,
                })
            }
        }
    }

    /// `toString` semantics: scalars render directly, aggregates render
    /// through the exporter.
    pub fn value_to_string(&mut self, value: &Value) -> EvalResult<String> {
        if let Some(text) = value.display_scalar() {
            return Ok(text);
        }
        match value {
            Value::Pair(p) => Ok(format!(
                "Pair({}, {})",
                self.value_to_string(&p.first)?,
                self.value_to_string(&p.second)?
            )),
            Value::Function(_) => Ok("Function".to_owned()),
            Value::Class(c) => Ok(c.name.clone()),
            Value::TypeAlias(t) => Ok(t.name.clone()),
            _ => {
                let exported = self.export_value(value)?;
                Ok(render::render_inline(&exported))
            }
        }
    }

    /// Instantiates a module and exports its visible properties.
    pub fn evaluate_module(&mut self, uri: &ModuleUri) -> EvalResult<(ObjRef, Exported)> {
        let module = self.load_module(uri, None)?;
        let exported = self.export_object(&module)?;
        Ok((module, exported))
    }
}

/// The uppermost user class in an amendment chain; amendment children
/// share the parent's class.
fn root_class(obj: &ObjRef) -> Rc<ClassInfo> {
    Rc::clone(&obj.class)
}

/// Non-deleted, non-hidden, non-local properties, in definition order.
pub(crate) fn visible_properties(obj: &ObjRef) -> Vec<(String, Member)> {
    obj.properties
        .borrow()
        .iter()
        .filter(|(_, m)| !m.is_deleted() && !m.modifiers.hidden && !m.modifiers.local)
        .map(|(n, m)| (n.clone(), m.clone()))
        .collect()
}

/// Strips up to `indent` leading spaces from every line.
fn strip_indent(text: &str, indent: u32) -> String {
    if indent == 0 {
        return text.to_owned();
    }
    text.split('\n')
        .map(|line| {
            let mut stripped = line;
            for _ in 0..indent {
                match stripped.strip_prefix(' ') {
                    Some(rest) => stripped = rest,
                    None => break,
                }
            }
            stripped
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `fixed`/`const` members cannot be overridden by amendment.
pub(crate) fn check_overridable(name: &str, existing: &Member) -> EvalResult<()> {
    if existing.modifiers.fixed {
        return Err(EvalError::type_error(format!(
            "Cannot assign to property `{name}` because it is declared `fixed`."
        )));
    }
    if existing.modifiers.is_const {
        return Err(EvalError::type_error(format!(
            "Cannot assign to property `{name}` because it is declared `const`."
        )));
    }
    Ok(())
}
