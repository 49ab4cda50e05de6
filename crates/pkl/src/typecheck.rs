//! Runtime type checking for declared types, `is`, and `as`.

use std::{rc::Rc, sync::Arc};

use crate::{
    class::ClassInfo,
    cst::{NodeId, NodeKind, Tree, TypeNode},
    error::{EvalError, EvalResult},
    eval::Machine,
    object::{Env, ObjectKind, Receivers, TypeRef},
    value::Value,
};

/// Checks `value` against a declared type, failing with the standard
/// type-mismatch diagnostic.
pub(crate) fn check(m: &mut Machine, value: &Value, ty: &TypeRef, recv: &Receivers) -> EvalResult<()> {
    if matches(m, value, &ty.tree, ty.node, &ty.env, recv)? {
        Ok(())
    } else {
        Err(EvalError::type_error(format!(
            "Expected a value of type `{}`, but got a value of type `{}`.",
            render_type(&ty.tree, ty.node),
            value.type_name()
        )))
    }
}

pub(crate) fn matches(
    m: &mut Machine,
    value: &Value,
    tree: &Arc<Tree>,
    node: NodeId,
    env: &Env,
    recv: &Receivers,
) -> EvalResult<bool> {
    matches_inner(m, value, tree, node, env, recv, &[])
}

fn type_node(tree: &Tree, node: NodeId) -> EvalResult<TypeNode> {
    match tree.kind(node) {
        NodeKind::Type(ty) => Ok(ty.clone()),
        other => Err(EvalError::parse(format!("Node {node} is not a type: {other:?}."))),
    }
}

fn matches_inner(
    m: &mut Machine,
    value: &Value,
    tree: &Arc<Tree>,
    node: NodeId,
    env: &Env,
    recv: &Receivers,
    opaque: &[String],
) -> EvalResult<bool> {
    match type_node(tree, node)? {
        TypeNode::Unknown => Ok(true),
        TypeNode::Nothing => Ok(false),
        TypeNode::Module => Ok(matches!(value, Value::Object(o) if o.kind == ObjectKind::Module)),
        TypeNode::StringConstant(text) => Ok(value.as_str() == Some(text.as_str())),
        TypeNode::Parenthesized(inner) | TypeNode::DefaultUnion(inner) => {
            matches_inner(m, value, tree, inner, env, recv, opaque)
        }
        TypeNode::Nullable(inner) => {
            Ok(value.is_null() || matches_inner(m, value, tree, inner, env, recv, opaque)?)
        }
        TypeNode::Union { left, right } => Ok(matches_inner(m, value, tree, left, env, recv, opaque)?
            || matches_inner(m, value, tree, right, env, recv, opaque)?),
        TypeNode::Constrained { base, predicates } => {
            if !matches_inner(m, value, tree, base, env, recv, opaque)? {
                return Ok(false);
            }
            for predicate in predicates {
                let pred_recv = recv.with_value_receiver(value.clone());
                let result = m.eval(tree, predicate, env, &pred_recv)?;
                match result.as_bool() {
                    Some(true) => {}
                    Some(false) => return Ok(false),
                    None => {
                        return Err(EvalError::type_error(format!(
                            "Expected a `Boolean` from a type constraint, but got a value of type `{}`.",
                            result.type_name()
                        )));
                    }
                }
            }
            Ok(true)
        }
        TypeNode::Function { .. } => Ok(matches!(value, Value::Function(_))),
        TypeNode::Declared { name, args } => {
            if name.is_simple() && opaque.iter().any(|p| p == name.leaf()) {
                return Ok(true);
            }
            matches_declared(m, value, tree, &name.to_string(), &args, env, recv)
        }
    }
}

fn matches_declared(
    m: &mut Machine,
    value: &Value,
    tree: &Arc<Tree>,
    name: &str,
    args: &[NodeId],
    env: &Env,
    recv: &Receivers,
    // no opaque propagation: alias params shadow only inside the alias body
) -> EvalResult<bool> {
    let matched = match name {
        "Any" => Some(true),
        "Null" => Some(value.is_null()),
        "Boolean" => Some(matches!(value, Value::Bool(_))),
        "Int" => Some(matches!(value, Value::Int(_))),
        "Float" => Some(matches!(value, Value::Float(_))),
        "Number" => Some(matches!(value, Value::Int(_) | Value::Float(_))),
        "String" => Some(matches!(value, Value::Str(_))),
        "Duration" => Some(matches!(value, Value::Duration(_))),
        "DataSize" => Some(matches!(value, Value::DataSize(_))),
        "Pair" => Some(matches!(value, Value::Pair(_))),
        "Regex" => Some(matches!(value, Value::Regex(_))),
        "Bytes" => Some(matches!(value, Value::Bytes(_))),
        "IntSeq" => Some(matches!(value, Value::IntSeq(_))),
        "Function" => Some(matches!(value, Value::Function(_))),
        "Class" => Some(matches!(value, Value::Class(_))),
        "TypeAlias" => Some(matches!(value, Value::TypeAlias(_))),
        _ => None,
    };
    if let Some(matched) = matched {
        return Ok(matched);
    }
    match name {
        "List" => {
            let Value::List(items) = value else { return Ok(false) };
            self::elements_match(m, &items.iter().cloned().collect::<Vec<_>>(), tree, args.first(), env, recv)
        }
        "Set" => {
            let Value::Set(items) = value else { return Ok(false) };
            self::elements_match(m, &items.iter().cloned().collect::<Vec<_>>(), tree, args.first(), env, recv)
        }
        "Map" => {
            let Value::Map(map) = value else { return Ok(false) };
            for (k, v) in map.iter() {
                if let Some(key_ty) = args.first() {
                    if !matches_inner(m, k, tree, *key_ty, env, recv, &[])? {
                        return Ok(false);
                    }
                }
                if let Some(value_ty) = args.get(1) {
                    if !matches_inner(m, v, tree, *value_ty, env, recv, &[])? {
                        return Ok(false);
                    }
                }
            }
            Ok(true)
        }
        "Listing" => {
            let Value::Object(obj) = value else { return Ok(false) };
            if obj.kind != ObjectKind::Listing {
                return Ok(false);
            }
            if let Some(element_ty) = args.first() {
                let obj = Rc::clone(obj);
                let elements = obj.elements.borrow().clone();
                for (i, member) in elements.iter().enumerate() {
                    let value = m.force_member(&obj, member, &format!("[{i}]"))?;
                    if !matches_inner(m, &value, tree, *element_ty, env, recv, &[])? {
                        return Ok(false);
                    }
                }
            }
            Ok(true)
        }
        "Mapping" => {
            let Value::Object(obj) = value else { return Ok(false) };
            if obj.kind != ObjectKind::Mapping {
                return Ok(false);
            }
            if let Some(value_ty) = args.get(1) {
                let obj = Rc::clone(obj);
                let entries = obj.entries.borrow().clone();
                for (key, member) in &entries {
                    if let Some(key_ty) = args.first() {
                        if !matches_inner(m, key, tree, *key_ty, env, recv, &[])? {
                            return Ok(false);
                        }
                    }
                    let value = m.force_member(&obj, member, "entry")?;
                    if !matches_inner(m, &value, tree, *value_ty, env, recv, &[])? {
                        return Ok(false);
                    }
                }
            }
            Ok(true)
        }
        "Dynamic" => Ok(matches!(value, Value::Object(o) if o.kind == ObjectKind::Dynamic)),
        "Typed" => Ok(matches!(value, Value::Object(o) if o.kind == ObjectKind::Typed)),
        "Module" => Ok(matches!(value, Value::Object(o) if o.kind == ObjectKind::Module)),
        _ => {
            // A user class or type alias, resolved through the module
            // of the current receiver chain.
            let module = recv.module_object().cloned();
            if let Some(module) = &module {
                if let Some(class) = m.class_for(module, name)? {
                    return Ok(matches!(value, Value::Object(o) if o.class.is_subclass_of(&class)));
                }
                if let Some(alias) = m.alias_for(module, name)? {
                    return matches_inner(
                        m,
                        value,
                        &alias.body.tree,
                        alias.body.node,
                        &alias.body.env,
                        recv,
                        &alias.params,
                    );
                }
            }
            Err(EvalError::type_error(format!("Cannot find type `{name}`.")))
        }
    }
}

fn elements_match(
    m: &mut Machine,
    items: &[Value],
    tree: &Arc<Tree>,
    element_ty: Option<&NodeId>,
    env: &Env,
    recv: &Receivers,
) -> EvalResult<bool> {
    let Some(element_ty) = element_ty else {
        return Ok(true);
    };
    for item in items {
        if !matches_inner(m, item, tree, *element_ty, env, recv, &[])? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Resolves the type of a `new T { … }` expression to a class.
pub(crate) fn resolve_new_class(
    m: &mut Machine,
    tree: &Arc<Tree>,
    node: NodeId,
    env: &Env,
    recv: &Receivers,
) -> EvalResult<Rc<ClassInfo>> {
    let _ = env;
    match type_node(tree, node)? {
        TypeNode::Declared { name, .. } => {
            if name.is_simple() {
                if let Some(builtin) = m.classes.by_name(name.leaf()) {
                    return Ok(Rc::clone(builtin));
                }
                if let Some(module) = recv.module_object().cloned() {
                    if let Some(class) = m.class_for(&module, name.leaf())? {
                        return Ok(class);
                    }
                }
            } else if let Some(module) = recv.module_object().cloned() {
                // `import.Class` form.
                let head = m.eval_module_scope_value(&module, &name.0[0])?;
                if let Value::Object(imported) = head {
                    if let Some(class) = m.class_for(&imported, name.leaf())? {
                        return Ok(class);
                    }
                }
            }
            Err(EvalError::type_error(format!("Cannot find class `{name}`.")))
        }
        TypeNode::Parenthesized(inner) | TypeNode::DefaultUnion(inner) | TypeNode::Nullable(inner) => {
            resolve_new_class(m, tree, inner, env, recv)
        }
        other => Err(EvalError::type_error(format!(
            "Cannot instantiate type `{}`.",
            render_type_node(tree, &other)
        ))),
    }
}

/// Reconstructs the written form of a type node for diagnostics.
pub(crate) fn render_type(tree: &Tree, node: NodeId) -> String {
    match tree.kind(node) {
        NodeKind::Type(ty) => render_type_node(tree, ty),
        _ => "unknown".to_owned(),
    }
}

fn render_type_node(tree: &Tree, ty: &TypeNode) -> String {
    match ty {
        TypeNode::Unknown => "unknown".to_owned(),
        TypeNode::Nothing => "nothing".to_owned(),
        TypeNode::Module => "module".to_owned(),
        TypeNode::StringConstant(text) => format!("\"{text}\""),
        TypeNode::Declared { name, args } => {
            if args.is_empty() {
                name.to_string()
            } else {
                let args: Vec<String> = args.iter().map(|a| render_type(tree, *a)).collect();
                format!("{name}<{}>", args.join(", "))
            }
        }
        TypeNode::Parenthesized(inner) => format!("({})", render_type(tree, *inner)),
        TypeNode::Nullable(inner) => format!("{}?", render_type(tree, *inner)),
        TypeNode::Constrained { base, .. } => format!("{}(…)", render_type(tree, *base)),
        TypeNode::DefaultUnion(inner) => format!("*{}", render_type(tree, *inner)),
        TypeNode::Union { left, right } => {
            format!("{}|{}", render_type(tree, *left), render_type(tree, *right))
        }
        TypeNode::Function { params, ret } => {
            let params: Vec<String> = params.iter().map(|p| render_type(tree, *p)).collect();
            format!("({}) -> {}", params.join(", "), render_type(tree, *ret))
        }
    }
}
