//! The amendment engine.
//!
//! Amendment derives a child object from a parent object and an object
//! body. The child starts from fresh copies of the parent's members
//! (per-object memoization; late binding re-evaluates against the
//! child's receiver chain) and then applies the body's members in
//! source order: overrides, new definitions, element appends, entry
//! definitions, subscript overrides, deletions (with renumbering),
//! member predicates, spreads, and `when`/`for` generators.

use std::{rc::Rc, sync::Arc};

use smallvec::SmallVec;

use crate::{
    class::ClassInfo,
    cst::{Expr, MemberNode, Modifiers, NodeId, NodeKind, Param, Tree},
    error::{EvalError, EvalResult},
    eval::{check_overridable, Machine},
    object::{
        BodyRef, Env, ExprThunk, Member, MemberDef, MethodDef, ObjRef, ObjectData, ObjectKind, Receivers, TypeRef,
    },
    value::Value,
};

/// Copies all member tables from `parent` into `child` with fresh
/// memoization cells.
pub(crate) fn inherit_members(child: &ObjRef, parent: &ObjRef) {
    {
        let mut properties = child.properties.borrow_mut();
        for (name, member) in parent.properties.borrow().iter() {
            properties.insert(name.clone(), member.fresh_copy());
        }
    }
    {
        let mut elements = child.elements.borrow_mut();
        elements.extend(parent.elements.borrow().iter().map(Member::fresh_copy));
    }
    {
        let mut entries = child.entries.borrow_mut();
        for (key, member) in parent.entries.borrow().iter() {
            entries.insert(key.clone(), member.fresh_copy());
        }
    }
    {
        let mut methods = child.methods.borrow_mut();
        for (name, method) in parent.methods.borrow().iter() {
            methods.insert(name.clone(), Rc::clone(method));
        }
    }
}

/// `new C { … }`: amends the class prototype.
pub(crate) fn instantiate_new(
    m: &mut Machine,
    class: &Rc<ClassInfo>,
    body: Option<BodyRef>,
    env: &Env,
    recv: &Receivers,
) -> EvalResult<ObjRef> {
    let proto = m.prototype(class)?;
    let outers: SmallVec<[ObjRef; 4]> = recv.chain.iter().cloned().collect();
    let child = ObjectData::new(class.instance_kind, Rc::clone(class), proto.clone(), outers, body.clone());
    if let Some(proto) = &proto {
        inherit_members(&child, proto);
    }
    if let Some((tree, body_id)) = body {
        apply_body(m, &child, &tree, body_id, env, proto)?;
    }
    Ok(child)
}

/// `parent { … }`: amends an existing object value.
pub(crate) fn amend_object(
    m: &mut Machine,
    parent: &ObjRef,
    body: BodyRef,
    env: &Env,
    recv: &Receivers,
) -> EvalResult<ObjRef> {
    let outers: SmallVec<[ObjRef; 4]> = recv.chain.iter().cloned().collect();
    let child = ObjectData::new(
        parent.kind,
        Rc::clone(&parent.class),
        Some(Rc::clone(parent)),
        outers,
        Some(body.clone()),
    );
    inherit_members(&child, parent);
    let (tree, body_id) = body;
    apply_body(m, &child, &tree, body_id, env, Some(Rc::clone(parent)))?;
    Ok(child)
}

/// Applies one object body to a child under construction.
pub(crate) fn apply_body(
    m: &mut Machine,
    obj: &ObjRef,
    tree: &Arc<Tree>,
    body_id: NodeId,
    env: &Env,
    super_obj: Option<ObjRef>,
) -> EvalResult<()> {
    let NodeKind::ObjectBody { members, .. } = tree.kind(body_id).clone() else {
        return Err(EvalError::parse("Amendment body is not an object body.".to_owned()));
    };
    for member_id in members {
        apply_member(m, obj, tree, member_id, env, &super_obj)?;
    }
    Ok(())
}

fn thunk(tree: &Arc<Tree>, expr: NodeId, env: &Env, super_obj: &Option<ObjRef>) -> MemberDef {
    MemberDef::Expr(ExprThunk {
        tree: Arc::clone(tree),
        expr,
        env: env.clone(),
        super_obj: super_obj.clone(),
    })
}

fn is_delete(tree: &Tree, expr: NodeId) -> bool {
    matches!(tree.kind(expr), NodeKind::Expr(Expr::Delete))
}

fn apply_member(
    m: &mut Machine,
    obj: &ObjRef,
    tree: &Arc<Tree>,
    member_id: NodeId,
    env: &Env,
    super_obj: &Option<ObjRef>,
) -> EvalResult<()> {
    let NodeKind::Member(member) = tree.kind(member_id).clone() else {
        return Err(EvalError::parse("Object body entry is not a member node.".to_owned()));
    };
    match member {
        MemberNode::Element(expr) => {
            obj.elements
                .borrow_mut()
                .push(Member::new(Modifiers::NONE, None, thunk(tree, expr, env, super_obj)));
            Ok(())
        }
        MemberNode::Property {
            modifiers,
            name,
            ty,
            expr,
        } => apply_property(m, obj, tree, modifiers, &name, ty, expr, env, super_obj),
        MemberNode::PropertyBody { modifiers, name, bodies } => {
            let existing = obj.property(&name).filter(|m| !m.is_deleted());
            if let Some(existing) = &existing {
                check_overridable(&name, existing)?;
            } else if obj.kind != ObjectKind::Dynamic {
                return Err(cannot_add_property(obj, &name));
            }
            let base = existing
                .map(|e| e.fresh_copy())
                .unwrap_or_else(|| Member::new(Modifiers::NONE, None, MemberDef::Undefined { name: name.clone() }));
            let member = Member::new(
                modifiers,
                base.ty.clone(),
                MemberDef::Amend {
                    base: Box::new(base),
                    bodies: bodies.iter().map(|b| (Arc::clone(tree), *b)).collect(),
                    env: env.clone(),
                },
            );
            obj.set_property(name, member);
            Ok(())
        }
        MemberNode::Method {
            modifiers,
            name,
            params,
            return_ty,
            body,
            ..
        } => {
            obj.methods.borrow_mut().insert(
                name.clone(),
                Rc::new(MethodDef {
                    modifiers,
                    name,
                    params,
                    return_ty,
                    body,
                    tree: Arc::clone(tree),
                    env: env.clone(),
                }),
            );
            Ok(())
        }
        MemberNode::Entry { key, value } => {
            let recv = Receivers::for_object(obj);
            let key_value = m.eval(tree, key, env, &recv)?;
            apply_entry(m, obj, tree, key_value, value, env, super_obj)
        }
        MemberNode::EntryBody { key, bodies } => {
            let recv = Receivers::for_object(obj);
            let key_value = m.eval(tree, key, env, &recv)?;
            apply_entry_body(obj, tree, key_value, &bodies, env)
        }
        MemberNode::Predicate { predicate, expr } => {
            apply_predicate(m, obj, tree, predicate, PredicateAction::Expr(expr), env, super_obj)
        }
        MemberNode::PredicateBody { predicate, bodies } => {
            apply_predicate(m, obj, tree, predicate, PredicateAction::Bodies(&bodies), env, super_obj)
        }
        MemberNode::Spread { expr, is_nullable } => {
            let recv = Receivers::for_object(obj);
            let value = m.eval(tree, expr, env, &recv)?;
            apply_spread(m, obj, value, is_nullable)
        }
        MemberNode::When {
            condition,
            then_body,
            else_body,
        } => {
            let recv = Receivers::for_object(obj);
            let cond = m.eval(tree, condition, env, &recv)?;
            match cond.as_bool() {
                Some(true) => apply_body(m, obj, tree, then_body, env, super_obj.clone()),
                Some(false) => match else_body {
                    Some(else_body) => apply_body(m, obj, tree, else_body, env, super_obj.clone()),
                    None => Ok(()),
                },
                None => Err(EvalError::type_error(format!(
                    "Expected a `Boolean` condition in a `when` generator, but got a value of type `{}`.",
                    cond.type_name()
                ))),
            }
        }
        MemberNode::For {
            key_param,
            value_param,
            source,
            body,
        } => {
            let recv = Receivers::for_object(obj);
            let source_value = m.eval(tree, source, env, &recv)?;
            apply_for(
                m,
                obj,
                tree,
                &key_param,
                value_param.as_ref(),
                &source_value,
                body,
                env,
                super_obj,
            )
        }
    }
}

fn cannot_add_property(obj: &ObjRef, name: &str) -> Box<EvalError> {
    EvalError::type_error(format!(
        "Cannot add property `{name}` to an object of type `{}`; only `Dynamic` objects accept new properties.",
        obj.class.name
    ))
}

#[expect(clippy::too_many_arguments, reason = "amendment state is wide")]
fn apply_property(
    m: &mut Machine,
    obj: &ObjRef,
    tree: &Arc<Tree>,
    modifiers: Modifiers,
    name: &str,
    ty: Option<NodeId>,
    expr: NodeId,
    env: &Env,
    super_obj: &Option<ObjRef>,
) -> EvalResult<()> {
    let _ = m;
    if is_delete(tree, expr) {
        obj.set_property(name.to_owned(), Member::new(Modifiers::NONE, None, MemberDef::Deleted));
        return Ok(());
    }
    let existing = obj.property(name).filter(|m| !m.is_deleted());
    let declared = obj.class.declared_property(name);
    match (&existing, &declared) {
        (Some(existing), _) => check_overridable(name, existing)?,
        (None, Some(decl)) if decl.modifiers.fixed => {
            return Err(EvalError::type_error(format!(
                "Cannot assign to property `{name}` because it is declared `fixed`."
            )));
        }
        (None, Some(decl)) if decl.modifiers.is_const => {
            return Err(EvalError::type_error(format!(
                "Cannot assign to property `{name}` because it is declared `const`."
            )));
        }
        (None, Some(_)) => {}
        (None, None) if obj.kind != ObjectKind::Dynamic && !modifiers.local => {
            return Err(cannot_add_property(obj, name));
        }
        (None, None) => {}
    }
    let ty_ref = ty.map(|node| TypeRef {
        tree: Arc::clone(tree),
        node,
        env: env.clone(),
    });
    let inherited_ty = existing
        .as_ref()
        .and_then(|e| e.ty.clone())
        .or_else(|| declared.as_ref().and_then(|d| d.ty.clone()));
    obj.set_property(
        name.to_owned(),
        Member::new(modifiers, ty_ref.or(inherited_ty), thunk(tree, expr, env, super_obj)),
    );
    Ok(())
}

/// `[key] = value`: entry definition, or subscript override when the
/// key is an in-range element index.
fn apply_entry(
    m: &mut Machine,
    obj: &ObjRef,
    tree: &Arc<Tree>,
    key: Value,
    value: NodeId,
    env: &Env,
    super_obj: &Option<ObjRef>,
) -> EvalResult<()> {
    let _ = m;
    if targets_elements(obj, &key)? {
        let Value::Int(i) = key else {
            unreachable!("targets_elements only accepts Int keys")
        };
        let index = element_index(obj, i)?;
        if is_delete(tree, value) {
            // Renumbering: later sibling subscripts see the compacted
            // sequence.
            obj.elements.borrow_mut().remove(index);
        } else {
            obj.elements.borrow_mut()[index] = Member::new(Modifiers::NONE, None, thunk(tree, value, env, super_obj));
        }
        return Ok(());
    }
    if matches!(obj.kind, ObjectKind::Typed | ObjectKind::Module) {
        return Err(EvalError::type_error(format!(
            "Cannot define entries on an object of type `{}`.",
            obj.class.name
        )));
    }
    if is_delete(tree, value) {
        obj.entries.borrow_mut().shift_remove(&key);
    } else {
        obj.entries
            .borrow_mut()
            .insert(key, Member::new(Modifiers::NONE, None, thunk(tree, value, env, super_obj)));
    }
    Ok(())
}

fn apply_entry_body(obj: &ObjRef, tree: &Arc<Tree>, key: Value, bodies: &[NodeId], env: &Env) -> EvalResult<()> {
    let bodies: Vec<BodyRef> = bodies.iter().map(|b| (Arc::clone(tree), *b)).collect();
    if targets_elements(obj, &key)? {
        let Value::Int(i) = key else {
            unreachable!("targets_elements only accepts Int keys")
        };
        let index = element_index(obj, i)?;
        let base = obj.elements.borrow()[index].fresh_copy();
        obj.elements.borrow_mut()[index] = Member::new(
            Modifiers::NONE,
            None,
            MemberDef::Amend {
                base: Box::new(base),
                bodies,
                env: env.clone(),
            },
        );
        return Ok(());
    }
    let base = obj
        .entry(&key)
        .map(|e| e.fresh_copy())
        .unwrap_or_else(|| Member::new(Modifiers::NONE, None, MemberDef::Undefined { name: "entry".to_owned() }));
    obj.entries.borrow_mut().insert(
        key,
        Member::new(
            Modifiers::NONE,
            None,
            MemberDef::Amend {
                base: Box::new(base),
                bodies,
                env: env.clone(),
            },
        ),
    );
    Ok(())
}

/// Whether an integer key addresses the element sequence rather than
/// the entry table.
fn targets_elements(obj: &ObjRef, key: &Value) -> EvalResult<bool> {
    match (obj.kind, key) {
        (ObjectKind::Listing, Value::Int(_)) => Ok(true),
        (ObjectKind::Listing, other) => Err(EvalError::type_error(format!(
            "Expected an `Int` index for a `Listing`, but got a value of type `{}`.",
            other.type_name()
        ))),
        (ObjectKind::Dynamic, Value::Int(i)) => {
            Ok(usize::try_from(*i).map(|i| i < obj.element_count()).unwrap_or(false))
        }
        _ => Ok(false),
    }
}

fn element_index(obj: &ObjRef, i: i64) -> EvalResult<usize> {
    usize::try_from(i)
        .ok()
        .filter(|i| *i < obj.element_count())
        .ok_or_else(|| {
            EvalError::type_error(format!(
                "Element index {i} is out of bounds (length {}).",
                obj.element_count()
            ))
        })
}

enum PredicateAction<'a> {
    Expr(NodeId),
    Bodies(&'a [NodeId]),
}

/// `[[pred]] = expr` / `[[pred]] { … }`: for every element, evaluate
/// the predicate with the element value as `this`; for every entry,
/// with the entry key. Truthy matches are replaced (or deleted).
fn apply_predicate(
    m: &mut Machine,
    obj: &ObjRef,
    tree: &Arc<Tree>,
    predicate: NodeId,
    action: PredicateAction<'_>,
    env: &Env,
    super_obj: &Option<ObjRef>,
) -> EvalResult<()> {
    let recv = Receivers::for_object(obj);
    let elements = obj.elements.borrow().clone();
    let mut kept: Vec<Member> = Vec::with_capacity(elements.len());
    for (i, member) in elements.iter().enumerate() {
        let value = m.force_member(obj, member, &format!("[{i}]"))?;
        let pred_recv = recv.with_value_receiver(value.clone());
        let matched = m.eval(tree, predicate, env, &pred_recv)?;
        let Some(matched) = matched.as_bool() else {
            return Err(EvalError::type_error(format!(
                "Expected a `Boolean` from a member predicate, but got a value of type `{}`.",
                matched.type_name()
            )));
        };
        if !matched {
            kept.push(member.clone());
            continue;
        }
        match &action {
            PredicateAction::Expr(expr) if is_delete(tree, *expr) => {}
            PredicateAction::Expr(expr) => {
                kept.push(Member::new(Modifiers::NONE, None, thunk(tree, *expr, env, super_obj)));
            }
            PredicateAction::Bodies(bodies) => {
                kept.push(Member::new(
                    Modifiers::NONE,
                    None,
                    MemberDef::Amend {
                        base: Box::new(member.fresh_copy()),
                        bodies: bodies.iter().map(|b| (Arc::clone(tree), *b)).collect(),
                        env: env.clone(),
                    },
                ));
            }
        }
    }
    *obj.elements.borrow_mut() = kept;

    let entries = obj.entries.borrow().clone();
    for (key, member) in &entries {
        let pred_recv = recv.with_value_receiver(key.clone());
        let matched = m.eval(tree, predicate, env, &pred_recv)?;
        let Some(matched) = matched.as_bool() else {
            return Err(EvalError::type_error(format!(
                "Expected a `Boolean` from a member predicate, but got a value of type `{}`.",
                matched.type_name()
            )));
        };
        if !matched {
            continue;
        }
        match &action {
            PredicateAction::Expr(expr) if is_delete(tree, *expr) => {
                obj.entries.borrow_mut().shift_remove(key);
            }
            PredicateAction::Expr(expr) => {
                obj.entries
                    .borrow_mut()
                    .insert(key.clone(), Member::new(Modifiers::NONE, None, thunk(tree, *expr, env, super_obj)));
            }
            PredicateAction::Bodies(bodies) => {
                obj.entries.borrow_mut().insert(
                    key.clone(),
                    Member::new(
                        Modifiers::NONE,
                        None,
                        MemberDef::Amend {
                            base: Box::new(member.fresh_copy()),
                            bodies: bodies.iter().map(|b| (Arc::clone(tree), *b)).collect(),
                            env: env.clone(),
                        },
                    ),
                );
            }
        }
    }
    Ok(())
}

/// `...expr` / `...?expr`: splices the members of another collection.
fn apply_spread(m: &mut Machine, obj: &ObjRef, value: Value, is_nullable: bool) -> EvalResult<()> {
    match value {
        Value::Null if is_nullable => Ok(()),
        Value::Null => Err(EvalError::type_error("Cannot spread `null`; use `...?` to skip nulls.")),
        Value::List(items) => {
            let mut elements = obj.elements.borrow_mut();
            elements.extend(items.iter().cloned().map(Member::of_value));
            Ok(())
        }
        Value::Set(items) => {
            let mut elements = obj.elements.borrow_mut();
            elements.extend(items.iter().cloned().map(Member::of_value));
            Ok(())
        }
        Value::Map(map) => {
            let mut entries = obj.entries.borrow_mut();
            for (k, v) in map.iter() {
                entries.insert(k.clone(), Member::of_value(v.clone()));
            }
            Ok(())
        }
        Value::IntSeq(seq) => {
            let mut elements = obj.elements.borrow_mut();
            elements.extend(seq.iter().map(|i| Member::of_value(Value::Int(i))));
            Ok(())
        }
        Value::Object(source) => {
            {
                let mut elements = obj.elements.borrow_mut();
                elements.extend(source.elements.borrow().iter().map(Member::fresh_copy));
            }
            {
                let mut entries = obj.entries.borrow_mut();
                for (key, member) in source.entries.borrow().iter() {
                    entries.insert(key.clone(), member.fresh_copy());
                }
            }
            for (name, member) in source.properties.borrow().iter() {
                if member.is_deleted() || member.modifiers.local {
                    continue;
                }
                if let Some(existing) = obj.property(name) {
                    check_overridable(name, &existing)?;
                } else if obj.kind != ObjectKind::Dynamic {
                    return Err(cannot_add_property(obj, name));
                }
                obj.set_property(name.clone(), member.fresh_copy());
            }
            let _ = m;
            Ok(())
        }
        other => Err(EvalError::type_error(format!(
            "Cannot spread a value of type `{}`.",
            other.type_name()
        ))),
    }
}

/// `for (k[, v] in source) { … }`: evaluates the source eagerly and
/// splices the body once per item with the parameters bound.
#[expect(clippy::too_many_arguments, reason = "amendment state is wide")]
fn apply_for(
    m: &mut Machine,
    obj: &ObjRef,
    tree: &Arc<Tree>,
    key_param: &Param,
    value_param: Option<&Param>,
    source: &Value,
    body: NodeId,
    env: &Env,
    super_obj: &Option<ObjRef>,
) -> EvalResult<()> {
    let mut splice = |m: &mut Machine, first: Value, second: Option<Value>| -> EvalResult<()> {
        let env = match (value_param, second) {
            (Some(value_param), Some(second)) => env
                .bind(key_param.name.clone(), first)
                .bind(value_param.name.clone(), second),
            _ => env.bind(key_param.name.clone(), first),
        };
        apply_body(m, obj, tree, body, &env, super_obj.clone())
    };
    match source {
        Value::List(items) => {
            for (i, item) in items.iter().enumerate() {
                let (first, second) = index_pair(i, item.clone(), value_param.is_some());
                splice(m, first, second)?;
            }
            Ok(())
        }
        Value::Set(items) => {
            for (i, item) in items.iter().enumerate() {
                let (first, second) = index_pair(i, item.clone(), value_param.is_some());
                splice(m, first, second)?;
            }
            Ok(())
        }
        Value::IntSeq(seq) => {
            for (i, item) in seq.iter().enumerate() {
                let (first, second) = index_pair(i, Value::Int(item), value_param.is_some());
                splice(m, first, second)?;
            }
            Ok(())
        }
        Value::Map(map) => {
            for (k, v) in map.iter() {
                if value_param.is_some() {
                    splice(m, k.clone(), Some(v.clone()))?;
                } else {
                    splice(m, v.clone(), None)?;
                }
            }
            Ok(())
        }
        Value::Object(source_obj) if source_obj.kind == ObjectKind::Listing => {
            let elements = source_obj.elements.borrow().clone();
            for (i, member) in elements.iter().enumerate() {
                let value = m.force_member(source_obj, member, &format!("[{i}]"))?;
                let (first, second) = index_pair(i, value, value_param.is_some());
                splice(m, first, second)?;
            }
            Ok(())
        }
        Value::Object(source_obj) if source_obj.kind == ObjectKind::Mapping => {
            let entries = source_obj.entries.borrow().clone();
            for (key, member) in &entries {
                let value = m.force_member(source_obj, member, "entry")?;
                if value_param.is_some() {
                    splice(m, key.clone(), Some(value))?;
                } else {
                    splice(m, value, None)?;
                }
            }
            Ok(())
        }
        other => Err(EvalError::type_error(format!(
            "Cannot iterate over a value of type `{}` in a `for` generator.",
            other.type_name()
        ))),
    }
}

fn index_pair(index: usize, value: Value, two_params: bool) -> (Value, Option<Value>) {
    if two_params {
        (Value::Int(i64::try_from(index).unwrap_or(i64::MAX)), Some(value))
    } else {
        (value, None)
    }
}

/// Applies one class-body entry to the class prototype being built.
pub(crate) fn apply_class_entry(
    m: &mut Machine,
    proto: &ObjRef,
    source: &crate::class::ClassSource,
    entry: NodeId,
    parent_proto: Option<&ObjRef>,
) -> EvalResult<()> {
    let _ = m;
    let tree = &source.tree;
    match tree.kind(entry).clone() {
        NodeKind::ClassProperty { modifiers, name, ty, .. } => {
            let type_ref = TypeRef {
                tree: Arc::clone(tree),
                node: ty,
                env: source.env.clone(),
            };
            let def = match proto.property(&name) {
                Some(existing) => existing.def,
                None => MemberDef::Undefined { name: name.clone() },
            };
            proto.set_property(name, Member::new(modifiers, Some(type_ref), def));
        }
        NodeKind::ClassPropertyExpr {
            modifiers, name, ty, expr, ..
        } => {
            let existing = proto.property(&name);
            if let Some(existing) = &existing {
                check_overridable(&name, existing)?;
            }
            let ty_ref = ty.map(|node| TypeRef {
                tree: Arc::clone(tree),
                node,
                env: source.env.clone(),
            });
            let inherited_ty = existing.as_ref().and_then(|e| e.ty.clone());
            proto.set_property(
                name,
                Member::new(
                    modifiers,
                    ty_ref.or(inherited_ty),
                    MemberDef::Expr(ExprThunk {
                        tree: Arc::clone(tree),
                        expr,
                        env: source.env.clone(),
                        super_obj: parent_proto.cloned(),
                    }),
                ),
            );
        }
        NodeKind::ClassPropertyBody { modifiers, name, bodies, .. } => {
            let base = proto
                .property(&name)
                .map(|e| e.fresh_copy())
                .unwrap_or_else(|| Member::new(Modifiers::NONE, None, MemberDef::Undefined { name: name.clone() }));
            proto.set_property(
                name,
                Member::new(
                    modifiers,
                    base.ty.clone(),
                    MemberDef::Amend {
                        base: Box::new(base),
                        bodies: bodies.iter().map(|b| (Arc::clone(tree), *b)).collect(),
                        env: source.env.clone(),
                    },
                ),
            );
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
                proto.methods.borrow_mut().insert(
                    name.clone(),
                    Rc::new(MethodDef {
                        modifiers,
                        name,
                        params,
                        return_ty,
                        body,
                        tree: Arc::clone(tree),
                        env: source.env.clone(),
                    }),
                );
            }
        }
        other => {
            return Err(EvalError::parse(format!("Unexpected class entry: {other:?}.")));
        }
    }
    Ok(())
}
