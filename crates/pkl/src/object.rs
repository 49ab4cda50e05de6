use std::{cell::RefCell, fmt, rc::Rc, sync::Arc};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    class::ClassInfo,
    cst::{Modifiers, NodeId, Param, Tree},
    value::Value,
};

pub(crate) type ObjRef = Rc<ObjectData>;

/// A reference to an `ObjectBody` node in a specific tree.
pub(crate) type BodyRef = (Arc<Tree>, NodeId);

pub(crate) type MemberMap<K> = IndexMap<K, Member, ahash::RandomState>;

/// Object shape tag. Dispatch is on this tag, not on trait objects:
/// the five shapes share one layout and differ only in which member
/// tables they use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectKind {
    Typed,
    Dynamic,
    Mapping,
    Listing,
    Module,
}

/// An immutable chain of name→value frames (lexical environment).
///
/// Cons-list with shared tails: binding is O(1) and closing over an
/// environment is a pointer copy.
#[derive(Debug, Clone, Default)]
pub(crate) struct Env(Option<Rc<EnvFrame>>);

#[derive(Debug)]
struct EnvFrame {
    name: String,
    value: Value,
    next: Env,
}

impl Env {
    #[must_use]
    pub fn bind(&self, name: impl Into<String>, value: Value) -> Self {
        Self(Some(Rc::new(EnvFrame {
            name: name.into(),
            value,
            next: self.clone(),
        })))
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut frame = self.0.as_ref();
        while let Some(f) = frame {
            if f.name == name {
                return Some(f.value.clone());
            }
            frame = f.next.0.as_ref();
        }
        None
    }
}

/// The receiver chain `[this, outer₁, …, module]` of the object whose
/// member is currently being materialized.
///
/// `this_value` carries a non-object `this` for the one frame kind that
/// allows it (member predicates, where the candidate element value is
/// the receiver); the object chain stays intact for `outer`/`module`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Receivers {
    pub this_value: Option<Value>,
    pub chain: SmallVec<[ObjRef; 4]>,
}

impl Receivers {
    /// The chain for materializing members of `obj`.
    #[must_use]
    pub fn for_object(obj: &ObjRef) -> Self {
        let mut chain = SmallVec::with_capacity(1 + obj.outers.len());
        chain.push(Rc::clone(obj));
        chain.extend(obj.outers.iter().cloned());
        Self {
            this_value: None,
            chain,
        }
    }

    /// The same chain with `this` bound to an arbitrary value.
    #[must_use]
    pub fn with_value_receiver(&self, value: Value) -> Self {
        Self {
            this_value: Some(value),
            chain: self.chain.clone(),
        }
    }

    #[must_use]
    pub fn this(&self) -> Option<Value> {
        if let Some(v) = &self.this_value {
            return Some(v.clone());
        }
        self.chain.first().map(|o| Value::Object(Rc::clone(o)))
    }

    /// The object `this` resolves to, when it is an object.
    #[must_use]
    pub fn this_object(&self) -> Option<&ObjRef> {
        match &self.this_value {
            Some(Value::Object(o)) => Some(o),
            Some(_) => None,
            None => self.chain.first(),
        }
    }

    #[must_use]
    pub fn outer_object(&self) -> Option<&ObjRef> {
        self.chain.get(1)
    }

    #[must_use]
    pub fn module_object(&self) -> Option<&ObjRef> {
        self.chain.last()
    }
}

/// A declared-type reference: a `Type` node plus the environment its
/// names resolve in.
#[derive(Debug, Clone)]
pub(crate) struct TypeRef {
    pub tree: Arc<Tree>,
    pub node: NodeId,
    pub env: Env,
}

/// An unevaluated member expression: code plus captured context.
///
/// `super_obj` is the amendment parent of the object whose body defined
/// this member; `super.x` inside the expression resolves against it.
#[derive(Debug, Clone)]
pub(crate) struct ExprThunk {
    pub tree: Arc<Tree>,
    pub expr: NodeId,
    pub env: Env,
    pub super_obj: Option<ObjRef>,
}

/// How a member produces its value.
#[derive(Debug, Clone)]
pub(crate) enum MemberDef {
    /// Evaluate the thunk expression.
    Expr(ExprThunk),
    /// Amend the base member's value with the given object bodies
    /// (`name { … }` shorthand).
    Amend {
        base: Box<Member>,
        bodies: Vec<BodyRef>,
        env: Env,
    },
    /// Already a value (spread results, natively built members).
    Value(Value),
    /// An import binding: load the referenced module (or glob mapping)
    /// on first access.
    Import {
        target: String,
        is_glob: bool,
        base: crate::uri::ModuleUri,
    },
    /// Declared without a default (`name: Type` on a class); accessing
    /// it is an error until an amendment defines it.
    Undefined { name: String },
    /// Tombstone: the member was deleted and is invisible everywhere.
    Deleted,
}

/// Memoization cell of one member. `Thunk → InFlight → Computed`;
/// observing `InFlight` on entry is the cycle error.
#[derive(Debug)]
pub(crate) enum MemberState {
    Unevaluated,
    InFlight,
    Computed(Value),
}

/// One object member: modifiers, declared type, definition, and the
/// per-owning-object memoization cell.
#[derive(Debug, Clone)]
pub(crate) struct Member {
    pub modifiers: Modifiers,
    pub ty: Option<TypeRef>,
    pub def: MemberDef,
    pub state: Rc<RefCell<MemberState>>,
}

impl Member {
    #[must_use]
    pub fn new(modifiers: Modifiers, ty: Option<TypeRef>, def: MemberDef) -> Self {
        Self {
            modifiers,
            ty,
            def,
            state: Rc::new(RefCell::new(MemberState::Unevaluated)),
        }
    }

    #[must_use]
    pub fn of_value(value: Value) -> Self {
        Self::new(Modifiers::NONE, None, MemberDef::Value(value))
    }

    /// A copy with a fresh memoization cell.
    ///
    /// Used when a child object inherits a parent member: the member is
    /// re-evaluated against the child's receiver chain (late binding),
    /// so memoization is per owning object.
    #[must_use]
    pub fn fresh_copy(&self) -> Self {
        Self::new(self.modifiers, self.ty.clone(), self.def.clone())
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        matches!(self.def, MemberDef::Deleted)
    }
}

/// An object-scoped method definition.
#[derive(Debug, Clone)]
pub(crate) struct MethodDef {
    pub modifiers: Modifiers,
    pub name: String,
    pub params: Vec<Param>,
    pub return_ty: Option<NodeId>,
    pub body: NodeId,
    pub tree: Arc<Tree>,
    pub env: Env,
}

/// Runtime representation of every object shape.
///
/// `parent` is the amendment parent (shared; it lives as long as any
/// amending child). `outers` is the receiver-chain tail
/// `[outer₁, …, module]`; `this` is the object itself.
pub(crate) struct ObjectData {
    pub kind: ObjectKind,
    pub class: Rc<ClassInfo>,
    pub parent: Option<ObjRef>,
    pub outers: SmallVec<[ObjRef; 4]>,
    pub body: Option<BodyRef>,
    /// Module URI, for module objects.
    pub uri: Option<String>,
    /// The compiled form, for module objects: class and type-alias
    /// declarations resolve through it.
    pub compiled: Option<Arc<crate::prepare::CompiledModule>>,
    pub properties: RefCell<MemberMap<String>>,
    pub elements: RefCell<Vec<Member>>,
    pub entries: RefCell<MemberMap<Value>>,
    pub methods: RefCell<IndexMap<String, Rc<MethodDef>, ahash::RandomState>>,
}

impl ObjectData {
    #[must_use]
    pub fn new(
        kind: ObjectKind,
        class: Rc<ClassInfo>,
        parent: Option<ObjRef>,
        outers: SmallVec<[ObjRef; 4]>,
        body: Option<BodyRef>,
    ) -> ObjRef {
        Rc::new(Self {
            kind,
            class,
            parent,
            outers,
            body,
            uri: None,
            compiled: None,
            properties: RefCell::new(MemberMap::default()),
            elements: RefCell::new(Vec::new()),
            entries: RefCell::new(MemberMap::default()),
            methods: RefCell::new(IndexMap::default()),
        })
    }

    #[must_use]
    pub fn new_module(
        class: Rc<ClassInfo>,
        parent: Option<ObjRef>,
        compiled: Option<Arc<crate::prepare::CompiledModule>>,
        uri: String,
    ) -> ObjRef {
        Rc::new(Self {
            kind: ObjectKind::Module,
            class,
            parent,
            outers: SmallVec::new(),
            body: None,
            uri: Some(uri),
            compiled,
            properties: RefCell::new(MemberMap::default()),
            elements: RefCell::new(Vec::new()),
            entries: RefCell::new(MemberMap::default()),
            methods: RefCell::new(IndexMap::default()),
        })
    }

    /// The member stored under `name`, including tombstones.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<Member> {
        self.properties.borrow().get(name).cloned()
    }

    /// The member stored under `name`, unless deleted.
    #[must_use]
    pub fn visible_property(&self, name: &str) -> Option<Member> {
        self.property(name).filter(|m| !m.is_deleted())
    }

    pub fn set_property(&self, name: impl Into<String>, member: Member) {
        self.properties.borrow_mut().insert(name.into(), member);
    }

    #[must_use]
    pub fn element(&self, index: usize) -> Option<Member> {
        self.elements.borrow().get(index).cloned()
    }

    #[must_use]
    pub fn element_count(&self) -> usize {
        self.elements.borrow().len()
    }

    #[must_use]
    pub fn entry(&self, key: &Value) -> Option<Member> {
        self.entries.borrow().get(key).cloned()
    }

    #[must_use]
    pub fn method(&self, name: &str) -> Option<Rc<MethodDef>> {
        self.methods.borrow().get(name).cloned()
    }

    /// Property names visible to users: tombstones and `local` members
    /// are excluded (this is the list shown by "no such property"
    /// diagnostics).
    #[must_use]
    pub fn visible_property_names(&self) -> Vec<String> {
        self.properties
            .borrow()
            .iter()
            .filter(|(_, m)| !m.is_deleted() && !m.modifiers.local)
            .map(|(name, _)| name.clone())
            .collect()
    }

}

// Manual, shallow Debug: member values can reference ancestor objects,
// and a derived Debug would recurse through those cycles.
impl fmt::Debug for ObjectData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectData")
            .field("kind", &self.kind)
            .field("class", &self.class.name)
            .field("uri", &self.uri)
            .field("properties", &self.properties.borrow().len())
            .field("elements", &self.elements.borrow().len())
            .field("entries", &self.entries.borrow().len())
            .finish_non_exhaustive()
    }
}
