use std::{cell::RefCell, fmt, rc::Rc, sync::Arc};

use indexmap::IndexMap;

use crate::{
    cst::{Modifiers, NodeId, Tree},
    object::{Env, ObjRef, ObjectKind, TypeRef},
};

/// A property declared by a class (walked, not inherited-flattened).
#[derive(Debug, Clone)]
pub(crate) struct DeclaredProperty {
    pub modifiers: Modifiers,
    pub ty: Option<TypeRef>,
}

/// The class body as written in source, kept for prototype building.
#[derive(Debug, Clone)]
pub(crate) struct ClassSource {
    pub tree: Arc<Tree>,
    pub entries: Vec<NodeId>,
    pub env: Env,
    /// The module object the class was declared in; prototype members
    /// resolve names through it.
    pub module: Option<ObjRef>,
}

/// A first-class class descriptor.
///
/// User classes instantiate as `Typed` objects; the built-in open
/// container classes carry their own instance kind. Each class lazily
/// builds one prototype object whose members are the class's property
/// defaults; `new C {}` amends that prototype, which is how `super.x`
/// in a subclass default reaches the superclass default.
pub(crate) struct ClassInfo {
    pub name: String,
    pub modifiers: Modifiers,
    pub superclass: Option<Rc<ClassInfo>>,
    pub instance_kind: ObjectKind,
    pub declared: IndexMap<String, DeclaredProperty, ahash::RandomState>,
    pub source: Option<ClassSource>,
    pub prototype: RefCell<Option<ObjRef>>,
}

impl ClassInfo {
    #[must_use]
    pub fn builtin(name: &str, instance_kind: ObjectKind, superclass: Option<Rc<ClassInfo>>) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_owned(),
            modifiers: Modifiers::open(),
            superclass,
            instance_kind,
            declared: IndexMap::default(),
            source: None,
            prototype: RefCell::new(None),
        })
    }

    /// Whether `self` is `other` or a transitive subclass of it.
    #[must_use]
    pub fn is_subclass_of(&self, other: &ClassInfo) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if std::ptr::eq(class, other) {
                return true;
            }
            current = class.superclass.as_deref();
        }
        false
    }

    /// The declaration for `name`, searching the superclass chain.
    #[must_use]
    pub fn declared_property(&self, name: &str) -> Option<DeclaredProperty> {
        let mut current = Some(self);
        while let Some(class) = current {
            if let Some(decl) = class.declared.get(name) {
                return Some(decl.clone());
            }
            current = class.superclass.as_deref();
        }
        None
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.modifiers.is_open
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.modifiers.is_abstract
    }
}

impl fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassInfo")
            .field("name", &self.name)
            .field("superclass", &self.superclass.as_ref().map(|s| &s.name))
            .field("instance_kind", &self.instance_kind)
            .finish_non_exhaustive()
    }
}

/// A first-class type-alias descriptor.
#[derive(Debug)]
pub(crate) struct TypeAliasInfo {
    pub name: String,
    pub params: Vec<String>,
    pub body: TypeRef,
}

/// The built-in class registry, created once per evaluator.
#[derive(Debug)]
pub(crate) struct Classes {
    pub any: Rc<ClassInfo>,
    pub typed: Rc<ClassInfo>,
    pub dynamic: Rc<ClassInfo>,
    pub mapping: Rc<ClassInfo>,
    pub listing: Rc<ClassInfo>,
    pub module: Rc<ClassInfo>,
}

impl Classes {
    #[must_use]
    pub fn new() -> Self {
        let any = ClassInfo::builtin("Any", ObjectKind::Dynamic, None);
        let typed = ClassInfo::builtin("Typed", ObjectKind::Typed, Some(Rc::clone(&any)));
        let dynamic = ClassInfo::builtin("Dynamic", ObjectKind::Dynamic, Some(Rc::clone(&any)));
        let mapping = ClassInfo::builtin("Mapping", ObjectKind::Mapping, Some(Rc::clone(&any)));
        let listing = ClassInfo::builtin("Listing", ObjectKind::Listing, Some(Rc::clone(&any)));
        let module = ClassInfo::builtin("Module", ObjectKind::Module, Some(Rc::clone(&any)));
        Self {
            any,
            typed,
            dynamic,
            mapping,
            listing,
            module,
        }
    }

    /// The built-in class with the given name, if any.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Rc<ClassInfo>> {
        match name {
            "Any" => Some(&self.any),
            "Typed" => Some(&self.typed),
            "Dynamic" => Some(&self.dynamic),
            "Mapping" => Some(&self.mapping),
            "Listing" => Some(&self.listing),
            "Module" => Some(&self.module),
            _ => None,
        }
    }
}

impl Default for Classes {
    fn default() -> Self {
        Self::new()
    }
}
