//! Behavioral tests for the amendment engine: overrides, `super`,
//! deletes with renumbering, predicates, generators, spreads, and
//! schema erasure.

mod common;

use common::{eval_module, ModuleBuilder};
use pkl::{
    cst::{BinaryOp, MemberNode, Modifiers, NodeKind},
    ErrorKind, Exported,
};
use pretty_assertions::assert_eq;

/// Builds `new Dynamic { "foo"; "bar"; "baz" }`.
fn three_element_dynamic(m: &mut ModuleBuilder) -> pkl::cst::NodeId {
    let foo = m.str("foo");
    let e1 = m.element(foo);
    let bar = m.str("bar");
    let e2 = m.element(bar);
    let baz = m.str("baz");
    let e3 = m.element(baz);
    let body = m.body(vec![e1, e2, e3]);
    m.new_dynamic(body)
}

#[test]
fn lazy_amendment_with_super() {
    // open class A { x: Int = 1 }
    // class B extends A { x = super.x + 10 }
    // out: Int = (new B {}).x
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    let a_x = m.class_prop_typed("x", "Int", one);
    m.class("A", None, true, vec![a_x]);
    let super_x = m.super_access("x");
    let ten = m.int(10);
    let b_x_expr = m.binop(BinaryOp::Add, super_x, ten);
    let b_x = m.class_prop("x", b_x_expr);
    m.class("B", Some("A"), false, vec![b_x]);
    let empty = m.body(vec![]);
    let new_b = m.new_typed("B", empty);
    let out = m.get(new_b, "x");
    m.module_prop_typed("out", "Int", out);

    let exported = eval_module(m.finish("repl:text")).unwrap();
    assert_eq!(exported.property("out"), Some(&Exported::Int(11)));
}

#[test]
fn listing_delete_renumbers_elements() {
    // src = new Dynamic { "foo"; "bar"; "baz" } { [1] = delete }
    // out = src[1]
    let mut m = ModuleBuilder::new();
    let base = three_element_dynamic(&mut m);
    let one = m.int(1);
    let del = m.delete();
    let delete_entry = m.entry(one, del);
    let amend_body = m.body(vec![delete_entry]);
    let src = m.amend_expr(base, amend_body);
    m.module_prop("src", src);
    let src_ref = m.name("src");
    let idx = m.int(1);
    let out = m.subscript(src_ref, idx);
    m.module_prop("out", out);

    let exported = eval_module(m.finish("repl:text")).unwrap();
    assert_eq!(exported.property("out"), Some(&Exported::string("baz")));
}

#[test]
fn subscript_override_sees_renumbered_sequence() {
    // { [1] = delete; [1] = "BAZ" } — the second override hits the old
    // index 2 slot.
    let mut m = ModuleBuilder::new();
    let base = three_element_dynamic(&mut m);
    let one_a = m.int(1);
    let del = m.delete();
    let delete_entry = m.entry(one_a, del);
    let one_b = m.int(1);
    let replacement = m.str("BAZ");
    let override_entry = m.entry(one_b, replacement);
    let amend_body = m.body(vec![delete_entry, override_entry]);
    let src = m.amend_expr(base, amend_body);
    m.module_prop("src", src);

    let exported = eval_module(m.finish("repl:text")).unwrap();
    match exported.property("src") {
        Some(Exported::Object { elements, .. }) => {
            assert_eq!(
                elements,
                &vec![Exported::string("foo"), Exported::string("BAZ")]
            );
        }
        other => panic!("expected an object, got {other:?}"),
    }
}

#[test]
fn property_deletion_disappears_everywhere() {
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    let keep = m.prop("keep", one);
    let two = m.int(2);
    let gone = m.prop("gone", two);
    let base_body = m.body(vec![keep, gone]);
    let base = m.new_dynamic(base_body);
    let del = m.delete();
    let delete_member = m.prop("gone", del);
    let amend_body = m.body(vec![delete_member]);
    let src = m.amend_expr(base, amend_body);
    m.module_prop("src", src);
    let src_ref = m.name("src");
    let gone_str = m.str("gone");
    let has = m.invoke(src_ref, "hasProperty", vec![gone_str]);
    m.module_prop("has", has);

    let exported = eval_module(m.finish("repl:text")).unwrap();
    assert_eq!(exported.property("has"), Some(&Exported::Bool(false)));
    match exported.property("src") {
        Some(Exported::Object { properties, .. }) => {
            assert!(properties.iter().all(|(n, _)| n != "gone"));
        }
        other => panic!("expected an object, got {other:?}"),
    }
}

#[test]
fn deleted_properties_are_not_listed_as_available() {
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    let keep = m.prop("keep", one);
    let two = m.int(2);
    let gone = m.prop("gone", two);
    let base_body = m.body(vec![keep, gone]);
    let base = m.new_dynamic(base_body);
    let del = m.delete();
    let delete_member = m.prop("gone", del);
    let amend_body = m.body(vec![delete_member]);
    let src = m.amend_expr(base, amend_body);
    let missing = m.get(src, "nope");
    m.module_prop("out", missing);

    let err = eval_module(m.finish("repl:text")).unwrap_err();
    assert!(err.message().contains("Available properties: [keep]"), "{}", err.message());
}

#[test]
fn property_body_amends_the_inherited_value() {
    // base = new Dynamic { inner = new Dynamic { a = 1; b = 2 } }
    // child = base { inner { b = 20 } }
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    let a = m.prop("a", one);
    let two = m.int(2);
    let b = m.prop("b", two);
    let inner_body = m.body(vec![a, b]);
    let inner_obj = m.new_dynamic(inner_body);
    let inner = m.prop("inner", inner_obj);
    let base_body = m.body(vec![inner]);
    let base = m.new_dynamic(base_body);

    let twenty = m.int(20);
    let b_override = m.prop("b", twenty);
    let inner_amend = m.body(vec![b_override]);
    let inner_member = m.prop_body("inner", vec![inner_amend]);
    let child_body = m.body(vec![inner_member]);
    let child = m.amend_expr(base, child_body);
    m.module_prop("child", child);

    let exported = eval_module(m.finish("repl:text")).unwrap();
    let child = exported.property("child").unwrap();
    let inner = child.property("inner").unwrap();
    assert_eq!(inner.property("a"), Some(&Exported::Int(1)));
    assert_eq!(inner.property("b"), Some(&Exported::Int(20)));
}

#[test]
fn member_predicate_replaces_matching_elements() {
    // new Dynamic { 1; 2; 3 } { [[this > 1]] = 9 }
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    let e1 = m.element(one);
    let two = m.int(2);
    let e2 = m.element(two);
    let three = m.int(3);
    let e3 = m.element(three);
    let base_body = m.body(vec![e1, e2, e3]);
    let base = m.new_dynamic(base_body);

    let this = m.this();
    let limit = m.int(1);
    let predicate = m.binop(BinaryOp::Gt, this, limit);
    let nine = m.int(9);
    let member = m.predicate(predicate, nine);
    let amend_body = m.body(vec![member]);
    let out = m.amend_expr(base, amend_body);
    m.module_prop("out", out);

    let exported = eval_module(m.finish("repl:text")).unwrap();
    match exported.property("out") {
        Some(Exported::Object { elements, .. }) => {
            assert_eq!(elements, &vec![Exported::Int(1), Exported::Int(9), Exported::Int(9)]);
        }
        other => panic!("expected an object, got {other:?}"),
    }
}

#[test]
fn member_predicate_can_delete() {
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    let e1 = m.element(one);
    let two = m.int(2);
    let e2 = m.element(two);
    let base_body = m.body(vec![e1, e2]);
    let base = m.new_dynamic(base_body);

    let this = m.this();
    let limit = m.int(1);
    let predicate = m.binop(BinaryOp::Gt, this, limit);
    let del = m.delete();
    let member = m.predicate(predicate, del);
    let amend_body = m.body(vec![member]);
    let out = m.amend_expr(base, amend_body);
    m.module_prop("out", out);

    let exported = eval_module(m.finish("repl:text")).unwrap();
    match exported.property("out") {
        Some(Exported::Object { elements, .. }) => {
            assert_eq!(elements, &vec![Exported::Int(1)]);
        }
        other => panic!("expected an object, got {other:?}"),
    }
}

#[test]
fn when_generator_splices_one_branch() {
    let mut m = ModuleBuilder::new();
    let cond = m.bool(true);
    let one = m.int(1);
    let then_prop = m.prop("a", one);
    let then_body = m.body(vec![then_prop]);
    let two = m.int(2);
    let else_prop = m.prop("a", two);
    let else_body = m.body(vec![else_prop]);
    let when = m.when(cond, then_body, Some(else_body));
    let body = m.body(vec![when]);
    let obj = m.new_dynamic(body);
    m.module_prop("out", obj);

    let exported = eval_module(m.finish("repl:text")).unwrap();
    let out = exported.property("out").unwrap();
    assert_eq!(out.property("a"), Some(&Exported::Int(1)));
}

#[test]
fn for_generator_splices_per_item() {
    // new Dynamic { for (x in List(1, 2, 3)) { x * 2 } }
    let mut m = ModuleBuilder::new();
    let a = m.int(1);
    let b = m.int(2);
    let c = m.int(3);
    let source = m.call("List", vec![a, b, c]);
    let x = m.name("x");
    let two = m.int(2);
    let doubled = m.binop(BinaryOp::Mul, x, two);
    let element = m.element(doubled);
    let body = m.body(vec![element]);
    let for_member = m.for_("x", None, source, body);
    let obj_body = m.body(vec![for_member]);
    let obj = m.new_dynamic(obj_body);
    m.module_prop("out", obj);

    let exported = eval_module(m.finish("repl:text")).unwrap();
    match exported.property("out") {
        Some(Exported::Object { elements, .. }) => {
            assert_eq!(elements, &vec![Exported::Int(2), Exported::Int(4), Exported::Int(6)]);
        }
        other => panic!("expected an object, got {other:?}"),
    }
}

#[test]
fn spread_splices_collection_members() {
    let mut m = ModuleBuilder::new();
    let a = m.int(1);
    let b = m.int(2);
    let list = m.call("List", vec![a, b]);
    let spread = m.spread(list, false);
    let three = m.int(3);
    let element = m.element(three);
    let body = m.body(vec![spread, element]);
    let obj = m.new_dynamic(body);
    m.module_prop("out", obj);

    let exported = eval_module(m.finish("repl:text")).unwrap();
    match exported.property("out") {
        Some(Exported::Object { elements, .. }) => {
            assert_eq!(elements, &vec![Exported::Int(1), Exported::Int(2), Exported::Int(3)]);
        }
        other => panic!("expected an object, got {other:?}"),
    }
}

#[test]
fn nullable_spread_skips_null() {
    let mut m = ModuleBuilder::new();
    let null = m.null();
    let spread = m.spread(null, true);
    let body = m.body(vec![spread]);
    let obj = m.new_dynamic(body);
    m.module_prop("out", obj);
    let exported = eval_module(m.finish("repl:text")).unwrap();
    match exported.property("out") {
        Some(Exported::Object { elements, .. }) => assert!(elements.is_empty()),
        other => panic!("expected an object, got {other:?}"),
    }

    let mut m = ModuleBuilder::new();
    let null = m.null();
    let spread = m.spread(null, false);
    let body = m.body(vec![spread]);
    let obj = m.new_dynamic(body);
    m.module_prop("out", obj);
    let err = eval_module(m.finish("repl:text")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn typed_objects_reject_new_properties() {
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    let x = m.class_prop_typed("x", "Int", one);
    m.class("Config", None, false, vec![x]);
    let five = m.int(5);
    let extra = m.prop("extra", five);
    let body = m.body(vec![extra]);
    let obj = m.new_typed("Config", body);
    m.module_prop("out", obj);

    let err = eval_module(m.finish("repl:text")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
    assert!(err.message().contains("extra"), "{}", err.message());
}

#[test]
fn to_dynamic_erases_the_schema() {
    // A Typed object whose class declares `name: String` accepts
    // `name = false` after `.toDynamic()`.
    let mut m = ModuleBuilder::new();
    let default_name = m.str("bird");
    let name_prop = m.class_prop_typed("name", "String", default_name);
    m.class("Bird", None, false, vec![name_prop]);
    let empty = m.body(vec![]);
    let typed = m.new_typed("Bird", empty);
    let dynamic = m.invoke(typed, "toDynamic", vec![]);
    let falsy = m.bool(false);
    let override_name = m.prop("name", falsy);
    let amend_body = m.body(vec![override_name]);
    let out = m.amend_expr(dynamic, amend_body);
    m.module_prop("out", out);

    let exported = eval_module(m.finish("repl:text")).unwrap();
    let out = exported.property("out").unwrap();
    assert_eq!(out.property("name"), Some(&Exported::Bool(false)));
}

#[test]
fn typed_override_without_to_dynamic_is_a_type_error() {
    let mut m = ModuleBuilder::new();
    let default_name = m.str("bird");
    let name_prop = m.class_prop_typed("name", "String", default_name);
    m.class("Bird", None, false, vec![name_prop]);
    let falsy = m.bool(false);
    let override_name = m.prop("name", falsy);
    let body = m.body(vec![override_name]);
    let obj = m.new_typed("Bird", body);
    m.module_prop("out", obj);

    let err = eval_module(m.finish("repl:text")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn fixed_properties_cannot_be_overridden() {
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    let fixed_prop = m.b.member(
        MemberNode::Property {
            modifiers: Modifiers::fixed(),
            name: "version".to_owned(),
            ty: None,
            expr: one,
        },
        common::span0(),
    );
    let base_body = m.body(vec![fixed_prop]);
    let base = m.new_dynamic(base_body);
    let two = m.int(2);
    let override_member = m.prop("version", two);
    let amend_body = m.body(vec![override_member]);
    let out = m.amend_expr(base, amend_body);
    m.module_prop("out", out);

    let err = eval_module(m.finish("repl:text")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
    assert!(err.message().contains("`fixed`"), "{}", err.message());
}

#[test]
fn hidden_members_are_invisible_to_rendering_but_reachable() {
    let mut m = ModuleBuilder::new();
    let secret_value = m.int(99);
    let hidden_member = m.b.member(
        MemberNode::Property {
            modifiers: Modifiers::hidden(),
            name: "secret".to_owned(),
            ty: None,
            expr: secret_value,
        },
        common::span0(),
    );
    let body = m.body(vec![hidden_member]);
    let obj = m.new_dynamic(body);
    m.module_prop("holder", obj);
    let holder = m.name("holder");
    let reach = m.get(holder, "secret");
    m.module_prop("reached", reach);

    let exported = eval_module(m.finish("repl:text")).unwrap();
    assert_eq!(exported.property("reached"), Some(&Exported::Int(99)));
    match exported.property("holder") {
        Some(Exported::Object { properties, .. }) => {
            assert!(properties.iter().all(|(n, _)| n != "secret"));
        }
        other => panic!("expected an object, got {other:?}"),
    }
}

#[test]
fn entries_define_and_override() {
    let mut m = ModuleBuilder::new();
    let k1 = m.str("a");
    let one = m.int(1);
    let entry_a = m.entry(k1, one);
    let base_body = m.body(vec![entry_a]);
    let base = m.new_dynamic(base_body);
    let k1_again = m.str("a");
    let ten = m.int(10);
    let override_a = m.entry(k1_again, ten);
    let k2 = m.str("b");
    let two = m.int(2);
    let entry_b = m.entry(k2, two);
    let amend_body = m.body(vec![override_a, entry_b]);
    let out = m.amend_expr(base, amend_body);
    m.module_prop("out", out);

    let exported = eval_module(m.finish("repl:text")).unwrap();
    match exported.property("out") {
        Some(Exported::Object { entries, .. }) => {
            assert_eq!(
                entries,
                &vec![
                    (Exported::string("a"), Exported::Int(10)),
                    (Exported::string("b"), Exported::Int(2)),
                ]
            );
        }
        other => panic!("expected an object, got {other:?}"),
    }
}

#[test]
fn amendment_children_late_bind_this() {
    // base = new Dynamic { label = "base"; show = this.label }
    // child = base { label = "child" } — show must see the child's label.
    let mut m = ModuleBuilder::new();
    let base_label = m.str("base");
    let label = m.prop("label", base_label);
    let this = m.this();
    let this_label = m.get(this, "label");
    let show = m.prop("show", this_label);
    let base_body = m.body(vec![label, show]);
    let base = m.new_dynamic(base_body);
    let child_label = m.str("child");
    let label_override = m.prop("label", child_label);
    let child_body = m.body(vec![label_override]);
    let child = m.amend_expr(base, child_body);
    m.module_prop("child", child);

    let exported = eval_module(m.finish("repl:text")).unwrap();
    let child = exported.property("child").unwrap();
    assert_eq!(child.property("show"), Some(&Exported::string("child")));
}

#[test]
fn module_entry_nodes_are_rejected_in_object_bodies() {
    // Guard against fixture mistakes: an object body member must be a
    // member node, not a class entry.
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    let bogus = m.b.add(
        NodeKind::ClassPropertyExpr {
            doc: None,
            modifiers: Modifiers::NONE,
            name: "x".to_owned(),
            ty: None,
            expr: one,
        },
        common::span0(),
    );
    let body = m.body(vec![bogus]);
    let obj = m.new_dynamic(body);
    m.module_prop("out", obj);
    let err = eval_module(m.finish("repl:text")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
}
