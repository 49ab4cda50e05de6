//! Evaluator lifecycle: outputs, deterministic rendering, and close
//! semantics.

mod common;

use common::{evaluator_for, ModuleBuilder};
use pkl::{ErrorKind, Exported};
use pretty_assertions::assert_eq;

/// Builds a module with
/// `output.files { ["foo.yml"] { text = "foo: foo text" } }`.
fn output_files_module() -> pkl::cst::Tree {
    let mut m = ModuleBuilder::new();
    let text_value = m.str("foo: foo text");
    let text_prop = m.prop("text", text_value);
    let entry_body = m.body(vec![text_prop]);
    let entry_obj = m.new_dynamic(entry_body);
    let key = m.str("foo.yml");
    let entry = m.entry(key, entry_obj);
    let files_body = m.body(vec![entry]);
    let files_ty = m.declared_type("Mapping");
    let files_obj = m.b.expr(
        pkl::cst::Expr::New {
            ty: Some(files_ty),
            body: files_body,
        },
        common::span0(),
    );
    let files_prop = m.prop("files", files_obj);
    let output_body = m.body(vec![files_prop]);
    let output_obj = m.new_dynamic(output_body);
    m.module_prop("output", output_obj);
    m.finish("repl:text")
}

#[test]
fn output_files_materialize_deterministically() {
    let mut evaluator = evaluator_for(output_files_module());
    evaluator.evaluate_text("fixture").unwrap();
    let files = evaluator.evaluate_output_files("repl:text").unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name(), "foo.yml");
    assert_eq!(files[0].text().unwrap(), "foo: foo text");
}

#[test]
fn closed_evaluator_rejects_reads_of_output_files() {
    let mut evaluator = evaluator_for(output_files_module());
    evaluator.evaluate_text("fixture").unwrap();
    let files = evaluator.evaluate_output_files("repl:text").unwrap();
    evaluator.close();
    let err = files[0].text().unwrap_err();
    assert!(err.message().contains("closed"), "{}", err.message());
}

#[test]
fn closed_evaluator_rejects_evaluation() {
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    m.module_prop("x", one);
    let mut evaluator = evaluator_for(m.finish("repl:text"));
    evaluator.evaluate_text("fixture").unwrap();
    evaluator.close();
    assert!(evaluator.is_closed());
    let err = evaluator.evaluate_text("fixture").unwrap_err();
    assert!(err.message().contains("closed"), "{}", err.message());
    // Closing twice is fine.
    evaluator.close();
}

#[test]
fn values_returned_before_close_remain_valid() {
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    m.module_prop("x", one);
    let mut evaluator = evaluator_for(m.finish("repl:text"));
    let exported = evaluator.evaluate_text("fixture").unwrap();
    evaluator.close();
    assert_eq!(exported.property("x"), Some(&Exported::Int(1)));
}

#[test]
fn output_text_defaults_to_the_rendered_module() {
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    m.module_prop("x", one);
    let text = m.str("two");
    m.module_prop("y", text);
    let mut evaluator = evaluator_for(m.finish("repl:text"));
    evaluator.evaluate_text("fixture").unwrap();
    let rendered = evaluator.evaluate_output_text("repl:text").unwrap();
    assert_eq!(rendered, "x = 1\ny = \"two\"\n");
}

#[test]
fn explicit_output_text_wins() {
    let mut m = ModuleBuilder::new();
    let text_value = m.str("custom");
    let text_prop = m.prop("text", text_value);
    let output_body = m.body(vec![text_prop]);
    let output_obj = m.new_dynamic(output_body);
    m.module_prop("output", output_obj);
    let mut evaluator = evaluator_for(m.finish("repl:text"));
    evaluator.evaluate_text("fixture").unwrap();
    let rendered = evaluator.evaluate_output_text("repl:text").unwrap();
    assert_eq!(rendered, "custom");
}

#[test]
fn modules_without_output_files_yield_no_files() {
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    m.module_prop("x", one);
    let mut evaluator = evaluator_for(m.finish("repl:text"));
    evaluator.evaluate_text("fixture").unwrap();
    let files = evaluator.evaluate_output_files("repl:text").unwrap();
    assert!(files.is_empty());
}

#[test]
fn missing_uris_report_unparseable_or_unresolvable() {
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    m.module_prop("x", one);
    let mut evaluator = evaluator_for(m.finish("repl:text"));
    let err = evaluator.evaluate("not-a-uri").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolve);
}
