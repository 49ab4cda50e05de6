//! Module resolution: file loading, relative imports, security policy,
//! module-path roots, and failure memoization.

mod common;

use std::{fs, rc::Rc};

use common::FixtureParser;
use pkl::{ErrorKind, EvaluatorBuilder, Exported, ModuleUri, SecurityManager};
use pretty_assertions::assert_eq;

fn evaluator() -> pkl::Evaluator {
    EvaluatorBuilder::new()
        .with_parser(Rc::new(FixtureParser))
        .build()
        .unwrap()
}

fn file_uri(path: &std::path::Path) -> String {
    ModuleUri::from_file_path(path).as_str().to_owned()
}

#[test]
fn evaluates_a_file_module() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.pkl");
    fs::write(&path, "x = 42\nname = \"app\"\n").unwrap();

    let mut evaluator = evaluator();
    let exported = evaluator.evaluate(&file_uri(&path)).unwrap();
    assert_eq!(exported.property("x"), Some(&Exported::Int(42)));
    assert_eq!(exported.property("name"), Some(&Exported::string("app")));
}

#[test]
fn imports_resolve_relative_to_the_importing_module() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("dep.pkl"), "x = 7\n").unwrap();
    let main = dir.path().join("main.pkl");
    fs::write(&main, "import \"dep.pkl\" as dep\ny = dep.x\n").unwrap();

    let mut evaluator = evaluator();
    let exported = evaluator.evaluate(&file_uri(&main)).unwrap();
    assert_eq!(exported.property("y"), Some(&Exported::Int(7)));
}

#[test]
fn import_alias_defaults_to_the_file_stem() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("dep.pkl"), "x = 3\n").unwrap();
    let main = dir.path().join("main.pkl");
    fs::write(&main, "import \"dep.pkl\"\ny = dep.x\n").unwrap();

    let mut evaluator = evaluator();
    let exported = evaluator.evaluate(&file_uri(&main)).unwrap();
    assert_eq!(exported.property("y"), Some(&Exported::Int(3)));
}

#[test]
fn module_allowlist_denial_names_the_module() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.pkl");
    fs::write(&path, "x = 1\n").unwrap();

    let security = SecurityManager::builder().allow_module("^repl:").build().unwrap();
    let mut evaluator = EvaluatorBuilder::new()
        .with_parser(Rc::new(FixtureParser))
        .with_security(security)
        .build()
        .unwrap();
    let err = evaluator.evaluate(&file_uri(&path)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolve);
    assert!(err.message().starts_with("Refusing to load module `file://"), "{}", err.message());
}

#[test]
fn root_dir_jails_file_access() {
    let dir = tempfile::tempdir().unwrap();
    let inside = dir.path().join("jail");
    fs::create_dir_all(&inside).unwrap();
    fs::write(inside.join("ok.pkl"), "x = 1\n").unwrap();
    let outside = dir.path().join("outside.pkl");
    fs::write(&outside, "x = 2\n").unwrap();

    let security = SecurityManager::builder()
        .allow_module("^file:")
        .root_dir(&inside)
        .build()
        .unwrap();
    let mut evaluator = EvaluatorBuilder::new()
        .with_parser(Rc::new(FixtureParser))
        .with_security(security)
        .build()
        .unwrap();

    evaluator.evaluate(&file_uri(&inside.join("ok.pkl"))).unwrap();
    let err = evaluator.evaluate(&file_uri(&outside)).unwrap_err();
    assert!(err.message().contains("outside the configured root directory"), "{}", err.message());
}

#[test]
fn missing_modules_are_io_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut evaluator = evaluator();
    let err = evaluator.evaluate(&file_uri(&dir.path().join("nope.pkl"))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn unknown_schemes_are_resolve_errors() {
    let mut evaluator = evaluator();
    let err = evaluator.evaluate("customscheme:thing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolve);
    assert!(err.message().contains("no loader is registered for scheme `customscheme:`"), "{}", err.message());
}

#[test]
fn broken_modules_fail_identically_on_repeat_evaluation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.pkl");
    fs::write(&path, "x = \n").unwrap();

    let mut evaluator = evaluator();
    let uri = file_uri(&path);
    let first = evaluator.evaluate(&uri).unwrap_err();
    let second = evaluator.evaluate(&uri).unwrap_err();
    assert_eq!(first.kind(), ErrorKind::Parse);
    assert_eq!(first.render(), second.render());
}

#[test]
fn module_path_roots_resolve_in_order() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    fs::write(first.path().join("lib.pkl"), "x = 1\n").unwrap();
    fs::write(second.path().join("lib.pkl"), "x = 2\n").unwrap();

    let mut evaluator = EvaluatorBuilder::new()
        .with_parser(Rc::new(FixtureParser))
        .with_module_path(vec![first.path().to_owned(), second.path().to_owned()])
        .build()
        .unwrap();
    let exported = evaluator.evaluate("modulepath:/lib.pkl").unwrap();
    assert_eq!(exported.property("x"), Some(&Exported::Int(1)));
}

#[test]
fn repl_text_fragments_get_repl_uris() {
    let mut evaluator = evaluator();
    let exported = evaluator.evaluate_text("x = 5\n").unwrap();
    assert_eq!(exported.property("x"), Some(&Exported::Int(5)));
}

#[test]
fn modules_amending_other_modules_inherit_properties() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("base.pkl"), "x = 1\ny = 2\n").unwrap();
    let child = dir.path().join("child.pkl");
    fs::write(&child, "amends \"base.pkl\"\ny = 20\n").unwrap();

    let mut evaluator = evaluator();
    let exported = evaluator.evaluate(&file_uri(&child)).unwrap();
    assert_eq!(exported.property("x"), Some(&Exported::Int(1)));
    assert_eq!(exported.property("y"), Some(&Exported::Int(20)));
}

#[test]
fn amending_modules_cannot_define_new_properties() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("base.pkl"), "x = 1\n").unwrap();
    let child = dir.path().join("child.pkl");
    fs::write(&child, "amends \"base.pkl\"\nz = 3\n").unwrap();

    let mut evaluator = evaluator();
    let err = evaluator.evaluate(&file_uri(&child)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
    assert!(err.message().contains("new property `z`"), "{}", err.message());
}

#[test]
fn shared_module_cache_is_reused_across_evaluators() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.pkl");
    fs::write(&path, "x = 9\n").unwrap();

    let cache = pkl::ModuleCache::new();
    let uri = file_uri(&path);
    for _ in 0..2 {
        let mut evaluator = EvaluatorBuilder::new()
            .with_parser(Rc::new(FixtureParser))
            .with_module_cache(cache.clone())
            .build()
            .unwrap();
        let exported = evaluator.evaluate(&uri).unwrap();
        assert_eq!(exported.property("x"), Some(&Exported::Int(9)));
    }
    assert_eq!(cache.settled_count(), 1);
}
