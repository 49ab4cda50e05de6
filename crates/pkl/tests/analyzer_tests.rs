//! Import-graph analysis: transitive walks, glob expansion, and cycle
//! reporting.

mod common;

use std::{fs, path::Path, rc::Rc};

use common::FixtureParser;
use pkl::{EvaluatorBuilder, ModuleUri};
use pretty_assertions::assert_eq;

fn evaluator() -> pkl::Evaluator {
    EvaluatorBuilder::new()
        .with_parser(Rc::new(FixtureParser))
        .build()
        .unwrap()
}

/// The canonical (real-path) file URI the analyzer reports.
fn canonical_uri(path: &Path) -> String {
    ModuleUri::from_file_path(&fs::canonicalize(path).unwrap())
        .as_str()
        .to_owned()
}

#[test]
fn glob_import_of_sibling_files_is_self_inclusive() {
    let dir = tempfile::tempdir().unwrap();
    let file1 = dir.path().join("file1.pkl");
    fs::write(&file1, "import* \"*.pkl\" as all\n").unwrap();
    let file2 = dir.path().join("file2.pkl");
    fs::write(&file2, "x = 1\n").unwrap();
    let file3 = dir.path().join("file3.pkl");
    fs::write(&file3, "y = 2\n").unwrap();

    let mut evaluator = evaluator();
    let requested = ModuleUri::from_file_path(&file1).as_str().to_owned();
    let graph = evaluator.analyze_imports(&[&requested]).unwrap();

    let file1_uri = canonical_uri(&file1);
    let imports = graph.imports_of(&file1_uri).expect("file1 was analyzed");
    let expected: Vec<String> = vec![canonical_uri(&file1), canonical_uri(&file2), canonical_uri(&file3)];
    let mut actual: Vec<String> = imports.iter().cloned().collect();
    actual.sort();
    assert_eq!(actual, expected);

    // The siblings have no outgoing imports.
    assert!(graph.imports_of(&canonical_uri(&file2)).unwrap().is_empty());
    assert!(graph.imports_of(&canonical_uri(&file3)).unwrap().is_empty());
}

#[test]
fn glob_patterns_do_not_cross_directories_without_double_star() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("sub");
    fs::create_dir_all(&sub).unwrap();
    fs::write(dir.path().join("top.pkl"), "import* \"*.pkl\" as all\n").unwrap();
    fs::write(sub.join("nested.pkl"), "x = 1\n").unwrap();

    let mut evaluator = evaluator();
    let top = dir.path().join("top.pkl");
    let requested = ModuleUri::from_file_path(&top).as_str().to_owned();
    let graph = evaluator.analyze_imports(&[&requested]).unwrap();
    let imports = graph.imports_of(&canonical_uri(&top)).unwrap();
    assert!(
        imports.iter().all(|uri| !uri.contains("nested.pkl")),
        "{imports:?}"
    );
}

#[test]
fn double_star_descends_into_subdirectories() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("sub");
    fs::create_dir_all(&sub).unwrap();
    fs::write(dir.path().join("top.pkl"), "import* \"**/*.pkl\" as all\n").unwrap();
    let nested = sub.join("nested.pkl");
    fs::write(&nested, "x = 1\n").unwrap();

    let mut evaluator = evaluator();
    let top = dir.path().join("top.pkl");
    let requested = ModuleUri::from_file_path(&top).as_str().to_owned();
    let graph = evaluator.analyze_imports(&[&requested]).unwrap();
    let imports = graph.imports_of(&canonical_uri(&top)).unwrap();
    assert!(imports.contains(&canonical_uri(&nested)), "{imports:?}");
}

#[test]
fn a_module_importing_itself_is_a_one_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let selfish = dir.path().join("selfish.pkl");
    fs::write(&selfish, "import \"selfish.pkl\" as me\n").unwrap();

    let mut evaluator = evaluator();
    let requested = ModuleUri::from_file_path(&selfish).as_str().to_owned();
    let graph = evaluator.analyze_imports(&[&requested]).unwrap();
    let cycles = graph.cycles();
    assert_eq!(cycles, vec![vec![canonical_uri(&selfish)]]);
}

#[test]
fn mutually_importing_modules_are_a_two_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.pkl");
    let b = dir.path().join("b.pkl");
    fs::write(&a, "import \"b.pkl\" as other\n").unwrap();
    fs::write(&b, "import \"a.pkl\" as other\n").unwrap();

    let mut evaluator = evaluator();
    let requested = ModuleUri::from_file_path(&a).as_str().to_owned();
    let graph = evaluator.analyze_imports(&[&requested]).unwrap();
    let cycles = graph.cycles();
    assert_eq!(cycles.len(), 1);
    let mut cycle = cycles[0].clone();
    cycle.sort();
    let mut expected = vec![canonical_uri(&a), canonical_uri(&b)];
    expected.sort();
    assert_eq!(cycle, expected);
}

#[test]
fn acyclic_graphs_report_no_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.pkl");
    fs::write(&a, "import \"b.pkl\" as other\n").unwrap();
    fs::write(dir.path().join("b.pkl"), "x = 1\n").unwrap();

    let mut evaluator = evaluator();
    let requested = ModuleUri::from_file_path(&a).as_str().to_owned();
    let graph = evaluator.analyze_imports(&[&requested]).unwrap();
    assert!(graph.cycles().is_empty());
}

#[test]
fn stdlib_modules_are_leaves() {
    let dir = tempfile::tempdir().unwrap();
    let test_module = dir.path().join("suite.pkl");
    fs::write(&test_module, "amends \"pkl:test\"\nfact \"t\" 1 == 1\n").unwrap();

    let mut evaluator = evaluator();
    let requested = ModuleUri::from_file_path(&test_module).as_str().to_owned();
    let graph = evaluator.analyze_imports(&[&requested]).unwrap();
    let imports = graph.imports_of(&canonical_uri(&test_module)).unwrap();
    assert!(imports.contains("pkl:test"), "{imports:?}");
    assert!(graph.imports_of("pkl:test").unwrap().is_empty());
}
