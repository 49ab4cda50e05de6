//! Test-harness semantics: fact reporting and the expected-file
//! round-trip.

mod common;

use std::{fs, rc::Rc};

use common::FixtureParser;
use pkl::{EvaluatorBuilder, ExampleStatus, ModuleUri};
use pretty_assertions::assert_eq;

fn evaluator() -> pkl::Evaluator {
    EvaluatorBuilder::new()
        .with_parser(Rc::new(FixtureParser))
        .build()
        .unwrap()
}

#[test]
fn passing_facts_report_no_failures() {
    let dir = tempfile::tempdir().unwrap();
    let module = dir.path().join("suite.pkl");
    fs::write(&module, "amends \"pkl:test\"\nfact \"arithmetic\" 1 + 1 == 2\n").unwrap();

    let mut evaluator = evaluator();
    let uri = ModuleUri::from_file_path(&module).as_str().to_owned();
    let results = evaluator.evaluate_test(&uri, false).unwrap();
    assert!(!results.failed());
    assert_eq!(results.facts.len(), 1);
    assert_eq!(results.facts[0].name, "arithmetic");
    assert!(results.facts[0].failures.is_empty());
}

#[test]
fn failing_facts_render_source_and_module_uri() {
    let dir = tempfile::tempdir().unwrap();
    let module = dir.path().join("suite.pkl");
    fs::write(
        &module,
        "amends \"pkl:test\"\nfact \"arithmetic\" 1 + 1 == 2\nfact \"arithmetic\" 1 == 2\n",
    )
    .unwrap();

    let mut evaluator = evaluator();
    let uri = ModuleUri::from_file_path(&module).as_str().to_owned();
    let results = evaluator.evaluate_test(&uri, false).unwrap();
    assert!(results.failed());
    assert_eq!(results.facts[0].failures, vec![format!("1 == 2 \u{274c} ({uri})")]);
}

#[test]
fn non_test_modules_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let module = dir.path().join("plain.pkl");
    fs::write(&module, "x = 1\n").unwrap();

    let mut evaluator = evaluator();
    let uri = ModuleUri::from_file_path(&module).as_str().to_owned();
    let err = evaluator.evaluate_test(&uri, false).unwrap_err();
    assert!(err.message().contains("does not amend `pkl:test`"), "{}", err.message());
}

#[test]
fn first_run_writes_the_expected_file_and_passes() {
    let dir = tempfile::tempdir().unwrap();
    let module = dir.path().join("suite.pkl");
    fs::write(&module, "amends \"pkl:test\"\nexample \"answer\" 42\n").unwrap();
    let expected_path = dir.path().join("suite-expected.pcf");
    assert!(!expected_path.exists());

    let mut evaluator = evaluator();
    let uri = ModuleUri::from_file_path(&module).as_str().to_owned();
    let results = evaluator.evaluate_test(&uri, false).unwrap();
    assert!(!results.failed());
    assert!(matches!(results.examples[0].status, ExampleStatus::Written));
    let written = fs::read_to_string(&expected_path).unwrap();
    assert!(written.contains("[\"answer\"]"), "{written}");
    assert!(written.contains("42"), "{written}");

    // A second, unchanged run compares equal.
    let mut second_evaluator = crate::evaluator();
    let results = second_evaluator.evaluate_test(&uri, false).unwrap();
    assert!(matches!(results.examples[0].status, ExampleStatus::Passed));
}

#[test]
fn changed_examples_fail_and_write_the_actual_file() {
    let dir = tempfile::tempdir().unwrap();
    let module = dir.path().join("suite.pkl");
    fs::write(&module, "amends \"pkl:test\"\nexample \"answer\" 42\n").unwrap();
    let uri = ModuleUri::from_file_path(&module).as_str().to_owned();

    evaluator().evaluate_test(&uri, false).unwrap();

    // Change the example value; the expected file is now stale.
    fs::write(&module, "amends \"pkl:test\"\nexample \"answer\" 43\n").unwrap();
    let mut evaluator = evaluator();
    let results = evaluator.evaluate_test(&uri, false).unwrap();
    assert!(results.failed());
    let ExampleStatus::Mismatch {
        expected_path,
        actual_path,
        message,
    } = &results.examples[0].status
    else {
        panic!("expected a mismatch, got {:?}", results.examples[0].status);
    };
    assert!(expected_path.ends_with("suite-expected.pcf"));
    assert!(actual_path.ends_with("suite-actual.pcf"));
    assert!(actual_path.exists());
    // The diff text names both files.
    assert!(message.contains("suite-expected.pcf"), "{message}");
    assert!(message.contains("suite-actual.pcf"), "{message}");
    let actual = fs::read_to_string(actual_path).unwrap();
    assert!(actual.contains("43"), "{actual}");
}

#[test]
fn overwrite_rewrites_the_expected_file() {
    let dir = tempfile::tempdir().unwrap();
    let module = dir.path().join("suite.pkl");
    fs::write(&module, "amends \"pkl:test\"\nexample \"answer\" 42\n").unwrap();
    let uri = ModuleUri::from_file_path(&module).as_str().to_owned();
    evaluator().evaluate_test(&uri, false).unwrap();

    fs::write(&module, "amends \"pkl:test\"\nexample \"answer\" 43\n").unwrap();
    let results = evaluator().evaluate_test(&uri, true).unwrap();
    assert!(matches!(results.examples[0].status, ExampleStatus::Written));
    let expected = fs::read_to_string(dir.path().join("suite-expected.pcf")).unwrap();
    assert!(expected.contains("43"), "{expected}");

    // And the rewritten file now matches.
    let results = evaluator().evaluate_test(&uri, false).unwrap();
    assert!(!results.failed());
}
