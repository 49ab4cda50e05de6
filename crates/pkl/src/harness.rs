//! The test harness for modules amending `pkl:test`.
//!
//! `facts` is a mapping from fact-group name to a listing of boolean
//! expressions; every non-true member is a failure rendered as
//! `"<source> ❌ (<moduleUri>)"`. `examples` is a mapping from example
//! name to a listing of values compared against the sibling
//! `<module>-expected.pcf` file, which is written on first run;
//! mismatches write `<module>-actual.pcf` and report both paths.

use std::{
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use crate::{
    error::{EvalError, EvalResult},
    eval::Machine,
    object::{MemberDef, ObjRef, ObjectKind},
    render,
    uri::ModuleUri,
    value::Value,
};

/// Result of one fact group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactResult {
    pub name: String,
    /// Rendered failure lines; empty means the group passed.
    pub failures: Vec<String>,
}

/// Result of one named example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleResult {
    pub name: String,
    pub status: ExampleStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExampleStatus {
    Passed,
    /// No expected file existed (or overwrite was forced); it was
    /// written from the actual values.
    Written,
    Mismatch {
        expected_path: PathBuf,
        actual_path: PathBuf,
        message: String,
    },
}

/// Results of one test-module run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResults {
    pub module_uri: String,
    pub facts: Vec<FactResult>,
    pub examples: Vec<ExampleResult>,
}

impl TestResults {
    #[must_use]
    pub fn failed(&self) -> bool {
        self.facts.iter().any(|f| !f.failures.is_empty())
            || self
                .examples
                .iter()
                .any(|e| matches!(e.status, ExampleStatus::Mismatch { .. }))
    }
}

pub(crate) fn run_test_module(m: &mut Machine, uri: &ModuleUri, overwrite: bool) -> EvalResult<TestResults> {
    let module = m.load_module(uri, None)?;
    if !amends_test_module(&module) {
        return Err(EvalError::type_error(format!(
            "Module `{uri}` is not a test module: it does not amend `pkl:test`."
        )));
    }
    let facts = collect_facts(m, &module, uri)?;
    let examples = collect_examples(m, &module, uri, overwrite)?;
    Ok(TestResults {
        module_uri: uri.as_str().to_owned(),
        facts,
        examples,
    })
}

fn amends_test_module(module: &ObjRef) -> bool {
    let mut current = module.parent.clone();
    while let Some(obj) = current {
        if obj.uri.as_deref() == Some("pkl:test") {
            return true;
        }
        current = obj.parent.clone();
    }
    false
}

fn mapping_property(m: &mut Machine, module: &ObjRef, name: &str) -> EvalResult<Option<ObjRef>> {
    let Some(member) = module.visible_property(name) else {
        return Ok(None);
    };
    let value = m.force_member(module, &member, name)?;
    match value {
        Value::Object(obj) if obj.kind == ObjectKind::Mapping => Ok(Some(obj)),
        Value::Null => Ok(None),
        other => Err(EvalError::type_error(format!(
            "Expected `{name}` to be a `Mapping`, but got a value of type `{}`.",
            other.type_name()
        ))),
    }
}

fn collect_facts(m: &mut Machine, module: &ObjRef, uri: &ModuleUri) -> EvalResult<Vec<FactResult>> {
    let Some(facts) = mapping_property(m, module, "facts")? else {
        return Ok(Vec::new());
    };
    let entries = facts.entries.borrow().clone();
    let mut results = Vec::with_capacity(entries.len());
    for (key, member) in &entries {
        let group_name = key.as_str().unwrap_or("(unnamed)").to_owned();
        let group = m.force_member(&facts, member, &group_name)?;
        let Value::Object(listing) = &group else {
            return Err(EvalError::type_error(format!(
                "Expected fact group `{group_name}` to be a `Listing`, but got a value of type `{}`.",
                group.type_name()
            )));
        };
        let listing = Rc::clone(listing);
        let fact_members = listing.elements.borrow().clone();
        let mut failures = Vec::new();
        for (i, fact) in fact_members.iter().enumerate() {
            let value = m.force_member(&listing, fact, &format!("[{i}]"))?;
            if value == Value::Bool(true) {
                continue;
            }
            failures.push(format!("{} \u{274c} ({uri})", fact_source(fact)));
        }
        results.push(FactResult {
            name: group_name,
            failures,
        });
    }
    Ok(results)
}

/// The source text of a fact expression, sliced from the module text by
/// the thunk's span.
fn fact_source(member: &crate::object::Member) -> String {
    match &member.def {
        MemberDef::Expr(thunk) => thunk.tree.snippet(thunk.tree.span(thunk.expr)),
        _ => "<fact>".to_owned(),
    }
}

fn collect_examples(
    m: &mut Machine,
    module: &ObjRef,
    uri: &ModuleUri,
    overwrite: bool,
) -> EvalResult<Vec<ExampleResult>> {
    let Some(examples) = mapping_property(m, module, "examples")? else {
        return Ok(Vec::new());
    };
    let entries = examples.entries.borrow().clone();
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    let mut rendered = String::from("examples {\n");
    let mut names = Vec::with_capacity(entries.len());
    for (key, member) in &entries {
        let name = key.as_str().unwrap_or("(unnamed)").to_owned();
        let value = m.force_member(&examples, member, &name)?;
        rendered.push_str(&format!("  [{}] {{\n", render::quote(&name)));
        match m.export_value(&value)? {
            // A listing of example values renders one value per line.
            crate::value::Exported::List(items) => {
                for item in items {
                    rendered.push_str(&format!("    {}\n", render::render_value(&item, 2)));
                }
            }
            single => rendered.push_str(&format!("    {}\n", render::render_value(&single, 2))),
        }
        rendered.push_str("  }\n");
        names.push(name);
    }
    rendered.push_str("}\n");

    let expected_path = sibling_file(uri, "-expected.pcf")?;
    let actual_path = sibling_file(uri, "-actual.pcf")?;

    if overwrite || !expected_path.exists() {
        fs::write(&expected_path, &rendered)
            .map_err(|e| EvalError::io(format!("Cannot write `{}`: {e}.", expected_path.display())))?;
        return Ok(names
            .into_iter()
            .map(|name| ExampleResult {
                name,
                status: ExampleStatus::Written,
            })
            .collect());
    }

    let expected = fs::read_to_string(&expected_path)
        .map_err(|e| EvalError::io(format!("Cannot read `{}`: {e}.", expected_path.display())))?;
    if normalize_line_endings(&expected) == normalize_line_endings(&rendered) {
        return Ok(names
            .into_iter()
            .map(|name| ExampleResult {
                name,
                status: ExampleStatus::Passed,
            })
            .collect());
    }

    fs::write(&actual_path, &rendered)
        .map_err(|e| EvalError::io(format!("Cannot write `{}`: {e}.", actual_path.display())))?;
    let message = format!(
        "Expected ({}):\n{expected}\nActual ({}):\n{rendered}",
        expected_path.display(),
        actual_path.display()
    );
    Ok(names
        .into_iter()
        .map(|name| ExampleResult {
            name,
            status: ExampleStatus::Mismatch {
                expected_path: expected_path.clone(),
                actual_path: actual_path.clone(),
                message: message.clone(),
            },
        })
        .collect())
}

fn sibling_file(uri: &ModuleUri, suffix: &str) -> EvalResult<PathBuf> {
    let path = uri.file_path().ok_or_else(|| {
        EvalError::io(format!(
            "Expected-file comparison requires a `file:` test module, but got `{uri}`."
        ))
    })?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "test".to_owned());
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(format!("{stem}{suffix}")))
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
}
