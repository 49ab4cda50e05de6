//! CST structural invariants: parent back-references, span nesting,
//! and builder contracts.

mod common;

use common::{FixtureParser, ModuleBuilder};
use pkl::{
    cst::{Expr, NodeKind, TreeBuilder},
    ModuleParser, ModuleUri, Span,
};
use pretty_assertions::assert_eq;

#[test]
fn every_child_lists_its_parent_and_vice_versa() {
    let mut m = ModuleBuilder::new();
    let one = m.int(1);
    let two = m.int(2);
    let sum = m.binop(pkl::cst::BinaryOp::Add, one, two);
    m.module_prop("x", sum);
    let tree = m.finish("repl:text");

    tree.validate().unwrap();
    let mut stack = vec![tree.root()];
    let mut visited = 0;
    while let Some(node) = stack.pop() {
        for child in tree.children(node) {
            assert_eq!(tree.parent(child), Some(node), "child {child} of {node}");
            assert!(tree.children(node).contains(&child));
            stack.push(child);
        }
        visited += 1;
    }
    assert!(visited >= 5, "module, entry, binop, and operands");
}

#[test]
fn parsed_fixture_trees_validate() {
    let source = "x = 1 + 2\nname = \"app\"\n";
    let uri = ModuleUri::parse("repl:demo").unwrap();
    let tree = FixtureParser.parse(source, &uri).unwrap();
    tree.validate().unwrap();
    assert_eq!(tree.uri(), "repl:demo");
    assert_eq!(tree.source(), source);
}

#[test]
fn spans_nest_within_their_parents() {
    let source = "x = 1 + 2\n";
    let uri = ModuleUri::parse("repl:demo").unwrap();
    let tree = FixtureParser.parse(source, &uri).unwrap();
    let mut stack = vec![tree.root()];
    while let Some(node) = stack.pop() {
        let span = tree.span(node);
        for child in tree.children(node) {
            assert!(
                span.contains(tree.span(child)),
                "span of {child} escapes {node}"
            );
            stack.push(child);
        }
    }
}

#[test]
fn snippets_slice_source_by_code_points() {
    let source = "x = 1 + 2\n";
    let uri = ModuleUri::parse("repl:demo").unwrap();
    let tree = FixtureParser.parse(source, &uri).unwrap();
    // The module entry's expression is the binop covering "1 + 2".
    let NodeKind::Module { entries, .. } = tree.kind(tree.root()) else {
        panic!("root is a module");
    };
    let NodeKind::ClassPropertyExpr { expr, .. } = tree.kind(entries[0]) else {
        panic!("entry is a property");
    };
    assert_eq!(tree.snippet(tree.span(*expr)), "1 + 2");
}

#[test]
fn sibling_spans_are_ordered() {
    let source = "a = 1\nb = 2\nc = 3\n";
    let uri = ModuleUri::parse("repl:demo").unwrap();
    let tree = FixtureParser.parse(source, &uri).unwrap();
    let children = tree.children(tree.root());
    for pair in children.windows(2) {
        assert!(tree.span(pair[0]).char_index <= tree.span(pair[1]).char_index);
    }
}

#[test]
#[should_panic(expected = "already has a parent")]
fn attaching_a_node_to_two_parents_panics() {
    let mut b = TreeBuilder::new();
    let child = b.expr(Expr::Null, Span::new(0, 4));
    let _first = b.expr(Expr::Parenthesized(child), Span::new(0, 6));
    let _second = b.expr(Expr::Parenthesized(child), Span::new(0, 6));
}

#[test]
#[should_panic(expected = "does not exist yet")]
fn children_must_be_created_first() {
    let mut b = TreeBuilder::new();
    let mut other = TreeBuilder::new();
    let foreign = other.expr(Expr::Null, Span::new(0, 1));
    let _node = b.expr(Expr::Parenthesized(foreign), Span::new(0, 2));
}

#[test]
fn locations_are_line_and_column() {
    let source = "a = 1\nb = 2\n";
    let uri = ModuleUri::parse("repl:demo").unwrap();
    let tree = FixtureParser.parse(source, &uri).unwrap();
    let children = tree.children(tree.root());
    let second = tree.location(children[1]);
    assert_eq!((second.line, second.column), (2, 1));
}
