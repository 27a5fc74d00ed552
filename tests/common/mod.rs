//! Shared test helpers: tree builders and a plain nested-loop reference
//! executor the oblivious engine is checked against.

// Each integration-test binary compiles this module separately and uses a
// different subset of the helpers.
#![allow(dead_code)]

use oblijoin::config::{EngineConfig, EngineMode};
use oblijoin::schema::Schema;
use oblijoin::table::ObliviousTable;
use oblijoin::tree::{JoinTree, NodeId};
use oblijoin::{ObliviousJoin, TupleCryptor};

/// Build a plaintext table with named columns.
pub fn table(name: &str, cols: Vec<&str>, rows: &[Vec<i64>]) -> ObliviousTable {
    ObliviousTable::from_rows(name, Schema::new(cols).unwrap(), rows)
}

/// The attribute rows of a table as a sorted multiset.
pub fn sorted_rows(table: &ObliviousTable) -> Vec<Vec<i64>> {
    let width = table.schema().width();
    let mut rows: Vec<Vec<i64>> = table
        .tuples()
        .iter()
        .map(|t| t.attributes[..width].to_vec())
        .collect();
    rows.sort();
    rows
}

/// Evaluate the join tree the boring way: nested loops over plaintext
/// tables, producing the pre-order concatenation of all columns.
pub fn reference_join(tree: &JoinTree) -> Vec<Vec<i64>> {
    let mut rows = subtree_rows(tree, tree.root());
    rows.sort();
    rows
}

fn subtree_rows(tree: &JoinTree, id: NodeId) -> Vec<Vec<i64>> {
    let node = tree.node(id);
    let width = node.table.schema().width();
    let mut rows: Vec<Vec<i64>> = node
        .table
        .tuples()
        .iter()
        .map(|t| t.attributes[..width].to_vec())
        .collect();

    for &child in tree.children(id) {
        let constraint = tree.node(child).constraint.as_ref().expect("child edge");
        let parent_col = node
            .table
            .schema()
            .column_index(&constraint.parent_column)
            .expect("parent column");
        let child_col = tree
            .node(child)
            .table
            .schema()
            .column_index(&constraint.child_column)
            .expect("child column");
        let child_rows = subtree_rows(tree, child);

        rows = rows
            .iter()
            .flat_map(|parent_row| {
                child_rows
                    .iter()
                    .filter(|child_row| {
                        constraint.matches(parent_row[parent_col], child_row[child_col])
                    })
                    .map(|child_row| {
                        let mut row = parent_row.clone();
                        row.extend_from_slice(child_row);
                        row
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
    }
    rows
}

/// Run the tree through the engine in plaintext mode.
pub fn run_plaintext(tree: &mut JoinTree) -> ObliviousTable {
    let mut engine = ObliviousJoin::new(EngineConfig::quiet()).unwrap();
    engine.execute(tree).unwrap()
}

/// Run the tree through the engine in encrypted mode and decrypt the
/// result.
pub fn run_encrypted(tree: &mut JoinTree) -> ObliviousTable {
    let config = EngineConfig::quiet().with_mode(EngineMode::Encrypted);
    let mut engine = ObliviousJoin::with_cryptor(config, TupleCryptor::generate()).unwrap();
    for id in tree.pre_order() {
        engine
            .dispatcher()
            .cryptor()
            .encrypt_batch(tree.table_mut(id).tuples_mut())
            .unwrap();
    }
    let mut result = engine.execute(tree).unwrap();
    engine
        .dispatcher()
        .cryptor()
        .decrypt_batch(result.tuples_mut())
        .unwrap();
    result
}

/// Assert the engine agrees with the reference executor in both modes,
/// and that the two modes agree with each other bit for bit.
pub fn assert_join_matches_reference(build: impl Fn() -> JoinTree) {
    let reference = reference_join(&build());

    let mut tree = build();
    let plain = run_plaintext(&mut tree);
    assert_eq!(sorted_rows(&plain), reference, "plaintext vs reference");

    let mut tree = build();
    let sealed = run_encrypted(&mut tree);
    assert_eq!(sorted_rows(&sealed), reference, "encrypted vs reference");

    // Identical rows, schema, and metadata across modes.
    assert_eq!(plain.schema(), sealed.schema());
    let mut plain_tuples = plain.tuples().to_vec();
    let mut sealed_tuples = sealed.tuples().to_vec();
    let key = |t: &oblijoin::Tuple| (t.attributes, t.original_index, t.copy_index);
    plain_tuples.sort_by_key(key);
    sealed_tuples.sort_by_key(key);
    assert_eq!(plain_tuples, sealed_tuples, "modes disagree");
}
