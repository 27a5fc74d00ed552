//! Join plan files.
//!
//! A plan names the relations, the root, and one band edge per non-root
//! relation. The CLI loads the referenced tables and assembles the
//! [`JoinTree`] from it; query parsing proper lives outside this crate —
//! the plan is the already-shaped join tree in serialised form.
//!
//! ```json
//! {
//!   "root": "customer",
//!   "relations": [
//!     { "name": "customer", "file": "customer.csv" },
//!     { "name": "orders", "file": "orders.csv" }
//!   ],
//!   "joins": [
//!     {
//!       "parent": "customer", "child": "orders",
//!       "parent_column": "custkey", "child_column": "custkey",
//!       "lower": { "deviation": 0 }, "upper": { "deviation": 0 }
//!     }
//!   ]
//! }
//! ```
//!
//! A bound's `deviation` is an integer or `"-inf"`/`"inf"`; `"open": true`
//! makes the endpoint strict.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::constraint::{Bound, JoinConstraint};
use crate::error::ObliJoinError;
use crate::io;
use crate::table::ObliviousTable;
use crate::tree::JoinTree;
use crate::tuple::Openness;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinPlan {
    pub root: String,
    pub relations: Vec<RelationSpec>,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationSpec {
    pub name: String,
    pub file: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinSpec {
    pub parent: String,
    pub child: String,
    pub parent_column: String,
    pub child_column: String,
    pub lower: BoundSpec,
    pub upper: BoundSpec,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoundSpec {
    pub deviation: DeviationSpec,
    #[serde(default)]
    pub open: bool,
}

/// `42`, `"inf"`, or `"-inf"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DeviationSpec {
    Finite(i64),
    Named(String),
}

impl BoundSpec {
    fn to_bound(&self, path: &Path) -> Result<Bound, ObliJoinError> {
        let deviation = match &self.deviation {
            DeviationSpec::Finite(d) => *d,
            DeviationSpec::Named(s) => match s.trim() {
                "inf" | "+inf" => i64::MAX,
                "-inf" => i64::MIN,
                other => {
                    return Err(ObliJoinError::Parse {
                        path: path.display().to_string(),
                        reason: format!("unknown deviation {other:?} (use an integer, \"inf\", or \"-inf\")"),
                    });
                }
            },
        };
        let openness = if self.open {
            Openness::Open
        } else {
            Openness::Closed
        };
        Ok(Bound { deviation, openness })
    }
}

impl JoinPlan {
    /// Parse a plan file.
    pub fn load(path: &Path) -> Result<JoinPlan, ObliJoinError> {
        let body = std::fs::read_to_string(path)?;
        serde_json::from_str(&body).map_err(|e| ObliJoinError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Load the referenced tables from `data_dir` and assemble the tree.
    ///
    /// Table files ending in `.json` are read as (encrypted) table files,
    /// anything else as CSV.
    pub fn build_tree(&self, plan_path: &Path, data_dir: &Path) -> Result<JoinTree, ObliJoinError> {
        let mut tables: HashMap<&str, ObliviousTable> = HashMap::new();
        for relation in &self.relations {
            let path = data_dir.join(&relation.file);
            let mut table = if path.extension().is_some_and(|e| e == "json") {
                io::load_table_file(&path)?
            } else {
                io::load_csv(&path)?
            };
            table.set_name(relation.name.clone());
            tables.insert(relation.name.as_str(), table);
        }

        let root_table = tables
            .remove(self.root.as_str())
            .ok_or_else(|| ObliJoinError::UnknownRelation(self.root.clone()))?;
        let mut tree = JoinTree::new(self.root.clone(), root_table);

        // Resolve every edge's bounds up front, then attach children
        // breadth-first from the root; every relation must be reachable
        // through exactly one join edge.
        let mut remaining: Vec<(&JoinSpec, JoinConstraint)> = self
            .joins
            .iter()
            .map(|join| {
                let constraint = JoinConstraint::new(
                    join.parent_column.clone(),
                    join.child_column.clone(),
                    join.lower.to_bound(plan_path)?,
                    join.upper.to_bound(plan_path)?,
                );
                Ok((join, constraint))
            })
            .collect::<Result<_, ObliJoinError>>()?;

        let mut progressed = true;
        while progressed && !remaining.is_empty() {
            progressed = false;
            remaining.retain(|(join, constraint)| {
                let Some(parent_id) = tree.node_by_name(&join.parent) else {
                    return true;
                };
                let Some(table) = tables.remove(join.child.as_str()) else {
                    return true;
                };
                tree.add_child(parent_id, join.child.clone(), table, constraint.clone());
                progressed = true;
                false
            });
        }

        if let Some((join, _)) = remaining.first() {
            return Err(ObliJoinError::UnknownRelation(format!(
                "{} ⋈ {} (edge not attachable to the tree)",
                join.parent, join.child
            )));
        }
        if let Some(orphan) = tables.keys().next() {
            return Err(ObliJoinError::UnknownRelation(format!(
                "{orphan} (relation never joined)"
            )));
        }
        tree.validate()?;
        Ok(tree)
    }
}
