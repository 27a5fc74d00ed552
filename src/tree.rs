//! The join tree.
//!
//! A rooted tree of relations: each node owns an [`ObliviousTable`] and,
//! except for the root, a [`JoinConstraint`] to its parent. Nodes live in
//! an arena keyed by stable integer ids; edges store ids only, which makes
//! pre- and post-order traversals trivially iterative and keeps ownership
//! flowing from root to leaves without any reference counting.
//!
//! The tree shape is immutable throughout an execution; only the tables at
//! each node mutate.

use crate::constraint::JoinConstraint;
use crate::error::ObliJoinError;
use crate::table::ObliviousTable;
use crate::tuple::MAX_ATTRS;

/// Identifies a node in the join tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// One relation in the tree.
#[derive(Debug)]
pub struct JoinTreeNode {
    pub name: String,
    pub table: ObliviousTable,
    /// Constraint to the parent; `None` exactly at the root.
    pub constraint: Option<JoinConstraint>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena-backed rooted join tree.
#[derive(Debug)]
pub struct JoinTree {
    nodes: Vec<JoinTreeNode>,
}

impl JoinTree {
    /// A tree consisting of just the root relation.
    pub fn new<S: Into<String>>(name: S, table: ObliviousTable) -> JoinTree {
        let name = name.into();
        JoinTree {
            nodes: vec![JoinTreeNode {
                name,
                table,
                constraint: None,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Attach a child relation under `parent`.
    pub fn add_child<S: Into<String>>(
        &mut self,
        parent: NodeId,
        name: S,
        table: ObliviousTable,
        constraint: JoinConstraint,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(JoinTreeNode {
            name: name.into(),
            table,
            constraint: Some(constraint),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &JoinTreeNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut JoinTreeNode {
        &mut self.nodes[id.0]
    }

    pub fn table(&self, id: NodeId) -> &ObliviousTable {
        &self.nodes[id.0].table
    }

    pub fn table_mut(&mut self, id: NodeId) -> &mut ObliviousTable {
        &mut self.nodes[id.0].table
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    /// Distinct mutable borrows of two nodes' tables (e.g. a parent/child
    /// pair during a paired pass).
    pub fn tables_pair_mut(
        &mut self,
        a: NodeId,
        b: NodeId,
    ) -> (&mut ObliviousTable, &mut ObliviousTable) {
        assert_ne!(a.0, b.0, "tables_pair_mut requires distinct nodes");
        if a.0 < b.0 {
            let (lo, hi) = self.nodes.split_at_mut(b.0);
            (&mut lo[a.0].table, &mut hi[0].table)
        } else {
            let (lo, hi) = self.nodes.split_at_mut(a.0);
            (&mut hi[0].table, &mut lo[b.0].table)
        }
    }

    /// Parents before children, left to right.
    pub fn pre_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            order.push(id);
            // Reversed so the leftmost child is visited first.
            for &child in self.children(id).iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// Children before parents.
    pub fn post_order(&self) -> Vec<NodeId> {
        let mut order = self.pre_order();
        order.reverse();
        order
    }

    /// Sum of table sizes across all nodes.
    pub fn total_rows(&self) -> usize {
        self.nodes.iter().map(|n| n.table.len()).sum()
    }

    /// Structural validation: every non-root node carries a constraint,
    /// join columns resolve in their schemas, and the concatenation of all
    /// schemas fits the fixed tuple capacity. Empty tables are legal — an
    /// empty relation anywhere simply produces an empty join result.
    pub fn validate(&self) -> Result<(), ObliJoinError> {
        if self.nodes.is_empty() {
            return Err(ObliJoinError::EmptyTree);
        }
        let mut total_width = 0usize;
        for id in self.pre_order() {
            let node = self.node(id);
            total_width += node.table.schema().width();

            match (&node.constraint, node.parent) {
                (None, None) => {}
                (Some(constraint), Some(parent)) => {
                    let parent_node = self.node(parent);
                    if !parent_node
                        .table
                        .schema()
                        .has_column(&constraint.parent_column)
                    {
                        return Err(ObliJoinError::UnknownJoinColumn {
                            node: parent_node.name.clone(),
                            column: constraint.parent_column.clone(),
                        });
                    }
                    if !node.table.schema().has_column(&constraint.child_column) {
                        return Err(ObliJoinError::UnknownJoinColumn {
                            node: node.name.clone(),
                            column: constraint.child_column.clone(),
                        });
                    }
                }
                _ => return Err(ObliJoinError::MissingConstraint(node.name.clone())),
            }
        }
        if total_width > MAX_ATTRS {
            return Err(ObliJoinError::SchemaOverflow(total_width));
        }
        Ok(())
    }

    /// [`JoinTree::validate`] plus a non-empty requirement on every table.
    /// Used by front ends that want to reject degenerate inputs early.
    pub fn validate_strict(&self) -> Result<(), ObliJoinError> {
        self.validate()?;
        for node in &self.nodes {
            if node.table.is_empty() {
                return Err(ObliJoinError::EmptyTable(node.name.clone()));
            }
        }
        Ok(())
    }
}
