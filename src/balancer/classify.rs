use ordered_float::OrderedFloat;
use std::cmp::Reverse;

use crate::domain::ChildNode;

/// Processing order for nodes that need rebalancing, as indices into the
/// grid's `child_nodes`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeOrder {
    /// Largest surplus first, closer to the parent on ties
    pub excess: Vec<usize>,
    /// Closest to the parent first
    pub deficit: Vec<usize>,
}

impl NodeOrder {
    pub fn is_balanced(&self) -> bool {
        self.excess.is_empty() || self.deficit.is_empty()
    }
}

/// Split nodes into excess and deficit sets and order each one.
///
/// Nodes whose allocation equals their demand appear in neither set. Both
/// sorts are stable so fully tied nodes keep their snapshot order.
pub fn classify(nodes: &[ChildNode]) -> NodeOrder {
    let mut order = NodeOrder::default();

    for (idx, node) in nodes.iter().enumerate() {
        if node.allocated_power > node.current_demand {
            order.excess.push(idx);
        } else if node.allocated_power < node.current_demand {
            order.deficit.push(idx);
        }
    }

    order.excess.sort_by_key(|&i| {
        (
            Reverse(OrderedFloat(nodes[i].balance())),
            OrderedFloat(nodes[i].distance),
        )
    });
    order.deficit.sort_by_key(|&i| OrderedFloat(nodes[i].distance));

    order
}
