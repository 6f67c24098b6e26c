//! Binary-split layout tree mapping session ids to screen regions.
//!
//! The layout is a value: every operation consumes a tree and returns a new
//! one, so callers holding a lock only ever swap whole trees. An empty layout
//! is `None`.
//!
//! Two invariants hold for every tree produced here:
//!
//! - a session id appears on at most one leaf;
//! - a split always has two children (removing one side collapses the split
//!   into the remaining side).
//!
//! The serialized shape is the one used by workspace files: a leaf is the bare
//! session id string, a split is an object.
//!
//! ```json
//! { "direction": "row", "first": "a", "second": "b", "splitPercentage": 50 }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::session::SessionId;

/// Ratio given to both halves of a freshly created split.
pub const DEFAULT_SPLIT_RATIO: f64 = 50.0;

/// Axis along which a split places its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Side by side.
    #[default]
    Row,
    /// Stacked.
    Column,
}

/// Child selector used to address a node inside a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    First,
    Second,
}

/// A node of the layout tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayoutNode {
    /// A tile showing one session.
    Leaf(SessionId),
    /// Two sub-layouts sharing a region.
    Split {
        direction: Direction,
        first: Box<LayoutNode>,
        second: Box<LayoutNode>,
        /// Share of the region given to `first`, in percent.
        #[serde(rename = "splitPercentage", default = "default_ratio")]
        split_ratio: f64,
    },
}

fn default_ratio() -> f64 {
    DEFAULT_SPLIT_RATIO
}

impl LayoutNode {
    pub fn leaf(id: impl Into<SessionId>) -> Self {
        LayoutNode::Leaf(id.into())
    }

    pub fn split(direction: Direction, first: LayoutNode, second: LayoutNode, ratio: f64) -> Self {
        LayoutNode::Split {
            direction,
            first: Box::new(first),
            second: Box::new(second),
            split_ratio: ratio,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, LayoutNode::Leaf(_))
    }

    /// Number of tiles in the tree.
    pub fn tile_count(&self) -> usize {
        match self {
            LayoutNode::Leaf(_) => 1,
            LayoutNode::Split { first, second, .. } => first.tile_count() + second.tile_count(),
        }
    }

    /// Node reached by following `path` from this node.
    pub fn node_at(&self, path: &[Branch]) -> Option<&LayoutNode> {
        let Some((head, rest)) = path.split_first() else {
            return Some(self);
        };
        match self {
            LayoutNode::Leaf(_) => None,
            LayoutNode::Split { first, second, .. } => match head {
                Branch::First => first.node_at(rest),
                Branch::Second => second.node_at(rest),
            },
        }
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a SessionId>) {
        match self {
            LayoutNode::Leaf(id) => out.push(id),
            LayoutNode::Split { first, second, .. } => {
                first.collect_leaves(out);
                second.collect_leaves(out);
            }
        }
    }
}

/// Session ids of all tiles, left to right.
pub fn leaves(tree: Option<&LayoutNode>) -> Vec<SessionId> {
    let mut out = Vec::new();
    if let Some(node) = tree {
        node.collect_leaves(&mut out);
    }
    out.into_iter().cloned().collect()
}

/// Whether `id` is shown by some tile.
pub fn contains(tree: Option<&LayoutNode>, id: &str) -> bool {
    match tree {
        None => false,
        Some(LayoutNode::Leaf(leaf)) => leaf == id,
        Some(LayoutNode::Split { first, second, .. }) => {
            contains(Some(first), id) || contains(Some(second), id)
        }
    }
}

/// Add a tile for `id`.
///
/// An empty layout becomes a single leaf. Otherwise the whole existing tree
/// becomes the `first` half of a new 50/50 split and the new leaf the
/// `second` half. The new tile is always placed at the root; there is no
/// search for a better spot. Adding an id that is already present returns
/// the tree unchanged.
pub fn add_tile(tree: Option<LayoutNode>, id: &str, direction: Direction) -> LayoutNode {
    match tree {
        None => LayoutNode::leaf(id),
        Some(node) if contains(Some(&node), id) => node,
        Some(node) => LayoutNode::split(direction, node, LayoutNode::leaf(id), DEFAULT_SPLIT_RATIO),
    }
}

/// Remove the tile for `id`, collapsing the split that held it.
///
/// Removing an id that is not present returns an equal tree. Removing the
/// only tile returns an empty layout.
pub fn remove_tile(tree: Option<LayoutNode>, id: &str) -> Option<LayoutNode> {
    relabel(tree?, &mut |leaf| (leaf != id).then(|| leaf.to_string()))
}

/// Rename or drop leaves.
///
/// `f` returns the new id for a leaf, or `None` to drop it. Splits left with
/// a single child collapse into that child; ratios and directions of the
/// surviving splits are kept.
pub fn relabel<F>(tree: LayoutNode, f: &mut F) -> Option<LayoutNode>
where
    F: FnMut(&str) -> Option<SessionId>,
{
    match tree {
        LayoutNode::Leaf(id) => f(&id).map(LayoutNode::Leaf),
        LayoutNode::Split {
            direction,
            first,
            second,
            split_ratio,
        } => {
            let first = relabel(*first, f);
            let second = relabel(*second, f);
            match (first, second) {
                (Some(first), Some(second)) => {
                    Some(LayoutNode::split(direction, first, second, split_ratio))
                }
                (Some(only), None) | (None, Some(only)) => Some(only),
                (None, None) => None,
            }
        }
    }
}

/// Round every split ratio to the nearest multiple of `increment`, clamped
/// to `[0, 100]`.
///
/// A non-positive or non-finite increment leaves the tree unchanged.
pub fn snap(tree: Option<LayoutNode>, increment: f64) -> Option<LayoutNode> {
    let node = tree?;
    if !(increment.is_finite() && increment > 0.0) {
        return Some(node);
    }
    Some(snap_node(node, increment))
}

fn snap_node(node: LayoutNode, increment: f64) -> LayoutNode {
    match node {
        leaf @ LayoutNode::Leaf(_) => leaf,
        LayoutNode::Split {
            direction,
            first,
            second,
            split_ratio,
        } => {
            let snapped = ((split_ratio / increment).round() * increment).clamp(0.0, 100.0);
            LayoutNode::split(
                direction,
                snap_node(*first, increment),
                snap_node(*second, increment),
                snapped,
            )
        }
    }
}

/// Set the ratio of the split addressed by `path`, clamped to `[0, 100]`.
///
/// If `path` does not lead to a split the tree is returned unchanged.
pub fn set_split_ratio(tree: LayoutNode, path: &[Branch], ratio: f64) -> LayoutNode {
    match tree {
        leaf @ LayoutNode::Leaf(_) => leaf,
        LayoutNode::Split {
            direction,
            first,
            second,
            split_ratio,
        } => match path.split_first() {
            None => LayoutNode::split(direction, *first, *second, ratio.clamp(0.0, 100.0)),
            Some((Branch::First, rest)) => LayoutNode::split(
                direction,
                set_split_ratio(*first, rest, ratio),
                *second,
                split_ratio,
            ),
            Some((Branch::Second, rest)) => LayoutNode::split(
                direction,
                *first,
                set_split_ratio(*second, rest, ratio),
                split_ratio,
            ),
        },
    }
}

/// Check that leaf ids are unique and every ratio lies in `[0, 100]`.
///
/// Trees built with [`add_tile`] always pass; this is for layouts read back
/// from disk.
pub fn validate(tree: Option<&LayoutNode>) -> Result<()> {
    fn walk<'a>(node: &'a LayoutNode, seen: &mut HashSet<&'a str>) -> Result<()> {
        match node {
            LayoutNode::Leaf(id) => {
                if !seen.insert(id.as_str()) {
                    return Err(ProtocolError::DuplicateTile {
                        session_id: id.clone(),
                    });
                }
                Ok(())
            }
            LayoutNode::Split {
                first,
                second,
                split_ratio,
                ..
            } => {
                if !(0.0..=100.0).contains(split_ratio) {
                    return Err(ProtocolError::InvalidRatio {
                        ratio: *split_ratio,
                    });
                }
                walk(first, seen)?;
                walk(second, seen)
            }
        }
    }

    match tree {
        None => Ok(()),
        Some(node) => walk(node, &mut HashSet::new()),
    }
}
