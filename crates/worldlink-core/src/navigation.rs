//! Focus, movement and breadcrumbs over the live object graph.
//!
//! The controller only stores ids. Every query resolves them against the
//! [`ObjectGraphStore`] it is handed, so a focused object always reflects the
//! latest deltas and the controller never holds stale copies.

use serde::{Deserialize, Serialize};

use crate::{
    graph::ObjectGraphStore,
    object::{GameObject, ObjectId},
};

/// Default number of ancestor hops shown in a breadcrumb.
pub const DEFAULT_BREADCRUMB_DEPTH: usize = 2;

/// Focus movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// Previous entry in the parent's children list.
    PrevSibling,
    /// Next entry in the parent's children list.
    NextSibling,
    /// First child of the focus.
    FirstChild,
    /// Parent of the focus.
    Parent,
}

/// One breadcrumb entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crumb<'a> {
    /// A regular ancestor (or the object itself).
    Object(&'a GameObject),
    /// Stands in for the elided part of the chain. Carries the oldest
    /// collected ancestor so a view can still jump to it.
    Ellipsis(&'a GameObject),
}

impl<'a> Crumb<'a> {
    /// The object behind this crumb.
    #[must_use]
    pub const fn object(&self) -> &'a GameObject {
        match *self {
            Self::Object(obj) | Self::Ellipsis(obj) => obj,
        }
    }
}

/// Focus tracking bounded to an optional subtree.
#[derive(Debug, Clone)]
pub struct NavigationController {
    focus: Option<ObjectId>,
    root: Option<ObjectId>,
    breadcrumb_depth: usize,
}

impl Default for NavigationController {
    fn default() -> Self {
        Self::new(DEFAULT_BREADCRUMB_DEPTH)
    }
}

impl NavigationController {
    /// Create a controller with no focus and no root boundary.
    #[must_use]
    pub const fn new(breadcrumb_depth: usize) -> Self {
        Self {
            focus: None,
            root: None,
            breadcrumb_depth,
        }
    }

    /// Restrict navigation to the subtree under `root`.
    ///
    /// The current focus is left as is, the boundary applies to the next
    /// focus change.
    pub fn set_root(&mut self, root: Option<ObjectId>) {
        self.root = root;
    }

    /// Current root boundary.
    #[must_use]
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    /// Focus `id` if it exists and lies inside the root boundary.
    ///
    /// Returns `false` and leaves the focus unchanged otherwise.
    pub fn set_focus(&mut self, graph: &ObjectGraphStore, id: &str) -> bool {
        if !graph.contains(id) {
            tracing::debug!(id, "Focus target not in graph");
            return false;
        }
        if !self.within_root(graph, id) {
            tracing::debug!(id, root = ?self.root, "Focus target outside root boundary");
            return false;
        }
        self.focus = Some(id.to_string());
        true
    }

    /// Drop the focus.
    pub fn clear_focus(&mut self) {
        self.focus = None;
    }

    /// Focused id, even if the object has since been removed.
    #[must_use]
    pub fn focus_id(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    /// Focused object as currently stored in the graph.
    #[must_use]
    pub fn focus<'g>(&self, graph: &'g ObjectGraphStore) -> Option<&'g GameObject> {
        self.focus.as_deref().and_then(|id| graph.get(id))
    }

    /// Move the focus. Returns whether it changed.
    ///
    /// Sibling moves stop at either end of the list.
    pub fn move_focus(&mut self, graph: &ObjectGraphStore, direction: Direction) -> bool {
        let Some(focus) = self.focus(graph) else {
            return false;
        };

        let candidate = match direction {
            Direction::Parent => focus.parent_id.clone(),
            Direction::FirstChild => graph.children_of(&focus.id).first().cloned(),
            Direction::PrevSibling | Direction::NextSibling => {
                let siblings = focus
                    .parent_id
                    .as_deref()
                    .map_or(&[][..], |p| graph.children_of(p));
                let Some(index) = siblings.iter().position(|s| *s == focus.id) else {
                    return false;
                };
                let next = if direction == Direction::PrevSibling {
                    index.checked_sub(1)
                } else {
                    Some(index + 1)
                };
                next.and_then(|i| siblings.get(i)).cloned()
            }
        };

        candidate.is_some_and(|id| self.set_focus(graph, &id))
    }

    /// Breadcrumb for the focus using the configured depth.
    #[must_use]
    pub fn focus_breadcrumb<'g>(&self, graph: &'g ObjectGraphStore) -> Vec<Crumb<'g>> {
        self.focus
            .as_deref()
            .map(|id| self.breadcrumb(graph, id, self.breadcrumb_depth))
            .unwrap_or_default()
    }

    /// Ancestor chain of `id`, root to leaf.
    ///
    /// Collects at most `depth + 1` entries. The walk stops early at a
    /// parentless object or at the root boundary. When it is cut by the hop
    /// limit instead, the oldest entry becomes [`Crumb::Ellipsis`].
    #[must_use]
    pub fn breadcrumb<'g>(&self, graph: &'g ObjectGraphStore, id: &str, depth: usize) -> Vec<Crumb<'g>> {
        let Some(start) = graph.get(id) else {
            return Vec::new();
        };

        let limit = depth + 1;
        let mut chain = vec![start];
        let mut truncated = false;
        let mut current = start;
        loop {
            if self.root.as_deref() == Some(current.id.as_str()) {
                break;
            }
            let Some(parent) = graph.parent_of(current) else {
                break;
            };
            if chain.len() >= limit {
                truncated = true;
                break;
            }
            chain.push(parent);
            current = parent;
        }

        chain.reverse();
        let elide = truncated && chain.len() > 1;
        chain
            .into_iter()
            .enumerate()
            .map(|(i, obj)| {
                if elide && i == 0 {
                    Crumb::Ellipsis(obj)
                } else {
                    Crumb::Object(obj)
                }
            })
            .collect()
    }

    /// Whether a change to `id` can show up in a view centred on the focus.
    ///
    /// Visible: the focus, its children, its parent, its siblings and its
    /// grandparent.
    #[must_use]
    pub fn is_visible(&self, graph: &ObjectGraphStore, id: &str) -> bool {
        let Some(focus) = self.focus(graph) else {
            return false;
        };
        let Some(obj) = graph.get(id) else {
            return false;
        };

        if obj.id == focus.id || obj.parent_id.as_deref() == Some(focus.id.as_str()) {
            return true;
        }
        let Some(parent_id) = focus.parent_id.as_deref() else {
            return false;
        };
        if parent_id == id || graph.children_of(parent_id).iter().any(|s| s == id) {
            return true;
        }
        graph
            .get(parent_id)
            .and_then(|parent| parent.parent_id.as_deref())
            .is_some_and(|grandparent| grandparent == id)
    }

    fn within_root(&self, graph: &ObjectGraphStore, id: &str) -> bool {
        self.root
            .as_deref()
            .is_none_or(|root| graph.is_self_or_descendant(id, root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::DeltaRecord;

    fn world() -> ObjectGraphStore {
        let mut store = ObjectGraphStore::new();
        for encoded in [
            ";W;world;Earth;1;0;0",
            "W;R1;region;North;0.5;0;0",
            "R1;P1;player;Hero;0.5;0.1;70",
            "R1;P2;player;Ally;0.5;0.1;70",
            "R1;P3;player;Rival;0.5;0.1;70",
            "P1;B1;item;Bag;0.8;0.0;5",
            "B1;C1;item;Coin;0.2;0.0;0.1",
            "W;R2;region;South;0.5;0;0",
        ] {
            store
                .apply_delta(&DeltaRecord::parse(encoded).unwrap())
                .unwrap();
        }
        store
    }

    fn ids(crumbs: &[Crumb<'_>]) -> Vec<String> {
        crumbs
            .iter()
            .map(|c| match c {
                Crumb::Object(o) => o.id.clone(),
                Crumb::Ellipsis(_) => "...".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_sibling_moves_stop_at_ends() {
        let graph = world();
        let mut nav = NavigationController::default();
        assert!(nav.set_focus(&graph, "P1"));

        assert!(!nav.move_focus(&graph, Direction::PrevSibling));
        assert_eq!(nav.focus_id(), Some("P1"));

        assert!(nav.move_focus(&graph, Direction::NextSibling));
        assert!(nav.move_focus(&graph, Direction::NextSibling));
        assert_eq!(nav.focus_id(), Some("P3"));

        assert!(!nav.move_focus(&graph, Direction::NextSibling));
        assert_eq!(nav.focus_id(), Some("P3"));
    }

    #[test]
    fn test_child_and_parent_moves() {
        let graph = world();
        let mut nav = NavigationController::default();
        nav.set_focus(&graph, "P1");

        assert!(nav.move_focus(&graph, Direction::FirstChild));
        assert_eq!(nav.focus_id(), Some("B1"));
        assert!(nav.move_focus(&graph, Direction::FirstChild));
        assert!(!nav.move_focus(&graph, Direction::FirstChild));
        assert_eq!(nav.focus_id(), Some("C1"));

        assert!(nav.move_focus(&graph, Direction::Parent));
        assert!(nav.move_focus(&graph, Direction::Parent));
        assert_eq!(nav.focus_id(), Some("P1"));
    }

    #[test]
    fn test_root_boundary_rejects_outside_focus() {
        let graph = world();
        let mut nav = NavigationController::default();
        nav.set_root(Some("R1".to_string()));

        assert!(nav.set_focus(&graph, "P2"));
        assert!(!nav.set_focus(&graph, "R2"));
        assert!(!nav.set_focus(&graph, "W"));
        assert_eq!(nav.focus_id(), Some("P2"));

        assert!(nav.move_focus(&graph, Direction::Parent));
        assert_eq!(nav.focus_id(), Some("R1"));
        assert!(!nav.move_focus(&graph, Direction::Parent));
        assert_eq!(nav.focus_id(), Some("R1"));
    }

    #[test]
    fn test_unknown_focus_is_rejected() {
        let graph = world();
        let mut nav = NavigationController::default();
        assert!(!nav.set_focus(&graph, "ghost"));
        assert_eq!(nav.focus(&graph), None);
        assert!(!nav.move_focus(&graph, Direction::NextSibling));
    }

    #[test]
    fn test_breadcrumb_truncates_with_ellipsis() {
        let graph = world();
        let nav = NavigationController::default();

        assert_eq!(ids(&nav.breadcrumb(&graph, "C1", 2)), ["...", "B1", "C1"]);
        assert_eq!(ids(&nav.breadcrumb(&graph, "P1", 2)), ["W", "R1", "P1"]);
        assert_eq!(
            ids(&nav.breadcrumb(&graph, "C1", 10)),
            ["W", "R1", "P1", "B1", "C1"]
        );
        assert!(nav.breadcrumb(&graph, "ghost", 2).is_empty());
    }

    #[test]
    fn test_breadcrumb_stops_at_root_boundary() {
        let graph = world();
        let mut nav = NavigationController::default();
        nav.set_root(Some("P1".to_string()));
        assert_eq!(ids(&nav.breadcrumb(&graph, "C1", 10)), ["P1", "B1", "C1"]);
        assert_eq!(ids(&nav.breadcrumb(&graph, "C1", 2)), ["P1", "B1", "C1"]);
    }

    #[test]
    fn test_focus_sees_in_place_updates() {
        let mut graph = world();
        let mut nav = NavigationController::default();
        nav.set_focus(&graph, "P1");
        graph
            .apply_delta(&DeltaRecord::parse("R1;P1;player;Renamed;0.5;0.1;70").unwrap())
            .unwrap();
        assert_eq!(nav.focus(&graph).unwrap().name, "Renamed");
    }

    #[test]
    fn test_visibility_from_focus() {
        let graph = world();
        let mut nav = NavigationController::default();
        assert!(!nav.is_visible(&graph, "P1"));

        nav.set_focus(&graph, "P1");
        for id in ["P1", "B1", "R1", "P2", "P3", "W"] {
            assert!(nav.is_visible(&graph, id), "{id} should be visible");
        }
        for id in ["C1", "R2", "ghost"] {
            assert!(!nav.is_visible(&graph, id), "{id} should not be visible");
        }
    }

    #[test]
    fn test_direction_names() {
        let direction: Direction = serde_json::from_str(r#""next-sibling""#).unwrap();
        assert_eq!(direction, Direction::NextSibling);
        assert_eq!(
            serde_json::to_string(&Direction::FirstChild).unwrap(),
            r#""first-child""#
        );
    }
}
