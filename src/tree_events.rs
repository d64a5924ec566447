//! Tree events for particle-filter inference.
//!
//! A transmission tree enters the likelihood only through the time-ordered
//! sequence of its events: coalescences (forward in time: branchings), leaf
//! samples and sampled ancestors. Times are measured forward from the origin
//! of the epidemic.

use std::ops::Index;

use crate::error::{EpiError, EpiResult};

/// Kind of tree event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TreeEventType {
    Coalescence,
    Leaf,
    SampledAncestor,
}

/// One tree event. `multiplicity` counts simultaneous samples at this time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TreeEvent {
    pub time: f64,
    pub event_type: TreeEventType,
    pub multiplicity: u32,
}

impl TreeEvent {
    pub fn new(time: f64, event_type: TreeEventType, multiplicity: u32) -> Self {
        Self {
            time,
            event_type,
            multiplicity,
        }
    }

    pub fn coalescence(time: f64) -> Self {
        Self::new(time, TreeEventType::Coalescence, 1)
    }

    pub fn leaf(time: f64, multiplicity: u32) -> Self {
        Self::new(time, TreeEventType::Leaf, multiplicity)
    }

    pub fn sampled_ancestor(time: f64, multiplicity: u32) -> Self {
        Self::new(time, TreeEventType::SampledAncestor, multiplicity)
    }

    /// True for leaf and sampled-ancestor events.
    #[inline]
    pub fn is_sample(&self) -> bool {
        !matches!(self.event_type, TreeEventType::Coalescence)
    }
}

/// Validated, time-ordered sequence of tree events.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeEventList {
    events: Vec<TreeEvent>,
}

impl TreeEventList {
    /// Validate and wrap an event sequence.
    ///
    /// Times must be finite and non-decreasing and every multiplicity at
    /// least one. A negative first time is accepted here: it makes the tree
    /// density zero rather than being a malformed input.
    pub fn new(events: Vec<TreeEvent>) -> EpiResult<Self> {
        if events.is_empty() {
            return Err(EpiError::EmptyTreeEvents);
        }

        let mut previous = f64::NEG_INFINITY;
        for (index, event) in events.iter().enumerate() {
            if !event.time.is_finite() {
                return Err(EpiError::NonFiniteTime {
                    index,
                    time: event.time,
                });
            }
            if event.time < previous {
                return Err(EpiError::NonMonotonicTreeEvents {
                    index,
                    time: event.time,
                    previous,
                });
            }
            if event.multiplicity == 0 {
                return Err(EpiError::ZeroMultiplicity { index });
            }
            previous = event.time;
        }

        Ok(Self { events })
    }

    /// Derive the event list from a parent-index tree description.
    ///
    /// # Arguments
    /// * `parent_indices` - Parent index for each node (-1 for the root)
    /// * `node_heights` - Height of each node before the most recent sample
    /// * `origin` - Height of the epidemic origin; event time = origin - height
    /// * `tolerance` - Branches shorter than this mark sampled ancestors, and
    ///   samples closer than this in time are merged into one event
    ///
    /// A leaf hanging from its parent by a zero-length branch is a sampled
    /// ancestor, and its parent is then not a coalescence. Every other
    /// internal node must have exactly two children.
    pub fn from_structure(
        parent_indices: &[i32],
        node_heights: &[f64],
        origin: f64,
        tolerance: f64,
    ) -> EpiResult<Self> {
        let n_nodes = parent_indices.len();

        if node_heights.len() != n_nodes {
            return Err(EpiError::InvalidTreeStructure(
                "parent_indices and node_heights must have same length".to_string(),
            ));
        }

        // Build children lists
        let mut children = vec![Vec::new(); n_nodes];
        let mut n_roots = 0;
        for (child_idx, &parent_idx) in parent_indices.iter().enumerate() {
            if parent_idx < 0 {
                n_roots += 1;
                continue;
            }
            let parent = parent_idx as usize;
            if parent >= n_nodes || parent == child_idx {
                return Err(EpiError::InvalidTreeStructure(format!(
                    "node {} has invalid parent {}",
                    child_idx, parent_idx
                )));
            }
            children[parent].push(child_idx);
        }
        if n_roots != 1 {
            return Err(EpiError::InvalidTreeStructure(format!(
                "expected exactly one root, found {}",
                n_roots
            )));
        }

        let is_sampled_ancestor = |node: usize| -> bool {
            let parent = parent_indices[node];
            children[node].is_empty()
                && parent >= 0
                && (node_heights[parent as usize] - node_heights[node]).abs() < tolerance
        };

        let mut events = Vec::with_capacity(n_nodes);
        for node in 0..n_nodes {
            let time = origin - node_heights[node];
            if children[node].is_empty() {
                let event_type = if is_sampled_ancestor(node) {
                    TreeEventType::SampledAncestor
                } else {
                    TreeEventType::Leaf
                };
                events.push(TreeEvent::new(time, event_type, 1));
                continue;
            }

            let n_sa = children[node].iter().filter(|&&c| is_sampled_ancestor(c)).count();
            match (children[node].len(), n_sa) {
                (2, 0) => events.push(TreeEvent::coalescence(time)),
                (2, 1) => {}
                (n_children, _) => {
                    return Err(EpiError::InvalidTreeStructure(format!(
                        "node {} has {} children ({} sampled ancestors)",
                        node, n_children, n_sa
                    )));
                }
            }
        }

        events.sort_by(|a, b| a.time.total_cmp(&b.time));

        // Merge simultaneous samples of the same type
        let mut merged: Vec<TreeEvent> = Vec::with_capacity(events.len());
        for event in events {
            if let Some(last) = merged.last_mut() {
                if event.is_sample()
                    && last.event_type == event.event_type
                    && (last.time - event.time).abs() < tolerance
                {
                    last.multiplicity += event.multiplicity;
                    continue;
                }
            }
            merged.push(event);
        }

        Self::new(merged)
    }

    /// Events in time order.
    #[inline]
    pub fn events(&self) -> &[TreeEvent] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TreeEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Time of the earliest event.
    pub fn first_time(&self) -> f64 {
        self.events[0].time
    }
}

impl Index<usize> for TreeEventList {
    type Output = TreeEvent;

    fn index(&self, idx: usize) -> &TreeEvent {
        &self.events[idx]
    }
}

impl<'a> IntoIterator for &'a TreeEventList {
    type Item = &'a TreeEvent;
    type IntoIter = std::slice::Iter<'a, TreeEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_creation() {
        let list = TreeEventList::new(vec![
            TreeEvent::coalescence(0.5),
            TreeEvent::leaf(1.0, 1),
            TreeEvent::leaf(1.3, 1),
        ])
        .unwrap();

        assert_eq!(list.len(), 3);
        assert_eq!(list.first_time(), 0.5);
        assert_eq!(list[1].event_type, TreeEventType::Leaf);
    }

    #[test]
    fn test_negative_first_time_is_accepted() {
        let list = TreeEventList::new(vec![TreeEvent::coalescence(-0.1), TreeEvent::leaf(1.0, 2)]);
        assert!(list.is_ok());
    }

    #[test]
    fn test_malformed_lists_rejected() {
        assert_eq!(TreeEventList::new(vec![]), Err(EpiError::EmptyTreeEvents));

        let unordered = TreeEventList::new(vec![TreeEvent::leaf(1.0, 1), TreeEvent::leaf(0.5, 1)]);
        assert!(matches!(unordered, Err(EpiError::NonMonotonicTreeEvents { index: 1, .. })));

        let zero = TreeEventList::new(vec![TreeEvent::leaf(1.0, 0)]);
        assert!(matches!(zero, Err(EpiError::ZeroMultiplicity { index: 0 })));

        let nan = TreeEventList::new(vec![TreeEvent::leaf(f64::NAN, 1)]);
        assert!(matches!(nan, Err(EpiError::NonFiniteTime { .. })));
    }

    #[test]
    fn test_from_structure_two_leaves() {
        // Leaves 0 and 1, root 2. Heights: 0.5, 0.2, 0.0 before the origin at 1.0
        let list =
            TreeEventList::from_structure(&[2, 2, -1], &[0.0, 0.5, 1.0], 1.0, 1e-10).unwrap();

        let types: Vec<TreeEventType> = list.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![TreeEventType::Coalescence, TreeEventType::Leaf, TreeEventType::Leaf]
        );
        let times: Vec<f64> = list.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_from_structure_merges_simultaneous_leaves() {
        // ((0,1)3,2)4 with leaves 0, 1 and 2 all sampled at height 0
        let list = TreeEventList::from_structure(
            &[3, 3, 4, 4, -1],
            &[0.0, 0.0, 0.0, 0.4, 1.0],
            1.5,
            1e-10,
        )
        .unwrap();

        assert_eq!(list.len(), 3);
        assert_eq!(list[2], TreeEvent::leaf(1.5, 3));
    }

    #[test]
    fn test_from_structure_sampled_ancestor() {
        // Node 1 sits on the branch above leaf 0: parent 2 at the same height.
        let list =
            TreeEventList::from_structure(&[2, 2, -1], &[0.0, 0.6, 0.6], 1.0, 1e-10).unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list[0], TreeEvent::sampled_ancestor(0.4, 1));
        assert_eq!(list[1], TreeEvent::leaf(1.0, 1));
    }

    #[test]
    fn test_from_structure_rejects_bad_trees() {
        let two_roots = TreeEventList::from_structure(&[-1, -1], &[0.0, 0.0], 1.0, 1e-10);
        assert!(matches!(two_roots, Err(EpiError::InvalidTreeStructure(_))));

        let unary = TreeEventList::from_structure(&[1, -1], &[0.0, 1.0], 1.0, 1e-10);
        assert!(matches!(unary, Err(EpiError::InvalidTreeStructure(_))));

        let mismatch = TreeEventList::from_structure(&[1, -1], &[0.0], 1.0, 1e-10);
        assert!(matches!(mismatch, Err(EpiError::InvalidTreeStructure(_))));
    }
}
