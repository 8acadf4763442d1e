//! Node scoring for placement.

use fleet_messages::NodeAnnouncement;
use fleet_types::Capacity;

/// Maps a node's self-reported capacity to a placement score.
///
/// Higher is better. Zero or negative means "do not use unless
/// over-provisioning is allowed".
pub trait NodeScorer: Send + Sync {
    fn score(&self, capacity: &Capacity) -> f64;
}

impl<F> NodeScorer for F
where
    F: Fn(&Capacity) -> f64 + Send + Sync,
{
    fn score(&self, capacity: &Capacity) -> f64 {
        self(capacity)
    }
}

/// Scores a node by a single numeric capacity field, e.g.
/// `available_memory` for Redis or `available_storage` for MySQL.
///
/// Missing or non-numeric fields score 0.
#[derive(Debug, Clone)]
pub struct FieldScorer {
    field: String,
}

impl FieldScorer {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

impl NodeScorer for FieldScorer {
    fn score(&self, capacity: &Capacity) -> f64 {
        capacity.number(&self.field).unwrap_or(0.0)
    }
}

/// Pick the announcement with the strictly highest score.
///
/// Ties go to the first one encountered, so the choice is deterministic
/// for a given ordering. NaN scores count as 0. Returns the index and
/// score of the winner.
pub fn select_best(scorer: &dyn NodeScorer, nodes: &[NodeAnnouncement]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (index, node) in nodes.iter().enumerate() {
        let mut score = scorer.score(&node.capacity);
        if score.is_nan() {
            score = 0.0;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((index, score)),
        }
    }
    best
}
