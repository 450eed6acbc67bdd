//! Snapshot differ: classifies per-symbol transitions between two polls.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{Position, PositionSnapshot};

/// Size differences at or below this are treated as noise.
pub const SIZE_EPSILON: Decimal = dec!(0.001);

/// How a held position changed between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Increase,
    Decrease,
    /// Position went from long to short or back
    Flip,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Increase => "INCREASE",
            ChangeKind::Decrease => "DECREASE",
            ChangeKind::Flip => "FLIP",
        }
    }
}

/// A symbol held in both snapshots whose size moved beyond [`SIZE_EPSILON`].
#[derive(Debug, Clone, PartialEq)]
pub struct PositionChange {
    pub previous: Position,
    pub current: Position,
}

impl PositionChange {
    pub fn symbol(&self) -> &str {
        &self.current.symbol
    }

    /// Signed size change, `current - previous`.
    pub fn delta(&self) -> Decimal {
        self.current.size - self.previous.size
    }

    pub fn kind(&self) -> ChangeKind {
        if self.previous.direction() != self.current.direction() {
            ChangeKind::Flip
        } else if self.current.size.abs() > self.previous.size.abs() {
            ChangeKind::Increase
        } else {
            ChangeKind::Decrease
        }
    }
}

/// Result of comparing two snapshots. The three sets are disjoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotDiff {
    pub opened: Vec<Position>,
    pub changed: Vec<PositionChange>,
    pub closed: Vec<Position>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.changed.is_empty() && self.closed.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.opened.len() + self.changed.len() + self.closed.len()
    }
}

/// Whether two sizes differ by more than [`SIZE_EPSILON`].
pub fn has_changed(previous: Decimal, current: Decimal) -> bool {
    (current - previous).abs() > SIZE_EPSILON
}

/// Classify every symbol of `previous ∪ current`.
///
/// Symbols present in both with a size move within epsilon are unchanged and
/// produce no event. Output is ordered by symbol.
pub fn diff_snapshots(previous: &PositionSnapshot, current: &PositionSnapshot) -> SnapshotDiff {
    let mut diff = SnapshotDiff::default();

    for position in current.iter() {
        match previous.get(&position.symbol) {
            None => diff.opened.push(position.clone()),
            Some(prev) if has_changed(prev.size, position.size) => {
                diff.changed.push(PositionChange {
                    previous: prev.clone(),
                    current: position.clone(),
                });
            }
            Some(_) => {}
        }
    }

    diff.closed = previous
        .iter()
        .filter(|p| !current.contains(&p.symbol))
        .cloned()
        .collect();

    diff
}
