//! Scan window planning for backfill and live polling.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// An inclusive block range `[from, to]` requested from the log source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWindow {
    from: u64,
    to: u64,
}

impl ScanWindow {
    /// Create a window, rejecting `to < from`.
    pub fn new(from: u64, to: u64) -> Result<Self, IndexerError> {
        if to < from {
            return Err(IndexerError::InvalidWindow { from, to });
        }
        Ok(Self { from, to })
    }

    pub fn from_block(&self) -> u64 {
        self.from
    }

    pub fn to_block(&self) -> u64 {
        self.to
    }

    /// Number of blocks covered.
    pub fn span(&self) -> u64 {
        self.to - self.from + 1
    }

    pub fn contains(&self, block: u64) -> bool {
        (self.from..=self.to).contains(&block)
    }

    /// First block after this window.
    pub fn next_from(&self) -> u64 {
        self.to.saturating_add(1)
    }
}

impl std::fmt::Display for ScanWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Plans capped windows against the last observed chain head.
#[derive(Debug, Clone, Copy)]
pub struct WindowPlanner {
    max_span: u64,
}

impl WindowPlanner {
    /// `max_span` is clamped to at least one block.
    pub fn new(max_span: u64) -> Self {
        Self {
            max_span: max_span.max(1),
        }
    }

    pub fn max_span(&self) -> u64 {
        self.max_span
    }

    /// The next window starting at `from`, capped at `max_span` and clamped
    /// to `head`. Returns `None` when the head has not reached `from` yet.
    pub fn next(&self, from: u64, head: u64) -> Option<ScanWindow> {
        let to = from.saturating_add(self.max_span - 1).min(head);
        ScanWindow::new(from, to).ok()
    }

    /// Every window covering `[from, head]`, in order.
    pub fn plan(&self, from: u64, head: u64) -> Vec<ScanWindow> {
        let mut windows = Vec::new();
        let mut cursor = from;
        while let Some(window) = self.next(cursor, head) {
            windows.push(window);
            if window.to_block() == u64::MAX {
                break;
            }
            cursor = window.next_from();
        }
        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_window() {
        assert!(ScanWindow::new(10, 9).is_err());
        let w = ScanWindow::new(10, 10).unwrap();
        assert_eq!(w.span(), 1);
        assert!(w.contains(10));
        assert!(!w.contains(11));
    }

    #[test]
    fn genesis_100_head_250_span_100() {
        let planner = WindowPlanner::new(100);
        let windows = planner.plan(100, 250);
        assert_eq!(
            windows,
            vec![
                ScanWindow::new(100, 199).unwrap(),
                ScanWindow::new(200, 250).unwrap()
            ]
        );
    }

    #[test]
    fn windows_cover_range_without_gaps_or_oversize() {
        for (from, head, span) in [(0u64, 0u64, 1u64), (5, 1_000, 7), (32_908_523, 32_910_000, 480), (7, 7, 480)] {
            let windows = WindowPlanner::new(span).plan(from, head);
            assert_eq!(windows.first().unwrap().from_block(), from);
            assert_eq!(windows.last().unwrap().to_block(), head);
            for pair in windows.windows(2) {
                assert_eq!(pair[0].next_from(), pair[1].from_block());
            }
            assert!(windows.iter().all(|w| w.span() <= span));
        }
    }

    #[test]
    fn head_behind_from_plans_nothing() {
        let planner = WindowPlanner::new(480);
        assert!(planner.next(251, 250).is_none());
        assert!(planner.plan(251, 250).is_empty());
    }

    #[test]
    fn zero_span_is_clamped() {
        let planner = WindowPlanner::new(0);
        assert_eq!(planner.max_span(), 1);
        assert_eq!(planner.next(3, 10), Some(ScanWindow::new(3, 3).unwrap()));
    }
}
