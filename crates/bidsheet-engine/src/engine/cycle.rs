//! Circular reference detection during evaluation.
//!
//! A formula that (directly or through other cells, possibly on other sheets)
//! reads itself would recurse forever. The evaluator registers each formula
//! cell here before evaluating it; finding the cell already registered means
//! the chain has looped back and the result is `#CIRCULAR!`.

use dashmap::DashSet;
use std::sync::Arc;

/// A formula cell under evaluation: lowercased sheet name, row, column.
pub type GuardKey = (String, usize, usize);

#[derive(Clone, Default)]
pub struct CircularGuard {
    active: Arc<DashSet<GuardKey>>,
}

/// Keeps a cell registered while alive; dropping it releases the cell.
#[must_use = "the cell is released as soon as the token is dropped"]
pub struct GuardToken {
    active: Arc<DashSet<GuardKey>>,
    key: GuardKey,
}

impl CircularGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cell. `None` if it is already being evaluated.
    pub fn enter(&self, sheet: &str, row: usize, col: usize) -> Option<GuardToken> {
        let key = (sheet.trim().to_lowercase(), row, col);
        if !self.active.insert(key.clone()) {
            log::debug!("circular reference at {}!{:?}", sheet, (row, col));
            return None;
        }
        Some(GuardToken {
            active: Arc::clone(&self.active),
            key,
        })
    }

    pub fn is_active(&self, sheet: &str, row: usize, col: usize) -> bool {
        self.active.contains(&(sheet.trim().to_lowercase(), row, col))
    }

    /// Number of cells currently under evaluation.
    pub fn depth(&self) -> usize {
        self.active.len()
    }
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        self.active.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reentry_is_refused() {
        let guard = CircularGuard::new();
        let token = guard.enter("Line Items", 0, 2);
        assert!(token.is_some());
        assert!(guard.enter("line items", 0, 2).is_none());
        assert!(guard.enter("Rate Card", 0, 2).is_some());
    }

    #[test]
    fn test_drop_releases() {
        let guard = CircularGuard::new();
        {
            let _token = guard.enter("Sheet", 1, 1).unwrap();
            assert!(guard.is_active("Sheet", 1, 1));
            assert_eq!(guard.depth(), 1);
        }
        assert!(!guard.is_active("Sheet", 1, 1));
        assert_eq!(guard.depth(), 0);
        assert!(guard.enter("Sheet", 1, 1).is_some());
    }
}
