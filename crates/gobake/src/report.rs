//! Summary of a bake, serializable as JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::baker::Baked;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakeReport {
    pub original_size: usize,
    pub baked_size: usize,
    /// Whole percent, negative when the module grew.
    pub size_reduction_percent: i64,
    /// Instructions executed before `main.main` by the original module.
    pub instructions_before: u64,
    /// The same count for the baked module, when it was baked again.
    pub instructions_after: Option<u64>,
    pub host_calls: usize,
    /// Sorted.
    pub initializers_cleared: Vec<String>,
    pub folded_pre_calls: usize,
    pub elapsed_ms: u64,
}

impl BakeReport {
    pub fn new(baked: &Baked, original_size: usize, baked_size: usize, elapsed: Duration) -> Self {
        let size_reduction_percent = if original_size == 0 {
            0
        } else {
            ((original_size as f64 - baked_size as f64) / original_size as f64 * 100.0) as i64
        };
        Self {
            original_size,
            baked_size,
            size_reduction_percent,
            instructions_before: baked.instruction_count,
            instructions_after: None,
            host_calls: baked.calls.len(),
            initializers_cleared: baked.inits_cleared.iter().cloned().collect(),
            folded_pre_calls: baked.folded_pre_calls,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Record the instruction count of baking the baked module again.
    pub fn with_rebake(mut self, rebaked: &Baked) -> Self {
        self.instructions_after = Some(rebaked.instruction_count);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn percentages_and_rebake() {
        let baked = Baked {
            module: Default::default(),
            calls: Vec::new(),
            instruction_count: 900,
            inits_cleared: BTreeSet::from(["unicode.init".to_string(), "errors.init".to_string()]),
            folded_pre_calls: 3,
        };
        let rebaked = Baked {
            instruction_count: 12,
            ..baked.clone()
        };
        let report = BakeReport::new(&baked, 1000, 750, Duration::from_millis(42)).with_rebake(&rebaked);
        assert_eq!(report.size_reduction_percent, 25);
        assert_eq!(report.instructions_after, Some(12));
        assert_eq!(report.initializers_cleared, vec!["errors.init", "unicode.init"]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["elapsed_ms"], 42);
        assert_eq!(BakeReport::new(&baked, 0, 10, Duration::ZERO).size_reduction_percent, 0);
    }
}
