// Compaction pipeline: an ordered chain of strategies over a batch of health samples.
// Strategies never touch the store; the compact job hands them an in-memory batch.

mod prune_exited;
mod reduce_by_ten;

pub use prune_exited::PruneExitedAfterDays;
pub use reduce_by_ten::{REDUCTION_FACTOR, ReduceByTenForEachContainer};

use crate::models::HealthMetric;

/// One pure step of the pipeline. Returns a new batch; the input is left untouched.
pub trait CompactionStrategy: Send + Sync {
    /// Display name, e.g. `PruneExitedAfterDays(14)`.
    fn name(&self) -> String;

    fn transform(&self, data: &[HealthMetric]) -> Vec<HealthMetric>;
}

/// Chains strategies in configured order; each output feeds the next strategy.
pub struct DataCompactManager {
    strategies: Vec<Box<dyn CompactionStrategy>>,
}

impl DataCompactManager {
    pub fn new(strategies: Vec<Box<dyn CompactionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Prune placeholders older than `prune_after_days`, then reduce each container by ten.
    pub fn standard(prune_after_days: u32) -> Self {
        Self::new(vec![])
            .with_strategy(PruneExitedAfterDays::new(prune_after_days))
            .with_strategy(ReduceByTenForEachContainer)
    }

    pub fn with_strategy(mut self, strategy: impl CompactionStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Runs the batch through every strategy in order. No strategies = identity.
    pub fn compact(&self, records: &[HealthMetric]) -> Vec<HealthMetric> {
        let mut data = records.to_vec();
        for strategy in &self.strategies {
            let before = data.len();
            data = strategy.transform(&data);
            tracing::debug!(
                strategy = %strategy.name(),
                before,
                after = data.len(),
                "compaction step"
            );
        }
        data
    }

    /// Configured strategy names, in execution order.
    pub fn strategies(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}
