use crate::core::cancellation::CancellationSignal;
use crate::core::errors::{LockstepError, Result, UnitFailure};
use crate::execution::parallel::ExecutableUnit;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs its units one after another. The signal is checked before each start
/// and the first failure ends the sequence.
pub struct SequentialExecutor {
    name: String,
    units: Vec<Arc<dyn ExecutableUnit>>,
}

impl SequentialExecutor {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            units: Vec::new(),
        }
    }

    pub fn with_unit(mut self, unit: Arc<dyn ExecutableUnit>) -> Self {
        self.units.push(unit);
        self
    }

    pub fn add_unit(&mut self, unit: Arc<dyn ExecutableUnit>) {
        self.units.push(unit);
    }

    pub async fn run(&self, signal: &CancellationSignal) -> Result<()> {
        for (index, unit) in self.units.iter().enumerate() {
            if signal.is_cancelled() {
                return Err(LockstepError::cancelled(&self.name));
            }
            debug!(sequence = %self.name, index, unit = unit.name(), "running unit");
            if let Err(cause) = unit.execute(signal).await {
                if signal.is_cancelled() {
                    debug!(sequence = %self.name, index, error = %format!("{:#}", cause), "unit stopped by cancellation");
                    return Err(LockstepError::cancelled(&self.name));
                }
                warn!(sequence = %self.name, index, unit = unit.name(), "unit failed, stopping sequence");
                return Err(LockstepError::aggregate(
                    &self.name,
                    vec![UnitFailure::new(index, unit.name(), cause)],
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutableUnit for SequentialExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, signal: &CancellationSignal) -> anyhow::Result<()> {
        Ok(self.run(signal).await?)
    }
}
