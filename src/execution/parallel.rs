//! Fan-out / join over independently executable units.

use crate::core::cancellation::CancellationSignal;
use crate::core::errors::{LockstepError, Result, UnitFailure};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Something that can be run to completion and observes cancellation
#[async_trait]
pub trait ExecutableUnit: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, signal: &CancellationSignal) -> anyhow::Result<()>;
}

/// Start every unit concurrently and wait for all of them.
///
/// Units start in input order; none start once `signal` has fired. A fired
/// signal makes this return `Cancelled` without waiting further. Otherwise
/// every failure (panics included) is collected into one
/// `AggregateExecution` error.
#[instrument(skip(units, signal), fields(unit_count = units.len()))]
pub async fn run_all(units: Vec<Arc<dyn ExecutableUnit>>, signal: &CancellationSignal) -> Result<()> {
    run_all_named("run_all", units, signal).await
}

async fn run_all_named(
    operation: &str,
    units: Vec<Arc<dyn ExecutableUnit>>,
    signal: &CancellationSignal,
) -> Result<()> {
    if units.is_empty() {
        return Ok(());
    }
    let started = Instant::now();
    let names: Vec<String> = units.iter().map(|unit| unit.name().to_string()).collect();

    let mut handles = Vec::with_capacity(units.len());
    for (index, unit) in units.into_iter().enumerate() {
        if signal.is_cancelled() {
            // Units already running keep the signal and stop on their own.
            info!(started = index, "cancelled before every unit started");
            return Err(LockstepError::cancelled(operation));
        }
        let unit_signal = signal.clone();
        debug!(index, unit = unit.name(), "starting unit");
        handles.push(tokio::spawn(async move { unit.execute(&unit_signal).await }));
    }

    let results = tokio::select! {
        biased;
        _ = signal.cancelled() => None,
        results = join_all(handles) => Some(results),
    };
    // Units stopped by the signal report their own errors; those are not failures.
    let results = match results {
        Some(results) if !signal.is_cancelled() => results,
        _ => {
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "cancelled while units were running");
            return Err(LockstepError::cancelled(operation));
        }
    };

    let failures: Vec<UnitFailure> = results
        .into_iter()
        .enumerate()
        .filter_map(|(index, joined)| {
            let cause = match joined {
                Ok(Ok(())) => return None,
                Ok(Err(error)) => error,
                Err(join_error) if join_error.is_panic() => anyhow::anyhow!("unit panicked"),
                Err(join_error) => anyhow::anyhow!("unit task failed: {}", join_error),
            };
            warn!(index, unit = %names[index], error = %format!("{:#}", cause), "unit failed");
            Some(UnitFailure::new(index, names[index].clone(), cause))
        })
        .collect();

    if !failures.is_empty() {
        return Err(LockstepError::aggregate(operation, failures));
    }

    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "all units completed");
    Ok(())
}

/// A named group of units run with [`run_all`]. It is itself a unit, so
/// fan-outs nest.
pub struct ParallelExecutor {
    name: String,
    units: Vec<Arc<dyn ExecutableUnit>>,
}

impl ParallelExecutor {
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

    pub fn units(&self) -> &[Arc<dyn ExecutableUnit>] {
        &self.units
    }

    pub async fn run(&self, signal: &CancellationSignal) -> Result<()> {
        run_all_named(&self.name, self.units.clone(), signal).await
    }
}

#[async_trait]
impl ExecutableUnit for ParallelExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, signal: &CancellationSignal) -> anyhow::Result<()> {
        Ok(self.run(signal).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: String,
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl ExecutableUnit for Counting {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _signal: &CancellationSignal) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("{} broke", self.name);
            }
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl ExecutableUnit for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn execute(&self, _signal: &CancellationSignal) -> anyhow::Result<()> {
            panic!("boom");
        }
    }

    fn counting(name: &str, runs: &Arc<AtomicUsize>, fail: bool) -> Arc<dyn ExecutableUnit> {
        Arc::new(Counting {
            name: name.to_string(),
            runs: runs.clone(),
            fail,
        })
    }

    #[tokio::test]
    async fn test_empty_succeeds() {
        assert!(run_all(Vec::new(), &CancellationSignal::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_panic_is_a_unit_failure() {
        let runs = Arc::new(AtomicUsize::new(0));
        let units = vec![counting("ok", &runs, false), Arc::new(Panicking) as Arc<dyn ExecutableUnit>];

        let err = run_all(units, &CancellationSignal::new()).await.unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);
        assert_eq!(failures[0].unit, "panicking");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nested_executor_reports_inner_failures() {
        let runs = Arc::new(AtomicUsize::new(0));
        let inner = ParallelExecutor::new("inner")
            .with_unit(counting("a", &runs, false))
            .with_unit(counting("b", &runs, true));
        let outer = ParallelExecutor::new("outer")
            .with_unit(Arc::new(inner))
            .with_unit(counting("c", &runs, false));

        let err = outer.run(&CancellationSignal::new()).await.unwrap_err();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].unit, "inner");
        assert!(err.to_string().contains("b broke"));
    }
}
