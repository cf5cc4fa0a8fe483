//! Boundary for parameter expression evaluation.
//!
//! Parameter values may contain references that only make sense on the
//! receiving participant (store endpoints, layout addresses). Resolution is
//! left to an [`ExpressionEvaluator`]; this module only drives it over an
//! instruction's parameters.

use crate::core::cancellation::CancellationSignal;
use crate::core::errors::LockstepError;
use crate::external::stores::{find_store, DependencyStore};
use crate::instructions::instruction::Instruction;
use crate::state::PropertyBag;
use crate::topology::EnvironmentLayout;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// What an evaluator may resolve references against
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub stores: Vec<DependencyStore>,
    pub layout: Option<Arc<EnvironmentLayout>>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: DependencyStore) -> Self {
        self.stores.push(store);
        self
    }

    pub fn with_layout(mut self, layout: Arc<EnvironmentLayout>) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn store(&self, name: &str) -> Option<&DependencyStore> {
        find_store(&self.stores, name)
    }
}

#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
    /// Whether `text` holds anything this evaluator would rewrite
    fn is_supported(&self, text: &str) -> bool;

    async fn evaluate(
        &self,
        text: &str,
        context: &EvaluationContext,
        signal: &CancellationSignal,
    ) -> anyhow::Result<String>;

    /// Rewrite every supported string value. Keys and non-string values are
    /// left alone.
    async fn evaluate_parameters(
        &self,
        parameters: &PropertyBag,
        context: &EvaluationContext,
        signal: &CancellationSignal,
    ) -> anyhow::Result<PropertyBag> {
        let mut rewritten = parameters.clone();
        for (key, value) in parameters.iter() {
            let Some(text) = value.as_str() else {
                continue;
            };
            if !self.is_supported(text) {
                continue;
            }
            if signal.is_cancelled() {
                return Err(LockstepError::cancelled("evaluate parameters").into());
            }
            let evaluated = self.evaluate(text, context, signal).await?;
            debug!(parameter = key, "evaluated parameter expression");
            rewritten.set(key, evaluated);
        }
        Ok(rewritten)
    }
}

/// Same instruction with its parameter expressions resolved. The type, the
/// parameter key set and the components are preserved.
pub async fn evaluate_instruction(
    evaluator: &dyn ExpressionEvaluator,
    instruction: &Instruction,
    context: &EvaluationContext,
    signal: &CancellationSignal,
) -> anyhow::Result<Instruction> {
    let evaluated = evaluator
        .evaluate_parameters(instruction.parameters(), context, signal)
        .await?;
    let rewritten = instruction.map_parameters(|key, original| {
        Ok(evaluated
            .try_get(key)
            .cloned()
            .unwrap_or_else(|| original.clone()))
    })?;
    Ok(rewritten)
}

/// Leaves every value untouched
pub struct NoopEvaluator;

#[async_trait]
impl ExpressionEvaluator for NoopEvaluator {
    fn is_supported(&self, _text: &str) -> bool {
        false
    }

    async fn evaluate(
        &self,
        text: &str,
        _context: &EvaluationContext,
        _signal: &CancellationSignal,
    ) -> anyhow::Result<String> {
        Ok(text.to_string())
    }
}
