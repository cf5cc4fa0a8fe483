pub mod expression;
pub mod stores;

pub use expression::{evaluate_instruction, EvaluationContext, ExpressionEvaluator, NoopEvaluator};
pub use stores::{find_store, DependencyStore};
