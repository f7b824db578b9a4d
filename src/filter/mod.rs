pub mod expression;
pub mod matcher;

pub use expression::{CompareOp, FilterExpression};
