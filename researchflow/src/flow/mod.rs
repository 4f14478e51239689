//! Flow-control combinators: recorded evaluations and bounded loops.

mod evaluate;
mod repeat;

pub use evaluate::{evaluation_passed, EvaluateStep, Judgment};
pub use repeat::{LoopPhase, RepeatUntil};
