mod assessment;
pub mod evaluator;

pub use assessment::{Assessment, AssessmentParseError, InterventionType};
pub use evaluator::{CriticEvaluationInput, CriticEvaluator, EvaluationError, HistoryEntry};
