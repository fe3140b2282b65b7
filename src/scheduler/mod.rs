//! 调度核心：选择流水线与质量分析

pub mod analyzer;
pub mod selector;

pub use analyzer::{AnalysisReport, SimulationResult};
pub use selector::{Scheduler, Selection};
