pub mod composite;
pub mod devia;
pub mod matcher;

pub use composite::{composite, period_score, PeriodAssessment};
pub use devia::{devia_pruned, devia_raw, DeviaResult};
pub use matcher::{best_devia, devia};
