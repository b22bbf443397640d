pub mod report;

pub use report::{ReportFormat, StateReport};
