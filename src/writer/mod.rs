//! Everything that leaves the engine: the snapshot store and rendered reports.
pub mod history;
pub mod report;

pub use history::{History, compare_versions, content_id};
