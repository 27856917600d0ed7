pub mod file;
pub mod task;

pub use file::FileRecord;
pub use task::{RecoveryReport, TaskPage, TaskRecord, TaskStatus};
