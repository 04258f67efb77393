pub mod jobs;
pub mod workflows;
