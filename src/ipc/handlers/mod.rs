pub mod assignments;
pub mod content;
pub mod core;
pub mod progress;
pub mod responses;
pub mod students;
