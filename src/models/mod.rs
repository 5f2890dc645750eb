pub mod intake;
pub mod job;
pub mod listing;
pub mod submission;
