pub mod indicators;
pub mod jobs;
pub mod processed_files;
