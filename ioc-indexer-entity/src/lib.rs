pub mod extracted_indicators;
pub mod processed_files;
pub mod processing_jobs;
pub mod sea_orm_active_enums;
