// lib.rs
pub mod alignment_record;
pub mod annotate;
pub mod bam;
pub mod commands;
pub mod error;
pub mod mature;
pub mod precursor;
pub mod realign;
pub mod report;
