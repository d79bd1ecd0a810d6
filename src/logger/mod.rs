//! Structured activity logging for resize runs.

pub mod jsonl;
