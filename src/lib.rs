//! Article extraction and sentence-by-sentence narration.

pub mod ai;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod extraction;
pub mod models;
pub mod speech;
