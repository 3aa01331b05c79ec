//! Post-extraction AI chain: cleaning, summarization and translation.

mod chain;
mod client;
mod stages;

pub use chain::{AiChain, AiStageKind, ChainTrigger, PipelineStage, StageReport};
pub use client::{ClaudeClient, LanguageModel};
pub use stages::{AiStore, CleaningStage, SummaryStage, TranslationStage};
