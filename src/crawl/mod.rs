//! Crawling: strategy selection (C9) and the orchestrator that wraps it
//! with memory-adaptive throttling, stealth mode, and multi-URL
//! configuration (C10).

pub mod fetch;
pub mod orchestrator;
pub mod strategy;
