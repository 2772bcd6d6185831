//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrator (stages, jobs, dead letters)
//! - Ingestion (uploads)
//! - LLM usage (tokens, cost)
//! - Read-through cache (hits, misses)

use once_cell::sync::Lazy;
use prometheus::{Counter, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Orchestrator Metrics
// =============================================================================

/// Stage duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("inkwell_stage_duration_seconds", "Duration of pipeline stages")
            .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["stage", "result"], // result: "success", "failure"
    )
    .unwrap()
});

/// Jobs finished by pipeline and result.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("inkwell_jobs_finished_total", "Total jobs reaching a terminal state"),
        &["pipeline", "result"], // result: "complete", "failed", "cancelled"
    )
    .unwrap()
});

/// Deliveries returned to the queue for another attempt.
pub static JOB_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("inkwell_job_retries_total", "Total deliveries sent back for retry"),
        &["pipeline"],
    )
    .unwrap()
});

/// Messages parked in the dead-letter state.
pub static DEAD_LETTERS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("inkwell_dead_letters_total", "Total dead-lettered messages").unwrap()
});

// =============================================================================
// Ingestion Metrics
// =============================================================================

/// Uploads by result.
pub static UPLOADS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("inkwell_uploads_total", "Total manuscript uploads"),
        &["result"], // "accepted", "bad_file", "quota_exceeded", "error"
    )
    .unwrap()
});

// =============================================================================
// LLM Metrics
// =============================================================================

/// LLM tokens used.
pub static LLM_TOKENS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("inkwell_llm_tokens_total", "Total LLM tokens used"),
        &["model", "direction"], // direction: "input", "output"
    )
    .unwrap()
});

/// Metered LLM spend in USD.
pub static LLM_COST: Lazy<Counter> = Lazy::new(|| {
    Counter::new("inkwell_llm_cost_usd_total", "Total metered LLM cost in USD").unwrap()
});

// =============================================================================
// Cache Metrics
// =============================================================================

pub static CACHE_HITS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("inkwell_cache_hits_total", "Read-through cache hits"),
        &["view"],
    )
    .unwrap()
});

pub static CACHE_MISSES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("inkwell_cache_misses_total", "Read-through cache misses"),
        &["view"],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Orchestrator
        Box::new(STAGE_DURATION.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(JOB_RETRIES.clone()),
        Box::new(DEAD_LETTERS.clone()),
        // Ingestion
        Box::new(UPLOADS.clone()),
        // LLM
        Box::new(LLM_TOKENS.clone()),
        Box::new(LLM_COST.clone()),
        // Cache
        Box::new(CACHE_HITS.clone()),
        Box::new(CACHE_MISSES.clone()),
    ]
}
