use crate::fragment::Usage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Run-scoped usage and failure counters.
///
/// Shared as `Arc<RunStatistics>` between every call of one run. All updates
/// are single atomic operations, so concurrent calls never lose increments.
#[derive(Debug, Default)]
pub struct RunStatistics {
    total_prompt_tokens: AtomicU64,
    total_completion_tokens: AtomicU64,
    total_successful_calls: AtomicU64,
    total_failed_calls: AtomicU64,
    max_context_window: AtomicU64,
}

/// Point-in-time copy of [`RunStatistics`], as broadcast to event sinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsageStats {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_successful_calls: u64,
    pub total_failed_calls: u64,
    pub max_context_window: u64,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts one successful call. The context high-water mark uses the
    /// call's prompt + completion total.
    pub fn record_success(&self, usage: &Usage) {
        self.total_prompt_tokens
            .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.total_completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.total_successful_calls.fetch_add(1, Ordering::Relaxed);
        self.max_context_window.fetch_max(
            usage.prompt_tokens.saturating_add(usage.completion_tokens),
            Ordering::Relaxed,
        );
    }

    pub fn record_failure(&self) {
        self.total_failed_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TokenUsageStats {
        TokenUsageStats {
            total_prompt_tokens: self.total_prompt_tokens.load(Ordering::Relaxed),
            total_completion_tokens: self.total_completion_tokens.load(Ordering::Relaxed),
            total_successful_calls: self.total_successful_calls.load(Ordering::Relaxed),
            total_failed_calls: self.total_failed_calls.load(Ordering::Relaxed),
            max_context_window: self.max_context_window.load(Ordering::Relaxed),
        }
    }
}
