use crate::record::{ScoredCandidate, VectorRecord};

pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;
pub const TRUNCATION_MARKER: &str = "\n[...truncated]";

/// Character-count token estimator. This is a heuristic, not a tokenizer:
/// budgets computed with it are approximate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    chars_per_token: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    pub selected: Vec<ScoredCandidate>,
    pub tokens_used: usize,
}

impl TokenBudget {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    pub fn chars_per_token(&self) -> usize {
        self.chars_per_token
    }

    pub fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }

    pub fn candidate(&self, record: VectorRecord, similarity: f32) -> ScoredCandidate {
        let token_cost = self.estimate(&record.content);
        ScoredCandidate {
            record,
            similarity: similarity.clamp(0.0, 1.0),
            token_cost,
            truncated: false,
        }
    }

    /// Greedy fill over candidates that are already ranked best-first.
    ///
    /// Only the very first candidate may be truncated, and only when it alone
    /// overflows the budget; allocation stops right after it. Later
    /// candidates that do not fit are skipped so smaller ones further down can
    /// still use the remaining budget.
    pub fn allocate(&self, candidates: Vec<ScoredCandidate>, max_tokens: usize) -> Allocation {
        if max_tokens == 0 {
            return Allocation::default();
        }

        let mut remaining = max_tokens;
        let mut selected = Vec::new();
        for (idx, mut candidate) in candidates.into_iter().enumerate() {
            if candidate.token_cost <= remaining {
                remaining -= candidate.token_cost;
                selected.push(candidate);
                continue;
            }
            if idx == 0 {
                let keep_chars = remaining.saturating_mul(self.chars_per_token);
                let mut content: String =
                    candidate.record.content.chars().take(keep_chars).collect();
                content.push_str(TRUNCATION_MARKER);
                candidate.record.content = content;
                candidate.token_cost = remaining;
                candidate.truncated = true;
                selected.push(candidate);
                remaining = 0;
                break;
            }
        }

        Allocation {
            selected,
            tokens_used: max_tokens - remaining,
        }
    }
}
