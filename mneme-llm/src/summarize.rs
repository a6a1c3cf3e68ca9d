//! Rolling conversation summaries.
//!
//! The newest `max(min_pending, window_size / 2)` messages are always left
//! out of the summary. Everything older that the prior summary does not yet
//! cover is folded into it, chunk by chunk, so that each prompt fits the
//! model's context window.
//!
//! ```text
//!  oldest                                                      newest
//!  [ summarized ... P ][ pending ... C ][ recency buffer (kept out) ]
//!                    ^                ^
//!         prior summary point    new summary point
//! ```

use std::sync::Arc;

use tracing::{debug, warn};

use mneme_core::{Message, MessageId, Summary};

use crate::client::{CompletionOptions, LlmClient};
use crate::context::CallContext;
use crate::error::LlmError;
use crate::prompt::summary_prompt;
use crate::tokens::TokenCounter;

/// Tokens reserved for the model's output in every summary prompt.
pub const SUMMARY_OUTPUT_RESERVE: usize = 1024;

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// The pending range of one summarization, as inclusive message indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryPlan {
    /// First message not covered by the prior summary.
    pub start_index: usize,
    /// Newest message to fold in; becomes the new summary point.
    pub cut_index: usize,
}

impl SummaryPlan {
    /// Compute the pending range, or `None` when there is nothing to fold in.
    ///
    /// A prior summary point that is not in `messages` lies before the slice,
    /// so every message up to the cut is pending.
    #[must_use]
    pub fn compute(
        window_size: usize,
        messages: &[Message],
        prior: Option<&Summary>,
        min_pending: usize,
    ) -> Option<Self> {
        let keep = min_pending.max(window_size / 2);
        let cut_index = messages.len().checked_sub(keep.checked_add(1)?)?;

        let start_index = match prior.and_then(|s| s.summary_point_id) {
            Some(point) => match messages.iter().position(|m| m.id == point) {
                Some(prior_index) if cut_index <= prior_index => return None,
                Some(prior_index) => prior_index + 1,
                None => 0,
            },
            None => 0,
        };

        Some(Self {
            start_index,
            cut_index,
        })
    }

    /// The pending messages.
    #[must_use]
    pub fn pending<'a>(&self, messages: &'a [Message]) -> &'a [Message] {
        messages.get(self.start_index..=self.cut_index).unwrap_or_default()
    }

    /// ID of the message that becomes the new summary point.
    #[must_use]
    pub fn cut_id(&self, messages: &[Message]) -> Option<MessageId> {
        messages.get(self.cut_index).map(|m| m.id)
    }
}

/// Number of leading `lines` that fit in `budget` tokens, joined by newlines.
///
/// Always at least one when `lines` is non-empty, so an oversized message is
/// sent on its own rather than stalling the fold.
#[must_use]
pub fn take_chunk(lines: &[String], counter: &TokenCounter, budget: usize) -> usize {
    let mut used = 0;
    for (i, line) in lines.iter().enumerate() {
        used += counter.count(line) + 1;
        if used > budget {
            return i.max(1);
        }
    }
    lines.len()
}

/// Token count above which a summary should be compacted.
#[must_use]
pub fn compaction_threshold(max_tokens: usize) -> usize {
    max_tokens
        .saturating_sub(SUMMARY_OUTPUT_RESERVE)
        .min(max_tokens / 5 * 4)
}

fn format_line(message: &Message) -> String {
    format!("{}: {}", message.role, message.content.trim())
}

// ---------------------------------------------------------------------------
// Summarizer
// ---------------------------------------------------------------------------

/// Folds older messages into a rolling summary with an LLM.
#[derive(Clone)]
pub struct Summarizer {
    client: Arc<dyn LlmClient>,
    options: CompletionOptions,
}

impl Summarizer {
    /// A summarizer whose completions are capped at [`SUMMARY_OUTPUT_RESERVE`]
    /// tokens.
    #[must_use]
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        let reserve = u32::try_from(SUMMARY_OUTPUT_RESERVE).unwrap_or(u32::MAX);
        Self {
            client,
            options: CompletionOptions::default().with_max_tokens(reserve),
        }
    }

    /// Override the completion options.
    #[must_use]
    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    /// Produce the next summary of `messages` (oldest first).
    ///
    /// Returns the prior summary unchanged when the cut point would not move
    /// forward. When the pending messages carry no text, the summary point
    /// advances and the prior content is kept without calling the model.
    ///
    /// # Errors
    /// - [`LlmError::Validation`] if the pending messages carry no text and
    ///   there is no prior content to keep.
    /// - [`LlmError::ContextBudgetExceeded`] if the running summary leaves no
    ///   room for new lines.
    /// - [`LlmError::EmptyCompletion`] if the model returns no text.
    /// - Transport and cancellation errors from the client.
    pub async fn summarize(
        &self,
        ctx: &CallContext,
        window_size: usize,
        messages: &[Message],
        prior: Option<&Summary>,
        min_pending: usize,
    ) -> Result<Summary, LlmError> {
        let prior_summary = prior.cloned().unwrap_or_default();

        let Some(plan) = SummaryPlan::compute(window_size, messages, prior, min_pending) else {
            debug!(
                messages = messages.len(),
                window_size,
                "summary point would not advance, keeping prior summary"
            );
            return Ok(prior_summary);
        };
        let Some(cut_id) = plan.cut_id(messages) else {
            return Ok(prior_summary);
        };

        let lines: Vec<String> = plan
            .pending(messages)
            .iter()
            .filter(|m| m.has_content())
            .map(format_line)
            .collect();
        if lines.is_empty() {
            if prior_summary.content.trim().is_empty() {
                return Err(LlmError::Validation(
                    "pending messages carry no text and there is no prior summary".into(),
                ));
            }
            debug!(
                cut_index = plan.cut_index,
                "pending messages are empty, advancing summary point"
            );
            return Ok(Summary {
                summary_point_id: Some(cut_id),
                ..prior_summary
            });
        }

        let counter = self.client.token_counter();
        let max_tokens = counter.max_tokens();
        let template_tokens = counter.count(&summary_prompt("", ""));

        let mut running = prior_summary.content;
        let mut rest = lines.as_slice();
        let mut calls = 0_usize;
        while !rest.is_empty() {
            ctx.check()?;
            let required = SUMMARY_OUTPUT_RESERVE + template_tokens + counter.count(&running);
            let budget = max_tokens
                .checked_sub(required)
                .filter(|b| *b > 0)
                .ok_or(LlmError::ContextBudgetExceeded {
                    required,
                    available: max_tokens,
                })?;

            let (chunk, tail) = rest.split_at(take_chunk(rest, counter, budget));
            let prompt = summary_prompt(&running, &chunk.join("\n"));
            let next = self.client.complete(ctx, &prompt, &self.options).await?;
            if next.trim().is_empty() {
                return Err(LlmError::EmptyCompletion);
            }
            running = next.trim().to_string();
            rest = tail;
            calls += 1;
        }

        let token_count = counter.count(&running);
        let threshold = compaction_threshold(max_tokens);
        if token_count > threshold {
            warn!(
                token_count,
                threshold,
                model = self.client.model_name(),
                "summary exceeds compaction threshold"
            );
        }
        debug!(
            start_index = plan.start_index,
            cut_index = plan.cut_index,
            lines = lines.len(),
            calls,
            token_count,
            "summary updated"
        );

        Ok(Summary {
            content: running,
            token_count,
            summary_point_id: Some(cut_id),
        })
    }

    /// Whether `summary` is too large to keep folding into.
    #[must_use]
    pub fn needs_compaction(&self, summary: &Summary) -> bool {
        summary.token_count > compaction_threshold(self.client.max_tokens())
    }
}
