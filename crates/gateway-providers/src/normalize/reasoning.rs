//! Reasoning extraction shared by every adapter.

use crate::raw::RawReasoningDetail;
use gateway_core::{ReasoningKind, ReasoningToken};

/// Where a provider puts its reasoning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReasoningSource {
    /// Structured `reasoning_details` list
    Details,
    /// Plain `reasoning` string
    Reasoning,
    /// Plain `reasoning_content` string
    ReasoningContent,
}

/// The reasoning-bearing fields of a message or delta
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ReasoningFields<'a> {
    pub details: Option<&'a [RawReasoningDetail]>,
    pub reasoning: Option<&'a str>,
    pub reasoning_content: Option<&'a str>,
}

/// Collect tokens from `sources` in order.
///
/// Plain text is taken from the first source that has any, so a provider
/// sending the same thought both as `reasoning` and inside
/// `reasoning_details` is not counted twice. Encrypted details are always
/// kept.
pub(crate) fn extract(fields: ReasoningFields<'_>, sources: &[ReasoningSource]) -> Vec<ReasoningToken> {
    let mut tokens = Vec::new();
    let mut saw_plain = false;

    for source in sources {
        match source {
            ReasoningSource::Details => {
                for detail in fields.details.unwrap_or_default() {
                    if let Some(token) = from_detail(detail, tokens.len(), saw_plain) {
                        tokens.push(token);
                    }
                }
                saw_plain |= tokens.iter().any(|t| t.kind != ReasoningKind::Encrypted);
            }
            ReasoningSource::Reasoning | ReasoningSource::ReasoningContent if saw_plain => {}
            ReasoningSource::Reasoning => {
                if let Some(text) = fields.reasoning.filter(|s| !s.is_empty()) {
                    tokens.push(ReasoningToken::text(text, index(tokens.len())));
                    saw_plain = true;
                }
            }
            ReasoningSource::ReasoningContent => {
                if let Some(text) = fields.reasoning_content.filter(|s| !s.is_empty()) {
                    tokens.push(ReasoningToken::text(text, index(tokens.len())));
                    saw_plain = true;
                }
            }
        }
    }

    tokens
}

fn from_detail(detail: &RawReasoningDetail, position: usize, saw_plain: bool) -> Option<ReasoningToken> {
    let (kind, content) = match detail.detail_type.as_str() {
        "reasoning.text" if !saw_plain => (ReasoningKind::Text, detail.text.as_deref()?),
        "reasoning.summary" if !saw_plain => (ReasoningKind::Summary, detail.summary.as_deref()?),
        "reasoning.encrypted" => (ReasoningKind::Encrypted, detail.data.as_deref()?),
        _ => return None,
    };
    if content.is_empty() {
        return None;
    }

    Some(ReasoningToken {
        kind,
        content: content.to_string(),
        index: detail.index.unwrap_or_else(|| index(position)),
        format: detail.format.clone(),
        id: detail.id.clone(),
        signature: detail.signature.clone(),
    })
}

fn index(position: usize) -> u32 {
    u32::try_from(position).unwrap_or(u32::MAX)
}

/// Approximate token count, `ceil(chars / 4)`.
///
/// Not a tokenizer; used only when the provider reports nothing.
#[must_use]
pub fn estimate_tokens(text_len: usize) -> u32 {
    u32::try_from(text_len.div_ceil(4)).unwrap_or(u32::MAX)
}
