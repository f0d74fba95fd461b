//! Merging retrieved context under a token budget.
//!
//! Sections are taken in priority order (document chunks first, then recalled
//! memories in rank order) until the budget is spent. The section that
//! crosses the budget is truncated and everything after it is dropped. A
//! section too large to keep even partly is skipped, and later sections may
//! still fill the space. The merged string always satisfies
//! `estimate_tokens(text) <= budget`.

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

const SECTION_SEPARATOR: &str = "\n\n";

/// Estimated token count: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Where a section came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Document,
    Memory,
}

/// One labelled block of context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSection {
    pub kind: SectionKind,
    pub label: String,
    pub body: String,
}

impl ContextSection {
    /// A document chunk, labelled with its source.
    pub fn document(source: &str, content: &str) -> Self {
        Self {
            kind: SectionKind::Document,
            label: format!("[Document: {}]", source),
            body: content.to_string(),
        }
    }

    /// A recalled memory, labelled with its confidence as a percentage.
    pub fn memory(confidence: f32, response: &str) -> Self {
        Self {
            kind: SectionKind::Memory,
            label: format!("[Memory - Confidence: {:.2}%]", confidence * 100.0),
            body: response.to_string(),
        }
    }

    fn render(&self) -> String {
        format!("{}\n{}", self.label, self.body)
    }
}

/// The merged context string and what went into it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedContext {
    pub text: String,
    /// Document sections included, fully or truncated.
    pub documents_used: usize,
    /// Memory sections included, fully or truncated.
    pub memories_used: usize,
    /// Whether any section was cut or dropped for budget.
    pub truncated: bool,
}

impl MergedContext {
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

/// Concatenate `sections` in order without exceeding `token_budget`.
pub fn merge_context(
    sections: impl IntoIterator<Item = ContextSection>,
    token_budget: usize,
) -> MergedContext {
    let max_chars = token_budget.saturating_mul(CHARS_PER_TOKEN);
    let mut merged = MergedContext::default();
    let mut used = 0usize;

    for section in sections {
        let separator = if merged.text.is_empty() {
            0
        } else {
            SECTION_SEPARATOR.len()
        };
        let remaining = max_chars.saturating_sub(used + separator);
        let rendered = section.render();
        let length = rendered.chars().count();

        if length <= remaining {
            if separator > 0 {
                merged.text.push_str(SECTION_SEPARATOR);
            }
            merged.text.push_str(&rendered);
            used += separator + length;
            count(&mut merged, section.kind);
            continue;
        }

        merged.truncated = true;
        // Only keep a partial section if some of its body fits after the label.
        // A skipped section leaves room for smaller ones further down.
        if remaining > section.label.chars().count() + 1 {
            if separator > 0 {
                merged.text.push_str(SECTION_SEPARATOR);
            }
            merged.text.extend(rendered.chars().take(remaining));
            count(&mut merged, section.kind);
            break;
        }
    }

    merged
}

fn count(merged: &mut MergedContext, kind: SectionKind) {
    match kind {
        SectionKind::Document => merged.documents_used += 1,
        SectionKind::Memory => merged.memories_used += 1,
    }
}
