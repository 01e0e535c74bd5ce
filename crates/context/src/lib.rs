//! Context-window composer.
//!
//! Rebuilds the injected prompt for each turn from durable state: the
//! thread's rolling summary, its recent visible turns, and the current
//! user input, all within a character budget. Pure functions — no I/O,
//! no clocks. All budgets are measured in characters, not bytes, so
//! multi-byte text never splits mid-character.

use std::collections::VecDeque;

/// Upper bound on trim-loop iterations before brute truncation.
const MAX_TRIM_ITERATIONS: usize = 256;

/// One prior turn injected into the prompt.
#[derive(Debug, Clone)]
pub struct RecentTurn {
    pub request_text: String,
    pub response_text: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compose
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assemble the injected prompt.
///
/// First-turn pass-through: with no summary and no recent turns, the
/// input is returned verbatim (truncated to the budget) so slash-command
/// style first inputs are not masked by context headings.
///
/// When the rendered prompt exceeds `max_chars`, a bounded trim loop
/// drops the oldest recent turn, then shrinks the summary from its end,
/// then shrinks the input from its start (the user's most recent wording
/// is at the end), and finally brute-truncates the render.
pub fn compose(
    summary: &str,
    recent_turns: &[RecentTurn],
    current_input: &str,
    max_chars: usize,
) -> String {
    let mut summary = summary.trim().to_owned();
    let mut input = current_input.trim().to_owned();
    let mut turns: VecDeque<RecentTurn> = recent_turns
        .iter()
        .map(|t| RecentTurn {
            request_text: t.request_text.trim().to_owned(),
            response_text: t.response_text.trim().to_owned(),
        })
        .collect();

    if summary.is_empty() && turns.is_empty() {
        return truncate_chars(&input, max_chars);
    }

    for _ in 0..MAX_TRIM_ITERATIONS {
        let rendered = render(&summary, &turns, &input);
        if char_len(&rendered) <= max_chars {
            return rendered;
        }
        if turns.pop_front().is_some() {
            continue;
        }
        if !summary.is_empty() {
            let keep = char_len(&summary) - shrink_step(&summary);
            summary = take_chars(&summary, keep);
            continue;
        }
        if !input.is_empty() {
            let drop = shrink_step(&input);
            input = skip_chars(&input, drop);
            continue;
        }
        break;
    }

    truncate_chars(&render(&summary, &turns, &input), max_chars)
}

/// The prompt for a compact turn: same composition, with the user input
/// replaced by a fixed summarization instruction.
pub fn compose_compact(
    summary: &str,
    recent_turns: &[RecentTurn],
    max_summary_chars: usize,
    max_chars: usize,
) -> String {
    compose(
        summary,
        recent_turns,
        &compact_instruction(max_summary_chars),
        max_chars,
    )
}

/// The summarization instruction sent to the provider on compact.
pub fn compact_instruction(max_summary_chars: usize) -> String {
    format!(
        "Summarize this conversation into a rolling summary of at most \
         {max_summary_chars} characters. Preserve the current goal, key \
         decisions, open questions, and important facts about the user or \
         codebase. Write plain prose with no headings, and reply with the \
         summary only."
    )
}

fn render(summary: &str, turns: &VecDeque<RecentTurn>, input: &str) -> String {
    let mut out = String::new();
    out.push_str("[Conversation Summary]\n");
    out.push_str(if summary.is_empty() { "(empty)" } else { summary });
    out.push_str("\n\n[Recent Turns]\n");
    if turns.is_empty() {
        out.push_str("(none)\n");
    } else {
        for turn in turns {
            out.push_str("User: ");
            out.push_str(&turn.request_text);
            out.push_str("\nAssistant: ");
            out.push_str(&turn.response_text);
            out.push('\n');
        }
    }
    out.push_str("----\n\n[Current User Input]\n");
    out.push_str(input);
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Character helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Keep the first `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if char_len(s) <= max {
        return s.to_owned();
    }
    s.chars().take(max).collect()
}

fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn skip_chars(s: &str, n: usize) -> String {
    s.chars().skip(n).collect()
}

/// A quarter of the text (at least one character) per trim round.
fn shrink_step(s: &str) -> usize {
    std::cmp::max(1, char_len(s) / 4)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
