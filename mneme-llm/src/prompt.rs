//! Prompt templates for summarization.

/// Progressive summary prompt.
///
/// Placeholders: `{prior_summary}`, `{new_lines}`.
pub const SUMMARY_PROMPT: &str = r"Review the current summary and the new conversation lines below.
Write an updated summary that folds the new lines into the current summary.
Keep facts about the participants, their preferences and any decisions made.
Write in the third person and in the past tense. Return only the summary text.

EXAMPLE
Current summary:
The human asked the AI for a dinner recommendation. The AI suggested a
Thai restaurant nearby.

New lines of conversation:
human: Do they have vegetarian options?
ai: Yes, most of their curries can be made with tofu.

New summary:
The human asked the AI for a dinner recommendation. The AI suggested a
nearby Thai restaurant and confirmed that its curries can be made
vegetarian with tofu.
END OF EXAMPLE

Current summary:
{prior_summary}

New lines of conversation:
{new_lines}

New summary:
";

/// Replace `{key}` with the corresponding value.
///
/// Single pass over `template`: inserted values are never scanned for
/// placeholders.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, close))
        });
        match value {
            Some((value, close)) => {
                result.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                result.push('{');
                rest = after;
            }
        }
    }
    result.push_str(rest);
    result
}

/// Render [`SUMMARY_PROMPT`].
#[must_use]
pub fn summary_prompt(prior_summary: &str, new_lines: &str) -> String {
    render_template(
        SUMMARY_PROMPT,
        &[("prior_summary", prior_summary), ("new_lines", new_lines)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_replaces_all_placeholders() {
        let prompt = summary_prompt("They met.", "human: hi\nai: hello");
        assert!(prompt.contains("They met."));
        assert!(prompt.contains("human: hi\nai: hello"));
        assert!(!prompt.contains("{prior_summary}"));
        assert!(!prompt.contains("{new_lines}"));
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        assert_eq!(render_template("{a} {b}", &[("a", "x")]), "x {b}");
        assert_eq!(render_template("{{a}} {", &[("a", "x")]), "{x} {");
    }

    #[test]
    fn placeholders_inside_values_stay_literal() {
        let prompt = summary_prompt(
            "User literally typed {new_lines} once.",
            "human: turn 3 about",
        );
        assert_eq!(prompt.matches("turn 3 about").count(), 1);
        assert!(prompt.contains("User literally typed {new_lines} once."));
    }
}
