use std::collections::BTreeMap;

use serde_json::Value;

use crate::artifacts::ArtifactKind;

/// Everything a stage prompt is built from.
#[derive(Debug, Clone)]
pub struct PromptInput<'a> {
    pub title: &'a str,
    pub genre: &'a str,
    pub style_guide: Option<&'a str>,
    pub text: &'a str,
    /// Earlier artifacts this stage depends on.
    pub prior: &'a BTreeMap<ArtifactKind, Value>,
}

/// System and user prompt for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

const JSON_ONLY: &str =
    "Respond with a single JSON object and nothing else. Do not wrap it in Markdown.";

fn task(kind: &ArtifactKind) -> (&'static str, &'static str) {
    use ArtifactKind::*;

    match kind {
        Developmental => (
            "You are a senior developmental editor reviewing a full manuscript.",
            r#"Assess structure, pacing, character arcs, point of view, stakes and theme.
Return {"summary": string, "strengths": [string], "issues": [{"area": string, "severity": "low"|"medium"|"high", "detail": string, "suggestion": string}], "chapterNotes": [{"chapter": string, "note": string}]}."#,
        ),
        LineEditing => (
            "You are a line editor focused on prose rhythm, clarity and voice.",
            r#"Work from the developmental notes. Flag sentences that need tightening.
Return {"summary": string, "edits": [{"location": string, "original": string, "suggested": string, "reason": string}]}."#,
        ),
        CopyEditing => (
            "You are a copy editor enforcing grammar, spelling, punctuation and consistency.",
            r#"Apply the style guide when one is given.
Return {"summary": string, "corrections": [{"location": string, "original": string, "corrected": string, "rule": string}], "styleSheet": {"names": [string], "terms": [string]}}."#,
        ),
        BookDescription => (
            "You are a publishing copywriter writing retail book descriptions.",
            r#"Return {"headline": string, "short": string, "long": string}. The long description is at most 4000 characters."#,
        ),
        Keywords => (
            "You are a retail metadata specialist choosing search keywords for an online bookstore.",
            r#"Return {"keywords": [string]} with exactly 7 entries, each at most 50 characters."#,
        ),
        Categories => (
            "You are a retail metadata specialist choosing BISAC categories.",
            r#"Return {"categories": [{"code": string, "label": string, "reason": string}]} with at most 3 entries."#,
        ),
        AuthorBio => (
            "You are a publicist drafting an author biography from what the manuscript reveals about its author's voice.",
            r#"Return {"short": string, "long": string}. Leave placeholders like [AUTHOR NAME] for facts you cannot know."#,
        ),
        BackMatter => (
            "You are a publishing editor preparing back matter.",
            r#"Return {"acknowledgementsPrompt": string, "alsoBy": string, "callToAction": string, "discussionQuestions": [string]}."#,
        ),
        AudiobookNarration => (
            "You are an audiobook director preparing narration notes.",
            r#"Return {"narratorProfile": string, "tone": string, "characterVoices": [{"character": string, "direction": string}]}."#,
        ),
        AudiobookPronunciation => (
            "You are an audiobook producer compiling a pronunciation guide.",
            r#"Return {"entries": [{"term": string, "pronunciation": string, "notes": string}]}."#,
        ),
        AudiobookTiming => (
            "You are an audiobook producer estimating recording length.",
            r#"Assume 9300 words per finished hour. Return {"estimatedHours": number, "chapters": [{"chapter": string, "estimatedMinutes": number}]}."#,
        ),
        AudiobookSamples => (
            "You are an audiobook producer picking retail sample passages.",
            r#"Return {"samples": [{"chapter": string, "excerpt": string, "reason": string}]} with at most 3 entries, each excerpt under 300 words."#,
        ),
        AudiobookMetadata => (
            "You are an audiobook metadata specialist.",
            r#"Return {"title": string, "subtitle": string, "summary": string, "keywords": [string], "contentAdvisory": string}."#,
        ),
        HumanEdit(_) => ("", ""),
    }
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}

/// Deterministic prompt for `kind`: identical inputs give identical prompts.
pub fn build_prompt(kind: &ArtifactKind, input: &PromptInput<'_>, max_chars: usize) -> Prompt {
    let (role, instructions) = task(kind);
    let system = format!("{role}\n\n{JSON_ONLY}");

    let mut user = String::new();
    user.push_str(&format!("Task: {}\n{}\n\n", kind, instructions));
    user.push_str(&format!("Title: {}\nGenre: {}\n", input.title, input.genre));
    if let Some(style) = input.style_guide.filter(|s| !s.trim().is_empty()) {
        user.push_str(&format!("Style guide: {}\n", style));
    }

    for (prior_kind, value) in input.prior {
        user.push_str(&format!("\n<{prior_kind}>\n{value}\n</{prior_kind}>\n"));
    }

    let (text, truncated) = truncate_chars(input.text, max_chars);
    user.push_str("\n<manuscript>\n");
    user.push_str(text);
    if truncated {
        user.push_str("\n[... manuscript truncated ...]");
    }
    user.push_str("\n</manuscript>\n");

    Prompt { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(prior: &'a BTreeMap<ArtifactKind, Value>, text: &'a str) -> PromptInput<'a> {
        PromptInput {
            title: "The Glass Orchard",
            genre: "literary",
            style_guide: Some("Chicago"),
            text,
            prior,
        }
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let mut prior = BTreeMap::new();
        prior.insert(ArtifactKind::LineEditing, serde_json::json!({"summary": "tight"}));
        prior.insert(ArtifactKind::Developmental, serde_json::json!({"summary": "solid"}));

        let a = build_prompt(&ArtifactKind::CopyEditing, &input(&prior, "Once."), 1000);
        let b = build_prompt(&ArtifactKind::CopyEditing, &input(&prior, "Once."), 1000);
        assert_eq!(a, b);

        let dev = a.user.find("<developmental>").unwrap();
        let line = a.user.find("<line-editing>").unwrap();
        assert!(dev < line);
        assert!(a.user.contains("Style guide: Chicago"));
        assert!(a.system.contains("JSON"));
    }

    #[test]
    fn test_manuscript_truncated_on_char_boundary() {
        let prior = BTreeMap::new();
        let text = "ééééé";
        let prompt = build_prompt(&ArtifactKind::Keywords, &input(&prior, text), 3);
        assert!(prompt
            .user
            .contains("<manuscript>\nééé\n[... manuscript truncated ...]\n</manuscript>"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abc", 5), ("abc", false));
        assert_eq!(truncate_chars("abcdef", 3), ("abc", true));
        assert_eq!(truncate_chars("日本語テキスト", 2), ("日本", true));
    }
}
