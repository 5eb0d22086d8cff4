//! Keyword triage for a user turn, plus the prompt cleanup applied before
//! the image service call. Both are plain substring transforms, not intent
//! detection; the orchestrator never inspects text on its own.

/// Trigger words that mark a turn as an image request (create, generate,
/// draw, photo, image).
pub const IMAGE_TRIGGERS: [&str; 5] = ["crie", "gere", "desenhe", "foto", "imagem"];

/// Stand-in prompt when stripping leaves nothing usable.
pub const DEFAULT_IMAGE_PROMPT: &str = "a serene abstract landscape, digital art";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    ImageRequest,
    TextRequest,
}

/// Lower-cased substring match against the trigger set. Total and
/// stateless; text that merely mentions a trigger word still classifies
/// as an image request.
pub fn classify(text: &str) -> TurnKind {
    let lower = text.to_lowercase();
    if IMAGE_TRIGGERS.iter().any(|t| lower.contains(t)) {
        TurnKind::ImageRequest
    } else {
        TurnKind::TextRequest
    }
}

/// Removes every occurrence of the trigger words and collapses the
/// leftover whitespace. The prompt comes back lower-cased, and a trigger
/// inside an unrelated word is mangled too ("fotografia" loses "foto").
pub fn strip_command_words(text: &str) -> String {
    let mut out = text.to_lowercase();
    for word in IMAGE_TRIGGERS {
        out = out.replace(word, "");
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stripped prompt, or the default prompt when nothing is left.
pub fn sanitize_image_prompt(text: &str) -> String {
    let cleaned = strip_command_words(text);
    if cleaned.is_empty() {
        DEFAULT_IMAGE_PROMPT.to_string()
    } else {
        cleaned
    }
}
