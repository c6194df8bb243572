//! Narration production: turns assistant markdown into speech-friendly text.
//!
//! Routing:
//! - `Simple` (short plain text): pass-through, no model call
//! - `Complex` (markdown without code): model summarization
//! - `ComplexWithCode` (markdown with fenced code): model with code-aware prompt
//!
//! The result lands in the [`NarrationCache`] for the dispatcher to pick up.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info};

use parley_core::defaults;
use parley_core::{MessageTransport, OutboundMessage, Result, StatusMessage};

use crate::narration_cache::NarrationCache;

static TRIPLE_BACKTICK: Lazy<Regex> = Lazy::new(|| Regex::new("```").expect("valid regex"));

static MARKDOWN_INDICATORS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(^#{1,6}\s|\*\*|\*|^-\s|^\d+\.\s|^>\s|\[.*\]\(.*\))").expect("valid regex")
});

static FENCED_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```.*?(```|$)").expect("valid regex"));

static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

static LINE_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(#{1,6}\s+|[-*+]\s+|\d+\.\s+|>\s?)").expect("valid regex"));

static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*|__|\*|`").expect("valid regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Narration strategy chosen for a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationCategory {
    /// Short plain text, passed through as-is
    Simple,
    /// Markdown with structure but no code blocks
    Complex,
    /// Markdown containing code blocks
    ComplexWithCode,
}

/// Classify content. Pure code, no model call.
pub fn classify(content: &str) -> NarrationCategory {
    if TRIPLE_BACKTICK.is_match(content) {
        NarrationCategory::ComplexWithCode
    } else if content.chars().count() <= defaults::NARRATION_SIMPLE_MAX_LENGTH
        && !MARKDOWN_INDICATORS.is_match(content)
    {
        NarrationCategory::Simple
    } else {
        NarrationCategory::Complex
    }
}

/// Word budget for a narration of content with `word_count` words.
pub fn target_words(word_count: usize) -> usize {
    match word_count {
        0..=350 => word_count,
        351..=700 => 180,
        701..=1200 => 250,
        _ => 300,
    }
}

/// Input handed to a [`NarrationModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationRequest {
    pub content: String,
    pub category: NarrationCategory,
    pub persona: Option<String>,
    pub word_count: usize,
    pub target_words: usize,
}

impl NarrationRequest {
    pub fn new(content: &str, category: NarrationCategory, persona: Option<&str>) -> Self {
        let word_count = content.split_whitespace().count();
        Self {
            content: content.to_string(),
            category,
            persona: persona.map(String::from),
            word_count,
            target_words: target_words(word_count),
        }
    }
}

/// Backend that renders complex content into narration text.
#[async_trait]
pub trait NarrationModel: Send + Sync {
    async fn narrate(&self, request: &NarrationRequest) -> Result<String>;
}

/// Model-free narration: strips markdown syntax and drops fenced code.
///
/// Used when no language model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextModel;

impl PlainTextModel {
    pub fn render(content: &str) -> String {
        let text = FENCED_CODE.replace_all(content, " ");
        let text = LINK.replace_all(&text, "$1");
        let text = LINE_MARKERS.replace_all(&text, "");
        let text = EMPHASIS.replace_all(&text, "");
        WHITESPACE.replace_all(text.trim(), " ").into_owned()
    }
}

#[async_trait]
impl NarrationModel for PlainTextModel {
    async fn narrate(&self, request: &NarrationRequest) -> Result<String> {
        let rendered = Self::render(&request.content);
        let words: Vec<&str> = rendered.split_whitespace().collect();
        if words.len() > request.target_words && request.target_words > 0 {
            Ok(words[..request.target_words].join(" "))
        } else {
            Ok(rendered)
        }
    }
}

/// Produces narrations and drops them into the cache.
pub struct Narrator {
    model: Arc<dyn NarrationModel>,
    cache: Arc<NarrationCache>,
    transport: Arc<dyn MessageTransport>,
    /// Author id shown on the "Narrating..." indicator.
    assistant_id: String,
    default_persona: String,
}

impl Narrator {
    pub fn new(
        model: Arc<dyn NarrationModel>,
        cache: Arc<NarrationCache>,
        transport: Arc<dyn MessageTransport>,
        assistant_id: impl Into<String>,
    ) -> Self {
        Self {
            model,
            cache,
            transport,
            assistant_id: assistant_id.into(),
            default_persona: defaults::NARRATION_PERSONA.to_string(),
        }
    }

    pub fn with_default_persona(mut self, persona: impl Into<String>) -> Self {
        self.default_persona = persona.into();
        self
    }

    /// Compute narration for `content` without touching the cache.
    pub async fn narrate(&self, content: &str, persona: Option<&str>) -> Result<String> {
        let category = classify(content);
        if category == NarrationCategory::Simple {
            return Ok(content.to_string());
        }
        let persona = persona.unwrap_or(&self.default_persona);
        let request = NarrationRequest::new(content, category, Some(persona));
        debug!(
            ?category,
            word_count = request.word_count,
            target_words = request.target_words,
            "Narrating with model"
        );
        self.model.narrate(&request).await
    }

    /// Narrate `content` and cache the result under `conversation_id`.
    ///
    /// When `notify_user_id` is set, that user sees a "Narrating..." indicator
    /// for the duration, cleared afterwards whatever the outcome. Failures are
    /// logged and leave the cache untouched. Returns whether a narration was cached.
    pub async fn narrate_and_cache(
        &self,
        conversation_id: &str,
        content: &str,
        persona: Option<&str>,
        notify_user_id: Option<&str>,
    ) -> bool {
        let start = Instant::now();
        if let Some(user_id) = notify_user_id {
            self.transport.send_to_user(
                user_id,
                OutboundMessage::Status(StatusMessage::new(
                    self.assistant_id.as_str(),
                    Some(defaults::NARRATION_STATUS.to_string()),
                )),
            );
        }

        let cached = match self.narrate(content, persona).await {
            Ok(narration) => {
                info!(
                    conversation_id,
                    narration_len = narration.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Narration complete"
                );
                self.cache.put(conversation_id, narration);
                true
            }
            Err(e) => {
                error!(conversation_id, error = %e, "Narration failed");
                false
            }
        };

        if let Some(user_id) = notify_user_id {
            self.transport.send_to_user(
                user_id,
                OutboundMessage::Status(StatusMessage::clear(self.assistant_id.as_str())),
            );
        }
        cached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_simple() {
        assert_eq!(classify("Sure, happy to help!"), NarrationCategory::Simple);
    }

    #[test]
    fn test_classify_long_plain_text_is_complex() {
        let long = "word ".repeat(100);
        assert_eq!(classify(&long), NarrationCategory::Complex);
    }

    #[test]
    fn test_classify_markdown_is_complex() {
        assert_eq!(classify("# Heading\nBody"), NarrationCategory::Complex);
        assert_eq!(classify("Some **bold** text"), NarrationCategory::Complex);
        assert_eq!(classify("- item one\n- item two"), NarrationCategory::Complex);
        assert_eq!(classify("1. first\n2. second"), NarrationCategory::Complex);
        assert_eq!(classify("> quoted"), NarrationCategory::Complex);
        assert_eq!(
            classify("See [docs](https://example.com)"),
            NarrationCategory::Complex
        );
    }

    #[test]
    fn test_classify_code() {
        assert_eq!(
            classify("Try this:\n```rust\nfn main() {}\n```"),
            NarrationCategory::ComplexWithCode
        );
    }

    #[test]
    fn test_target_words() {
        assert_eq!(target_words(10), 10);
        assert_eq!(target_words(350), 350);
        assert_eq!(target_words(351), 180);
        assert_eq!(target_words(700), 180);
        assert_eq!(target_words(1200), 250);
        assert_eq!(target_words(5000), 300);
    }

    #[test]
    fn test_request_counts_words() {
        let req = NarrationRequest::new("one two  three", NarrationCategory::Complex, None);
        assert_eq!(req.word_count, 3);
        assert_eq!(req.target_words, 3);
        assert!(req.persona.is_none());
    }

    #[test]
    fn test_plain_text_render_strips_markdown() {
        let md = "# Title\n\nSome **bold** and *italic* text.\n\n- item\n\nSee [the docs](http://x).";
        assert_eq!(
            PlainTextModel::render(md),
            "Title Some bold and italic text. item See the docs."
        );
    }

    #[test]
    fn test_plain_text_render_drops_code() {
        let md = "Run this:\n```sh\ncargo build\n```\nThen done.";
        assert_eq!(PlainTextModel::render(md), "Run this: Then done.");
    }

    #[tokio::test]
    async fn test_plain_text_model_truncates_to_target() {
        let mut req = NarrationRequest::new("a b c d e", NarrationCategory::Complex, None);
        req.target_words = 2;
        assert_eq!(PlainTextModel.narrate(&req).await.unwrap(), "a b");
    }

    use std::sync::Mutex;

    use parley_core::Error;

    #[derive(Default)]
    struct RecordingTransport {
        statuses: Mutex<Vec<Option<String>>>,
    }

    impl MessageTransport for RecordingTransport {
        fn send_to_user(&self, _user_id: &str, payload: OutboundMessage) {
            if let OutboundMessage::Status(s) = payload {
                self.statuses.lock().unwrap().push(s.status);
            }
        }
    }

    /// Model that fails every call and remembers the persona it was asked for.
    #[derive(Default)]
    struct FailingModel {
        personas: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl NarrationModel for FailingModel {
        async fn narrate(&self, request: &NarrationRequest) -> Result<String> {
            self.personas.lock().unwrap().push(request.persona.clone());
            Err(Error::Narration("model unavailable".to_string()))
        }
    }

    const COMPLEX: &str = "## Steps\n\n- **one**\n- two";

    #[tokio::test]
    async fn test_narrate_and_cache_failure_leaves_cache_and_clears_status() {
        let model = Arc::new(FailingModel::default());
        let cache = Arc::new(NarrationCache::new());
        let transport = Arc::new(RecordingTransport::default());
        let narrator = Narrator::new(model.clone(), cache.clone(), transport.clone(), "bot")
            .with_default_persona("concise");

        let cached = narrator
            .narrate_and_cache("conv-1", COMPLEX, None, Some("alice"))
            .await;

        assert!(!cached);
        assert!(cache.peek("conv-1").is_none());
        assert_eq!(
            *transport.statuses.lock().unwrap(),
            vec![Some("Narrating...".to_string()), None]
        );
        assert_eq!(
            *model.personas.lock().unwrap(),
            vec![Some("concise".to_string())]
        );
    }

    #[tokio::test]
    async fn test_narrate_and_cache_failure_keeps_earlier_entry() {
        let cache = Arc::new(NarrationCache::new());
        cache.put("conv-1", "earlier narration");
        let narrator = Narrator::new(
            Arc::new(FailingModel::default()),
            cache.clone(),
            Arc::new(RecordingTransport::default()),
            "bot",
        );

        assert!(!narrator.narrate_and_cache("conv-1", COMPLEX, None, None).await);
        assert_eq!(cache.peek("conv-1").as_deref(), Some("earlier narration"));
    }

    #[tokio::test]
    async fn test_narrate_error_propagates_to_caller() {
        let narrator = Narrator::new(
            Arc::new(FailingModel::default()),
            Arc::new(NarrationCache::new()),
            Arc::new(RecordingTransport::default()),
            "bot",
        );

        match narrator.narrate(COMPLEX, Some("formal")).await {
            Err(Error::Narration(msg)) => assert_eq!(msg, "model unavailable"),
            other => panic!("expected narration error, got {other:?}"),
        }
        // Simple content never reaches the model
        assert_eq!(narrator.narrate("Okay!", None).await.unwrap(), "Okay!");
    }
}
