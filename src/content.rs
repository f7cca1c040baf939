use crate::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A part of the message that contains text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
    /// Citations referencing the sources this text is grounded on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

/// A part of the message that contains an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePart {
    /// Base64-encoded image bytes.
    pub data: String,
    /// IANA media type of the image (e.g. `image/png`).
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Loosely describes an audio encoding. Some values (e.g. `wav`) denote
/// containers, others (e.g. `linear16`) a raw encoding; a container value
/// says nothing about the encoding inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Linear16,
    Flac,
    Mulaw,
    Alaw,
    Mp3,
    Opus,
    Aac,
}

impl AudioFormat {
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Linear16 => "audio/l16",
            Self::Flac => "audio/flac",
            Self::Mulaw | Self::Alaw => "audio/basic",
            Self::Mp3 => "audio/mp3",
            Self::Opus => "audio/opus",
            Self::Aac => "audio/aac",
        }
    }

    /// Maps a MIME type back to an audio format, ignoring any parameters
    /// after `;`. `audio/basic` resolves to mulaw.
    ///
    /// # Errors
    /// Returns `Invariant` for MIME types that name no known format.
    pub fn from_mime_type(mime_type: &str) -> ModelResult<Self> {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or(mime_type)
            .trim()
            .to_lowercase();
        match essence.as_str() {
            "audio/wav" => Ok(Self::Wav),
            "audio/l16" => Ok(Self::Linear16),
            "audio/flac" => Ok(Self::Flac),
            "audio/basic" => Ok(Self::Mulaw),
            "audio/mp3" | "audio/mpeg" => Ok(Self::Mp3),
            "audio/opus" => Ok(Self::Opus),
            "audio/aac" => Ok(Self::Aac),
            _ => Err(ModelError::Invariant(
                "",
                format!("unrecognized audio mime type: {mime_type}"),
            )),
        }
    }
}

/// A part of the message that contains audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPart {
    /// Base64-encoded audio bytes.
    pub data: String,
    pub format: AudioFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Vendor "thinking" content. Opaque outside the origin provider; the
/// signature, when present, round-trips vendor state back in later turns.
/// Empty text with a non-empty signature is the redacted form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningPart {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A call to a tool the model wants to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Always a JSON object; may be empty.
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// The result of a tool call, reported back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPart {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Text, source, or image parts only.
    pub content: Vec<Part>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

/// A citation-grounding container whose inner content is surfaced as
/// evidence for the assistant's text. Must not nest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePart {
    /// URI or identifier of the source document.
    pub source: String,
    pub title: String,
    /// Text or image parts only.
    pub content: Vec<Part>,
}

/// A reference into a source part attached to a text part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cited_text: Option<String>,
    pub start_index: usize,
    pub end_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Citation {
    /// # Errors
    /// Returns `InvalidInput` when `end_index` precedes `start_index`.
    pub fn new(
        source: impl Into<String>,
        start_index: usize,
        end_index: usize,
    ) -> ModelResult<Self> {
        if end_index < start_index {
            return Err(ModelError::InvalidInput(format!(
                "citation end index {end_index} precedes start index {start_index}"
            )));
        }
        Ok(Self {
            source: source.into(),
            cited_text: None,
            start_index,
            end_index,
            title: None,
        })
    }

    #[must_use]
    pub fn with_cited_text(mut self, cited_text: impl Into<String>) -> Self {
        self.cited_text = Some(cited_text.into());
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// One element of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Part {
    #[serde(rename = "text")]
    Text(TextPart),
    #[serde(rename = "image")]
    Image(ImagePart),
    #[serde(rename = "audio")]
    Audio(AudioPart),
    #[serde(rename = "reasoning")]
    Reasoning(ReasoningPart),
    #[serde(rename = "tool-call")]
    ToolCall(ToolCallPart),
    #[serde(rename = "tool-result")]
    ToolResult(ToolResultPart),
    #[serde(rename = "source")]
    Source(SourcePart),
}

/// Discriminant of a [`Part`], used in diagnostics and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    Text,
    Image,
    Audio,
    Reasoning,
    ToolCall,
    ToolResult,
    Source,
}

impl PartKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Reasoning => "reasoning",
            Self::ToolCall => "tool-call",
            Self::ToolResult => "tool-result",
            Self::Source => "source",
        }
    }
}

impl std::fmt::Display for PartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Part {
    #[must_use]
    pub fn kind(&self) -> PartKind {
        match self {
            Self::Text(_) => PartKind::Text,
            Self::Image(_) => PartKind::Image,
            Self::Audio(_) => PartKind::Audio,
            Self::Reasoning(_) => PartKind::Reasoning,
            Self::ToolCall(_) => PartKind::ToolCall,
            Self::ToolResult(_) => PartKind::ToolResult,
            Self::Source(_) => PartKind::Source,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextPart::new(text))
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Image(ImagePart::new(data, mime_type))
    }

    pub fn audio(data: impl Into<String>, format: AudioFormat) -> Self {
        Self::Audio(AudioPart::new(data, format))
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning(ReasoningPart::new(text))
    }

    pub fn tool_call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: Value,
    ) -> Self {
        Self::ToolCall(ToolCallPart::new(tool_call_id, tool_name, args))
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: Vec<Self>,
    ) -> Self {
        Self::ToolResult(ToolResultPart::new(tool_call_id, tool_name, content))
    }

    pub fn source(
        source: impl Into<String>,
        title: impl Into<String>,
        content: Vec<Self>,
    ) -> Self {
        Self::Source(SourcePart::new(source, title, content))
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&TextPart> {
        match self {
            Self::Text(part) => Some(part),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_tool_call(&self) -> Option<&ToolCallPart> {
        match self {
            Self::ToolCall(part) => Some(part),
            _ => None,
        }
    }
}

impl TextPart {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: None,
        }
    }

    #[must_use]
    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = Some(citations);
        self
    }
}

impl ImagePart {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
            width: None,
            height: None,
            id: None,
        }
    }

    #[must_use]
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl AudioPart {
    pub fn new(data: impl Into<String>, format: AudioFormat) -> Self {
        Self {
            data: data.into(),
            format,
            sample_rate: None,
            channels: None,
            transcript: None,
            id: None,
        }
    }

    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    #[must_use]
    pub fn with_channels(mut self, channels: u32) -> Self {
        self.channels = Some(channels);
        self
    }

    #[must_use]
    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl ReasoningPart {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            signature: None,
            id: None,
        }
    }

    /// The redacted form: no readable text, only opaque vendor state.
    pub fn redacted(signature: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            signature: Some(signature.into()),
            id: None,
        }
    }

    #[must_use]
    pub fn is_redacted(&self) -> bool {
        self.text.is_empty() && self.signature.as_ref().is_some_and(|s| !s.is_empty())
    }

    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl ToolCallPart {
    pub fn new(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
            id: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl ToolResultPart {
    pub fn new(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: Vec<Part>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content,
            is_error: false,
        }
    }

    #[must_use]
    pub fn with_is_error(mut self, is_error: bool) -> Self {
        self.is_error = is_error;
        self
    }
}

impl SourcePart {
    pub fn new(source: impl Into<String>, title: impl Into<String>, content: Vec<Part>) -> Self {
        Self {
            source: source.into(),
            title: title.into(),
            content,
        }
    }
}

impl From<TextPart> for Part {
    fn from(value: TextPart) -> Self {
        Self::Text(value)
    }
}

impl From<ImagePart> for Part {
    fn from(value: ImagePart) -> Self {
        Self::Image(value)
    }
}

impl From<AudioPart> for Part {
    fn from(value: AudioPart) -> Self {
        Self::Audio(value)
    }
}

impl From<ReasoningPart> for Part {
    fn from(value: ReasoningPart) -> Self {
        Self::Reasoning(value)
    }
}

impl From<ToolCallPart> for Part {
    fn from(value: ToolCallPart) -> Self {
        Self::ToolCall(value)
    }
}

impl From<ToolResultPart> for Part {
    fn from(value: ToolResultPart) -> Self {
        Self::ToolResult(value)
    }
}

impl From<SourcePart> for Part {
    fn from(value: SourcePart) -> Self {
        Self::Source(value)
    }
}

impl From<&str> for Part {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for Part {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

/// A message in the conversation history. System directives are carried
/// out-of-band on the input, not as a message role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    Tool(ToolMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<Part>,
}

/// Carries tool results back into the history. All parts must be
/// tool-result parts; adapters reject anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    pub content: Vec<Part>,
}

impl Message {
    pub fn user<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Part>,
    {
        Self::User(UserMessage {
            content: parts.into_iter().map(Into::into).collect(),
        })
    }

    pub fn assistant<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Part>,
    {
        Self::Assistant(AssistantMessage {
            content: parts.into_iter().map(Into::into).collect(),
        })
    }

    pub fn tool<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Part>,
    {
        Self::Tool(ToolMessage {
            content: parts.into_iter().map(Into::into).collect(),
        })
    }

    #[must_use]
    pub fn content(&self) -> &[Part] {
        match self {
            Self::User(message) => &message.content,
            Self::Assistant(message) => &message.content,
            Self::Tool(message) => &message.content,
        }
    }
}

impl From<UserMessage> for Message {
    fn from(value: UserMessage) -> Self {
        Self::User(value)
    }
}

impl From<AssistantMessage> for Message {
    fn from(value: AssistantMessage) -> Self {
        Self::Assistant(value)
    }
}

impl From<ToolMessage> for Message {
    fn from(value: ToolMessage) -> Self {
        Self::Tool(value)
    }
}

/// A delta update for a text part.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextPartDelta {
    /// Append fragment.
    #[serde(default)]
    pub text: String,
    /// A citation attached to the text stream, surfaced by providers that
    /// emit citation events interleaved with text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation: Option<CitationDelta>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CitationDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cited_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A delta update for an image part.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImagePartDelta {
    /// Base64 append fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A delta update for an audio part. Audio fragments are kept as discrete
/// chunks until finalization; only linear16 may be concatenated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioPartDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<AudioFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A delta update for a reasoning part. `text` and `summary` are append
/// fragments; `signature` and `id` overwrite.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReasoningPartDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Summary fragment from providers that stream only reasoning
    /// summaries; promoted to text at finalization when no text arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A delta update for a tool call. `tool_name` and `args` are append
/// fragments; args fragments are not valid JSON on their own and are
/// parsed only at finalization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolCallPartDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A partial [`Part`]. Mirrors the part variants with every field optional
/// and text-like fields treated as append fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PartDelta {
    #[serde(rename = "text")]
    Text(TextPartDelta),
    #[serde(rename = "image")]
    Image(ImagePartDelta),
    #[serde(rename = "audio")]
    Audio(AudioPartDelta),
    #[serde(rename = "reasoning")]
    Reasoning(ReasoningPartDelta),
    #[serde(rename = "tool-call")]
    ToolCall(ToolCallPartDelta),
}

impl PartDelta {
    #[must_use]
    pub fn kind(&self) -> PartKind {
        match self {
            Self::Text(_) => PartKind::Text,
            Self::Image(_) => PartKind::Image,
            Self::Audio(_) => PartKind::Audio,
            Self::Reasoning(_) => PartKind::Reasoning,
            Self::ToolCall(_) => PartKind::ToolCall,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextPartDelta {
            text: text.into(),
            citation: None,
        })
    }
}

/// A delta update in a message's content. `index` identifies which final
/// part this fragment folds into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDelta {
    pub index: usize,
    pub part: PartDelta,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn part_json_form_is_lossless() {
        let parts = vec![
            Part::text("hello"),
            Part::Text(TextPart::new("cited").with_citations(vec![Citation::new("doc-1", 0, 5)
                .unwrap()
                .with_cited_text("cited")
                .with_title("Doc")])),
            Part::Image(ImagePart::new("aGk=", "image/png").with_dimensions(2, 2)),
            Part::Audio(
                AudioPart::new("AAA=", AudioFormat::Linear16)
                    .with_sample_rate(24_000)
                    .with_channels(1)
                    .with_transcript("hi"),
            ),
            Part::Reasoning(ReasoningPart::new("because").with_signature("sig")),
            Part::Reasoning(ReasoningPart::redacted("opaque")),
            Part::tool_call("call_1", "lookup", json!({"q": "rust"})),
            Part::tool_result("call_1", "lookup", vec![Part::text("ok")]),
            Part::source("https://example.com", "Example", vec![Part::text("body")]),
        ];

        for part in parts {
            let encoded = serde_json::to_value(&part).unwrap();
            let decoded: Part = serde_json::from_value(encoded).unwrap();
            assert_eq!(decoded, part);
        }
    }

    #[test]
    fn citation_rejects_inverted_range() {
        let error = Citation::new("doc", 4, 1).unwrap_err();
        assert!(matches!(error, ModelError::InvalidInput(_)));
    }

    #[test]
    fn redacted_reasoning_requires_signature() {
        assert!(ReasoningPart::redacted("sig").is_redacted());
        assert!(!ReasoningPart::new("visible").is_redacted());
        assert!(!ReasoningPart::new("").is_redacted());
    }

    #[test]
    fn part_kind_matches_wire_tag() {
        let part = Part::tool_call("c", "t", json!({}));
        assert_eq!(part.kind(), PartKind::ToolCall);
        let tag = serde_json::to_value(&part).unwrap()["type"].clone();
        assert_eq!(tag, json!(part.kind().as_str()));
    }
}
