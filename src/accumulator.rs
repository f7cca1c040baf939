use crate::{
    pcm, AudioFormat, AudioPart, AudioPartDelta, Citation, CitationDelta, ContentDelta, ImagePart,
    ImagePartDelta, ModelError, ModelResponse, ModelResult, ModelUsage, Part, PartDelta,
    PartialModelResponse, ReasoningPart, ReasoningPartDelta, TextPart, TextPartDelta, ToolCallPart,
    ToolCallPartDelta,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct PendingText {
    text: String,
    citations: Vec<Citation>,
}

#[derive(Debug, Clone)]
struct PendingReasoning {
    text: String,
    summary: String,
    signature: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Clone)]
struct PendingToolCall {
    tool_call_id: String,
    tool_name: String,
    args: String,
    id: Option<String>,
}

#[derive(Debug, Clone)]
struct PendingImage {
    data: String,
    mime_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    id: Option<String>,
}

#[derive(Debug, Clone)]
struct PendingAudio {
    /// Chunks stay discrete until finalization; only linear16 merges.
    chunks: Vec<String>,
    format: Option<AudioFormat>,
    sample_rate: Option<u32>,
    channels: Option<u32>,
    transcript: String,
    id: Option<String>,
}

/// An in-progress part, one per canonical index.
#[derive(Debug, Clone)]
enum PendingPart {
    Text(PendingText),
    Reasoning(PendingReasoning),
    ToolCall(PendingToolCall),
    Image(PendingImage),
    Audio(PendingAudio),
}

fn open_pending(part: PartDelta) -> PendingPart {
    match part {
        PartDelta::Text(delta) => {
            let mut pending = PendingText {
                text: String::new(),
                citations: Vec::new(),
            };
            merge_text(&mut pending, delta);
            PendingPart::Text(pending)
        }
        PartDelta::Reasoning(delta) => {
            let mut pending = PendingReasoning {
                text: String::new(),
                summary: String::new(),
                signature: None,
                id: None,
            };
            merge_reasoning(&mut pending, delta);
            PendingPart::Reasoning(pending)
        }
        PartDelta::ToolCall(delta) => {
            let mut pending = PendingToolCall {
                tool_call_id: String::new(),
                tool_name: String::new(),
                args: String::new(),
                id: None,
            };
            merge_tool_call(&mut pending, delta);
            PendingPart::ToolCall(pending)
        }
        PartDelta::Image(delta) => {
            let mut pending = PendingImage {
                data: String::new(),
                mime_type: None,
                width: None,
                height: None,
                id: None,
            };
            merge_image(&mut pending, delta);
            PendingPart::Image(pending)
        }
        PartDelta::Audio(delta) => {
            let mut pending = PendingAudio {
                chunks: Vec::new(),
                format: None,
                sample_rate: None,
                channels: None,
                transcript: String::new(),
                id: None,
            };
            merge_audio(&mut pending, delta);
            PendingPart::Audio(pending)
        }
    }
}

fn merge_text(pending: &mut PendingText, delta: TextPartDelta) {
    pending.text.push_str(&delta.text);
    if let Some(citation) = delta.citation {
        if let Some(citation) = complete_citation(citation) {
            pending.citations.push(citation);
        }
    }
}

// A citation fragment is usable only once its source is known.
fn complete_citation(delta: CitationDelta) -> Option<Citation> {
    let source = delta.source.filter(|source| !source.is_empty())?;
    Some(Citation {
        source,
        cited_text: delta.cited_text,
        start_index: delta.start_index.unwrap_or(0),
        end_index: delta.end_index.unwrap_or(0),
        title: delta.title,
    })
}

fn merge_reasoning(pending: &mut PendingReasoning, delta: ReasoningPartDelta) {
    if let Some(text) = delta.text {
        pending.text.push_str(&text);
    }
    if let Some(summary) = delta.summary {
        pending.summary.push_str(&summary);
    }
    if delta.signature.is_some() {
        pending.signature = delta.signature;
    }
    if delta.id.is_some() {
        pending.id = delta.id;
    }
}

fn merge_tool_call(pending: &mut PendingToolCall, delta: ToolCallPartDelta) {
    if let Some(tool_call_id) = delta.tool_call_id {
        pending.tool_call_id = tool_call_id;
    }
    if let Some(tool_name) = delta.tool_name {
        pending.tool_name.push_str(&tool_name);
    }
    if let Some(args) = delta.args {
        pending.args.push_str(&args);
    }
    if delta.id.is_some() {
        pending.id = delta.id;
    }
}

fn merge_image(pending: &mut PendingImage, delta: ImagePartDelta) {
    if let Some(data) = delta.data {
        pending.data.push_str(&data);
    }
    if delta.mime_type.is_some() {
        pending.mime_type = delta.mime_type;
    }
    if delta.width.is_some() {
        pending.width = delta.width;
    }
    if delta.height.is_some() {
        pending.height = delta.height;
    }
    if delta.id.is_some() {
        pending.id = delta.id;
    }
}

fn merge_audio(pending: &mut PendingAudio, delta: AudioPartDelta) {
    if let Some(data) = delta.data {
        pending.chunks.push(data);
    }
    if delta.format.is_some() {
        pending.format = delta.format;
    }
    if delta.sample_rate.is_some() {
        pending.sample_rate = delta.sample_rate;
    }
    if delta.channels.is_some() {
        pending.channels = delta.channels;
    }
    if let Some(transcript) = delta.transcript {
        pending.transcript.push_str(&transcript);
    }
    if delta.id.is_some() {
        pending.id = delta.id;
    }
}

fn merge_pending(pending: &mut PendingPart, delta: ContentDelta) -> ModelResult<()> {
    match (pending, delta.part) {
        (PendingPart::Text(pending), PartDelta::Text(part)) => merge_text(pending, part),
        (PendingPart::Reasoning(pending), PartDelta::Reasoning(part)) => {
            merge_reasoning(pending, part);
        }
        (PendingPart::ToolCall(pending), PartDelta::ToolCall(part)) => {
            merge_tool_call(pending, part);
        }
        (PendingPart::Image(pending), PartDelta::Image(part)) => merge_image(pending, part),
        (PendingPart::Audio(pending), PartDelta::Audio(part)) => merge_audio(pending, part),
        (_, part) => {
            return Err(ModelError::Invariant(
                "",
                format!(
                    "{} delta arrived at index {} holding a different part type",
                    part.kind(),
                    delta.index
                ),
            ))
        }
    }
    Ok(())
}

fn finalize_text(pending: PendingText) -> Part {
    Part::Text(TextPart {
        text: pending.text,
        citations: if pending.citations.is_empty() {
            None
        } else {
            Some(pending.citations)
        },
    })
}

fn finalize_reasoning(pending: PendingReasoning) -> Part {
    // Summary-only providers never populate text; promote the summary so
    // the caller always finds the thought in one place.
    let text = if pending.text.is_empty() && !pending.summary.is_empty() {
        pending.summary
    } else {
        pending.text
    };
    Part::Reasoning(ReasoningPart {
        text,
        signature: pending.signature,
        id: pending.id,
    })
}

fn finalize_tool_call(pending: PendingToolCall, index: usize) -> ModelResult<Part> {
    if pending.tool_call_id.is_empty() {
        return Err(ModelError::Invariant(
            "",
            format!("tool call at index {index} never received a tool_call_id"),
        ));
    }
    if pending.tool_name.is_empty() {
        return Err(ModelError::Invariant(
            "",
            format!("tool call at index {index} never received a tool_name"),
        ));
    }

    let args = if pending.args.trim().is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(&pending.args).map_err(|e| {
            ModelError::Invariant(
                "",
                format!("tool call arguments are not valid JSON: {}: {e}", pending.args),
            )
        })?
    };

    Ok(Part::ToolCall(ToolCallPart {
        tool_call_id: pending.tool_call_id,
        tool_name: pending.tool_name,
        args,
        id: pending.id,
    }))
}

fn finalize_image(pending: PendingImage, index: usize) -> ModelResult<Part> {
    let mime_type = pending.mime_type.ok_or_else(|| {
        ModelError::Invariant(
            "",
            format!("image at index {index} never received a mime type"),
        )
    })?;
    if pending.data.is_empty() {
        return Err(ModelError::Invariant(
            "",
            format!("image at index {index} never received data"),
        ));
    }

    Ok(Part::Image(ImagePart {
        data: pending.data,
        mime_type,
        width: pending.width,
        height: pending.height,
        id: pending.id,
    }))
}

fn finalize_audio(pending: PendingAudio, index: usize) -> ModelResult<Part> {
    if pending.chunks.is_empty() {
        return Err(ModelError::Invariant(
            "",
            format!("audio at index {index} never received data"),
        ));
    }
    let format = pending.format.ok_or_else(|| {
        ModelError::Invariant(
            "",
            format!("audio at index {index} never received a format"),
        )
    })?;

    let data = if format == AudioFormat::Linear16 {
        let mut samples = Vec::new();
        for chunk in &pending.chunks {
            samples.extend(
                pcm::decode_base64_samples(chunk)
                    .map_err(|e| ModelError::Invariant("", e))?,
            );
        }
        pcm::encode_base64_samples(&samples)
    } else if pending.chunks.len() == 1 {
        pending.chunks.into_iter().next().unwrap_or_default()
    } else {
        return Err(ModelError::Unsupported(
            "",
            format!("cannot concatenate {format:?} audio chunks; only linear16 merges"),
        ));
    };

    Ok(Part::Audio(AudioPart {
        data,
        format,
        sample_rate: pending.sample_rate,
        channels: pending.channels,
        transcript: if pending.transcript.is_empty() {
            None
        } else {
            Some(pending.transcript)
        },
        id: pending.id,
    }))
}

fn finalize_pending(pending: PendingPart, index: usize) -> ModelResult<Part> {
    match pending {
        PendingPart::Text(text) => Ok(finalize_text(text)),
        PendingPart::Reasoning(reasoning) => Ok(finalize_reasoning(reasoning)),
        PendingPart::ToolCall(tool_call) => finalize_tool_call(tool_call, index),
        PendingPart::Image(image) => finalize_image(image, index),
        PendingPart::Audio(audio) => finalize_audio(audio, index),
    }
}

/// Folds an ordered series of partial responses into the final response,
/// mirroring exactly what the non-streaming path would have returned.
pub struct StreamAccumulator {
    pending: BTreeMap<usize, PendingPart>,
    usage: Option<ModelUsage>,
    cost: Option<f64>,
}

impl StreamAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            usage: None,
            cost: None,
        }
    }

    /// Merges one partial response.
    ///
    /// # Errors
    /// Returns `Invariant` when a delta's variant differs from the
    /// in-progress part at its index; state is left untouched in that
    /// case.
    pub fn add_partial(&mut self, partial: &PartialModelResponse) -> ModelResult<()> {
        if let Some(delta) = &partial.delta {
            self.merge_delta(delta.clone())?;
        }
        if let Some(usage) = &partial.usage {
            self.usage
                .get_or_insert_with(ModelUsage::default)
                .add(usage);
        }
        if let Some(cost) = partial.cost {
            *self.cost.get_or_insert(0.0) += cost;
        }
        Ok(())
    }

    /// Finalizes every pending part, in ascending index order.
    ///
    /// # Errors
    /// Returns `Invariant` when a part never received a required field or
    /// its tool arguments fail to parse, and `Unsupported` for
    /// non-mergeable multi-chunk audio.
    pub fn compute_response(self) -> ModelResult<ModelResponse> {
        let content = self
            .pending
            .into_iter()
            .map(|(index, pending)| finalize_pending(pending, index))
            .collect::<ModelResult<Vec<_>>>()?;

        Ok(ModelResponse {
            content,
            usage: self.usage,
            cost: self.cost,
        })
    }

    /// Number of in-progress parts.
    #[must_use]
    pub fn size(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.usage = None;
        self.cost = None;
    }

    fn merge_delta(&mut self, delta: ContentDelta) -> ModelResult<()> {
        if let Some(pending) = self.pending.get_mut(&delta.index) {
            merge_pending(pending, delta)
        } else {
            let index = delta.index;
            self.pending.insert(index, open_pending(delta.part));
            Ok(())
        }
    }
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn partial(index: usize, part: PartDelta) -> PartialModelResponse {
        PartialModelResponse {
            delta: Some(ContentDelta { index, part }),
            ..Default::default()
        }
    }

    fn tool_delta(
        id: Option<&str>,
        name: Option<&str>,
        args: Option<&str>,
    ) -> PartDelta {
        PartDelta::ToolCall(ToolCallPartDelta {
            tool_call_id: id.map(Into::into),
            tool_name: name.map(Into::into),
            args: args.map(Into::into),
            id: None,
        })
    }

    #[test]
    fn text_fragments_concatenate() {
        let mut acc = StreamAccumulator::new();
        for fragment in ["Hel", "lo", "!"] {
            acc.add_partial(&partial(0, PartDelta::text(fragment))).unwrap();
        }
        let response = acc.compute_response().unwrap();
        assert_eq!(response.content, vec![Part::text("Hello!")]);
    }

    #[test]
    fn parallel_tool_calls_resolve_in_provider_order() {
        // text first, then two interleaved tool calls keyed by canonical
        // indices the oracle would have assigned
        let mut acc = StreamAccumulator::new();
        acc.add_partial(&partial(0, PartDelta::text("Let me check.")))
            .unwrap();
        acc.add_partial(&partial(1, tool_delta(Some("c1"), Some("wx"), Some("{\"c\":\""))))
            .unwrap();
        acc.add_partial(&partial(2, tool_delta(Some("c2"), Some("wx"), Some("{\"c\":\""))))
            .unwrap();
        acc.add_partial(&partial(1, tool_delta(None, None, Some("NYC\"}"))))
            .unwrap();
        acc.add_partial(&partial(2, tool_delta(None, None, Some("SF\"}"))))
            .unwrap();

        let response = acc.compute_response().unwrap();
        assert_eq!(
            response.content,
            vec![
                Part::text("Let me check."),
                Part::tool_call("c1", "wx", json!({"c": "NYC"})),
                Part::tool_call("c2", "wx", json!({"c": "SF"})),
            ]
        );
    }

    #[test]
    fn reasoning_merges_text_and_overwrites_signature() {
        let mut acc = StreamAccumulator::new();
        acc.add_partial(&partial(
            0,
            PartDelta::Reasoning(ReasoningPartDelta {
                text: Some("Thinking ".into()),
                id: Some("r1".into()),
                ..Default::default()
            }),
        ))
        .unwrap();
        acc.add_partial(&partial(
            0,
            PartDelta::Reasoning(ReasoningPartDelta {
                text: Some("hard.".into()),
                signature: Some("S".into()),
                ..Default::default()
            }),
        ))
        .unwrap();

        let response = acc.compute_response().unwrap();
        assert_eq!(
            response.content,
            vec![Part::Reasoning(
                ReasoningPart::new("Thinking hard.")
                    .with_signature("S")
                    .with_id("r1")
            )]
        );
    }

    #[test]
    fn summary_promotes_to_text_when_no_text_arrived() {
        let mut acc = StreamAccumulator::new();
        for fragment in ["First ", "pass."] {
            acc.add_partial(&partial(
                0,
                PartDelta::Reasoning(ReasoningPartDelta {
                    summary: Some(fragment.into()),
                    ..Default::default()
                }),
            ))
            .unwrap();
        }
        let response = acc.compute_response().unwrap();
        assert_eq!(response.content, vec![Part::reasoning("First pass.")]);
    }

    #[test]
    fn linear16_chunks_merge_sample_wise() {
        let chunks = [
            pcm::encode_base64_samples(&[1, 2]),
            pcm::encode_base64_samples(&[3]),
            pcm::encode_base64_samples(&[4, 5, 6]),
        ];
        let mut acc = StreamAccumulator::new();
        for chunk in &chunks {
            acc.add_partial(&partial(
                0,
                PartDelta::Audio(AudioPartDelta {
                    data: Some(chunk.clone()),
                    format: Some(AudioFormat::Linear16),
                    ..Default::default()
                }),
            ))
            .unwrap();
        }
        let response = acc.compute_response().unwrap();
        let Part::Audio(audio) = &response.content[0] else {
            panic!("expected audio part");
        };
        assert_eq!(
            pcm::decode_base64_samples(&audio.data).unwrap(),
            vec![1, 2, 3, 4, 5, 6]
        );
    }

    #[test]
    fn multi_chunk_non_linear16_audio_is_unsupported() {
        let mut acc = StreamAccumulator::new();
        for _ in 0..2 {
            acc.add_partial(&partial(
                0,
                PartDelta::Audio(AudioPartDelta {
                    data: Some("AAAA".into()),
                    format: Some(AudioFormat::Mp3),
                    ..Default::default()
                }),
            ))
            .unwrap();
        }
        assert!(matches!(
            acc.compute_response(),
            Err(ModelError::Unsupported(_, _))
        ));
    }

    #[test]
    fn variant_mismatch_fails_without_mutating() {
        let mut acc = StreamAccumulator::new();
        acc.add_partial(&partial(0, PartDelta::text("keep"))).unwrap();
        let error = acc
            .add_partial(&partial(0, tool_delta(Some("c"), Some("t"), None)))
            .unwrap_err();
        assert!(matches!(error, ModelError::Invariant(_, _)));

        let response = acc.compute_response().unwrap();
        assert_eq!(response.content, vec![Part::text("keep")]);
    }

    #[test]
    fn unparsable_tool_args_are_an_invariant_error() {
        let mut acc = StreamAccumulator::new();
        acc.add_partial(&partial(0, tool_delta(Some("c"), Some("t"), Some("{not json"))))
            .unwrap();
        assert!(matches!(
            acc.compute_response(),
            Err(ModelError::Invariant(_, _))
        ));
    }

    #[test]
    fn empty_tool_args_parse_as_empty_object() {
        let mut acc = StreamAccumulator::new();
        acc.add_partial(&partial(0, tool_delta(Some("c"), Some("t"), None)))
            .unwrap();
        let response = acc.compute_response().unwrap();
        assert_eq!(response.content, vec![Part::tool_call("c", "t", json!({}))]);
    }

    #[test]
    fn usage_and_cost_total_across_partials() {
        let mut acc = StreamAccumulator::new();
        acc.add_partial(&PartialModelResponse {
            usage: Some(ModelUsage {
                input_tokens: 7,
                output_tokens: 0,
                ..Default::default()
            }),
            cost: Some(0.001),
            ..Default::default()
        })
        .unwrap();
        acc.add_partial(&PartialModelResponse {
            usage: Some(ModelUsage {
                input_tokens: 0,
                output_tokens: 11,
                ..Default::default()
            }),
            cost: Some(0.002),
            ..Default::default()
        })
        .unwrap();

        let response = acc.compute_response().unwrap();
        let usage = response.usage.unwrap();
        assert_eq!((usage.input_tokens, usage.output_tokens), (7, 11));
        assert!((response.cost.unwrap() - 0.003).abs() < 1e-12);
    }

    #[test]
    fn citation_deltas_fold_into_the_text_part() {
        let mut acc = StreamAccumulator::new();
        acc.add_partial(&partial(0, PartDelta::text("Grounded claim.")))
            .unwrap();
        acc.add_partial(&partial(
            0,
            PartDelta::Text(TextPartDelta {
                text: String::new(),
                citation: Some(CitationDelta {
                    source: Some("doc-1".into()),
                    cited_text: Some("claim".into()),
                    start_index: Some(9),
                    end_index: Some(14),
                    title: None,
                }),
            }),
        ))
        .unwrap();

        let response = acc.compute_response().unwrap();
        let Part::Text(text) = &response.content[0] else {
            panic!("expected text part");
        };
        let citations = text.citations.as_ref().unwrap();
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].source, "doc-1");
        assert_eq!(citations[0].start_index, 9);
    }

    #[test]
    fn clear_resets_everything() {
        let mut acc = StreamAccumulator::new();
        acc.add_partial(&partial(0, PartDelta::text("x"))).unwrap();
        assert_eq!(acc.size(), 1);
        acc.clear();
        assert!(acc.is_empty());
    }
}
