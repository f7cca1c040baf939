use crate::{
    AudioPartDelta, ContentDelta, ImagePartDelta, ModelError, ModelResult, Part, PartDelta,
    ReasoningPartDelta, TextPartDelta, ToolCallPartDelta,
};

/// Assigns the canonical index for an incoming partial.
///
/// Providers disagree on indexing: OpenAI chat indexes only tool calls (in
/// their own array), Google indexes nothing, Anthropic indexes every block.
/// This oracle reconciles an incoming delta against what has already been
/// seen so that accumulation lands each fragment on the right final part.
///
/// `tool_hint` is the provider's tool-call array index, when it sends one;
/// it is positional among tool-call deltas, not among all deltas.
#[must_use]
pub fn infer_delta_index(
    incoming: &PartDelta,
    seen: &[ContentDelta],
    tool_hint: Option<usize>,
) -> usize {
    // `seen` holds every fragment; collapse it to one entry per index,
    // keeping first occurrences so positional matching is stable.
    let mut unique: Vec<&ContentDelta> = Vec::new();
    for delta in seen {
        if !unique.iter().any(|existing| existing.index == delta.index) {
            unique.push(delta);
        }
    }

    if let (PartDelta::ToolCall(_), Some(hint)) = (incoming, tool_hint) {
        // Map the provider's tool-call position onto the canonical stream:
        // provider tool calls [0, 1] may live at canonical indices
        // [1, 3] when text or reasoning precede them.
        let tool_deltas: Vec<&ContentDelta> = unique
            .iter()
            .copied()
            .filter(|delta| matches!(delta.part, PartDelta::ToolCall(_)))
            .collect();
        if let Some(existing) = tool_deltas.get(hint) {
            return existing.index;
        }
        return unique.len();
    }

    // Providers that omit indices emit at most one text stream and one
    // audio stream per response, so same-variant matching is unambiguous
    // for those kinds. Tool calls never match this way: duplicate names
    // are legal, so an unhinted tool call always opens a new part.
    if matches!(incoming, PartDelta::Text(_) | PartDelta::Audio(_)) {
        let matching = unique
            .iter()
            .rev()
            .find(|delta| delta.part.kind() == incoming.kind());
        if let Some(delta) = matching {
            return delta.index;
        }
    }

    unique
        .iter()
        .map(|delta| delta.index)
        .max()
        .map_or(0, |max| max + 1)
}

/// Converts a complete part into a delta, used when a provider streams
/// whole parts (Google chunks, Anthropic block starts) instead of field
/// fragments.
///
/// # Errors
/// Tool-result and source parts have no delta form.
pub fn part_to_delta(part: Part) -> ModelResult<PartDelta> {
    Ok(match part {
        Part::Text(text) => PartDelta::Text(TextPartDelta {
            text: text.text,
            citation: None,
        }),
        Part::Image(image) => PartDelta::Image(ImagePartDelta {
            data: Some(image.data),
            mime_type: Some(image.mime_type),
            width: image.width,
            height: image.height,
            id: image.id,
        }),
        Part::Audio(audio) => PartDelta::Audio(AudioPartDelta {
            data: Some(audio.data),
            format: Some(audio.format),
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            transcript: audio.transcript,
            id: audio.id,
        }),
        Part::Reasoning(reasoning) => PartDelta::Reasoning(ReasoningPartDelta {
            text: Some(reasoning.text),
            summary: None,
            signature: reasoning.signature,
            id: reasoning.id,
        }),
        Part::ToolCall(tool_call) => PartDelta::ToolCall(ToolCallPartDelta {
            tool_call_id: Some(tool_call.tool_call_id),
            tool_name: Some(tool_call.tool_name),
            args: Some(tool_call.args.to_string()),
            id: tool_call.id,
        }),
        other => {
            return Err(ModelError::Invariant(
                "",
                format!("{} part has no delta form", other.kind()),
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_delta(index: usize) -> ContentDelta {
        ContentDelta {
            index,
            part: PartDelta::text("chunk"),
        }
    }

    fn tool_delta(index: usize) -> ContentDelta {
        ContentDelta {
            index,
            part: PartDelta::ToolCall(ToolCallPartDelta::default()),
        }
    }

    fn audio_delta(index: usize) -> ContentDelta {
        ContentDelta {
            index,
            part: PartDelta::Audio(AudioPartDelta::default()),
        }
    }

    #[test]
    fn empty_state_starts_at_zero() {
        assert_eq!(infer_delta_index(&PartDelta::text("hi"), &[], None), 0);
    }

    #[test]
    fn text_joins_the_existing_text_stream() {
        let seen = vec![text_delta(0), text_delta(0), tool_delta(1)];
        assert_eq!(infer_delta_index(&PartDelta::text("more"), &seen, None), 0);
    }

    #[test]
    fn audio_matches_audio_not_text() {
        let seen = vec![text_delta(0), audio_delta(1)];
        let incoming = PartDelta::Audio(AudioPartDelta::default());
        assert_eq!(infer_delta_index(&incoming, &seen, None), 1);
    }

    #[test]
    fn tool_hint_maps_provider_position_to_canonical_index() {
        // provider tool calls [0, 1] interleaved with text at 0 and 2
        let seen = vec![text_delta(0), tool_delta(1), text_delta(2), tool_delta(3)];
        let incoming = PartDelta::ToolCall(ToolCallPartDelta::default());
        assert_eq!(infer_delta_index(&incoming, &seen, Some(0)), 1);
        assert_eq!(infer_delta_index(&incoming, &seen, Some(1)), 3);
        // unseen provider position appends
        assert_eq!(infer_delta_index(&incoming, &seen, Some(2)), 4);
    }

    #[test]
    fn unhinted_tool_call_always_opens_a_new_part() {
        let seen = vec![tool_delta(0)];
        let incoming = PartDelta::ToolCall(ToolCallPartDelta {
            tool_name: Some("same_name".into()),
            ..Default::default()
        });
        assert_eq!(infer_delta_index(&incoming, &seen, None), 1);
    }

    #[test]
    fn index_never_exceeds_unique_len() {
        // indices are dense because the oracle itself assigns them; the
        // bound to hold is index <= unique.len()
        let seen = vec![text_delta(0), tool_delta(1), audio_delta(2)];
        let incoming: [(PartDelta, Option<usize>); 4] = [
            (PartDelta::text("t"), None),
            (PartDelta::Audio(AudioPartDelta::default()), None),
            (PartDelta::ToolCall(ToolCallPartDelta::default()), None),
            (PartDelta::ToolCall(ToolCallPartDelta::default()), Some(7)),
        ];
        for (part, hint) in incoming {
            assert!(infer_delta_index(&part, &seen, hint) <= 3);
        }
    }

    #[test]
    fn tool_result_has_no_delta_form() {
        let part = Part::tool_result("c", "t", vec![]);
        assert!(matches!(
            part_to_delta(part),
            Err(ModelError::Invariant(_, _))
        ));
    }
}
