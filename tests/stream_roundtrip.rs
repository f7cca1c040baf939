//! Streamed partials, folded through the accumulator, must reproduce the
//! response shape the non-streaming path returns.

use futures::StreamExt;
use parlance::{
    pcm, testing::MockLanguageModel, AudioFormat, AudioPartDelta, ContentDelta, LanguageModel,
    LanguageModelInput, Message, ModelResponse, ModelUsage, Part, PartDelta, PartialModelResponse,
    ReasoningPartDelta, StreamAccumulator, ToolCallPartDelta,
};
use serde_json::json;

fn delta(index: usize, part: PartDelta) -> PartialModelResponse {
    PartialModelResponse {
        delta: Some(ContentDelta { index, part }),
        ..Default::default()
    }
}

fn tool_fragment(id: Option<&str>, name: Option<&str>, args: &str) -> PartDelta {
    PartDelta::ToolCall(ToolCallPartDelta {
        tool_call_id: id.map(Into::into),
        tool_name: name.map(Into::into),
        args: Some(args.into()),
        id: None,
    })
}

async fn accumulate(mock: &MockLanguageModel, input: LanguageModelInput) -> ModelResponse {
    let mut stream = mock.stream(input).await.unwrap();
    let mut acc = StreamAccumulator::new();
    while let Some(partial) = stream.next().await {
        acc.add_partial(&partial.unwrap()).unwrap();
    }
    acc.compute_response().unwrap()
}

fn input() -> LanguageModelInput {
    LanguageModelInput {
        messages: vec![Message::user(["Hi"])],
        ..Default::default()
    }
}

#[tokio::test]
async fn text_stream_matches_generate_shape() {
    let mock = MockLanguageModel::new();
    let generated = ModelResponse {
        content: vec![Part::text("Hello!")],
        usage: Some(ModelUsage {
            input_tokens: 3,
            output_tokens: 2,
            ..Default::default()
        }),
        cost: None,
    };
    mock.script_generate(generated.clone());
    mock.script_stream(vec![
        delta(0, PartDelta::text("Hel")),
        delta(0, PartDelta::text("lo")),
        delta(0, PartDelta::text("!")),
        PartialModelResponse {
            usage: Some(ModelUsage {
                input_tokens: 3,
                output_tokens: 2,
                ..Default::default()
            }),
            ..Default::default()
        },
    ]);

    let from_generate = mock.generate(input()).await.unwrap();
    let from_stream = accumulate(&mock, input()).await;
    assert_eq!(from_generate, from_stream);
}

#[tokio::test]
async fn parallel_tool_calls_keep_provider_order() {
    let mock = MockLanguageModel::new();
    mock.script_stream(vec![
        delta(0, PartDelta::text("Let me check.")),
        delta(1, tool_fragment(Some("c1"), Some("wx"), "{\"c\":\"")),
        delta(2, tool_fragment(Some("c2"), Some("wx"), "{\"c\":\"")),
        delta(1, tool_fragment(None, None, "NYC\"}")),
        delta(2, tool_fragment(None, None, "SF\"}")),
    ]);

    let response = accumulate(&mock, input()).await;
    assert_eq!(
        response.content,
        vec![
            Part::text("Let me check."),
            Part::tool_call("c1", "wx", json!({"c": "NYC"})),
            Part::tool_call("c2", "wx", json!({"c": "SF"})),
        ]
    );
}

#[tokio::test]
async fn reasoning_stream_retains_id_and_signature() {
    let mock = MockLanguageModel::new();
    mock.script_stream(vec![
        delta(
            0,
            PartDelta::Reasoning(ReasoningPartDelta {
                id: Some("r1".into()),
                signature: Some("S".into()),
                ..Default::default()
            }),
        ),
        delta(
            0,
            PartDelta::Reasoning(ReasoningPartDelta {
                text: Some("Thinking ".into()),
                ..Default::default()
            }),
        ),
        delta(
            0,
            PartDelta::Reasoning(ReasoningPartDelta {
                text: Some("hard.".into()),
                ..Default::default()
            }),
        ),
    ]);

    let response = accumulate(&mock, input()).await;
    let Part::Reasoning(reasoning) = &response.content[0] else {
        panic!("expected reasoning part");
    };
    assert_eq!(reasoning.text, "Thinking hard.");
    assert_eq!(reasoning.id.as_deref(), Some("r1"));
    assert_eq!(reasoning.signature.as_deref(), Some("S"));
}

#[tokio::test]
async fn linear16_audio_chunks_merge_to_one_buffer() {
    let chunks = [
        pcm::encode_base64_samples(&[1, 2]),
        pcm::encode_base64_samples(&[3]),
        pcm::encode_base64_samples(&[4, 5, 6]),
    ];
    let mock = MockLanguageModel::new();
    mock.script_stream(
        chunks
            .iter()
            .map(|chunk| {
                delta(
                    0,
                    PartDelta::Audio(AudioPartDelta {
                        data: Some(chunk.clone()),
                        format: Some(AudioFormat::Linear16),
                        ..Default::default()
                    }),
                )
            })
            .collect::<Vec<_>>(),
    );

    let response = accumulate(&mock, input()).await;
    let Part::Audio(audio) = &response.content[0] else {
        panic!("expected audio part");
    };
    let samples = pcm::decode_base64_samples(&audio.data).unwrap();
    assert_eq!(samples, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(samples.len() * 2, 12);
}

#[tokio::test]
async fn usage_and_cost_increments_total() {
    let mock = MockLanguageModel::new();
    mock.script_stream(vec![
        PartialModelResponse {
            usage: Some(ModelUsage {
                input_tokens: 10,
                output_tokens: 0,
                ..Default::default()
            }),
            cost: Some(0.01),
            ..Default::default()
        },
        delta(0, PartDelta::text("ok")),
        PartialModelResponse {
            usage: Some(ModelUsage {
                input_tokens: 0,
                output_tokens: 4,
                ..Default::default()
            }),
            cost: Some(0.002),
            ..Default::default()
        },
    ]);

    let response = accumulate(&mock, input()).await;
    let usage = response.usage.unwrap();
    assert_eq!((usage.input_tokens, usage.output_tokens), (10, 4));
    assert!((response.cost.unwrap() - 0.012).abs() < 1e-12);
}
