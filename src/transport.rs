//! The wire collaborators: one JSON round-trip and one SSE event stream.
//! SSE framing (blank lines, `:` comments, `data:` payloads) is handled by
//! `eventsource-stream`; this layer adds status surfacing, JSON decoding,
//! and `[DONE]` termination.

use crate::{ModelError, ModelResult};
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::{header::HeaderMap, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::pin::Pin;

/// POSTs a JSON body and decodes the JSON response.
///
/// # Errors
/// Non-2xx responses become `StatusCode` carrying the body text; transport
/// and decode failures become `Transport`.
pub async fn post_json<T: Serialize, R: DeserializeOwned>(
    client: &Client,
    url: &str,
    body: &T,
    headers: HeaderMap,
) -> ModelResult<R> {
    let response = client.post(url).headers(headers).json(body).send().await?;
    let status = response.status();
    if status.is_success() {
        Ok(response.json::<R>().await?)
    } else {
        Err(ModelError::StatusCode(
            status,
            response.text().await.unwrap_or_default(),
        ))
    }
}

/// POSTs a JSON body and returns the response as a typed stream of SSE
/// event payloads. Terminates cleanly on the `[DONE]` sentinel or EOF;
/// empty events are skipped.
///
/// # Errors
/// Non-2xx responses become `StatusCode` before any event is yielded.
/// Inside the stream, malformed frames or payloads yield `Invariant`
/// tagged with `provider` and end the sequence.
pub async fn post_sse<T: Serialize, R: DeserializeOwned + Send + 'static>(
    client: &Client,
    url: &str,
    body: &T,
    headers: HeaderMap,
    provider: &'static str,
) -> ModelResult<Pin<Box<dyn Stream<Item = ModelResult<R>> + Send>>> {
    let response = client.post(url).headers(headers).json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ModelError::StatusCode(
            status,
            response.text().await.unwrap_or_default(),
        ));
    }

    let mut events = response.bytes_stream().eventsource();

    let stream = async_stream::try_stream! {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if event.data.is_empty() {
                        continue;
                    }
                    if event.data == "[DONE]" {
                        break;
                    }
                    let payload: R = serde_json::from_str(&event.data).map_err(|e| {
                        ModelError::Invariant(
                            provider,
                            format!("undecodable stream event: {e}: {}", event.data),
                        )
                    })?;
                    yield payload;
                }
                Err(eventsource_stream::EventStreamError::Transport(e)) => {
                    Err(ModelError::Transport(e))?;
                }
                Err(eventsource_stream::EventStreamError::Utf8(_)) => {
                    Err(ModelError::Invariant(
                        provider,
                        "stream data is not valid UTF-8".to_string(),
                    ))?;
                }
                Err(eventsource_stream::EventStreamError::Parser(e)) => {
                    Err(ModelError::Invariant(
                        provider,
                        format!("malformed event stream: {e}"),
                    ))?;
                }
            }
        }
    };

    Ok(Box::pin(stream))
}

/// Builds a header map from string pairs, defaults first so caller
/// headers override them.
///
/// # Errors
/// `InvalidInput` when a name or value is not a legal HTTP header.
pub fn build_headers<'a, I>(pairs: I) -> ModelResult<HeaderMap>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    use reqwest::header::{HeaderName, HeaderValue};

    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ModelError::InvalidInput(format!("invalid header name {name:?}: {e}")))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            ModelError::InvalidInput(format!("invalid header value for {name:?}: {e}"))
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// Merges the caller's `extra` object on top of a serialized request.
/// Keys in `extra` win.
///
/// # Errors
/// `InvalidInput` when `extra` is neither an object nor null, or when the
/// request did not serialize to an object.
pub fn merge_extra<T: Serialize>(
    request: &T,
    extra: Option<&serde_json::Value>,
    provider: &'static str,
) -> ModelResult<serde_json::Value> {
    let mut payload = serde_json::to_value(request).map_err(|e| {
        ModelError::Invariant(provider, format!("request failed to serialize: {e}"))
    })?;

    if let Some(extra) = extra {
        match extra {
            serde_json::Value::Object(overrides) => {
                let map = payload.as_object_mut().ok_or_else(|| {
                    ModelError::Invariant(
                        provider,
                        "request did not serialize to an object".to_string(),
                    )
                })?;
                for (key, value) in overrides {
                    map.insert(key.clone(), value.clone());
                }
            }
            serde_json::Value::Null => {}
            _ => {
                return Err(ModelError::InvalidInput(
                    "extra must be a JSON object".to_string(),
                ))
            }
        }
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Req {
        model: &'static str,
        stream: bool,
    }

    #[test]
    fn extra_overrides_request_fields() {
        let request = Req {
            model: "m",
            stream: false,
        };
        let merged = merge_extra(
            &request,
            Some(&json!({"stream": true, "service_tier": "flex"})),
            "test",
        )
        .unwrap();
        assert_eq!(merged, json!({"model": "m", "stream": true, "service_tier": "flex"}));
    }

    #[test]
    fn non_object_extra_is_invalid() {
        let request = Req {
            model: "m",
            stream: false,
        };
        assert!(matches!(
            merge_extra(&request, Some(&json!([1, 2])), "test"),
            Err(ModelError::InvalidInput(_))
        ));
    }
}
