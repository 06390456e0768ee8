use serde::{Deserialize, Deserializer, Serialize};

/// Marks a line that carries a JSON payload. Anything else is keep-alive noise.
pub const DATA_PREFIX: &str = "data:";

/// Retrieved document chunk cited by an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagSource {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_source_filename")]
    pub filename: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub chunk_index: u64,
    #[serde(default)]
    pub document_id: String,
}

/// Terminal success payload; the only place the canonical conversation id appears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub conversation_id: String,
    pub model: String,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub model_tier: Option<u32>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub rag_sources: Vec<RagSource>,
}

/// One decoded payload line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Token {
        content: String,
    },
    Status {
        content: String,
    },
    /// Context size figure; attribution is deferred until the canonical id is known.
    ContextDebug {
        tokens: u64,
    },
    Done(Completion),
    Error {
        content: String,
    },
    /// A `done` line whose fields could not be read. Never produced by the server
    /// directly; it lets the session fail instead of silently dropping the terminal event.
    #[serde(skip)]
    MalformedCompletion {
        details: String,
    },
}

impl StreamEvent {
    /// Returns true for events that end the session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done(_) | Self::Error { .. } | Self::MalformedCompletion { .. }
        )
    }
}

/// Decodes one complete line.
///
/// Returns `None` for non-payload lines and for payloads that fail to parse; a bad
/// line never aborts the stream. The one exception is a recognisable `done` payload
/// with invalid fields, which decodes to [`StreamEvent::MalformedCompletion`].
pub fn decode_line(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload).trim_end();
    if payload.is_empty() {
        return None;
    }

    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(error) => {
            tracing::debug!(error = %error, payload_len = payload.len(), "dropping unparseable payload line");
            return None;
        }
    };

    let event_type = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);

    match serde_json::from_value::<StreamEvent>(value) {
        Ok(event) => Some(event),
        Err(error) if event_type.as_deref() == Some("done") => {
            tracing::warn!(error = %error, "completion payload is malformed");
            Some(StreamEvent::MalformedCompletion {
                details: error.to_string(),
            })
        }
        Err(error) => {
            tracing::debug!(
                event_type = event_type.as_deref().unwrap_or("<missing>"),
                error = %error,
                "dropping unrecognised payload line"
            );
            None
        }
    }
}

fn default_source_filename() -> String {
    "unknown".to_string()
}

/// Reads an absent or `null` list as empty; the service sends both.
pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_variant() {
        assert_eq!(
            decode_line(r#"data: {"type":"token","content":"Hi"}"#),
            Some(StreamEvent::Token {
                content: "Hi".to_string()
            })
        );
        assert_eq!(
            decode_line(r#"data: {"type":"status","content":"summarizing context"}"#),
            Some(StreamEvent::Status {
                content: "summarizing context".to_string()
            })
        );
        assert_eq!(
            decode_line(r#"data:{"type":"context_debug","tokens":1834}"#),
            Some(StreamEvent::ContextDebug { tokens: 1834 })
        );
        assert_eq!(
            decode_line(r#"data: {"type":"error","content":"Model unavailable"}"#),
            Some(StreamEvent::Error {
                content: "Model unavailable".to_string()
            })
        );
    }

    #[test]
    fn decodes_completion_with_optional_fields() {
        let event = decode_line(
            r#"data: {"type":"done","conversation_id":"conv_42","model":"m1","latency_ms":812,"model_tier":1,"rag_sources":[{"text":"chunk","score":0.71}]}"#,
        );

        let Some(StreamEvent::Done(completion)) = event else {
            panic!("expected completion, got {event:?}");
        };
        assert_eq!(completion.conversation_id, "conv_42");
        assert_eq!(completion.model, "m1");
        assert_eq!(completion.latency_ms, 812);
        assert_eq!(completion.model_tier, Some(1));
        assert_eq!(completion.rag_sources.len(), 1);
        assert_eq!(completion.rag_sources[0].filename, "unknown");
        assert_eq!(completion.rag_sources[0].chunk_index, 0);
    }

    #[test]
    fn null_citations_read_as_empty() {
        let event = decode_line(
            r#"data: {"type":"done","conversation_id":"conv_42","model":"m1","rag_sources":null}"#,
        );

        let Some(StreamEvent::Done(completion)) = event else {
            panic!("expected completion, got {event:?}");
        };
        assert!(completion.rag_sources.is_empty());
    }

    #[test]
    fn ignores_noise_and_bad_payloads() {
        assert_eq!(decode_line(""), None);
        assert_eq!(decode_line(": keep-alive"), None);
        assert_eq!(decode_line("event: message"), None);
        assert_eq!(decode_line("data: "), None);
        assert_eq!(decode_line("data: {not json"), None);
        assert_eq!(decode_line(r#"data: {"type":"unknown","x":1}"#), None);
        assert_eq!(decode_line(r#"data: {"type":"token"}"#), None);
    }

    #[test]
    fn malformed_completion_is_surfaced() {
        let event = decode_line(r#"data: {"type":"done","model":"m1"}"#);
        assert!(matches!(
            event,
            Some(StreamEvent::MalformedCompletion { .. })
        ));
        assert!(event.is_some_and(|event| event.is_terminal()));
    }
}
