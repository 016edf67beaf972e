use serde::Deserialize;
use serde_json::Value;

use crate::{AgentRunResult, AgentStreamEvent, NexusAgentError, StepRecord, StepStatus};

#[derive(Debug, Default, Deserialize)]
struct WireStepFields {
    #[serde(default)]
    node: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    status: Option<StepStatus>,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct WireStreamEvent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(flatten)]
    flat: WireStepFields,
    #[serde(default)]
    step: Option<WireStepFields>,
    #[serde(default)]
    result: Option<AgentRunResult>,
    #[serde(default)]
    message: Option<String>,
}

/// Decodes one SSE payload into a normalized event.
///
/// Producers that nest step fields under `step` and producers that send them
/// flat both yield the same [`StepRecord`]. Unknown event types decode to
/// `None`.
pub fn decode_stream_event(raw: &str) -> Result<Option<AgentStreamEvent>, NexusAgentError> {
    let wire: WireStreamEvent = serde_json::from_str(raw)
        .map_err(|error| NexusAgentError::InvalidStreamPayload(error.to_string()))?;
    let kind = wire
        .kind
        .as_deref()
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let event = match kind.as_str() {
        "step" => AgentStreamEvent::Step(normalize_step(wire.flat, wire.step)),
        "heartbeat" => AgentStreamEvent::Heartbeat,
        "complete" => AgentStreamEvent::Complete {
            result: wire.result,
        },
        "error" => AgentStreamEvent::Error {
            message: wire
                .message
                .map(|message| message.trim().to_string())
                .filter(|message| !message.is_empty()),
        },
        other => {
            tracing::debug!(event_type = other, "ignoring unknown agent stream event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

pub(crate) fn normalize_step_value(value: Value) -> Option<StepRecord> {
    let wire: WireStreamEvent = serde_json::from_value(value).ok()?;
    match wire.kind.as_deref() {
        None | Some("step") => Some(normalize_step(wire.flat, wire.step)),
        Some(_) => None,
    }
}

fn normalize_step(flat: WireStepFields, nested: Option<WireStepFields>) -> StepRecord {
    let nested = nested.unwrap_or_default();
    StepRecord {
        node: nested.node.or(flat.node).unwrap_or_default(),
        label: nested.label.or(flat.label).unwrap_or_default(),
        status: nested.status.or(flat.status).unwrap_or_default(),
        payload: nested.payload.or(flat.payload),
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_stream_event, normalize_step_value};
    use crate::{AgentStreamEvent, StepRecord, StepStatus};
    use serde_json::json;

    #[test]
    fn unit_flat_and_nested_steps_normalize_identically() {
        let flat = decode_stream_event(
            r#"{"type":"step","node":"quote","label":"Fetching quote","status":"success"}"#,
        )
        .expect("flat decodes");
        let nested = decode_stream_event(
            r#"{"type":"step","step":{"node":"quote","label":"Fetching quote","status":"success"}}"#,
        )
        .expect("nested decodes");

        let expected = Some(AgentStreamEvent::Step(StepRecord::new(
            "quote",
            "Fetching quote",
            StepStatus::Success,
        )));
        assert_eq!(flat, expected);
        assert_eq!(nested, expected);
    }

    #[test]
    fn functional_complete_event_carries_result() {
        let event = decode_stream_event(
            r#"{"type":"complete","result":{"runId":"r1","steps":[],"rejection":{"reason":"Too much","policyField":"dailyLimit"}}}"#,
        )
        .expect("decodes")
        .expect("known event");
        let AgentStreamEvent::Complete { result: Some(result) } = event else {
            panic!("expected complete with result");
        };
        let rejection = result.rejection.expect("rejection");
        assert_eq!(rejection.reason, "Too much");
        assert_eq!(rejection.policy_field, "dailyLimit");
    }

    #[test]
    fn functional_error_event_blank_message_is_dropped() {
        let event = decode_stream_event(r#"{"type":"error","message":"  "}"#).expect("decodes");
        assert_eq!(event, Some(AgentStreamEvent::Error { message: None }));
    }

    #[test]
    fn regression_unknown_type_is_ignored_and_malformed_json_is_an_error() {
        assert_eq!(
            decode_stream_event(r#"{"type":"progress"}"#).expect("decodes"),
            None
        );
        let error = decode_stream_event("{not json").expect_err("malformed");
        assert!(error.to_string().starts_with("Invalid SSE payload"));
    }

    #[test]
    fn unit_initial_step_values_skip_non_step_entries() {
        assert_eq!(
            normalize_step_value(json!({"node": "n1", "label": "L"})),
            Some(StepRecord::new("n1", "L", StepStatus::Running))
        );
        assert_eq!(normalize_step_value(json!({"type": "heartbeat"})), None);
    }
}
