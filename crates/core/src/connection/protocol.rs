//! Framing for the control channel.
//!
//! The control service speaks a socket.io-style text protocol: every frame
//! starts with a short numeric packet prefix, and events wrap a JSON array
//! `[name, payload]`.

use serde::{Deserialize, Serialize};

use super::types::TakeCaptureCommand;

/// Keep-alive frame sent while subscribed.
pub const HEARTBEAT_FRAME: &str = "40";

/// Prefix of an outbound request frame.
pub const REQUEST_PREFIX: &str = "42[\"post\",";

/// Prefix of an inbound event frame.
pub const EVENT_PREFIX: &str = "42[\"message\",";

/// Event type that triggers a capture.
pub const TAKE_CAPTURE_TYPE: &str = "take-capture";

/// Errors produced while decoding inbound frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Envelope matched but its payload is not valid JSON.
    #[error("invalid event payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Envelope prefix matched but the frame is not closed.
    #[error("unterminated event envelope")]
    Unterminated,
}

/// Request body understood by the control service.
#[derive(Debug, Clone, Serialize)]
pub struct ControlRequest {
    pub url: String,
    pub method: String,
    pub headers: RequestHeaders,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestHeaders {
    #[serde(rename = "Authorization")]
    pub authorization: String,
}

impl ControlRequest {
    /// Subscribe request for an organization's event stream.
    pub fn subscribe(org_id: &str, token: &str) -> Self {
        Self {
            url: subscribe_path(org_id),
            method: "post".to_string(),
            headers: RequestHeaders {
                authorization: format!("Bearer {}", token),
            },
            data: serde_json::Value::Object(Default::default()),
        }
    }

    /// Wraps the request in a frame ready to be sent.
    pub fn to_frame(&self) -> String {
        // Serializing plain strings and a JSON value cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{}{}]", REQUEST_PREFIX, json)
    }
}

/// Path of the per-organization subscribe endpoint.
pub fn subscribe_path(org_id: &str) -> String {
    format!("/v1/org/{}/snap/subscribe", org_id)
}

#[derive(Debug, Deserialize)]
struct InboundEvent {
    #[serde(rename = "type")]
    event_type: Option<String>,
    #[serde(rename = "instanceId", default)]
    instance_id: String,
    #[serde(rename = "sessionId", default)]
    session_id: String,
    #[serde(rename = "userId", default)]
    user_id: String,
    #[serde(default)]
    tag: String,
}

/// Decodes an inbound frame.
///
/// Returns `Ok(None)` for frames that are not events (heartbeat echoes,
/// handshake packets) or events of a type nobody handles.
pub fn parse_frame(frame: &str) -> Result<Option<TakeCaptureCommand>, ProtocolError> {
    let Some(rest) = frame.strip_prefix(EVENT_PREFIX) else {
        return Ok(None);
    };

    let payload = rest
        .trim_end()
        .strip_suffix(']')
        .ok_or(ProtocolError::Unterminated)?;

    let event: InboundEvent = serde_json::from_str(payload)?;

    match event.event_type.as_deref() {
        Some(TAKE_CAPTURE_TYPE) => Ok(Some(TakeCaptureCommand {
            instance_id: event.instance_id,
            session_id: event.session_id,
            user_id: event.user_id,
            tag: event.tag,
        })),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame_shape() {
        let frame = ControlRequest::subscribe("org1", "tok").to_frame();
        assert!(frame.starts_with(REQUEST_PREFIX));
        assert!(frame.ends_with(']'));

        let body = &frame[REQUEST_PREFIX.len()..frame.len() - 1];
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["url"], "/v1/org/org1/snap/subscribe");
        assert_eq!(json["method"], "post");
        assert_eq!(json["headers"]["Authorization"], "Bearer tok");
        assert!(json["data"].is_object());
    }

    #[test]
    fn test_parse_take_capture() {
        let frame = r#"42["message",{"type":"take-capture","instanceId":"i1","sessionId":"s1","userId":"u1","tag":"t1"}]"#;
        let cmd = parse_frame(frame).unwrap().unwrap();
        assert_eq!(
            cmd,
            TakeCaptureCommand {
                instance_id: "i1".to_string(),
                session_id: "s1".to_string(),
                user_id: "u1".to_string(),
                tag: "t1".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_ignores_heartbeat_echo() {
        assert!(parse_frame(HEARTBEAT_FRAME).unwrap().is_none());
        assert!(parse_frame("3").unwrap().is_none());
        assert!(parse_frame("").unwrap().is_none());
    }

    #[test]
    fn test_parse_ignores_unknown_type() {
        let frame = r#"42["message",{"type":"something-else","instanceId":"i1"}]"#;
        assert!(parse_frame(frame).unwrap().is_none());

        let frame = r#"42["message",{"instanceId":"i1"}]"#;
        assert!(parse_frame(frame).unwrap().is_none());
    }

    #[test]
    fn test_parse_ignores_other_events() {
        let frame = r#"42["presence",{"type":"take-capture"}]"#;
        assert!(parse_frame(frame).unwrap().is_none());
    }

    #[test]
    fn test_parse_invalid_json_is_error() {
        let frame = r#"42["message",{"type":]"#;
        assert!(matches!(
            parse_frame(frame),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_parse_unterminated_is_error() {
        let frame = r#"42["message",{"type":"take-capture"}"#;
        assert!(matches!(parse_frame(frame), Err(ProtocolError::Unterminated)));
    }

    #[test]
    fn test_parse_missing_fields_default_to_empty() {
        let frame = r#"42["message",{"type":"take-capture","instanceId":"i1"}]"#;
        let cmd = parse_frame(frame).unwrap().unwrap();
        assert_eq!(cmd.instance_id, "i1");
        assert_eq!(cmd.session_id, "");
        assert_eq!(cmd.tag, "");
    }
}
