//! Control-frame wire types — the plaintext JSON half of the transport
//! protocol (the encrypted half lives in [`crate::envelope`]).

use serde::{Deserialize, Serialize};

/// A `"type"`-tagged control frame. Unknown `type` values must still
/// deserialize somewhere upstream as "ignore and log" rather than a hard
/// parse error, so callers match on this enum after a best-effort
/// `serde_json::from_str::<serde_json::Value>` peek for the unknown case —
/// see [`crate::sync`] for that dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ControlFrame {
    #[serde(rename = "key_exchange")]
    KeyExchange { encrypted_key: String },

    #[serde(rename = "key_exchange_ack")]
    KeyExchangeAck {
        status: AckStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename = "error_report")]
    ErrorReport {
        error_type: String,
        message: String,
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },

    #[serde(rename = "connection_status")]
    ConnectionStatus {
        status: String,
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        stats: Option<serde_json::Value>,
    },

    #[serde(rename = "clipboard_sync_result")]
    ClipboardSyncResult {
        success: bool,
        clipboard_id: String,
        message: String,
        timestamp: i64,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Error,
}

/// Serialize a control frame to its wire JSON form.
pub fn encode_control_frame(frame: &ControlFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Parse a control frame. Returns `Ok(None)` for a syntactically valid JSON
/// object whose `type` is not one of the five recognized kinds — per spec,
/// unknown types are logged and ignored rather than treated as a parse
/// failure.
pub fn decode_control_frame(text: &str) -> Result<Option<ControlFrame>, serde_json::Error> {
    match serde_json::from_str::<ControlFrame>(text) {
        Ok(frame) => Ok(Some(frame)),
        Err(e) => {
            // Distinguish "valid JSON, unknown type" from "not JSON at all":
            // only the former is a silent ignore.
            if serde_json::from_str::<serde_json::Value>(text).is_ok() {
                Ok(None)
            } else {
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: ControlFrame) {
        let wire = encode_control_frame(&frame).unwrap();
        let decoded = decode_control_frame(&wire).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn key_exchange_round_trip() {
        round_trip(ControlFrame::KeyExchange {
            encrypted_key: "b64stuff".into(),
        });
    }

    #[test]
    fn key_exchange_ack_ok_round_trip() {
        round_trip(ControlFrame::KeyExchangeAck {
            status: AckStatus::Ok,
            message: None,
        });
    }

    #[test]
    fn key_exchange_ack_error_round_trip() {
        round_trip(ControlFrame::KeyExchangeAck {
            status: AckStatus::Error,
            message: Some("bad key".into()),
        });
    }

    #[test]
    fn error_report_round_trip() {
        round_trip(ControlFrame::ErrorReport {
            error_type: "DECRYPT_AUTH".into(),
            message: "tag mismatch".into(),
            timestamp: 1_700_000_000_000,
            details: None,
        });
    }

    #[test]
    fn clipboard_sync_result_round_trip() {
        round_trip(ControlFrame::ClipboardSyncResult {
            success: true,
            clipboard_id: "abc-123".into(),
            message: "ok".into(),
            timestamp: 1_700_000_000_000,
        });
    }

    #[test]
    fn unknown_type_is_ignored_not_an_error() {
        let text = r#"{"type":"something_new","foo":1}"#;
        assert_eq!(decode_control_frame(text).unwrap(), None);
    }

    #[test]
    fn non_json_is_a_parse_error() {
        assert!(decode_control_frame("not json at all").is_err());
    }
}
