use clipbridge_core::protocol::{decode_control_frame, encode_control_frame, AckStatus, ControlFrame};

use proptest::prelude::*;
use std::panic::catch_unwind;

proptest! {
    #[test]
    fn decode_control_frame_never_panics(s in ".*") {
        let _ = catch_unwind(|| {
            let _ = decode_control_frame(&s);
        }).expect("decode_control_frame panicked");
    }

    #[test]
    fn control_frame_encode_decode_roundtrip(frame in arb_control_frame()) {
        let wire = encode_control_frame(&frame).expect("encode_control_frame");
        let decoded = decode_control_frame(&wire).expect("decode_control_frame").expect("recognized type");
        prop_assert_eq!(decoded, frame);
    }
}

fn arb_control_frame() -> impl Strategy<Value = ControlFrame> {
    let small_string = "[ -~]{0,128}"; // printable ASCII, small

    prop_oneof![
        small_string.prop_map(|encrypted_key| ControlFrame::KeyExchange { encrypted_key }),
        small_string.prop_map(|message| ControlFrame::KeyExchangeAck {
            status: AckStatus::Ok,
            message: Some(message),
        }),
        small_string.prop_map(|message| ControlFrame::KeyExchangeAck {
            status: AckStatus::Error,
            message: Some(message),
        }),
        (small_string, small_string, any::<i64>()).prop_map(|(error_type, message, timestamp)| ControlFrame::ErrorReport {
            error_type,
            message,
            timestamp,
            details: None,
        }),
        (small_string, any::<i64>()).prop_map(|(status, timestamp)| ControlFrame::ConnectionStatus {
            status,
            timestamp,
            stats: None,
        }),
        (any::<bool>(), small_string, small_string, any::<i64>()).prop_map(
            |(success, clipboard_id, message, timestamp)| ControlFrame::ClipboardSyncResult {
                success,
                clipboard_id,
                message,
                timestamp,
            }
        ),
    ]
}
