#[cfg(test)]
mod tests {
    use crate::signal::envelope::{ClientMessage, Inbound, MapTrack, Outbound, RtcTo};
    use crate::signal::errors::SignalError;
    use serde_json::json;
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
    use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

    #[test]
    fn test_decode_answer() {
        let msg = json!(["answer", {"type": "answer", "sdp": "v=0\r\n"}]);
        match Inbound::from_value(msg) {
            Ok(Inbound::Answer(desc)) => {
                assert_eq!(desc.sdp_type, RTCSdpType::Answer);
                assert_eq!(desc.sdp, "v=0\r\n");
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_renegotiate_ignores_body() {
        let rv = Inbound::from_value(json!(["renegotiate", {"whatever": 1}]));
        assert!(matches!(rv, Ok(Inbound::Renegotiate)));
    }

    #[test]
    fn test_decode_ice_candidate() {
        let msg = json!([
            "icecandidate",
            {
                "candidate": "candidate:1 1 udp 2130706431 10.0.0.1 5000 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
                "usernameFragment": "frag"
            }
        ]);
        match Inbound::from_value(msg) {
            Ok(Inbound::IceCandidate(Some(candidate))) => {
                assert!(candidate.candidate.starts_with("candidate:1"));
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_end_of_candidates() {
        let null_body = Inbound::from_value(json!(["icecandidate", null]));
        assert!(matches!(null_body, Ok(Inbound::IceCandidate(None))));

        let empty = Inbound::from_value(json!([
            "icecandidate",
            {"candidate": "", "sdpMid": "", "sdpMLineIndex": 0, "usernameFragment": ""}
        ]));
        assert!(matches!(empty, Ok(Inbound::IceCandidate(None))));
    }

    #[test]
    fn test_decode_malformed() {
        struct Test {
            name: &'static str,
            input: &'static str,
            want: SignalError,
        }

        let tests = vec![
            Test {
                name: "wrong arity",
                input: r#"["bogus"]"#,
                want: SignalError::ErrArity(1),
            },
            Test {
                name: "too many pieces",
                input: r#"["answer", {}, {}]"#,
                want: SignalError::ErrArity(3),
            },
            Test {
                name: "object instead of array",
                input: r#"{"type": "answer"}"#,
                want: SignalError::ErrNotArray,
            },
            Test {
                name: "numeric type",
                input: r#"[7, {}]"#,
                want: SignalError::ErrTypeNotString,
            },
            Test {
                name: "unknown type",
                input: r#"["unknown", {}]"#,
                want: SignalError::ErrUnknownType(String::from("unknown")),
            },
        ];

        for test in tests {
            match test.input.parse::<Inbound>() {
                Err(err) => assert_eq!(err, test.want, "{}", test.name),
                Ok(msg) => panic!("{}: decoded {:?}", test.name, msg),
            }
        }
    }

    #[test]
    fn test_decode_bad_payload() {
        let rv = Inbound::from_value(json!(["answer", "not a description"]));
        assert!(matches!(
            rv,
            Err(SignalError::ErrPayload { kind: "answer", .. })
        ));

        let rv = "not json".parse::<Inbound>();
        assert!(matches!(rv, Err(SignalError::ErrNotJson(_))));
    }

    #[test]
    fn test_encode_offer() {
        let mut offer = RTCSessionDescription::default();
        offer.sdp_type = RTCSdpType::Offer;
        offer.sdp = String::from("v=0\r\n");

        let value = Outbound::Offer(offer).to_value().unwrap();
        assert_eq!(value[0], json!("offer"));
        assert_eq!(value[1]["type"], json!("offer"));
        assert_eq!(value[1]["sdp"], json!("v=0\r\n"));
    }

    #[test]
    fn test_encode_hints() {
        let end = Outbound::IceCandidate(None).to_value().unwrap();
        assert_eq!(end, json!(["icecandidate", null]));

        let renegotiate = Outbound::Renegotiate.to_value().unwrap();
        assert_eq!(renegotiate, json!(["renegotiate", null]));

        let add = Outbound::AddTransceiver(RTPCodecType::Video).to_value().unwrap();
        assert_eq!(add, json!(["addtransceiver", "video"]));
    }

    #[test]
    fn test_client_messages() {
        let map_track = ClientMessage::new(
            "mapTrack",
            &MapTrack {
                mid: String::from("2"),
                id: 17,
            },
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&map_track).unwrap(),
            json!({"type": "mapTrack", "body": {"mid": "2", "id": 17}})
        );

        let rtc: RtcTo =
            serde_json::from_value(json!({"to": 0, "message": ["renegotiate", null]})).unwrap();
        assert!(matches!(
            Inbound::from_value(rtc.message),
            Ok(Inbound::Renegotiate)
        ));
    }
}
