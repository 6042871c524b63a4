fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use hotpatch_protocol::{MatchKind, Message, ProtocolError, decode, encode};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent comparison).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  Rust:    {reserialized}"
        );
        parsed
    }

    /// Decodes a fixture through the frame codec, which keeps error variants.
    fn decode_fixture(name: &str) -> Result<Message, ProtocolError> {
        decode(read_fixture(name).trim())
    }

    // --- Server -> client ---

    #[test]
    fn fixture_update() {
        let msg: Message = roundtrip_test("update.json");
        assert_eq!(msg.kind(), "update");
        assert_eq!(msg.resource_url(), Some("css/main.css"));
    }

    #[test]
    fn fixture_update_equal() {
        let Message::Update(update) = roundtrip_test::<Message>("update_equal.json") else {
            panic!("expected update");
        };
        assert_eq!(update.match_kind, Some(MatchKind::Equal));
        assert_eq!(update.contents.as_deref(), Some("foo"));
    }

    #[test]
    fn fixture_update_part() {
        let Message::Update(update) = roundtrip_test::<Message>("update_part.json") else {
            panic!("expected update");
        };
        assert!(update.is_part());
        assert!(update.contents.is_none());
    }

    #[test]
    fn fixture_update_regexp() {
        let Message::Update(update) = roundtrip_test::<Message>("update_regexp.json") else {
            panic!("expected update");
        };
        match update.match_kind {
            Some(MatchKind::Regexp { source, flags }) => {
                assert_eq!(source, r"app\.js$");
                assert!(flags.ignore_case);
                assert!(!flags.global);
            }
            other => panic!("expected regexp matcher, got {other:?}"),
        }
    }

    #[test]
    fn fixture_sync() {
        let msg: Message = roundtrip_test("sync.json");
        assert!(matches!(msg, Message::Sync(ref u) if u.contents.is_none()));
    }

    #[test]
    fn fixture_reload() {
        assert_eq!(roundtrip_test::<Message>("reload.json"), Message::Reload);
    }

    #[test]
    fn fixture_base_url_request() {
        assert_eq!(
            roundtrip_test::<Message>("base_url_request.json"),
            Message::BaseUrl { url: None }
        );
    }

    // --- Client -> server ---

    #[test]
    fn fixture_base_url() {
        let msg: Message = roundtrip_test("base_url.json");
        assert_eq!(msg, Message::base_url("http://localhost:3000/"));
    }

    #[test]
    fn codec_matches_serde() {
        for name in [
            "update.json",
            "update_equal.json",
            "update_part.json",
            "update_regexp.json",
            "sync.json",
            "base_url.json",
            "base_url_request.json",
            "reload.json",
        ] {
            let decoded = decode_fixture(name).unwrap_or_else(|e| panic!("{name}: {e}"));
            let encoded: serde_json::Value =
                serde_json::from_str(&encode(&decoded).unwrap()).unwrap();
            assert_eq!(encoded, load_fixture(name), "codec mismatch for {name}");
        }
    }

    // --- Rejected frames ---

    #[test]
    fn rejects_function_matcher() {
        assert!(matches!(
            decode_fixture("reject_function_matcher.json"),
            Err(ProtocolError::UnsupportedMatcher(_))
        ));
    }

    #[test]
    fn rejects_both_bodies() {
        assert!(matches!(
            decode_fixture("reject_both_bodies.json"),
            Err(ProtocolError::ConflictingBody(ref url)) if url == "a.js"
        ));
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(matches!(
            decode_fixture("reject_unknown_action.json"),
            Err(ProtocolError::UnknownAction(ref action)) if action == "patch"
        ));
    }

    #[test]
    fn rejects_missing_url() {
        assert!(matches!(
            decode_fixture("reject_missing_url.json"),
            Err(ProtocolError::MissingField {
                field: "resourceURL",
                ..
            })
        ));
    }

    #[test]
    fn rejects_update_without_body() {
        assert!(matches!(
            decode_fixture("reject_update_without_body.json"),
            Err(ProtocolError::MissingField {
                field: "contents",
                ..
            })
        ));
    }
}
