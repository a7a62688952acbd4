use flare_core::admission::fingerprint;
use flare_core::config::SecurityConfig;
use flare_core::security::{is_sensitive_key, SecurityValidator};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn validator() -> SecurityValidator {
    SecurityValidator::new(SecurityConfig {
        max_string_length: 64,
        ..Default::default()
    })
}

/// Arbitrary JSON, mixing in sensitive keys and injection payloads.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 ]{0,80}".prop_map(Value::String),
        Just(json!("<script>alert(1)</script>")),
        Just(json!("javascript:void(0)")),
        Just(json!("onclick = steal()")),
    ];
    leaf.prop_recursive(14, 128, 6, |inner| {
        let key = prop_oneof![
            "[a-z_]{1,12}",
            Just("password".to_string()),
            Just("api_key".to_string()),
            Just("sessionId".to_string()),
            Just("PIN".to_string()),
        ];
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map(key, inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn no_sensitive_keys(value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .iter()
            .all(|(k, v)| !is_sensitive_key(k) && no_sensitive_keys(v)),
        Value::Array(items) => items.iter().all(no_sensitive_keys),
        _ => true,
    }
}

fn max_string_chars(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.iter().map(max_string_chars).max().unwrap_or(0),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| k.chars().count().max(max_string_chars(v)))
            .max()
            .unwrap_or(0),
        _ => 0,
    }
}

proptest! {
    #[test]
    fn sanitize_is_idempotent(value in arb_json()) {
        let v = validator();
        let once = v.sanitize(&value);
        prop_assert_eq!(v.sanitize(&once), once);
    }

    #[test]
    fn sanitized_output_has_no_sensitive_keys(value in arb_json()) {
        prop_assert!(no_sensitive_keys(&validator().sanitize(&value)));
    }

    #[test]
    fn sanitized_strings_respect_length_limit(value in arb_json()) {
        prop_assert!(max_string_chars(&validator().sanitize(&value)) <= 64);
    }

    #[test]
    fn fingerprint_is_deterministic(
        error_type in "[A-Za-z]{1,20}",
        message in ".{0,200}",
    ) {
        prop_assert_eq!(
            fingerprint(&error_type, &message, None, None),
            fingerprint(&error_type, &message, None, None)
        );
    }

    #[test]
    fn fingerprint_ignores_line_numbers(
        function in "[a-z_]{1,16}",
        a in 1u32..100_000,
        b in 1u32..100_000,
    ) {
        let first = format!("at {function} (src/lib.rs:{a}:3)");
        let second = format!("at {function} (src/lib.rs:{b}:9)");
        prop_assert_eq!(
            fingerprint("Error", "boom", Some(&first), None),
            fingerprint("Error", "boom", Some(&second), None)
        );
    }

    #[test]
    fn fingerprint_uses_only_message_prefix(
        prefix in "[a-z]{100}",
        tail_a in "[a-z]{0,50}",
        tail_b in "[a-z]{0,50}",
    ) {
        prop_assert_eq!(
            fingerprint("Error", &format!("{prefix}{tail_a}"), None, None),
            fingerprint("Error", &format!("{prefix}{tail_b}"), None, None)
        );
    }
}
