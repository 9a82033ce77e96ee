//! Field extraction from JSON payloads.
//!
//! Paths are dot-separated; a numeric segment indexes into an array
//! (`items.0.id`). Lookups never fail:
//!
//! - missing path or unparseable payload → `""`
//! - string value → the string, unquoted
//! - any other value → compact JSON (`42`, `true`, `null`, `{"a":1}`)

use serde_json::Value;

/// Looks up a single dotted path in a parsed document.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(doc, |cur, seg| match cur {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Renders a value the way log lines show it.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Extracts every named path from `payload`, preserving the order of `names`.
pub fn extract_fields(payload: &[u8], names: &[String]) -> Vec<(String, String)> {
    let doc: Option<Value> = serde_json::from_slice(payload).ok();
    names
        .iter()
        .map(|name| {
            let value = doc
                .as_ref()
                .and_then(|d| lookup(d, name))
                .map(render)
                .unwrap_or_default();
            (name.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn strings_are_unquoted_and_others_compact() {
        let payload = br#"{"deviceId":"d-1","oid":7,"ok":true,"meta":{"a": 1},"none":null}"#;
        let out = extract_fields(payload, &names(&["deviceId", "oid", "ok", "meta", "none"]));
        assert_eq!(
            out,
            vec![
                ("deviceId".to_string(), "d-1".to_string()),
                ("oid".to_string(), "7".to_string()),
                ("ok".to_string(), "true".to_string()),
                ("meta".to_string(), r#"{"a":1}"#.to_string()),
                ("none".to_string(), "null".to_string()),
            ]
        );
    }

    #[test]
    fn dotted_paths_walk_objects_and_arrays() {
        let payload = br#"{"device":{"tags":[{"id":"t0"},{"id":"t1"}]}}"#;
        let out = extract_fields(payload, &names(&["device.tags.1.id", "device.tags.9.id"]));
        assert_eq!(out[0].1, "t1");
        assert_eq!(out[1].1, "");
    }

    #[test]
    fn invalid_payload_yields_empty_values() {
        let out = extract_fields(b"\x00garbage", &names(&["deviceId", "uuid"]));
        assert!(out.iter().all(|(_, v)| v.is_empty()));
        assert_eq!(out.len(), 2);
    }
}
