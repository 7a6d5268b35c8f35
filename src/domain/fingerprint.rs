//! Content fingerprints used as render cache keys.
//!
//! A fingerprint is the SHA-256 digest of the template identifier followed by
//! the canonical JSON form of the render context. Canonical JSON sorts object
//! keys at every nesting level and writes scalars in `serde_json`'s
//! locale-independent form, so two structurally equal contexts always hash to
//! the same key regardless of insertion order.

use std::fmt::{self, Write as FmtWrite};
use std::str::FromStr;

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::types::{RenderContext, TemplateId};

const DIGEST_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; DIGEST_LEN]);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintParseError {
    #[error("fingerprint must be {expected} hex characters, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("fingerprint must be lowercase hex")]
    Encoding,
}

impl Fingerprint {
    /// Derive the cache key for a template rendered against `context`.
    pub fn compute(template_id: &TemplateId, context: &RenderContext) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(keyed_prefix(template_id).as_bytes());
        hasher.update(canonical_context(context).as_bytes());
        let digest = hasher.finalize();
        let slice: &[u8] = digest.as_ref();

        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(slice);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.len() != DIGEST_LEN * 2 {
            return Err(FingerprintParseError::Length {
                expected: DIGEST_LEN * 2,
                actual: value.len(),
            });
        }
        if value.bytes().any(|byte| byte.is_ascii_uppercase()) {
            return Err(FingerprintParseError::Encoding);
        }

        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(value, &mut bytes).map_err(|_| FingerprintParseError::Encoding)?;
        Ok(Self(bytes))
    }
}

/// Length-prefixed template identifier so the boundary between identifier and
/// context can never shift.
fn keyed_prefix(template_id: &TemplateId) -> String {
    let id = template_id.as_str();
    format!("{}:{id}\n", id.len())
}

/// Serialize the context into its canonical textual form.
pub fn canonical_context(context: &RenderContext) -> String {
    let mut out = String::new();
    write_object(&mut out, context.iter());
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Number(number) => {
            let _ = write!(out, "{number}");
        }
        Value::String(text) => write_string(out, text),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => write_object(out, map.iter()),
    }
}

fn write_object<'a>(out: &mut String, entries: impl Iterator<Item = (&'a String, &'a Value)>) {
    let mut sorted: Vec<_> = entries.collect();
    sorted.sort_unstable_by(|(left, _), (right, _)| left.as_bytes().cmp(right.as_bytes()));

    out.push('{');
    for (index, (key, value)) in sorted.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        write_value(out, value);
    }
    out.push('}');
}

/// Quote `text` with the same escapes `serde_json` emits: the short forms for
/// quote, backslash and the common controls, `\u00xx` for other controls, and
/// everything else verbatim.
fn write_string(out: &mut String, text: &str) {
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if u32::from(ch) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", u32::from(ch));
            }
            ch => out.push(ch),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn context(value: Value) -> RenderContext {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn fingerprint(id: &str, value: Value) -> Fingerprint {
        Fingerprint::compute(&TemplateId::from(id), &context(value))
    }

    #[test]
    fn matches_known_digest() {
        assert_eq!(
            fingerprint("invoice", json!({"total": 42})).to_hex(),
            "391ccaefadb3e4ba893babfa639505e8352378b7f9f16a11b8edd23331b1e3e3"
        );
        assert_eq!(
            fingerprint("", json!({})).to_hex(),
            "4b03d6a9ffaa9b9e13ef7877b2f6717bcb19c4069f7318469248782d290f47a3"
        );
    }

    #[test]
    fn strings_are_escaped_like_serde_json() {
        let samples = [
            "plain",
            "quote \" and backslash \\",
            "controls \u{08}\u{0c}\n\r\t end",
            "low \u{00}\u{01}\u{1f} bytes",
            "unicode: Zoë 税 🚀 \u{7f}",
        ];
        for sample in samples {
            let mut ours = String::new();
            write_string(&mut ours, sample);
            assert_eq!(ours, serde_json::to_string(sample).expect("serialize"), "{sample:?}");
        }
    }

    #[test]
    fn canonical_form_sorts_keys_recursively() {
        let ctx = context(json!({
            "b": {"z": 1, "a": [true, null, {"y": "q", "x": 2.5}]},
            "a": "text"
        }));
        assert_eq!(
            canonical_context(&ctx),
            r#"{"a":"text","b":{"a":[true,null,{"x":2.5,"y":"q"}],"z":1}}"#
        );
    }

    #[test]
    fn key_order_does_not_change_fingerprint() {
        let mut first = RenderContext::new();
        first.insert("total".into(), json!(42));
        first.insert(
            "customer".into(),
            json!({"name": "Ada", "address": {"city": "London", "zip": "N1"}}),
        );

        let mut nested = serde_json::Map::new();
        nested.insert("zip".into(), json!("N1"));
        nested.insert("city".into(), json!("London"));
        let mut customer = serde_json::Map::new();
        customer.insert("address".into(), Value::Object(nested));
        customer.insert("name".into(), json!("Ada"));
        let mut second = RenderContext::new();
        second.insert("customer".into(), Value::Object(customer));
        second.insert("total".into(), json!(42));

        let id = TemplateId::from("invoice");
        assert_eq!(
            Fingerprint::compute(&id, &first),
            Fingerprint::compute(&id, &second)
        );
    }

    #[test]
    fn mutations_change_fingerprint() {
        let base = json!({
            "total": 42,
            "paid": false,
            "note": null,
            "items": [{"sku": "A-1", "qty": 2}, {"sku": "B-7", "qty": 1}],
            "customer": {"name": "Ada", "vip": true}
        });
        let original = fingerprint("invoice", base.clone());

        let mutations: Vec<Box<dyn Fn(&mut Value)>> = vec![
            Box::new(|v: &mut Value| v["total"] = json!(43)),
            Box::new(|v: &mut Value| v["total"] = json!(42.0)),
            Box::new(|v: &mut Value| v["total"] = json!("42")),
            Box::new(|v: &mut Value| v["paid"] = json!(true)),
            Box::new(|v: &mut Value| v["note"] = json!("")),
            Box::new(|v: &mut Value| v["items"][0]["qty"] = json!(3)),
            Box::new(|v: &mut Value| v["items"][1]["sku"] = json!("B-8")),
            Box::new(|v: &mut Value| v["customer"]["name"] = json!("Ada ")),
            Box::new(|v: &mut Value| v["customer"]["vip"] = json!(null)),
            Box::new(|v: &mut Value| v["extra"] = json!(null)),
            Box::new(|v: &mut Value| {
                if let Some(map) = v.as_object_mut() {
                    map.remove("note");
                }
            }),
            Box::new(|v: &mut Value| {
                if let Some(items) = v["items"].as_array_mut() {
                    items.reverse();
                }
            }),
            Box::new(|v: &mut Value| v["items"] = json!({"0": {"sku": "A-1", "qty": 2}})),
        ];

        let mut seen = vec![original];
        for (index, mutate) in mutations.iter().enumerate() {
            let mut changed = base.clone();
            mutate(&mut changed);
            let candidate = fingerprint("invoice", changed);
            assert!(
                !seen.contains(&candidate),
                "mutation #{index} collided with an earlier fingerprint"
            );
            seen.push(candidate);
        }

        assert_ne!(original, fingerprint("invoices", base.clone()));
        assert_ne!(original, fingerprint("Invoice", base));
    }

    #[test]
    fn identifier_and_context_boundary_is_unambiguous() {
        assert_ne!(
            fingerprint("ab", json!({"c": 1})),
            fingerprint("a", json!({"bc": 1}))
        );
        assert_ne!(fingerprint("a{", json!({})), fingerprint("a", json!({})));
    }

    #[test]
    fn hex_round_trips_and_rejects_garbage() {
        let fp = fingerprint("invoice", json!({"total": 42}));
        assert_eq!(fp.to_hex().parse::<Fingerprint>(), Ok(fp));

        assert_eq!(
            "abc".parse::<Fingerprint>(),
            Err(FingerprintParseError::Length {
                expected: 64,
                actual: 3
            })
        );
        assert_eq!(
            fp.to_hex().to_uppercase().parse::<Fingerprint>(),
            Err(FingerprintParseError::Encoding)
        );
        assert_eq!(
            "zz".repeat(32).parse::<Fingerprint>(),
            Err(FingerprintParseError::Encoding)
        );
    }
}
