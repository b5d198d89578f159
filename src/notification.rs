// 📬 Notification Decoding
// "New object available" events arrive as an SNS envelope whose Message is
// an S3 event document (itself JSON, serialized as a string).

use crate::object_store::ObjectRef;
use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct SnsEnvelope {
    #[serde(rename = "Records")]
    records: Vec<SnsRecord>,
}

#[derive(Debug, Deserialize)]
struct SnsRecord {
    #[serde(rename = "Sns")]
    sns: SnsMessage,
}

#[derive(Debug, Deserialize)]
struct SnsMessage {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct S3Event {
    #[serde(rename = "Records")]
    records: Vec<S3Record>,
}

#[derive(Debug, Deserialize)]
struct S3Record {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}

/// Object keys in S3 events are form-encoded: '+' is a space
pub fn decode_object_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    let decoded = urlencoding::decode(&spaced)
        .with_context(|| format!("Object key is not valid UTF-8 after decoding: {}", raw))?;
    Ok(decoded.into_owned())
}

/// Object referenced by the first record of the first SNS message
pub fn decode_notification(json: &str) -> Result<ObjectRef> {
    let envelope: SnsEnvelope =
        serde_json::from_str(json).context("Notification is not an SNS envelope")?;
    let message = envelope
        .records
        .into_iter()
        .next()
        .context("SNS envelope has no records")?
        .sns
        .message;

    let event: S3Event =
        serde_json::from_str(&message).context("SNS message is not an S3 event")?;
    let record = event
        .records
        .into_iter()
        .next()
        .context("S3 event has no records")?;

    Ok(ObjectRef {
        bucket: record.s3.bucket.name,
        key: decode_object_key(&record.s3.object.key)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(bucket: &str, key: &str) -> String {
        let s3_event = serde_json::json!({
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": bucket },
                    "object": { "key": key, "size": 1024 }
                }
            }]
        });
        serde_json::json!({
            "Records": [{
                "EventSource": "aws:sns",
                "Sns": {
                    "Type": "Notification",
                    "Message": s3_event.to_string()
                }
            }]
        })
        .to_string()
    }

    #[test]
    fn test_decode_notification() {
        let json = envelope("bgg-raw", "raw/date%3D2024-01-25/0-1200.xml");
        let object = decode_notification(&json).unwrap();

        assert_eq!(object.bucket, "bgg-raw");
        assert_eq!(object.key, "raw/date=2024-01-25/0-1200.xml");
    }

    #[test]
    fn test_plus_is_space() {
        assert_eq!(decode_object_key("board+games/a%2Bb.xml").unwrap(), "board games/a+b.xml");
    }

    #[test]
    fn test_malformed_notifications() {
        assert!(decode_notification("not json").is_err());
        assert!(decode_notification(r#"{"Records": []}"#).is_err());
        assert!(decode_notification(r#"{"Records": [{"Sns": {"Message": "{}"}}]}"#).is_err());
        assert!(decode_notification(r#"{"Records": [{"Sns": {"Message": "{\"Records\": []}"}}]}"#).is_err());
    }
}
