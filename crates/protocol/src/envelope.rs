use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A call relayed to the peer over the data channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRequest {
    /// Correlation id, echoed back in the matching [`RelayReply`].
    pub id: String,
    /// Name of the operation the peer should run.
    pub message: String,
    /// Operation arguments (a JSON object).
    pub args: Value,
}

impl RelayRequest {
    /// Creates a new request.
    pub fn new(id: impl Into<String>, message: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            args,
        }
    }
}

/// A reply received from the peer over the data channel.
///
/// `result` is opaque to the relay; a reply without one resolves to `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayReply {
    pub id: String,
    #[serde(default)]
    pub result: Value,
}

impl RelayReply {
    /// Parses a text frame. Returns `None` for anything that is not a reply.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let req = RelayRequest::new("req-1", "CLOSE_TABS", json!({"tabIds": [5]}));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({"id": "req-1", "message": "CLOSE_TABS", "args": {"tabIds": [5]}})
        );
    }

    #[test]
    fn reply_parses_result() {
        let reply = RelayReply::parse(r#"{"id":"req-1","result":{"closed":[5]}}"#).unwrap();
        assert_eq!(reply.id, "req-1");
        assert_eq!(reply.result, json!({"closed": [5]}));
    }

    #[test]
    fn reply_without_result_is_null() {
        let reply = RelayReply::parse(r#"{"id":"req-2"}"#).unwrap();
        assert_eq!(reply.result, Value::Null);
    }

    #[test]
    fn reply_ignores_extra_fields() {
        let reply = RelayReply::parse(r#"{"id":"a","result":1,"extra":true}"#).unwrap();
        assert_eq!(reply.result, json!(1));
    }

    #[test]
    fn malformed_replies_are_rejected() {
        assert!(RelayReply::parse("not json").is_none());
        assert!(RelayReply::parse(r#"{"result":1}"#).is_none());
        assert!(RelayReply::parse(r#"{"id":42,"result":1}"#).is_none());
        assert!(RelayReply::parse("[1,2,3]").is_none());
    }
}
