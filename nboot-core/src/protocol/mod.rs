//! nREPL protocol definitions
//!
//! Defines the request sent to the nREPL server and the response messages it
//! streams back. Both are plain serde types encoded with serde_bencode.

use serde::{Deserialize, Serialize};

use crate::bencode::{self, BencodeError};

/// Request from nboot to the nREPL server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Operation name, e.g. `eval`
    pub op: String,

    /// Code to evaluate (for `eval`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Request id, echoed back on every response to this request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl Request {
    pub fn eval(code: impl Into<String>) -> Self {
        Self {
            op: "eval".to_string(),
            code: Some(code.into()),
            id: None,
            session: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Bencoded wire form
    pub fn to_bencode(&self) -> Result<Vec<u8>, BencodeError> {
        bencode::encode(self)
    }
}

/// Response message streamed back by the nREPL server
///
/// Every field is optional and decoded leniently: a field that is missing or
/// has an unexpected type reads as `None`, it never rejects the message.
/// Integers are rendered as decimal text. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Message {
    #[serde(deserialize_with = "lenient::text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub session: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub ns: Option<String>,

    /// Captured stdout fragment
    #[serde(deserialize_with = "lenient::text")]
    pub out: Option<String>,

    /// Captured stderr fragment
    #[serde(deserialize_with = "lenient::text")]
    pub err: Option<String>,

    /// Printed evaluation result
    #[serde(deserialize_with = "lenient::text")]
    pub value: Option<String>,

    /// Exception class, present when evaluation threw
    #[serde(deserialize_with = "lenient::text")]
    pub ex: Option<String>,

    #[serde(rename = "root-ex", deserialize_with = "lenient::text")]
    pub root_ex: Option<String>,

    #[serde(deserialize_with = "lenient::text_list")]
    pub status: Option<Vec<String>>,
}

impl Message {
    /// Decode one bencoded response dictionary
    pub fn from_bencode(frame: &[u8]) -> Result<Self, BencodeError> {
        bencode::decode(frame)
    }

    /// Text of a single-valued field by its wire name
    pub fn text_field(&self, name: &str) -> Option<&str> {
        match name {
            "id" => self.id.as_deref(),
            "session" => self.session.as_deref(),
            "ns" => self.ns.as_deref(),
            "out" => self.out.as_deref(),
            "err" => self.err.as_deref(),
            "value" => self.value.as_deref(),
            "ex" => self.ex.as_deref(),
            "root-ex" => self.root_ex.as_deref(),
            _ => None,
        }
    }

    /// True when the status is exactly the single marker `done`
    pub fn is_done(&self) -> bool {
        matches!(self.status.as_deref(), Some([status]) if status == "done")
    }

    pub fn has_exception(&self) -> bool {
        self.ex.as_deref().is_some_and(|ex| !ex.is_empty())
    }
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_bencode::value::Value;

    pub fn text<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        Ok(as_text(Value::deserialize(deserializer)?))
    }

    /// Non-text list items keep their position as empty strings
    pub fn text_list<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<String>>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::List(items) => Some(
                items
                    .into_iter()
                    .map(|item| as_text(item).unwrap_or_default())
                    .collect(),
            ),
            _ => None,
        })
    }

    fn as_text(value: Value) -> Option<String> {
        match value {
            Value::Bytes(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Value::Int(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
