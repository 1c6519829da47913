//! Decoded server replies and their typed projections.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{RedisError, RedisResult};

/// A single decoded reply frame.
///
/// `Bulk(None)` and `Array(None)` are the protocol's null markers (`$-1` and
/// `*-1`), distinct from an empty value. The three trailing variants never
/// come off the wire; they are synthesized locally for operations that timed
/// out or were withdrawn before being sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A `+` status line, e.g. `+OK`.
    Status(Bytes),
    /// A `-` error line from the server.
    Error(String),
    /// A `:` integer line.
    Integer(i64),
    /// A `$` bulk value; `None` for the null bulk.
    Bulk(Option<Bytes>),
    /// A `*` array of nested replies; `None` for the null array.
    Array(Option<Vec<Reply>>),
    /// Synthetic: the operation timed out before the message was sent.
    TimeoutNotSent,
    /// Synthetic: the operation timed out after the message was sent.
    TimeoutSent,
    /// Synthetic: the message was withdrawn unsent.
    Cancelled,
}

impl Reply {
    /// True when this reply represents a failure of any kind.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Reply::Error(_) | Reply::TimeoutNotSent | Reply::TimeoutSent | Reply::Cancelled
        )
    }

    /// Maps failure replies onto the error they deliver to the caller.
    pub(crate) fn failure(&self) -> Option<RedisError> {
        match self {
            Reply::Error(message) => Some(RedisError::Server(message.clone())),
            Reply::TimeoutNotSent => Some(RedisError::TimeoutNotSent),
            Reply::TimeoutSent => Some(RedisError::TimeoutSent),
            Reply::Cancelled => Some(RedisError::Cancelled),
            _ => None,
        }
    }

    /// Compares a status or bulk body against an expected literal, used to
    /// validate control replies such as `OK`, `QUEUED` and `PONG`.
    pub fn matches(&self, expected: &[u8]) -> bool {
        match self {
            Reply::Status(body) => &body[..] == expected,
            Reply::Bulk(Some(body)) => &body[..] == expected,
            _ => false,
        }
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Reply::Status(body) => format!("+{}", String::from_utf8_lossy(body)),
            Reply::Error(message) => format!("-{message}"),
            Reply::Integer(value) => format!(":{value}"),
            Reply::Bulk(None) => "$(nil)".to_string(),
            Reply::Bulk(Some(body)) => format!("${} bytes", body.len()),
            Reply::Array(None) => "*(nil)".to_string(),
            Reply::Array(Some(items)) => format!("*{} items", items.len()),
            Reply::TimeoutNotSent => "timeout (not sent)".to_string(),
            Reply::TimeoutSent => "timeout (sent)".to_string(),
            Reply::Cancelled => "cancelled".to_string(),
        }
    }

    fn unexpected(&self, expected: &'static str) -> RedisError {
        RedisError::UnexpectedReply {
            expected,
            actual: self.describe(),
        }
    }

    /// Projects the reply as an integer; bulk and status bodies are parsed
    /// as decimal text, the way the server encodes numbers inside arrays.
    pub fn into_i64(self) -> RedisResult<i64> {
        match self {
            Reply::Integer(value) => Ok(value),
            Reply::Status(_) | Reply::Bulk(Some(_)) => {
                let text = self.clone().into_string()?.unwrap_or_default();
                text.parse::<i64>()
                    .map_err(|_| self.unexpected("an integer"))
            }
            other => Err(other.unexpected("an integer")),
        }
    }

    /// Nonzero integers are truthy; the server uses `:1`/`:0` for predicates.
    pub fn into_bool(self) -> RedisResult<bool> {
        Ok(self.into_i64()? != 0)
    }

    pub fn into_f64(self) -> RedisResult<f64> {
        match self {
            Reply::Integer(value) => Ok(value as f64),
            Reply::Status(_) | Reply::Bulk(Some(_)) => {
                let text = self.clone().into_string()?.unwrap_or_default();
                text.parse::<f64>().map_err(|_| self.unexpected("a double"))
            }
            other => Err(other.unexpected("a double")),
        }
    }

    /// Projects the reply as raw bytes; `None` for the null bulk.
    pub fn into_bytes(self) -> RedisResult<Option<Bytes>> {
        match self {
            Reply::Bulk(body) => Ok(body),
            Reply::Status(body) => Ok(Some(body)),
            other => Err(other.unexpected("a bulk value")),
        }
    }

    /// Projects the reply as UTF-8 text; `None` for the null bulk.
    pub fn into_string(self) -> RedisResult<Option<String>> {
        match self {
            Reply::Integer(value) => Ok(Some(value.to_string())),
            other => match other.into_bytes()? {
                None => Ok(None),
                Some(body) => String::from_utf8(body.to_vec())
                    .map(Some)
                    .map_err(|_| RedisError::UnexpectedReply {
                        expected: "valid UTF-8 text",
                        actual: "invalid UTF-8 bulk value".to_string(),
                    }),
            },
        }
    }

    /// Projects the reply as the items of an array; `None` for the null array.
    pub fn into_items(self) -> RedisResult<Option<Vec<Reply>>> {
        match self {
            Reply::Array(items) => Ok(items),
            other => Err(other.unexpected("an array")),
        }
    }

    pub fn into_string_vec(self) -> RedisResult<Vec<String>> {
        let items = self.into_items()?.unwrap_or_default();
        items
            .into_iter()
            .map(|item| Ok(item.into_string()?.unwrap_or_default()))
            .collect()
    }

    pub fn into_bytes_vec(self) -> RedisResult<Vec<Option<Bytes>>> {
        let items = self.into_items()?.unwrap_or_default();
        items.into_iter().map(Reply::into_bytes).collect()
    }

    /// Folds an interleaved `member, score, member, score, ...` array into
    /// pairs, preserving order.
    pub fn into_score_pairs(self) -> RedisResult<Vec<(Bytes, f64)>> {
        let items = self.into_items()?.unwrap_or_default();
        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let Some(member) = iter.next() {
            let Some(score) = iter.next() else {
                return Err(RedisError::UnexpectedReply {
                    expected: "an even number of items",
                    actual: "an odd-length pair array".to_string(),
                });
            };
            let member = member.into_bytes()?.unwrap_or_default();
            pairs.push((member, score.into_f64()?));
        }
        Ok(pairs)
    }

    /// Folds an interleaved `field, value, ...` array into a map with text
    /// keys and binary values, the shape of an `HGETALL` reply.
    pub fn into_hash_map(self) -> RedisResult<HashMap<String, Bytes>> {
        let items = self.into_items()?.unwrap_or_default();
        let mut map = HashMap::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let Some(field) = iter.next() {
            let Some(value) = iter.next() else {
                return Err(RedisError::UnexpectedReply {
                    expected: "an even number of items",
                    actual: "an odd-length pair array".to_string(),
                });
            };
            let field = field.into_string()?.unwrap_or_default();
            map.insert(field, value.into_bytes()?.unwrap_or_default());
        }
        Ok(map)
    }

    /// Folds an interleaved pair array into a map of text keys and values,
    /// the shape of a `CONFIG GET` reply.
    pub fn into_string_map(self) -> RedisResult<HashMap<String, String>> {
        let items = self.into_items()?.unwrap_or_default();
        let mut map = HashMap::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let Some(key) = iter.next() {
            let Some(value) = iter.next() else {
                return Err(RedisError::UnexpectedReply {
                    expected: "an even number of items",
                    actual: "an odd-length pair array".to_string(),
                });
            };
            let key = key.into_string()?.unwrap_or_default();
            map.insert(key, value.into_string()?.unwrap_or_default());
        }
        Ok(map)
    }
}
