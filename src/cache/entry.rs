//! Cache entries and the record format stored in the small-value tier.
//!
//! The small-value tier holds one [`StoredValue`] per key: either the payload
//! itself or a marker naming the file that holds it. The record is a tagged
//! binary frame, so telling the two apart never depends on inspecting payload
//! bytes.
//!
//! ```text
//! [version u8][tag u8][stored_at ms i64][expires_at ms i64][size u64]
//! [content_type len u16][content_type][payload | file name]
//! ```

use std::path::PathBuf;

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;
use time::OffsetDateTime;

const FORMAT_VERSION: u8 = 1;
const TAG_INLINE: u8 = 0;
const TAG_SPILLED: u8 = 1;
const HEADER_LEN: usize = 1 + 1 + 8 + 8 + 8 + 2;

/// Which tier served (or stores) an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Inline,
    Disk,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Inline => "inline",
            Tier::Disk => "disk",
        }
    }
}

/// Where an entry's payload lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Inline,
    Disk { path: PathBuf },
}

/// A resolved cache entry with its payload loaded.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub content_type: String,
    pub size_bytes: u64,
    pub stored_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub location: Location,
    pub body: Bytes,
}

impl CacheEntry {
    pub fn tier(&self) -> Tier {
        match self.location {
            Location::Inline => Tier::Inline,
            Location::Disk { .. } => Tier::Disk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntryMeta {
    pub content_type: String,
    pub size_bytes: u64,
    pub stored_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoredValue {
    Inline { meta: EntryMeta, body: Bytes },
    Spilled { meta: EntryMeta, file_name: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("stored value is truncated")]
    Truncated,
    #[error("unsupported stored value version {0}")]
    UnknownVersion(u8),
    #[error("unknown stored value tag {0}")]
    UnknownTag(u8),
    #[error("stored value field `{0}` is not valid UTF-8")]
    InvalidUtf8(&'static str),
    #[error("stored value timestamp is out of range")]
    InvalidTimestamp,
    #[error("inline payload length {actual} does not match recorded size {recorded}")]
    SizeMismatch { recorded: u64, actual: u64 },
}

impl StoredValue {
    pub fn meta(&self) -> &EntryMeta {
        match self {
            StoredValue::Inline { meta, .. } | StoredValue::Spilled { meta, .. } => meta,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let (tag, meta, tail): (u8, &EntryMeta, &[u8]) = match self {
            StoredValue::Inline { meta, body } => (TAG_INLINE, meta, body.as_ref()),
            StoredValue::Spilled { meta, file_name } => (TAG_SPILLED, meta, file_name.as_bytes()),
        };
        let content_type = truncate_content_type(&meta.content_type);

        let mut out = Vec::with_capacity(HEADER_LEN + content_type.len() + tail.len());
        out.put_u8(FORMAT_VERSION);
        out.put_u8(tag);
        out.put_i64(unix_millis(meta.stored_at));
        out.put_i64(unix_millis(meta.expires_at));
        out.put_u64(meta.size_bytes);
        out.put_u16(content_type.len() as u16);
        out.put_slice(content_type.as_bytes());
        out.put_slice(tail);
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        let mut buf = raw;
        if buf.remaining() < HEADER_LEN {
            return Err(CodecError::Truncated);
        }

        let version = buf.get_u8();
        if version != FORMAT_VERSION {
            return Err(CodecError::UnknownVersion(version));
        }
        let tag = buf.get_u8();
        let stored_at = from_unix_millis(buf.get_i64())?;
        let expires_at = from_unix_millis(buf.get_i64())?;
        let size_bytes = buf.get_u64();
        let content_type_len = usize::from(buf.get_u16());

        if buf.remaining() < content_type_len {
            return Err(CodecError::Truncated);
        }
        let content_type = std::str::from_utf8(&buf[..content_type_len])
            .map_err(|_| CodecError::InvalidUtf8("content_type"))?
            .to_string();
        buf.advance(content_type_len);

        let meta = EntryMeta {
            content_type,
            size_bytes,
            stored_at,
            expires_at,
        };

        match tag {
            TAG_INLINE => {
                let actual = buf.len() as u64;
                if actual != size_bytes {
                    return Err(CodecError::SizeMismatch {
                        recorded: size_bytes,
                        actual,
                    });
                }
                Ok(StoredValue::Inline {
                    meta,
                    body: Bytes::copy_from_slice(buf),
                })
            }
            TAG_SPILLED => {
                let file_name = std::str::from_utf8(buf)
                    .map_err(|_| CodecError::InvalidUtf8("file_name"))?
                    .to_string();
                Ok(StoredValue::Spilled { meta, file_name })
            }
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

fn truncate_content_type(content_type: &str) -> &str {
    if content_type.len() <= usize::from(u16::MAX) {
        return content_type;
    }
    let mut end = usize::from(u16::MAX);
    while !content_type.is_char_boundary(end) {
        end -= 1;
    }
    &content_type[..end]
}

/// Milliseconds since the epoch; the unit of every stored timestamp and index score.
pub(crate) fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_unix_millis(millis: i64) -> Result<OffsetDateTime, CodecError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|_| CodecError::InvalidTimestamp)
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    fn meta(size: u64) -> EntryMeta {
        let stored_at = OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("valid ts");
        EntryMeta {
            content_type: "text/css".to_string(),
            size_bytes: size,
            stored_at,
            expires_at: stored_at + Duration::minutes(10),
        }
    }

    #[test]
    fn inline_and_spilled_values_are_distinguished_by_tag() {
        let spilled = StoredValue::Spilled {
            meta: meta(500_000),
            file_name: "ab".repeat(32),
        };
        let decoded = StoredValue::decode(&spilled.encode()).expect("decodes");
        assert_eq!(decoded, spilled);

        // An inline payload that happens to look like a file reference stays inline.
        let body = Bytes::from_static(b"file:/etc/passwd");
        let inline = StoredValue::Inline {
            meta: meta(body.len() as u64),
            body,
        };
        let decoded = StoredValue::decode(&inline.encode()).expect("decodes");
        assert!(matches!(decoded, StoredValue::Inline { .. }));
        assert_eq!(decoded, inline);
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(StoredValue::decode(b""), Err(CodecError::Truncated));
        assert_eq!(
            StoredValue::decode(b"body{color:red}body{color:red}"),
            Err(CodecError::UnknownVersion(b'b'))
        );

        let mut frame = StoredValue::Inline {
            meta: meta(3),
            body: Bytes::from_static(b"abc"),
        }
        .encode();
        frame.pop();
        assert_eq!(
            StoredValue::decode(&frame),
            Err(CodecError::SizeMismatch {
                recorded: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut frame = StoredValue::Inline {
            meta: meta(0),
            body: Bytes::new(),
        }
        .encode();
        frame[1] = 9;
        assert_eq!(StoredValue::decode(&frame), Err(CodecError::UnknownTag(9)));
    }
}
