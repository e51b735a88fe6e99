//! Media payloads carried through flows as data URIs or remote URLs.
//!
//! Media never gets decoded or re-encoded on its way through the core; a
//! [`MediaAsset`] is only parsed to check that it is well formed and to read
//! its MIME type.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static MIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9!#$&^_.+-]*/[A-Za-z0-9][A-Za-z0-9!#$&^_.+-]*$")
        .expect("mime type pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("expected a 'data:' URI")]
    NotDataUri,

    #[error("data URI has no ',' separator")]
    MissingSeparator,

    #[error("data URI is not base64-encoded")]
    NotBase64,

    #[error("invalid MIME type '{0}'")]
    InvalidMimeType(String),

    #[error("data URI payload is empty")]
    EmptyPayload,

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// A self-describing binary payload or a remote locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MediaAsset {
    /// `data:<mime_type>;base64,<data>`
    Inline { mime_type: String, data: String },
    /// Backend-hosted or otherwise remote asset
    Remote { url: String },
}

impl MediaAsset {
    /// Parse either a data URI or an http(s) URL.
    pub fn parse(s: &str) -> Result<Self, MediaError> {
        if s.starts_with("data:") {
            Self::parse_data_uri(s)
        } else {
            Self::parse_url(s)
        }
    }

    /// Parse `data:<mime-type>[;param=value]*;base64,<payload>`.
    pub fn parse_data_uri(s: &str) -> Result<Self, MediaError> {
        let rest = s.strip_prefix("data:").ok_or(MediaError::NotDataUri)?;
        let (header, payload) = rest.split_once(',').ok_or(MediaError::MissingSeparator)?;

        let mut params = header.split(';');
        let mime_type = params.next().unwrap_or_default();
        if !MIME_RE.is_match(mime_type) {
            return Err(MediaError::InvalidMimeType(mime_type.to_string()));
        }
        if params.last() != Some("base64") {
            return Err(MediaError::NotBase64);
        }
        if payload.is_empty() {
            return Err(MediaError::EmptyPayload);
        }
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| MediaError::InvalidBase64(e.to_string()))?;

        Ok(MediaAsset::Inline {
            mime_type: mime_type.to_string(),
            data: payload.to_string(),
        })
    }

    /// Parse an absolute http(s) URL.
    pub fn parse_url(s: &str) -> Result<Self, MediaError> {
        let url = reqwest::Url::parse(s).map_err(|e| MediaError::InvalidUrl(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(MediaAsset::Remote { url: s.to_string() }),
            other => Err(MediaError::InvalidUrl(format!("unsupported scheme '{}'", other))),
        }
    }

    /// Build an inline asset from raw bytes.
    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        MediaAsset::Inline {
            mime_type: mime_type.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            MediaAsset::Inline { mime_type, .. } => Some(mime_type),
            MediaAsset::Remote { .. } => None,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, MediaAsset::Inline { .. })
    }

    /// Decode the payload of an inline asset. Remote assets have no bytes here.
    pub fn decode(&self) -> Option<Result<Vec<u8>, MediaError>> {
        match self {
            MediaAsset::Inline { data, .. } => Some(
                base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .map_err(|e| MediaError::InvalidBase64(e.to_string())),
            ),
            MediaAsset::Remote { .. } => None,
        }
    }

    /// String form: the data URI or the URL.
    pub fn to_uri(&self) -> String {
        match self {
            MediaAsset::Inline { mime_type, data } => {
                format!("data:{};base64,{}", mime_type, data)
            }
            MediaAsset::Remote { url } => url.clone(),
        }
    }
}

impl fmt::Display for MediaAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaAsset::Inline { mime_type, data } => {
                write!(f, "data:{};base64,{}", mime_type, data)
            }
            MediaAsset::Remote { url } => write!(f, "{}", url),
        }
    }
}

impl FromStr for MediaAsset {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MediaAsset {
    type Error = MediaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<MediaAsset> for String {
    fn from(asset: MediaAsset) -> Self {
        asset.to_uri()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_uri() {
        let asset = MediaAsset::parse("data:image/png;base64,iVBORw0KGgo=").unwrap();
        assert_eq!(asset.mime_type(), Some("image/png"));
        assert!(asset.is_inline());
        assert_eq!(asset.to_uri(), "data:image/png;base64,iVBORw0KGgo=");
    }

    #[test]
    fn test_data_uri_with_parameters() {
        let asset = MediaAsset::parse("data:text/plain;charset=utf-8;base64,aGVsbG8=").unwrap();
        assert_eq!(asset.mime_type(), Some("text/plain"));
        assert_eq!(asset.decode().unwrap().unwrap(), b"hello");
    }

    #[test]
    fn test_malformed_data_uris() {
        assert_eq!(
            MediaAsset::parse_data_uri("image/png;base64,AAAA"),
            Err(MediaError::NotDataUri)
        );
        assert_eq!(
            MediaAsset::parse("data:image/png;base64"),
            Err(MediaError::MissingSeparator)
        );
        assert_eq!(
            MediaAsset::parse("data:image/png,AAAA"),
            Err(MediaError::NotBase64)
        );
        assert_eq!(
            MediaAsset::parse("data:;base64,AAAA"),
            Err(MediaError::InvalidMimeType(String::new()))
        );
        assert_eq!(
            MediaAsset::parse("data:image/png;base64,"),
            Err(MediaError::EmptyPayload)
        );
        assert!(matches!(
            MediaAsset::parse("data:image/png;base64,not base64!"),
            Err(MediaError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_parse_url() {
        let asset = MediaAsset::parse("https://storage.example.com/logo.png").unwrap();
        assert_eq!(asset.mime_type(), None);
        assert!(asset.decode().is_none());
        assert!(MediaAsset::parse("ftp://example.com/logo.png").is_err());
        assert!(MediaAsset::parse("logo.png").is_err());
    }

    #[test]
    fn test_from_bytes_and_serde() {
        let asset = MediaAsset::from_bytes("image/jpeg", &[0xff, 0xd8, 0xff]);
        let json = serde_json::to_value(&asset).unwrap();
        assert_eq!(json, serde_json::json!("data:image/jpeg;base64,/9j/"));
        let back: MediaAsset = serde_json::from_value(json).unwrap();
        assert_eq!(back, asset);
    }
}
