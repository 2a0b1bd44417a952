//! Content identifiers and magnet link parsing.
//!
//! Every registry key is a [`ContentId`]. Magnet links that differ only in
//! trackers, display name or parameter order map to the same id, because the
//! id is taken from the info-hash alone.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

const BTIH_PREFIX: &str = "urn:btih:";
const MAX_OPAQUE_ID_LEN: usize = 128;

/// Errors raised while parsing content identifiers or magnet links.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MagnetError {
    #[error("Invalid magnet link: {reason}")]
    Malformed { reason: String },

    #[error("Magnet link has no btih exact topic")]
    MissingInfoHash,

    #[error("Invalid info hash: {value}")]
    InvalidInfoHash { value: String },

    #[error("Invalid content id: {value:?}")]
    InvalidContentId { value: String },
}

/// Registry key for one torrent.
///
/// Canonically the lowercase 40-character hex info-hash. Identifiers that are
/// not info-hashes (already resolved by an upstream metadata store) are kept
/// verbatim as opaque keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Creates the id of a torrent from its raw SHA-1 info-hash.
    pub fn from_info_hash(hash: [u8; 20]) -> Self {
        Self(hex::encode(hash))
    }

    /// Parses a magnet URI, a hex or base32 info-hash, or an opaque id.
    ///
    /// # Errors
    ///
    /// - `MagnetError::Malformed` / `MagnetError::MissingInfoHash` - Bad magnet URI
    /// - `MagnetError::InvalidContentId` - Empty input or disallowed characters
    pub fn parse(input: &str) -> Result<Self, MagnetError> {
        let input = input.trim();
        if input.starts_with("magnet:") {
            return MagnetLink::parse(input).map(|magnet| magnet.content_id);
        }

        if let Some(hash) = decode_info_hash(input) {
            return Ok(Self::from_info_hash(hash));
        }

        let opaque = !input.is_empty()
            && input.len() <= MAX_OPAQUE_ID_LEN
            && input
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if opaque {
            Ok(Self(input.to_string()))
        } else {
            Err(MagnetError::InvalidContentId {
                value: input.to_string(),
            })
        }
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id is a canonical 40-character hex info-hash.
    pub fn is_info_hash(&self) -> bool {
        self.0.len() == 40 && self.0.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map_or(self.0.len(), |(index, _)| index);
        &self.0[..end]
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentId {
    type Err = MagnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A parsed magnet link, reduced to what a swarm backend needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    content_id: ContentId,
    display_name: Option<String>,
    trackers: Vec<String>,
}

impl MagnetLink {
    /// Parses a `magnet:?xt=urn:btih:...` URI.
    ///
    /// # Errors
    ///
    /// - `MagnetError::Malformed` - Not a magnet URI
    /// - `MagnetError::MissingInfoHash` - No `xt=urn:btih:` parameter
    /// - `MagnetError::InvalidInfoHash` - Hash is neither 40 hex nor 32 base32 chars
    pub fn parse(uri: &str) -> Result<Self, MagnetError> {
        let magnet = magnet_url::Magnet::new(uri).map_err(|e| MagnetError::Malformed {
            reason: e.to_string(),
        })?;

        let hash = exact_topic_hash(uri).ok_or(MagnetError::MissingInfoHash)?;
        let info_hash = decode_info_hash(hash).ok_or_else(|| MagnetError::InvalidInfoHash {
            value: hash.to_string(),
        })?;

        Ok(Self {
            content_id: ContentId::from_info_hash(info_hash),
            display_name: magnet.display_name().map(|s| s.to_string()),
            trackers: magnet.trackers().to_vec(),
        })
    }

    /// Parses either a magnet URI or a bare content id.
    ///
    /// # Errors
    ///
    /// - Any error from [`ContentId::parse`] or [`MagnetLink::parse`]
    pub fn resolve(input: &str) -> Result<Self, MagnetError> {
        let input = input.trim();
        if input.starts_with("magnet:") {
            Self::parse(input)
        } else {
            ContentId::parse(input).map(Self::from)
        }
    }

    pub fn content_id(&self) -> &ContentId {
        &self.content_id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn trackers(&self) -> &[String] {
        &self.trackers
    }

    /// Minimal magnet URI for this link (exact topic plus percent-encoded trackers).
    pub fn to_uri(&self) -> String {
        let mut uri = format!("magnet:?xt={BTIH_PREFIX}{}", self.content_id);
        for tracker in &self.trackers {
            uri.push_str("&tr=");
            uri.push_str(&urlencoding::encode(tracker));
        }
        uri
    }
}

impl From<ContentId> for MagnetLink {
    fn from(content_id: ContentId) -> Self {
        Self {
            content_id,
            display_name: None,
            trackers: Vec::new(),
        }
    }
}

/// Finds the `xt=urn:btih:<hash>` value in the raw query string.
fn exact_topic_hash(uri: &str) -> Option<&str> {
    let (_, query) = uri.split_once('?')?;
    query
        .split('&')
        .filter_map(|param| param.split_once('='))
        .filter(|(key, _)| key.eq_ignore_ascii_case("xt") || key.starts_with("xt."))
        .find_map(|(_, value)| {
            let (prefix, hash) = value.split_at_checked(BTIH_PREFIX.len())?;
            prefix.eq_ignore_ascii_case(BTIH_PREFIX).then_some(hash)
        })
}

/// Decodes a 40-char hex or 32-char base32 info-hash.
fn decode_info_hash(value: &str) -> Option<[u8; 20]> {
    match value.len() {
        40 => {
            let mut hash = [0u8; 20];
            hex::decode_to_slice(value, &mut hash).ok()?;
            Some(hash)
        }
        32 => decode_base32(value),
        _ => None,
    }
}

/// RFC 4648 base32 without padding; 32 chars decode to exactly 20 bytes.
fn decode_base32(value: &str) -> Option<[u8; 20]> {
    let mut hash = [0u8; 20];
    let mut buffer: u32 = 0;
    let mut bits = 0;
    let mut position = 0;

    for c in value.bytes() {
        let digit = match c.to_ascii_uppercase() {
            upper @ b'A'..=b'Z' => upper - b'A',
            digit @ b'2'..=b'7' => digit - b'2' + 26,
            _ => return None,
        };
        buffer = (buffer << 5) | u32::from(digit);
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            hash[position] = (buffer >> bits) as u8;
            buffer &= (1 << bits) - 1;
            position += 1;
        }
    }

    Some(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_content_id_ignores_trackers_and_name() {
        let plain = format!("magnet:?xt=urn:btih:{HASH}");
        let with_params = format!(
            "magnet:?dn=Some+Movie&xt=urn:btih:{}&tr=udp://tracker.example.com:1337",
            HASH.to_uppercase()
        );

        let a = ContentId::parse(&plain).unwrap();
        let b = ContentId::parse(&with_params).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.as_str(), HASH);
        assert!(a.is_info_hash());
    }

    #[test]
    fn test_bare_hex_hash_is_lowercased() {
        let id = ContentId::parse(&HASH.to_uppercase()).unwrap();
        assert_eq!(id.as_str(), HASH);
    }

    #[test]
    fn test_base32_hash_matches_hex_form() {
        // base32 of 20 zero bytes is 32 'A's
        let id = ContentId::parse(&"A".repeat(32)).unwrap();
        assert_eq!(id.as_str(), "0".repeat(40));

        let magnet = format!("magnet:?xt=urn:btih:{}", "a".repeat(32));
        assert_eq!(ContentId::parse(&magnet).unwrap(), id);
    }

    #[test]
    fn test_base32_decodes_known_value() {
        // 0x01 0x02 ... 0x14 encoded with RFC 4648 base32
        let bytes: [u8; 20] = std::array::from_fn(|i| i as u8 + 1);
        assert_eq!(
            decode_base32("AEBAGBAFAYDQQCIKBMGA2DQPCAIREEYU"),
            Some(bytes)
        );
    }

    #[test]
    fn test_opaque_ids_are_kept_verbatim() {
        let id = ContentId::parse("abc123").unwrap();
        assert_eq!(id.as_str(), "abc123");
        assert!(!id.is_info_hash());
        assert_eq!(id.short(), "abc123");
    }

    #[test]
    fn test_invalid_ids_are_rejected() {
        assert!(matches!(
            ContentId::parse(""),
            Err(MagnetError::InvalidContentId { .. })
        ));
        assert!(matches!(
            ContentId::parse("../etc/passwd"),
            Err(MagnetError::InvalidContentId { .. })
        ));
    }

    #[test]
    fn test_magnet_without_btih_is_rejected() {
        let result = MagnetLink::parse("magnet:?dn=nothing+here");
        assert!(matches!(
            result,
            Err(MagnetError::MissingInfoHash | MagnetError::Malformed { .. })
        ));
    }

    #[test]
    fn test_magnet_with_short_hash_is_rejected() {
        let result = MagnetLink::parse("magnet:?xt=urn:btih:abcdef");
        assert!(matches!(
            result,
            Err(MagnetError::InvalidInfoHash { .. } | MagnetError::Malformed { .. })
        ));
    }

    #[test]
    fn test_to_uri_encodes_tracker_query_strings() {
        let magnet = MagnetLink {
            content_id: ContentId::parse(HASH).unwrap(),
            display_name: None,
            trackers: vec!["http://t.example/announce?passkey=a&b=c".to_string()],
        };

        let uri = magnet.to_uri();

        assert_eq!(
            uri,
            format!(
                "magnet:?xt=urn:btih:{HASH}&tr=http%3A%2F%2Ft.example%2Fannounce%3Fpasskey%3Da%26b%3Dc"
            )
        );
        assert_eq!(uri.matches('&').count(), 1);
        assert_eq!(ContentId::parse(&uri).unwrap().as_str(), HASH);
    }

    #[test]
    fn test_resolve_bare_id_builds_minimal_magnet() {
        let magnet = MagnetLink::resolve(HASH).unwrap();
        assert_eq!(magnet.content_id().as_str(), HASH);
        assert!(magnet.trackers().is_empty());
        assert_eq!(magnet.to_uri(), format!("magnet:?xt=urn:btih:{HASH}"));
    }
}
