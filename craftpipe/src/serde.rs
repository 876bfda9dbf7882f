//! Common serde extensions and custom types.

use std::borrow::Cow;
use std::fmt::Write;
use std::ops::Deref;

use regex::Regex;


/// Deserialize a string, borrowed if possible.
fn deserialize_str<'de, D>(deserializer: D) -> Result<Cow<'de, str>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    <Cow<'de, str> as serde::Deserialize>::deserialize(deserializer)
}

/// A regular expression deserialized from its string representation.
#[derive(Debug, Clone)]
pub struct RegexString(pub Regex);

impl Deref for RegexString {
    type Target = Regex;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> serde::Deserialize<'de> for RegexString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = deserialize_str(deserializer)?;
        Regex::new(&raw)
            .map(RegexString)
            .map_err(serde::de::Error::custom)
    }
}

/// Bytes represented as a lower case hexadecimal string, upper case is accepted when
/// deserializing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HexString<const N: usize>(pub [u8; N]);

/// Type alias for a SHA-1 hash hex string, the most common one.
pub type Sha1HashString = HexString<20>;

impl<const N: usize> Deref for HexString<N> {
    type Target = [u8; N];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<const N: usize> serde::Serialize for HexString<N> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format_hex_bytes(&self.0))
    }
}

impl<'de, const N: usize> serde::Deserialize<'de> for HexString<N> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = deserialize_str(deserializer)?;
        parse_hex_bytes::<N>(&raw)
            .map(HexString)
            .ok_or_else(|| serde::de::Error::invalid_length(raw.len(), &format!("{} hex characters", N * 2).as_str()))
    }
}

/// Parse a hex string of exactly `2 * LEN` characters, none if invalid.
pub fn parse_hex_bytes<const LEN: usize>(string: &str) -> Option<[u8; LEN]> {

    if string.len() != LEN * 2 || !string.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let mut dst = [0; LEN];
    for (dst, pair) in dst.iter_mut().zip(string.as_bytes().chunks_exact(2)) {
        // Hex digits are ASCII, so always valid UTF-8.
        let pair = std::str::from_utf8(pair).ok()?;
        *dst = u8::from_str_radix(pair, 16).ok()?;
    }

    Some(dst)

}

/// Format the given bytes as a lower case hex string.
pub fn format_hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut buf, b| {
        let _ = write!(buf, "{b:02x}");
        buf
    })
}
