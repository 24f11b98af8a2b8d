// Opaque byte payloads crossing the pool boundary

use std::borrow::Cow;
use std::fmt;
use std::str::Utf8Error;

/// Opaque byte sequence handed across the pool boundary.
///
/// The pool never interprets a payload beyond handing it to the interpreter:
/// script sources must be valid UTF-8 (checked at load time), message
/// payloads and replies pass through verbatim. Decoding into host-specific
/// values is the embedding adapter's job.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Create a payload from raw bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the payload, returning the raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// View the payload as UTF-8 text, failing on invalid bytes
    pub fn as_utf8(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.0)
    }

    /// View the payload as text, replacing invalid UTF-8 sequences
    pub fn to_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self(text.into_bytes())
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Truncate so a large script source doesn't flood logs
        let text = self.to_text();
        if text.chars().count() > 64 {
            let head: String = text.chars().take(64).collect();
            write!(f, "Payload({:?}.. {} bytes)", head, self.0.len())
        } else {
            write!(f, "Payload({:?})", text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_from_str_round_trips() {
        let payload = Payload::from("return 1+1");
        assert_eq!(payload.as_utf8().unwrap(), "return 1+1");
        assert_eq!(payload.len(), 10);
        assert!(!payload.is_empty());
    }

    #[test]
    fn default_payload_is_empty() {
        let payload = Payload::default();
        assert!(payload.is_empty());
        assert_eq!(payload.as_bytes(), b"");
    }

    #[test]
    fn invalid_utf8_is_rejected_but_lossy_text_works() {
        let payload = Payload::new(vec![0xff, 0xfe, 0xfd]);
        assert!(payload.as_utf8().is_err());
        assert_eq!(payload.to_text().chars().count(), 3);
    }

    #[test]
    fn debug_output_truncates_long_payloads() {
        let payload = Payload::from("x".repeat(200));
        let debug = format!("{:?}", payload);
        assert!(debug.contains("200 bytes"));
    }
}
