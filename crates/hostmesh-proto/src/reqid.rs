use rand::Rng;
use std::fmt;

/// Length in bytes of a request id, fixed by the wire format.
pub const REQ_ID_LEN: usize = 10;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// A request id: a 10-character random token over `[A-Za-z0-9]`, unique
/// across live and persisted requests on one node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReqId([u8; REQ_ID_LEN]);

impl ReqId {
    /// Generate a fresh random request id.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; REQ_ID_LEN];
        for b in bytes.iter_mut() {
            *b = ALPHABET[rng.gen_range(0..ALPHABET.len())];
        }
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; REQ_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; REQ_ID_LEN] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // Safe: every byte is drawn from ALPHABET, which is ASCII.
        std::str::from_utf8(&self.0).unwrap_or("")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("request id must be exactly {REQ_ID_LEN} ASCII alphanumeric bytes")]
pub struct ParseReqIdError;

impl std::str::FromStr for ReqId {
    type Err = ParseReqIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != REQ_ID_LEN || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ParseReqIdError);
        }
        let mut fixed = [0u8; REQ_ID_LEN];
        fixed.copy_from_slice(bytes);
        Ok(Self(fixed))
    }
}

impl fmt::Display for ReqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ReqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReqId({})", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_fixed_length_and_alphanumeric() {
        let id = ReqId::generate();
        assert_eq!(id.as_bytes().len(), REQ_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generate_is_not_trivially_repeated() {
        let a = ReqId::generate();
        let b = ReqId::generate();
        assert_ne!(a, b, "two freshly generated ids collided, which should be vanishingly rare");
    }
}
