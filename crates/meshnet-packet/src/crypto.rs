//! HMAC32 authentication for control packets.
//!
//! A tag is the first four bytes of HMAC-SHA1. The key is the little-endian
//! concatenation of the round's base nonce, the child nonce (address
//! assignment only) and the network key.

use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Size of a truncated HMAC tag in bytes.
pub const TAG_SIZE: usize = 4;

/// A truncated HMAC-SHA1 tag.
pub type Tag = [u8; TAG_SIZE];

/// Build the HMAC key for a control packet.
pub fn hmac_key(base_nonce: u32, child_nonce: Option<u32>, network_key: u16) -> Vec<u8> {
    let mut key = Vec::with_capacity(10);
    key.extend_from_slice(&base_nonce.to_le_bytes());
    if let Some(child_nonce) = child_nonce {
        key.extend_from_slice(&child_nonce.to_le_bytes());
    }
    key.extend_from_slice(&network_key.to_le_bytes());
    key
}

fn new_mac(key: &[u8], message: &[u8]) -> HmacSha1 {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac
}

/// Compute the truncated tag of `message` under `key`.
pub fn compute_tag(key: &[u8], message: &[u8]) -> Tag {
    let digest = new_mac(key, message).finalize().into_bytes();
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&digest[..TAG_SIZE]);
    tag
}

/// Check `tag` against `message` in constant time.
pub fn verify_tag(key: &[u8], message: &[u8], tag: &Tag) -> bool {
    new_mac(key, message).verify_truncated_left(tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_key_layout() {
        assert_eq!(
            hmac_key(0x04030201, None, 0x0605),
            vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06]
        );
        assert_eq!(
            hmac_key(1, Some(0x0A0B0C0D), 2),
            vec![1, 0, 0, 0, 0x0D, 0x0C, 0x0B, 0x0A, 2, 0]
        );
    }

    #[test]
    fn test_tag_is_hmac_sha1_prefix() {
        // RFC 2202 test case 2.
        let tag = compute_tag(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(hex::encode(tag), "effcdf6a");
    }

    #[test]
    fn test_verify_tag() {
        let key = hmac_key(111, None, 222);
        let tag = compute_tag(&key, b"message");
        assert!(verify_tag(&key, b"message", &tag));
        assert!(!verify_tag(&key, b"messagE", &tag));
        assert!(!verify_tag(&hmac_key(111, None, 223), b"message", &tag));
    }
}
