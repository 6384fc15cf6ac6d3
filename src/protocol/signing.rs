//! Request signing for the game wire protocol
//!
//! Every POST body carries a verify key derived from the full request URL and
//! a shared secret; the servers reject unsigned requests.

use md5::{Digest, Md5};

const SALT: &str = "b6bd8a93c54cc404c80d5a6833ba12eb";

/// Hex-encoded MD5 digest, also used for the password field at login
pub fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Signed form body for a request to `url`
pub fn sign_request(url: &str) -> String {
    format!("&verifyKey={}", md5_hex(&format!("{url}{SALT}")))
}
