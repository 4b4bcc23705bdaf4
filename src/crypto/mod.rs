pub mod es256;
pub mod hmac_util;
pub mod php_serialize;
pub mod rs256;
pub mod sns;
pub mod x5c;

pub use hmac_util::{hmac_sha256_hex, verify_hmac_sha256_hex};
