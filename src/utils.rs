//! Convenience functions throughout the crate go here
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use std::io::Read;
use std::path::Path;

/// Generate a vector of cryptographically secure random bytes of length `len`.
pub fn generate_random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut buf); // Uses the OS's secure RNG
    buf
}

/// URL and cookie safe token carrying `len` bytes of OS randomness.
pub fn random_token(len: usize) -> String {
    URL_SAFE_NO_PAD.encode(generate_random_bytes(len))
}

fn trim_trailing_whitespace(s: &str) -> String {
    s.trim_end().to_string()
}

/// Reads a client secret from `secret_file`, dropping the trailing newline editors leave behind.
pub fn load_client_secret<P: AsRef<Path>>(secret_file: P) -> Result<String, std::io::Error> {
    let mut file = std::fs::File::open(secret_file.as_ref())?;
    let mut contents = String::new();

    file.read_to_string(&mut contents)?;
    Ok(trim_trailing_whitespace(&contents))
}
