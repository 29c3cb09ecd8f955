//! Generate relay secrets.
//!
//! `relay-keygen [FILE]` appends a new URL-safe access key to FILE
//! (default `keys.txt`) and prints it. `relay-keygen --secret` prints a hex
//! 32-byte key for `STORAGE__KEY` or `MESSAGES__PAYLOAD_KEY` instead.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use std::io::Write;
use std::path::{Path, PathBuf};
use vault::SealingKey;

const DEFAULT_KEYS_FILE: &str = "keys.txt";
const ACCESS_KEY_BYTES: usize = 32;

fn generate_access_key() -> String {
    let mut bytes = [0u8; ACCESS_KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn append_key(path: &Path, key: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {:?}", path))?;
    writeln!(file, "{}", key).with_context(|| format!("Failed to write to {:?}", path))?;
    Ok(())
}

fn main() -> Result<()> {
    let arg = std::env::args().nth(1);

    if arg.as_deref() == Some("--secret") {
        println!("{}", SealingKey::generate().to_hex());
        return Ok(());
    }

    let path = PathBuf::from(arg.unwrap_or_else(|| DEFAULT_KEYS_FILE.to_string()));
    let key = generate_access_key();
    append_key(&path, &key)?;

    println!("{}", key);
    eprintln!("Appended new access key to {:?}", path);
    Ok(())
}
