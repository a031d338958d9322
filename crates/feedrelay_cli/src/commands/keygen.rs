//! Keygen command implementation.

/// Prints a random feed key as hex, for use with `--key-hex`.
pub fn run() {
    println!("{}", super::key_or_random(None));
}
