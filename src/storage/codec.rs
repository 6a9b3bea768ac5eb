//! Parity-based obfuscation codec for short secrets
//!
//! Phone numbers, API tokens, and the stored master key are scrambled with
//! a reversible parity trick before they hit the device: `encode` appends
//! a per-byte XOR-0xFF parity half, `scramble` then corrupts every data
//! byte with a random printable-ASCII mask, and `unscramble` walks the
//! parity back to the original, one correction per pass.
//!
//! This is obfuscation against casual inspection only. The parity half is
//! the plaintext XOR 0xFF, stored right next to the scrambled data, so the
//! true byte is one XOR away for anyone who looks. The exact round-trip
//! behavior is preserved for compatibility with provisioned devices; do
//! not extend it to new fields.

use rand::Rng;

/// Append a per-byte parity half: `parity[i] = data[i] ^ 0xFF`
///
/// Output length is twice the input length.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    out.extend_from_slice(data);
    out.extend(data.iter().map(|b| b ^ 0xFF));
    out
}

/// Scramble `message` using the thread-local RNG
///
/// See [`scramble_with`].
pub fn scramble(message: &[u8]) -> Vec<u8> {
    scramble_with(&mut rand::thread_rng(), message)
}

/// Scramble `message`: encode, then corrupt every data byte
///
/// Each byte of the data half is replaced with `byte ^ r` for a random
/// `r` in `1..=95`, re-rolled until the result differs from the original
/// and lands in printable ASCII (32..=126). The parity half is left
/// untouched, which is what makes [`unscramble`] exact.
pub fn scramble_with<R: Rng>(rng: &mut R, message: &[u8]) -> Vec<u8> {
    let mut buf = encode(message);
    for i in 0..message.len() {
        let original = buf[i];
        let mut masked = original;
        while masked == original || !(32..=126).contains(&masked) {
            masked = original ^ rng.gen_range(1..=95u8);
        }
        buf[i] = masked;
    }
    buf
}

/// Undo [`scramble`], returning the original message bytes
///
/// Runs `len / 2` correction passes. Each pass scans the data half for the
/// first byte whose XOR-0xFF parity disagrees with the stored parity half
/// and restores it from the parity; scrambled bytes are therefore repaired
/// in ascending index order, one per pass. Because the parity half was
/// computed once from the true message and never altered, the restore is
/// exact regardless of how far the data byte was perturbed.
pub fn unscramble(buffer: &[u8]) -> Vec<u8> {
    let length = buffer.len() / 2;
    let mut data = buffer[..length].to_vec();
    let parity = &buffer[length..length * 2];

    for _ in 0..length {
        if let Some(i) = (0..length).find(|&i| data[i] ^ 0xFF != parity[i]) {
            data[i] = parity[i] ^ 0xFF;
        }
    }
    data
}
