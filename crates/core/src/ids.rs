//! Identifier, PIN and timestamp generation

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::Rng;

/// Sortable alphabet for the timestamp prefix of push ids
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Number of digits in a room PIN
pub const PIN_LENGTH: usize = 4;

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate a 20 character key whose first 8 characters sort by creation time
pub fn push_id() -> String {
    push_id_at(now_millis(), &mut rand::thread_rng())
}

/// Generate a push id for a given timestamp
pub fn push_id_at<R: Rng + ?Sized>(now_ms: i64, rng: &mut R) -> String {
    let mut ts = now_ms.max(0) as u64;
    let mut prefix = [b'-'; 8];
    for slot in prefix.iter_mut().rev() {
        *slot = PUSH_CHARS[(ts % 64) as usize];
        ts /= 64;
    }

    let mut random = [0u8; 9];
    rng.fill(&mut random);

    let mut id: String = prefix.iter().map(|b| *b as char).collect();
    id.push_str(&URL_SAFE_NO_PAD.encode(random));
    id
}

/// Participant id for the `index`-th (zero based) name of a list
pub fn participant_id(index: usize, now_ms: i64) -> String {
    format!("p{}_{}", index + 1, now_ms)
}

/// Random zero-padded 4-digit PIN
pub fn generate_pin<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{:04}", rng.gen_range(0..10_000u32))
}
