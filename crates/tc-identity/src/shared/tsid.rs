//! TSID Generator
//!
//! Time-sorted identifiers encoded as 13-character Crockford Base32 strings.
//! Used for every entity id (tenants, users, clients, tokens).

use rand::Rng;
use std::sync::atomic::{AtomicU16, Ordering};

/// Crockford Base32 alphabet (excludes I, L, O, U)
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

static COUNTER: AtomicU16 = AtomicU16::new(0);

pub struct TsidGenerator;

impl TsidGenerator {
    /// Layout (64 bits): 42 bits millisecond timestamp, 10 bits random,
    /// 12 bits counter.
    pub fn generate() -> String {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let counter = COUNTER.fetch_add(1, Ordering::SeqCst) as u64;
        let random: u64 = rand::thread_rng().gen::<u16>() as u64 & 0x3FF;

        let tsid = ((now & 0x3FF_FFFF_FFFF) << 22) | (random << 12) | (counter & 0xFFF);
        encode_crockford(tsid)
    }

    /// Millisecond timestamp embedded in a TSID, if it decodes.
    pub fn timestamp_millis(tsid: &str) -> Option<i64> {
        decode_crockford(tsid).map(|v| (v >> 22) as i64)
    }
}

fn encode_crockford(mut value: u64) -> String {
    let mut result = [b'0'; 13];
    for slot in result.iter_mut().rev() {
        *slot = ALPHABET[(value & 0x1F) as usize];
        value >>= 5;
    }
    result.iter().map(|&b| b as char).collect()
}

fn decode_crockford(s: &str) -> Option<u64> {
    if s.len() != 13 {
        return None;
    }

    let mut result: u64 = 0;
    for c in s.chars() {
        let c = c.to_ascii_uppercase();
        let val = ALPHABET.iter().position(|&a| a as char == c)? as u64;
        result = (result << 5) | val;
    }
    Some(result)
}
