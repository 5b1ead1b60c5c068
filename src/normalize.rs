// Parcel identifier normalization used to join attribute and geometry records

/// Maps a raw parcel number to the key used for fallback matching.
///
/// The reconciler only sees this trait, so a different encoding convention
/// can be plugged in without touching the join.
pub trait MatchPolicy {
    fn normalize(&self, raw: &str) -> String;

    /// Policy name for logs
    fn name(&self) -> &str;
}

/// Width of the main parcel number in the zero-padded encoding (`MMMMSSSS`).
pub const MAIN_WIDTH: usize = 4;

/// Zero-padded `MMMMSSSS` -> `M-S` (or `M` when the sub number is zero).
///
/// Heuristic tuned to one observed encoding: `"00170001"` -> `"17-1"`,
/// `"00170000"` -> `"17"`. Identifiers shorter than [`MAIN_WIDTH`] only
/// lose their leading zeros.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroPaddedSplit;

impl MatchPolicy for ZeroPaddedSplit {
    fn normalize(&self, raw: &str) -> String {
        normalize(raw)
    }

    fn name(&self) -> &str {
        "zero-padded-split"
    }
}

/// Default normalization, see [`ZeroPaddedSplit`].
pub fn normalize(raw: &str) -> String {
    // Split on the raw string, not the zero-stripped one.
    let split_at = match raw.char_indices().nth(MAIN_WIDTH) {
        Some((idx, _)) => idx,
        None if raw.chars().count() == MAIN_WIDTH => raw.len(),
        None => return strip_zeros(raw).to_string(),
    };

    let main = strip_zeros(&raw[..split_at]);
    let sub = strip_zeros(&raw[split_at..]);

    if !sub.is_empty() {
        format!("{}-{}", main, sub)
    } else if main.is_empty() {
        "0".to_string()
    } else {
        main.to_string()
    }
}

fn strip_zeros(s: &str) -> &str {
    s.trim_start_matches('0')
}
