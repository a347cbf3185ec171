//! Board fingerprints
//!
//! A board hashes its canonical JSON encoding under a domain tag.
//! `serde_json` maps keep keys sorted, so equal boards always produce
//! equal bytes no matter how their fields were inserted.

use sha2::{Sha256, Digest};
use super::board::Board;

/// SHA-256 digest of a board.
pub type StateHash = [u8; 32];

const BOARD_DOMAIN: &[u8] = b"TABLETOP_BOARD_V1";

fn absorb(hasher: &mut Sha256, board: &Board) {
    // Map<String, Value> serialization cannot fail.
    let bytes = serde_json::to_vec(board.fields()).unwrap_or_default();
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(&bytes);
}

/// Fingerprint of one board.
pub fn hash_board(board: &Board) -> StateHash {
    hash_boards(std::iter::once(board))
}

/// Fingerprint of a board sequence. Order matters.
pub fn hash_boards<'a>(boards: impl IntoIterator<Item = &'a Board>) -> StateHash {
    let mut hasher = Sha256::new_with_prefix(BOARD_DOMAIN);
    for board in boards {
        absorb(&mut hasher, board);
    }
    hasher.finalize().into()
}
