//! Greedy run-length delta encoder.
//!
//! Compares the current register vector against the vector the
//! subscriber last received and emits only the changed indices,
//! grouping consecutive changes into runs.

use bytes::{BufMut, Bytes, BytesMut};

use crate::delta::{MAX_RUN, OP_PAIR, OP_RUN, PAIR_LEN, RUN_HEADER_LEN};

/// Encode the difference between `current` and `previous`.
///
/// Indices where both vectors agree are skipped. A shorter `previous`
/// never matches beyond its length, so those indices always count as
/// changed. An identical pair of vectors yields an empty buffer.
///
/// Runs are capped at [`MAX_RUN`] entries; a longer stretch of changes
/// is split into consecutive run records.
pub fn encode(current: &[u8], previous: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    let unchanged = |i: usize| previous.get(i) == Some(&current[i]);

    let mut i = 0;
    while i < current.len() {
        if unchanged(i) {
            i += 1;
            continue;
        }

        let start = i;
        while i < current.len() && i - start < MAX_RUN && !unchanged(i) {
            i += 1;
        }

        put_record(&mut buf, start, &current[start..i]);
    }

    buf.freeze()
}

/// Encode the whole vector as consecutive run records of up to
/// [`MAX_RUN`] entries, without diffing.
///
/// Used to prime a fresh subscriber. A single trailing register is
/// still emitted as a one-entry run record.
pub fn snapshot(current: &[u8]) -> Bytes {
    let chunks = current.len().div_ceil(MAX_RUN);
    let mut buf = BytesMut::with_capacity(current.len() + chunks * RUN_HEADER_LEN);

    for (n, chunk) in current.chunks(MAX_RUN).enumerate() {
        put_run(&mut buf, n * MAX_RUN, chunk);
    }

    buf.freeze()
}

// ── Internal ─────────────────────────────────────────────────────

fn put_record(buf: &mut BytesMut, start: usize, values: &[u8]) {
    match values {
        [value] => {
            buf.reserve(PAIR_LEN);
            buf.put_u8(OP_PAIR);
            buf.put_u16_le(start as u16);
            buf.put_u8(*value);
        }
        _ => put_run(buf, start, values),
    }
}

fn put_run(buf: &mut BytesMut, start: usize, values: &[u8]) {
    debug_assert!(values.len() <= MAX_RUN);
    buf.reserve(RUN_HEADER_LEN + values.len());
    buf.put_u8(OP_RUN);
    buf.put_u16_le(start as u16);
    buf.put_u8(values.len() as u8);
    buf.put_slice(values);
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_encode_empty() {
        let state = vec![5u8; 1000];
        assert!(encode(&state, &state).is_empty());
        assert!(encode(&[], &[]).is_empty());
    }

    #[test]
    fn isolated_change_is_pair() {
        let prev = [10, 20, 30, 40, 50];
        let cur = [10, 20, 31, 40, 50];
        assert_eq!(&encode(&cur, &prev)[..], &[0x01, 0x02, 0x00, 0x1F]);
    }

    #[test]
    fn consecutive_changes_are_one_run() {
        let prev = [1u8; 10];
        let mut cur = prev;
        cur[3..7].copy_from_slice(&[9, 8, 7, 6]);
        let out = encode(&cur, &prev);
        assert_eq!(out.len(), 4 + 4);
        assert_eq!(&out[..], &[0x02, 0x03, 0x00, 0x04, 9, 8, 7, 6]);
    }

    #[test]
    fn gap_splits_into_separate_records() {
        let prev = [1u8; 6];
        let cur = [2, 1, 2, 2, 1, 2];
        let out = encode(&cur, &prev);
        assert_eq!(
            &out[..],
            &[
                0x01, 0x00, 0x00, 2, // pair at 0
                0x02, 0x02, 0x00, 0x02, 2, 2, // run at 2..4
                0x01, 0x05, 0x00, 2, // pair at 5
            ]
        );
    }

    #[test]
    fn long_run_splits_at_255() {
        let prev = vec![1u8; 600];
        let cur = vec![2u8; 600];
        let out = encode(&cur, &prev);
        // 255 + 255 + 90
        assert_eq!(out.len(), 3 * RUN_HEADER_LEN + 600);
        assert_eq!(&out[..4], &[0x02, 0x00, 0x00, 0xFF]);
        assert_eq!(&out[259..263], &[0x02, 0xFF, 0x00, 0xFF]);
        assert_eq!(&out[518..522], &[0x02, 0xFE, 0x01, 90]);
    }

    #[test]
    fn run_of_exactly_255_is_single_record() {
        let prev = vec![1u8; 255];
        let cur = vec![2u8; 255];
        let out = encode(&cur, &prev);
        assert_eq!(out.len(), RUN_HEADER_LEN + 255);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn run_cap_can_leave_a_trailing_pair() {
        let prev = vec![1u8; 256];
        let cur = vec![2u8; 256];
        let out = encode(&cur, &prev);
        assert_eq!(out.len(), RUN_HEADER_LEN + 255 + PAIR_LEN);
        assert_eq!(&out[259..], &[0x01, 0xFF, 0x00, 2]);
    }

    #[test]
    fn short_previous_counts_as_changed() {
        let cur = [7u8, 7, 7];
        let out = encode(&cur, &[7]);
        assert_eq!(&out[..], &[0x02, 0x01, 0x00, 0x02, 7, 7]);
    }

    #[test]
    fn zero_bootstrap_changes_everything() {
        let cur = [10u8, 20, 30];
        let out = encode(&cur, &[0, 0, 0]);
        assert_eq!(&out[..], &[0x02, 0x00, 0x00, 0x03, 10, 20, 30]);
    }

    #[test]
    fn snapshot_matches_scenario_bytes() {
        let out = snapshot(&[10, 20, 30, 40, 50]);
        assert_eq!(
            &out[..],
            &[0x02, 0x00, 0x00, 0x05, 0x0A, 0x14, 0x1E, 0x28, 0x32]
        );
    }

    #[test]
    fn snapshot_chunks_at_255() {
        let state = vec![42u8; 10_000];
        let out = snapshot(&state);
        let records = 10_000usize.div_ceil(255);
        assert_eq!(out.len(), records * RUN_HEADER_LEN + 10_000);
        // Last chunk: 10_000 - 39 * 255 = 55 entries at index 9945.
        let tail = out.len() - (RUN_HEADER_LEN + 55);
        assert_eq!(&out[tail..tail + 4], &[0x02, 0xD9, 0x26, 55]);
    }

    #[test]
    fn snapshot_of_one_register_is_a_run() {
        assert_eq!(&snapshot(&[9])[..], &[0x02, 0x00, 0x00, 0x01, 9]);
        assert!(snapshot(&[]).is_empty());
    }
}
