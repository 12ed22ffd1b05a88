//! The seven generic mutation primitives and the adaptive roulette-wheel
//! selector that picks among them.

use crate::util::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutKind {
    BitFlip,
    ByteFlip,
    ByteInsert,
    ByteDelete,
    SeqRepeat,
    SeqDelete,
    NumMutate,
}

const ALL_KINDS: [MutKind; 7] = [
    MutKind::BitFlip,
    MutKind::ByteFlip,
    MutKind::ByteInsert,
    MutKind::ByteDelete,
    MutKind::SeqRepeat,
    MutKind::SeqDelete,
    MutKind::NumMutate,
];

fn index_of(kind: MutKind) -> usize {
    ALL_KINDS.iter().position(|k| *k == kind).unwrap()
}

fn base_priority(kind: MutKind) -> f64 {
    match kind {
        MutKind::BitFlip => 1.0,
        MutKind::ByteFlip => 1.0,
        MutKind::ByteInsert => 0.9,
        MutKind::ByteDelete => 0.9,
        MutKind::SeqRepeat => 0.8,
        MutKind::SeqDelete => 0.8,
        MutKind::NumMutate => 1.1,
    }
}

fn initial_score(kind: MutKind) -> f64 {
    match kind {
        MutKind::BitFlip | MutKind::ByteFlip | MutKind::NumMutate => 6.0,
        _ => 5.0,
    }
}

/// "textish" formats (JSON/XML/CSV/text) favour number and sequence
/// mutation over raw bit/byte flips.
fn is_textish(ftype: &str) -> bool {
    ["json", "text", "xml", "csv"]
        .iter()
        .any(|s| ftype.contains(s))
}

/// Structured binaries (JPEG/ELF/PDF) favour insert/delete/sequences.
fn is_structured_binary(ftype: &str) -> bool {
    ["jpeg", "jpg", "elf", "pdf"].iter().any(|s| ftype.contains(s))
}

/// One buffer-to-buffer mutation primitive.
pub fn mutate_bytes(data: &[u8], kind: MutKind, rng: &mut Rng) -> Option<Vec<u8>> {
    match kind {
        MutKind::BitFlip => bit_flip(data, rng),
        MutKind::ByteFlip => byte_flip(data, rng),
        MutKind::ByteInsert => byte_insert(data, rng),
        MutKind::ByteDelete => byte_delete(data, rng),
        MutKind::SeqRepeat => seq_repeat(data, rng),
        MutKind::SeqDelete => seq_delete(data, rng),
        MutKind::NumMutate => num_mutate(data, rng),
    }
}

fn bit_flip(data: &[u8], rng: &mut Rng) -> Option<Vec<u8>> {
    if data.is_empty() {
        return None;
    }
    let mut out = data.to_vec();
    let pos = rng.rand_range(0, data.len() as i64 - 1) as usize;
    let bit = rng.rand_range(0, 7) as u32;
    out[pos] ^= 1 << bit;
    Some(out)
}

fn byte_flip(data: &[u8], rng: &mut Rng) -> Option<Vec<u8>> {
    if data.is_empty() {
        return None;
    }
    let mut out = data.to_vec();
    let pos = rng.rand_range(0, data.len() as i64 - 1) as usize;
    out[pos] ^= 0xFF;
    Some(out)
}

fn byte_insert(data: &[u8], rng: &mut Rng) -> Option<Vec<u8>> {
    let pos = rng.rand_range(0, data.len() as i64) as usize;
    let byte = rng.rand_range(0, 255) as u8;
    let mut out = Vec::with_capacity(data.len() + 1);
    out.extend_from_slice(&data[..pos]);
    out.push(byte);
    out.extend_from_slice(&data[pos..]);
    Some(out)
}

fn byte_delete(data: &[u8], rng: &mut Rng) -> Option<Vec<u8>> {
    if data.is_empty() {
        return None;
    }
    let pos = rng.rand_range(0, data.len() as i64 - 1) as usize;
    let mut out = Vec::with_capacity(data.len() - 1);
    out.extend_from_slice(&data[..pos]);
    out.extend_from_slice(&data[pos + 1..]);
    Some(out)
}

fn seq_repeat(data: &[u8], rng: &mut Rng) -> Option<Vec<u8>> {
    if data.is_empty() {
        return None;
    }
    let max_len = data.len().min(16) as i64;
    let seq_len = rng.rand_range(1, max_len) as usize;
    let pos = rng.rand_range(0, (data.len() - seq_len) as i64) as usize;
    let repeat = rng.rand_range(2, 8) as usize;

    let mut out = Vec::with_capacity(data.len() + seq_len * (repeat - 1));
    out.extend_from_slice(&data[..pos]);
    for _ in 0..repeat {
        out.extend_from_slice(&data[pos..pos + seq_len]);
    }
    out.extend_from_slice(&data[pos + seq_len..]);
    Some(out)
}

fn seq_delete(data: &[u8], rng: &mut Rng) -> Option<Vec<u8>> {
    if data.is_empty() {
        return None;
    }
    let max_len = data.len().min(16) as i64;
    let seq_len = (rng.rand_range(1, max_len) as usize).min(data.len());
    let pos = rng.rand_range(0, (data.len() - seq_len) as i64) as usize;

    let mut out = Vec::with_capacity(data.len() - seq_len);
    out.extend_from_slice(&data[..pos]);
    out.extend_from_slice(&data[pos + seq_len..]);
    Some(out)
}

fn num_mutate(data: &[u8], rng: &mut Rng) -> Option<Vec<u8>> {
    if data.len() < 4 {
        return None;
    }
    let mut out = data.to_vec();
    for byte in out.iter_mut() {
        if byte.is_ascii_digit() {
            match rng.rand_range(0, 3) {
                0 => *byte = if *byte < b'9' { *byte + 1 } else { b'0' },
                1 => *byte = if *byte > b'0' { *byte - 1 } else { b'9' },
                2 => *byte = b'0',
                _ => *byte = b'9',
            }
            return Some(out);
        }
    }
    None
}

/// Owns the per-mutator learned scores and the cached format context;
/// passed explicitly through strategies rather than held as module statics.
#[derive(Debug, Clone)]
pub struct AdaptiveSelector {
    scores: [f64; 7],
    last_ftype: String,
}

impl Default for AdaptiveSelector {
    fn default() -> Self {
        let mut scores = [0.0; 7];
        for kind in ALL_KINDS {
            scores[index_of(kind)] = initial_score(kind);
        }
        Self {
            scores,
            last_ftype: String::new(),
        }
    }
}

impl AdaptiveSelector {
    pub fn new() -> Self {
        Self::default()
    }

    fn clamp_all(&mut self) {
        for s in self.scores.iter_mut() {
            *s = s.clamp(1.0, 10.0);
        }
    }

    fn adjust(&mut self, kind: MutKind, success: bool, ftype: &str) {
        let idx = index_of(kind);
        self.scores[idx] += if success { 2.0 } else { -1.0 };
        self.scores[idx] = self.scores[idx].clamp(1.0, 10.0);

        if is_textish(ftype) {
            self.scores[index_of(MutKind::NumMutate)] += 0.2;
            self.scores[index_of(MutKind::SeqRepeat)] += 0.1;
            self.scores[index_of(MutKind::SeqDelete)] += 0.1;
        } else if is_structured_binary(ftype) {
            self.scores[index_of(MutKind::ByteInsert)] += 0.15;
            self.scores[index_of(MutKind::ByteDelete)] += 0.15;
            self.scores[index_of(MutKind::SeqRepeat)] += 0.1;
            self.scores[index_of(MutKind::SeqDelete)] += 0.1;
            self.scores[index_of(MutKind::BitFlip)] += 0.05;
            self.scores[index_of(MutKind::ByteFlip)] += 0.05;
        } else {
            self.scores[index_of(MutKind::ByteInsert)] += 0.1;
            self.scores[index_of(MutKind::ByteDelete)] += 0.1;
        }
        self.clamp_all();
    }

    fn format_boost(kind: MutKind, ftype: &str) -> f64 {
        if is_textish(ftype) {
            match kind {
                MutKind::NumMutate => 1.6,
                MutKind::SeqRepeat => 1.3,
                MutKind::SeqDelete => 1.2,
                MutKind::ByteInsert => 1.1,
                MutKind::ByteDelete => 1.0,
                MutKind::BitFlip => 0.8,
                MutKind::ByteFlip => 0.9,
            }
        } else if is_structured_binary(ftype) {
            match kind {
                MutKind::BitFlip => 1.05,
                MutKind::ByteFlip => 1.05,
                MutKind::ByteInsert => 1.2,
                MutKind::ByteDelete => 1.2,
                MutKind::SeqRepeat => 1.15,
                MutKind::SeqDelete => 1.1,
                MutKind::NumMutate => 0.8,
            }
        } else {
            match kind {
                MutKind::BitFlip => 0.9,
                MutKind::ByteFlip => 0.95,
                MutKind::ByteInsert => 1.1,
                MutKind::ByteDelete => 1.1,
                MutKind::SeqRepeat => 1.1,
                MutKind::SeqDelete => 1.05,
                MutKind::NumMutate => 1.0,
            }
        }
    }

    /// Roulette-wheel pick, weighted by `score * base_priority * format_boost`.
    pub fn pick(&mut self, ftype: &str, rng: &mut Rng) -> MutKind {
        self.last_ftype = ftype.to_string();

        let mut weights = [0.0f64; 7];
        let mut total = 0.0;
        for kind in ALL_KINDS {
            let idx = index_of(kind);
            let w =
                (self.scores[idx] * base_priority(kind) * Self::format_boost(kind, ftype)).max(0.1);
            weights[idx] = w;
            total += w;
        }

        let r = rng.rand_range(0, 1_000_000) as f64;
        let target = total * r / 1_000_000.0;
        let mut acc = 0.0;
        for kind in ALL_KINDS {
            acc += weights[index_of(kind)];
            if acc >= target {
                return kind;
            }
        }
        MutKind::BitFlip
    }

    /// Applies `kind` to `data`, then updates the learned score for `kind`
    /// under the cached (or given) format context.
    pub fn mutate(&mut self, data: &[u8], kind: MutKind, ftype: &str, rng: &mut Rng) -> Option<Vec<u8>> {
        let result = mutate_bytes(data, kind, rng);
        self.adjust(kind, result.is_some(), ftype);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_insert_grows_by_one() {
        let mut rng = Rng::new(1);
        let out = byte_insert(b"abc", &mut rng).unwrap();
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn byte_delete_shrinks_by_one() {
        let mut rng = Rng::new(1);
        let out = byte_delete(b"abc", &mut rng).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn bit_flip_and_byte_flip_preserve_length() {
        let mut rng = Rng::new(1);
        assert_eq!(bit_flip(b"abcdef", &mut rng).unwrap().len(), 6);
        assert_eq!(byte_flip(b"abcdef", &mut rng).unwrap().len(), 6);
    }

    #[test]
    fn num_mutate_requires_four_bytes() {
        let mut rng = Rng::new(1);
        assert!(num_mutate(b"1", &mut rng).is_none());
        assert!(num_mutate(b"abc1", &mut rng).is_some());
    }

    #[test]
    fn seq_repeat_grows_by_len_times_repeat_minus_one() {
        let mut rng = Rng::new(123);
        let data = b"0123456789abcdef";
        let before = data.len();
        let out = seq_repeat(data, &mut rng).unwrap();
        assert!(out.len() > before);
    }

    #[test]
    fn empty_buffer_fails_every_primitive_except_insert() {
        let mut rng = Rng::new(1);
        assert!(bit_flip(b"", &mut rng).is_none());
        assert!(byte_flip(b"", &mut rng).is_none());
        assert!(byte_delete(b"", &mut rng).is_none());
        assert!(seq_repeat(b"", &mut rng).is_none());
        assert!(seq_delete(b"", &mut rng).is_none());
        assert!(byte_insert(b"", &mut rng).is_some());
    }

    #[test]
    fn scores_stay_within_clamp_bounds_after_many_updates() {
        let mut sel = AdaptiveSelector::new();
        let mut rng = Rng::new(99);
        for _ in 0..500 {
            let kind = sel.pick("json", &mut rng);
            let _ = sel.mutate(b"{\"n\":1}", kind, "json", &mut rng);
        }
        for s in sel.scores {
            assert!((1.0..=10.0).contains(&s));
        }
    }
}
