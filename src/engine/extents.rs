//! Bit/extent algebra: pure functions over cluster ranges and volume
//! bitmaps. No I/O happens here — everything is synchronous and
//! allocation-only, which is what lets the driver and defrag strategy
//! reason about cluster ownership without touching the volume.

/// Inclusive cluster range `[lcn_start, lcn_end]` on a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Extent {
    pub lcn_start: u64,
    pub lcn_end: u64,
}

impl Extent {
    pub fn new(lcn_start: u64, lcn_end: u64) -> Self {
        debug_assert!(lcn_start <= lcn_end);
        Self { lcn_start, lcn_end }
    }

    pub fn len(&self) -> u64 {
        self.lcn_end - self.lcn_start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// One entry of a retrieval-pointers buffer: `(next_vcn, lcn)`.
/// `lcn < 0` marks a virtual range with no backing clusters (a
/// compression hole or a sparse gap).
#[derive(Debug, Clone, Copy)]
pub struct RetrievalPointer {
    pub next_vcn: u64,
    pub lcn: i64,
}

impl RetrievalPointer {
    pub fn real(next_vcn: u64, lcn: u64) -> Self {
        Self {
            next_vcn,
            lcn: lcn as i64,
        }
    }

    pub fn hole(next_vcn: u64) -> Self {
        Self { next_vcn, lcn: -1 }
    }
}

/// NTFS compression unit size in clusters; the bridging heuristic only
/// merges real runs separated by a hole no wider than this.
const COMPRESSION_BRIDGE_GAP: u64 = 16;

struct Run {
    lcn: Option<u64>,
    vcn_len: u64,
}

fn runs_from_pointers(ranges: &[RetrievalPointer]) -> Vec<Run> {
    let mut vcn = 0u64;
    let mut runs = Vec::with_capacity(ranges.len());
    for rp in ranges {
        let vcn_len = rp.next_vcn.saturating_sub(vcn);
        runs.push(Run {
            lcn: if rp.lcn >= 0 { Some(rp.lcn as u64) } else { None },
            vcn_len,
        });
        vcn = rp.next_vcn;
    }
    runs
}

/// Translates a VCN→LCN retrieval-pointers buffer into physical extents.
///
/// With `bridge_compressed = false`, one extent is emitted per real run.
/// With it `true`, a `real, hole, real, hole, …` chain is merged into a
/// single extent as long as each successive real run starts within
/// [`COMPRESSION_BRIDGE_GAP`] clusters of where the previous one ended —
/// the pattern a compressed file's unused-but-allocated compression unit
/// produces.
pub fn logical_ranges_to_extents(ranges: &[RetrievalPointer], bridge_compressed: bool) -> Vec<Extent> {
    let runs = runs_from_pointers(ranges);
    let mut extents = Vec::new();
    let mut i = 0;
    while i < runs.len() {
        let Some(lcn0) = runs[i].lcn else {
            i += 1;
            continue;
        };
        let mut end_lcn = lcn0 + runs[i].vcn_len.saturating_sub(1);
        let mut next_i = i + 1;
        if bridge_compressed {
            // Gap is measured start-to-start between successive real runs
            // (not end-to-start), and must be strictly increasing — a run
            // that starts at or before the one it's merging from is
            // rejected rather than bridged.
            let mut prev_start_lcn = lcn0;
            while next_i + 1 < runs.len() && runs[next_i].lcn.is_none() {
                let Some(next_lcn) = runs[next_i + 1].lcn else {
                    break;
                };
                let gap = next_lcn as i64 - prev_start_lcn as i64;
                if gap <= 0 || gap as u64 > COMPRESSION_BRIDGE_GAP {
                    break;
                }
                end_lcn = next_lcn + runs[next_i + 1].vcn_len.saturating_sub(1);
                prev_start_lcn = next_lcn;
                next_i += 2;
            }
        }
        extents.push(Extent::new(lcn0, end_lcn));
        i = next_i;
    }
    extents
}

/// `a \ b` as sets of clusters, returned as a sorted, non-overlapping
/// extent list. `extents_a_minus_b(a, [])` is a permutation of `a`.
pub fn extents_a_minus_b(a: &[Extent], b: &[Extent]) -> Vec<Extent> {
    let mut a_sorted = a.to_vec();
    a_sorted.sort();
    let mut b_sorted = b.to_vec();
    b_sorted.sort();

    let mut result = Vec::new();
    for ext in a_sorted {
        let mut pieces = vec![ext];
        for bext in &b_sorted {
            if pieces.is_empty() {
                break;
            }
            let mut next_pieces = Vec::new();
            for p in pieces {
                if bext.lcn_end < p.lcn_start || bext.lcn_start > p.lcn_end {
                    next_pieces.push(p);
                    continue;
                }
                if bext.lcn_start > p.lcn_start {
                    next_pieces.push(Extent::new(p.lcn_start, bext.lcn_start - 1));
                }
                if bext.lcn_end < p.lcn_end {
                    next_pieces.push(Extent::new(bext.lcn_end + 1, p.lcn_end));
                }
            }
            pieces = next_pieces;
        }
        result.extend(pieces);
    }
    result.sort();
    result
}

/// Splits `[start, end]` into sub-extents whose lengths are powers of 10,
/// chosen so the resulting count stays within `10^(exponent+1.3)` of the
/// span — used to retry a failing defrag wipe at finer granularity.
pub fn split_extent(start: u64, end: u64) -> Vec<Extent> {
    let count = end - start + 1;
    if count <= 1 {
        return vec![Extent::new(start, end)];
    }
    let mut exponent: i32 = 0;
    while (count as f64) > 10f64.powf(exponent as f64 + 1.3) {
        exponent += 1;
    }
    let chunk = 10u64.pow(exponent.max(0) as u32).max(1);

    let mut result = Vec::new();
    let mut cur = start;
    loop {
        let chunk_end = (cur + chunk - 1).min(end);
        result.push(Extent::new(cur, chunk_end));
        if chunk_end == end {
            break;
        }
        cur = chunk_end + 1;
    }
    result
}

/// Packed little-endian bit-per-cluster allocation map, bit 1 = allocated.
/// `starting_lcn` is always 0 for the buffers this crate queries.
#[derive(Debug, Clone)]
pub struct VolumeBitmap {
    bits: Vec<u8>,
    pub total_clusters: u64,
}

impl VolumeBitmap {
    pub fn from_bytes(bits: Vec<u8>, total_clusters: u64) -> Self {
        Self { bits, total_clusters }
    }

    pub fn check_mapped_bit(&self, lcn: u64) -> bool {
        let byte = self.bits[(lcn / 8) as usize];
        (byte >> (lcn % 8)) & 1 == 1
    }
}

/// Tallies free/allocated clusters across `extents`. When `out_allocated`
/// is given, every allocated cluster is appended to it as a singleton
/// extent, for the caller to subdivide around.
pub fn check_extents(
    extents: &[Extent],
    bitmap: &VolumeBitmap,
    mut out_allocated: Option<&mut Vec<Extent>>,
) -> (u64, u64) {
    let mut free = 0u64;
    let mut allocated = 0u64;
    for ext in extents {
        for lcn in ext.lcn_start..=ext.lcn_end {
            if bitmap.check_mapped_bit(lcn) {
                allocated += 1;
                if let Some(out) = out_allocated.as_deref_mut() {
                    out.push(Extent::new(lcn, lcn));
                }
            } else {
                free += 1;
            }
        }
    }
    (free, allocated)
}
