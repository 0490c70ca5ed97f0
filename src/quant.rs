//! Global color quantization.
//!
//! One histogram pass over the whole clip buckets every pixel at a
//! quality-dependent bit depth, then the most frequent buckets are admitted
//! into up to 512 palette slots, greedily skipping anything too close to an
//! already admitted color. The result is one or two 256-color palettes
//! depending on the profile's layout.

use crate::profile::{PaletteLayout, Quality};
use rgb::RGB8;

/// Reference to one palette color: palette selector (0/1) + index.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PalEntry {
    pub pal: u8,
    pub idx: u8,
}

/// Per-channel bit depths of the histogram bucket space.
#[derive(Copy, Clone)]
struct Tier {
    rbits: u32,
    gbits: u32,
    bbits: u32,
    /// Maximum per-channel distance (in bucket space) at which a candidate
    /// is considered a duplicate of an admitted color.
    tolerance: (u32, u32, u32),
}

impl Tier {
    fn of(quality: Quality) -> Self {
        match quality {
            Quality::High => Self { rbits: 7, gbits: 6, bbits: 6, tolerance: (2, 2, 3) },
            Quality::Mid => Self { rbits: 6, gbits: 6, bbits: 5, tolerance: (1, 1, 1) },
            Quality::Low => Self { rbits: 5, gbits: 6, bbits: 5, tolerance: (1, 1, 1) },
        }
    }

    fn buckets(&self) -> usize {
        1 << (self.rbits + self.gbits + self.bbits)
    }

    fn bucket(&self, c: RGB8) -> u32 {
        let r = u32::from(c.r) >> (8 - self.rbits);
        let g = u32::from(c.g) >> (8 - self.gbits);
        let b = u32::from(c.b) >> (8 - self.bbits);
        r << (self.gbits + self.bbits) | g << self.bbits | b
    }

    fn channels(&self, bucket: u32) -> (u32, u32, u32) {
        let b = bucket & ((1 << self.bbits) - 1);
        let g = (bucket >> self.bbits) & ((1 << self.gbits) - 1);
        let r = bucket >> (self.gbits + self.bbits);
        (r, g, b)
    }

    fn color(&self, bucket: u32) -> RGB8 {
        let (r, g, b) = self.channels(bucket);
        RGB8::new(
            (r << (8 - self.rbits)) as u8,
            (g << (8 - self.gbits)) as u8,
            (b << (8 - self.bbits)) as u8,
        )
    }
}

/// Accumulates the clip-wide histogram, then builds the palettes.
pub(crate) struct PaletteBuilder {
    tier: Tier,
    layout: PaletteLayout,
    /// Indexed by bucket id. Starts at 1 per bucket so equal-count ties keep
    /// a stable total order through the sort.
    histogram: Vec<u32>,
}

impl PaletteBuilder {
    pub fn new(quality: Quality, layout: PaletteLayout) -> Self {
        let tier = Tier::of(quality);
        Self { tier, layout, histogram: vec![1; tier.buckets()] }
    }

    pub fn feed(&mut self, pixels: impl Iterator<Item = RGB8>) {
        for px in pixels {
            self.histogram[self.tier.bucket(px) as usize] += 1;
        }
    }

    /// Sort observed buckets by frequency and admit up to 512 colors.
    pub fn build(self) -> Palettes {
        let tier = self.tier;

        let mut by_count: Vec<(u32, u32)> = self
            .histogram
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 1)
            .map(|(bucket, &count)| (bucket as u32, count))
            .collect();
        // Descending by count; equal counts stay in ascending bucket-id
        // order so palette membership is deterministic.
        by_count.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let (tr, tg, tb) = tier.tolerance;
        let mut admitted: Vec<u32> = Vec::with_capacity(512);
        for &(bucket, _) in &by_count {
            let (r, g, b) = tier.channels(bucket);
            let dupe = admitted.iter().any(|&seen| {
                let (sr, sg, sb) = tier.channels(seen);
                r.abs_diff(sr) <= tr && g.abs_diff(sg) <= tg && b.abs_diff(sb) <= tb
            });
            if !dupe {
                admitted.push(bucket);
                if admitted.len() >= 512 {
                    break;
                }
            }
        }

        let mut pal = [[RGB8::new(0, 0, 0); 256]; 2];
        match self.layout {
            PaletteLayout::Single => {
                for (i, &bucket) in admitted.iter().take(256).enumerate() {
                    pal[0][i] = tier.color(bucket);
                }
            }
            PaletteLayout::Dual => {
                // Wire bytes encode indices below 127 in a single byte, so
                // the hottest colors go to the low half of each palette.
                // pal0[126] is a layout gap and stays zero.
                for (rank, &bucket) in admitted.iter().enumerate() {
                    let color = tier.color(bucket);
                    match rank {
                        0..=125 => pal[0][rank] = color,
                        126..=252 => pal[1][rank - 126] = color,
                        253..=381 => pal[0][rank - 126] = color,
                        382..=510 => pal[1][rank - 255] = color,
                        _ => break,
                    }
                }
            }
        }

        Palettes { layout: self.layout, pal, colors: admitted.len() }
    }
}

/// The session's palettes, fixed before the first frame is encoded.
pub(crate) struct Palettes {
    pub layout: PaletteLayout,
    pub pal: [[RGB8; 256]; 2],
    /// Colors actually admitted; the remaining slots are zero-filled.
    pub colors: usize,
}

impl Palettes {
    #[inline]
    pub fn color(&self, e: PalEntry) -> RGB8 {
        self.pal[usize::from(e.pal)][usize::from(e.idx)]
    }

    /// Map a 24-bit color to the closest palette entry. Linear scan over
    /// both palettes; the first entry scanned wins exact distance ties.
    /// This runs once per pixel per frame and dominates encode cost.
    #[inline]
    pub fn nearest(&self, c: RGB8) -> PalEntry {
        let mut best = PalEntry { pal: 0, idx: 0 };
        let mut best_dist = u32::MAX;
        let palettes: &[[RGB8; 256]] = match self.layout {
            PaletteLayout::Single => &self.pal[..1],
            PaletteLayout::Dual => &self.pal[..],
        };
        for (pal, colors) in palettes.iter().enumerate() {
            for (idx, &p) in colors.iter().enumerate() {
                let dist = distance_sq(c, p);
                if dist < best_dist {
                    best_dist = dist;
                    best = PalEntry { pal: pal as u8, idx: idx as u8 };
                }
            }
        }
        best
    }
}

#[inline]
fn distance_sq(a: RGB8, b: RGB8) -> u32 {
    let dr = i32::from(a.r) - i32::from(b.r);
    let dg = i32::from(a.g) - i32::from(b.g);
    let db = i32::from(a.b) - i32::from(b.b);
    (dr * dr + dg * dg + db * db) as u32
}
