//! Target profiles and the format's version byte.
//!
//! The container knows eight numbered profiles. Instead of branching on a
//! profile enum all over the encoder, everything the encoder varies per
//! target lives in one descriptor struct.

/// Everything that changes per target platform.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Profile {
    /// Required frame size for fixed-resolution targets. `None` accepts any
    /// size (still divisible by 4 in both dimensions).
    pub dimensions: Option<(u32, u32)>,
    pub layout: PaletteLayout,
    /// Similarity ratio at or above which adjacent frames are replaced by an
    /// interpolated blend. 0 skips on a constant cadence.
    pub leniency: f32,
    pub skip: SkipMode,
}

/// One or two 256-color palettes (256 vs 512 effective colors).
///
/// The dual layout spends the top bit of each wire byte on the palette
/// selector, which is why indices 127..=255 need a two-byte escape form.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PaletteLayout {
    Single,
    Dual,
}

/// Which frames the skip heuristic compares.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SkipMode {
    /// Compare each frame to the next; a hit encodes one blend for the two.
    Pairwise,
    /// Compare the two middle frames of a group of four; a hit encodes the
    /// first frame, one blend, and the last (3 chunks for 4 sources).
    Lookahead,
}

impl Profile {
    pub const I: Self = Self { dimensions: None, layout: PaletteLayout::Dual, leniency: 0.2282, skip: SkipMode::Pairwise };
    pub const II: Self = Self { dimensions: None, layout: PaletteLayout::Single, leniency: 0.1282, skip: SkipMode::Lookahead };
    pub const III: Self = Self { dimensions: None, layout: PaletteLayout::Dual, leniency: 0.2282, skip: SkipMode::Lookahead };
    pub const ANIM: Self = Self { dimensions: None, layout: PaletteLayout::Single, leniency: 0.2282, skip: SkipMode::Pairwise };
    pub const GBA_I: Self = Self { dimensions: Some((240, 160)), layout: PaletteLayout::Dual, leniency: 0., skip: SkipMode::Pairwise };
    pub const GBA_II: Self = Self { dimensions: Some((240, 160)), layout: PaletteLayout::Single, leniency: 0., skip: SkipMode::Pairwise };
    pub const GBA_III: Self = Self { dimensions: Some((240, 160)), layout: PaletteLayout::Dual, leniency: 0., skip: SkipMode::Lookahead };
    pub const NDS: Self = Self { dimensions: Some((256, 192)), layout: PaletteLayout::Dual, leniency: 0.2282, skip: SkipMode::Lookahead };
}

/// Histogram capacity tier for the global color quantizer.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Quality {
    /// 2^19 buckets (7/6/6 bits of R/G/B kept)
    #[default]
    High,
    /// 2^17 buckets (6/6/5)
    Mid,
    /// 2^16 buckets (5/6/5)
    Low,
}

/// Which of the two interchangeable coders compresses frame bitstreams.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Compression {
    /// Bit-packed greedy LZSS: 9-bit literals, 21-bit back-references.
    #[default]
    SlidingWindow,
    /// Unconditional 4-byte (offset, length, literal) tokens.
    FixedToken,
}

/// The header's version byte encodes palette layout + coder so a decoder
/// knows how to invert the stream.
pub(crate) fn version_byte(layout: PaletteLayout, compression: Compression) -> u8 {
    match (layout, compression) {
        (PaletteLayout::Dual, Compression::SlidingWindow) => 1,
        (PaletteLayout::Single, Compression::SlidingWindow) => 2,
        (PaletteLayout::Dual, Compression::FixedToken) => 3,
        (PaletteLayout::Single, Compression::FixedToken) => 4,
    }
}

pub(crate) fn version_info(version: u8) -> Option<(PaletteLayout, Compression)> {
    Some(match version {
        1 => (PaletteLayout::Dual, Compression::SlidingWindow),
        2 => (PaletteLayout::Single, Compression::SlidingWindow),
        3 => (PaletteLayout::Dual, Compression::FixedToken),
        4 => (PaletteLayout::Single, Compression::FixedToken),
        _ => return None,
    })
}
