//! Frame-skip heuristic: decide whether adjacent source frames are close
//! enough that one interpolated blend can stand in for them.

use imgref::{ImgRef, ImgVec};
use rgb::RGB8;

/// Shared per-channel tolerance for "these pixels match" tests; the block
/// classifier uses the same value.
pub(crate) const CHANNEL_TOLERANCE: u8 = 2;

#[inline]
pub(crate) fn pixels_match(a: RGB8, b: RGB8, tolerance: u8) -> bool {
    a.r.abs_diff(b.r) <= tolerance && a.g.abs_diff(b.g) <= tolerance && a.b.abs_diff(b.b) <= tolerance
}

/// Fraction of co-located pixels within tolerance, in 0.0..=1.0.
pub(crate) fn similarity(a: ImgRef<'_, RGB8>, b: ImgRef<'_, RGB8>) -> f32 {
    debug_assert_eq!((a.width(), a.height()), (b.width(), b.height()));
    let total = a.width() * a.height();
    if total == 0 {
        return 1.;
    }
    let matching = a
        .pixels()
        .zip(b.pixels())
        .filter(|&(pa, pb)| pixels_match(pa, pb, CHANNEL_TOLERANCE))
        .count();
    matching as f32 / total as f32
}

/// Midpoint blend of two frames, substituted for the skipped ones.
pub(crate) fn interpolate(a: ImgRef<'_, RGB8>, b: ImgRef<'_, RGB8>) -> ImgVec<RGB8> {
    let pixels = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| {
            RGB8::new(
                midpoint(pa.r, pb.r),
                midpoint(pa.g, pb.g),
                midpoint(pa.b, pb.b),
            )
        })
        .collect();
    ImgVec::new(pixels, a.width(), a.height())
}

#[inline]
fn midpoint(a: u8, b: u8) -> u8 {
    ((u16::from(a) + u16::from(b)) / 2) as u8
}
