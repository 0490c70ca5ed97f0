//! Per-frame block classification and the packed symbol layer.
//!
//! A quantized frame is cut into 4×4 blocks, scanned row-major. Each block
//! becomes exactly one symbol: COPY (reuse the previous frame's block),
//! FILL (one color), or NORMAL (all 16 entries). The byte layout emitted
//! here, combined with the palette layout's entry encoding, is the
//! uncompressed wire format of a frame chunk.

use crate::error::{CatResult, Error};
use crate::profile::PaletteLayout;
use crate::quant::{PalEntry, Palettes};
use crate::skip::{pixels_match, CHANNEL_TOLERANCE};
use imgref::{ImgRef, ImgVec};
use rgb::RGB8;

pub(crate) const BLOCK: usize = 4;

pub(crate) const NORMAL_TAG: u8 = 0x01;
pub(crate) const FILL_TAG: u8 = 0x02;
pub(crate) const COPY_TAG: u8 = 0x03;

/// Escape threshold for dual-layout entry bytes: the selector bit leaves
/// only 7 bits for the index, and 127 marks "real index in the next byte".
const ESCAPE_INDEX: u8 = 127;

/// One frame's pixels mapped to palette entries, row-major.
#[derive(Clone)]
pub(crate) struct EntryGrid {
    width: usize,
    height: usize,
    entries: Vec<PalEntry>,
}

impl EntryGrid {
    pub fn from_image(image: ImgRef<'_, RGB8>, palettes: &Palettes) -> Self {
        let entries = image.pixels().map(|px| palettes.nearest(px)).collect();
        Self { width: image.width(), height: image.height(), entries }
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> PalEntry {
        self.entries[y * self.width + x]
    }
}

fn push_entry(out: &mut Vec<u8>, e: PalEntry, layout: PaletteLayout) {
    match layout {
        PaletteLayout::Single => out.push(e.idx),
        PaletteLayout::Dual => {
            if e.idx < ESCAPE_INDEX {
                out.push(e.pal << 7 | e.idx);
            } else {
                out.push(e.pal << 7 | ESCAPE_INDEX);
                out.push(e.idx);
            }
        }
    }
}

fn read_entry(data: &[u8], pos: &mut usize, layout: PaletteLayout) -> CatResult<PalEntry> {
    let byte = *data
        .get(*pos)
        .ok_or_else(|| Error::Parse("frame bitstream truncated".into()))?;
    *pos += 1;
    match layout {
        PaletteLayout::Single => Ok(PalEntry { pal: 0, idx: byte }),
        PaletteLayout::Dual => {
            let pal = byte >> 7;
            let idx = byte & 0x7F;
            if idx < ESCAPE_INDEX {
                Ok(PalEntry { pal, idx })
            } else {
                let idx = *data
                    .get(*pos)
                    .ok_or_else(|| Error::Parse("frame bitstream truncated".into()))?;
                *pos += 1;
                Ok(PalEntry { pal, idx })
            }
        }
    }
}

/// Count pixels of `reference`'s block at (bx, by) within tolerance of one
/// solid color — the FILL test.
fn count_near_color(reference: &EntryGrid, palettes: &Palettes, bx: usize, by: usize, color: RGB8) -> u32 {
    let mut count = 0;
    for y in by..by + BLOCK {
        for x in bx..bx + BLOCK {
            if pixels_match(color, palettes.color(reference.at(x, y)), CHANNEL_TOLERANCE) {
                count += 1;
            }
        }
    }
    count
}

/// Count co-located pixels of two grids within tolerance — the COPY test.
fn count_matching(a: &EntryGrid, b: &EntryGrid, palettes: &Palettes, bx: usize, by: usize) -> u32 {
    let mut count = 0;
    for y in by..by + BLOCK {
        for x in bx..bx + BLOCK {
            if pixels_match(palettes.color(a.at(x, y)), palettes.color(b.at(x, y)), CHANNEL_TOLERANCE) {
                count += 1;
            }
        }
    }
    count
}

/// Classify every block of `grid` and append the packed symbols to `out`.
///
/// `fill_reference` is the grid the FILL test counts against: the current
/// keyframe for inter frames, the frame itself for keyframes. `previous`
/// enables the COPY test and must be `None` for keyframes.
pub(crate) fn classify_frame(
    grid: &EntryGrid,
    fill_reference: &EntryGrid,
    previous: Option<&EntryGrid>,
    palettes: &Palettes,
    fill_count: u8,
    copy_count: u8,
    out: &mut Vec<u8>,
) {
    for by in (0..grid.height).step_by(BLOCK) {
        for bx in (0..grid.width).step_by(BLOCK) {
            if let Some(prev) = previous {
                if count_matching(grid, prev, palettes, bx, by) >= u32::from(copy_count) {
                    out.push(COPY_TAG);
                    continue;
                }
            }

            let top_left = grid.at(bx, by);
            let color = palettes.color(top_left);
            if count_near_color(fill_reference, palettes, bx, by, color) >= u32::from(fill_count) {
                out.push(FILL_TAG);
                push_entry(out, top_left, palettes.layout);
            } else {
                out.push(NORMAL_TAG);
                for y in by..by + BLOCK {
                    for x in bx..bx + BLOCK {
                        push_entry(out, grid.at(x, y), palettes.layout);
                    }
                }
            }
        }
    }
}

/// Apply one frame's unpacked bitstream to the decode canvas. COPY blocks
/// leave the previous frame's pixels in place, which is exactly what a
/// persistent canvas gives for free.
pub(crate) fn apply_bitstream(
    data: &[u8],
    canvas: &mut ImgVec<RGB8>,
    palettes: &Palettes,
) -> CatResult<()> {
    debug_assert_eq!(canvas.width(), canvas.stride());
    let (width, height) = (canvas.width(), canvas.height());
    let pixels = canvas.buf_mut();
    let mut pos = 0;
    for by in (0..height).step_by(BLOCK) {
        for bx in (0..width).step_by(BLOCK) {
            let tag = *data
                .get(pos)
                .ok_or_else(|| Error::Parse("frame bitstream truncated".into()))?;
            pos += 1;
            match tag {
                COPY_TAG => {}
                FILL_TAG => {
                    let color = palettes.color(read_entry(data, &mut pos, palettes.layout)?);
                    for y in by..by + BLOCK {
                        pixels[y * width + bx..y * width + bx + BLOCK].fill(color);
                    }
                }
                NORMAL_TAG => {
                    for y in by..by + BLOCK {
                        for x in bx..bx + BLOCK {
                            pixels[y * width + x] =
                                palettes.color(read_entry(data, &mut pos, palettes.layout)?);
                        }
                    }
                }
                other => return Err(Error::Parse(format!("unknown block tag {other:#04x}"))),
            }
        }
    }
    if pos != data.len() {
        return Err(Error::Parse("trailing bytes after last block".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgref::ImgVec;

    fn solid_palettes(layout: PaletteLayout) -> Palettes {
        let mut pal = [[RGB8::new(0, 0, 0); 256]; 2];
        pal[0][0] = RGB8::new(200, 30, 40);
        pal[0][1] = RGB8::new(10, 220, 50);
        pal[1][200] = RGB8::new(90, 90, 90);
        Palettes { layout, pal, colors: 3 }
    }

    fn grid_of(color_idx: PalEntry, w: usize, h: usize) -> EntryGrid {
        EntryGrid { width: w, height: h, entries: vec![color_idx; w * h] }
    }

    #[test]
    fn uniform_keyframe_is_all_fill() {
        let palettes = solid_palettes(PaletteLayout::Dual);
        let grid = grid_of(PalEntry { pal: 0, idx: 0 }, 16, 8);
        let mut out = Vec::new();
        classify_frame(&grid, &grid, None, &palettes, 16, 16, &mut out);
        // 4×2 blocks, each FILL + one entry byte
        assert_eq!(out.len(), 8 * 2);
        assert!(out.chunks(2).all(|c| *c == [FILL_TAG, 0x00]));
    }

    #[test]
    fn unchanged_inter_frame_is_all_copy() {
        let palettes = solid_palettes(PaletteLayout::Dual);
        let key = grid_of(PalEntry { pal: 0, idx: 0 }, 16, 8);
        let grid = grid_of(PalEntry { pal: 0, idx: 0 }, 16, 8);
        let mut out = Vec::new();
        classify_frame(&grid, &key, Some(&key), &palettes, 16, 16, &mut out);
        assert_eq!(out, vec![COPY_TAG; 8]);
    }

    #[test]
    fn mixed_block_is_normal() {
        let palettes = solid_palettes(PaletteLayout::Single);
        let mut grid = grid_of(PalEntry { pal: 0, idx: 0 }, 4, 4);
        grid.entries[5] = PalEntry { pal: 0, idx: 1 };
        let mut out = Vec::new();
        classify_frame(&grid, &grid, None, &palettes, 16, 16, &mut out);
        assert_eq!(out.len(), 1 + 16);
        assert_eq!(out[0], NORMAL_TAG);
        assert_eq!(out[6], 1);
    }

    #[test]
    fn dual_layout_escapes_high_indices() {
        let mut out = Vec::new();
        push_entry(&mut out, PalEntry { pal: 1, idx: 126 }, PaletteLayout::Dual);
        push_entry(&mut out, PalEntry { pal: 1, idx: 127 }, PaletteLayout::Dual);
        push_entry(&mut out, PalEntry { pal: 0, idx: 255 }, PaletteLayout::Dual);
        assert_eq!(out, [0xFE, 0xFF, 127, 0x7F, 255]);

        let mut pos = 0;
        assert_eq!(read_entry(&out, &mut pos, PaletteLayout::Dual).unwrap(), PalEntry { pal: 1, idx: 126 });
        assert_eq!(read_entry(&out, &mut pos, PaletteLayout::Dual).unwrap(), PalEntry { pal: 1, idx: 127 });
        assert_eq!(read_entry(&out, &mut pos, PaletteLayout::Dual).unwrap(), PalEntry { pal: 0, idx: 255 });
        assert_eq!(pos, out.len());
    }

    #[test]
    fn classify_then_apply_round_trips() {
        let palettes = solid_palettes(PaletteLayout::Dual);
        let mut grid = grid_of(PalEntry { pal: 0, idx: 0 }, 8, 8);
        grid.entries[9] = PalEntry { pal: 1, idx: 200 };
        grid.entries[30] = PalEntry { pal: 0, idx: 1 };
        let mut out = Vec::new();
        classify_frame(&grid, &grid, None, &palettes, 16, 16, &mut out);

        let mut canvas = ImgVec::new(vec![RGB8::new(0, 0, 0); 64], 8, 8);
        apply_bitstream(&out, &mut canvas, &palettes).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(canvas.buf()[y * 8 + x], palettes.color(grid.at(x, y)), "({x},{y})");
            }
        }
    }

    #[test]
    fn copy_keeps_previous_canvas_pixels() {
        let palettes = solid_palettes(PaletteLayout::Dual);
        let old = RGB8::new(1, 2, 3);
        let mut canvas = ImgVec::new(vec![old; 16], 4, 4);
        apply_bitstream(&[COPY_TAG], &mut canvas, &palettes).unwrap();
        assert!(canvas.pixels().all(|px| px == old));
    }

    #[test]
    fn bad_tag_is_a_parse_error() {
        let palettes = solid_palettes(PaletteLayout::Single);
        let mut canvas = ImgVec::new(vec![RGB8::new(0, 0, 0); 16], 4, 4);
        assert!(apply_bitstream(&[0x7A], &mut canvas, &palettes).is_err());
    }
}
