// src/atlas.rs

//! Packs the printable ASCII range of a font into a single alpha texture.
//!
//! Glyphs are laid out side by side on one row, each followed by one column of
//! padding, so a glyph's texture region is fully described by its x offset and
//! its bitmap size. The total width is only known once every glyph has been
//! measured, and the atlas must be allocated as one block before any glyph is
//! copied into it, so `GlyphAtlas::build` makes two passes over the range: one
//! to measure, one to copy. The rasterizer is not expected to keep bitmaps
//! alive between calls (FreeType reuses a single glyph slot), which is why the
//! second pass rasterizes again instead of caching the first pass's output.

use crate::config::{FIRST_GLYPH, GLYPH_COUNT, LAST_GLYPH};
use freetype::face::LoadFlag;
use log::{debug, trace, warn};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Columns of empty pixels placed after every glyph.
pub const GLYPH_PADDING_PX: u32 = 1;

#[derive(Debug, Error)]
pub enum AtlasError {
    /// The font library or the font face could not be opened. Fatal at startup.
    #[error("failed to load font {path}")]
    FontLoad {
        path: PathBuf,
        #[source]
        source: freetype::Error,
    },
    /// A single codepoint could not be rasterized. Never escapes `build`.
    #[error("failed to rasterize codepoint {code}: {reason}")]
    Raster { code: u8, reason: String },
}

/// A rasterized glyph, borrowed from the rasterizer's scratch storage.
///
/// `buffer` is tightly packed: `width * rows` bytes, one alpha value per pixel.
#[derive(Debug, Clone, Copy)]
pub struct GlyphBitmap<'a> {
    pub width: u32,
    pub rows: u32,
    pub buffer: &'a [u8],
    /// Pen advance in whole pixels.
    pub advance_x: i32,
    pub advance_y: i32,
    /// Distance from the baseline to the top row of the bitmap.
    pub top: i32,
    /// Distance from the pen position to the leftmost column of the bitmap.
    pub left: i32,
}

/// Something that can turn a codepoint into an alpha bitmap.
pub trait GlyphRasterizer {
    fn rasterize(&mut self, code: u8) -> Result<GlyphBitmap<'_>, AtlasError>;
}

/// Per-codepoint placement and metrics inside the atlas.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlyphRecord {
    /// Left edge of the glyph's region, normalized to the atlas width.
    pub u_origin: f32,
    /// Left edge of the glyph's region in atlas pixels.
    pub x_offset: u32,
    pub advance_x: i32,
    pub advance_y: i32,
    pub width: u32,
    pub height: u32,
    pub top: i32,
    pub left: i32,
}

impl GlyphRecord {
    /// True when there is nothing to draw for this glyph.
    pub fn is_blank(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Single-channel atlas pixels, row-major with a stride of `width`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasBitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl AtlasBitmap {
    fn new(width: u32, height: u32) -> Self {
        AtlasBitmap {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Alpha value at `(x, y)`, or `None` outside the bitmap.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}

/// The packed texture plus one record per printable ASCII codepoint.
#[derive(Debug, Clone)]
pub struct GlyphAtlas {
    pub bitmap: AtlasBitmap,
    records: [GlyphRecord; GLYPH_COUNT],
    /// Widest bitmap in the range; used as the uniform cell advance.
    pub cell_width: u32,
    /// Tallest bitmap in the range; used as the row height.
    pub cell_height: u32,
    /// Largest bitmap top in the range; distance from a row's top to its baseline.
    pub ascent: i32,
}

impl GlyphAtlas {
    /// Opens `path` with FreeType at `pixel_size` and builds the atlas from it.
    pub fn from_font(path: &Path, pixel_size: u32) -> Result<Self, AtlasError> {
        let mut rasterizer = FreeTypeRasterizer::open(path, pixel_size)?;
        Ok(Self::build(&mut rasterizer))
    }

    /// Builds the atlas from codepoints `FIRST_GLYPH..=LAST_GLYPH`.
    ///
    /// Per-glyph failures are logged and never fail the build. A glyph that
    /// fails to measure gets a blank slot (zero advance, zero bitmap size,
    /// padding only). A glyph that measures but then fails to copy keeps its
    /// measured size over an empty region, with zero advance.
    pub fn build<R: GlyphRasterizer + ?Sized>(rasterizer: &mut R) -> Self {
        // Pass 1: measure.
        let mut widths = [0u32; GLYPH_COUNT];
        let mut heights = [0u32; GLYPH_COUNT];
        let mut measured = [false; GLYPH_COUNT];
        let mut atlas_width = 0u32;
        let mut max_width = 0u32;
        let mut max_height = 0u32;
        let mut max_top = 0i32;

        for (slot, code) in (FIRST_GLYPH..=LAST_GLYPH).enumerate() {
            match rasterizer.rasterize(code) {
                Ok(glyph) => {
                    measured[slot] = true;
                    widths[slot] = glyph.width;
                    heights[slot] = glyph.rows;
                    max_width = max_width.max(glyph.width);
                    max_height = max_height.max(glyph.rows);
                    max_top = max_top.max(glyph.top);
                }
                Err(e) => warn!("Atlas: skipping {:?} while measuring: {}", code as char, e),
            }
            atlas_width += widths[slot] + GLYPH_PADDING_PX;
        }

        debug!(
            "Atlas: measured {} glyphs, atlas {}x{}, max glyph {}x{}, ascent {}",
            GLYPH_COUNT, atlas_width, max_height, max_width, max_height, max_top
        );

        // Pass 2: copy into the allocated block.
        let mut bitmap = AtlasBitmap::new(atlas_width, max_height);
        let mut records = [GlyphRecord::default(); GLYPH_COUNT];
        let mut x_offset = 0u32;

        for (slot, code) in (FIRST_GLYPH..=LAST_GLYPH).enumerate() {
            let record = &mut records[slot];
            record.x_offset = x_offset;
            record.u_origin = x_offset as f32 / atlas_width as f32;

            if measured[slot] {
                // The slot keeps its measured size whatever the copy pass
                // yields, so offsets stay the running sum of padded widths.
                record.width = widths[slot];
                record.height = heights[slot];
                match rasterizer.rasterize(code) {
                    Ok(glyph) => {
                        if glyph.width != widths[slot] || glyph.rows != heights[slot] {
                            warn!(
                                "Atlas: {:?} changed from {}x{} to {}x{} px between passes; clipping",
                                code as char,
                                widths[slot],
                                heights[slot],
                                glyph.width,
                                glyph.rows
                            );
                        }
                        let width = glyph.width.min(widths[slot]);
                        let rows = glyph.rows.min(max_height);
                        blit(&mut bitmap, x_offset, &glyph, width, rows);
                        record.advance_x = glyph.advance_x;
                        record.advance_y = glyph.advance_y;
                        record.top = glyph.top;
                        record.left = glyph.left;
                        trace!("Atlas: {:?} -> {:?}", code as char, record);
                    }
                    Err(e) => warn!(
                        "Atlas: {:?} failed while copying, leaving its {}x{} region empty: {}",
                        code as char, widths[slot], heights[slot], e
                    ),
                }
            }

            x_offset += widths[slot] + GLYPH_PADDING_PX;
        }

        GlyphAtlas {
            bitmap,
            records,
            cell_width: max_width,
            cell_height: max_height,
            ascent: max_top,
        }
    }

    /// Record for `code`, or `None` outside the printable ASCII range.
    pub fn glyph(&self, code: u8) -> Option<&GlyphRecord> {
        if !(FIRST_GLYPH..=LAST_GLYPH).contains(&code) {
            return None;
        }
        self.records.get((code - FIRST_GLYPH) as usize)
    }

    /// All records, in increasing codepoint order.
    pub fn records(&self) -> &[GlyphRecord; GLYPH_COUNT] {
        &self.records
    }
}

fn blit(atlas: &mut AtlasBitmap, x_offset: u32, glyph: &GlyphBitmap<'_>, width: u32, rows: u32) {
    let stride = atlas.width as usize;
    let src_stride = glyph.width as usize;
    for row in 0..rows as usize {
        let src = row * src_stride;
        let dst = row * stride + x_offset as usize;
        let (Some(src_row), Some(dst_row)) = (
            glyph.buffer.get(src..src + width as usize),
            atlas.pixels.get_mut(dst..dst + width as usize),
        ) else {
            warn!("Atlas: glyph buffer shorter than its reported size, row {} dropped", row);
            continue;
        };
        dst_row.copy_from_slice(src_row);
    }
}

// --- FreeType ---

/// Rasterizer backed by a FreeType face.
pub struct FreeTypeRasterizer {
    // Declared before `library` so the face is released first.
    face: freetype::Face,
    _library: freetype::Library,
    scratch: Vec<u8>,
}

impl FreeTypeRasterizer {
    pub fn open(path: &Path, pixel_size: u32) -> Result<Self, AtlasError> {
        let font_load = |source| AtlasError::FontLoad {
            path: path.to_path_buf(),
            source,
        };
        let library = freetype::Library::init().map_err(font_load)?;
        let face = library.new_face(path, 0).map_err(font_load)?;
        face.set_pixel_sizes(0, pixel_size).map_err(font_load)?;
        debug!(
            "FreeTypeRasterizer: opened {} at {}px",
            path.display(),
            pixel_size
        );
        Ok(FreeTypeRasterizer {
            face,
            _library: library,
            scratch: Vec::new(),
        })
    }
}

impl GlyphRasterizer for FreeTypeRasterizer {
    fn rasterize(&mut self, code: u8) -> Result<GlyphBitmap<'_>, AtlasError> {
        self.face
            .load_char(code as usize, LoadFlag::RENDER)
            .map_err(|e| AtlasError::Raster {
                code,
                reason: e.to_string(),
            })?;

        let slot = self.face.glyph();
        let bitmap = slot.bitmap();
        let width = bitmap.width().max(0) as usize;
        let rows = bitmap.rows().max(0) as usize;
        let pitch = bitmap.pitch().unsigned_abs() as usize;
        let buffer = bitmap.buffer();

        // Strip the row padding FreeType may add so the buffer is width * rows.
        self.scratch.clear();
        for row in 0..rows {
            let start = row * pitch;
            let src = buffer.get(start..start + width).ok_or(AtlasError::Raster {
                code,
                reason: format!("bitmap row {} out of bounds", row),
            })?;
            self.scratch.extend_from_slice(src);
        }

        let advance = slot.advance();
        Ok(GlyphBitmap {
            width: width as u32,
            rows: rows as u32,
            buffer: &self.scratch,
            advance_x: (advance.x >> 6) as i32,
            advance_y: (advance.y >> 6) as i32,
            top: slot.bitmap_top(),
            left: slot.bitmap_left(),
        })
    }
}

#[cfg(test)]
mod tests;
