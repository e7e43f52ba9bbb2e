// src/renderer/geometry.rs

//! Turns grid cells into textured quads in normalized device coordinates.

use crate::atlas::{GlyphAtlas, GlyphRecord};
use crate::config::{GRID_COLS, GRID_ROWS};
use crate::term::TerminalGrid;
use bytemuck::{Pod, Zeroable};

pub const VERTICES_PER_QUAD: usize = 6;

/// Size of the vertex buffer: one quad for every cell of a full grid.
pub const MAX_VERTICES: usize = GRID_ROWS * GRID_COLS * VERTICES_PER_QUAD;

/// Matches the `vec4 coord` attribute: `xy` is the position, `zw` the texcoord.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GlyphVertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
}

impl GlyphVertex {
    pub const fn new(x: f32, y: f32, u: f32, v: f32) -> Self {
        GlyphVertex {
            position: [x, y],
            tex_coord: [u, v],
        }
    }
}

/// Screen-space rectangle of one glyph plus its atlas UV rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphQuad {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    pub u0: f32,
    pub u1: f32,
    pub v1: f32,
}

impl GlyphQuad {
    /// Places `record` in cell `(row, col)` of a `surface_width x surface_height` surface.
    pub fn for_cell(
        atlas: &GlyphAtlas,
        record: &GlyphRecord,
        row: usize,
        col: usize,
        surface_width: i32,
        surface_height: i32,
    ) -> Self {
        let sx = 2.0 / surface_width as f32;
        let sy = 2.0 / surface_height as f32;

        let pen_x = (col as u32 * atlas.cell_width) as f32;
        let baseline = (row as u32 * atlas.cell_height) as f32 + atlas.ascent as f32;

        let atlas_width = atlas.bitmap.width.max(1) as f32;
        let v1 = if atlas.bitmap.height == 0 {
            0.0
        } else {
            record.height as f32 / atlas.bitmap.height as f32
        };

        GlyphQuad {
            left: -1.0 + (pen_x + record.left as f32) * sx,
            top: 1.0 - (baseline - record.top as f32) * sy,
            width: record.width as f32 * sx,
            height: record.height as f32 * sy,
            u0: record.u_origin,
            u1: record.u_origin + record.width as f32 / atlas_width,
            v1,
        }
    }

    /// Two triangles: top-left, top-right, bottom-left, then top-right,
    /// bottom-left, bottom-right.
    pub fn vertices(&self) -> [GlyphVertex; VERTICES_PER_QUAD] {
        let right = self.left + self.width;
        let bottom = self.top - self.height;
        let tl = GlyphVertex::new(self.left, self.top, self.u0, 0.0);
        let tr = GlyphVertex::new(right, self.top, self.u1, 0.0);
        let bl = GlyphVertex::new(self.left, bottom, self.u0, self.v1);
        let br = GlyphVertex::new(right, bottom, self.u1, self.v1);
        [tl, tr, bl, tr, bl, br]
    }
}

/// Fills `out` with one quad per non-empty cell, zeroing everything after
/// the last quad, and returns the number of vertices to draw.
///
/// `out` is expected to hold `MAX_VERTICES` entries; quads that do not fit are
/// dropped. A degenerate surface size produces no quads.
pub fn build_vertices(
    grid: &TerminalGrid,
    atlas: &GlyphAtlas,
    surface_width: i32,
    surface_height: i32,
    out: &mut [GlyphVertex],
) -> usize {
    out.fill(GlyphVertex::default());
    if surface_width <= 0 || surface_height <= 0 {
        return 0;
    }

    let mut count = 0;
    for (row, col, code) in grid.occupied_cells() {
        let Some(record) = atlas.glyph(code) else {
            continue;
        };
        let Some(slot) = out.get_mut(count..count + VERTICES_PER_QUAD) else {
            break;
        };
        let quad = GlyphQuad::for_cell(atlas, record, row, col, surface_width, surface_height);
        slot.copy_from_slice(&quad.vertices());
        count += VERTICES_PER_QUAD;
    }
    count
}
