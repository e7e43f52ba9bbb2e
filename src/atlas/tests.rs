// src/atlas/tests.rs

use super::*;
use std::collections::HashMap;
use test_log::test;

/// Synthetic rasterizer: glyph `c` is `(c % 7) + 1` wide and `(c % 5) + 2`
/// tall, every pixel holds `c`. Codes in `failing` always error; codes in
/// `failing_after_first` error on every call but the first.
struct MockRasterizer {
    failing: Vec<u8>,
    failing_after_first: Vec<u8>,
    scratch: Vec<u8>,
    calls: HashMap<u8, usize>,
}

impl MockRasterizer {
    fn new() -> Self {
        MockRasterizer {
            failing: Vec::new(),
            failing_after_first: Vec::new(),
            scratch: Vec::new(),
            calls: HashMap::new(),
        }
    }

    fn failing(codes: &[u8]) -> Self {
        MockRasterizer {
            failing: codes.to_vec(),
            ..Self::new()
        }
    }

    fn width_of(code: u8) -> u32 {
        (code % 7) as u32 + 1
    }

    fn rows_of(code: u8) -> u32 {
        (code % 5) as u32 + 2
    }
}

impl GlyphRasterizer for MockRasterizer {
    fn rasterize(&mut self, code: u8) -> Result<GlyphBitmap<'_>, AtlasError> {
        let calls = self.calls.entry(code).or_default();
        *calls += 1;
        if self.failing.contains(&code) || (*calls > 1 && self.failing_after_first.contains(&code)) {
            return Err(AtlasError::Raster {
                code,
                reason: "mock failure".to_string(),
            });
        }
        let width = Self::width_of(code);
        let rows = Self::rows_of(code);
        self.scratch.clear();
        self.scratch.resize((width * rows) as usize, code);
        Ok(GlyphBitmap {
            width,
            rows,
            buffer: &self.scratch,
            advance_x: width as i32 + 2,
            advance_y: 0,
            top: rows as i32 - 1,
            left: 1,
        })
    }
}

#[test]
fn every_printable_codepoint_has_a_record() {
    let atlas = GlyphAtlas::build(&mut MockRasterizer::new());
    for code in FIRST_GLYPH..=LAST_GLYPH {
        let record = atlas.glyph(code).expect("record for printable codepoint");
        assert_eq!(record.width, MockRasterizer::width_of(code));
        assert_eq!(record.height, MockRasterizer::rows_of(code));
    }
    assert!(atlas.glyph(31).is_none());
    assert!(atlas.glyph(127).is_none());
}

#[test]
fn atlas_width_is_sum_of_padded_widths() {
    let atlas = GlyphAtlas::build(&mut MockRasterizer::new());
    let expected: u32 = (FIRST_GLYPH..=LAST_GLYPH)
        .map(|c| MockRasterizer::width_of(c) + GLYPH_PADDING_PX)
        .sum();
    assert_eq!(atlas.bitmap.width, expected);
    assert_eq!(atlas.bitmap.pixels.len(), (expected * atlas.bitmap.height) as usize);
}

#[test]
fn regions_are_increasing_and_disjoint() {
    let atlas = GlyphAtlas::build(&mut MockRasterizer::new());
    let records = atlas.records();

    let mut cumulative = 0u32;
    for pair in records.windows(2) {
        assert!(pair[0].u_origin < pair[1].u_origin);
        assert!(pair[0].x_offset + pair[0].width < pair[1].x_offset + 1);
    }
    for record in records.iter() {
        assert_eq!(record.x_offset, cumulative);
        assert_eq!(record.u_origin, cumulative as f32 / atlas.bitmap.width as f32);
        cumulative += record.width + GLYPH_PADDING_PX;
    }
}

#[test]
fn cell_metrics_are_maxima_over_the_range() {
    let atlas = GlyphAtlas::build(&mut MockRasterizer::new());
    assert_eq!(atlas.cell_width, 7);
    assert_eq!(atlas.cell_height, 6);
    assert_eq!(atlas.ascent, 5);
    assert_eq!(atlas.bitmap.height, atlas.cell_height);
}

#[test]
fn glyph_pixels_land_at_their_offset_and_padding_stays_empty() {
    let atlas = GlyphAtlas::build(&mut MockRasterizer::new());
    for code in [b' ', b'A', b'g', b'~'] {
        let record = atlas.glyph(code).unwrap();
        for y in 0..record.height {
            for x in 0..record.width {
                assert_eq!(atlas.bitmap.pixel(record.x_offset + x, y), Some(code));
            }
            assert_eq!(atlas.bitmap.pixel(record.x_offset + record.width, y), Some(0));
        }
        // Rows below a short glyph are untouched.
        for y in record.height..atlas.bitmap.height {
            assert_eq!(atlas.bitmap.pixel(record.x_offset, y), Some(0));
        }
    }
}

#[test]
fn each_glyph_is_rasterized_once_per_pass() {
    let mut rasterizer = MockRasterizer::new();
    let _atlas = GlyphAtlas::build(&mut rasterizer);
    assert_eq!(rasterizer.calls.len(), GLYPH_COUNT);
    assert!(rasterizer.calls.values().all(|&n| n == 2));
}

#[test]
fn failed_glyph_gets_blank_slot_and_build_continues() {
    let mut rasterizer = MockRasterizer::failing(&[b'B']);
    let atlas = GlyphAtlas::build(&mut rasterizer);

    let blank = atlas.glyph(b'B').unwrap();
    assert!(blank.is_blank());
    assert_eq!(blank.advance_x, 0);
    assert_eq!(blank.advance_y, 0);

    // The failed slot only consumes its padding column.
    let a = atlas.glyph(b'A').unwrap();
    let c = atlas.glyph(b'C').unwrap();
    assert_eq!(blank.x_offset, a.x_offset + a.width + GLYPH_PADDING_PX);
    assert_eq!(c.x_offset, blank.x_offset + GLYPH_PADDING_PX);

    // Not retried in the copy pass.
    assert_eq!(rasterizer.calls[&b'B'], 1);
}

#[test]
fn glyph_failing_only_in_copy_pass_keeps_its_measured_slot() {
    let mut rasterizer = MockRasterizer {
        failing_after_first: vec![b'B'],
        ..MockRasterizer::new()
    };
    let atlas = GlyphAtlas::build(&mut rasterizer);
    assert_eq!(rasterizer.calls[&b'B'], 2);

    let b = atlas.glyph(b'B').unwrap();
    assert_eq!(b.width, MockRasterizer::width_of(b'B'));
    assert_eq!(b.height, MockRasterizer::rows_of(b'B'));
    assert_eq!(b.advance_x, 0);

    let c = atlas.glyph(b'C').unwrap();
    assert_eq!(c.x_offset, b.x_offset + b.width + GLYPH_PADDING_PX);

    let padded_sum: u32 = atlas
        .records()
        .iter()
        .map(|r| r.width + GLYPH_PADDING_PX)
        .sum();
    assert_eq!(atlas.bitmap.width, padded_sum);

    // Nothing was copied into the region.
    for x in b.x_offset..b.x_offset + b.width {
        for y in 0..atlas.bitmap.height {
            assert_eq!(atlas.bitmap.pixel(x, y), Some(0));
        }
    }
}

#[test]
fn all_glyphs_failing_still_builds() {
    let codes: Vec<u8> = (FIRST_GLYPH..=LAST_GLYPH).collect();
    let atlas = GlyphAtlas::build(&mut MockRasterizer::failing(&codes));
    assert_eq!(atlas.bitmap.width, GLYPH_COUNT as u32 * GLYPH_PADDING_PX);
    assert_eq!(atlas.bitmap.height, 0);
    assert!(atlas.records().iter().all(GlyphRecord::is_blank));
}

#[test]
fn missing_font_is_a_font_load_error() {
    let err = FreeTypeRasterizer::open(Path::new("/nonexistent/font.ttf"), 24)
        .err()
        .expect("opening a missing font must fail");
    assert!(matches!(err, AtlasError::FontLoad { .. }));
}
