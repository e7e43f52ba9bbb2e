// src/renderer/gl.rs

//! The GLES2 program, atlas texture and vertex buffer used to draw glyphs.

use super::geometry::{GlyphVertex, MAX_VERTICES};
use super::RenderError;
use crate::atlas::GlyphAtlas;
use crate::config::ColorConfig;
use anyhow::{anyhow, Context, Result};
use glow::HasContext;
use log::{debug, trace};

const VERTEX_SHADER: &str = r#"
attribute vec4 coord;
varying vec2 textpos;

void main(void) {
    gl_Position = vec4(coord.xy, 0, 1);
    textpos = coord.zw;
}
"#;

const FRAGMENT_SHADER: &str = r#"
precision mediump float;
varying vec2 textpos;
uniform sampler2D text;
uniform vec4 color;

void main(void) {
    gl_FragColor = vec4(1, 1, 1, texture2D(text, textpos).a) * color;
}
"#;

/// Owns the GPU objects for glyph drawing. Must be released with `destroy`
/// while the context that created it is still current.
pub struct GlyphPipeline {
    program: glow::Program,
    texture: glow::Texture,
    vbo: glow::Buffer,
    coord_attrib: u32,
    text_uniform: Option<glow::UniformLocation>,
    color_uniform: Option<glow::UniformLocation>,
    colors: ColorConfig,
}

impl GlyphPipeline {
    /// Compiles the shaders and uploads the atlas. The context must be current.
    pub fn new(gl: &glow::Context, atlas: &GlyphAtlas, colors: ColorConfig) -> Result<Self> {
        unsafe {
            let program = link_program(gl).context("Failed to build glyph shader program")?;

            let coord_attrib = gl
                .get_attrib_location(program, "coord")
                .ok_or_else(|| anyhow!("shader has no `coord` attribute"))?;
            let text_uniform = gl.get_uniform_location(program, "text");
            let color_uniform = gl.get_uniform_location(program, "color");

            let texture = gl
                .create_texture()
                .map_err(|e| anyhow!("glCreateTexture failed: {}", e))?;
            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            let pixels = (!atlas.bitmap.pixels.is_empty()).then_some(atlas.bitmap.pixels.as_slice());
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::ALPHA as i32,
                atlas.bitmap.width as i32,
                atlas.bitmap.height as i32,
                0,
                glow::ALPHA,
                glow::UNSIGNED_BYTE,
                pixels,
            );

            let vbo = gl
                .create_buffer()
                .map_err(|e| anyhow!("glCreateBuffer failed: {}", e))?;
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.buffer_data_size(
                glow::ARRAY_BUFFER,
                (MAX_VERTICES * std::mem::size_of::<GlyphVertex>()) as i32,
                glow::DYNAMIC_DRAW,
            );

            debug!(
                "GlyphPipeline: atlas {}x{} uploaded, vertex buffer {} vertices",
                atlas.bitmap.width, atlas.bitmap.height, MAX_VERTICES
            );

            Ok(GlyphPipeline {
                program,
                texture,
                vbo,
                coord_attrib,
                text_uniform,
                color_uniform,
                colors,
            })
        }
    }

    /// Clears the viewport and draws the first `vertex_count` vertices.
    pub fn draw(
        &self,
        gl: &glow::Context,
        viewport: (i32, i32),
        vertices: &[GlyphVertex],
        vertex_count: usize,
    ) -> Result<(), RenderError> {
        let [r, g, b, a] = self.colors.clear;
        unsafe {
            gl.viewport(0, 0, viewport.0, viewport.1);
            gl.clear_color(r, g, b, a);
            gl.clear(glow::COLOR_BUFFER_BIT);

            gl.enable(glow::BLEND);
            gl.blend_func(glow::ONE, glow::ONE_MINUS_SRC_ALPHA);

            gl.use_program(Some(self.program));
            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(glow::TEXTURE_2D, Some(self.texture));
            gl.uniform_1_i32(self.text_uniform.as_ref(), 0);
            gl.uniform_4_f32_slice(self.color_uniform.as_ref(), &self.colors.text);

            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vbo));
            gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice(vertices),
                glow::DYNAMIC_DRAW,
            );
            gl.enable_vertex_attrib_array(self.coord_attrib);
            gl.vertex_attrib_pointer_f32(
                self.coord_attrib,
                4,
                glow::FLOAT,
                false,
                std::mem::size_of::<GlyphVertex>() as i32,
                0,
            );
            gl.draw_arrays(glow::TRIANGLES, 0, vertex_count as i32);
            gl.disable_vertex_attrib_array(self.coord_attrib);

            match gl.get_error() {
                glow::NO_ERROR => {
                    trace!("GlyphPipeline: drew {} vertices", vertex_count);
                    Ok(())
                }
                code => Err(RenderError::Draw(format!("GL error {:#06x}", code))),
            }
        }
    }

    pub fn destroy(self, gl: &glow::Context) {
        unsafe {
            gl.delete_buffer(self.vbo);
            gl.delete_texture(self.texture);
            gl.delete_program(self.program);
        }
        debug!("GlyphPipeline: GPU objects released");
    }
}

unsafe fn compile_shader(gl: &glow::Context, kind: u32, source: &str) -> Result<glow::Shader> {
    let shader = gl
        .create_shader(kind)
        .map_err(|e| anyhow!("glCreateShader failed: {}", e))?;
    gl.shader_source(shader, source);
    gl.compile_shader(shader);
    if !gl.get_shader_compile_status(shader) {
        let log = gl.get_shader_info_log(shader);
        gl.delete_shader(shader);
        return Err(anyhow!("shader compilation failed: {}", log));
    }
    Ok(shader)
}

unsafe fn link_program(gl: &glow::Context) -> Result<glow::Program> {
    let vertex = compile_shader(gl, glow::VERTEX_SHADER, VERTEX_SHADER).context("vertex shader")?;
    let fragment = match compile_shader(gl, glow::FRAGMENT_SHADER, FRAGMENT_SHADER) {
        Ok(shader) => shader,
        Err(e) => {
            gl.delete_shader(vertex);
            return Err(e.context("fragment shader"));
        }
    };

    let program = gl
        .create_program()
        .map_err(|e| anyhow!("glCreateProgram failed: {}", e))?;
    gl.attach_shader(program, vertex);
    gl.attach_shader(program, fragment);
    gl.link_program(program);
    let linked = gl.get_program_link_status(program);

    gl.detach_shader(program, vertex);
    gl.detach_shader(program, fragment);
    gl.delete_shader(vertex);
    gl.delete_shader(fragment);

    if !linked {
        let log = gl.get_program_info_log(program);
        gl.delete_program(program);
        return Err(anyhow!("program link failed: {}", log));
    }
    Ok(program)
}
