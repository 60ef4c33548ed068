//! Centralized storage for the slicing shaders and the helpers that assemble a
//! model's material function into a complete fragment stage.
//!
//! Both languages share one uniform block: three `mat4` transforms followed by
//! the slice depth and the 1-based material number, both stored as `f32`.

use slicer_core::MaterialLayout;

/// Size in bytes of the uniform buffer, padded to 16-byte alignment.
pub const UNIFORMS_SIZE: u64 = 208;
/// Byte offset of the `[u_slice, u_materialNum]` pair rewritten for every slice.
pub const SLICE_UNIFORM_OFFSET: u64 = 192;

/// Expressions reading each material's density from the model's return value,
/// indexed by material ordinal minus one.
pub fn channel_expressions(layout: MaterialLayout) -> Vec<String> {
    match layout {
        MaterialLayout::Vec4 => ["m.x", "m.y", "m.z", "m.w"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        MaterialLayout::Mat3 => matrix_channels(3),
        MaterialLayout::Mat4 => matrix_channels(4),
    }
}

fn matrix_channels(n: usize) -> Vec<String> {
    (0..n)
        .flat_map(|col| (0..n).map(move |row| format!("m[{col}][{row}]")))
        .collect()
}

/// GLSL 450 stages fed through naga's GLSL front-end.
pub mod glsl {
    use std::fmt::Write as _;

    use super::*;

    pub const VERTEX: &str = include_str!("kernels/slice_vertex.glsl");
    pub const FRAGMENT_HEADER: &str = include_str!("kernels/slice_fragment_header.glsl");
    pub const ENTRY_POINT: &str = "main";

    fn model_type(layout: MaterialLayout) -> &'static str {
        match layout {
            MaterialLayout::Vec4 => "vec4",
            MaterialLayout::Mat3 => "mat3",
            MaterialLayout::Mat4 => "mat4",
        }
    }

    /// Fragment `main` evaluating the model at `selector` and writing the
    /// selected material's density to every colour channel.
    pub fn footer(layout: MaterialLayout, selector: &str) -> String {
        let mut src = String::new();
        let _ = writeln!(src, "\nvoid main() {{");
        let _ = writeln!(src, "    {} m;", model_type(layout));
        let _ = writeln!(src, "    {}(m, vec3({selector}));", layout.entry_point());
        let _ = writeln!(src, "    switch (int(u_materialNum)) {{");
        for (i, channel) in channel_expressions(layout).iter().enumerate() {
            let _ = writeln!(src, "    case {}:", i + 1);
            let _ = writeln!(src, "        outputColor = vec4({channel});");
            let _ = writeln!(src, "        break;");
        }
        let _ = writeln!(src, "    default:");
        let _ = writeln!(src, "        outputColor = vec4(0.0);");
        let _ = writeln!(src, "        break;");
        let _ = writeln!(src, "    }}");
        let _ = writeln!(src, "}}");
        src
    }

    /// Header, model source and footer concatenated into one fragment stage.
    pub fn fragment_source(model_source: &str, layout: MaterialLayout, selector: &str) -> String {
        let mut src = String::with_capacity(FRAGMENT_HEADER.len() + model_source.len() + 1024);
        src.push_str(FRAGMENT_HEADER);
        src.push_str(model_source);
        src.push_str(&footer(layout, selector));
        src
    }
}

/// A single WGSL module holding both `vs_main` and `fs_main`.
pub mod wgsl {
    use std::fmt::Write as _;

    use super::*;

    pub const VERTEX: &str = include_str!("kernels/slice_vertex.wgsl");
    pub const VERTEX_ENTRY_POINT: &str = "vs_main";
    pub const FRAGMENT_ENTRY_POINT: &str = "fs_main";

    pub fn footer(layout: MaterialLayout, selector: &str) -> String {
        let mut src = String::new();
        let _ = writeln!(src, "\n@fragment");
        let _ = writeln!(
            src,
            "fn fs_main(@location(0) fragVert: vec3f) -> @location(0) vec4f {{"
        );
        let _ = writeln!(src, "    let u_slice = uniforms.u_slice;");
        let _ = writeln!(src, "    let u_materialNum = i32(uniforms.u_materialNum);");
        let _ = writeln!(src, "    let m = {}(vec3f({selector}));", layout.entry_point());
        let _ = writeln!(src, "    var color = 0.0;");
        let _ = writeln!(src, "    switch u_materialNum {{");
        for (i, channel) in channel_expressions(layout).iter().enumerate() {
            let _ = writeln!(src, "        case {}: {{ color = {channel}; }}", i + 1);
        }
        let _ = writeln!(src, "        default: {{ color = 0.0; }}");
        let _ = writeln!(src, "    }}");
        let _ = writeln!(src, "    return vec4f(color, color, color, 1.0);");
        let _ = writeln!(src, "}}");
        src
    }

    pub fn module_source(model_source: &str, layout: MaterialLayout, selector: &str) -> String {
        let mut src = String::with_capacity(VERTEX.len() + model_source.len() + 1024);
        src.push_str(VERTEX);
        src.push('\n');
        src.push_str(model_source);
        src.push_str(&footer(layout, selector));
        src
    }
}
