//! Offscreen `wgpu` rendering backends for the slicing engine.
//!
//! One renderer serves both backend kinds. GLSL models are parsed with naga's
//! GLSL front-end and preferably run on the GL backend; WGSL models are parsed
//! with the WGSL front-end and run on the primary native backend. Either way the
//! pipeline is handed to wgpu as naga IR so parse errors carry source spans.

use std::{borrow::Cow, sync::mpsc};

use anyhow::{anyhow, Context, Result};
use bytemuck::{bytes_of, cast_slice};
use image::RgbaImage;
use slicer_core::{
    AxisFrame, BackendKind, MaterialLayout, ModelDescriptor, QuadVertex, RenderingBackend,
};
use slicer_shaders::{glsl, wgsl, SLICE_UNIFORM_OFFSET, UNIFORMS_SIZE};
use tracing::{debug, info, warn};
use wgpu::{
    util::DeviceExt, Adapter, Backends, BindGroup, BindGroupDescriptor, BindGroupEntry,
    BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingType, Buffer, BufferBindingType,
    BufferDescriptor, BufferUsages, Color, ColorTargetState, ColorWrites,
    CommandEncoderDescriptor, Device, DeviceDescriptor, ErrorFilter, Extent3d, Features,
    FragmentState, Instance, InstanceDescriptor, Limits, LoadOp, MultisampleState, Operations,
    PipelineLayoutDescriptor, PowerPreference, PrimitiveState, Queue, RenderPassColorAttachment,
    RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor, RequestAdapterOptions,
    ShaderModule, ShaderModuleDescriptor, ShaderSource, ShaderStages, StoreOp, Texture,
    TextureDescriptor, TextureDimension, TextureFormat, TextureUsages, TextureView,
    TextureViewDescriptor, VertexAttribute, VertexBufferLayout, VertexFormat, VertexState,
    VertexStepMode,
};

const TARGET_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
const BYTES_PER_PIXEL: u32 = 4;

/// Uniform payload shared by both shading languages (std140 / WGSL layout).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SliceUniforms {
    pub projection: [[f32; 4]; 4],
    pub camera: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
    pub slice: f32,
    pub material: f32,
    pub _padding: [f32; 2],
}

const _: () = assert!(core::mem::size_of::<SliceUniforms>() as u64 == UNIFORMS_SIZE);

impl SliceUniforms {
    pub fn from_frame(frame: &AxisFrame) -> Self {
        Self {
            projection: frame.projection.to_cols_array_2d(),
            camera: frame.camera.to_cols_array_2d(),
            model: frame.model.to_cols_array_2d(),
            slice: 0.0,
            material: 1.0,
            _padding: [0.0; 2],
        }
    }
}

/// Adapter, device and queue for one backend kind.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
}

fn preferred_backends(kind: BackendKind) -> Backends {
    match kind {
        BackendKind::OpenGl => Backends::GL,
        BackendKind::WebGpu => Backends::PRIMARY,
    }
}

impl GpuContext {
    /// Requests a headless device, falling back to any available backend when
    /// the preferred one has no adapter.
    pub async fn new(kind: BackendKind) -> Result<Self> {
        let preferred = preferred_backends(kind);
        match Self::with_backends(preferred).await {
            Ok(context) => Ok(context),
            Err(err) => {
                warn!(%kind, ?preferred, "no adapter on preferred backends ({err:#}); trying all");
                Self::with_backends(Backends::all()).await
            }
        }
    }

    async fn with_backends(backends: Backends) -> Result<Self> {
        let instance = Instance::new(&InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("no compatible GPU adapter found")?;

        let (device, queue) = adapter
            .request_device(&DeviceDescriptor {
                label: Some("Slicer Device"),
                required_features: Features::empty(),
                required_limits: Limits::downlevel_webgl2_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to request wgpu device")?;

        let info = adapter.get_info();
        info!(adapter = %info.name, backend = ?info.backend, "GPU device ready");

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }
}

/// Offscreen colour target and its read-back buffer.
struct RenderTarget {
    texture: Texture,
    view: TextureView,
    readback: Buffer,
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
}

impl RenderTarget {
    fn new(device: &Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&TextureDescriptor {
            label: Some("Slice Target"),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());

        let padded_bytes_per_row = padded_bytes_per_row(width);
        let readback = device.create_buffer(&BufferDescriptor {
            label: Some("Slice Readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            texture,
            view,
            readback,
            width,
            height,
            padded_bytes_per_row,
        }
    }
}

/// Pipeline and buffers for one (model, frame) pair.
struct SceneResources {
    pipeline: RenderPipeline,
    bind_group: BindGroup,
    uniforms: Buffer,
    vertices: Buffer,
}

/// Copy rows must be aligned to `COPY_BYTES_PER_ROW_ALIGNMENT`.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Strips row padding and reverses row order, so the returned buffer starts
/// with the bottom row of the rendered image.
pub fn unpad_rows_flipped(data: &[u8], width: u32, height: u32, padded_bytes_per_row: u32) -> Vec<u8> {
    let row_bytes = (width * BYTES_PER_PIXEL) as usize;
    let stride = padded_bytes_per_row as usize;
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in (0..height as usize).rev() {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_bytes]);
    }
    pixels
}

/// Headless renderer implementing [`RenderingBackend`] for either backend kind.
pub struct OffscreenRenderer {
    kind: BackendKind,
    context: Option<GpuContext>,
    target: Option<RenderTarget>,
    scene: Option<SceneResources>,
}

impl OffscreenRenderer {
    pub async fn new(kind: BackendKind) -> Result<Self> {
        let context = GpuContext::new(kind).await?;
        Ok(Self {
            kind,
            context: Some(context),
            target: None,
            scene: None,
        })
    }

    fn context(&self) -> Result<&GpuContext> {
        self.context
            .as_ref()
            .ok_or_else(|| anyhow!("{} renderer is closed", self.kind))
    }
}

/// Model shaders parsed to naga IR, ready to hand to a device.
pub enum ParsedShaders {
    /// Separate GLSL vertex and fragment stages, both entered through `main`.
    Glsl {
        vertex: naga::Module,
        fragment: naga::Module,
    },
    /// One WGSL module with `vs_main` and `fs_main`.
    Wgsl(naga::Module),
}

/// Assembles and parses the shaders for `model` on the given backend kind.
pub fn parse_shaders(
    kind: BackendKind,
    model: &ModelDescriptor,
    layout: MaterialLayout,
    selector: &str,
) -> Result<ParsedShaders> {
    match kind {
        BackendKind::OpenGl => {
            let vertex = parse_glsl(naga::ShaderStage::Vertex, glsl::VERTEX)
                .context("slice vertex shader")?;
            let fragment_src = glsl::fragment_source(&model.shader, layout, selector);
            let fragment = parse_glsl(naga::ShaderStage::Fragment, &fragment_src)
                .context("model fragment shader")?;
            Ok(ParsedShaders::Glsl { vertex, fragment })
        }
        BackendKind::WebGpu => {
            let src = wgsl::module_source(&model.shader, layout, selector);
            let module = naga::front::wgsl::parse_str(&src)
                .map_err(|err| anyhow!("{}", err.emit_to_string(&src)))
                .context("model shader")?;
            Ok(ParsedShaders::Wgsl(module))
        }
    }
}

fn parse_glsl(stage: naga::ShaderStage, source: &str) -> Result<naga::Module> {
    naga::front::glsl::Frontend::default()
        .parse(&naga::front::glsl::Options::from(stage), source)
        .map_err(|errors| anyhow!("{}", errors.emit_to_string(source)))
}

struct ShaderStagesSource {
    vertex: ShaderModule,
    vertex_entry: &'static str,
    /// `None` when the vertex module also holds the fragment entry point.
    fragment: Option<ShaderModule>,
    fragment_entry: &'static str,
}

impl ShaderStagesSource {
    fn fragment_module(&self) -> &ShaderModule {
        self.fragment.as_ref().unwrap_or(&self.vertex)
    }
}

impl ParsedShaders {
    fn create_modules(self, device: &Device) -> ShaderStagesSource {
        match self {
            ParsedShaders::Glsl { vertex, fragment } => ShaderStagesSource {
                vertex: naga_module(device, "slice.vert", vertex),
                vertex_entry: glsl::ENTRY_POINT,
                fragment: Some(naga_module(device, "slice.frag", fragment)),
                fragment_entry: glsl::ENTRY_POINT,
            },
            ParsedShaders::Wgsl(module) => ShaderStagesSource {
                vertex: naga_module(device, "slice.wgsl", module),
                vertex_entry: wgsl::VERTEX_ENTRY_POINT,
                fragment: None,
                fragment_entry: wgsl::FRAGMENT_ENTRY_POINT,
            },
        }
    }
}

fn naga_module(device: &Device, label: &str, module: naga::Module) -> ShaderModule {
    device.create_shader_module(ShaderModuleDescriptor {
        label: Some(label),
        source: ShaderSource::Naga(Cow::Owned(module)),
    })
}

/// Creates a backend of the requested kind, blocking on device acquisition.
pub fn create_backend(kind: BackendKind) -> Result<Box<dyn RenderingBackend>> {
    let renderer = pollster::block_on(OffscreenRenderer::new(kind))
        .with_context(|| format!("failed to initialise {kind} renderer"))?;
    Ok(Box::new(renderer))
}

impl RenderingBackend for OffscreenRenderer {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn init(&mut self, width: u32, height: u32, interactive: bool) -> Result<()> {
        if interactive {
            warn!("interactive preview is not available for offscreen rendering; continuing headless");
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("render target must be non-empty, got {width}x{height}"));
        }
        let resize = self
            .target
            .as_ref()
            .is_none_or(|t| t.width != width || t.height != height);
        if resize {
            let target = RenderTarget::new(&self.context()?.device, width, height);
            debug!(width, height, "render target resized");
            self.target = Some(target);
        }
        Ok(())
    }

    fn prepare(&mut self, model: &ModelDescriptor, frame: &AxisFrame) -> Result<()> {
        self.scene = None;
        let layout = model.material_layout()?;
        let device = &self.context()?.device;

        let parsed = parse_shaders(self.kind, model, layout, frame.selector)?;

        device.push_error_scope(ErrorFilter::Validation);
        let stages = parsed.create_modules(device);

        let uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Slice Uniforms"),
            contents: bytes_of(&SliceUniforms::from_frame(frame)),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });
        let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Slice Quad"),
            contents: cast_slice(&frame.quad),
            usage: BufferUsages::VERTEX,
        });

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("slice_bind_group_layout"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("Slice Bind Group"),
            layout: &bind_group_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: uniforms.as_entire_binding(),
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Slice Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Slice Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &stages.vertex,
                entry_point: Some(stages.vertex_entry),
                compilation_options: Default::default(),
                buffers: &[VertexBufferLayout {
                    array_stride: std::mem::size_of::<QuadVertex>() as u64,
                    step_mode: VertexStepMode::Vertex,
                    attributes: &[VertexAttribute {
                        format: VertexFormat::Float32x3,
                        offset: 0,
                        shader_location: 0,
                    }],
                }],
            },
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
            fragment: Some(FragmentState {
                module: stages.fragment_module(),
                entry_point: Some(stages.fragment_entry),
                compilation_options: Default::default(),
                targets: &[Some(ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(anyhow!("{err}")).context("failed to build slice pipeline");
        }

        debug!(kind = %self.kind, axis = %frame.axis, ?layout, "slice pipeline ready");
        self.scene = Some(SceneResources {
            pipeline,
            bind_group,
            uniforms,
            vertices,
        });
        Ok(())
    }

    fn render(&mut self, depth: f32, material: usize) -> Result<RgbaImage> {
        let GpuContext { device, queue, .. } = self.context()?;
        let target = self
            .target
            .as_ref()
            .context("render target not initialised")?;
        let scene = self.scene.as_ref().context("no frame prepared")?;

        let slice = [depth, material as f32];
        queue.write_buffer(&scene.uniforms, SLICE_UNIFORM_OFFSET, cast_slice(&slice));

        let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("Slice Encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Slice Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color::BLACK),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&scene.pipeline);
            pass.set_bind_group(0, &scene.bind_group, &[]);
            pass.set_vertex_buffer(0, scene.vertices.slice(..));
            pass.draw(0..6, 0..1);
        }
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &target.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(target.padded_bytes_per_row),
                    rows_per_image: Some(target.height),
                },
            },
            Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = target.readback.slice(..);
        let (tx, rx) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .context("device poll failed")?;
        rx.recv()
            .context("readback channel closed")?
            .context("failed to map readback buffer")?;

        let data = buffer_slice.get_mapped_range();
        let pixels = unpad_rows_flipped(
            &data,
            target.width,
            target.height,
            target.padded_bytes_per_row,
        );
        drop(data);
        target.readback.unmap();

        RgbaImage::from_raw(target.width, target.height, pixels)
            .context("readback size does not match the render target")
    }

    fn close(&mut self) {
        if self.context.is_some() {
            debug!(kind = %self.kind, "releasing GPU resources");
        }
        self.scene = None;
        self.target = None;
        self.context = None;
    }
}

impl Drop for OffscreenRenderer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slicer_core::{axis_frame, Axis, BoundingBox, Resolution, ShadingLanguage};

    #[test]
    fn rows_are_unpadded_and_flipped() {
        // 1-pixel wide, 3 rows, padded to 8 bytes per row.
        let data = [
            1, 1, 1, 1, 0xAA, 0xAA, 0xAA, 0xAA, //
            2, 2, 2, 2, 0xAA, 0xAA, 0xAA, 0xAA, //
            3, 3, 3, 3, 0xAA, 0xAA, 0xAA, 0xAA,
        ];
        let pixels = unpad_rows_flipped(&data, 1, 3, 8);
        assert_eq!(pixels, vec![3, 3, 3, 3, 2, 2, 2, 2, 1, 1, 1, 1]);
    }

    #[test]
    fn rows_pad_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
    }

    #[test]
    fn uniforms_carry_frame_transforms() {
        let bounds = BoundingBox::from_slices(&[0.0; 3], &[2.0; 3]).unwrap();
        let frame = axis_frame(Axis::Z, &bounds, &Resolution::uniform_microns(500.0).unwrap());
        let uniforms = SliceUniforms::from_frame(&frame);
        assert_eq!(uniforms.projection, frame.projection.to_cols_array_2d());
        assert_eq!(uniforms.camera, frame.camera.to_cols_array_2d());
        let bytes = bytes_of(&uniforms);
        let slice_at = SLICE_UNIFORM_OFFSET as usize;
        assert_eq!(&bytes[slice_at..slice_at + 4], &0.0f32.to_ne_bytes());
        assert_eq!(&bytes[slice_at + 4..slice_at + 8], &1.0f32.to_ne_bytes());
    }

    fn model(language: ShadingLanguage, shader: &str) -> ModelDescriptor {
        ModelDescriptor {
            min: vec![0.0; 3],
            max: vec![3.0; 3],
            materials: vec!["solid".into()],
            language,
            shader: shader.into(),
        }
    }

    #[test]
    fn parses_both_shading_languages() {
        let glsl_model = model(
            ShadingLanguage::Glsl,
            "void mainModel4(out vec4 materials, in vec3 xyz) {\n    materials = vec4(1.0);\n}\n",
        );
        let parsed = parse_shaders(
            BackendKind::OpenGl,
            &glsl_model,
            MaterialLayout::Vec4,
            "fragVert.xy,u_slice",
        )
        .unwrap();
        assert!(matches!(parsed, ParsedShaders::Glsl { .. }));

        let wgsl_model = model(ShadingLanguage::Wgsl, HALF_SPACE_WGSL);
        let parsed = parse_shaders(
            BackendKind::WebGpu,
            &wgsl_model,
            MaterialLayout::Vec4,
            "u_slice,fragVert.yz",
        )
        .unwrap();
        let ParsedShaders::Wgsl(module) = parsed else {
            panic!("expected a single WGSL module");
        };
        let entry_points: Vec<&str> = module.entry_points.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(entry_points, vec!["vs_main", "fs_main"]);
    }

    #[test]
    fn shader_errors_name_the_stage() {
        let broken = model(ShadingLanguage::Wgsl, "fn mainModel4(xyz: vec3f) -> vec4f { return }");
        let err = parse_shaders(BackendKind::WebGpu, &broken, MaterialLayout::Vec4, "fragVert.xy,u_slice")
            .err()
            .unwrap();
        assert!(format!("{err:#}").starts_with("model shader"));

        let broken = model(ShadingLanguage::Glsl, "void mainModel4(out vec4 m, in vec3 p) { m = }");
        let err = parse_shaders(BackendKind::OpenGl, &broken, MaterialLayout::Vec4, "fragVert.xy,u_slice")
            .err()
            .unwrap();
        assert!(format!("{err:#}").starts_with("model fragment shader"));
    }

    const HALF_SPACE_WGSL: &str = "
fn mainModel4(xyz: vec3f) -> vec4f {
    return vec4f(select(0.0, 1.0, xyz.y < 1.0), 0.0, 0.0, 0.0);
}
";

    /// Renders a half-space on real hardware; skipped when no adapter exists.
    #[test]
    fn rendered_rows_start_at_the_bottom() {
        let Ok(mut renderer) = pollster::block_on(OffscreenRenderer::new(BackendKind::WebGpu))
        else {
            eprintln!("skipping: no GPU adapter available");
            return;
        };
        let model = model(ShadingLanguage::Wgsl, HALF_SPACE_WGSL);
        let bounds = model.bounding_box().unwrap();
        let frame = axis_frame(Axis::Z, &bounds, &Resolution::uniform_microns(1000.0).unwrap());
        renderer
            .init(frame.raster.width, frame.raster.height, false)
            .unwrap();
        renderer.prepare(&model, &frame).unwrap();

        let raster = renderer.render(1.5, 1).unwrap();
        assert_eq!(raster.dimensions(), (4, 4));
        // Pixel centres sit at y = 0.375, 1.125, ... so only the bottom row is inside.
        for u in 0..4 {
            assert!(raster.get_pixel(u, 0)[0] > 0, "bottom row, column {u}");
            assert_eq!(raster.get_pixel(u, 3)[0], 0, "top row, column {u}");
        }

        // Material 2 reads the model's zero `y` channel.
        let raster = renderer.render(1.5, 2).unwrap();
        assert!(raster.pixels().all(|p| p[0] == 0));
        renderer.close();
        renderer.close();
    }
}
