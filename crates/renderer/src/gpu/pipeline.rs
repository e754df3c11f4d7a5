use std::borrow::Cow;
use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::backend::UniformUpload;
use crate::compile::{
    EffectLayout, EngineField, TranslatedShader, ENGINE_BLOCK_SIZE, FULLSCREEN_VERTICES,
};
use crate::types::TextureUnit;

/// std140 image of the engine block.
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct EngineBlock {
    pub resolution: [f32; 2],
    pub time: f32,
    pub scroll: f32,
    pub event_time: f32,
    pub _padding: [f32; 3],
}

unsafe impl Zeroable for EngineBlock {}
unsafe impl Pod for EngineBlock {}

impl EngineBlock {
    pub fn write(&mut self, field: EngineField, value: UniformUpload<'_>) -> Result<(), String> {
        match (field, value) {
            (EngineField::Resolution, UniformUpload::Vec2(value)) => self.resolution = value,
            (EngineField::Time, UniformUpload::Float(value)) => self.time = value,
            (EngineField::Scroll, UniformUpload::Float(value)) => self.scroll = value,
            (EngineField::EventTime, UniformUpload::Float(value)) => self.event_time = value,
            (field, value) => {
                return Err(format!(
                    "engine uniform '{}' cannot accept {}",
                    field.uniform_name(),
                    value.shape()
                ))
            }
        }
        Ok(())
    }
}

/// What a resolved uniform location points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UniformTarget {
    Engine(EngineField),
    Effect(usize),
    Texture(TextureUnit),
}

/// Bind group layout for set 0, shared by every program.
pub(crate) fn create_uniform_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("uniform layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}

/// A linked program: pipeline, uniform buffers, and their CPU-side images.
pub(crate) struct GpuProgram {
    pub pipeline: wgpu::RenderPipeline,
    pub uniform_bind_group: wgpu::BindGroup,
    engine_buffer: wgpu::Buffer,
    effect_buffer: wgpu::Buffer,
    engine: EngineBlock,
    effect: Vec<u8>,
    effect_layout: EffectLayout,
    targets: Vec<UniformTarget>,
    names: HashMap<String, u32>,
    dirty: bool,
}

impl GpuProgram {
    /// Creates the pipeline inside a validation error scope so driver-side
    /// rejections come back as diagnostics instead of panics.
    pub fn link(
        device: &wgpu::Device,
        uniform_layout: &wgpu::BindGroupLayout,
        texture_layout: &wgpu::BindGroupLayout,
        format: wgpu::TextureFormat,
        vertex: &TranslatedShader,
        fragment: &TranslatedShader,
    ) -> Result<Self, String> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("effect vertex"),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(&vertex.source),
                stage: vertex.naga_stage(),
                defines: &[],
            },
        });
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("effect fragment"),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(&fragment.source),
                stage: fragment.naga_stage(),
                defines: &[],
            },
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("effect pipeline layout"),
            bind_group_layouts: &[uniform_layout, texture_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("effect pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some("main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState {
                        color: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::SrcAlpha,
                            dst_factor: wgpu::BlendFactor::One,
                            operation: wgpu::BlendOperation::Add,
                        },
                        alpha: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::SrcAlpha,
                            dst_factor: wgpu::BlendFactor::One,
                            operation: wgpu::BlendOperation::Add,
                        },
                    }),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(err.to_string());
        }

        let engine = EngineBlock::default();
        let engine_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("engine uniforms"),
            contents: bytemuck::bytes_of(&engine),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let effect = vec![0u8; fragment.effect.buffer_size() as usize];
        let effect_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("effect uniforms"),
            contents: &effect,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: uniform_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: engine_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: effect_buffer.as_entire_binding(),
                },
            ],
        });

        let targets = collect_targets(vertex, fragment);
        let names = targets
            .iter()
            .enumerate()
            .map(|(index, (name, _))| (name.clone(), index as u32))
            .collect();

        Ok(Self {
            pipeline,
            uniform_bind_group,
            engine_buffer,
            effect_buffer,
            engine,
            effect,
            effect_layout: fragment.effect.clone(),
            targets: targets.into_iter().map(|(_, target)| target).collect(),
            names,
            dirty: false,
        })
    }

    pub fn location(&self, name: &str) -> Option<u32> {
        self.names.get(name).copied()
    }

    pub fn write(&mut self, index: u32, value: UniformUpload<'_>) -> Result<(), String> {
        let target = self
            .targets
            .get(index as usize)
            .copied()
            .ok_or_else(|| format!("unknown uniform location {index}"))?;
        match target {
            UniformTarget::Engine(field) => self.engine.write(field, value)?,
            UniformTarget::Effect(member) => {
                let member = self
                    .effect_layout
                    .members
                    .get(member)
                    .ok_or_else(|| format!("unknown effect member {member}"))?;
                member.write(&mut self.effect, value)?;
            }
            UniformTarget::Texture(unit) => {
                return Err(format!(
                    "'{}' is a sampler and cannot accept {}",
                    unit.uniform_name(),
                    value.shape()
                ))
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Pushes pending uniform writes to the GPU buffers.
    pub fn flush(&mut self, queue: &wgpu::Queue) {
        if !self.dirty {
            return;
        }
        queue.write_buffer(&self.engine_buffer, 0, bytemuck::bytes_of(&self.engine));
        queue.write_buffer(&self.effect_buffer, 0, &self.effect);
        self.dirty = false;
    }

    pub fn vertex_count(&self) -> u32 {
        FULLSCREEN_VERTICES
    }

    pub fn destroy(self) {
        self.engine_buffer.destroy();
        self.effect_buffer.destroy();
    }
}

/// Uniform names the linked program actually declares, in location order.
fn collect_targets(
    vertex: &TranslatedShader,
    fragment: &TranslatedShader,
) -> Vec<(String, UniformTarget)> {
    let mut targets: Vec<(String, UniformTarget)> = Vec::new();
    for field in vertex.engine_fields.iter().chain(&fragment.engine_fields) {
        let name = field.uniform_name();
        if !targets.iter().any(|(known, _)| known == name) {
            targets.push((name.to_string(), UniformTarget::Engine(*field)));
        }
    }
    for (index, member) in fragment.effect.members.iter().enumerate() {
        targets.push((member.name.clone(), UniformTarget::Effect(index)));
    }
    for unit in &fragment.textures {
        targets.push((unit.uniform_name(), UniformTarget::Texture(*unit)));
    }
    targets
}

const _: () = assert!(std::mem::size_of::<EngineBlock>() as u64 == ENGINE_BLOCK_SIZE);
