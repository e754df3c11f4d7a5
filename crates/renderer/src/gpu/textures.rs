use std::collections::HashMap;

use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::backend::TextureId;
use crate::textures::DecodedImage;
use crate::types::{TextureUnit, MAX_TEXTURE_UNITS};

struct TextureResource {
    unit: TextureUnit,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// Effect textures plus the set 1 bind group they are sampled through.
///
/// Units without a bound texture sample a transparent 1x1 placeholder.
pub(crate) struct TextureStore {
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    placeholder: wgpu::TextureView,
    textures: HashMap<TextureId, TextureResource>,
    bound: [Option<TextureId>; MAX_TEXTURE_UNITS],
    bind_group: Option<wgpu::BindGroup>,
    next_id: u32,
}

impl TextureStore {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture layout"),
            entries: &build_layout_entries(),
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("effect texture sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let placeholder = create_texture(
            device,
            queue,
            "placeholder texture",
            1,
            1,
            &[0, 0, 0, 0],
        )
        .create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            layout,
            sampler,
            placeholder,
            textures: HashMap::new(),
            bound: [None; MAX_TEXTURE_UNITS],
            bind_group: None,
            next_id: 0,
        }
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn create(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        unit: TextureUnit,
    ) -> TextureId {
        self.next_id += 1;
        let id = TextureId(self.next_id);
        let texture = create_texture(
            device,
            queue,
            &format!("texture unit {unit}"),
            1,
            1,
            &[0, 0, 0, 0],
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.textures.insert(
            id,
            TextureResource {
                unit,
                texture,
                view,
            },
        );
        id
    }

    /// Replaces the texture's storage with the decoded pixels.
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        id: TextureId,
        image: &DecodedImage,
    ) -> Result<(), String> {
        let expected = image.width as usize * image.height as usize * 4;
        if image.width == 0 || image.height == 0 || image.pixels.len() != expected {
            return Err(format!(
                "image of {}x{} carries {} bytes, expected {expected}",
                image.width,
                image.height,
                image.pixels.len()
            ));
        }
        let max = device.limits().max_texture_dimension_2d;
        if image.width > max || image.height > max {
            return Err(format!(
                "image of {}x{} exceeds the GPU texture limit of {max}",
                image.width, image.height
            ));
        }
        let resource = self
            .textures
            .get_mut(&id)
            .ok_or_else(|| format!("unknown texture {}", id.0))?;
        resource.texture = create_texture(
            device,
            queue,
            &format!("texture unit {}", resource.unit),
            image.width,
            image.height,
            &image.pixels,
        );
        resource.view = resource
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        if self.bound.contains(&Some(id)) {
            self.bind_group = None;
        }
        Ok(())
    }

    pub fn bind(&mut self, unit: TextureUnit, id: TextureId) {
        let slot = &mut self.bound[unit.index()];
        if *slot != Some(id) {
            *slot = Some(id);
            self.bind_group = None;
        }
    }

    pub fn release(&mut self, id: TextureId) {
        if let Some(resource) = self.textures.remove(&id) {
            resource.texture.destroy();
        }
        for slot in self.bound.iter_mut().filter(|slot| **slot == Some(id)) {
            *slot = None;
            self.bind_group = None;
        }
    }

    /// Returns the bind group for the current bindings, rebuilding it if needed.
    pub fn bind_group(&mut self, device: &wgpu::Device) -> &wgpu::BindGroup {
        let Self {
            layout,
            sampler,
            placeholder,
            textures,
            bound,
            bind_group,
            ..
        } = self;
        bind_group.get_or_insert_with(|| {
            let mut entries = Vec::with_capacity(MAX_TEXTURE_UNITS * 2);
            for (index, slot) in bound.iter().enumerate() {
                let view = slot
                    .and_then(|id| textures.get(&id))
                    .map(|resource| &resource.view)
                    .unwrap_or(&*placeholder);
                entries.push(wgpu::BindGroupEntry {
                    binding: (index as u32) * 2,
                    resource: wgpu::BindingResource::TextureView(view),
                });
                entries.push(wgpu::BindGroupEntry {
                    binding: (index as u32) * 2 + 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                });
            }
            tracing::trace!("rebuilding texture bind group");
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("texture bind group"),
                layout,
                entries: &entries,
            })
        })
    }
}

fn create_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    width: u32,
    height: u32,
    data: &[u8],
) -> wgpu::Texture {
    device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        TextureDataOrder::LayerMajor,
        data,
    )
}

fn build_layout_entries() -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(MAX_TEXTURE_UNITS * 2);
    for index in 0..MAX_TEXTURE_UNITS as u32 {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2 + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}
