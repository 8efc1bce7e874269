// Images, image views and samplers
//
// Attachments and textures share one type. Cube-compatible images carry a
// CUBE view for sampling plus one 2D view per face for rendering.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspects a view of this format covers
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match (is_depth_format(format), has_stencil(format)) {
        (true, true) => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        (true, false) => vk::ImageAspectFlags::DEPTH,
        (false, true) => vk::ImageAspectFlags::STENCIL,
        (false, false) => vk::ImageAspectFlags::COLOR,
    }
}

/// Aspects of the views made for an image; sampled depth reads its depth
/// aspect only, attachment views cover every aspect the format has
pub fn view_aspect(format: vk::Format, usage: vk::ImageUsageFlags) -> vk::ImageAspectFlags {
    if is_depth_format(format) && usage.contains(vk::ImageUsageFlags::SAMPLED) {
        vk::ImageAspectFlags::DEPTH
    } else {
        aspect_for_format(format)
    }
}

/// Everything needed to create an image
#[derive(Debug, Clone)]
pub struct ImageDesc {
    pub name: String,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
    pub layers: u32,
    pub cube: bool,
}

impl ImageDesc {
    pub fn new(
        name: impl Into<String>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            name: name.into(),
            extent,
            format,
            usage,
            samples: vk::SampleCountFlags::TYPE_1,
            layers: 1,
            cube: false,
        }
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// Six layers, cube compatible
    pub fn cube(mut self) -> Self {
        self.layers = 6;
        self.cube = true;
        self
    }

    pub fn layers(mut self, layers: u32) -> Self {
        self.layers = layers;
        self
    }
}

/// Image + allocation + views
pub struct Image {
    pub image: vk::Image,
    /// Whole-image view (CUBE for cube images, 2D_ARRAY for other layered ones)
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub samples: vk::SampleCountFlags,
    pub layers: u32,
    layer_views: Vec<vk::ImageView>,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Image {
    pub fn new(device: &Arc<VulkanDevice>, desc: &ImageDesc) -> Result<Self> {
        let flags = if desc.cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(desc.layers)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(desc.samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .with_context(|| format!("Failed to create image '{}'", desc.name))?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = device
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: &desc.name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate memory for image '{}'", desc.name));

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        // From here on Drop cleans up whatever was created
        let mut result = Self {
            image,
            view: vk::ImageView::null(),
            format: desc.format,
            extent: desc.extent,
            samples: desc.samples,
            layers: desc.layers,
            layer_views: Vec::new(),
            allocation: Some(allocation),
            device: device.clone(),
        };

        unsafe {
            let allocation = result.allocation.as_ref().context("Image allocation missing")?;
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .with_context(|| format!("Failed to bind memory for image '{}'", desc.name))?;

        let view_type = match (desc.cube, desc.layers) {
            (true, _) => vk::ImageViewType::CUBE,
            (false, 1) => vk::ImageViewType::TYPE_2D,
            (false, _) => vk::ImageViewType::TYPE_2D_ARRAY,
        };
        let aspect_mask = view_aspect(desc.format, desc.usage);
        result.view = result.create_view(view_type, aspect_mask, 0, desc.layers)?;

        if desc.layers > 1 {
            for layer in 0..desc.layers {
                let view = result.create_view(vk::ImageViewType::TYPE_2D, aspect_mask, layer, 1)?;
                result.layer_views.push(view);
            }
        }

        Ok(result)
    }

    fn create_view(
        &self,
        view_type: vk::ImageViewType,
        aspect_mask: vk::ImageAspectFlags,
        base_layer: u32,
        layer_count: u32,
    ) -> Result<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(view_type)
            .format(self.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: base_layer,
                layer_count,
            });

        unsafe { self.device.device.create_image_view(&view_info, None) }
            .context("Failed to create image view")
    }

    /// 2D view of a single layer; the whole-image view for single-layer images
    pub fn layer_view(&self, layer: u32) -> vk::ImageView {
        self.layer_views
            .get(layer as usize)
            .copied()
            .unwrap_or(self.view)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.layer_views {
                self.device.device.destroy_image_view(view, None);
            }
            if self.view != vk::ImageView::null() {
                self.device.device.destroy_image_view(self.view, None);
            }
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::error!("Failed to free image memory: {}", e);
            }
        }
    }
}

/// Linear-filtering sampler
pub struct Sampler {
    pub sampler: vk::Sampler,
    device: Arc<VulkanDevice>,
}

impl Sampler {
    pub fn new(
        device: &Arc<VulkanDevice>,
        address_mode: vk::SamplerAddressMode,
        anisotropy: Option<f32>,
    ) -> Result<Self> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .min_lod(0.0)
            .max_lod(1.0)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);

        let sampler = unsafe { device.device.create_sampler(&sampler_info, None) }
            .context("Failed to create sampler")?;

        Ok(Self {
            sampler,
            device: device.clone(),
        })
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_sampler(self.sampler, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_get_depth_aspects() {
        assert_eq!(aspect_for_format(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_for_format(vk::Format::R16G16B16A16_SFLOAT),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn depth_stencil_attachments_view_both_aspects() {
        let attachment = vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(
            view_aspect(vk::Format::D24_UNORM_S8_UINT, attachment),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            view_aspect(
                vk::Format::D24_UNORM_S8_UINT,
                attachment | vk::ImageUsageFlags::SAMPLED
            ),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            view_aspect(vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn stencil_only_where_present() {
        assert!(has_stencil(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
        assert!(!is_depth_format(vk::Format::R8G8B8A8_UNORM));
    }

    #[test]
    fn cube_desc_has_six_layers() {
        let desc = ImageDesc::new(
            "env",
            vk::Extent2D { width: 64, height: 64 },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
        )
        .cube();
        assert_eq!(desc.layers, 6);
        assert!(desc.cube);
        assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_1);
    }
}
