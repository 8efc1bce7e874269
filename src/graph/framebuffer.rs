// Offscreen render targets
//
// Owns the render pass compiled from a `RenderPassDesc`, one image per
// attachment and one framebuffer per layer. Layered attachments (cube maps)
// are rendered one face at a time through per-layer views.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::pass::{AttachmentId, RenderPassDesc};
use crate::backend::image::{Image, ImageDesc};
use crate::backend::VulkanDevice;

/// Layering of a target's attachments
#[derive(Debug, Clone)]
pub struct TargetOptions {
    /// Layer count of the layered attachments
    pub layers: u32,
    /// Create the layered attachments cube compatible
    pub cube: bool,
    pub layered: Vec<AttachmentId>,
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self {
            layers: 1,
            cube: false,
            layered: Vec::new(),
        }
    }
}

impl TargetOptions {
    /// Render the given attachments face by face into cube images
    pub fn cube(layered: &[AttachmentId]) -> Self {
        Self {
            layers: 6,
            cube: true,
            layered: layered.to_vec(),
        }
    }

    fn is_layered(&self, id: AttachmentId) -> bool {
        self.layers > 1 && self.layered.contains(&id)
    }

    fn framebuffer_count(&self) -> u32 {
        if self.layered.is_empty() {
            1
        } else {
            self.layers.max(1)
        }
    }
}

pub struct OffscreenTarget {
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
    images: Vec<Image>,
    framebuffers: Vec<vk::Framebuffer>,
    clear_values: Vec<vk::ClearValue>,
    subpass_count: u32,
    device: Arc<VulkanDevice>,
}

impl OffscreenTarget {
    pub fn new(device: &Arc<VulkanDevice>, desc: &RenderPassDesc, extent: vk::Extent2D) -> Result<Self> {
        Self::with_options(device, desc, extent, TargetOptions::default())
    }

    pub fn with_options(
        device: &Arc<VulkanDevice>,
        desc: &RenderPassDesc,
        extent: vk::Extent2D,
        options: TargetOptions,
    ) -> Result<Self> {
        // Step 1: Derive the render pass from the description
        let compiled = desc.compile().context("Invalid render pass description")?;
        let render_pass = compiled.create(&device.device)?;

        let mut target = Self {
            render_pass,
            extent,
            images: Vec::new(),
            framebuffers: Vec::new(),
            clear_values: compiled.vk_clear_values(),
            subpass_count: compiled.subpasses.len() as u32,
            device: device.clone(),
        };

        // Step 2: One image per attachment
        for (index, attachment) in desc.attachments().iter().enumerate() {
            let id = AttachmentId(index);
            let mut image_desc =
                ImageDesc::new(&attachment.name, extent, attachment.format, desc.image_usage(id))
                    .samples(attachment.samples);
            if options.is_layered(id) {
                image_desc = if options.cube {
                    image_desc.cube()
                } else {
                    image_desc.layers(options.layers)
                };
            }
            target.images.push(Image::new(device, &image_desc)?);
        }

        // Step 3: One framebuffer per layer
        for layer in 0..options.framebuffer_count() {
            let views: Vec<vk::ImageView> = target
                .images
                .iter()
                .enumerate()
                .map(|(index, image)| {
                    if options.is_layered(AttachmentId(index)) {
                        image.layer_view(layer)
                    } else {
                        image.view
                    }
                })
                .collect();

            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&views)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
                .context("Failed to create framebuffer")?;
            target.framebuffers.push(framebuffer);
        }

        log::debug!(
            "Offscreen target: {} attachments, {} subpasses, {} framebuffers, {}x{}",
            target.images.len(),
            target.subpass_count,
            target.framebuffers.len(),
            extent.width,
            extent.height
        );

        Ok(target)
    }

    pub fn image(&self, id: AttachmentId) -> &Image {
        &self.images[id.0]
    }

    pub fn layer_count(&self) -> u32 {
        self.framebuffers.len() as u32
    }

    /// Begin the pass on one layer's framebuffer and cover the whole target
    pub fn begin(&self, cmd: vk::CommandBuffer, layer: u32) -> Result<()> {
        let framebuffer = *self
            .framebuffers
            .get(layer as usize)
            .with_context(|| format!("Target has no layer {}", layer))?;

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            })
            .clear_values(&self.clear_values);

        unsafe {
            self.device
                .device
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
        set_viewport(
            &self.device.device,
            cmd,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            },
        );
        Ok(())
    }

    pub fn next_subpass(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .device
                .cmd_next_subpass(cmd, vk::SubpassContents::INLINE)
        };
    }

    pub fn end(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.device.cmd_end_render_pass(cmd) };
    }
}

impl Drop for OffscreenTarget {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
        // Images are dropped after this
    }
}

/// Set viewport and scissor to a rectangle of the current target
pub fn set_viewport(device: &ash::Device, cmd: vk::CommandBuffer, area: vk::Rect2D) {
    let viewport = vk::Viewport {
        x: area.offset.x as f32,
        y: area.offset.y as f32,
        width: area.extent.width as f32,
        height: area.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    unsafe {
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[area]);
    }
}

/// Split a target into `count` equal columns
pub fn columns(extent: vk::Extent2D, count: u32) -> Vec<vk::Rect2D> {
    let count = count.max(1);
    let width = extent.width / count;
    (0..count)
        .map(|i| vk::Rect2D {
            offset: vk::Offset2D {
                x: (i * width) as i32,
                y: 0,
            },
            extent: vk::Extent2D {
                // Last column takes the remainder
                width: if i + 1 == count { extent.width - i * width } else { width },
                height: extent.height,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_options_layer_only_listed_attachments() {
        let options = TargetOptions::cube(&[AttachmentId(0)]);
        assert!(options.is_layered(AttachmentId(0)));
        assert!(!options.is_layered(AttachmentId(1)));
        assert_eq!(options.framebuffer_count(), 6);
    }

    #[test]
    fn default_options_have_one_framebuffer() {
        let options = TargetOptions::default();
        assert_eq!(options.framebuffer_count(), 1);
        assert!(!options.is_layered(AttachmentId(0)));
    }

    #[test]
    fn columns_cover_the_whole_width() {
        let extent = vk::Extent2D { width: 1280, height: 720 };
        let rects = columns(extent, 3);
        assert_eq!(rects.len(), 3);
        assert_eq!(rects[0].offset.x, 0);
        assert_eq!(rects[1].offset.x, 426);
        let total: u32 = rects.iter().map(|r| r.extent.width).sum();
        assert_eq!(total, 1280);
        assert!(rects.iter().all(|r| r.extent.height == 720));
    }
}
