// Frame capture
//
// Copies a sample's final image into a host-visible buffer and writes it
// out as PNG. The image must be in TRANSFER_SRC_OPTIMAL, which is how every
// sample leaves its output.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{Buffer, Image, VulkanDevice};

const BYTES_PER_PIXEL: u64 = 4;

/// Capture file of a sample inside `dir`
pub fn capture_path(dir: &Path, sample: &str) -> PathBuf {
    dir.join(format!("{}.png", sample))
}

/// Wrap tightly packed RGBA8 pixels
pub fn to_rgba(width: u32, height: u32, pixels: &[u8]) -> Result<RgbaImage> {
    let expected = width as u64 * height as u64 * BYTES_PER_PIXEL;
    if pixels.len() as u64 != expected {
        anyhow::bail!(
            "Readback holds {} bytes, a {}x{} RGBA8 image needs {}",
            pixels.len(),
            width,
            height,
            expected
        );
    }
    RgbaImage::from_raw(width, height, pixels.to_vec()).context("Pixel buffer has the wrong size")
}

/// Makes the copy into `buffer` visible to the mapped pointer
pub fn readback_barrier(buffer: vk::Buffer) -> vk::BufferMemoryBarrier<'static> {
    vk::BufferMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::HOST_READ)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

/// Read `image` back and save it as `<dir>/<sample>.png`
pub fn save_png(device: &Arc<VulkanDevice>, image: &Image, dir: &Path, sample: &str) -> Result<PathBuf> {
    if image.format != vk::Format::R8G8B8A8_UNORM {
        anyhow::bail!("Capture supports R8G8B8A8_UNORM only, image is {:?}", image.format);
    }

    let extent = image.extent;
    let size = extent.width as u64 * extent.height as u64 * BYTES_PER_PIXEL;
    let readback = Buffer::new(
        device,
        &format!("{} readback", sample),
        size,
        vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuToCpu,
    )?;

    device.immediate_submit(|raw, cmd| {
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0, // Tightly packed
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };
        unsafe {
            raw.cmd_copy_image_to_buffer(
                cmd,
                image.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                readback.buffer,
                &[region],
            );

            raw.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                &[readback_barrier(readback.buffer)],
                &[],
            );
        }
        Ok(())
    })?;

    let pixels = to_rgba(extent.width, extent.height, readback.mapped_bytes()?)?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create capture directory {:?}", dir))?;
    let path = capture_path(dir, sample);
    pixels
        .save(&path)
        .with_context(|| format!("Failed to write {:?}", path))?;

    log::info!("Captured {} to {:?}", sample, path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_are_named_after_the_sample() {
        assert_eq!(
            capture_path(Path::new("out"), "deferred"),
            Path::new("out").join("deferred.png")
        );
    }

    #[test]
    fn pixels_keep_their_order() {
        let pixels: Vec<u8> = (0..2 * 2 * 4).map(|i| i as u8).collect();
        let image = to_rgba(2, 2, &pixels).unwrap();
        assert_eq!(image.get_pixel(1, 0).0, [4, 5, 6, 7]);
        assert_eq!(image.get_pixel(0, 1).0, [8, 9, 10, 11]);
    }

    #[test]
    fn readback_waits_for_the_transfer_write() {
        let barrier = readback_barrier(vk::Buffer::null());
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::HOST_READ);
        assert_eq!(barrier.size, vk::WHOLE_SIZE);
    }

    #[test]
    fn short_readback_is_rejected() {
        let err = to_rgba(4, 4, &[0; 60]).unwrap_err();
        assert!(err.to_string().contains("needs 64"));
    }
}
