// Descriptor set layouts, pools and writes
//
// Every sample binds a handful of fixed descriptor sets that are written
// once after creation, so the pool is sized exactly from the layouts.

use anyhow::{Context, Result};
use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::VulkanDevice;

/// One binding: slot, type, visible stages
pub type Binding = (u32, vk::DescriptorType, vk::ShaderStageFlags);

/// Aggregate descriptor counts per type for `sets` copies of the bindings
pub fn pool_sizes(bindings: &[Binding], sets: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut counts: BTreeMap<i32, u32> = BTreeMap::new();
    for (_, ty, _) in bindings {
        *counts.entry(ty.as_raw()).or_default() += sets;
    }
    counts
        .into_iter()
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
            ty: vk::DescriptorType::from_raw(ty),
            descriptor_count,
        })
        .collect()
}

pub struct DescriptorSetLayout {
    pub layout: vk::DescriptorSetLayout,
    pub bindings: Vec<Binding>,
    device: Arc<VulkanDevice>,
}

impl DescriptorSetLayout {
    pub fn new(device: &Arc<VulkanDevice>, bindings: &[Binding]) -> Result<Self> {
        let vk_bindings: Vec<_> = bindings
            .iter()
            .map(|&(binding, ty, stages)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(ty)
                    .descriptor_count(1)
                    .stage_flags(stages)
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);

        let layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .context("Failed to create descriptor set layout")?;

        Ok(Self {
            layout,
            bindings: bindings.to_vec(),
            device: device.clone(),
        })
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None)
        };
    }
}

pub struct DescriptorPool {
    pub pool: vk::DescriptorPool,
    device: Arc<VulkanDevice>,
}

impl DescriptorPool {
    /// Pool holding `sets_per_layout` sets of each given layout
    pub fn new(
        device: &Arc<VulkanDevice>,
        layouts: &[&DescriptorSetLayout],
        sets_per_layout: u32,
    ) -> Result<Self> {
        let bindings: Vec<Binding> = layouts
            .iter()
            .flat_map(|layout| layout.bindings.iter().copied())
            .collect();
        let sizes = pool_sizes(&bindings, sets_per_layout);
        let max_sets = (layouts.len() as u32 * sets_per_layout).max(1);

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&sizes)
            .max_sets(max_sets);

        let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        Ok(Self {
            pool,
            device: device.clone(),
        })
    }

    pub fn allocate(&self, layout: &DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let layouts = [layout.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor set")?;
        sets.into_iter().next().context("Driver returned no descriptor set")
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        // Sets are freed with the pool
        unsafe { self.device.device.destroy_descriptor_pool(self.pool, None) };
    }
}

enum WriteInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

/// Collects writes for one set and applies them in a single call
#[derive(Default)]
pub struct DescriptorWriter {
    writes: Vec<(u32, vk::DescriptorType, WriteInfo)>,
}

impl DescriptorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uniform_buffer(mut self, binding: u32, info: vk::DescriptorBufferInfo) -> Self {
        self.writes
            .push((binding, vk::DescriptorType::UNIFORM_BUFFER, WriteInfo::Buffer(info)));
        self
    }

    /// Separate sampled image (WGSL `texture_2d` / `texture_cube`)
    pub fn sampled_image(mut self, binding: u32, view: vk::ImageView) -> Self {
        let info = vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        self.writes
            .push((binding, vk::DescriptorType::SAMPLED_IMAGE, WriteInfo::Image(info)));
        self
    }

    pub fn sampler(mut self, binding: u32, sampler: vk::Sampler) -> Self {
        let info = vk::DescriptorImageInfo {
            sampler,
            image_view: vk::ImageView::null(),
            image_layout: vk::ImageLayout::UNDEFINED,
        };
        self.writes
            .push((binding, vk::DescriptorType::SAMPLER, WriteInfo::Image(info)));
        self
    }

    /// Input attachment in the layout the subpass reads it with
    pub fn input_attachment(mut self, binding: u32, view: vk::ImageView, layout: vk::ImageLayout) -> Self {
        let info = vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: view,
            image_layout: layout,
        };
        self.writes
            .push((binding, vk::DescriptorType::INPUT_ATTACHMENT, WriteInfo::Image(info)));
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn write(&self, device: &VulkanDevice, set: vk::DescriptorSet) {
        if self.is_empty() {
            return;
        }
        log::trace!("Updating {:?} with {} descriptors", set, self.len());

        // Write structs borrow the infos held in self
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|(binding, ty, info)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty);
                match info {
                    WriteInfo::Buffer(buffer) => write.buffer_info(std::slice::from_ref(buffer)),
                    WriteInfo::Image(image) => write.image_info(std::slice::from_ref(image)),
                }
            })
            .collect();

        unsafe { device.device.update_descriptor_sets(&writes, &[]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_aggregate_per_type() {
        let fragment = vk::ShaderStageFlags::FRAGMENT;
        let bindings = [
            (0, vk::DescriptorType::SAMPLED_IMAGE, fragment),
            (1, vk::DescriptorType::SAMPLED_IMAGE, fragment),
            (2, vk::DescriptorType::SAMPLER, fragment),
            (3, vk::DescriptorType::UNIFORM_BUFFER, fragment),
        ];

        let sizes = pool_sizes(&bindings, 2);
        assert_eq!(sizes.len(), 3);

        let count = |ty: vk::DescriptorType| {
            sizes
                .iter()
                .find(|size| size.ty == ty)
                .map(|size| size.descriptor_count)
        };
        assert_eq!(count(vk::DescriptorType::SAMPLED_IMAGE), Some(4));
        assert_eq!(count(vk::DescriptorType::SAMPLER), Some(2));
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), Some(2));
        assert_eq!(count(vk::DescriptorType::INPUT_ATTACHMENT), None);
    }

    #[test]
    fn no_bindings_no_sizes() {
        assert!(pool_sizes(&[], 4).is_empty());
    }

    #[test]
    fn writer_collects_in_order() {
        let writer = DescriptorWriter::new()
            .sampled_image(0, vk::ImageView::null())
            .sampler(1, vk::Sampler::null())
            .input_attachment(2, vk::ImageView::null(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(writer.len(), 3);
        assert_eq!(writer.writes[2].1, vk::DescriptorType::INPUT_ATTACHMENT);
    }

    #[test]
    fn new_writer_is_empty() {
        assert!(DescriptorWriter::new().is_empty());
        assert!(!DescriptorWriter::new().sampler(0, vk::Sampler::null()).is_empty());
    }
}
