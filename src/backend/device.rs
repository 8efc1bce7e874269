// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Physical device selection (prefer discrete GPU)
// - Logical device + queue creation with optional features
// - Memory allocator setup
// - One-shot command submission for uploads and readbacks

use anyhow::{Context, Result};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Optional device features a sample may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFeature {
    SamplerAnisotropy,
    FillModeNonSolid,
    TessellationShader,
    SampleRateShading,
}

impl DeviceFeature {
    pub fn is_set(self, features: &vk::PhysicalDeviceFeatures) -> bool {
        let flag = match self {
            DeviceFeature::SamplerAnisotropy => features.sampler_anisotropy,
            DeviceFeature::FillModeNonSolid => features.fill_mode_non_solid,
            DeviceFeature::TessellationShader => features.tessellation_shader,
            DeviceFeature::SampleRateShading => features.sample_rate_shading,
        };
        flag == vk::TRUE
    }

    fn set(self, features: &mut vk::PhysicalDeviceFeatures) {
        match self {
            DeviceFeature::SamplerAnisotropy => features.sampler_anisotropy = vk::TRUE,
            DeviceFeature::FillModeNonSolid => features.fill_mode_non_solid = vk::TRUE,
            DeviceFeature::TessellationShader => features.tessellation_shader = vk::TRUE,
            DeviceFeature::SampleRateShading => features.sample_rate_shading = vk::TRUE,
        }
    }
}

/// Enable every wanted feature the device supports.
///
/// Returns the feature struct to pass at device creation and the wanted
/// features that had to be left out.
pub fn select_features(
    supported: &vk::PhysicalDeviceFeatures,
    wanted: &[DeviceFeature],
) -> (vk::PhysicalDeviceFeatures, Vec<DeviceFeature>) {
    let mut enabled = vk::PhysicalDeviceFeatures::default();
    let mut missing = Vec::new();

    for &feature in wanted {
        if feature.is_set(supported) {
            feature.set(&mut enabled);
        } else if !missing.contains(&feature) {
            missing.push(feature);
        }
    }

    (enabled, missing)
}

/// Rank physical device types, higher is better
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 1,
    }
}

/// Highest sample count usable for both color and depth attachments
pub fn max_sample_count_for_limits(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| counts.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Clamp a requested sample count to what the device can do
pub fn clamp_sample_count(
    requested: vk::SampleCountFlags,
    max: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    // Sample count flags are single bits ordered by count
    if requested.as_raw() > max.as_raw() {
        max
    } else {
        requested
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Vulkan handles (order matters for drop!)
    pub allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    pub enabled_features: vk::PhysicalDeviceFeatures,
}

impl VulkanDevice {
    /// Create Vulkan device
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    /// * `wanted_features` - Optional features to enable when supported
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        wanted_features: &[DeviceFeature],
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance (validation only if the layer is installed)
        let enable_validation = enable_validation && Self::validation_layer_available(&entry)?;
        let instance = Self::create_instance(&entry, app_name, enable_validation)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 4: Pick physical device (GPU)
        let (physical_device, graphics_queue_family) = Self::pick_physical_device(&instance)?;

        // Step 5: Resolve optional features against what the GPU supports
        let supported = unsafe { instance.get_physical_device_features(physical_device) };
        let (enabled_features, missing) = select_features(&supported, wanted_features);
        for feature in &missing {
            log::warn!("Device feature {:?} not supported, dependent samples will be skipped", feature);
        }

        // Step 6: Create logical device
        let (device, graphics_queue) = Self::create_logical_device(
            &instance,
            physical_device,
            graphics_queue_family,
            &enabled_features,
        )?;

        // Step 7: Cache device properties
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "<unnamed>".to_string())
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        // Step 8: Create memory allocator
        let allocator = Self::create_allocator(&instance, physical_device, &device)?;

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            _entry: entry,
            graphics_queue,
            graphics_queue_family,
            debug_utils,
            properties,
            enabled_features,
        }))
    }

    fn validation_layer_available(entry: &Entry) -> Result<bool> {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }
            .context("Failed to enumerate instance layers")?;

        let available = layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER));

        if !available {
            log::warn!("Validation requested but {:?} is not installed", VALIDATION_LAYER);
        }
        Ok(available)
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = c"vk-samples";

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        // Headless: no surface extensions, only debug utils when validating
        let mut extensions = Vec::new();
        let mut layer_names = Vec::new();
        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            layer_names.push(VALIDATION_LAYER.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        // Score each device
        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };

            // Find graphics queue family
            let queue_families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };

            let graphics_family = queue_families
                .iter()
                .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|i| i as u32);

            if let Some(graphics_family) = graphics_family {
                let score = device_type_score(props.device_type);
                if score > best_score {
                    best_score = score;
                    best_device = Some((device, graphics_family));
                }
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
        features: &vk::PhysicalDeviceFeatures,
    ) -> Result<(ash::Device, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_features(features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        Ok((device, graphics_queue))
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Allocator> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .context("Failed to create memory allocator")?;

        Ok(allocator)
    }

    /// Whether an optional feature was enabled at device creation
    pub fn supports(&self, feature: DeviceFeature) -> bool {
        feature.is_set(&self.enabled_features)
    }

    /// Highest MSAA sample count usable with color + depth attachments
    pub fn max_sample_count(&self) -> vk::SampleCountFlags {
        max_sample_count_for_limits(&self.properties.limits)
    }

    /// Anisotropy to use for samplers, `None` when the feature is off
    pub fn max_anisotropy(&self, requested: f32) -> Option<f32> {
        if requested <= 1.0 || !self.supports(DeviceFeature::SamplerAnisotropy) {
            return None;
        }
        Some(requested.min(self.properties.limits.max_sampler_anisotropy))
    }

    /// First depth format usable as an optimal-tiling depth attachment
    pub fn depth_format(&self) -> Result<vk::Format> {
        [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ]
        .into_iter()
        .find(|&format| {
            let props = unsafe {
                self.instance
                    .get_physical_device_format_properties(self.physical_device, format)
            };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .context("No supported depth format")
    }

    /// Record and submit a one-shot command buffer, blocking until the GPU
    /// has executed it
    pub fn immediate_submit<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
    {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe { self.device.create_command_pool(&pool_info, None) }
            .context("Failed to create one-shot command pool")?;

        let result = self.submit_from_pool(pool, record);

        // Destroying the pool frees its command buffers
        unsafe { self.device.destroy_command_pool(pool, None) };
        result
    }

    fn submit_from_pool<F>(&self, pool: vk::CommandPool, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
    {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate one-shot command buffer")?[0];

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }?;

        record(&self.device, cmd)?;

        unsafe { self.device.end_command_buffer(cmd) }?;

        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default(), None)
        }
        .context("Failed to create one-shot fence")?;

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        let result = unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], fence)
                .and_then(|_| self.device.wait_for_fences(&[fence], true, u64::MAX))
        };

        unsafe { self.device.destroy_fence(fence, None) };
        result.context("One-shot submission failed")?;
        Ok(())
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // Cleanup in reverse order; the allocator frees its memory blocks
        // and must go before the device
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn discrete_gpus_win() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_score(vk::PhysicalDeviceType::CPU)
        );
    }

    #[test]
    fn unsupported_features_are_reported_missing() {
        let supported = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            fill_mode_non_solid: vk::TRUE,
            ..Default::default()
        };

        let (enabled, missing) = select_features(
            &supported,
            &[
                DeviceFeature::SamplerAnisotropy,
                DeviceFeature::TessellationShader,
                DeviceFeature::TessellationShader,
            ],
        );

        assert_eq!(enabled.sampler_anisotropy, vk::TRUE);
        // Supported but not wanted stays off
        assert_eq!(enabled.fill_mode_non_solid, vk::FALSE);
        assert_eq!(enabled.tessellation_shader, vk::FALSE);
        assert_eq!(missing, vec![DeviceFeature::TessellationShader]);
    }

    #[rstest]
    #[case::both_eight(vk::SampleCountFlags::from_raw(0b1111), vk::SampleCountFlags::from_raw(0b1111), vk::SampleCountFlags::TYPE_8)]
    #[case::depth_limits(vk::SampleCountFlags::from_raw(0b1111111), vk::SampleCountFlags::from_raw(0b0111), vk::SampleCountFlags::TYPE_4)]
    #[case::single_only(vk::SampleCountFlags::TYPE_1, vk::SampleCountFlags::from_raw(0b1111), vk::SampleCountFlags::TYPE_1)]
    fn max_sample_count_uses_common_counts(
        #[case] color: vk::SampleCountFlags,
        #[case] depth: vk::SampleCountFlags,
        #[case] expected: vk::SampleCountFlags,
    ) {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: color,
            framebuffer_depth_sample_counts: depth,
            ..Default::default()
        };
        assert_eq!(max_sample_count_for_limits(&limits), expected);
    }

    #[test]
    fn requested_sample_count_is_clamped() {
        use vk::SampleCountFlags as S;
        assert_eq!(clamp_sample_count(S::TYPE_8, S::TYPE_4), S::TYPE_4);
        assert_eq!(clamp_sample_count(S::TYPE_2, S::TYPE_4), S::TYPE_2);
        assert_eq!(clamp_sample_count(S::TYPE_4, S::TYPE_4), S::TYPE_4);
    }
}
