// Frame loop for one sample
//
// Frames rotate through `frames_in_flight` slots. Each slot's fence is
// waited on before its command buffer is reused, so the CPU never runs more
// than that many frames ahead of the GPU.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{FrameInfo, Sample};
use crate::backend::{FrameSync, VulkanDevice};

/// Step used when `fixed_timestep` is set
pub const FIXED_STEP: f32 = 1.0 / 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub frames: u32,
    pub elapsed: Duration,
}

impl FrameStats {
    pub fn average_frame_ms(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.elapsed.as_secs_f64() * 1000.0 / self.frames as f64
    }

    pub fn fps(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.frames as f64 / seconds
        } else {
            0.0
        }
    }
}

/// Frames counted over one-second windows
#[derive(Debug, Default)]
struct FpsCounter {
    window_start: Duration,
    frames: u32,
}

impl FpsCounter {
    /// Count a frame finished at `now` (since start); yields the rate once a
    /// window closes
    fn tick(&mut self, now: Duration) -> Option<f64> {
        self.frames += 1;
        let window = now.saturating_sub(self.window_start);
        if window < Duration::from_secs(1) {
            return None;
        }
        let fps = self.frames as f64 / window.as_secs_f64();
        self.window_start = now;
        self.frames = 0;
        Some(fps)
    }
}

/// Animation time of frame `index`
pub fn frame_time(index: u32, fixed_timestep: bool, elapsed: Duration) -> f32 {
    if fixed_timestep {
        index as f32 * FIXED_STEP
    } else {
        elapsed.as_secs_f32()
    }
}

pub struct SampleRunner {
    command_pool: vk::CommandPool,
    frames: Vec<FrameSync>,
    fixed_timestep: bool,
    device: Arc<VulkanDevice>,
}

impl SampleRunner {
    pub fn new(device: &Arc<VulkanDevice>, frames_in_flight: usize, fixed_timestep: bool) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let mut runner = Self {
            command_pool,
            frames: Vec::with_capacity(frames_in_flight),
            fixed_timestep,
            device: device.clone(),
        };
        for _ in 0..frames_in_flight.max(1) {
            runner
                .frames
                .push(FrameSync::new(&device.device, command_pool)?);
        }

        Ok(runner)
    }

    /// Record and submit `frame_count` frames, then wait for the GPU
    pub fn run(&mut self, name: &str, sample: &mut dyn Sample, frame_count: u32) -> Result<FrameStats> {
        let device = &self.device.device;
        let start = Instant::now();
        let mut fps = FpsCounter::default();
        let mut last_time = 0.0;

        for index in 0..frame_count {
            let slot = index as usize % self.frames.len();
            let sync = &self.frames[slot];

            // Step 1: Wait until this slot's previous frame has retired
            sync.wait_and_reset(device)?;

            let time = frame_time(index, self.fixed_timestep, start.elapsed());
            let frame = FrameInfo {
                index,
                slot,
                time,
                delta: time - last_time,
            };
            last_time = time;

            sample.update(&frame)?;

            // Step 2: Record
            let cmd = sync.command_buffer;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe {
                device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
                device
                    .begin_command_buffer(cmd, &begin_info)
                    .context("Failed to begin frame command buffer")?;
            }

            sample
                .record(cmd, &frame)
                .with_context(|| format!("Recording frame {} of '{}' failed", index, name))?;

            unsafe { device.end_command_buffer(cmd) }.context("Failed to end frame command buffer")?;

            // Step 3: Submit, signalling the slot's fence
            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            unsafe {
                device
                    .queue_submit(self.device.graphics_queue, &[submit_info], sync.in_flight_fence)
                    .context("Failed to submit frame")?;
            }

            if let Some(rate) = fps.tick(start.elapsed()) {
                log::info!("{}: {:.1} fps (frame {})", name, rate, index + 1);
            }
        }

        self.device.wait_idle()?;

        Ok(FrameStats {
            frames: frame_count,
            elapsed: start.elapsed(),
        })
    }
}

impl Drop for SampleRunner {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
            for frame in &self.frames {
                frame.destroy(&self.device.device);
            }
            self.device.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_timestep_ignores_wall_clock() {
        assert_eq!(frame_time(0, true, Duration::from_secs(5)), 0.0);
        assert!((frame_time(60, true, Duration::ZERO) - 1.0).abs() < 1e-5);
        assert_eq!(frame_time(60, false, Duration::from_millis(250)), 0.25);
    }

    #[test]
    fn fps_is_reported_once_per_window() {
        let mut counter = FpsCounter::default();
        for i in 1..30 {
            assert_eq!(counter.tick(Duration::from_millis(i * 20)), None);
        }
        // 50th frame closes the first second
        for i in 30..50 {
            assert_eq!(counter.tick(Duration::from_millis(i * 20)), None);
        }
        let fps = counter.tick(Duration::from_millis(1000)).unwrap();
        assert!((fps - 50.0).abs() < 1e-9);
        assert_eq!(counter.tick(Duration::from_millis(1020)), None);
    }

    #[test]
    fn stats_handle_empty_runs() {
        let stats = FrameStats {
            frames: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(stats.fps(), 0.0);
        assert_eq!(stats.average_frame_ms(), 0.0);

        let stats = FrameStats {
            frames: 100,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(stats.fps(), 50.0);
        assert_eq!(stats.average_frame_ms(), 20.0);
    }
}
