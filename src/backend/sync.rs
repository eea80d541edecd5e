// Frame synchronization
//
// One set of semaphores and a fence per frame in flight.

use ash::vk;

use crate::error::{Result, VkResultExt};

pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Signaled so the first wait on a fresh slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device.create_semaphore(&semaphore_info, None).op("vkCreateSemaphore")?;
            let render_finished = match device.create_semaphore(&semaphore_info, None).op("vkCreateSemaphore") {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(e);
                }
            };
            let in_flight_fence = match device.create_fence(&fence_info, None).op("vkCreateFence") {
                Ok(fence) => fence,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                    return Err(e);
                }
            };

            Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
            })
        }
    }

    /// Block until the GPU has finished the frame that last used this slot,
    /// then reset the fence for the next submission.
    pub fn wait_and_reset(&self, device: &ash::Device) -> Result<()> {
        unsafe {
            device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
                .op("vkWaitForFences")?;
            device.reset_fences(&[self.in_flight_fence]).op("vkResetFences")
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
