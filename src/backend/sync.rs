// Synchronization primitives
//
// Fences and semaphores for GPU-CPU and GPU-GPU ordering, grouped into a
// fixed ring of frame slots. Slot N is only reused once its fence signals.

use ash::vk;
use std::time::Duration;

use super::VulkanDevice;
use crate::error::{FrameError, FrameResult};

/// Upper bound for a CPU-side wait on the GPU.
///
/// `WaitTimeout::INFINITE` reproduces the classic `u64::MAX` wait; a finite
/// value turns a hung GPU into `FrameError::DeadlineExceeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitTimeout(Option<Duration>);

impl WaitTimeout {
    pub const INFINITE: WaitTimeout = WaitTimeout(None);

    pub fn from_millis(millis: Option<u64>) -> Self {
        Self(millis.map(Duration::from_millis))
    }

    pub fn duration(&self) -> Option<Duration> {
        self.0
    }

    /// Nanoseconds as the driver expects them.
    pub fn as_nanos(&self) -> u64 {
        match self.0 {
            Some(d) => u64::try_from(d.as_nanos()).unwrap_or(u64::MAX),
            None => u64::MAX,
        }
    }
}

/// Frame synchronization - one per frame in flight
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    /// Signaled by acquire, waited on by submit.
    pub image_available: vk::Semaphore,
    /// Signaled by submit, waited on by present.
    pub render_finished: vk::Semaphore,
    /// Signaled when the slot's submission has finished executing.
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> FrameResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on a fresh slot returns at once
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let dev = &device.device;
        unsafe {
            let image_available = dev.create_semaphore(&semaphore_info, None)?;
            let render_finished = match dev.create_semaphore(&semaphore_info, None) {
                Ok(s) => s,
                Err(e) => {
                    dev.destroy_semaphore(image_available, None);
                    return Err(e.into());
                }
            };
            let in_flight_fence = match dev.create_fence(&fence_info, None) {
                Ok(f) => f,
                Err(e) => {
                    dev.destroy_semaphore(render_finished, None);
                    dev.destroy_semaphore(image_available, None);
                    return Err(e.into());
                }
            };

            Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
            })
        }
    }

    /// Block until the GPU has finished the last submission that used this slot.
    pub fn wait(&self, device: &ash::Device, timeout: WaitTimeout) -> FrameResult<()> {
        unsafe { device.wait_for_fences(&[self.in_flight_fence], true, timeout.as_nanos()) }
            .map_err(FrameError::from_wait)
    }

    pub fn reset(&self, device: &ash::Device) -> FrameResult<()> {
        unsafe { device.reset_fences(&[self.in_flight_fence]) }?;
        Ok(())
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Fixed ring of frame slots, created once per window.
pub struct FrameSlotSet {
    slots: Vec<FrameSync>,
}

impl FrameSlotSet {
    pub fn create(device: &VulkanDevice, count: usize) -> FrameResult<Self> {
        if count == 0 {
            return Err(FrameError::NoFrameSlots);
        }

        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            match FrameSync::new(device) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in &slots {
                        slot.destroy(&device.device);
                    }
                    return Err(e);
                }
            }
        }

        log::info!("Created {} frame slots", count);
        Ok(Self { slots })
    }

    #[cfg(test)]
    pub(crate) fn from_slots(slots: Vec<FrameSync>) -> Self {
        Self { slots }
    }

    pub fn get(&self, index: usize) -> FrameResult<&FrameSync> {
        self.slots.get(index).ok_or(FrameError::IndexOutOfRange {
            index,
            count: self.slots.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Wait on every slot's fence. Once this returns no submission made by
    /// the frame loop is still executing.
    pub fn wait_all(&self, device: &ash::Device, timeout: WaitTimeout) -> FrameResult<()> {
        let fences: Vec<vk::Fence> = self.slots.iter().map(|s| s.in_flight_fence).collect();
        unsafe { device.wait_for_fences(&fences, true, timeout.as_nanos()) }
            .map_err(FrameError::from_wait)
    }

    /// Whole-set teardown. The device must be idle.
    pub fn destroy(&mut self, device: &ash::Device) {
        for slot in self.slots.drain(..) {
            slot.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn fake_slot(n: u64) -> FrameSync {
        FrameSync {
            image_available: vk::Semaphore::from_raw(n * 10 + 1),
            render_finished: vk::Semaphore::from_raw(n * 10 + 2),
            in_flight_fence: vk::Fence::from_raw(n * 10 + 3),
        }
    }

    #[test]
    fn get_returns_slot_in_range() {
        let set = FrameSlotSet::from_slots(vec![fake_slot(0), fake_slot(1)]);
        assert_eq!(set.len(), 2);
        let slot = set.get(1).unwrap();
        assert_eq!(slot.in_flight_fence.as_raw(), 13);
    }

    #[test]
    fn get_out_of_range_fails() {
        let set = FrameSlotSet::from_slots(vec![fake_slot(0), fake_slot(1)]);
        match set.get(2) {
            Err(FrameError::IndexOutOfRange { index, count }) => {
                assert_eq!(index, 2);
                assert_eq!(count, 2);
            }
            other => panic!("unexpected {:?}", other.map(|s| s.in_flight_fence)),
        }
    }

    #[test]
    fn infinite_timeout_is_u64_max() {
        assert_eq!(WaitTimeout::INFINITE.as_nanos(), u64::MAX);
        assert_eq!(WaitTimeout::from_millis(None), WaitTimeout::INFINITE);
    }

    #[test]
    fn finite_timeout_converts_to_nanos() {
        let timeout = WaitTimeout::from_millis(Some(250));
        assert_eq!(timeout.as_nanos(), 250_000_000);
        assert_eq!(timeout.duration(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn huge_timeout_saturates() {
        let timeout = WaitTimeout::from_millis(Some(u64::MAX));
        assert_eq!(timeout.as_nanos(), u64::MAX);
    }
}
