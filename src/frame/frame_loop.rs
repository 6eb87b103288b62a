// Frame loop - wait, acquire, record, submit, present over a ring of slots
//
// When the swapchain reports it is out of date or suboptimal, or the window
// was resized, the loop diverts into recreation: wait for a visible window,
// wait for the GPU to go idle, then rebuild the swapchain and everything that
// depends on it. The GPU side sits behind FrameBackend and the window behind
// WindowSurface, so the policy runs without a device.

use ash::vk;

use crate::backend::swapchain::{AcquireOutcome, PresentOutcome};
use crate::backend::sync::WaitTimeout;
use crate::error::{FrameError, FrameResult};

/// GPU-side operations the frame loop sequences.
pub trait FrameBackend {
    /// Number of frame slots; fixed for the backend's lifetime.
    fn slot_count(&self) -> usize;

    /// Block until the last submission made with `slot` has finished.
    fn wait_for_slot(&mut self, slot: usize, timeout: WaitTimeout) -> FrameResult<()>;

    /// Ask for the next presentable image, signaling the slot's
    /// image-available semaphore once it can be written.
    fn acquire_image(&mut self, slot: usize, timeout: WaitTimeout) -> FrameResult<AcquireOutcome>;

    /// Consume the slot's image-available signal without rendering, for an
    /// acquired image that will never be presented.
    fn discard_acquired(&mut self, slot: usize) -> FrameResult<()>;

    /// Reset the slot's fence so the coming submission can signal it.
    fn reset_slot(&mut self, slot: usize) -> FrameResult<()>;

    /// Write the slot's per-frame uniform data.
    fn update_frame_data(&mut self, slot: usize) -> FrameResult<()>;

    fn record(&mut self, slot: usize, image_index: u32) -> FrameResult<()>;

    fn submit(&mut self, slot: usize) -> FrameResult<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> FrameResult<PresentOutcome>;

    /// Block until the GPU has no outstanding work.
    fn wait_idle(&mut self, timeout: WaitTimeout) -> FrameResult<()>;

    fn release_chain(&mut self);

    fn release_surface(&mut self);

    fn create_surface(&mut self, window_extent: vk::Extent2D) -> FrameResult<()>;

    fn build_chain(&mut self) -> FrameResult<()>;
}

/// What the loop needs from the window.
pub trait WindowSurface {
    /// Drawable size in pixels; zero while minimized.
    fn current_extent(&self) -> vk::Extent2D;

    fn should_close(&self) -> bool;

    /// Handle pending events without blocking.
    fn poll_events(&mut self);

    /// Block until at least one event arrives.
    fn wait_events(&mut self);

    /// Return and clear the resize flag.
    fn take_resized(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitting,
    Presenting,
    Recreating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was presented and the slot advanced.
    Presented,
    /// The surface was rebuilt; the slot did not advance.
    Recreated,
    /// Recreation was abandoned because the window is closing.
    Skipped,
}

pub struct FrameLoop {
    slot_count: usize,
    current_slot: usize,
    surface_stale: bool,
    state: FrameState,
    timeout: WaitTimeout,
    frames_presented: u64,
    recreations: u64,
}

impl FrameLoop {
    /// A loop over every slot `backend` owns, starting at slot 0.
    pub fn new<B: FrameBackend>(backend: &B, timeout: WaitTimeout) -> FrameResult<Self> {
        let slot_count = backend.slot_count();
        if slot_count == 0 {
            return Err(FrameError::NoFrameSlots);
        }
        Ok(Self {
            slot_count,
            current_slot: 0,
            surface_stale: false,
            state: FrameState::Idle,
            timeout,
            frames_presented: 0,
            recreations: 0,
        })
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn is_surface_stale(&self) -> bool {
        self.surface_stale
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// Force a recreation at the start of the next tick.
    pub fn mark_surface_stale(&mut self) {
        self.surface_stale = true;
    }

    /// Tick until the window asks to close, then wait for the GPU to drain.
    ///
    /// `between_ticks` runs after events are polled and before each tick.
    pub fn run<B, W, F>(&mut self, backend: &mut B, window: &mut W, mut between_ticks: F) -> FrameResult<()>
    where
        B: FrameBackend,
        W: WindowSurface,
        F: FnMut(&mut Self, &mut B, &mut W),
    {
        while !window.should_close() {
            window.poll_events();
            if window.should_close() {
                break;
            }
            between_ticks(self, backend, window);
            self.tick(backend, window)?;
        }

        backend.wait_idle(self.timeout)
    }

    pub fn tick<B, W>(&mut self, backend: &mut B, window: &mut W) -> FrameResult<TickOutcome>
    where
        B: FrameBackend,
        W: WindowSurface,
    {
        if self.surface_stale {
            return self.recreate(backend, window);
        }

        let slot = self.current_slot;

        self.state = FrameState::Idle;
        backend.wait_for_slot(slot, self.timeout)?;

        self.state = FrameState::Acquiring;
        let image_index = match backend.acquire_image(slot, self.timeout)? {
            AcquireOutcome::Ready(index) => index,
            AcquireOutcome::Suboptimal(index) => {
                log::debug!("Acquired image {} from a suboptimal surface", index);
                // The image is dropped unpresented, but its semaphore signal
                // must still be waited on before the slot acquires again
                backend.discard_acquired(slot)?;
                self.surface_stale = true;
                return self.recreate(backend, window);
            }
            AcquireOutcome::Stale => {
                log::debug!("Acquire reported a stale surface");
                self.surface_stale = true;
                return self.recreate(backend, window);
            }
        };

        // Fence is only reset once we know this slot will be submitted
        self.state = FrameState::Recording;
        backend.reset_slot(slot)?;
        backend.update_frame_data(slot)?;
        backend.record(slot, image_index)?;

        self.state = FrameState::Submitting;
        backend.submit(slot)?;

        self.state = FrameState::Presenting;
        let presented = backend.present(slot, image_index)?;
        let resized = window.take_resized();
        if presented == PresentOutcome::Stale || resized {
            log::debug!(
                "Present reported {:?}, resize flag {}",
                presented,
                resized
            );
            self.surface_stale = true;
            return self.recreate(backend, window);
        }

        self.current_slot = (self.current_slot + 1) % self.slot_count;
        self.frames_presented += 1;
        self.state = FrameState::Idle;
        log::trace!("Presented image {} from slot {}", image_index, slot);
        Ok(TickOutcome::Presented)
    }

    fn recreate<B, W>(&mut self, backend: &mut B, window: &mut W) -> FrameResult<TickOutcome>
    where
        B: FrameBackend,
        W: WindowSurface,
    {
        self.state = FrameState::Recreating;

        let mut logged_minimized = false;
        let extent = loop {
            let extent = window.current_extent();
            if extent.width > 0 && extent.height > 0 {
                break extent;
            }
            if window.should_close() {
                log::debug!("Window closing while minimized, recreation abandoned");
                self.state = FrameState::Idle;
                return Ok(TickOutcome::Skipped);
            }
            if !logged_minimized {
                log::info!("Window minimized, waiting for it to be restored");
                logged_minimized = true;
            }
            window.wait_events();
        };

        backend.wait_idle(self.timeout)?;

        backend.release_chain();
        backend.release_surface();
        backend.create_surface(extent)?;
        backend.build_chain()?;

        self.surface_stale = false;
        self.recreations += 1;
        self.state = FrameState::Idle;
        log::info!(
            "Recreated surface at {}x{} (recreation {})",
            extent.width,
            extent.height,
            self.recreations
        );
        Ok(TickOutcome::Recreated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Discard(usize),
        Reset(usize),
        Update(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        WaitIdle,
        ReleaseChain,
        ReleaseSurface,
        CreateSurface(u32, u32),
        BuildChain,
    }

    /// Models fences, semaphores and generations closely enough to catch
    /// ordering bugs.
    struct MockBackend {
        slots: usize,
        calls: Vec<Call>,
        acquire_script: VecDeque<FrameResult<AcquireOutcome>>,
        present_script: VecDeque<PresentOutcome>,
        next_image: u32,
        // Submission in flight that nobody has waited for yet
        in_flight: Vec<bool>,
        fence_signaled: Vec<bool>,
        // Image-available semaphore signaled and not yet waited on
        image_available: Vec<bool>,
        fail_slot_wait: bool,
        fail_idle_wait: bool,
        next_generation: u64,
        surface_generation: Option<u64>,
        chain_generation: Option<u64>,
        recorded_generations: Vec<(u64, u64)>,
    }

    impl MockBackend {
        fn new(slots: usize) -> Self {
            Self {
                slots,
                calls: Vec::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                next_image: 0,
                in_flight: vec![false; slots],
                fence_signaled: vec![true; slots],
                image_available: vec![false; slots],
                fail_slot_wait: false,
                fail_idle_wait: false,
                next_generation: 2,
                surface_generation: Some(1),
                chain_generation: Some(1),
                recorded_generations: Vec::new(),
            }
        }
    }

    impl FrameBackend for MockBackend {
        fn slot_count(&self) -> usize {
            self.slots
        }

        fn wait_for_slot(&mut self, slot: usize, _timeout: WaitTimeout) -> FrameResult<()> {
            self.calls.push(Call::Wait(slot));
            if self.fail_slot_wait {
                return Err(FrameError::DeadlineExceeded);
            }
            if self.in_flight[slot] {
                // GPU finishes the work
                self.in_flight[slot] = false;
                self.fence_signaled[slot] = true;
            }
            if !self.fence_signaled[slot] {
                // Reset but never submitted: a real wait would never return
                return Err(FrameError::DeadlineExceeded);
            }
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize, _timeout: WaitTimeout) -> FrameResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            assert!(
                !self.image_available[slot],
                "slot {} acquired with its semaphore still signaled",
                slot
            );
            let outcome = self.acquire_script.pop_front().unwrap_or_else(|| {
                let index = self.next_image;
                self.next_image = (self.next_image + 1) % 3;
                Ok(AcquireOutcome::Ready(index))
            });
            if matches!(outcome, Ok(AcquireOutcome::Ready(_) | AcquireOutcome::Suboptimal(_))) {
                self.image_available[slot] = true;
            }
            outcome
        }

        fn discard_acquired(&mut self, slot: usize) -> FrameResult<()> {
            self.calls.push(Call::Discard(slot));
            self.image_available[slot] = false;
            Ok(())
        }

        fn reset_slot(&mut self, slot: usize) -> FrameResult<()> {
            self.calls.push(Call::Reset(slot));
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn update_frame_data(&mut self, slot: usize) -> FrameResult<()> {
            self.calls.push(Call::Update(slot));
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> FrameResult<()> {
            self.calls.push(Call::Record(slot, image_index));
            assert!(!self.in_flight[slot], "slot {} recorded while GPU owns it", slot);
            let chain = self.chain_generation.ok_or(FrameError::MissingSurface)?;
            let surface = self.surface_generation.ok_or(FrameError::MissingSurface)?;
            if chain != surface {
                return Err(FrameError::GenerationMismatch { chain, surface });
            }
            self.recorded_generations.push((chain, surface));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> FrameResult<()> {
            self.calls.push(Call::Submit(slot));
            self.image_available[slot] = false;
            self.in_flight[slot] = true;
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> FrameResult<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn wait_idle(&mut self, _timeout: WaitTimeout) -> FrameResult<()> {
            self.calls.push(Call::WaitIdle);
            if self.fail_idle_wait {
                return Err(FrameError::DeadlineExceeded);
            }
            for slot in 0..self.slots {
                if self.in_flight[slot] {
                    self.in_flight[slot] = false;
                    self.fence_signaled[slot] = true;
                }
            }
            Ok(())
        }

        fn release_chain(&mut self) {
            self.calls.push(Call::ReleaseChain);
            assert!(self.in_flight.iter().all(|f| !f), "chain released while GPU busy");
            self.chain_generation = None;
        }

        fn release_surface(&mut self) {
            self.calls.push(Call::ReleaseSurface);
            assert!(self.chain_generation.is_none(), "surface released before its chain");
            self.surface_generation = None;
        }

        fn create_surface(&mut self, window_extent: vk::Extent2D) -> FrameResult<()> {
            self.calls.push(Call::CreateSurface(window_extent.width, window_extent.height));
            assert!(self.surface_generation.is_none());
            self.surface_generation = Some(self.next_generation);
            self.next_generation += 1;
            Ok(())
        }

        fn build_chain(&mut self) -> FrameResult<()> {
            self.calls.push(Call::BuildChain);
            self.chain_generation = Some(self.surface_generation.ok_or(FrameError::MissingSurface)?);
            Ok(())
        }
    }

    struct MockWindow {
        // Consumed one per query; the last value sticks
        extents: RefCell<VecDeque<vk::Extent2D>>,
        extent_queries: Cell<usize>,
        resized: bool,
        close_requested: bool,
        close_after_polls: Option<usize>,
        polls: usize,
        waits: usize,
    }

    impl MockWindow {
        fn new(width: u32, height: u32) -> Self {
            Self {
                extents: RefCell::new(VecDeque::from([vk::Extent2D { width, height }])),
                extent_queries: Cell::new(0),
                resized: false,
                close_requested: false,
                close_after_polls: None,
                polls: 0,
                waits: 0,
            }
        }

        fn with_extents(extents: &[(u32, u32)]) -> Self {
            let window = Self::new(0, 0);
            *window.extents.borrow_mut() = extents
                .iter()
                .map(|&(width, height)| vk::Extent2D { width, height })
                .collect();
            window
        }
    }

    impl WindowSurface for MockWindow {
        fn current_extent(&self) -> vk::Extent2D {
            self.extent_queries.set(self.extent_queries.get() + 1);
            let mut extents = self.extents.borrow_mut();
            if extents.len() > 1 {
                extents.pop_front().unwrap()
            } else {
                extents[0]
            }
        }

        fn should_close(&self) -> bool {
            self.close_requested
        }

        fn poll_events(&mut self) {
            self.polls += 1;
            if Some(self.polls) == self.close_after_polls {
                self.close_requested = true;
            }
        }

        fn wait_events(&mut self) {
            self.waits += 1;
        }

        fn take_resized(&mut self) -> bool {
            std::mem::take(&mut self.resized)
        }
    }

    fn position(calls: &[Call], call: Call) -> usize {
        calls
            .iter()
            .position(|&c| c == call)
            .unwrap_or_else(|| panic!("{:?} never happened", call))
    }

    #[test]
    fn slot_rotates_once_per_tick() {
        for slots in 1..=3 {
            let mut backend = MockBackend::new(slots);
            let mut window = MockWindow::new(800, 600);
            let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();

            for k in 1..=7 {
                let outcome = frames.tick(&mut backend, &mut window).unwrap();
                assert_eq!(outcome, TickOutcome::Presented);
                assert_eq!(frames.current_slot(), k % slots);
            }
            assert_eq!(frames.frames_presented(), 7);
            assert_eq!(frames.state(), FrameState::Idle);
        }
    }

    #[test]
    fn tick_follows_wait_acquire_record_submit_present() {
        let mut backend = MockBackend::new(2);
        let mut window = MockWindow::new(800, 600);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();

        frames.tick(&mut backend, &mut window).unwrap();

        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Update(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
    }

    #[test]
    fn slot_is_waited_on_before_reuse() {
        let slots = 2;
        let mut backend = MockBackend::new(slots);
        let mut window = MockWindow::new(800, 600);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();

        for _ in 0..8 {
            frames.tick(&mut backend, &mut window).unwrap();
        }

        // Every record of slot s comes after a wait on s that itself follows
        // the previous submit of s
        for (i, call) in backend.calls.iter().enumerate() {
            if let Call::Record(slot, _) = *call {
                let history = &backend.calls[..i];
                let last_wait = history.iter().rposition(|&c| c == Call::Wait(slot));
                let last_submit = history.iter().rposition(|&c| c == Call::Submit(slot));
                let last_wait = last_wait.expect("record without a wait");
                if let Some(last_submit) = last_submit {
                    assert!(last_wait > last_submit, "slot {} reused before its fence", slot);
                }
            }
        }
    }

    #[test]
    fn stale_acquire_recreates_without_advancing() {
        let mut backend = MockBackend::new(2);
        backend.acquire_script.push_back(Ok(AcquireOutcome::Stale));
        let mut window = MockWindow::new(800, 600);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();

        let outcome = frames.tick(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, TickOutcome::Recreated);
        assert_eq!(frames.current_slot(), 0);
        assert!(!frames.is_surface_stale());
        // The fence is left signaled so the next wait returns
        assert!(!backend.calls.contains(&Call::Reset(0)));
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::WaitIdle,
                Call::ReleaseChain,
                Call::ReleaseSurface,
                Call::CreateSurface(800, 600),
                Call::BuildChain,
            ]
        );

        // Retrying on the same slot works
        assert_eq!(
            frames.tick(&mut backend, &mut window).unwrap(),
            TickOutcome::Presented
        );
        assert_eq!(frames.current_slot(), 1);
    }

    #[test]
    fn suboptimal_acquire_consumes_semaphore_before_recreating() {
        let mut backend = MockBackend::new(2);
        backend.acquire_script.push_back(Ok(AcquireOutcome::Suboptimal(2)));
        let mut window = MockWindow::new(800, 600);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();

        let outcome = frames.tick(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, TickOutcome::Recreated);
        assert_eq!(frames.current_slot(), 0);
        assert!(!backend.image_available[0]);
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Discard(0),
                Call::WaitIdle,
                Call::ReleaseChain,
                Call::ReleaseSurface,
                Call::CreateSurface(800, 600),
                Call::BuildChain,
            ]
        );

        // The mock panics if any of these acquires finds its semaphore signaled
        for _ in 0..4 {
            assert_eq!(
                frames.tick(&mut backend, &mut window).unwrap(),
                TickOutcome::Presented
            );
        }
        assert_eq!(frames.frames_presented(), 4);
    }

    #[test]
    fn out_of_date_acquire_needs_no_discard() {
        let mut backend = MockBackend::new(1);
        backend.acquire_script.push_back(Ok(AcquireOutcome::Stale));
        let mut window = MockWindow::new(800, 600);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();

        frames.tick(&mut backend, &mut window).unwrap();
        frames.tick(&mut backend, &mut window).unwrap();

        assert!(!backend.calls.contains(&Call::Discard(0)));
        assert_eq!(frames.frames_presented(), 1);
    }

    #[test]
    fn suboptimal_present_recreates_without_error() {
        let mut backend = MockBackend::new(2);
        backend.present_script.push_back(PresentOutcome::Stale);
        let mut window = MockWindow::new(800, 600);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();

        let outcome = frames.tick(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, TickOutcome::Recreated);
        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.frames_presented(), 0);
        assert_eq!(frames.recreations(), 1);
        let present = position(&backend.calls, Call::Present(0, 0));
        let idle = position(&backend.calls, Call::WaitIdle);
        assert!(present < idle);
    }

    #[test]
    fn resize_flag_triggers_recreation_after_present() {
        let mut backend = MockBackend::new(2);
        let mut window = MockWindow::new(1024, 768);
        window.resized = true;
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();

        let outcome = frames.tick(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, TickOutcome::Recreated);
        assert!(backend.calls.contains(&Call::CreateSurface(1024, 768)));
        assert!(!window.resized);
    }

    #[test]
    fn minimized_window_delays_recreation_until_restored() {
        let mut backend = MockBackend::new(2);
        let mut window = MockWindow::with_extents(&[(0, 0), (0, 0), (0, 0), (800, 600)]);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();
        frames.mark_surface_stale();

        let outcome = frames.tick(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, TickOutcome::Recreated);
        assert_eq!(window.waits, 3);
        assert_eq!(window.extent_queries.get(), 4);
        // Nothing touched the GPU until the window came back
        assert_eq!(backend.calls[0], Call::WaitIdle);
        assert!(backend.calls.contains(&Call::CreateSurface(800, 600)));
    }

    #[test]
    fn zero_width_alone_counts_as_minimized() {
        let mut backend = MockBackend::new(2);
        let mut window = MockWindow::with_extents(&[(0, 600), (800, 600)]);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();
        frames.mark_surface_stale();

        frames.tick(&mut backend, &mut window).unwrap();

        assert_eq!(window.waits, 1);
    }

    #[test]
    fn closing_while_minimized_abandons_recreation() {
        let mut backend = MockBackend::new(2);
        let mut window = MockWindow::new(0, 0);
        window.close_requested = true;
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();
        frames.mark_surface_stale();

        let outcome = frames.tick(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, TickOutcome::Skipped);
        assert!(backend.calls.is_empty());
        assert!(frames.is_surface_stale());
    }

    #[test]
    fn recreation_leaves_chain_on_new_generation() {
        let mut backend = MockBackend::new(2);
        backend.acquire_script.push_back(Ok(AcquireOutcome::Ready(0)));
        backend.acquire_script.push_back(Ok(AcquireOutcome::Stale));
        backend.present_script.push_back(PresentOutcome::Presented);
        backend.present_script.push_back(PresentOutcome::Stale);
        let mut window = MockWindow::new(800, 600);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();

        for _ in 0..5 {
            frames.tick(&mut backend, &mut window).unwrap();
        }

        assert_eq!(frames.recreations(), 2);
        assert_eq!(backend.surface_generation, Some(3));
        assert_eq!(backend.chain_generation, Some(3));
        assert!(backend.recorded_generations.iter().all(|(c, s)| c == s));
        assert_eq!(backend.recorded_generations.last(), Some(&(3, 3)));
    }

    #[test]
    fn acquire_failure_is_fatal_and_does_not_advance() {
        let mut backend = MockBackend::new(2);
        backend
            .acquire_script
            .push_back(Err(FrameError::AcquireFailed(vk::Result::ERROR_DEVICE_LOST)));
        let mut window = MockWindow::new(800, 600);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();

        let result = frames.tick(&mut backend, &mut window);

        assert!(matches!(result, Err(FrameError::AcquireFailed(_))));
        assert_eq!(frames.current_slot(), 0);
        assert!(!backend.calls.contains(&Call::WaitIdle));
    }

    #[test]
    fn slot_wait_timeout_aborts_tick_before_acquire() {
        let mut backend = MockBackend::new(2);
        backend.fail_slot_wait = true;
        let mut window = MockWindow::new(800, 600);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::from_millis(Some(5))).unwrap();

        let result = frames.tick(&mut backend, &mut window);

        assert!(matches!(result, Err(FrameError::DeadlineExceeded)));
        assert_eq!(backend.calls, vec![Call::Wait(0)]);
        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.frames_presented(), 0);
        assert_eq!(frames.state(), FrameState::Idle);
    }

    #[test]
    fn idle_wait_timeout_during_recreation_keeps_surface_stale() {
        let mut backend = MockBackend::new(2);
        backend.present_script.push_back(PresentOutcome::Stale);
        backend.fail_idle_wait = true;
        let mut window = MockWindow::new(800, 600);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::from_millis(Some(5))).unwrap();

        let result = frames.tick(&mut backend, &mut window);

        assert!(matches!(result, Err(FrameError::DeadlineExceeded)));
        assert!(frames.is_surface_stale());
        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.recreations(), 0);
        assert_eq!(*backend.calls.last().unwrap(), Call::WaitIdle);
        assert!(!backend.calls.contains(&Call::ReleaseChain));
        assert_eq!(backend.chain_generation, Some(1));

        // Once the GPU drains, the next tick finishes the rebuild
        backend.fail_idle_wait = false;
        assert_eq!(
            frames.tick(&mut backend, &mut window).unwrap(),
            TickOutcome::Recreated
        );
        assert!(!frames.is_surface_stale());
        assert_eq!(backend.chain_generation, Some(2));
    }

    #[test]
    fn backend_without_slots_is_rejected() {
        let backend = MockBackend::new(0);
        let result = FrameLoop::new(&backend, WaitTimeout::INFINITE);
        assert!(matches!(result, Err(FrameError::NoFrameSlots)));
    }

    #[test]
    fn stale_flag_recreates_before_next_frame() {
        let mut backend = MockBackend::new(2);
        let mut window = MockWindow::new(640, 480);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();

        frames.tick(&mut backend, &mut window).unwrap();
        frames.mark_surface_stale();
        let outcome = frames.tick(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, TickOutcome::Recreated);
        assert_eq!(frames.current_slot(), 1);
        assert_eq!(*backend.calls.last().unwrap(), Call::BuildChain);
    }

    #[test]
    fn run_stops_on_close_and_drains_gpu() {
        let mut backend = MockBackend::new(2);
        let mut window = MockWindow::new(800, 600);
        window.close_after_polls = Some(4);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();
        let mut hook_calls = 0;

        frames
            .run(&mut backend, &mut window, |_, _, _| hook_calls += 1)
            .unwrap();

        assert_eq!(hook_calls, 3);
        assert_eq!(frames.frames_presented(), 3);
        assert_eq!(*backend.calls.last().unwrap(), Call::WaitIdle);
    }

    #[test]
    fn hook_can_request_recreation() {
        let mut backend = MockBackend::new(2);
        let mut window = MockWindow::new(800, 600);
        window.close_after_polls = Some(3);
        let mut frames = FrameLoop::new(&backend, WaitTimeout::INFINITE).unwrap();

        frames
            .run(&mut backend, &mut window, |frames, _, _| {
                if frames.frames_presented() == 1 {
                    frames.mark_surface_stale();
                }
            })
            .unwrap();

        assert_eq!(frames.recreations(), 1);
        assert_eq!(frames.frames_presented(), 1);
    }
}
