// Error types for the frame loop core
//
// Setup code at the application edge uses anyhow; everything the frame loop
// can report while running goes through FrameError so callers can tell the
// failure classes apart.

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration-fatal
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Surface reports no formats")]
    NoSurfaceFormat,

    #[error("Unsupported surface configuration: {0}")]
    UnsupportedSurfaceConfig(&'static str),

    #[error("No supported depth format among candidates")]
    NoSupportedDepthFormat,

    #[error("Frame slot count must be at least 1")]
    NoFrameSlots,

    // ─────────────────────────────────────────────────────────────────────────
    // Programming-invariant violations
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Index {index} out of range (count {count})")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Resource chain built for surface generation {chain}, current is {surface}")]
    GenerationMismatch { chain: u64, surface: u64 },

    #[error("Swapchain returned {images} images and {views} views, expected at least {min}")]
    ImageCountMismatch { images: usize, views: usize, min: u32 },

    #[error("No presentation surface exists")]
    MissingSurface,

    // ─────────────────────────────────────────────────────────────────────────
    // Driver failures (never retried)
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to acquire swapchain image: {0}")]
    AcquireFailed(vk::Result),

    #[error("Failed to present swapchain image: {0}")]
    PresentFailed(vk::Result),

    #[error("Failed to submit command buffer: {0}")]
    SubmitFailed(vk::Result),

    #[error("Failed to begin command buffer: {0}")]
    FailedToBeginBuffer(vk::Result),

    #[error("Failed to end command buffer: {0}")]
    FailedToEndBuffer(vk::Result),

    #[error("Vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("GPU allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("Buffer memory is not host mapped")]
    UnmappedBuffer,

    /// A fence or idle wait ran past the configured timeout.
    #[error("Wait exceeded its deadline")]
    DeadlineExceeded,
}

impl FrameError {
    /// Map a wait result, turning timeouts into `DeadlineExceeded`.
    pub fn from_wait(result: vk::Result) -> Self {
        match result {
            vk::Result::TIMEOUT | vk::Result::NOT_READY => FrameError::DeadlineExceeded,
            other => FrameError::Vulkan(other),
        }
    }
}

pub type FrameResult<T> = std::result::Result<T, FrameError>;
