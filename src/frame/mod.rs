// Frame module - per-frame orchestration on top of the backend
//
// chain: swapchain-dependent resources, rebuilt as a unit
// recorder: fills one command buffer per tick
// frame_loop: the tick/recreate state machine

pub mod chain;
pub mod frame_loop;
pub mod recorder;

pub use chain::{ChainInputs, DependentResourceChain};
pub use frame_loop::{FrameBackend, FrameLoop, WindowSurface};
pub use recorder::{ClearValues, CommandRecorder, DrawState};
