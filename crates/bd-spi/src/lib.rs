mod backend;
mod bus;
mod frame;
mod linux_backend;
mod slave;

pub use backend::{SpiBackend, SpiBackendError};
pub use bus::{SpiBus, SpiBusEvent};
pub use frame::{Frame, FrameError, MAX_FRAME_LEN, MAX_FRAME_PAYLOAD, MIN_FRAME_LEN};
pub use linux_backend::LinuxSpiBackend;
pub use slave::{SlaveState, MAX_SLAVES};
