mod backend;
mod device;
mod nusb_backend;
mod pool;
mod transport;

pub use backend::{DeviceId, TransferDirection, TransferOutcome, UsbBackend, UsbBackendError, UsbDeviceInfo};
pub use device::{classify_device, BrickKind};
pub use nusb_backend::NusbBackend;
pub use pool::{StallKind, TransferPool, TransferState};
pub use transport::{UsbTransport, UsbTransportEvent};
