mod enumerate;
mod stack;

pub use enumerate::build_enumerate_disconnected;
pub use stack::{Hardware, RequestRouter, StackId};
