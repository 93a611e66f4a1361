pub mod device;
pub mod error;
pub mod headless;
pub mod shader;

pub use device::Device;
pub use error::{LumeError, LumeResult};
