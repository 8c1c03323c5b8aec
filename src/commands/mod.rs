pub mod capture;
pub mod config;
pub mod devices;
pub mod files;
pub mod scripting;

pub use capture::*;
pub use self::config::*;
pub use devices::*;
pub use files::*;
pub use scripting::*;
