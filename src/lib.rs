//! Reading the status of Kospel electric heaters through their C.MI controller.

pub mod codec;
pub mod commands;
pub mod connection;
pub mod devices;
pub mod error;
pub mod output;
pub mod reader;
pub mod registers;
pub mod session;
pub mod status;

pub use connection::Config;
pub use devices::{DeviceAddress, DeviceDescriptor};
pub use error::{Error, ErrorKind};
pub use reader::KospelClient;
pub use status::{DecodedStatus, Mode, Protocol};
