pub mod config;
pub mod crypto;
pub mod derive;
pub mod device;
pub mod fields;
pub mod protocol;
pub mod status;
pub mod transport;

pub use config::DeviceConfig;
pub use derive::{DerivationError, Property, Value};
pub use device::{Device, DeviceError};
pub use fields::{Command, Field};
pub use protocol::ConnectionState;
pub use status::RawStatus;
