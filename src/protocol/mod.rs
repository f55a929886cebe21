pub mod message;
pub use message::{Envelope, Pack};
pub mod codec;
pub use codec::{Codec, ProtocolError};
pub mod session;
pub use session::{Action, ConnectionState, Session, SessionError};
