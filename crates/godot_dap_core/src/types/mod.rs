pub mod protocol;
pub mod requests;
pub mod responses;

pub use protocol::{Event, ProtocolMessage, Request, Response};
pub use requests::*;
pub use responses::*;
