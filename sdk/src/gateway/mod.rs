mod dispatcher;
mod session;

pub use session::{GatewayHandshake, GatewaySession, GatewayState};
