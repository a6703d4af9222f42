mod context;
mod session;

pub use context::{UdpEndpoint, VoiceJoinContext, VoicePhase};
pub use session::VoiceSession;
pub(crate) use context::PhaseReporter;
pub(crate) use session::{JoinSlots, VoiceJoin};
