use crate::protocol::{Protocol, ProtocolId};
use std::fmt;

/// Callback run once after a protocol has been terminated.
pub type TerminationCallback = Box<dyn FnOnce(ProtocolId) + Send + 'static>;

/// Kind of lifecycle transition being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Start,
    Stop,
    Pause,
    Unpause,
    Terminate,
}

impl RequestKind {
    pub fn name(self) -> &'static str {
        match self {
            RequestKind::Start => "start",
            RequestKind::Stop => "stop",
            RequestKind::Pause => "pause",
            RequestKind::Unpause => "unpause",
            RequestKind::Terminate => "terminate",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A queued request to move a protocol to another state.
///
/// Requests may be issued from any thread; only the synchronous cycle applies
/// them, in the order they were queued.
pub enum LifecycleRequest {
    Start {
        id: ProtocolId,
        protocol: Box<dyn Protocol>,
        on_terminated: Option<TerminationCallback>,
    },
    Stop(ProtocolId),
    Pause(ProtocolId),
    Unpause(ProtocolId),
    Terminate(ProtocolId),
}

impl LifecycleRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            LifecycleRequest::Start { .. } => RequestKind::Start,
            LifecycleRequest::Stop(_) => RequestKind::Stop,
            LifecycleRequest::Pause(_) => RequestKind::Pause,
            LifecycleRequest::Unpause(_) => RequestKind::Unpause,
            LifecycleRequest::Terminate(_) => RequestKind::Terminate,
        }
    }

    pub fn target(&self) -> ProtocolId {
        match self {
            LifecycleRequest::Start { id, .. }
            | LifecycleRequest::Stop(id)
            | LifecycleRequest::Pause(id)
            | LifecycleRequest::Unpause(id)
            | LifecycleRequest::Terminate(id) => *id,
        }
    }
}

impl fmt::Debug for LifecycleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleRequest")
            .field("kind", &self.kind())
            .field("target", &self.target())
            .finish()
    }
}
