// Splitbot - image-generation admission queue
// Library exports

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod moderation;
pub mod notify;
pub mod queue;
pub mod request;

pub use backend::{GenerationBackend, HttpBackend, SharedBackend};
pub use config::Config;
pub use error::{BackendError, Rejection};
pub use moderation::{ModerationVerdict, SafetyAssessment, SafetyGate};
pub use notify::{ChannelSink, FnSink, StatusEvent, StatusNotifier, StatusSink};
pub use queue::{Admission, ImageQueue, QueueSnapshot};
pub use request::{
    ActorKey, GenerationOutcome, GenerationParams, GenerationRequest, GenerationTicket,
    RequestStatus,
};
