pub mod config;
pub mod context;
pub mod gateway;
pub mod machine;
pub mod metrics;
pub mod pipeline;
pub mod store;

pub use config::{load_client_config, ClientConfig};
pub use context::SessionContext;
pub use gateway::{AuthGateway, AuthOutcome, Credentials, RegistrationRequest};
pub use machine::{Session, SessionEvent, SessionStateMachine, SessionStatus, TransitionError};
pub use metrics::SessionMetrics;
pub use pipeline::{detail_message, ApiRequest, ApiResponse, RequestPipeline};
pub use store::{
    FileSessionStore, InMemorySessionStore, SessionStore, REFRESH_TOKEN_KEY, TOKEN_KEY,
};
