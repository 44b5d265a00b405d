use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";
pub const OUTCOME_TIMEOUT: &str = "timeout";
/// A waiter found the token already renewed by another request.
pub const OUTCOME_SHARED: &str = "shared";

#[derive(Clone)]
pub struct SessionMetrics {
    registry: Registry,
    login_attempts: IntCounterVec,
    refresh_attempts: IntCounterVec,
    replayed_requests: IntCounter,
}

impl SessionMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let login_attempts = IntCounterVec::new(
            Opts::new(
                "session_login_attempts_total",
                "Count of login and registration attempts grouped by outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(login_attempts.clone()))?;

        let refresh_attempts = IntCounterVec::new(
            Opts::new(
                "session_refresh_attempts_total",
                "Count of access token refreshes grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(refresh_attempts.clone()))?;

        let replayed_requests = IntCounter::new(
            "session_replayed_requests_total",
            "Requests replayed after an authorization failure",
        )?;
        registry.register(Box::new(replayed_requests.clone()))?;

        Ok(Self {
            registry,
            login_attempts,
            refresh_attempts,
            replayed_requests,
        })
    }

    pub fn login_attempt(&self, operation: &str, outcome: &str) {
        self.login_attempts
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn refresh_attempt(&self, outcome: &str) {
        self.refresh_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn replayed_request(&self) {
        self.replayed_requests.inc();
    }

    pub fn refresh_count(&self, outcome: &str) -> u64 {
        self.refresh_attempts.with_label_values(&[outcome]).get()
    }

    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
