use crate::peer::types::IceCandidate;
use tracing::debug;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

/// Local wall clock timestamps, same layout as the rest of our tooling.
struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Installs the global subscriber. Does nothing when logging is compiled out
/// or a subscriber is already installed (tests call this repeatedly).
pub fn init() {
    if !crate::config::LOGGING_ENABLED {
        return;
    }
    #[cfg(debug_assertions)]
    {
        if !crate::config::dev::ENABLE_LOGGING {
            return;
        }
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(LocalTime)
        .with_target(false)
        .try_init();
}

/// Traces a trickled candidate as soon as it shows up.
pub fn dump_candidate(label: &str, session: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label} [{session}]: candidate={} sdp_mline_index={}",
        cand.candidate, cand.sdp_mline_index
    );
}
