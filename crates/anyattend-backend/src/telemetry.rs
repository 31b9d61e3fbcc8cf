//! Protocol counters.
//!
//! Recording is a no-op unless the crate is built with the `metrics`
//! feature; the exporter itself is installed by the binary.

/// Which protocol counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolCounter {
    ChallengesIssued,
    ChallengeVerifications,
    DevicesPaired,
    CommandsCreated,
    CommandsDispatched,
    CommandsAcked,
    SessionRotations,
    ConnectionRequests,
    AclSyncs,
}

#[cfg(feature = "metrics")]
fn counters() -> &'static anyattend_core::metrics::ProtocolCounters {
    static COUNTERS: std::sync::OnceLock<anyattend_core::metrics::ProtocolCounters> =
        std::sync::OnceLock::new();
    COUNTERS.get_or_init(anyattend_core::metrics::ProtocolCounters::new)
}

/// Add `value` to `counter`, tagged with `outcome`.
#[cfg(feature = "metrics")]
pub fn record(counter: ProtocolCounter, value: u64, outcome: &'static str) {
    use opentelemetry::KeyValue;

    let c = counters();
    let target = match counter {
        ProtocolCounter::ChallengesIssued => &c.challenges_issued,
        ProtocolCounter::ChallengeVerifications => &c.challenge_verifications,
        ProtocolCounter::DevicesPaired => &c.devices_paired,
        ProtocolCounter::CommandsCreated => &c.commands_created,
        ProtocolCounter::CommandsDispatched => &c.commands_dispatched,
        ProtocolCounter::CommandsAcked => &c.commands_acked,
        ProtocolCounter::SessionRotations => &c.session_rotations,
        ProtocolCounter::ConnectionRequests => &c.connection_requests,
        ProtocolCounter::AclSyncs => &c.acl_syncs,
    };
    target.add(value, &[KeyValue::new("outcome", outcome)]);
}

#[cfg(not(feature = "metrics"))]
#[allow(clippy::missing_const_for_fn)]
pub fn record(_counter: ProtocolCounter, _value: u64, _outcome: &'static str) {}
