use biometrics::{Collector, Counter, Moments};

pub(crate) static RELAY_REQUESTS: Counter = Counter::new("chat_relay.relay.requests");
pub(crate) static RELAY_STREAMED_REQUESTS: Counter =
    Counter::new("chat_relay.relay.streamed_requests");
pub(crate) static RELAY_REJECTED: Counter = Counter::new("chat_relay.relay.rejected");
pub(crate) static UPSTREAM_TRANSPORT_ERRORS: Counter =
    Counter::new("chat_relay.upstream.transport_errors");
pub(crate) static UPSTREAM_NON_SUCCESS: Counter = Counter::new("chat_relay.upstream.non_success");
pub(crate) static UPSTREAM_DURATION: Moments =
    Moments::new("chat_relay.upstream.duration_seconds");
pub(crate) static RELAY_STREAM_BYTES: Counter = Counter::new("chat_relay.relay.stream_bytes");

pub(crate) static RATE_LIMIT_ALLOWED: Counter = Counter::new("chat_relay.rate_limit.allowed");
pub(crate) static RATE_LIMIT_REJECTED: Counter = Counter::new("chat_relay.rate_limit.rejected");
pub(crate) static RATE_LIMIT_STORE_ERRORS: Counter =
    Counter::new("chat_relay.rate_limit.store_errors");

pub(crate) static STREAM_FRAMES: Counter = Counter::new("chat_relay.stream.frames");
pub(crate) static STREAM_FRAMES_SKIPPED: Counter = Counter::new("chat_relay.stream.frames_skipped");

pub(crate) static SESSION_REPLIES: Counter = Counter::new("chat_relay.session.replies");
pub(crate) static SESSION_ERRORS: Counter = Counter::new("chat_relay.session.errors");
pub(crate) static SESSION_REPLY_DURATION: Moments =
    Moments::new("chat_relay.session.reply_duration_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&RELAY_REQUESTS);
    collector.register_counter(&RELAY_STREAMED_REQUESTS);
    collector.register_counter(&RELAY_REJECTED);
    collector.register_counter(&UPSTREAM_TRANSPORT_ERRORS);
    collector.register_counter(&UPSTREAM_NON_SUCCESS);
    collector.register_moments(&UPSTREAM_DURATION);
    collector.register_counter(&RELAY_STREAM_BYTES);

    collector.register_counter(&RATE_LIMIT_ALLOWED);
    collector.register_counter(&RATE_LIMIT_REJECTED);
    collector.register_counter(&RATE_LIMIT_STORE_ERRORS);

    collector.register_counter(&STREAM_FRAMES);
    collector.register_counter(&STREAM_FRAMES_SKIPPED);

    collector.register_counter(&SESSION_REPLIES);
    collector.register_counter(&SESSION_ERRORS);
    collector.register_moments(&SESSION_REPLY_DURATION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_metric() {
        RELAY_REQUESTS.click();
        SESSION_REPLY_DURATION.add(0.25);
        register_biometrics(Collector::new());
    }
}
