//! Metric names recorded by the bus.

/// Messages handed to the broker (counter).
pub const PUBLISH_TOTAL: &str = "bus_publish_total";
/// Broker publish failures (counter).
pub const PUBLISH_ERRORS_TOTAL: &str = "bus_publish_errors_total";
/// Messages received on subscribed channels (counter).
pub const MESSAGES_RECEIVED_TOTAL: &str = "bus_messages_received_total";
/// Channels with a subscription entry (gauge).
pub const SUBSCRIPTIONS_ACTIVE: &str = "bus_subscriptions_active";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_prefixed_snake_case() {
        for name in [
            PUBLISH_TOTAL,
            PUBLISH_ERRORS_TOTAL,
            MESSAGES_RECEIVED_TOTAL,
            SUBSCRIPTIONS_ACTIVE,
        ] {
            assert!(name.starts_with("bus_"), "metric name '{name}' lacks bus_ prefix");
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
