use std::time::Duration;

/// The protocol timer values of RFC 3376 §8 / RFC 3810 §9 with their
/// derived intervals. One instance lives in every querier; the
/// defaults follow the RFCs (robustness 2, query interval 125 s,
/// query response interval 10 s).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TimersValues {
    robustness_variable: u32,
    query_interval: Duration,
    query_response_interval: Duration,
    startup_query_interval: Duration,
    startup_query_count: u32,
    last_listener_query_interval: Duration,
    last_listener_query_count: u32,
    unsolicited_report_interval: Duration,
}

impl Default for TimersValues {
    fn default() -> TimersValues {
        let robustness_variable = 2;
        let query_interval = Duration::from_secs(125);
        TimersValues {
            robustness_variable,
            query_interval,
            query_response_interval: Duration::from_secs(10),
            startup_query_interval: query_interval / 4,
            startup_query_count: robustness_variable,
            last_listener_query_interval: Duration::from_millis(1000),
            last_listener_query_count: robustness_variable,
            unsolicited_report_interval: Duration::from_millis(1000),
        }
    }
}

impl TimersValues {
    pub fn robustness_variable(&self) -> u32 {
        self.robustness_variable
    }

    pub fn query_interval(&self) -> Duration {
        self.query_interval
    }

    /// Max Response Time/Delay advertised in general queries.
    pub fn query_response_interval(&self) -> Duration {
        self.query_response_interval
    }

    pub fn startup_query_interval(&self) -> Duration {
        self.startup_query_interval
    }

    pub fn startup_query_count(&self) -> u32 {
        self.startup_query_count
    }

    pub fn last_listener_query_interval(&self) -> Duration {
        self.last_listener_query_interval
    }

    pub fn last_listener_query_count(&self) -> u32 {
        self.last_listener_query_count
    }

    pub fn unsolicited_report_interval(&self) -> Duration {
        self.unsolicited_report_interval
    }

    /// MALI: `QRV * QI + QRI`. Liveness horizon of learned state.
    pub fn multicast_address_listening_interval(&self) -> Duration {
        self.robustness_variable * self.query_interval + self.query_response_interval
    }

    /// `QRV * QI + QRI / 2`.
    pub fn other_querier_present_interval(&self) -> Duration {
        self.robustness_variable * self.query_interval + self.query_response_interval / 2
    }

    /// LLQT: `LLQI * LLQC`. How long a leave is doubted.
    pub fn last_listener_query_time(&self) -> Duration {
        self.last_listener_query_interval * self.last_listener_query_count
    }

    /// How long an older-version report pins the compatibility mode.
    pub fn older_host_present_interval(&self) -> Duration {
        self.multicast_address_listening_interval()
    }

    pub fn set_robustness_variable(&mut self, value: u32) {
        self.robustness_variable = value;
    }

    pub fn set_query_interval(&mut self, value: Duration) {
        self.query_interval = value;
    }

    pub fn set_query_response_interval(&mut self, value: Duration) {
        self.query_response_interval = value;
    }

    pub fn set_startup_query_interval(&mut self, value: Duration) {
        self.startup_query_interval = value;
    }

    pub fn set_startup_query_count(&mut self, value: u32) {
        self.startup_query_count = value;
    }

    pub fn set_last_listener_query_interval(&mut self, value: Duration) {
        self.last_listener_query_interval = value;
    }

    pub fn set_last_listener_query_count(&mut self, value: u32) {
        self.last_listener_query_count = value;
    }

    pub fn set_unsolicited_report_interval(&mut self, value: Duration) {
        self.unsolicited_report_interval = value;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let tv = TimersValues::default();
        assert_eq!(tv.robustness_variable(), 2);
        assert_eq!(tv.query_interval(), Duration::from_secs(125));
        assert_eq!(tv.query_response_interval(), Duration::from_secs(10));
        assert_eq!(tv.startup_query_interval(), Duration::from_secs(31) + Duration::from_millis(250));
        assert_eq!(tv.startup_query_count(), 2);
        assert_eq!(tv.last_listener_query_time(), Duration::from_secs(2));
    }

    #[test]
    fn derived_intervals() {
        let tv = TimersValues::default();
        // 2 * 125s + 10s
        assert_eq!(
            tv.multicast_address_listening_interval(),
            Duration::from_secs(260)
        );
        assert_eq!(
            tv.other_querier_present_interval(),
            Duration::from_secs(255)
        );
        assert_eq!(tv.older_host_present_interval(), Duration::from_secs(260));
    }

    #[test]
    fn setters_feed_derived_values() {
        let mut tv = TimersValues::default();
        tv.set_robustness_variable(3);
        tv.set_query_interval(Duration::from_secs(10));
        tv.set_query_response_interval(Duration::from_secs(1));
        assert_eq!(
            tv.multicast_address_listening_interval(),
            Duration::from_secs(31)
        );
        tv.set_last_listener_query_interval(Duration::from_millis(500));
        tv.set_last_listener_query_count(4);
        assert_eq!(tv.last_listener_query_time(), Duration::from_secs(2));
    }
}
