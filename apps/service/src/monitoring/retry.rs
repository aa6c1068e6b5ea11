use std::time::Duration;

use super::types::MonitorStatus;

/// Outcome of the retry policy for one check cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryVerdict {
    pub status: MonitorStatus,
    pub consecutive_failures: u32,
    pub next_delay: Duration,
}

/// Decide whether a raw failure is retried or confirmed down.
///
/// A success resets the failure counter and returns to the steady interval.
/// A failure within the retry budget is reported as `Pending` and retried
/// after `retry_interval`; once the budget is exhausted the monitor is
/// confirmed `Down` and returns to the steady interval. `retries = 0` means
/// the first failure is immediately confirmed down.
pub fn evaluate(
    raw_up: bool,
    consecutive_failures: u32,
    retries: u32,
    interval: Duration,
    retry_interval: Duration,
) -> RetryVerdict {
    if raw_up {
        return RetryVerdict {
            status: MonitorStatus::Up,
            consecutive_failures: 0,
            next_delay: interval,
        };
    }

    if consecutive_failures < retries {
        RetryVerdict {
            status: MonitorStatus::Pending,
            consecutive_failures: consecutive_failures + 1,
            next_delay: retry_interval,
        }
    } else {
        RetryVerdict {
            status: MonitorStatus::Down,
            consecutive_failures: consecutive_failures.saturating_add(1),
            next_delay: interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(60);
    const RETRY_INTERVAL: Duration = Duration::from_secs(5);

    fn eval(raw_up: bool, failures: u32, retries: u32) -> RetryVerdict {
        evaluate(raw_up, failures, retries, INTERVAL, RETRY_INTERVAL)
    }

    #[test]
    fn success_resets_counter_and_uses_steady_interval() {
        let verdict = eval(true, 3, 2);
        assert_eq!(verdict.status, MonitorStatus::Up);
        assert_eq!(verdict.consecutive_failures, 0);
        assert_eq!(verdict.next_delay, INTERVAL);
    }

    #[test]
    fn exactly_retries_pending_cycles_before_down() {
        // retries = 2: two pending failures, then confirmed down
        let mut failures = 0;
        let first = eval(false, failures, 2);
        assert_eq!(first.status, MonitorStatus::Pending);
        assert_eq!(first.next_delay, RETRY_INTERVAL);
        failures = first.consecutive_failures;

        let second = eval(false, failures, 2);
        assert_eq!(second.status, MonitorStatus::Pending);
        failures = second.consecutive_failures;

        let third = eval(false, failures, 2);
        assert_eq!(third.status, MonitorStatus::Down);
        // Confirmed down returns to the steady interval, not the retry one
        assert_eq!(third.next_delay, INTERVAL);
    }

    #[test]
    fn zero_retries_confirms_down_immediately() {
        let verdict = eval(false, 0, 0);
        assert_eq!(verdict.status, MonitorStatus::Down);
        assert_eq!(verdict.next_delay, INTERVAL);
    }

    #[test]
    fn failures_while_confirmed_down_stay_down() {
        let verdict = eval(false, 5, 2);
        assert_eq!(verdict.status, MonitorStatus::Down);
        assert_eq!(verdict.next_delay, INTERVAL);
    }
}
