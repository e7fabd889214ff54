use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::ProviderId;

/// Process-wide call budget and retry behavior for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    pub quota_window: Duration,
    pub quota_limit: u32,
    pub retry: RetryPolicy,
}

impl ProviderPolicy {
    pub fn alpaca_default() -> Self {
        Self {
            provider_id: ProviderId::Alpaca,
            quota_window: Duration::from_secs(60),
            quota_limit: 200,
            retry: RetryPolicy::exponential(3, Duration::from_millis(160), Duration::from_secs(5)),
        }
    }

    pub fn yahoo_default() -> Self {
        Self {
            provider_id: ProviderId::Yahoo,
            quota_window: Duration::from_secs(60),
            quota_limit: 120,
            retry: RetryPolicy::exponential(3, Duration::from_millis(100), Duration::from_secs(3)),
        }
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::Alpaca => Self::alpaca_default(),
            ProviderId::Yahoo => Self::yahoo_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;

    #[test]
    fn alpaca_policy_backs_off_from_160ms_to_5s() {
        let policy = ProviderPolicy::alpaca_default();

        assert_eq!(policy.provider_id, ProviderId::Alpaca);
        assert_eq!(policy.retry.max_attempts, 3);
        assert!(matches!(
            policy.retry.backoff,
            Backoff::Exponential { base, max, jitter: true, .. }
                if base == Duration::from_millis(160) && max == Duration::from_secs(5)
        ));
    }

    #[test]
    fn yahoo_policy_backs_off_from_100ms_to_3s() {
        let policy = ProviderPolicy::default_for(ProviderId::Yahoo);

        assert_eq!(policy.quota_limit, 120);
        assert!(matches!(
            policy.retry.backoff,
            Backoff::Exponential { base, max, .. }
                if base == Duration::from_millis(100) && max == Duration::from_secs(3)
        ));
    }
}
