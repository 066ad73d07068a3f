use crate::balancer::BalancerPolicy;
use crate::dispatch::DispatchOptions;
use crate::durability::DurabilityLevel;
use crate::lock::LockOptions;
use crate::sync::{PassiveStrategy, SyncOptions};
use regex::Regex;
use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Default)]
pub struct ClusterOptions {
    pub balancer: Option<BalancerPolicy>,
    pub durability: Option<DurabilityLevel>,
    pub allow_empty_cluster: Option<bool>,
    pub dispatch_concurrency: Option<usize>,
    pub dispatch_timeout: Option<Duration>,
    /// Failure detection is off unless set.
    pub failure_detection_interval: Option<Duration>,
    /// Auto-activation is off unless set.
    pub auto_activation_interval: Option<Duration>,
    pub probe_timeout: Option<Duration>,
    pub lock_coordinator_timeout: Option<Duration>,
    pub lock_backoff: Option<Vec<Duration>>,
    pub sync_concurrency: Option<usize>,
    pub sync_batch_size: Option<usize>,
    pub sync_fetch_size: Option<usize>,
    pub version_pattern: Option<String>,
    pub default_strategy: Option<String>,
}

pub(super) struct ClusterOptionsValidated {
    pub balancer: BalancerPolicy,
    pub durability: DurabilityLevel,
    pub allow_empty_cluster: bool,
    pub dispatch_concurrency: usize,
    pub dispatch_timeout: Option<Duration>,
    pub failure_detection_interval: Option<Duration>,
    pub auto_activation_interval: Option<Duration>,
    pub probe_timeout: Duration,
    pub lock_coordinator_timeout: Duration,
    pub lock_backoff: Vec<Duration>,
    pub sync_concurrency: usize,
    pub sync_batch_size: usize,
    pub sync_fetch_size: usize,
    pub version_pattern: Option<Regex>,
    pub default_strategy: String,
}

impl ClusterOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.dispatch_concurrency == 0 {
            return Err("Dispatch concurrency must be at least 1");
        }
        if self.dispatch_timeout == Some(Duration::ZERO) {
            return Err("Dispatch timeout must be greater than zero");
        }
        if self.failure_detection_interval == Some(Duration::ZERO) {
            return Err("Failure detection interval must be greater than zero");
        }
        if self.auto_activation_interval == Some(Duration::ZERO) {
            return Err("Auto-activation interval must be greater than zero");
        }
        if self.probe_timeout == Duration::ZERO {
            return Err("Probe timeout must be greater than zero");
        }
        if self.lock_coordinator_timeout == Duration::ZERO {
            return Err("Lock coordinator timeout must be greater than zero");
        }
        if self.lock_backoff.is_empty() {
            return Err("Lock backoff schedule must have at least one delay");
        }
        if self.sync_concurrency == 0 {
            return Err("Synchronization concurrency must be at least 1");
        }
        if self.sync_batch_size == 0 {
            return Err("Synchronization batch size must be at least 1");
        }
        if self.sync_fetch_size == 0 {
            return Err("Synchronization fetch size must be at least 1");
        }

        Ok(())
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            concurrency: self.dispatch_concurrency,
            timeout: self.dispatch_timeout,
            allow_empty: self.allow_empty_cluster,
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            coordinator_timeout: self.lock_coordinator_timeout,
            backoff: self.lock_backoff.clone(),
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            concurrency: self.sync_concurrency,
            batch_size: self.sync_batch_size,
            fetch_size: self.sync_fetch_size,
            version_pattern: self.version_pattern.clone(),
        }
    }
}

impl TryFrom<ClusterOptions> for ClusterOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ClusterOptions) -> Result<Self, Self::Error> {
        let version_pattern = match options.version_pattern {
            Some(pattern) => Some(Regex::new(&pattern).map_err(|_| "Version pattern is not a valid regex")?),
            None => None,
        };

        let values = ClusterOptionsValidated {
            balancer: options.balancer.unwrap_or(BalancerPolicy::RoundRobin),
            durability: options.durability.unwrap_or(DurabilityLevel::Fine),
            allow_empty_cluster: options.allow_empty_cluster.unwrap_or(false),
            dispatch_concurrency: options.dispatch_concurrency.unwrap_or(16),
            dispatch_timeout: options.dispatch_timeout,
            failure_detection_interval: options.failure_detection_interval,
            auto_activation_interval: options.auto_activation_interval,
            probe_timeout: options.probe_timeout.unwrap_or(Duration::from_secs(5)),
            lock_coordinator_timeout: options.lock_coordinator_timeout.unwrap_or(Duration::from_secs(1)),
            lock_backoff: options.lock_backoff.unwrap_or_else(|| {
                vec![
                    Duration::from_millis(1),
                    Duration::from_millis(10),
                    Duration::from_millis(100),
                ]
            }),
            sync_concurrency: options.sync_concurrency.unwrap_or(4),
            sync_batch_size: options.sync_batch_size.unwrap_or(100),
            sync_fetch_size: options.sync_fetch_size.unwrap_or(1000),
            version_pattern,
            default_strategy: options
                .default_strategy
                .unwrap_or_else(|| PassiveStrategy::ID.to_string()),
        };

        values.validate()?;
        Ok(values)
    }
}
