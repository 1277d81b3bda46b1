//! Failure Injection for the Mock Runtime
//!
//! Failures are keyed by operation and, optionally, by target. A
//! target-specific entry wins over a wildcard one.

use std::collections::HashMap;
use std::time::Duration;

use crate::runtime::RuntimeError;

/// Runtime operations that can be made to misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    Attach,
    Load,
    Unload,
}

/// Failure configuration for an operation
#[derive(Debug, Clone, Default)]
pub struct FailureConfig {
    /// Error to return (if any)
    pub error: Option<RuntimeError>,
    /// Delay before the operation completes
    pub delay: Option<Duration>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Create a config that returns an error
    pub fn error(error: RuntimeError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Create a config that just adds delay
    pub fn delay(duration: Duration) -> Self {
        Self {
            delay: Some(duration),
            ..Self::default()
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

type FailureKey = (RuntimeOp, Option<String>);

/// Failure injector for the mock runtime
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<FailureKey, FailureConfig>,
    call_counts: HashMap<FailureKey, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for an operation, for one target or (with `None`) all of them.
    pub fn inject(&mut self, op: RuntimeOp, target_id: Option<&str>, config: FailureConfig) {
        let key = (op, target_id.map(str::to_string));
        self.call_counts.insert(key.clone(), 0);
        self.configs.insert(key, config);
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    /// The failure that applies to this call, if any.
    pub fn check(&mut self, op: RuntimeOp, target_id: &str) -> Option<FailureConfig> {
        let specific = (op, Some(target_id.to_string()));
        let key = if self.configs.contains_key(&specific) {
            specific
        } else {
            (op, None)
        };
        let config = self.configs.get(&key)?;

        let count = self.call_counts.entry(key).or_insert(0);
        *count += 1;
        match config.fail_count {
            Some(limit) if *count > limit => None,
            _ => Some(config.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_failure_by_default() {
        let mut injector = FailureInjector::new();
        assert!(injector.check(RuntimeOp::Attach, "t1").is_none());
    }

    #[test]
    fn test_target_specific_wins() {
        let mut injector = FailureInjector::new();
        injector.inject(RuntimeOp::Attach, None, FailureConfig::delay(Duration::from_millis(5)));
        injector.inject(
            RuntimeOp::Attach,
            Some("ghost"),
            FailureConfig::error(RuntimeError::NotFound("ghost".into())),
        );

        let ghost = injector.check(RuntimeOp::Attach, "ghost").unwrap();
        assert!(matches!(ghost.error, Some(RuntimeError::NotFound(_))));

        let other = injector.check(RuntimeOp::Attach, "t1").unwrap();
        assert!(other.error.is_none());
        assert_eq!(other.delay, Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_fail_count() {
        let mut injector = FailureInjector::new();
        injector.inject(
            RuntimeOp::Load,
            Some("t1"),
            FailureConfig::error(RuntimeError::Unavailable("gone".into())).with_fail_count(2),
        );

        assert!(injector.check(RuntimeOp::Load, "t1").is_some());
        assert!(injector.check(RuntimeOp::Load, "t1").is_some());
        assert!(injector.check(RuntimeOp::Load, "t1").is_none());
    }

    #[test]
    fn test_clear() {
        let mut injector = FailureInjector::new();
        injector.inject(RuntimeOp::Unload, None, FailureConfig::delay(Duration::from_secs(1)));
        injector.clear();
        assert!(injector.check(RuntimeOp::Unload, "t1").is_none());
    }
}
