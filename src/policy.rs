//! Strike policy: folds the outcome of an attempt into the task record and
//! decides what the scheduler does with the window afterwards.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::{Failure, Status, Task};

/// Default strike limit when none is configured.
pub const DEFAULT_STRIKES: u32 = 3;

/// How many failed attempts a task gets before it is struck out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strikes {
    /// Struck out once `fail_count` reaches the limit.
    Limit(u32),
    /// Never struck out; failed tasks are retried forever.
    Disabled,
}

impl Default for Strikes {
    fn default() -> Self {
        Strikes::Limit(DEFAULT_STRIKES)
    }
}

impl Strikes {
    /// The strike limit, `None` when strikes are disabled.
    pub fn limit(self) -> Option<u32> {
        match self {
            Strikes::Limit(n) => Some(n),
            Strikes::Disabled => None,
        }
    }
}

impl std::str::FromStr for Strikes {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "false" | "off" | "none" => Ok(Strikes::Disabled),
            "true" => Ok(Strikes::default()),
            n => n
                .parse()
                .map(Strikes::Limit)
                .map_err(|_| format!("strikes must be a number or `false`, got {n:?}")),
        }
    }
}

// `strikes = 5` or `strikes = false` in config files.
#[derive(Deserialize)]
#[serde(untagged)]
enum StrikesRepr {
    Count(u32),
    Flag(bool),
}

impl<'de> Deserialize<'de> for Strikes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match StrikesRepr::deserialize(deserializer)? {
            StrikesRepr::Count(n) => Strikes::Limit(n),
            StrikesRepr::Flag(false) => Strikes::Disabled,
            StrikesRepr::Flag(true) => Strikes::default(),
        })
    }
}

impl Serialize for Strikes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Strikes::Limit(n) => serializer.serialize_u32(*n),
            Strikes::Disabled => serializer.serialize_bool(false),
        }
    }
}

/// What happens to the window after an attempt settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Succeeded: drop from the window, move on.
    Advance,
    /// Failed with strikes left: stays at the head for another attempt.
    Retry,
    /// Struck out with block-on-fail: stays at the head, queue halts.
    Block,
    /// Struck out without blocking: evicted, processing continues.
    Evict,
}

/// Governs status transitions and failure accounting.
#[derive(Debug, Clone, Copy)]
pub struct StrikePolicy {
    strikes: Strikes,
    block_on_fail: bool,
}

impl StrikePolicy {
    pub fn new(strikes: Strikes, block_on_fail: bool) -> Self {
        Self {
            strikes,
            block_on_fail,
        }
    }

    /// Fold the outcome of an attempt into the running snapshot.
    pub fn settle(
        &self,
        running: &Task,
        outcome: Result<serde_json::Value, Failure>,
    ) -> Task {
        match outcome {
            Ok(result) => running.succeeded(result),
            Err(failure) => {
                let failed = running.failed(failure);
                match self.strikes.limit() {
                    Some(limit) if failed.fail_count >= limit => failed.struck_out(),
                    _ => failed,
                }
            }
        }
    }

    /// Decide what the scheduler does with a settled task.
    pub fn disposition(&self, settled: &Task) -> Disposition {
        match settled.status {
            Status::Success => Disposition::Advance,
            Status::Struckout if self.block_on_fail => Disposition::Block,
            Status::Struckout => Disposition::Evict,
            _ => Disposition::Retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskId;
    use serde_json::json;

    fn running() -> Task {
        Task::new(TaskId(0), json!({})).started()
    }

    #[test]
    fn success_sets_result_and_advances() {
        let policy = StrikePolicy::new(Strikes::Limit(3), true);
        let settled = policy.settle(&running(), Ok(json!(42)));

        assert_eq!(settled.status, Status::Success);
        assert_eq!(settled.result, Some(json!(42)));
        assert_eq!(policy.disposition(&settled), Disposition::Advance);
    }

    #[test]
    fn failure_below_limit_is_retried() {
        let policy = StrikePolicy::new(Strikes::Limit(3), true);
        let settled = policy.settle(&running(), Err(Failure::new("x")));

        assert_eq!(settled.status, Status::Fail);
        assert_eq!(settled.fail_count, 1);
        assert_eq!(policy.disposition(&settled), Disposition::Retry);
    }

    #[test]
    fn reaching_the_limit_strikes_out() {
        let policy = StrikePolicy::new(Strikes::Limit(2), false);
        let once = policy.settle(&running(), Err(Failure::new("1")));
        let twice = policy.settle(&once.started(), Err(Failure::new("2")));

        assert_eq!(twice.status, Status::Struckout);
        assert_eq!(twice.fail_count, 2);
        assert_eq!(twice.errors.len(), 2);
        assert_eq!(policy.disposition(&twice), Disposition::Evict);
    }

    #[test]
    fn struck_out_task_blocks_when_configured() {
        let policy = StrikePolicy::new(Strikes::Limit(1), true);
        let settled = policy.settle(&running(), Err(Failure::new("x")));
        assert_eq!(policy.disposition(&settled), Disposition::Block);
    }

    #[test]
    fn disabled_strikes_never_strike_out() {
        let policy = StrikePolicy::new(Strikes::Disabled, true);
        let mut task = running();
        for _ in 0..50 {
            task = policy.settle(&task, Err(Failure::new("again"))).started();
        }
        assert_eq!(task.fail_count, 50);
        assert_eq!(task.status, Status::Running);
    }

    #[test]
    fn strikes_deserialize_from_number_or_false() {
        #[derive(Deserialize)]
        struct Wrapper {
            strikes: Strikes,
        }

        let w: Wrapper = toml::from_str("strikes = 5").unwrap();
        assert_eq!(w.strikes, Strikes::Limit(5));
        let w: Wrapper = toml::from_str("strikes = false").unwrap();
        assert_eq!(w.strikes, Strikes::Disabled);
        assert_eq!("false".parse::<Strikes>().unwrap(), Strikes::Disabled);
        assert!("many".parse::<Strikes>().is_err());
    }
}
