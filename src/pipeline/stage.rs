use std::fmt;

use serde::Serialize;

/// A step in the life of a pipeline request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Authorizing,
    CacheLookup,
    Hit,
    Miss,
    Joined,
    Transcoding,
    CacheStore,
    AwaitingShared,
    Responding,
    Done,
    Denied,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Denied | Stage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Authorizing => "authorizing",
            Stage::CacheLookup => "cache_lookup",
            Stage::Hit => "hit",
            Stage::Miss => "miss",
            Stage::Joined => "joined",
            Stage::Transcoding => "transcoding",
            Stage::CacheStore => "cache_store",
            Stage::AwaitingShared => "awaiting_shared",
            Stage::Responding => "responding",
            Stage::Done => "done",
            Stage::Denied => "denied",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered record of the stages a request went through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StageTrace {
    stages: Vec<Stage>,
}

impl StageTrace {
    pub fn new() -> Self {
        Self {
            stages: vec![Stage::Received],
        }
    }

    pub fn enter(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn last(&self) -> Option<Stage> {
        self.stages.last().copied()
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn is_finished(&self) -> bool {
        self.last().is_some_and(|s| s.is_terminal())
    }
}

impl fmt::Display for StageTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}
