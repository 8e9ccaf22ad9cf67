use std::fmt;

use thiserror::Error;

/// 부트스트랩 단계 — 정의 순서대로만 진행합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Idle,
    Locate,
    Clean,
    Scaffold,
    Install,
    Build,
    Typecheck,
    ReapPort,
    SpawnServer,
    Serving,
    Finished,
}

impl Stage {
    /// Stages that may be skipped by configuration
    pub fn is_optional(&self) -> bool {
        matches!(self, Stage::Clean | Stage::Build | Stage::Typecheck)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::Locate => "locate toolchain",
            Stage::Clean => "clean",
            Stage::Scaffold => "scaffold",
            Stage::Install => "install",
            Stage::Build => "build",
            Stage::Typecheck => "typecheck",
            Stage::ReapPort => "free port",
            Stage::SpawnServer => "start dev server",
            Stage::Serving => "serving",
            Stage::Finished => "finished",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("invalid stage transition: {0} -> {1}")]
    InvalidTransition(Stage, Stage),
}

pub struct StateMachine {
    pub stage: Stage,
    /// Every stage entered, in order
    pub history: Vec<Stage>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            stage: Stage::Idle,
            history: Vec::new(),
        }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward-only; optional stages in between may be skipped.
    /// Any stage may jump to `Finished` (abort, decline or shutdown).
    pub fn can_transition(&self, to: Stage) -> bool {
        if to == Stage::Finished {
            return self.stage != Stage::Finished;
        }
        if to <= self.stage {
            return false;
        }
        ALL_STAGES
            .iter()
            .filter(|s| **s > self.stage && **s < to)
            .all(Stage::is_optional)
    }

    pub fn transition(&mut self, to: Stage) -> Result<(), TransitionError> {
        if self.can_transition(to) {
            tracing::debug!("Stage transition: {} -> {}", self.stage, to);
            self.stage = to;
            self.history.push(to);
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.stage, to))
        }
    }
}

const ALL_STAGES: [Stage; 11] = [
    Stage::Idle,
    Stage::Locate,
    Stage::Clean,
    Stage::Scaffold,
    Stage::Install,
    Stage::Build,
    Stage::Typecheck,
    Stage::ReapPort,
    Stage::SpawnServer,
    Stage::Serving,
    Stage::Finished,
];
