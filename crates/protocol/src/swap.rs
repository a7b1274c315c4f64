//! A swap from either side, as stored.

use serde::{Deserialize, Serialize};

use crate::alice::AliceState;
use crate::bob::BobState;
use crate::phase::{Phase, Role};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "role", content = "state", rename_all = "snake_case")]
pub enum Swap {
    Alice(AliceState),
    Bob(BobState),
}

impl Swap {
    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Self::Alice(_) => Role::Alice,
            Self::Bob(_) => Role::Bob,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            Self::Alice(state) => state.phase(),
            Self::Bob(state) => state.phase(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Alice(state) => state.name(),
            Self::Bob(state) => state.name(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }
}

impl From<AliceState> for Swap {
    fn from(state: AliceState) -> Self {
        Self::Alice(state)
    }
}

impl From<BobState> for Swap {
    fn from(state: BobState) -> Self {
        Self::Bob(state)
    }
}
