//! Stage definitions, selection and run states

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Pipeline stage identifier, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Stage 0: reference combinations
    Combinations,
    /// Stage 1: paginated listing into the primary map
    Primary,
    /// Stage 2: per-item details, resolved ids into the reverse map
    Resolve,
    /// Stage 3: independent per-item details
    ItemDetails,
    /// Stage 4: first detail fetch per resolved id
    ResolvedDetailsA,
    /// Stage 5: second detail fetch per resolved id
    ResolvedDetailsB,
    /// Stage 6: flush and manifest, always runs
    Finalize,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Combinations,
        Stage::Primary,
        Stage::Resolve,
        Stage::ItemDetails,
        Stage::ResolvedDetailsA,
        Stage::ResolvedDetailsB,
        Stage::Finalize,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Combinations => "combinations",
            Self::Primary => "primary",
            Self::Resolve => "resolve",
            Self::ItemDetails => "item-details",
            Self::ResolvedDetailsA => "resolved-details-a",
            Self::ResolvedDetailsB => "resolved-details-b",
            Self::Finalize => "finalize",
        }
    }

    /// Stages whose output this stage consumes directly
    pub fn dependencies(self) -> &'static [Stage] {
        match self {
            Self::Combinations | Self::Finalize => &[],
            Self::Primary => &[Self::Combinations],
            Self::Resolve | Self::ItemDetails => &[Self::Primary],
            Self::ResolvedDetailsA | Self::ResolvedDetailsB => &[Self::Resolve],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|st| st.name()).collect();
                format!("unknown stage '{s}' (expected one of: all, {})", names.join(", "))
            })
    }
}

/// What a run was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageTarget {
    #[default]
    All,
    /// One stage plus everything it transitively depends on
    Only(Stage),
}

impl StageTarget {
    /// Stages to execute, in order; `Finalize` is always included
    pub fn required_stages(self) -> BTreeSet<Stage> {
        let mut required = BTreeSet::from([Stage::Finalize]);
        match self {
            Self::All => required.extend(Stage::ALL),
            Self::Only(stage) => {
                let mut pending = vec![stage];
                while let Some(next) = pending.pop() {
                    if required.insert(next) {
                        pending.extend_from_slice(next.dependencies());
                    }
                }
            }
        }
        required
    }
}

impl fmt::Display for StageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(stage) => write!(f, "{stage}"),
        }
    }
}

impl FromStr for StageTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Only)
        }
    }
}

/// Orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    CombinationsLoaded,
    PrimaryMapBuilt,
    DetailsResolved,
    Finalized,
    /// Fatal startup error; no stage ran
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::CombinationsLoaded => "combinations loaded",
            Self::PrimaryMapBuilt => "primary map built",
            Self::DetailsResolved => "details resolved",
            Self::Finalized => "finalized",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}
