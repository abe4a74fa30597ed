use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::DesignError;

/// A named experimental factor with enumerated levels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Factor {
    pub name: String,
    pub levels: Vec<String>,
    /// The level that switches a profile to the proposer/critic architecture
    #[serde(default)]
    pub multi_agent_level: Option<String>,
}

impl Factor {
    pub fn new<S: Into<String>>(name: impl Into<String>, levels: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            levels: levels.into_iter().map(Into::into).collect(),
            multi_agent_level: None,
        }
    }

    pub fn with_multi_agent_level(mut self, level: impl Into<String>) -> Self {
        self.multi_agent_level = Some(level.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub id: String,
    #[serde(default)]
    pub context: String,
}

impl Scenario {
    pub fn new(id: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context: context.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    SingleAgent,
    MultiAgent,
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Architecture::SingleAgent => write!(f, "single_agent"),
            Architecture::MultiAgent => write!(f, "multi_agent"),
        }
    }
}

/// One combination of factor levels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub levels: BTreeMap<String, String>,
    pub architecture: Architecture,
}

/// Unique identity of a cell within a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub profile: String,
    pub scenario: String,
    pub replication: usize,
}

impl CellKey {
    pub fn new(profile: impl Into<String>, scenario: impl Into<String>, replication: usize) -> Self {
        Self {
            profile: profile.into(),
            scenario: scenario.into(),
            replication,
        }
    }
}

impl std::fmt::Display for CellKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.profile, self.scenario, self.replication)
    }
}

/// Work order for a single cell
#[derive(Debug, Clone)]
pub struct CellPlan {
    pub key: CellKey,
    pub profile: Profile,
    pub scenario: Scenario,
}

/// Factors × scenarios × replications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDesign {
    factors: Vec<Factor>,
    scenarios: Vec<Scenario>,
    replications: usize,
}

impl ExperimentDesign {
    pub fn new(
        factors: Vec<Factor>,
        scenarios: Vec<Scenario>,
        replications: usize,
    ) -> Result<Self, DesignError> {
        let mut names = BTreeSet::new();
        for factor in &factors {
            if !names.insert(factor.name.as_str()) {
                return Err(DesignError::DuplicateFactor(factor.name.clone()));
            }
            if factor.levels.is_empty() {
                return Err(DesignError::EmptyFactor(factor.name.clone()));
            }
            let mut levels = BTreeSet::new();
            for level in &factor.levels {
                if !levels.insert(level.as_str()) {
                    return Err(DesignError::DuplicateLevel {
                        factor: factor.name.clone(),
                        level: level.clone(),
                    });
                }
            }
            if let Some(multi) = &factor.multi_agent_level {
                if !levels.contains(multi.as_str()) {
                    return Err(DesignError::UnknownMultiAgentLevel {
                        factor: factor.name.clone(),
                        level: multi.clone(),
                    });
                }
            }
        }

        if scenarios.is_empty() {
            return Err(DesignError::NoScenarios);
        }
        let mut ids = BTreeSet::new();
        for scenario in &scenarios {
            if !ids.insert(scenario.id.as_str()) {
                return Err(DesignError::DuplicateScenario(scenario.id.clone()));
            }
        }

        if replications == 0 {
            return Err(DesignError::NoReplications);
        }

        let design = Self {
            factors,
            scenarios,
            replications,
        };
        // Level names may contain the separator, so joined names can collide
        let mut profiles = BTreeSet::new();
        for combo in design.level_combinations() {
            let name = profile_name(&combo);
            if !profiles.insert(name.clone()) {
                return Err(DesignError::AmbiguousProfile(name));
            }
        }
        Ok(design)
    }

    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    pub fn replications(&self) -> usize {
        self.replications
    }

    pub fn cell_count(&self) -> usize {
        let profiles: usize = self.factors.iter().map(|f| f.levels.len()).product();
        profiles * self.scenarios.len() * self.replications
    }

    /// Every level combination, first factor varying slowest.
    ///
    /// When no factor carries a multi-agent level the architecture follows
    /// critic availability.
    pub fn profiles(&self, critic_available: bool) -> Vec<Profile> {
        let marks_architecture = self.factors.iter().any(|f| f.multi_agent_level.is_some());

        self.level_combinations()
            .into_iter()
            .map(|combo| {
                let multi = if marks_architecture {
                    self.factors
                        .iter()
                        .zip(&combo)
                        .any(|(f, level)| f.multi_agent_level.as_deref() == Some(*level))
                } else {
                    critic_available
                };
                Profile {
                    name: profile_name(&combo),
                    levels: self
                        .factors
                        .iter()
                        .zip(&combo)
                        .map(|(f, level)| (f.name.clone(), level.to_string()))
                        .collect(),
                    architecture: if multi {
                        Architecture::MultiAgent
                    } else {
                        Architecture::SingleAgent
                    },
                }
            })
            .collect()
    }

    fn level_combinations(&self) -> Vec<Vec<&str>> {
        let mut combos: Vec<Vec<&str>> = vec![Vec::new()];
        for factor in &self.factors {
            combos = combos
                .into_iter()
                .flat_map(|prefix| {
                    factor.levels.iter().map(move |level| {
                        let mut next = prefix.clone();
                        next.push(level.as_str());
                        next
                    })
                })
                .collect();
        }
        combos
    }

    /// The full cell set. Fails if a multi-agent profile exists without a critic.
    pub fn cells(&self, critic_available: bool) -> Result<Vec<CellPlan>, DesignError> {
        let profiles = self.profiles(critic_available);
        if !critic_available {
            if let Some(profile) = profiles
                .iter()
                .find(|p| p.architecture == Architecture::MultiAgent)
            {
                return Err(DesignError::MissingCritic(profile.name.clone()));
            }
        }

        let mut cells = Vec::with_capacity(self.cell_count());
        for profile in &profiles {
            for scenario in &self.scenarios {
                for replication in 0..self.replications {
                    cells.push(CellPlan {
                        key: CellKey::new(&profile.name, &scenario.id, replication),
                        profile: profile.clone(),
                        scenario: scenario.clone(),
                    });
                }
            }
        }
        Ok(cells)
    }
}

fn profile_name(combo: &[&str]) -> String {
    if combo.is_empty() {
        "default".to_string()
    } else {
        combo.join("_")
    }
}
