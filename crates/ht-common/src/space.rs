//! Colonization state spaces.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Latent colonization status of one patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Colonization {
    Uncolonized,
    /// Colonized but not yet detectable (three-state models only).
    Latent,
    Colonized,
}

impl Colonization {
    pub fn name(&self) -> &'static str {
        match self {
            Colonization::Uncolonized => "uncolonized",
            Colonization::Latent => "latent",
            Colonization::Colonized => "colonized",
        }
    }
}

impl fmt::Display for Colonization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Number of latent states a model distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateSpace {
    /// Uncolonized / colonized.
    #[default]
    TwoState,
    /// Uncolonized / latent / colonized.
    ThreeState,
}

impl StateSpace {
    /// Number of states, which is also the CTMC dimension.
    pub fn size(&self) -> usize {
        match self {
            StateSpace::TwoState => 2,
            StateSpace::ThreeState => 3,
        }
    }

    /// States in matrix index order.
    pub fn states(&self) -> &'static [Colonization] {
        match self {
            StateSpace::TwoState => &[Colonization::Uncolonized, Colonization::Colonized],
            StateSpace::ThreeState => &[
                Colonization::Uncolonized,
                Colonization::Latent,
                Colonization::Colonized,
            ],
        }
    }

    /// Matrix index of a status, or None if the space has no such state.
    pub fn index(&self, status: Colonization) -> Option<usize> {
        self.states().iter().position(|s| *s == status)
    }

    /// Status at a matrix index.
    pub fn state(&self, index: usize) -> Option<Colonization> {
        self.states().get(index).copied()
    }

    /// Status reached by an acquisition.
    pub fn acquired(&self) -> Colonization {
        match self {
            StateSpace::TwoState => Colonization::Colonized,
            StateSpace::ThreeState => Colonization::Latent,
        }
    }
}

impl std::str::FromStr for StateSpace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "2" | "two" | "two_state" => Ok(StateSpace::TwoState),
            "3" | "three" | "three_state" => Ok(StateSpace::ThreeState),
            _ => Err(format!("unknown state space: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_round_trip() {
        for space in [StateSpace::TwoState, StateSpace::ThreeState] {
            for (i, s) in space.states().iter().enumerate() {
                assert_eq!(space.index(*s), Some(i));
                assert_eq!(space.state(i), Some(*s));
            }
        }
        assert_eq!(StateSpace::TwoState.index(Colonization::Latent), None);
    }

    #[test]
    fn acquisition_target_depends_on_space() {
        assert_eq!(StateSpace::TwoState.acquired(), Colonization::Colonized);
        assert_eq!(StateSpace::ThreeState.acquired(), Colonization::Latent);
    }

    #[test]
    fn parse_state_space() {
        assert_eq!("3".parse::<StateSpace>().unwrap(), StateSpace::ThreeState);
        assert_eq!("two_state".parse::<StateSpace>().unwrap(), StateSpace::TwoState);
        assert!("four".parse::<StateSpace>().is_err());
    }
}
