//! Named join scenarios for deterministic testing.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Planted convoys inside background traffic
    Convoy,

    /// Paths crossing at the same place, in and out of the time window
    Crossing,

    /// Many vehicles packed into a few hundred meters
    Dense,

    /// Few vehicles spread over a whole city
    Sparse,

    /// Unparseable trips and short coordinate rows mixed into the input
    Malformed,

    /// Cancel partway, resume from the checkpoint, compare
    Resume,

    /// Points straddling cell edges, the equator and the prime meridian
    Boundary,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Convoy,
            ScenarioId::Crossing,
            ScenarioId::Dense,
            ScenarioId::Sparse,
            ScenarioId::Malformed,
            ScenarioId::Resume,
            ScenarioId::Boundary,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Convoy => "convoy",
            ScenarioId::Crossing => "crossing",
            ScenarioId::Dense => "dense",
            ScenarioId::Sparse => "sparse",
            ScenarioId::Malformed => "malformed",
            ScenarioId::Resume => "resume",
            ScenarioId::Boundary => "boundary",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Convoy => "40 vehicles plus 5 convoys at 2m, every convoy must be found",
            ScenarioId::Crossing => "Intersections visited simultaneously and 30s apart",
            ScenarioId::Dense => "80 vehicles in a 150m box, small batches, eviction every batch",
            ScenarioId::Sparse => "15 vehicles spread over 10km",
            ScenarioId::Malformed => "Bad trips and short rows are skipped without losing pairs",
            ScenarioId::Resume => "Cancelled run resumed from its checkpoint matches a single pass",
            ScenarioId::Boundary => "Matches across cell edges, the equator and the prime meridian",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "convoy" => Ok(ScenarioId::Convoy),
            "crossing" => Ok(ScenarioId::Crossing),
            "dense" => Ok(ScenarioId::Dense),
            "sparse" => Ok(ScenarioId::Sparse),
            "malformed" => Ok(ScenarioId::Malformed),
            "resume" => Ok(ScenarioId::Resume),
            "boundary" => Ok(ScenarioId::Boundary),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
