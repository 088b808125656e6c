use std::fmt;

use rollcall_gallery::Candidate;
use serde::Serialize;

use crate::config::ResolverConfig;
use crate::error::ConfigError;

/// Decision for a single detected face.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// A single identity is clearly closest and within the reject threshold.
    Accepted {
        identity_id: String,
        distance: f32,
        /// `1 - distance` clamped to [0, 1].
        confidence: f32,
    },

    /// Nothing close enough. `nearest` is the closest active identity, if
    /// any, so the miss can still be counted against it.
    Unrecognized { nearest: Option<Candidate> },

    /// Two or more identities are within the margin of the best match.
    /// Ordered closest first; always at least two entries.
    Ambiguous { candidates: Vec<Candidate> },
}

impl MatchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::Unrecognized { .. } => "unrecognized",
            Self::Ambiguous { .. } => "ambiguous",
        }
    }
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted {
                identity_id,
                confidence,
                ..
            } => write!(f, "accepted {identity_id} ({confidence:.3})"),
            Self::Unrecognized { nearest: Some(c) } => {
                write!(f, "unrecognized (nearest {} at {:.3})", c.identity_id, c.distance)
            }
            Self::Unrecognized { nearest: None } => write!(f, "unrecognized"),
            Self::Ambiguous { candidates } => {
                let ids: Vec<&str> = candidates.iter().map(|c| c.identity_id.as_str()).collect();
                write!(f, "ambiguous [{}]", ids.join(", "))
            }
        }
    }
}

/// Turns a gallery ranking into a [`MatchOutcome`].
///
/// Stateless and pure; safe to call from any number of threads.
#[derive(Debug, Clone)]
pub struct Resolver {
    cfg: ResolverConfig,
}

impl Resolver {
    pub fn new(cfg: ResolverConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.cfg
    }

    /// Applies the reject / margin / accept policy to a ranking sorted by
    /// ascending distance.
    pub fn resolve(&self, ranking: &[Candidate]) -> MatchOutcome {
        let Some(best) = ranking.first() else {
            return MatchOutcome::Unrecognized { nearest: None };
        };

        let d1 = best.distance;
        if d1 > self.cfg.reject_threshold {
            return MatchOutcome::Unrecognized {
                nearest: Some(best.clone()),
            };
        }

        let d2 = ranking.get(1).map_or(f32::INFINITY, |c| c.distance);
        if d2 - d1 < self.cfg.margin_threshold {
            let candidates: Vec<Candidate> = ranking
                .iter()
                .take_while(|c| c.distance - d1 < self.cfg.margin_threshold)
                .cloned()
                .collect();
            return MatchOutcome::Ambiguous { candidates };
        }

        MatchOutcome::Accepted {
            identity_id: best.identity_id.clone(),
            distance: d1,
            confidence: (1.0 - d1).clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, distance: f32) -> Candidate {
        Candidate {
            identity_id: id.into(),
            distance,
        }
    }

    fn resolver(reject: f32, margin: f32) -> Resolver {
        Resolver::new(ResolverConfig {
            reject_threshold: reject,
            margin_threshold: margin,
        })
        .unwrap()
    }

    #[test]
    fn test_empty_ranking_is_unrecognized() {
        assert_eq!(
            resolver(0.4, 0.03).resolve(&[]),
            MatchOutcome::Unrecognized { nearest: None }
        );
    }

    #[test]
    fn test_single_identity_accepted() {
        let out = resolver(0.4, 0.03).resolve(&[cand("a", 0.1)]);
        match out {
            MatchOutcome::Accepted {
                identity_id,
                confidence,
                ..
            } => {
                assert_eq!(identity_id, "a");
                assert!((confidence - 0.9).abs() < 1e-6);
            }
            other => panic!("expected accepted, got {other:?}"),
        }
    }

    #[test]
    fn test_above_reject_threshold() {
        let out = resolver(0.4, 0.03).resolve(&[cand("a", 0.45), cand("b", 0.9)]);
        assert_eq!(
            out,
            MatchOutcome::Unrecognized {
                nearest: Some(cand("a", 0.45))
            }
        );
    }

    #[test]
    fn test_near_tie_is_ambiguous() {
        // 0.05 vs 0.06 with margin 0.03: difference 0.01 is too small.
        let out = resolver(0.4, 0.03).resolve(&[cand("a", 0.05), cand("b", 0.06), cand("c", 0.5)]);
        match out {
            MatchOutcome::Ambiguous { candidates } => {
                let ids: Vec<&str> = candidates.iter().map(|c| c.identity_id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_second_best_beyond_reject_still_checks_margin() {
        // Second best is above the reject threshold but only 0.01 further.
        let out = resolver(0.4, 0.03).resolve(&[cand("a", 0.39), cand("b", 0.40001)]);
        assert_eq!(out.kind(), "ambiguous");
    }

    #[test]
    fn test_clear_margin_accepted() {
        let out = resolver(0.4, 0.03).resolve(&[cand("a", 0.1), cand("b", 0.3)]);
        assert!(out.is_accepted());
    }

    #[test]
    fn test_zero_margin_never_ambiguous() {
        let out = resolver(0.4, 0.0).resolve(&[cand("a", 0.1), cand("b", 0.1)]);
        assert!(out.is_accepted());
    }

    #[test]
    fn test_confidence_clamped() {
        let out = resolver(2.0, 0.0).resolve(&[cand("a", 1.5)]);
        match out {
            MatchOutcome::Accepted { confidence, .. } => assert_eq!(confidence, 0.0),
            other => panic!("expected accepted, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Resolver::new(ResolverConfig {
            reject_threshold: -1.0,
            margin_threshold: 0.03,
        })
        .is_err());
    }

    #[test]
    fn test_display() {
        let out = resolver(0.4, 0.03).resolve(&[cand("a", 0.1)]);
        assert_eq!(out.to_string(), "accepted a (0.900)");
        assert_eq!(
            MatchOutcome::Unrecognized { nearest: None }.to_string(),
            "unrecognized"
        );
    }
}
