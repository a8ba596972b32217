//! Exponential smoothing of published probabilities.
//!
//! Only updates at a depth no lower than the last published one are blended.
//! A shallower late update is published raw and becomes the new baseline.

use crate::pom::OutcomeProbabilities;

/// Weight of the newest computation
pub const SMOOTHING_FACTOR: f64 = 0.3;

#[derive(Debug, Clone, Default)]
pub struct Smoother {
    prior: Option<(OutcomeProbabilities, u32)>,
}

impl Smoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a fresh computation in and return the triple to publish.
    pub fn update(&mut self, fresh: OutcomeProbabilities, depth: u32) -> OutcomeProbabilities {
        let published = match self.prior {
            Some((prior, prior_depth)) if depth >= prior_depth => OutcomeProbabilities::new(
                blend(prior.white, fresh.white),
                blend(prior.draw, fresh.draw),
                blend(prior.black, fresh.black),
            )
            .renormalized(),
            _ => fresh,
        };
        self.prior = Some((published, depth));
        published
    }

    /// Drop the prior (the analysed position changed).
    pub fn reset(&mut self) {
        self.prior = None;
    }

    pub fn prior(&self) -> Option<(OutcomeProbabilities, u32)> {
        self.prior
    }
}

fn blend(prior: f64, fresh: f64) -> f64 {
    prior + SMOOTHING_FACTOR * (fresh - prior)
}
