use rand::RngCore;
use sample_consensus::{Consensus, Estimator, Model};

/// RANSAC (Random Sample Consensus) with local optimization.
///
/// Repeatedly fits minimal samples and keeps the model with the most inliers. Every
/// hypothesis whose consensus set is at least half as large as the best one so far is
/// re-fit on that set, and re-scored, until it stops growing. Sampling stops once the
/// adaptive trial count for the requested `probability` is reached, or after
/// `max_iterations` trials, whichever comes first.
pub struct Ransac<R> {
    threshold: f64,
    probability: f64,
    max_iterations: usize,
    local_iterations: usize,
    rng: R,
}

impl<R> Ransac<R>
where
    R: RngCore,
{
    pub fn new(threshold: f64, rng: R) -> Self {
        Self {
            threshold,
            probability: 0.999,
            max_iterations: 1000,
            local_iterations: 10,
            rng,
        }
    }

    /// Set the probability of having drawn at least one outlier-free sample.
    ///
    /// Default: `0.999`
    pub fn probability(self, probability: f64) -> Self {
        Self {
            probability,
            ..self
        }
    }

    /// Set the hard cap on the number of trials.
    ///
    /// Default: `1000`
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// Set the maximum number of re-fits per hypothesis. `0` disables local optimization.
    ///
    /// Default: `10`
    pub fn local_iterations(self, local_iterations: usize) -> Self {
        Self {
            local_iterations,
            ..self
        }
    }

    fn inliers<M, Data>(&self, model: &M, data: &[Data]) -> Vec<usize>
    where
        M: Model<Data>,
    {
        data.iter()
            .enumerate()
            .filter(|(_, datum)| model.residual(datum) < self.threshold)
            .map(|(i, _)| i)
            .collect()
    }

    /// Re-fits the model on its own inliers while that explains more of `data`.
    fn local_optimization<E, Data>(
        &self,
        estimator: &E,
        data: &[Data],
        model: E::Model,
        inliers: Vec<usize>,
    ) -> (E::Model, Vec<usize>)
    where
        E: Estimator<Data>,
        Data: Clone,
    {
        let mut best = (model, inliers);
        for _ in 0..self.local_iterations {
            let refits = estimator.estimate(best.1.iter().map(|&i| data[i].clone()));
            let grown = refits
                .into_iter()
                .map(|refit| {
                    let inliers = self.inliers(&refit, data);
                    (refit, inliers)
                })
                .max_by_key(|(_, inliers)| inliers.len())
                .filter(|(_, inliers)| inliers.len() > best.1.len());

            match grown {
                Some(grown) => best = grown,
                None => break,
            }
        }
        best
    }

    /// Trials needed so that an all-inlier sample of `sample_size` points has been drawn
    /// with the configured probability, given the current inlier ratio.
    fn required_iterations(&self, inliers: usize, total: usize, sample_size: usize) -> usize {
        let inlier_ratio = inliers as f64 / total as f64;
        let clean_sample = inlier_ratio.powi(sample_size as i32);
        if clean_sample >= 1.0 {
            return 0;
        }
        let denominator = (1.0 - clean_sample).ln();
        if denominator >= 0.0 || !denominator.is_finite() {
            return self.max_iterations;
        }
        let required = ((1.0 - self.probability).ln() / denominator).ceil();
        if required.is_finite() && required >= 0.0 {
            (required as usize).min(self.max_iterations)
        } else {
            self.max_iterations
        }
    }
}

impl<E, R, Data> Consensus<E, Data> for Ransac<R>
where
    E: Estimator<Data>,
    R: RngCore,
    Data: Clone,
{
    type Inliers = Vec<usize>;

    fn model<I>(&mut self, estimator: &E, data: I) -> Option<E::Model>
    where
        I: Iterator<Item = Data> + Clone,
    {
        self.model_inliers(estimator, data).map(|(model, _)| model)
    }

    fn model_inliers<I>(&mut self, estimator: &E, data: I) -> Option<(E::Model, Self::Inliers)>
    where
        I: Iterator<Item = Data> + Clone,
    {
        let data: Vec<Data> = data.collect();
        if data.len() < E::MIN_SAMPLES {
            return None;
        }

        let mut best: Option<(E::Model, Vec<usize>)> = None;
        let mut required = self.max_iterations;
        let mut trial = 0;
        while trial < required {
            trial += 1;

            let sample =
                rand::seq::index::sample(&mut self.rng, data.len(), E::MIN_SAMPLES).into_vec();
            let models = estimator.estimate(sample.iter().map(|&i| data[i].clone()));
            for model in models {
                let inliers = self.inliers(&model, &data);
                let best_count = best.as_ref().map_or(0, |(_, current)| current.len());

                let promising = inliers.len() > E::MIN_SAMPLES && 2 * inliers.len() >= best_count;
                let (model, inliers) = if promising {
                    self.local_optimization(estimator, &data, model, inliers)
                } else {
                    (model, inliers)
                };

                if best.is_none() || inliers.len() > best_count {
                    required = self.required_iterations(inliers.len(), data.len(), E::MIN_SAMPLES);
                    best = Some((model, inliers));
                }
            }
        }

        best.filter(|(_, inliers)| inliers.len() >= E::MIN_SAMPLES)
    }
}
