//! The progressive analysis state.
//!
//! A typical session fits a propensity score, trims the sample on it,
//! stratifies the trimmed sample and finally runs one or more estimators.
//! Every step reads what earlier steps left behind, so the state lives in one
//! struct with an explicit optional field per result:
//!
//! - refitting the score drops the strata (they were built on the old score)
//! - trimming replaces the sample, filters the score and drops the strata
//! - [`CausalModel::restart`] restores the original sample and all defaults
//!
//! Derived statistics of a sample are cached inside [`Sample`] itself and are
//! never stale, because every operation that changes the unit set builds a new
//! `Sample`.

use nalgebra::{DMatrix, DVector};

use crate::data::Sample;
use crate::domain::{
    Blocks, Estimates, MatchingOptions, OptimizerConfig, SelectionOptions, TermSpec, DEFAULT_CUTOFF,
};
use crate::error::{CausalError, Result};
use crate::estimators;
use crate::matching;
use crate::pscore::{self, PropensityScore};
use crate::strata::{validate_boundaries, Stratification, Stratum};
use crate::trim;

#[derive(Debug, Clone)]
pub struct CausalModel {
    original: Sample,
    sample: Sample,
    optimizer: OptimizerConfig,
    cutoff: f64,
    blocks: Blocks,
    pscore: Option<PropensityScore>,
    stratification: Option<Stratification>,
    estimates: Option<Estimates>,
    individual_effects: Option<DVector<f64>>,
}

impl CausalModel {
    pub fn new(outcome: DVector<f64>, treatment: Vec<bool>, covariates: DMatrix<f64>) -> Result<Self> {
        Ok(Self::from_sample(Sample::new(outcome, treatment, covariates)?))
    }

    pub fn from_sample(sample: Sample) -> Self {
        Self {
            original: sample.clone(),
            sample,
            optimizer: OptimizerConfig::default(),
            cutoff: DEFAULT_CUTOFF,
            blocks: Blocks::default(),
            pscore: None,
            stratification: None,
            estimates: None,
            individual_effects: None,
        }
    }

    /// Use `config` for every subsequent propensity fit.
    pub fn with_optimizer(mut self, config: OptimizerConfig) -> Self {
        self.optimizer = config;
        self
    }

    /// Current (possibly trimmed) sample.
    pub fn sample(&self) -> &Sample {
        &self.sample
    }

    /// Sample as supplied at construction.
    pub fn original(&self) -> &Sample {
        &self.original
    }

    pub fn optimizer(&self) -> &OptimizerConfig {
        &self.optimizer
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn blocks(&self) -> &Blocks {
        &self.blocks
    }

    pub fn pscore(&self) -> Option<&PropensityScore> {
        self.pscore.as_ref()
    }

    pub fn stratification(&self) -> Option<&Stratification> {
        self.stratification.as_ref()
    }

    pub fn strata(&self) -> Option<&[Stratum]> {
        self.stratification.as_ref().map(|s| s.strata.as_slice())
    }

    /// Results of the most recent estimator call.
    pub fn estimates(&self) -> Option<&Estimates> {
        self.estimates.as_ref()
    }

    /// Per-unit effects of the most recent matching run on the current sample.
    pub fn individual_effects(&self) -> Option<&DVector<f64>> {
        self.individual_effects.as_ref()
    }

    pub fn normalized_difference(&self) -> &[Option<f64>] {
        self.sample.normalized_difference()
    }

    /// Fit the propensity score with the given terms.
    pub fn propensity(&mut self, terms: &TermSpec) -> Result<&PropensityScore> {
        let score = pscore::fit(self.sample.covariates(), self.sample.treatment(), terms, &self.optimizer)?;
        Ok(self.install_pscore(score))
    }

    /// Choose terms by stepwise likelihood-ratio tests, then fit.
    pub fn propensity_select(&mut self, options: &SelectionOptions) -> Result<&PropensityScore> {
        let terms = pscore::select_terms(self.sample.covariates(), self.sample.treatment(), options, &self.optimizer)?;
        self.propensity(&terms)
    }

    fn install_pscore(&mut self, score: PropensityScore) -> &PropensityScore {
        self.stratification = None;
        self.pscore.insert(score)
    }

    pub fn set_cutoff(&mut self, cutoff: f64) -> Result<()> {
        trim::validate_cutoff(cutoff)?;
        self.cutoff = cutoff;
        Ok(())
    }

    /// Drop units whose score lies outside `[cutoff, 1 - cutoff]`.
    pub fn trim(&mut self) -> Result<()> {
        let score = self.pscore.as_ref().ok_or(CausalError::MissingPropensityScore)?;
        let (sample, score) = trim::trim(&self.sample, score, self.cutoff)?;
        self.sample = sample;
        self.pscore = Some(score);
        self.stratification = None;
        self.individual_effects = None;
        Ok(())
    }

    /// Pick the variance-minimizing cutoff, adopt it and trim.
    pub fn trim_select(&mut self) -> Result<f64> {
        let score = self.pscore.as_ref().ok_or(CausalError::MissingPropensityScore)?;
        let cutoff = trim::select_cutoff(&score.fitted)?;
        self.set_cutoff(cutoff)?;
        self.trim()?;
        Ok(cutoff)
    }

    pub fn set_blocks(&mut self, blocks: Blocks) -> Result<()> {
        match &blocks {
            Blocks::Count(0) => {
                return Err(CausalError::InvalidArgument("block count must be positive".to_string()));
            }
            Blocks::Count(_) => {}
            Blocks::Boundaries(list) => validate_boundaries(list)?,
        }
        self.blocks = blocks;
        Ok(())
    }

    /// Stratify the current sample on the current `blocks` setting.
    pub fn stratify(&mut self) -> Result<&Stratification> {
        let score = self.pscore.as_ref().ok_or(CausalError::MissingPropensityScore)?;
        let strat = Stratification::build(&self.sample, &score.fitted, &self.blocks)?;
        Ok(&*self.stratification.insert(strat))
    }

    /// Stratify on data-driven boundaries.
    pub fn stratify_select(&mut self) -> Result<&Stratification> {
        let score = self.pscore.as_ref().ok_or(CausalError::MissingPropensityScore)?;
        let strat = Stratification::adaptive(&self.sample, &score.fitted)?;
        Ok(&*self.stratification.insert(strat))
    }

    pub fn blocking(&mut self) -> Result<&Estimates> {
        let strat = self.stratification.as_ref().ok_or(CausalError::MissingStrata)?;
        let est = strat.blocking()?;
        Ok(&*self.estimates.insert(est))
    }

    pub fn matching(&mut self, options: &MatchingOptions) -> Result<&Estimates> {
        let res = matching::matching(&self.sample, options)?;
        self.individual_effects = Some(res.individual_effects);
        Ok(&*self.estimates.insert(res.estimates))
    }

    pub fn weighting(&mut self) -> Result<&Estimates> {
        let score = self.pscore.as_ref().ok_or(CausalError::MissingPropensityScore)?;
        let est = estimators::weighting(&self.sample, &score.fitted)?;
        Ok(&*self.estimates.insert(est))
    }

    pub fn ols(&mut self) -> Result<&Estimates> {
        let est = estimators::ols(&self.sample)?;
        Ok(&*self.estimates.insert(est))
    }

    /// Discard every result and restore the original sample and defaults.
    pub fn restart(&mut self) {
        let optimizer = self.optimizer.clone();
        *self = Self::from_sample(self.original.clone()).with_optimizer(optimizer);
        log::debug!("restart: restored {} units", self.sample.n());
    }
}
