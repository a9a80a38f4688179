//! Reference model: mass-action acquisition, constant progression and
//! clearance, per-kind test accuracy and an importation distribution.
//!
//! # Updates
//!
//! Every block is conjugate given the committed history:
//! - rates: `Gamma(shape + N, rate + E)` for N events over exposure E
//! - test accuracy: `Beta(alpha + agreeing, beta + disagreeing)`
//! - importation: `Dirichlet(alpha + admissions per grade)`
//!
//! Acquisition is `background + transmission * colonized co-residents`.
//! Before drawing, each acquisition is attributed to one of the two terms
//! in proportion to their contribution at the time it happened.

use ht_common::{Colonization, Error, FacilityId, PatientId, Result, StateSpace, UnitId};
use ht_config::{BetaParams, DirichletParams, GammaParams, Priors, RunSettings};
use ht_math::{beta_mode, dirichlet_log_pdf, gamma_log_pdf, gamma_mode, log_beta_pdf};

use super::{Model, Neighborhood, Parameters};
use crate::event::{EventType, TestKind};
use crate::history::{HistoryGraph, LinkId, Scope};
use crate::random::RandomSource;
use crate::state::{Counts, Owner, PatientState, State};

/// A Gamma-distributed rate with its sufficient statistics.
#[derive(Debug, Clone)]
struct GammaRate {
    name: &'static str,
    prior: GammaParams,
    value: f64,
    events: f64,
    exposure: f64,
}

impl GammaRate {
    fn new(name: &'static str, prior: GammaParams) -> Self {
        GammaRate {
            name,
            value: prior.start(),
            prior,
            events: 0.0,
            exposure: 0.0,
        }
    }

    fn reset(&mut self) {
        self.events = 0.0;
        self.exposure = 0.0;
    }

    fn redraw(&mut self, rng: &mut dyn RandomSource, maximize: bool) -> Result<()> {
        if self.prior.fixed {
            return Ok(());
        }
        let shape = self.prior.shape + self.events;
        let rate = self.prior.rate + self.exposure;
        let value = if maximize {
            gamma_mode(shape, rate)
        } else {
            rng.gamma(shape, rate)
        };
        if !(value >= 0.0 && value.is_finite()) {
            return Err(Error::NumericalInstability(format!(
                "{} posterior Gamma({}, {}) gave {}",
                self.name, shape, rate, value
            )));
        }
        self.value = value;
        Ok(())
    }

    fn log_value(&self) -> f64 {
        self.value.ln()
    }

    /// Prior log-density at the current value; fixed rates contribute nothing.
    fn log_prior(&self) -> f64 {
        if self.prior.fixed {
            0.0
        } else {
            gamma_log_pdf(self.value, self.prior.shape, self.prior.rate)
        }
    }
}

/// A Beta-distributed probability.
#[derive(Debug, Clone)]
struct BetaProb {
    name: &'static str,
    prior: BetaParams,
    value: f64,
}

impl BetaProb {
    fn new(name: &'static str, prior: BetaParams) -> Self {
        BetaProb {
            name,
            value: prior.start(),
            prior,
        }
    }

    fn redraw(
        &mut self,
        agree: f64,
        disagree: f64,
        rng: &mut dyn RandomSource,
        maximize: bool,
    ) -> Result<()> {
        if self.prior.fixed {
            return Ok(());
        }
        let a = self.prior.alpha + agree;
        let b = self.prior.beta + disagree;
        let value = if maximize { beta_mode(a, b) } else { rng.beta(a, b) };
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::NumericalInstability(format!(
                "{} posterior Beta({}, {}) gave {}",
                self.name, a, b, value
            )));
        }
        self.value = value;
        Ok(())
    }

    fn log_prior(&self) -> f64 {
        if self.prior.fixed {
            0.0
        } else {
            log_beta_pdf(self.value, self.prior.alpha, self.prior.beta)
        }
    }
}

fn unit_counts(graph: &HistoryGraph, link: LinkId) -> Option<Counts> {
    graph.state(link, Scope::Unit).and_then(State::counts)
}

/// Unit occupancy just before `link`'s event.
fn unit_counts_before(graph: &HistoryGraph, link: LinkId) -> Option<Counts> {
    graph.state_before(link, Scope::Unit).and_then(State::counts)
}

fn gap_width(graph: &HistoryGraph, from: LinkId, to: LinkId) -> f64 {
    (graph.event(to).time - graph.event(from).time).max(0.0)
}

/// Admission grade probabilities.
#[derive(Debug, Clone)]
pub struct Importation {
    space: StateSpace,
    prior: DirichletParams,
    probs: Vec<f64>,
    counts: Vec<f64>,
}

impl Importation {
    fn new(space: StateSpace, mut prior: DirichletParams) -> Self {
        let n = space.size();
        prior.alpha.resize(n, 1.0);
        let mut probs = prior.start();
        probs.resize(n, 0.0);
        Importation {
            space,
            prior,
            probs,
            counts: vec![0.0; n],
        }
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probs
    }

    fn grade_index(&self, graph: &HistoryGraph, link: LinkId) -> Option<usize> {
        let e = graph.event(link);
        e.patient?;
        let grade = e.kind.admission_grade()?;
        self.space.index(grade)
    }
}

impl Parameters for Importation {
    fn init_counts(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0.0);
    }

    fn count(&mut self, graph: &HistoryGraph, link: LinkId) {
        if let Some(i) = self.grade_index(graph, link) {
            self.counts[i] += 1.0;
        }
    }

    fn count_gap(&mut self, _: &HistoryGraph, _: LinkId, _: LinkId) {}

    fn update(&mut self, rng: &mut dyn RandomSource, maximize: bool) -> Result<()> {
        if self.prior.fixed {
            return Ok(());
        }
        let alpha: Vec<f64> = self
            .prior
            .alpha
            .iter()
            .zip(&self.counts)
            .map(|(a, c)| a + c)
            .collect();
        let total: f64 = alpha.iter().sum();
        let k = alpha.len() as f64;
        let probs = if !maximize {
            rng.dirichlet(&alpha)
        } else if alpha.iter().all(|a| *a > 1.0) {
            alpha.iter().map(|a| (a - 1.0) / (total - k)).collect()
        } else {
            alpha.iter().map(|a| a / total).collect()
        };
        if probs.iter().any(|p| !p.is_finite()) {
            return Err(Error::NumericalInstability(format!(
                "importation posterior Dirichlet({:?}) gave {:?}",
                alpha, probs
            )));
        }
        self.probs = probs;
        Ok(())
    }

    fn log_prob(&self, graph: &HistoryGraph, link: LinkId) -> f64 {
        match self.grade_index(graph, link) {
            Some(i) => self.probs[i].ln(),
            None => 0.0,
        }
    }

    fn log_prob_gap(&self, _: &HistoryGraph, _: LinkId, _: LinkId) -> f64 {
        0.0
    }

    fn log_prior(&self) -> f64 {
        if self.prior.fixed {
            0.0
        } else {
            dirichlet_log_pdf(&self.probs, &self.prior.alpha)
        }
    }

    fn header(&self) -> Vec<String> {
        self.space
            .states()
            .iter()
            .map(|s| format!("imp.{}", s))
            .collect()
    }

    fn values(&self) -> Vec<f64> {
        self.probs.clone()
    }
}

/// `background + transmission * colonized` per susceptible patient.
#[derive(Debug, Clone)]
pub struct Acquisition {
    background: GammaRate,
    transmission: GammaRate,
    /// Colonized co-residents at each counted acquisition.
    pressure: Vec<f64>,
}

impl Acquisition {
    fn new(background: GammaParams, transmission: GammaParams) -> Self {
        Acquisition {
            background: GammaRate::new("acquisition.background", background),
            transmission: GammaRate::new("acquisition.transmission", transmission),
            pressure: Vec::new(),
        }
    }

    pub fn rate(&self, colonized: f64) -> f64 {
        self.background.value + self.transmission.value * colonized
    }
}

impl Parameters for Acquisition {
    fn init_counts(&mut self) {
        self.background.reset();
        self.transmission.reset();
        self.pressure.clear();
    }

    fn count(&mut self, graph: &HistoryGraph, link: LinkId) {
        if graph.event(link).kind != EventType::Acquisition {
            return;
        }
        let colonized = unit_counts_before(graph, link)
            .map(|c| c.colonized.max(0) as f64)
            .unwrap_or(0.0);
        self.pressure.push(colonized);
    }

    fn count_gap(&mut self, graph: &HistoryGraph, from: LinkId, to: LinkId) {
        let Some(c) = unit_counts(graph, from) else {
            return;
        };
        let dt = gap_width(graph, from, to);
        let susceptible = c.uncolonized.max(0) as f64;
        self.background.exposure += susceptible * dt;
        self.transmission.exposure += susceptible * c.colonized.max(0) as f64 * dt;
    }

    fn update(&mut self, rng: &mut dyn RandomSource, maximize: bool) -> Result<()> {
        for colonized in &self.pressure {
            let b = self.background.value;
            let total = self.rate(*colonized);
            let p = if total > 0.0 { b / total } else { 1.0 };
            if maximize {
                self.background.events += p;
                self.transmission.events += 1.0 - p;
            } else if rng.bernoulli(p) {
                self.background.events += 1.0;
            } else {
                self.transmission.events += 1.0;
            }
        }
        self.background.redraw(rng, maximize)?;
        self.transmission.redraw(rng, maximize)
    }

    fn log_prob(&self, graph: &HistoryGraph, link: LinkId) -> f64 {
        if graph.event(link).kind != EventType::Acquisition {
            return 0.0;
        }
        let colonized = unit_counts_before(graph, link)
            .map(|c| c.colonized.max(0) as f64)
            .unwrap_or(0.0);
        self.rate(colonized).ln()
    }

    fn log_prob_gap(&self, graph: &HistoryGraph, from: LinkId, to: LinkId) -> f64 {
        let Some(c) = unit_counts(graph, from) else {
            return 0.0;
        };
        let susceptible = c.uncolonized.max(0) as f64;
        -susceptible * self.rate(c.colonized.max(0) as f64) * gap_width(graph, from, to)
    }

    fn log_prior(&self) -> f64 {
        self.background.log_prior() + self.transmission.log_prior()
    }

    fn header(&self) -> Vec<String> {
        vec!["acq.background".to_string(), "acq.transmission".to_string()]
    }

    fn values(&self) -> Vec<f64> {
        vec![self.background.value, self.transmission.value]
    }
}

/// A constant per-patient rate out of one class.
#[derive(Debug, Clone)]
pub struct ShiftRate {
    rate: GammaRate,
    kind: EventType,
    class: Colonization,
    column: &'static str,
}

impl ShiftRate {
    fn progression(prior: GammaParams) -> Self {
        ShiftRate {
            rate: GammaRate::new("progression", prior),
            kind: EventType::Progression,
            class: Colonization::Latent,
            column: "prog.rate",
        }
    }

    fn clearance(prior: GammaParams) -> Self {
        ShiftRate {
            rate: GammaRate::new("clearance", prior),
            kind: EventType::Clearance,
            class: Colonization::Colonized,
            column: "clear.rate",
        }
    }

    pub fn value(&self) -> f64 {
        self.rate.value
    }
}

impl Parameters for ShiftRate {
    fn init_counts(&mut self) {
        self.rate.reset();
    }

    fn count(&mut self, graph: &HistoryGraph, link: LinkId) {
        if graph.event(link).kind == self.kind {
            self.rate.events += 1.0;
        }
    }

    fn count_gap(&mut self, graph: &HistoryGraph, from: LinkId, to: LinkId) {
        if let Some(c) = unit_counts(graph, from) {
            self.rate.exposure += c.of(self.class).max(0) as f64 * gap_width(graph, from, to);
        }
    }

    fn update(&mut self, rng: &mut dyn RandomSource, maximize: bool) -> Result<()> {
        self.rate.redraw(rng, maximize)
    }

    fn log_prob(&self, graph: &HistoryGraph, link: LinkId) -> f64 {
        if graph.event(link).kind == self.kind {
            self.rate.log_value()
        } else {
            0.0
        }
    }

    fn log_prob_gap(&self, graph: &HistoryGraph, from: LinkId, to: LinkId) -> f64 {
        match unit_counts(graph, from) {
            Some(c) => -(c.of(self.class).max(0) as f64) * self.rate.value * gap_width(graph, from, to),
            None => 0.0,
        }
    }

    fn log_prior(&self) -> f64 {
        self.rate.log_prior()
    }

    fn header(&self) -> Vec<String> {
        vec![self.column.to_string()]
    }

    fn values(&self) -> Vec<f64> {
        vec![self.rate.value]
    }
}

/// Sensitivity and specificity of one test kind. Latent patients test
/// like uncolonized ones.
#[derive(Debug, Clone)]
pub struct TestAccuracy {
    kind: TestKind,
    sensitivity: BetaProb,
    specificity: BetaProb,
    true_pos: f64,
    false_neg: f64,
    true_neg: f64,
    false_pos: f64,
}

impl TestAccuracy {
    fn new(kind: TestKind, priors: &ht_config::TestPriors) -> Self {
        let (sens, spec) = match kind {
            TestKind::Surveillance => ("surveillance.sensitivity", "surveillance.specificity"),
            TestKind::Clinical => ("clinical.sensitivity", "clinical.specificity"),
        };
        TestAccuracy {
            kind,
            sensitivity: BetaProb::new(sens, priors.sensitivity.clone()),
            specificity: BetaProb::new(spec, priors.specificity.clone()),
            true_pos: 0.0,
            false_neg: 0.0,
            true_neg: 0.0,
            false_pos: 0.0,
        }
    }

    /// P(result | status).
    pub fn likelihood(&self, positive: bool, status: Colonization) -> f64 {
        let colonized = status == Colonization::Colonized;
        match (colonized, positive) {
            (true, true) => self.sensitivity.value,
            (true, false) => 1.0 - self.sensitivity.value,
            (false, true) => 1.0 - self.specificity.value,
            (false, false) => self.specificity.value,
        }
    }

    fn observation(&self, graph: &HistoryGraph, link: LinkId) -> Option<(bool, Colonization)> {
        let (kind, positive) = graph.event(link).kind.test()?;
        if kind != self.kind {
            return None;
        }
        let status = graph.link(link).patient_state()?.status;
        Some((positive, status))
    }
}

impl Parameters for TestAccuracy {
    fn init_counts(&mut self) {
        self.true_pos = 0.0;
        self.false_neg = 0.0;
        self.true_neg = 0.0;
        self.false_pos = 0.0;
    }

    fn count(&mut self, graph: &HistoryGraph, link: LinkId) {
        let Some((positive, status)) = self.observation(graph, link) else {
            return;
        };
        let slot = match (status == Colonization::Colonized, positive) {
            (true, true) => &mut self.true_pos,
            (true, false) => &mut self.false_neg,
            (false, false) => &mut self.true_neg,
            (false, true) => &mut self.false_pos,
        };
        *slot += 1.0;
    }

    fn count_gap(&mut self, _: &HistoryGraph, _: LinkId, _: LinkId) {}

    fn update(&mut self, rng: &mut dyn RandomSource, maximize: bool) -> Result<()> {
        self.sensitivity
            .redraw(self.true_pos, self.false_neg, rng, maximize)?;
        self.specificity
            .redraw(self.true_neg, self.false_pos, rng, maximize)
    }

    fn log_prob(&self, graph: &HistoryGraph, link: LinkId) -> f64 {
        match self.observation(graph, link) {
            Some((positive, status)) => self.likelihood(positive, status).ln(),
            None => 0.0,
        }
    }

    fn log_prob_gap(&self, _: &HistoryGraph, _: LinkId, _: LinkId) -> f64 {
        0.0
    }

    fn log_prior(&self) -> f64 {
        self.sensitivity.log_prior() + self.specificity.log_prior()
    }

    fn header(&self) -> Vec<String> {
        let prefix = match self.kind {
            TestKind::Surveillance => "surv",
            TestKind::Clinical => "clin",
        };
        vec![format!("{}.sens", prefix), format!("{}.spec", prefix)]
    }

    fn values(&self) -> Vec<f64> {
        vec![self.sensitivity.value, self.specificity.value]
    }
}

#[derive(Debug, Clone)]
pub struct BasicModel {
    space: StateSpace,
    cheating: bool,
    /// Units keep explicit patient sets instead of class counts.
    patient_sets: bool,
    importation: Importation,
    acquisition: Acquisition,
    progression: Option<ShiftRate>,
    clearance: ShiftRate,
    surveillance: TestAccuracy,
    clinical: TestAccuracy,
}

impl BasicModel {
    /// Model with the built-in priors for `space`, starting at prior means.
    pub fn with_defaults(space: StateSpace) -> Self {
        Self::assemble(&Priors::default_for(space), space)
    }

    /// Model from validated configuration.
    pub fn from_priors(priors: &Priors, settings: &RunSettings) -> Result<Self> {
        ht_config::validate_priors(priors, settings)?;
        Ok(Self::assemble(priors, settings.state_space).with_cheating(settings.cheat))
    }

    fn assemble(priors: &Priors, space: StateSpace) -> Self {
        let progression = match space {
            StateSpace::TwoState => None,
            StateSpace::ThreeState => Some(ShiftRate::progression(
                priors
                    .progression
                    .clone()
                    .unwrap_or_else(|| GammaParams::new(1.0, 10.0)),
            )),
        };
        BasicModel {
            space,
            cheating: false,
            patient_sets: false,
            importation: Importation::new(space, priors.importation.clone()),
            acquisition: Acquisition::new(
                priors.acquisition.background.clone(),
                priors.acquisition.transmission.clone(),
            ),
            progression,
            clearance: ShiftRate::clearance(priors.clearance.clone()),
            surveillance: TestAccuracy::new(TestKind::Surveillance, &priors.surveillance_test),
            clinical: TestAccuracy::new(TestKind::Clinical, &priors.clinical_test),
        }
    }

    pub fn with_cheating(mut self, cheating: bool) -> Self {
        self.cheating = cheating;
        self
    }

    /// Track each unit's occupants by patient id.
    pub fn with_patient_sets(mut self, sets: bool) -> Self {
        self.patient_sets = sets;
        self
    }

    pub fn with_acquisition(mut self, background: f64, transmission: f64) -> Self {
        self.acquisition.background.value = background;
        self.acquisition.transmission.value = transmission;
        self
    }

    /// Ignored by two-state models.
    pub fn with_progression(mut self, rate: f64) -> Self {
        if let Some(p) = &mut self.progression {
            p.rate.value = rate;
        }
        self
    }

    pub fn with_clearance(mut self, rate: f64) -> Self {
        self.clearance.rate.value = rate;
        self
    }

    /// Admission grade probabilities in state-space order.
    pub fn with_importation(mut self, probs: Vec<f64>) -> Self {
        if probs.len() == self.space.size() {
            self.importation.probs = probs;
        }
        self
    }

    pub fn with_test(mut self, kind: TestKind, sensitivity: f64, specificity: f64) -> Self {
        let test = match kind {
            TestKind::Surveillance => &mut self.surveillance,
            TestKind::Clinical => &mut self.clinical,
        };
        test.sensitivity.value = sensitivity;
        test.specificity.value = specificity;
        self
    }

    /// Pin every parameter at its current value.
    pub fn frozen(mut self) -> Self {
        self.importation.prior.fixed = true;
        self.acquisition.background.prior.fixed = true;
        self.acquisition.transmission.prior.fixed = true;
        if let Some(p) = &mut self.progression {
            p.rate.prior.fixed = true;
        }
        self.clearance.rate.prior.fixed = true;
        for test in [&mut self.surveillance, &mut self.clinical] {
            test.sensitivity.prior.fixed = true;
            test.specificity.prior.fixed = true;
        }
        self
    }

    pub fn acquisition(&self) -> &Acquisition {
        &self.acquisition
    }

    pub fn clearance(&self) -> &ShiftRate {
        &self.clearance
    }

    pub fn importation(&self) -> &Importation {
        &self.importation
    }
}

impl Model for BasicModel {
    fn state_space(&self) -> StateSpace {
        self.space
    }

    fn make_system_state(&self) -> Option<State> {
        None
    }

    fn make_facility_state(&self, facility: FacilityId) -> Option<State> {
        Some(State::counts_for(Owner::Facility(facility), self.space))
    }

    fn make_unit_state(&self, unit: UnitId) -> Option<State> {
        if self.patient_sets {
            Some(State::sets_for(Owner::Unit(unit), self.space))
        } else {
            Some(State::counts_for(Owner::Unit(unit), self.space))
        }
    }

    fn make_patient_state(&self, patient: PatientId) -> Option<State> {
        Some(State::Patient(PatientState::new(patient, self.space, true)))
    }

    fn need_event_type(&self, kind: EventType) -> bool {
        match kind {
            k if k.is_observed() || k.is_marker() => true,
            EventType::Progression => self.cheating && self.space == StateSpace::ThreeState,
            k => self.cheating && k.is_inferred(),
        }
    }

    fn is_cheating(&self) -> bool {
        self.cheating
    }

    fn log_acquisition_rate(&self, _: f64, _: &PatientState, nb: &Neighborhood) -> f64 {
        self.acquisition.rate(nb.colonized()).ln()
    }

    fn log_progression_rate(&self, _: f64, _: &PatientState, _: &Neighborhood) -> f64 {
        match &self.progression {
            Some(p) => p.rate.log_value(),
            None => f64::NEG_INFINITY,
        }
    }

    fn log_clearance_rate(&self, _: f64, _: &PatientState, _: &Neighborhood) -> f64 {
        self.clearance.rate.log_value()
    }

    fn admission_distribution(&self, _: &PatientState) -> Vec<f64> {
        self.importation.probs.clone()
    }

    fn test_likelihood(&self, kind: TestKind, positive: bool, status: Colonization) -> f64 {
        match kind {
            TestKind::Surveillance => self.surveillance.likelihood(positive, status),
            TestKind::Clinical => self.clinical.likelihood(positive, status),
        }
    }

    fn parameters(&self) -> Vec<&dyn Parameters> {
        let mut blocks: Vec<&dyn Parameters> = vec![&self.importation, &self.acquisition];
        if let Some(p) = &self.progression {
            blocks.push(p);
        }
        blocks.push(&self.clearance);
        blocks.push(&self.surveillance);
        blocks.push(&self.clinical);
        blocks
    }

    fn parameters_mut(&mut self) -> Vec<&mut dyn Parameters> {
        let mut blocks: Vec<&mut dyn Parameters> =
            vec![&mut self.importation, &mut self.acquisition];
        if let Some(p) = &mut self.progression {
            blocks.push(p);
        }
        blocks.push(&mut self.clearance);
        blocks.push(&mut self.surveillance);
        blocks.push(&mut self.clinical);
        blocks
    }
}
