//! Interactive timing session: the state a residual viewer drives.

use crate::fitter::{FitSettings, FitSummary, WlsFitter};
use crate::model::TimingModel;
use crate::params::ParamId;
use crate::residuals::Residuals;
use crate::toas::{Toas, GROUP_GAP_DAYS};
use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Outcome of [`Pulsar::toggle_jump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JumpToggle {
    Added(ParamId),
    Removed(ParamId),
}

/// Snapshot of everything a fit, a deletion, or a revert can change.
#[derive(Debug, Clone)]
struct SessionState {
    prefit_model: TimingModel,
    postfit_model: Option<TimingModel>,
    all_toas: Toas,
    prefit_resids: Residuals,
    postfit_resids: Option<Residuals>,
    fit_summary: Option<FitSummary>,
    selected: Vec<bool>,
    /// Stable indices of deleted TOAs, in deletion order.
    deleted: Vec<usize>,
    /// Full TOA table saved while some TOAs are stashed out of view.
    stashed: Option<Toas>,
}

/// A pulsar under interactive analysis.
///
/// Keeps the pre-fit model fixed while fits produce post-fit models. Each
/// re-fit pushes the state it replaces onto a revert stack; `reset` returns to
/// the state captured at construction.
#[derive(Debug, Clone)]
pub struct Pulsar {
    name: String,
    state: SessionState,
    base: SessionState,
    history: Vec<SessionState>,
    pub fit_settings: FitSettings,
}

impl Pulsar {
    pub fn new(mut model: TimingModel, toas: Toas) -> Result<Self> {
        model
            .setup()
            .with_context(|| format!("Failed to set up timing model {}.", model.name))?;
        let prefit_resids = Residuals::compute(&model, &toas, true)
            .context("Failed to compute pre-fit residuals.")?;
        let state = SessionState {
            selected: vec![false; toas.len()],
            prefit_model: model,
            postfit_model: None,
            all_toas: toas,
            prefit_resids,
            postfit_resids: None,
            fit_summary: None,
            deleted: Vec::new(),
            stashed: None,
        };
        Ok(Self {
            name: state.prefit_model.name.clone(),
            base: state.clone(),
            history: vec![state.clone()],
            state,
            fit_settings: FitSettings::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn all_toas(&self) -> &Toas {
        &self.state.all_toas
    }

    pub fn fitted(&self) -> bool {
        self.state.postfit_model.is_some()
    }

    pub fn prefit_model(&self) -> &TimingModel {
        &self.state.prefit_model
    }

    pub fn postfit_model(&self) -> Option<&TimingModel> {
        self.state.postfit_model.as_ref()
    }

    pub fn prefit_resids(&self) -> &Residuals {
        &self.state.prefit_resids
    }

    pub fn postfit_resids(&self) -> Option<&Residuals> {
        self.state.postfit_resids.as_ref()
    }

    pub fn fit_summary(&self) -> Option<&FitSummary> {
        self.state.fit_summary.as_ref()
    }

    pub fn selected(&self) -> &[bool] {
        &self.state.selected
    }

    pub fn deleted(&self) -> &[usize] {
        &self.state.deleted
    }

    pub fn is_stashed(&self) -> bool {
        self.state.stashed.is_some()
    }

    /// Per TOA: whether any jump of the pre-fit model covers it.
    pub fn jumped(&self) -> Vec<bool> {
        self.state.prefit_model.jumps.jumped(&self.state.all_toas)
    }

    /// The model a fit would start from: post-fit when fitted, otherwise pre-fit.
    pub fn current_model(&self) -> &TimingModel {
        self.state
            .postfit_model
            .as_ref()
            .unwrap_or(&self.state.prefit_model)
    }

    pub fn select(&mut self, mask: &[bool]) -> Result<()> {
        self.check_mask(mask)?;
        self.state.selected = mask.to_vec();
        Ok(())
    }

    /// Clears the selection. Deleted TOAs stay deleted.
    pub fn unselect(&mut self) {
        self.state.selected = vec![false; self.state.all_toas.len()];
    }

    fn check_mask(&self, mask: &[bool]) -> Result<()> {
        if mask.len() != self.state.all_toas.len() {
            bail!(
                "TOA mask has {} entries, expected {}.",
                mask.len(),
                self.state.all_toas.len()
            );
        }
        Ok(())
    }

    fn any_jumped(&self, mask: &[bool]) -> bool {
        self.jumped().iter().zip(mask).any(|(&jumped, &hit)| jumped && hit)
    }

    /// Removes the TOAs where `mask` is true and recomputes residuals.
    pub fn delete_toas(&mut self, mask: &[bool]) -> Result<()> {
        self.check_mask(mask)?;
        if mask.iter().all(|&delete| delete) {
            bail!("Cannot delete every TOA.");
        }
        if self.any_jumped(mask) {
            bail!("Cannot delete jumped TOAs. Delete interfering jumps before deleting TOAs.");
        }
        let keep: Vec<bool> = mask.iter().map(|&delete| !delete).collect();
        let removed = self
            .state
            .all_toas
            .iter()
            .zip(mask)
            .filter(|(_, delete)| **delete)
            .map(|(toa, _)| toa.index);
        self.state.deleted.extend(removed);

        self.state.all_toas = self.state.all_toas.select(&keep)?;
        self.state.selected = self
            .state
            .selected
            .iter()
            .zip(&keep)
            .filter(|(_, kept)| **kept)
            .map(|(selected, _)| *selected)
            .collect();
        self.update_resids()
    }

    /// Temporarily removes the TOAs where `mask` is true. The full table comes
    /// back with [`Pulsar::unstash_toas`].
    pub fn stash_toas(&mut self, mask: &[bool]) -> Result<()> {
        self.check_mask(mask)?;
        if self.is_stashed() {
            bail!("TOAs are already stashed. Unstash them first.");
        }
        if mask.iter().all(|&stash| stash) {
            bail!("Cannot stash every TOA.");
        }
        if self.any_jumped(mask) {
            bail!("Cannot stash jumped TOAs. Delete interfering jumps before stashing TOAs.");
        }
        let keep: Vec<bool> = mask.iter().map(|&stash| !stash).collect();
        let visible = self.state.all_toas.select(&keep)?;
        let full = std::mem::replace(&mut self.state.all_toas, visible);
        self.state.stashed = Some(full);
        info!("{}: stashed {} TOAs", self.name, mask.iter().filter(|&&s| s).count());
        self.unselect();
        self.update_resids()
    }

    /// Brings back stashed TOAs, minus any deleted since. Once fitted, pulse
    /// numbers in use are reassigned from the post-fit model.
    pub fn unstash_toas(&mut self) -> Result<()> {
        let Some(full) = self.state.stashed.take() else {
            bail!("No TOAs are stashed.");
        };
        let keep: Vec<bool> = full
            .iter()
            .map(|toa| !self.state.deleted.contains(&toa.index))
            .collect();
        let mut toas = full.select(&keep)?;
        if let Some(model) = &self.state.postfit_model {
            if toas.has_pulse_numbers() {
                toas.compute_pulse_numbers(model)
                    .context("Failed to assign pulse numbers from the post-fit model.")?;
            }
        }
        self.state.all_toas = toas;
        self.unselect();
        self.update_resids()
    }

    /// Adds `wraps` whole turns to the TOAs where `mask` is true. The first
    /// wrap switches the session to pulse-number tracking, numbering every TOA
    /// from the pre-fit model.
    pub fn add_phase_wrap(&mut self, mask: &[bool], wraps: i64) -> Result<()> {
        self.check_mask(mask)?;
        let state = &mut self.state;
        if !state.all_toas.has_pulse_numbers() {
            state
                .all_toas
                .compute_pulse_numbers(&state.prefit_model)
                .context("Failed to assign pulse numbers from the pre-fit model.")?;
        }
        state.all_toas.add_delta_pulse_numbers(mask, wraps)?;
        self.update_resids()
    }

    /// Wraps every TOA later than the latest selected one. Returns false, doing
    /// nothing, when no TOA is selected.
    pub fn wrap_later_than_selection(&mut self, wraps: i64) -> Result<bool> {
        let mjds = self.state.all_toas.mjds_f64();
        let latest = mjds
            .iter()
            .zip(&self.state.selected)
            .filter(|&(_, &selected)| selected)
            .map(|(&mjd, _)| mjd)
            .reduce(f64::max);
        let Some(latest) = latest else {
            return Ok(false);
        };
        let later: Vec<bool> = mjds.iter().map(|&mjd| mjd > latest).collect();
        self.add_phase_wrap(&later, wraps)?;
        Ok(true)
    }

    fn for_each_model(&mut self, mut apply: impl FnMut(&mut TimingModel)) {
        apply(&mut self.state.prefit_model);
        if let Some(model) = &mut self.state.postfit_model {
            apply(model);
        }
    }

    /// Adds a jump to the pre-fit model and mirrors it into the post-fit model.
    fn add_jump(&mut self, indices: BTreeSet<usize>) -> ParamId {
        let id = self.state.prefit_model.jumps.add(indices);
        if let ParamId::Jump(number) = id {
            if let Some(jump) = self.state.prefit_model.jumps.get(number).cloned() {
                self.for_each_model(|model| model.jumps.insert(jump.clone()));
            }
        }
        id
    }

    /// Jumps the TOAs where `mask` is true, or removes the jump covering
    /// exactly those TOAs. Clears the selection.
    pub fn toggle_jump(&mut self, mask: &[bool]) -> Result<JumpToggle> {
        self.check_mask(mask)?;
        let indices: BTreeSet<usize> = self
            .state
            .all_toas
            .iter()
            .zip(mask)
            .filter(|&(_, &hit)| hit)
            .map(|(toa, _)| toa.index)
            .collect();
        if indices.is_empty() {
            bail!("No TOAs selected to jump.");
        }
        let toggle = match self.state.prefit_model.jumps.find_exact(&indices) {
            Some(number) => {
                self.for_each_model(|model| {
                    model.jumps.remove(number);
                });
                JumpToggle::Removed(ParamId::Jump(number))
            }
            None => {
                JumpToggle::Added(self.add_jump(indices.clone()))
            }
        };
        info!("{}: {:?} over {} TOAs", self.name, toggle, indices.len());
        self.unselect();
        self.update_resids()?;
        Ok(toggle)
    }

    /// Jumps every observing session that holds neither a selected nor an
    /// already jumped TOA. Returns the new jumps.
    pub fn jump_other_groups(&mut self) -> Result<Vec<ParamId>> {
        let groups = self.state.all_toas.groups(GROUP_GAP_DAYS);
        let jumped = self.jumped();
        let mut members: Vec<BTreeSet<usize>> = Vec::new();
        let mut blocked: BTreeSet<usize> = BTreeSet::new();
        for (((toa, &group), &selected), &is_jumped) in self
            .state
            .all_toas
            .iter()
            .zip(&groups)
            .zip(&self.state.selected)
            .zip(&jumped)
        {
            if members.len() <= group {
                members.resize_with(group + 1, BTreeSet::new);
            }
            members[group].insert(toa.index);
            if selected || is_jumped {
                blocked.insert(group);
            }
        }

        let mut added = Vec::new();
        for (group, indices) in members.into_iter().enumerate() {
            if blocked.contains(&group) || indices.is_empty() {
                continue;
            }
            added.push(self.add_jump(indices));
        }
        info!("{}: jumped {} TOA groups", self.name, added.len());
        self.update_resids()?;
        Ok(added)
    }

    /// Refuses a fit in which every TOA being fit is jumped.
    fn check_jumps_leave_reference(&self, fitted: &[bool]) -> Result<()> {
        if !self.current_model().has_jumps() {
            return Ok(());
        }
        let jumped = self.current_model().jumps.jumped(&self.state.all_toas);
        let any_selected = fitted.iter().any(|&s| s);
        let all_jumped = jumped
            .iter()
            .zip(fitted)
            .filter(|&(_, &selected)| selected || !any_selected)
            .all(|(&jumped, _)| jumped);
        if all_jumped {
            bail!(
                "TOAs being fit must not all be jumped. \
                 Remove or uncheck at least one jump in the selected TOAs before fitting."
            );
        }
        Ok(())
    }

    fn update_resids(&mut self) -> Result<()> {
        let state = &mut self.state;
        state.prefit_resids = Residuals::compute(&state.prefit_model, &state.all_toas, true)
            .context("Failed to compute pre-fit residuals.")?;
        if let Some(model) = &state.postfit_model {
            state.postfit_resids = Some(
                Residuals::compute(model, &state.all_toas, true)
                    .context("Failed to compute post-fit residuals.")?,
            );
        }
        Ok(())
    }

    /// Freezes or frees a parameter in the pre-fit model and, once fitted, the post-fit model.
    pub fn set_frozen(&mut self, param: ParamId, frozen: bool) -> Result<()> {
        self.state.prefit_model.set_frozen(param, frozen)?;
        if let Some(model) = &mut self.state.postfit_model {
            model.set_frozen(param, frozen)?;
        }
        Ok(())
    }

    /// Fits the selected TOAs, or all of them when none are selected. Residuals
    /// of the resulting model are evaluated over every TOA.
    pub fn fit(&mut self, selected: &[bool]) -> Result<&FitSummary> {
        self.check_mask(selected)?;
        self.check_jumps_leave_reference(selected)?;
        let toas = if selected.iter().any(|&s| s) {
            self.state.all_toas.select(selected)?
        } else {
            self.state.all_toas.clone()
        };

        let mut model = self.current_model().clone();
        let summary = WlsFitter::new(self.fit_settings).fit(&mut model, &toas)?;
        let postfit_resids = Residuals::compute(&model, &self.state.all_toas, true)
            .context("Failed to compute post-fit residuals.")?;
        info!(
            "{}: fitted {} TOAs, reduced chi2 {:.4}",
            self.name,
            toas.len(),
            summary.reduced_chi2
        );

        if self.fitted() {
            self.history.push(self.state.clone());
        }
        let state = &mut self.state;
        state.selected = selected.to_vec();
        state.postfit_model = Some(model);
        state.postfit_resids = Some(postfit_resids);
        Ok(&*state.fit_summary.insert(summary))
    }

    /// Restores the state from before the last fit. Returns false when there is
    /// nothing to revert.
    pub fn revert(&mut self) -> bool {
        if !self.fitted() {
            warn!("No model to revert to");
            return false;
        }
        match self.history.pop() {
            Some(previous) => {
                self.state = previous;
                if self.history.is_empty() {
                    self.history.push(self.base.clone());
                }
                true
            }
            None => {
                warn!("No model to revert to");
                false
            }
        }
    }

    /// Discards every fit, deletion and selection.
    pub fn reset(&mut self) {
        self.state = self.base.clone();
        self.history = vec![self.base.clone()];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::precision::Dd;
    use crate::time::Mjd;

    fn truth() -> TimingModel {
        let config = ModelConfig::new("J1234+5678")
            .with_spin_term(0, "50.0", true)
            .with_spin_term(1, "-2e-15", false)
            .with_pepoch("56000")
            .with_tzrmjd("56000");
        let mut model = TimingModel::from_config(&config).unwrap();
        model.setup().unwrap();
        model
    }

    fn pulse_toas(model: &TimingModel, n: usize) -> Toas {
        let rough: Vec<Mjd> = (0..n)
            .map(|i| Mjd::tdb(Dd::from_f64(55950.0 + 3.7 * i as f64)))
            .collect();
        let rough = Toas::from_times(&rough, 2.0);
        let phase = model.phase(&rough).unwrap();
        let freq = model.spin_frequency(&rough).unwrap();
        let times: Vec<Mjd> = rough
            .iter()
            .zip(phase.iter().zip(&freq))
            .map(|(toa, (&p, &f))| toa.tdb.add_seconds(-(p - p.round()) / f))
            .collect();
        Toas::from_times(&times, 2.0)
    }

    /// A session whose pre-fit F0 is off by `offset` Hz.
    fn session(offset: f64) -> Pulsar {
        let truth = truth();
        let toas = pulse_toas(&truth, 30);
        let mut model = truth.clone();
        model
            .set_param_value(ParamId::F(0), Dd::from_f64(50.0 + offset))
            .unwrap();
        Pulsar::new(model, toas).unwrap()
    }

    fn f0_error(model: &TimingModel) -> f64 {
        (model.param_value(ParamId::F(0)).unwrap() - Dd::from_f64(50.0)).to_f64()
    }

    #[test]
    fn new_session_has_prefit_residuals_only() {
        let psr = session(1e-9);
        assert_eq!(psr.name(), "J1234+5678");
        assert!(!psr.fitted());
        assert!(psr.postfit_resids().is_none());
        assert_eq!(psr.prefit_resids().len(), 30);
        assert!(psr.prefit_resids().chi2() > 1.0);
        assert_eq!(psr.selected(), vec![false; 30].as_slice());
    }

    #[test]
    fn new_session_reports_setup_failure() {
        let config = ModelConfig::new("broken").with_spin_term(1, "0", false);
        let model = TimingModel::from_config(&config).unwrap();
        let err = Pulsar::new(model, pulse_toas(&truth(), 3)).unwrap_err();
        assert!(format!("{err:#}").contains("missing parameter F0"));
    }

    #[test]
    fn fit_keeps_prefit_model_and_fixes_postfit() {
        let mut psr = session(1e-9);
        let none = vec![false; 30];
        let summary = psr.fit(&none).unwrap().clone();
        assert!(psr.fitted());
        assert_eq!(summary.dof, 28);
        assert!(f0_error(psr.postfit_model().unwrap()).abs() < 1e-16);
        assert!((f0_error(psr.prefit_model()) - 1e-9).abs() < 1e-14);
        assert!(psr.postfit_resids().unwrap().chi2() < 1e-6);
    }

    #[test]
    fn fit_uses_only_selected_toas() {
        let mut psr = session(1e-9);
        let selected: Vec<bool> = (0..30).map(|i| i % 3 == 0).collect();
        let summary = psr.fit(&selected).unwrap();
        assert_eq!(summary.dof, 8);
        assert_eq!(psr.selected(), selected.as_slice());
        // Residuals are still reported for every TOA.
        assert_eq!(psr.postfit_resids().unwrap().len(), 30);
    }

    #[test]
    fn revert_walks_back_through_fits() {
        let mut psr = session(1e-9);
        let none = vec![false; 30];
        assert!(!psr.revert());

        psr.fit(&none).unwrap();
        let first = psr.postfit_model().unwrap().param_value(ParamId::F(0));
        psr.set_frozen(ParamId::F(1), false).unwrap();
        psr.fit(&none).unwrap();
        assert_eq!(psr.fit_summary().unwrap().updates.len(), 2);

        assert!(psr.revert());
        assert!(psr.fitted());
        assert_eq!(psr.postfit_model().unwrap().param_value(ParamId::F(0)), first);
        assert_eq!(psr.fit_summary().unwrap().updates.len(), 1);

        assert!(psr.revert());
        assert!(!psr.fitted());
        assert!(!psr.revert());
    }

    #[test]
    fn delete_records_stable_indices() {
        let mut psr = session(0.0);
        let mut selection = vec![false; 30];
        selection[4] = true;
        psr.select(&selection).unwrap();

        let mut mask = vec![false; 30];
        mask[0] = true;
        mask[2] = true;
        psr.delete_toas(&mask).unwrap();
        assert_eq!(psr.all_toas().len(), 28);
        assert_eq!(psr.deleted(), &[0, 2]);
        assert_eq!(psr.prefit_resids().len(), 28);
        // TOA 4 is now at position 2.
        assert!(psr.selected()[2]);
        assert_eq!(psr.selected().iter().filter(|&&s| s).count(), 1);

        let mut mask = vec![false; 28];
        mask[0] = true;
        psr.delete_toas(&mask).unwrap();
        assert_eq!(psr.deleted(), &[0, 2, 1]);

        assert!(psr.delete_toas(&vec![true; 27]).is_err());
        assert!(psr.delete_toas(&[true]).is_err());
    }

    #[test]
    fn reset_restores_construction_state() {
        let mut psr = session(1e-9);
        let mut mask = vec![false; 30];
        mask[7] = true;
        psr.delete_toas(&mask).unwrap();
        psr.fit(&vec![false; 29]).unwrap();
        psr.set_frozen(ParamId::F(1), false).unwrap();

        psr.reset();
        assert!(!psr.fitted());
        assert_eq!(psr.all_toas().len(), 30);
        assert!(psr.deleted().is_empty());
        assert_eq!(psr.prefit_model().is_frozen(ParamId::F(1)), Some(true));
        assert!(!psr.revert());
    }

    #[test]
    fn set_frozen_reaches_both_models() {
        let mut psr = session(1e-9);
        psr.fit(&vec![false; 30]).unwrap();
        psr.set_frozen(ParamId::F(1), false).unwrap();
        assert_eq!(psr.prefit_model().is_frozen(ParamId::F(1)), Some(false));
        assert_eq!(
            psr.postfit_model().unwrap().is_frozen(ParamId::F(1)),
            Some(false)
        );
        assert!(psr.set_frozen(ParamId::F(9), false).is_err());
    }

    fn mask(n: usize, hits: impl IntoIterator<Item = usize>) -> Vec<bool> {
        let mut mask = vec![false; n];
        for i in hits {
            mask[i] = true;
        }
        mask
    }

    #[test]
    fn revert_after_first_fit_returns_to_construction_state() {
        let mut psr = session(1e-9);
        psr.delete_toas(&mask(30, [3])).unwrap();
        psr.fit(&vec![false; 29]).unwrap();

        // The first fit pushes nothing, so revert lands on the base state and
        // the deletion is undone along with the fit.
        assert!(psr.revert());
        assert!(!psr.fitted());
        assert_eq!(psr.all_toas().len(), 30);
        assert!(psr.deleted().is_empty());
        assert!(!psr.revert());
    }

    #[test]
    fn phase_wrap_adds_whole_turns() {
        let mut psr = session(0.0);
        let before = psr.prefit_resids().phase_resids().to_vec();
        psr.add_phase_wrap(&mask(30, [5]), 1).unwrap();
        assert!(psr.all_toas().has_pulse_numbers());
        let after = psr.prefit_resids().phase_resids();
        // The weighted mean shifts by 1/30 of a turn for everyone.
        let shift = after[0] - before[0];
        assert!((shift + 1.0 / 30.0).abs() < 1e-9);
        assert!((after[5] - before[5] - shift - 1.0).abs() < 1e-9);

        psr.add_phase_wrap(&mask(30, [5]), -1).unwrap();
        let undone = psr.prefit_resids().phase_resids();
        assert!((undone[5] - before[5]).abs() < 1e-9);
        assert!(psr.add_phase_wrap(&[true], 1).is_err());
    }

    #[test]
    fn wraps_later_than_selection() {
        let mut psr = session(0.0);
        assert!(!psr.wrap_later_than_selection(1).unwrap());
        assert!(!psr.all_toas().has_pulse_numbers());

        psr.select(&mask(30, [4, 10])).unwrap();
        assert!(psr.wrap_later_than_selection(-2).unwrap());
        let deltas: Vec<i64> = psr.all_toas().iter().map(|t| t.delta_pulse_number).collect();
        assert!(deltas[..=10].iter().all(|&d| d == 0));
        assert!(deltas[11..].iter().all(|&d| d == -2));
    }

    #[test]
    fn stash_hides_toas_until_unstashed() {
        let mut psr = session(0.0);
        assert!(psr.unstash_toas().is_err());
        psr.select(&mask(30, [20])).unwrap();
        psr.stash_toas(&mask(30, 0..5)).unwrap();
        assert!(psr.is_stashed());
        assert_eq!(psr.all_toas().len(), 25);
        assert_eq!(psr.prefit_resids().len(), 25);
        assert!(psr.selected().iter().all(|&s| !s));
        assert!(psr.stash_toas(&vec![false; 25]).is_err());

        // Deleted while stashed stays deleted.
        psr.delete_toas(&mask(25, [0])).unwrap();
        psr.unstash_toas().unwrap();
        assert!(!psr.is_stashed());
        assert_eq!(psr.all_toas().len(), 29);
        assert_eq!(psr.deleted(), &[5]);
        assert!(!psr.all_toas().indices().contains(&5));
        assert!(psr.stash_toas(&vec![true; 29]).is_err());
    }

    #[test]
    fn unstash_renumbers_pulses_from_postfit_model() {
        let mut psr = session(1e-9);
        psr.add_phase_wrap(&mask(30, [29]), 1).unwrap();
        psr.stash_toas(&mask(30, [29])).unwrap();
        psr.fit(&vec![false; 29]).unwrap();
        psr.unstash_toas().unwrap();
        assert!(psr.all_toas().iter().all(|toa| toa.delta_pulse_number == 0));
        assert!(psr.postfit_resids().unwrap().chi2() < 1e-3);
    }

    #[test]
    fn toggle_jump_adds_then_removes() {
        let mut psr = session(0.0);
        let first = mask(30, 0..10);
        assert_eq!(psr.toggle_jump(&first).unwrap(), JumpToggle::Added(ParamId::Jump(1)));
        assert_eq!(psr.jumped().iter().filter(|&&j| j).count(), 10);
        assert_eq!(psr.prefit_model().is_frozen(ParamId::Jump(1)), Some(false));
        assert!(psr.selected().iter().all(|&s| !s));

        let err = psr.delete_toas(&mask(30, [3])).unwrap_err();
        assert!(err.to_string().contains("Cannot delete jumped TOAs"));
        let err = psr.stash_toas(&mask(30, [3, 20])).unwrap_err();
        assert!(err.to_string().contains("Cannot stash jumped TOAs"));

        assert_eq!(psr.toggle_jump(&first).unwrap(), JumpToggle::Removed(ParamId::Jump(1)));
        assert!(!psr.prefit_model().has_jumps());
        assert!(psr.toggle_jump(&vec![false; 30]).is_err());
    }

    #[test]
    fn jumps_reach_postfit_model() {
        let mut psr = session(1e-9);
        psr.fit(&vec![false; 30]).unwrap();
        psr.toggle_jump(&mask(30, 20..30)).unwrap();
        assert!(psr.postfit_model().unwrap().has_jumps());
        psr.fit(&vec![false; 30]).unwrap();
        let updates = &psr.fit_summary().unwrap().updates;
        assert_eq!(updates.last().unwrap().param, ParamId::Jump(1));
        assert_eq!(psr.fit_summary().unwrap().covariance.len(), 2);
    }

    #[test]
    fn fit_refuses_all_jumped_toas() {
        let mut psr = session(1e-9);
        psr.toggle_jump(&mask(30, 0..10)).unwrap();
        let err = psr.fit(&mask(30, 0..10)).unwrap_err();
        assert!(err.to_string().contains("TOAs being fit must not all be jumped"));
        assert!(!psr.fitted());
        // Including one unjumped TOA is enough.
        psr.fit(&mask(30, 0..11)).unwrap();

        psr.toggle_jump(&mask(30, 10..30)).unwrap();
        let err = psr.fit(&vec![false; 30]).unwrap_err();
        assert!(err.to_string().contains("must not all be jumped"));
    }

    #[test]
    fn jump_other_groups_skips_selected_and_jumped() {
        let mut psr = session(0.0);
        psr.toggle_jump(&mask(30, [20])).unwrap();
        psr.select(&mask(30, 0..15)).unwrap();
        // TOAs are days apart, so each one is its own group.
        let added = psr.jump_other_groups().unwrap();
        assert_eq!(added.len(), 14);
        assert_eq!(added[0], ParamId::Jump(2));
        let jumped = psr.jumped();
        assert!(jumped[..15].iter().all(|&j| !j));
        assert!(jumped[15..].iter().all(|&j| j));
        assert_eq!(psr.selected().iter().filter(|&&s| s).count(), 15);
    }
}
