//! Stateful simulation over a shared, immutable [`ConfoundMdp`].
//!
//! The simulator borrows the model and owns the mutable episode state
//! (current state, current confounder, done flag). Each concurrent sampler
//! builds its own simulator; the model itself is never mutated.

use confound_prob::Sampler;

use crate::error::MdpError;
use crate::model::ConfoundMdp;

/// Episode state for one run through a confounded MDP.
#[derive(Debug, Clone)]
pub struct Simulator<'a> {
    mdp: &'a ConfoundMdp,
    state: usize,
    confounder: Option<usize>,
    done: bool,
}

impl<'a> Simulator<'a> {
    /// A simulator positioned at state 0 with no confounder assigned.
    pub fn new(mdp: &'a ConfoundMdp) -> Self {
        Self {
            mdp,
            state: 0,
            confounder: None,
            done: false,
        }
    }

    pub fn mdp(&self) -> &'a ConfoundMdp {
        self.mdp
    }

    pub fn state(&self) -> usize {
        self.state
    }

    pub fn confounder(&self) -> Option<usize> {
        self.confounder
    }

    /// Whether the episode has entered an absorbing state.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Start a new episode: draw the initial state from `x_dist`, clear the
    /// done flag and forget the confounder.
    pub fn reset<S: Sampler + ?Sized>(&mut self, sampler: &mut S) -> Result<usize, MdpError> {
        self.state = self.mdp.sample_initial(sampler)?;
        self.confounder = None;
        self.done = false;
        Ok(self.state)
    }

    /// Fix the confounder used by subsequent steps.
    pub fn assign_confounder(&mut self, confounder: usize) -> Result<(), MdpError> {
        self.mdp.check_confounder(confounder)?;
        self.confounder = Some(confounder);
        Ok(())
    }

    /// Draw a fresh confounder from `u_dist` and assign it.
    pub fn draw_confounder<S: Sampler + ?Sized>(
        &mut self,
        sampler: &mut S,
    ) -> Result<usize, MdpError> {
        let u = self.mdp.sample_confounder(sampler)?;
        self.confounder = Some(u);
        Ok(u)
    }

    /// Take `action` from the current state under the assigned confounder.
    ///
    /// # Errors
    ///
    /// `ConfounderUnassigned` if no confounder has been assigned since the
    /// last reset, and an index error for an out-of-range action.
    pub fn step<S: Sampler + ?Sized>(
        &mut self,
        action: usize,
        sampler: &mut S,
    ) -> Result<(usize, f64), MdpError> {
        let u = self.confounder.ok_or(MdpError::ConfounderUnassigned)?;
        let (next, reward) = self.mdp.sample_step(self.state, u, action, sampler)?;
        self.state = next;
        self.done = self.mdp.is_absorbing(next);
        Ok((next, reward))
    }
}
