//! Environment factory.
//!
//! Every environment is built in two stages:
//!
//! 1. **Base dynamics**: an unconfounded kernel per action, a reward tensor
//!    and an initial-state distribution ([`BaseDynamics`]).
//! 2. **Confounding**: one of the operators in [`crate::confound`] splits the
//!    base kernel and a flat behavior policy into two confounder-specific
//!    copies.
//!
//! The result is a [`ConfoundedEnv`]: the MDP plus the confounded behavior
//! policy that generates its logged data.
//!
//! | Factory | States | Actions | Confounding |
//! |---|---|---|---|
//! | [`toy_h2`] | 2 | 2 | hand-built |
//! | [`toy227`], [`toy227_skew`] | 3 | 2 | hand-built |
//! | [`graph`] | 2·horizon | 2 | reward ([`r_confound`], [`confound_pi_r`]) |
//! | [`random_walk`] | n_left + n_right + 2 | 2 | value ([`confound_v`], [`confound_pi_v`]) |
//! | [`gridworld`] | 16 or 64 | 4 | value |
//! | [`confounded_random_walk`] | 2 | 2 | hand-built |

use confound_prob::{Dist, Kernel};
use serde::{Deserialize, Serialize};

use crate::confound::{confound_pi_r, confound_pi_v, confound_v, r_confound, random_policy_value};
use crate::error::MdpError;
use crate::model::{ConfoundMdp, RewardTensor};
use crate::policy::{ConfoundedPolicy, TabularPolicy};

/// Exact Bellman steps used to value the random policy before value-based
/// confounding.
pub const RANDOM_POLICY_HORIZON: usize = 100;

/// A confounded MDP together with its confounded behavior policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfoundedEnv {
    pub mdp: ConfoundMdp,
    pub behavior: ConfoundedPolicy,
}

impl ConfoundedEnv {
    pub fn new(mdp: ConfoundMdp, behavior: ConfoundedPolicy) -> Result<Self, MdpError> {
        mdp.check_policy(&behavior)?;
        Ok(Self { mdp, behavior })
    }

    /// The behavior policy as seen without the confounder.
    pub fn marginal_behavior(&self) -> Result<TabularPolicy, MdpError> {
        self.behavior.marginal(&self.mdp.u_dist)
    }
}

/// Unconfounded dynamics: `tx[a]`, `r[a][s][s']` and `x_dist`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseDynamics {
    pub tx: Vec<Kernel>,
    pub r: RewardTensor,
    pub x_dist: Dist,
}

impl BaseDynamics {
    pub fn n_states(&self) -> usize {
        self.x_dist.len()
    }

    pub fn n_actions(&self) -> usize {
        self.tx.len()
    }

    /// Confound transitions toward the best/worst action under the random
    /// policy's values and lean `base_policy` the same way.
    pub fn confound_by_value(
        self,
        confound_weight: f64,
        base_policy: &Dist,
        policy_weight: f64,
        gamma: f64,
    ) -> Result<ConfoundedEnv, MdpError> {
        let v = random_policy_value(&self.tx, &self.r, &self.x_dist, RANDOM_POLICY_HORIZON)?;
        let p = confound_v(&self.tx, &v, confound_weight)?;
        let pi = TabularPolicy::constant(self.n_states(), base_policy);
        let behavior = confound_pi_v(&pi, &self.tx, &v, policy_weight)?;
        let mdp = ConfoundMdp::new(p, self.r, self.x_dist, Dist::uniform(2), gamma)?;
        ConfoundedEnv::new(mdp, behavior)
    }

    /// Confound transitions toward/away from rewarding outcomes and lean
    /// `base_policy` by the sign of expected immediate reward.
    pub fn confound_by_reward(
        self,
        confound_weight: f64,
        base_policy: &Dist,
        policy_weight: f64,
        gamma: f64,
    ) -> Result<ConfoundedEnv, MdpError> {
        let p = r_confound(&self.tx, &self.r, confound_weight)?;
        let pi = TabularPolicy::constant(self.n_states(), base_policy);
        let behavior = confound_pi_r(&pi, &self.tx, &self.r, policy_weight)?;
        let mdp = ConfoundMdp::new(p, self.r, self.x_dist, Dist::uniform(2), gamma)?;
        ConfoundedEnv::new(mdp, behavior)
    }
}

// ============================================================================
// Toy chains
// ============================================================================

/// Two states, two actions; the confounder only moves the policy.
pub fn toy_h2(pi_param: f64, p_param: f64, r_param: f64) -> Result<ConfoundedEnv, MdpError> {
    let stay = vec![vec![p_param, 1.0 - p_param]; 2];
    let swap = vec![vec![1.0 - p_param, p_param]; 2];
    let p = vec![
        vec![stay.clone(), swap.clone()],
        vec![stay, swap],
    ];
    let r = vec![
        vec![vec![r_param, 1.0 - r_param]; 2],
        vec![vec![1.0 - r_param, r_param]; 2],
    ];
    let mdp = ConfoundMdp::from_rows(
        p,
        r,
        vec![p_param, 1.0 - p_param],
        vec![0.5, 0.5],
        0.98,
    )?;
    let behavior = ConfoundedPolicy::from_rows(vec![
        vec![vec![pi_param, 1.0 - pi_param]; 2],
        vec![vec![1.0 - pi_param, pi_param]; 2],
    ])?;
    ConfoundedEnv::new(mdp, behavior)
}

fn toy227_rewards() -> RewardTensor {
    let r = vec![
        vec![0.0, -1.0, 1.0],
        vec![0.0, -1.0, 1.0],
        vec![0.0, 0.0, 0.0],
    ];
    vec![r.clone(), r]
}

/// Transition rows `[[c ± p, off, c ∓ p], [off, c ± p, c ∓ p], [0, 0, 1]]`.
fn toy227_rows(center: f64, off: f64, shift: f64) -> Vec<Vec<f64>> {
    vec![
        vec![center + shift, off, center - shift],
        vec![off, center + shift, center - shift],
        vec![0.0, 0.0, 1.0],
    ]
}

/// Three states with an absorbing third state; confounder 0 favors staying
/// (and action 0), confounder 1 favors absorbing (and action 1).
pub fn toy227(pi_param: f64, p_param: f64) -> Result<ConfoundedEnv, MdpError> {
    let p = vec![
        vec![toy227_rows(0.45, 0.1, p_param); 2],
        vec![toy227_rows(0.45, 0.1, -p_param); 2],
    ];
    let behavior = ConfoundedPolicy::from_rows(vec![
        vec![vec![1.0 - pi_param, pi_param]; 3],
        vec![vec![pi_param, 1.0 - pi_param]; 3],
    ])?;
    let mdp = ConfoundMdp::from_rows(
        p,
        toy227_rewards(),
        vec![0.5, 0.5, 0.0],
        vec![0.5, 0.5],
        0.98,
    )?;
    ConfoundedEnv::new(mdp, behavior)
}

/// [`toy227`] with action-dependent transition centers (0.45 / 0.40) and a
/// skewed policy in state 1.
pub fn toy227_skew(pi_param: f64, p_param: f64) -> Result<ConfoundedEnv, MdpError> {
    let p = vec![
        vec![
            toy227_rows(0.45, 0.1, p_param),
            toy227_rows(0.40, 0.2, p_param),
        ],
        vec![
            toy227_rows(0.45, 0.1, -p_param),
            toy227_rows(0.40, 0.2, -p_param),
        ],
    ];
    let behavior = ConfoundedPolicy::from_rows(vec![
        vec![
            vec![1.0 - pi_param, pi_param],
            vec![0.8 - pi_param, 0.2 + pi_param],
            vec![1.0 - pi_param, pi_param],
        ],
        vec![
            vec![pi_param, 1.0 - pi_param],
            vec![0.2 + pi_param, 0.8 - pi_param],
            vec![pi_param, 1.0 - pi_param],
        ],
    ])?;
    let mdp = ConfoundMdp::from_rows(
        p,
        toy227_rewards(),
        vec![0.5, 0.5, 0.0],
        vec![0.5, 0.5],
        0.98,
    )?;
    ConfoundedEnv::new(mdp, behavior)
}

// ============================================================================
// Graph
// ============================================================================

/// Branching chain of `2 · horizon` states starting in state 0.
///
/// From state 0 and every odd state action 0 advances to the "near" branch
/// with probability `1 − slip`, action 1 to the "far" branch; even states
/// mirror this one step later. Entering an odd state pays +1, an even state
/// −1; the last two non-absorbing states pay +1 / −1 on absorbing.
pub fn graph_dynamics(horizon: usize, slip: f64) -> Result<BaseDynamics, MdpError> {
    if horizon < 2 {
        return Err(MdpError::InvalidParameter {
            name: "horizon",
            reason: format!("graph needs horizon >= 2, got {horizon}"),
        });
    }
    let n = 2 * horizon;
    let (last, plus, minus) = (n - 1, n - 2, n - 3);
    let mut tx = vec![vec![vec![0.0; n]; n]; 2];
    let mut r = vec![vec![vec![0.0; n]; n]; 2];

    for rows in r.iter_mut() {
        for row in rows.iter_mut() {
            for (sp, x) in row.iter_mut().enumerate() {
                *x = if sp % 2 == 0 { -1.0 } else { 1.0 };
            }
        }
        rows[last][last] = 0.0;
        rows[plus][last] = 1.0;
        rows[minus][last] = -1.0;
    }

    for a in 0..2 {
        tx[a][last][last] = 1.0;
        tx[a][plus][last] = 1.0;
        tx[a][minus][last] = 1.0;
    }

    let mut branch = |s: usize, near: usize, far: usize| {
        tx[0][s][near] = 1.0 - slip;
        tx[0][s][far] = slip;
        tx[1][s][far] = 1.0 - slip;
        tx[1][s][near] = slip;
    };
    branch(0, 1, 2);
    for s in (1..minus).step_by(2) {
        branch(s, s + 2, s + 3);
    }
    for s in (2..minus).step_by(2) {
        branch(s, s + 1, s + 2);
    }

    Ok(BaseDynamics {
        tx: tx.into_iter().map(Kernel::new).collect::<Result<_, _>>()?,
        r,
        x_dist: Dist::point(n, 0),
    })
}

/// [`graph_dynamics`] confounded by reward, base policy `[0.6, 0.4]`.
pub fn graph(horizon: usize, slip: f64, confound_weight: f64) -> Result<ConfoundedEnv, MdpError> {
    let base_policy = Dist::new(vec![0.6, 0.4])?;
    graph_dynamics(horizon, slip)?.confound_by_reward(confound_weight, &base_policy, 0.3, 0.99)
}

// ============================================================================
// Bounded random walk
// ============================================================================

/// Parameters for [`random_walk`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomWalkConfig {
    /// Positions left of the start.
    pub n_left: usize,
    /// Positions right of the start.
    pub n_right: usize,
    /// Transition confounding weight in `[0, 1)`.
    pub confound_weight: f64,
}

impl Default for RandomWalkConfig {
    fn default() -> Self {
        Self {
            n_left: 10,
            n_right: 10,
            confound_weight: 0.1,
        }
    }
}

impl RandomWalkConfig {
    pub fn new(n_left: usize, n_right: usize) -> Self {
        Self {
            n_left,
            n_right,
            ..Self::default()
        }
    }

    pub fn with_confound_weight(mut self, confound_weight: f64) -> Self {
        self.confound_weight = confound_weight;
        self
    }
}

/// Walk over positions `−n_left ..= n_right + 1`; the last is absorbing.
///
/// Action 0 steps left (staying put at the left wall), action 1 steps
/// right. Every step costs −1 except the absorbing self-loop. Starts at
/// the center position (index `n_left`).
pub fn random_walk_dynamics(n_left: usize, n_right: usize) -> Result<BaseDynamics, MdpError> {
    let n = n_left + n_right + 2;
    let last = n - 1;
    let left = Kernel::deterministic(n, n, |s| match s {
        0 => 0,
        s if s == last => last,
        s => s - 1,
    });
    let right = Kernel::deterministic(n, n, |s| (s + 1).min(last));
    let mut r = vec![vec![vec![-1.0; n]; n]; 2];
    for rows in r.iter_mut() {
        rows[last][last] = 0.0;
    }
    Ok(BaseDynamics {
        tx: vec![left, right],
        r,
        x_dist: Dist::point(n, n_left),
    })
}

/// [`random_walk_dynamics`] confounded by value, base policy `[0.6, 0.4]`.
pub fn random_walk(config: &RandomWalkConfig) -> Result<ConfoundedEnv, MdpError> {
    let base_policy = Dist::new(vec![0.6, 0.4])?;
    random_walk_dynamics(config.n_left, config.n_right)?.confound_by_value(
        config.confound_weight,
        &base_policy,
        0.3,
        0.99,
    )
}

// ============================================================================
// Gridworld
// ============================================================================

const HOLE: f64 = -0.5;
const FIRE: f64 = -0.005;
const STEP: f64 = -0.01;
const GOAL: f64 = 1.0;

/// Grid size and reward layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridLayout {
    /// 4 × 4.
    #[default]
    Small,
    /// 8 × 8.
    Large,
}

impl GridLayout {
    /// Reward for entering each cell, row-major; the goal is the last cell.
    pub fn rewards(self) -> Vec<Vec<f64>> {
        let (h, f, o, g) = (HOLE, FIRE, STEP, GOAL);
        match self {
            GridLayout::Small => vec![
                vec![o, o, o, o],
                vec![o, o, f, h],
                vec![o, h, o, h],
                vec![o, h, f, g],
            ],
            GridLayout::Large => vec![
                vec![o, o, o, o, o, o, o, o],
                vec![o, o, f, o, h, o, o, o],
                vec![o, o, o, h, o, o, f, o],
                vec![o, f, o, o, o, h, o, f],
                vec![o, o, o, h, o, o, f, o],
                vec![o, h, h, o, f, o, h, o],
                vec![o, h, o, o, h, o, h, o],
                vec![o, o, o, h, o, f, o, g],
            ],
        }
    }

    pub fn side(self) -> usize {
        match self {
            GridLayout::Small => 4,
            GridLayout::Large => 8,
        }
    }
}

/// Initial-state distribution of the gridworld.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridStart {
    /// Uniform over the top-left corner cells `[0, 1, 2, 3, 4, 8, 12]`.
    #[default]
    Corner,
    /// Uniform over every cell.
    Uniform,
}

const CORNER_STARTS: [usize; 7] = [0, 1, 2, 3, 4, 8, 12];

/// Parameters for [`gridworld`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridworldConfig {
    /// Probability of slipping into each of the three unintended moves.
    pub slip: f64,
    /// Transition confounding weight in `[0, 1)`.
    pub confound_weight: f64,
    pub layout: GridLayout,
    pub start: GridStart,
    /// Without an absorbing goal the walk continues forever.
    pub infinite: bool,
}

impl Default for GridworldConfig {
    fn default() -> Self {
        Self {
            slip: 0.05,
            confound_weight: 0.1,
            layout: GridLayout::Small,
            start: GridStart::Corner,
            infinite: false,
        }
    }
}

impl GridworldConfig {
    pub fn with_slip(mut self, slip: f64) -> Self {
        self.slip = slip;
        self
    }

    pub fn with_confound_weight(mut self, confound_weight: f64) -> Self {
        self.confound_weight = confound_weight;
        self
    }

    pub fn with_layout(mut self, layout: GridLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_start(mut self, start: GridStart) -> Self {
        self.start = start;
        self
    }

    pub fn with_infinite(mut self, infinite: bool) -> Self {
        self.infinite = infinite;
        self
    }
}

/// Slip gridworld. Actions: 0 left, 1 right, 2 up, 3 down.
///
/// The intended move happens with probability `1 − 3·slip`, each other move
/// with probability `slip`; moves into a wall stay put. Entering a cell
/// pays that cell's reward. In the finite variant the goal (last cell)
/// absorbs with zero reward.
pub fn gridworld_dynamics(config: &GridworldConfig) -> Result<BaseDynamics, MdpError> {
    if !(0.0..=1.0 / 3.0).contains(&config.slip) {
        return Err(MdpError::InvalidParameter {
            name: "slip",
            reason: format!("{} is outside [0, 1/3]", config.slip),
        });
    }
    let side = config.layout.side();
    let n = side * side;
    let last = n - 1;

    let moves = |s: usize| -> [usize; 4] {
        let (row, col) = (s / side, s % side);
        [
            if col == 0 { s } else { s - 1 },
            if col == side - 1 { s } else { s + 1 },
            if row == 0 { s } else { s - side },
            if row == side - 1 { s } else { s + side },
        ]
    };

    let mut tx = vec![vec![vec![0.0; n]; n]; 4];
    for s in 0..n {
        if s == last && !config.infinite {
            for kernel in tx.iter_mut() {
                kernel[s][s] = 1.0;
            }
            continue;
        }
        for (dir, target) in moves(s).into_iter().enumerate() {
            for (a, kernel) in tx.iter_mut().enumerate() {
                kernel[s][target] += if a == dir {
                    1.0 - 3.0 * config.slip
                } else {
                    config.slip
                };
            }
        }
    }

    let cells: Vec<f64> = config.layout.rewards().into_iter().flatten().collect();
    let mut rows = vec![cells; n];
    rows[last][last] = 0.0;
    let r = vec![rows; 4];

    let x_dist = match config.start {
        GridStart::Corner => {
            let mut weights = vec![0.0; n];
            for &s in &CORNER_STARTS {
                weights[s] = 1.0;
            }
            Dist::from_weights(weights)?
        }
        GridStart::Uniform => Dist::uniform(n),
    };

    Ok(BaseDynamics {
        tx: tx.into_iter().map(Kernel::new).collect::<Result<_, _>>()?,
        r,
        x_dist,
    })
}

/// [`gridworld_dynamics`] confounded by value, base policy
/// `[0.4, 0.1, 0.1, 0.4]`.
pub fn gridworld(config: &GridworldConfig) -> Result<ConfoundedEnv, MdpError> {
    let base_policy = Dist::new(vec![0.4, 0.1, 0.1, 0.4])?;
    gridworld_dynamics(config)?.confound_by_value(config.confound_weight, &base_policy, 0.2, 0.99)
}

// ============================================================================
// Two-state confounded random walk
// ============================================================================

/// Two states, two actions, rewards `[1, 2]` for landing in state 0 / 1.
///
/// Under confounder 0 action 0 lands in state 0 with probability `2·pu1`,
/// under confounder 1 with `1 − 2·pu2`; action 1 mirrors this. The behavior
/// policy takes action 0 with probability `pis1u1` (state 0) or `pis2u1`
/// (state 1) under confounder 0, and the complements under confounder 1.
pub fn confounded_random_walk(
    pu1: f64,
    pu2: f64,
    pis1u1: f64,
    pis2u1: f64,
) -> Result<ConfoundedEnv, MdpError> {
    let row = |x: f64| vec![x, 1.0 - x];
    let p = vec![
        vec![vec![row(2.0 * pu1); 2], vec![row(1.0 - 2.0 * pu1); 2]],
        vec![vec![row(1.0 - 2.0 * pu2); 2], vec![row(2.0 * pu2); 2]],
    ];
    let r = vec![vec![vec![1.0, 2.0]; 2]; 2];
    let behavior = ConfoundedPolicy::from_rows(vec![
        vec![row(pis1u1), row(pis2u1)],
        vec![row(1.0 - pis1u1), row(1.0 - pis2u1)],
    ])?;
    let mdp = ConfoundMdp::from_rows(p, r, vec![0.6, 0.4], vec![0.5, 0.5], 0.99)?;
    ConfoundedEnv::new(mdp, behavior)
}

/// [`confounded_random_walk`] with its reference parameters.
pub fn confounded_random_walk_default() -> Result<ConfoundedEnv, MdpError> {
    confounded_random_walk(1.0 / 6.0, 1.0 / 2.5, 0.25, 1.0 / 6.0)
}
