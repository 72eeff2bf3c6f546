//! Simulation scenarios.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A simulation scenario.
///
/// Phases run one after another; steps inside a phase run concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps, grouped into phases.
    pub phases: Vec<Vec<ScenarioStep>>,
}

/// A step in a scenario. Accounts are indexes into the simulated accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScenarioStep {
    Deposit { account: usize, amount_minor: i64 },
    Withdraw { account: usize, amount_minor: i64 },
    Transfer { from: usize, to: usize, amount_minor: i64 },
    /// Reverse the n-th transaction completed in an earlier phase.
    Reverse { completed: usize },
    /// Submit the same request `copies` times at once under one key.
    Duplicate { step: Box<ScenarioStep>, copies: usize },
}

impl Scenario {
    /// Names accepted by [`Scenario::load`].
    pub const NAMES: &'static [&'static str] =
        &["random", "crossing-transfers", "idempotent-retries", "reversals"];

    /// Build a scenario by name.
    pub fn load(
        name: &str,
        accounts: usize,
        operations: usize,
        rng: &mut StdRng,
    ) -> anyhow::Result<Self> {
        if accounts < 2 {
            anyhow::bail!("scenarios need at least 2 accounts, got {}", accounts);
        }
        match name {
            "random" => Ok(Self::random(accounts, operations, rng)),
            "crossing-transfers" => Ok(Self::crossing_transfers(operations, rng)),
            "idempotent-retries" => Ok(Self::idempotent_retries(accounts, operations, rng)),
            "reversals" => Ok(Self::reversals(accounts, operations, rng)),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (expected one of {})",
                name,
                Self::NAMES.join(", ")
            )),
        }
    }

    /// Mixed deposits, withdrawals and transfers between random accounts.
    fn random(accounts: usize, operations: usize, rng: &mut StdRng) -> Self {
        let steps = (0..operations)
            .map(|_| random_step(accounts, rng))
            .collect();
        Self {
            name: "random".to_string(),
            description: "Mixed deposits, withdrawals and transfers".to_string(),
            phases: vec![steps],
        }
    }

    /// Transfers in both directions between the same two accounts.
    fn crossing_transfers(operations: usize, rng: &mut StdRng) -> Self {
        let steps = (0..operations)
            .map(|i| {
                let (from, to) = if i % 2 == 0 { (0, 1) } else { (1, 0) };
                ScenarioStep::Transfer {
                    from,
                    to,
                    amount_minor: rng.gen_range(1..10_000),
                }
            })
            .collect();
        Self {
            name: "crossing-transfers".to_string(),
            description: "A -> B and B -> A transfers racing for the same locks".to_string(),
            phases: vec![steps],
        }
    }

    /// Every request is submitted several times concurrently with one key.
    fn idempotent_retries(accounts: usize, operations: usize, rng: &mut StdRng) -> Self {
        let steps = (0..operations)
            .map(|_| ScenarioStep::Duplicate {
                step: Box::new(random_step(accounts, rng)),
                copies: rng.gen_range(2..5),
            })
            .collect();
        Self {
            name: "idempotent-retries".to_string(),
            description: "Duplicate submissions that must apply exactly once".to_string(),
            phases: vec![steps],
        }
    }

    /// Transfers, then reversals of about half of them.
    fn reversals(accounts: usize, operations: usize, rng: &mut StdRng) -> Self {
        let transfers: Vec<_> = (0..operations)
            .map(|_| random_transfer(accounts, rng))
            .collect();
        let reversals = (0..operations / 2)
            .map(|_| ScenarioStep::Reverse {
                completed: rng.gen_range(0..operations.max(1)),
            })
            .collect();
        Self {
            name: "reversals".to_string(),
            description: "Transfers followed by concurrent reversals".to_string(),
            phases: vec![transfers, reversals],
        }
    }

    /// Total number of steps over all phases.
    pub fn step_count(&self) -> usize {
        self.phases.iter().map(Vec::len).sum()
    }
}

fn random_step(accounts: usize, rng: &mut StdRng) -> ScenarioStep {
    let account = rng.gen_range(0..accounts);
    let amount_minor = rng.gen_range(1..50_000);
    match rng.gen_range(0..10) {
        0..=1 => ScenarioStep::Deposit {
            account,
            amount_minor,
        },
        2..=3 => ScenarioStep::Withdraw {
            account,
            amount_minor,
        },
        _ => random_transfer(accounts, rng),
    }
}

fn random_transfer(accounts: usize, rng: &mut StdRng) -> ScenarioStep {
    let from = rng.gen_range(0..accounts);
    let mut to = rng.gen_range(0..accounts);
    while to == from {
        to = rng.gen_range(0..accounts);
    }
    ScenarioStep::Transfer {
        from,
        to,
        amount_minor: rng.gen_range(1..50_000),
    }
}
