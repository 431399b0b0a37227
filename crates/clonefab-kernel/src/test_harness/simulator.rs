//! Factory simulator
//!
//! Drives one factory from a rayon pool with a seeded mix of valid creates,
//! rejected creates and racing two-step initializations, then checks the
//! factory's guarantees against what every operation observed.

use crate::api::{InstanceFactory, LedgerReader};
use crate::config::FactoryConfig;
use crate::error::{ErrorClass, FactoryError};
use crate::events::{EventCursor, FactoryEvent};
use crate::factory::TemplateFactory;
use clonefab_types::{Identity, ParamSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Barrier;
use tokio::sync::broadcast::{self, error::TryRecvError};

const OWNERS: [&str; 5] = ["alice", "bob", "carol", "dave", "erin"];
const MAX_EVENT_CAPACITY: usize = 1 << 20;

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Operations to run
    pub total_creates: u64,
    /// Worker threads
    pub threads: usize,
    /// Share of operations that use rejected input
    pub invalid_ratio: f64,
    /// Share of operations that race a two-step initialization
    pub race_ratio: f64,
    /// Concurrent initializers per race
    pub racers: usize,
    /// Report only the first violation found
    pub first_violation_only: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            total_creates: 1_000,
            threads: 4,
            invalid_ratio: 0.15,
            race_ratio: 0.10,
            racers: 4,
            first_violation_only: false,
        }
    }
}

/// Operation generated by the simulator
#[derive(Debug, Clone)]
pub enum SimulatedOperation {
    /// Create that must succeed
    ValidCreate {
        /// Requested owner
        owner: Identity,
        /// Requested parameters
        params: ParamSet,
    },
    /// Create that must be rejected as invalid
    InvalidCreate {
        /// Requested owner
        owner: Identity,
        /// Requested parameters
        params: ParamSet,
    },
    /// Deploy, then initialize concurrently from several callers
    RacedInitialize {
        /// One owner per racer
        owners: Vec<Identity>,
        /// Parameters every racer uses
        params: ParamSet,
    },
}

impl SimulatedOperation {
    fn kind(&self) -> &'static str {
        match self {
            Self::ValidCreate { .. } => "valid_create",
            Self::InvalidCreate { .. } => "invalid_create",
            Self::RacedInitialize { .. } => "raced_initialize",
        }
    }
}

/// What an operation observed
#[derive(Debug, Clone)]
enum Observed {
    Created {
        instance: Identity,
        owner: Identity,
        params: ParamSet,
    },
    Rejected(ErrorClass),
    Raced {
        instance: Identity,
        winners: Vec<Identity>,
        losers: usize,
        other_errors: Vec<String>,
        params: ParamSet,
    },
    Failed(String),
}

/// Guarantee a violation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantCheck {
    /// Successful creates returned distinct identities
    InstanceIdentitiesUnique,
    /// Each raced initialization had exactly one winner
    SingleInitializationWinner,
    /// Ledger entries exist exactly for initialized instances
    LedgerMatchesInstances,
    /// `entry_at` walks a gapless, increasing sequence
    SequencesGapless,
    /// Delivered events agree with the ledger
    EventsMatchLedger,
    /// Ledger hash chain verifies
    HashChainIntact,
}

/// A detected violation
#[derive(Debug, Clone)]
pub enum Violation {
    /// Operation outcome did not match its expectation
    UnexpectedOutcome {
        /// Operation index
        index: u64,
        /// Operation kind
        kind: &'static str,
        /// What happened
        details: String,
    },
    /// A factory guarantee does not hold
    Invariant {
        /// Broken guarantee
        check: InvariantCheck,
        /// What was wrong
        details: String,
    },
}

/// Counters collected during the run
#[derive(Debug, Clone, Default)]
pub struct OperationStats {
    /// Operations executed
    pub total_operations: u64,
    /// Successful creates
    pub created: u64,
    /// Rejected creates
    pub rejected: u64,
    /// Raced initializations
    pub races: u64,
    /// Initializers that lost a race
    pub race_losers: u64,
}

/// Simulator result
#[derive(Debug, Clone)]
pub struct SimulatorReport {
    /// Configuration used
    pub config: SimulatorConfig,
    /// Counters
    pub stats: OperationStats,
    /// Everything that went wrong
    pub violations: Vec<Violation>,
    /// Ledger entries at the end
    pub ledger_len: usize,
    /// Deployed instances at the end
    pub instance_count: usize,
}

impl SimulatorReport {
    /// Whether no violation was found
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human readable summary
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Clonefab Simulator Report ===\n\n");
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(report, "Threads: {}", self.config.threads);
        let _ = writeln!(report, "Operations: {}", self.stats.total_operations);
        let _ = writeln!(report, "Created: {}", self.stats.created);
        let _ = writeln!(report, "Rejected: {}", self.stats.rejected);
        let _ = writeln!(report, "Races: {} ({} losers)", self.stats.races, self.stats.race_losers);
        let _ = writeln!(report, "Ledger Entries: {}", self.ledger_len);
        let _ = writeln!(report, "Instances: {}", self.instance_count);
        let _ = writeln!(report, "Violations: {}", self.violations.len());

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {v:?}", i + 1);
            }
        }

        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }
}

/// Simulator setup failures
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    /// Factory could not be built
    #[error("factory setup failed: {0}")]
    Factory(#[from] FactoryError),
    /// Worker pool could not be built
    #[error("thread pool setup failed: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Run the simulator against a fresh in-memory factory
///
/// # Errors
/// Returns [`SimulatorError`] if the factory or the worker pool cannot be
/// built. Violations are reported in the [`SimulatorReport`], not as errors.
pub fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, SimulatorError> {
    let capacity = usize::try_from(config.total_creates)
        .unwrap_or(usize::MAX)
        .clamp(1, MAX_EVENT_CAPACITY);
    let factory = TemplateFactory::new(FactoryConfig::default().with_event_capacity(capacity))?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads.max(1))
        .build()?;

    let mut events = factory.subscribe();
    tracing::info!(seed = config.seed, operations = config.total_creates, "simulation started");

    let observed: Vec<(SimulatedOperation, Observed)> = pool.install(|| {
        (0..config.total_creates)
            .into_par_iter()
            .map(|index| {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(index));
                let operation = generate_operation(&mut rng, &config, index);
                let outcome = execute_operation(&factory, &operation);
                (operation, outcome)
            })
            .collect()
    });

    let mut stats = OperationStats::default();
    let mut violations = Vec::new();
    let mut created: Vec<(Identity, Identity, ParamSet)> = Vec::new();

    for (index, (operation, outcome)) in (0u64..).zip(&observed) {
        stats.total_operations += 1;
        let unexpected = |details: String| Violation::UnexpectedOutcome {
            index,
            kind: operation.kind(),
            details,
        };

        match (operation, outcome) {
            (SimulatedOperation::ValidCreate { .. }, Observed::Created { instance, owner, params }) => {
                stats.created += 1;
                created.push((*instance, *owner, params.clone()));
            }
            (SimulatedOperation::InvalidCreate { .. }, Observed::Rejected(ErrorClass::Validation)) => {
                stats.rejected += 1;
            }
            (
                SimulatedOperation::RacedInitialize { .. },
                Observed::Raced {
                    instance,
                    winners,
                    losers,
                    other_errors,
                    params,
                },
            ) => {
                stats.races += 1;
                stats.race_losers += *losers as u64;
                for err in other_errors {
                    violations.push(unexpected(format!("racer failed with {err}")));
                }
                if winners.len() == 1 {
                    created.push((*instance, winners[0], params.clone()));
                } else {
                    violations.push(Violation::Invariant {
                        check: InvariantCheck::SingleInitializationWinner,
                        details: format!("{instance} had {} winners", winners.len()),
                    });
                }
            }
            (_, other) => violations.push(unexpected(format!("{other:?}"))),
        }
    }

    check_invariants(&factory, &created, &mut events, &mut violations);
    if config.first_violation_only {
        violations.truncate(1);
    }

    let report = SimulatorReport {
        config,
        stats,
        violations,
        ledger_len: factory.ledger_len(),
        instance_count: factory.instance_count(),
    };
    tracing::info!(passed = report.passed(), violations = report.violations.len(), "simulation finished");
    Ok(report)
}

fn generate_operation(rng: &mut StdRng, config: &SimulatorConfig, index: u64) -> SimulatedOperation {
    let owner = Identity::named(OWNERS[rng.random_range(0..OWNERS.len())]);
    let params = ParamSet::new(format!("Token{index}"), format!("TK{index}"));
    let r: f64 = rng.random();

    if r < config.invalid_ratio {
        let (owner, params) = match rng.random_range(0..5) {
            0 => (owner, ParamSet::new("", params.symbol)),
            1 => (owner, ParamSet::new(params.name, format!(" {}", params.symbol))),
            2 => (owner, ParamSet::new(params.name, "TK-N")),
            3 => (owner, ParamSet::new(params.name, "ABCDEFGHIJKL")),
            _ => (Identity::ZERO, params),
        };
        SimulatedOperation::InvalidCreate { owner, params }
    } else if r < config.invalid_ratio + config.race_ratio {
        let owners = (0..config.racers.max(2))
            .map(|_| Identity::named(OWNERS[rng.random_range(0..OWNERS.len())]))
            .collect();
        SimulatedOperation::RacedInitialize { owners, params }
    } else {
        SimulatedOperation::ValidCreate { owner, params }
    }
}

fn execute_operation(factory: &TemplateFactory, operation: &SimulatedOperation) -> Observed {
    match operation {
        SimulatedOperation::ValidCreate { owner, params }
        | SimulatedOperation::InvalidCreate { owner, params } => {
            match factory.create(*owner, params.clone()) {
                Ok(instance) => Observed::Created {
                    instance,
                    owner: *owner,
                    params: params.clone(),
                },
                Err(e) if e.is_fatal() => Observed::Failed(e.to_string()),
                Err(e) => Observed::Rejected(e.class()),
            }
        }
        SimulatedOperation::RacedInitialize { owners, params } => {
            let instance = match factory.deploy_uninitialized() {
                Ok(id) => id,
                Err(e) => return Observed::Failed(e.to_string()),
            };
            race(factory, instance, owners, params)
        }
    }
}

/// What one racing initializer saw, `Err` if its thread panicked
type RacerOutcome = Result<(Identity, Result<(), FactoryError>), String>;

fn race(factory: &TemplateFactory, instance: Identity, owners: &[Identity], params: &ParamSet) -> Observed {
    let barrier = Barrier::new(owners.len());
    let results: Vec<RacerOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = owners
            .iter()
            .map(|owner| {
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    let result = factory.initialize(instance, *owner, params.clone()).map(|_| ());
                    (*owner, result)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| "racer thread panicked".to_string()))
            .collect()
    });

    tally_race(instance, params, results)
}

fn tally_race(instance: Identity, params: &ParamSet, results: Vec<RacerOutcome>) -> Observed {
    let mut winners = Vec::new();
    let mut losers = 0;
    let mut other_errors = Vec::new();
    for outcome in results {
        match outcome {
            Ok((owner, Ok(()))) => winners.push(owner),
            Ok((_, Err(FactoryError::AlreadyInitialized(_)))) => losers += 1,
            Ok((_, Err(e))) => other_errors.push(e.to_string()),
            Err(panicked) => other_errors.push(panicked),
        }
    }

    Observed::Raced {
        instance,
        winners,
        losers,
        other_errors,
        params: params.clone(),
    }
}

fn check_invariants(
    factory: &TemplateFactory,
    created: &[(Identity, Identity, ParamSet)],
    events: &mut broadcast::Receiver<FactoryEvent>,
    violations: &mut Vec<Violation>,
) {
    let mut invariant = |check: InvariantCheck, details: String| {
        violations.push(Violation::Invariant { check, details });
    };

    let mut seen = HashSet::new();
    for (instance, _, _) in created {
        if !seen.insert(*instance) {
            invariant(
                InvariantCheck::InstanceIdentitiesUnique,
                format!("{instance} returned twice"),
            );
        }
    }

    for (instance, owner, params) in created {
        match factory.lookup_by_instance(instance) {
            Some(entry) if entry.creator == *owner && entry.params == *params => {}
            Some(entry) => invariant(
                InvariantCheck::LedgerMatchesInstances,
                format!("entry {} disagrees with what {instance} was created with", entry.sequence),
            ),
            None => invariant(
                InvariantCheck::LedgerMatchesInstances,
                format!("{instance} has no ledger entry"),
            ),
        }
        match factory.instance(instance) {
            Ok(handle) if handle.is_initialized() => {}
            _ => invariant(
                InvariantCheck::LedgerMatchesInstances,
                format!("{instance} is recorded but not initialized"),
            ),
        }
    }

    let len = factory.ledger_len();
    if len != created.len() {
        invariant(
            InvariantCheck::LedgerMatchesInstances,
            format!("ledger has {len} entries for {} creations", created.len()),
        );
    }

    for seq in 0..len as u64 {
        match factory.entry_at(seq) {
            Some(entry) if entry.sequence == seq => {}
            other => invariant(
                InvariantCheck::SequencesGapless,
                format!("entry_at({seq}) returned {:?}", other.map(|e| e.sequence)),
            ),
        }
    }
    if factory.entry_at(len as u64).is_some() {
        invariant(InvariantCheck::SequencesGapless, format!("entry past end at {len}"));
    }

    // A lagging subscriber loses the oldest events; resume from the first
    // one still buffered.
    let mut cursor = EventCursor::new();
    let mut lagged = false;
    loop {
        let event = match events.try_recv() {
            Ok(event) => event,
            Err(TryRecvError::Lagged(_)) => {
                lagged = true;
                continue;
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        };
        if lagged && cursor.next_sequence() == 0 {
            cursor = EventCursor::starting_at(event.sequence());
        }
        match cursor.accept(&event) {
            Ok(true) => {
                let matches = factory
                    .entry_at(event.sequence())
                    .is_some_and(|entry| FactoryEvent::from_entry(&entry) == event);
                if !matches {
                    invariant(
                        InvariantCheck::EventsMatchLedger,
                        format!("event {} differs from its ledger entry", event.sequence()),
                    );
                }
            }
            Ok(false) => {}
            Err(e) => invariant(InvariantCheck::EventsMatchLedger, e.to_string()),
        }
    }
    if cursor.next_sequence() != len as u64 {
        invariant(
            InvariantCheck::EventsMatchLedger,
            format!("events end at {} but ledger has {len} entries", cursor.next_sequence()),
        );
    }

    let report = factory.verify();
    if !report.valid {
        invariant(
            InvariantCheck::HashChainIntact,
            format!("first invalid entry {:?}", report.first_invalid),
        );
    }
}
