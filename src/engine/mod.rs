//! The conflict-resolution cycle engine.
//!
//! Each cycle evaluates the `when` clause of every active rule entry in
//! registration order, picks the matching entry with the highest salience
//! (first registered wins ties) and runs its actions. The run ends when no
//! entry matches, when a rule calls `Complete()`, or with
//! [`RuleError::CycleBound`] once `max_cycle` cycles have fired.
//!
//! Refraction: an entry whose actions did not change the data context is
//! retracted for the rest of the run. An entry whose actions did change it
//! stays eligible, so iterating rules run until their condition turns false.
//!
//! In loose mode (the default) an [`RuleError::is_rule_local`] failure while
//! evaluating or running one entry only keeps that entry from firing and is
//! logged; the run goes on. Strict mode returns the failure.

/// Worker pool running independent sessions.
pub mod runtime;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::ast::Session;
use crate::context::DataContext;
use crate::error::{RuleError, RuleResult};
use crate::knowledge::{KnowledgeBase, RuleEntry};

/// Default bound on fired cycles per run.
pub const DEFAULT_MAX_CYCLE: u64 = 5000;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of cycles that may fire in one run.
    pub max_cycle: u64,
    /// Promote per-rule access and type failures to run-aborting errors.
    pub strict: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cycle: DEFAULT_MAX_CYCLE,
            strict: false,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn with_max_cycle(mut self, max_cycle: u64) -> Self {
        self.max_cycle = max_cycle;
        self
    }

    #[must_use]
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Parses a configuration document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> RuleResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| RuleError::configuration(format!("invalid engine configuration: {e}")))
    }
}

/// Observer of a run. Every method defaults to doing nothing.
pub trait EngineListener: Send + Sync {
    /// A new cycle is about to build its conflict set.
    fn begin_cycle(&self, _cycle: u64) {}

    /// An entry's `when` clause was evaluated.
    fn evaluate_rule_entry(&self, _cycle: u64, _entry: &RuleEntry, _candidate: bool) {}

    /// An entry was selected and its actions are about to run.
    fn execute_rule_entry(&self, _cycle: u64, _entry: &RuleEntry) {}
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Number of cycles that fired a rule.
    pub cycles: u64,
    /// Names of fired entries, in firing order.
    pub fired: Vec<String>,
    pub elapsed: Duration,
}

/// Runs knowledge base instances against data contexts.
///
/// The engine itself holds no session state and can be shared between
/// threads; every run mutates only the instance and context it is given.
#[derive(Clone, Default)]
pub struct RuleEngine {
    config: EngineConfig,
    listeners: Vec<Arc<dyn EngineListener>>,
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl RuleEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            listeners: Vec::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registers a listener for every later run.
    pub fn add_listener(&mut self, listener: Arc<dyn EngineListener>) {
        self.listeners.push(listener);
    }

    /// Runs the cycle loop to completion.
    pub fn execute(&self, data: &mut DataContext, kb: Option<&mut KnowledgeBase>) -> RuleResult<()> {
        self.execute_with_report(data, kb).map(drop)
    }

    /// Runs the cycle loop and reports what fired.
    pub fn execute_with_report(
        &self,
        data: &mut DataContext,
        kb: Option<&mut KnowledgeBase>,
    ) -> RuleResult<RunReport> {
        let kb = kb.ok_or_else(|| RuleError::configuration("no knowledge base supplied to execute"))?;
        let started = Instant::now();
        let name = kb.name().to_string();
        let version = kb.version().to_string();
        debug!(
            knowledge_base = %name,
            version = %version,
            rules = kb.rule_count(),
            max_cycle = self.config.max_cycle,
            strict = self.config.strict,
            "rule execution started"
        );

        kb.reset();
        data.reset_complete();
        let mut report = RunReport::default();
        let mut session = kb.bind(data);

        loop {
            let cycle = report.cycles + 1;
            for listener in &self.listeners {
                listener.begin_cycle(cycle);
            }
            let candidates = self.conflict_set(&mut session, cycle)?;
            let Some(selected) = select(&session, &candidates) else {
                debug!(knowledge_base = %name, cycle, "no rule entry matches");
                break;
            };

            report.cycles = cycle;
            if cycle > self.config.max_cycle {
                error!(
                    knowledge_base = %name,
                    version = %version,
                    max_cycle = self.config.max_cycle,
                    "maximum cycle count reached"
                );
                return Err(RuleError::CycleBound {
                    max_cycle: self.config.max_cycle,
                });
            }

            let entry = session.entries()[selected].clone();
            debug!(knowledge_base = %name, cycle, rule = %entry.name, salience = entry.salience, "rule entry selected");
            for listener in &self.listeners {
                listener.execute_rule_entry(cycle, &entry);
            }
            self.fire(&mut session, selected, &entry.name)?;
            report.fired.push(entry.name);

            if session.data().is_complete() {
                debug!(knowledge_base = %name, cycle, "run completed by rule");
                break;
            }
        }

        report.elapsed = started.elapsed();
        debug!(
            knowledge_base = %name,
            version = %version,
            cycles = report.cycles,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "rule execution finished"
        );
        Ok(report)
    }

    /// Entries whose `when` clause currently holds, by descending salience.
    ///
    /// Nothing fires and no retraction flag changes. Cached condition values
    /// are dropped first so the result reflects the data context as it is.
    pub fn fetch_matching_rules(
        &self,
        data: &mut DataContext,
        kb: Option<&mut KnowledgeBase>,
    ) -> RuleResult<Vec<RuleEntry>> {
        let kb = kb.ok_or_else(|| RuleError::configuration("no knowledge base supplied to fetch_matching_rules"))?;
        kb.memory.reset();
        let mut session = kb.bind(data);
        let candidates = self.conflict_set(&mut session, 0)?;
        let mut matching: Vec<RuleEntry> = candidates
            .into_iter()
            .map(|i| session.entries()[i].clone())
            .collect();
        // Stable, so equal salience keeps registration order.
        matching.sort_by(|a, b| b.salience.cmp(&a.salience));
        Ok(matching)
    }

    fn conflict_set(&self, session: &mut Session<'_>, cycle: u64) -> RuleResult<Vec<usize>> {
        let mut candidates = Vec::new();
        for index in 0..session.entries().len() {
            if !session.entries()[index].is_active() {
                continue;
            }
            let matched = match session.evaluate_when(index) {
                Ok(matched) => matched,
                Err(e) if e.is_rule_local() && !self.config.strict => {
                    warn!(
                        knowledge_base = session.knowledge_base(),
                        rule = %session.entries()[index].name,
                        error = %e,
                        "rule condition failed; entry skipped this cycle"
                    );
                    false
                }
                Err(e) => return Err(e),
            };
            for listener in &self.listeners {
                listener.evaluate_rule_entry(cycle, &session.entries()[index], matched);
            }
            if matched {
                candidates.push(index);
            }
        }
        Ok(candidates)
    }

    fn fire(&self, session: &mut Session<'_>, index: usize, rule: &str) -> RuleResult<()> {
        set_retracted(session, index, true);
        match session.execute_then(index) {
            Ok(outcome) => {
                if outcome.changed && !outcome.retracted_self {
                    set_retracted(session, index, false);
                }
                Ok(())
            }
            Err(e) if e.is_rule_local() && !self.config.strict => {
                warn!(
                    knowledge_base = session.knowledge_base(),
                    rule,
                    error = %e,
                    "rule action failed; entry retracted for this run"
                );
                set_retracted(session, index, true);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn set_retracted(session: &mut Session<'_>, index: usize, retracted: bool) {
    if let Some(entry) = session.rules.get_mut(index) {
        entry.retracted = retracted;
    }
}

// Highest salience; the earlier entry wins a tie.
fn select(session: &Session<'_>, candidates: &[usize]) -> Option<usize> {
    let entries = session.entries();
    candidates
        .iter()
        .copied()
        .reduce(|best, i| if entries[i].salience > entries[best].salience { i } else { best })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::ast::{Action, AssignOp, Expr, RuleDef};
    use crate::value::{MapKey, Value};

    fn counter(value: i64) -> DataContext {
        let mut data = DataContext::new();
        let map = std::iter::once((MapKey::from("N"), Value::from(value))).collect();
        data.add("C", Value::Map(map));
        data
    }

    fn n() -> Expr {
        Expr::var("C").field("N")
    }

    fn count_to(limit: i64) -> KnowledgeBase {
        let mut kb = KnowledgeBase::new("Counting", "1");
        kb.add_rule(
            &RuleDef::new("Count")
                .when(n().lt(limit))
                .then(Action::update(n(), AssignOp::Add, 1)),
        )
        .unwrap();
        kb
    }

    #[test]
    fn test_absent_knowledge_base_is_configuration_error() {
        let engine = RuleEngine::default();
        let mut data = DataContext::new();
        assert!(engine.execute(&mut data, None).unwrap_err().is_configuration());
        assert!(engine.fetch_matching_rules(&mut data, None).unwrap_err().is_configuration());
    }

    #[test]
    fn test_changing_rule_stays_eligible_until_false() {
        let mut kb = count_to(10);
        let mut data = counter(0);
        let report = RuleEngine::default().execute_with_report(&mut data, Some(&mut kb)).unwrap();
        assert_eq!(report.cycles, 10);
        assert_eq!(data.get("C.N").unwrap().into_value(), Value::from(10_i64));
    }

    #[test]
    fn test_cycle_bound() {
        let mut kb = count_to(10);
        let mut data = counter(0);
        let engine = RuleEngine::new(EngineConfig::default().with_max_cycle(9));
        let err = engine.execute(&mut data, Some(&mut kb)).unwrap_err();
        assert_eq!(err, RuleError::CycleBound { max_cycle: 9 });
    }

    #[test]
    fn test_unchanged_rule_fires_once() {
        let mut kb = KnowledgeBase::new("Once", "1");
        kb.add_rule(&RuleDef::new("Noop").when(n().eq(0)).then(Action::call("Log", [Expr::from("hi")])))
            .unwrap();
        let mut data = counter(0);
        let report = RuleEngine::default().execute_with_report(&mut data, Some(&mut kb)).unwrap();
        assert_eq!(report.fired, vec!["Noop".to_string()]);
    }

    #[test]
    fn test_complete_stops_after_current_rule() {
        let mut kb = count_to(100);
        kb.add_rule(
            &RuleDef::new("Stop")
                .salience(1)
                .when(n().ge(3))
                .then(Action::call("Complete", []))
                .then(Action::set(n(), 50)),
        )
        .unwrap();
        let mut data = counter(0);
        RuleEngine::default().execute(&mut data, Some(&mut kb)).unwrap();
        assert_eq!(data.get("C.N").unwrap().into_value(), Value::from(50_i64));
    }

    #[test]
    fn test_fetch_matching_rules_orders_by_salience() {
        let mut kb = KnowledgeBase::new("Fetch", "1");
        for (name, salience) in [("Low", 1), ("High", 9), ("Mid", 5), ("AlsoHigh", 9)] {
            kb.add_rule(&RuleDef::new(name).salience(salience).when(n().ge(0))).unwrap();
        }
        kb.add_rule(&RuleDef::new("Never").salience(100).when(n().lt(0))).unwrap();
        let mut data = counter(0);
        let names: Vec<String> = RuleEngine::default()
            .fetch_matching_rules(&mut data, Some(&mut kb))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["High", "AlsoHigh", "Mid", "Low"]);
        assert!(kb.entries().iter().all(|e| !e.retracted));
    }

    #[test]
    fn test_loose_and_strict_failure_policy() {
        let mut kb = KnowledgeBase::new("Faulty", "1");
        kb.add_rule(&RuleDef::new("Broken").salience(5).when(Expr::var("Missing").field("X").eq(1)))
            .unwrap();
        kb.add_rule(&RuleDef::new("Fine").when(n().eq(0)).then(Action::set(n(), 1)))
            .unwrap();

        let mut data = counter(0);
        RuleEngine::default().execute(&mut data, Some(&mut kb)).unwrap();
        assert_eq!(data.get("C.N").unwrap().into_value(), Value::from(1_i64));

        let mut data = counter(0);
        let strict = RuleEngine::new(EngineConfig::default().with_strict(true));
        assert!(strict.execute(&mut data, Some(&mut kb)).unwrap_err().is_access());
        assert_eq!(data.get("C.N").unwrap().into_value(), Value::from(0_i64));
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl EngineListener for Recorder {
        fn begin_cycle(&self, cycle: u64) {
            self.events.lock().unwrap().push(format!("begin {cycle}"));
        }

        fn execute_rule_entry(&self, cycle: u64, entry: &RuleEntry) {
            self.events.lock().unwrap().push(format!("fire {cycle} {}", entry.name));
        }
    }

    #[test]
    fn test_listener_sees_cycles() {
        let recorder = Arc::new(Recorder::default());
        let mut engine = RuleEngine::default();
        engine.add_listener(recorder.clone());
        let mut kb = count_to(2);
        let mut data = counter(0);
        engine.execute(&mut data, Some(&mut kb)).unwrap();
        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events, ["begin 1", "fire 1 Count", "begin 2", "fire 2 Count", "begin 3"]);
    }

    #[test]
    fn test_config_from_json() {
        let config = EngineConfig::from_json_str(r#"{"strict": true}"#).unwrap();
        assert_eq!(config, EngineConfig::default().with_strict(true));
        assert!(EngineConfig::from_json_str("[").unwrap_err().is_configuration());
    }
}
