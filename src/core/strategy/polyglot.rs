//! Fan-out of one operation to several runtime strategies.
//!
//! Children are built through the factory by name. Those that don't apply to
//! the application are skipped and count as satisfied; the rest run through
//! the queue in the mode the surrounding task runs in.

use std::collections::BTreeMap;

use super::{Family, Inventory, Operation, Role, Strategy, StrategyFactory};
use crate::queue::{run_queue, QueueMode};

/// Result per configured child: `None` when the child wasn't applicable.
pub type StrategyOutcome = BTreeMap<String, Option<bool>>;

enum ChildRun<T> {
    Skipped,
    Completed(T),
    /// The child ran but produced no result.
    Lost,
}

pub struct PolyglotStrategy<'a> {
    family: Family,
    strategies: Vec<String>,
    factory: &'a dyn StrategyFactory,
    mode: QueueMode,
    results: StrategyOutcome,
}

impl<'a> PolyglotStrategy<'a> {
    pub fn new(
        family: Family,
        strategies: Vec<String>,
        factory: &'a dyn StrategyFactory,
        mode: QueueMode,
    ) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for name in strategies {
            if !unique.contains(&name) {
                unique.push(name);
            }
        }

        Self {
            family,
            strategies: unique,
            factory,
            mode,
            results: StrategyOutcome::new(),
        }
    }

    pub fn strategies(&self) -> &[String] {
        &self.strategies
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn role(&self) -> Role {
        match self.family {
            Family::Check => Role::Check,
            Family::Dependencies => Role::Install,
        }
    }

    pub fn parallelizable(&self) -> bool {
        true
    }

    pub fn results(&self) -> &StrategyOutcome {
        &self.results
    }

    /// Run `method` on every applicable child, in configured order.
    fn on_strategies<T, F>(&self, method: F) -> Vec<(String, ChildRun<T>)>
    where
        F: Fn(&dyn Strategy) -> T + Sync,
        T: Send,
    {
        let mut runs: Vec<(String, ChildRun<T>)> = Vec::new();
        let mut instances: Vec<(usize, Box<dyn Strategy>)> = Vec::new();

        for name in &self.strategies {
            match self.factory.build(self.family, name) {
                Some(strategy) => {
                    instances.push((runs.len(), strategy));
                    runs.push((name.clone(), ChildRun::Lost));
                }
                None => runs.push((name.clone(), ChildRun::Skipped)),
            }
        }

        let method = &method;
        let (positions, units): (Vec<usize>, Vec<_>) = instances
            .into_iter()
            .map(|(position, strategy)| (position, move || method(strategy.as_ref())))
            .unzip();

        for (position, result) in positions.into_iter().zip(run_queue(self.mode, units)) {
            if let Some(value) = result {
                runs[position].1 = ChildRun::Completed(value);
            }
        }

        runs
    }

    /// Run a pass/fail operation on every child and record the outcome.
    pub fn execute_strategies_method(&mut self, operation: Operation) -> &StrategyOutcome {
        let runs = self.on_strategies(|strategy| operation.invoke(strategy));

        let mut outcome = StrategyOutcome::new();
        for (name, run) in runs {
            match run {
                ChildRun::Skipped => {
                    outcome.insert(name, None);
                }
                ChildRun::Completed(passed) => {
                    outcome.insert(name, Some(passed));
                }
                ChildRun::Lost => {}
            }
        }

        self.results = outcome;
        &self.results
    }

    /// Every configured child was either not applicable or didn't fail.
    pub fn passed(&self) -> bool {
        let satisfied = self
            .results
            .values()
            .filter(|result| **result != Some(false))
            .count();
        satisfied == self.strategies.len()
    }

    /// Concatenate what every applicable child reports missing.
    pub fn gather_missing_from_method(&self, inventory: Inventory) -> Vec<String> {
        self.on_strategies(|strategy| inventory.invoke(strategy))
            .into_iter()
            .filter_map(|(_, run)| match run {
                ChildRun::Completed(missing) => Some(missing),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn manager(&mut self) -> bool {
        self.execute_strategies_method(Operation::Manager);
        self.passed()
    }

    pub fn language(&mut self) -> bool {
        self.execute_strategies_method(Operation::Language);
        self.passed()
    }

    pub fn install(&mut self) -> bool {
        self.execute_strategies_method(Operation::Install);
        self.passed()
    }

    pub fn update(&mut self) -> bool {
        self.execute_strategies_method(Operation::Update);
        self.passed()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{FakeFactory, FakeStrategy};
    use super::super::StrategyFactory;
    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    struct PanickingFactory;

    struct Panicking;

    impl Strategy for Panicking {
        fn name(&self) -> &str {
            "Panicking"
        }

        fn family(&self) -> Family {
            Family::Dependencies
        }

        fn is_executable(&self) -> bool {
            true
        }

        fn install(&self) -> bool {
            panic!("install crashed")
        }
    }

    impl StrategyFactory for PanickingFactory {
        fn build(&self, _family: Family, name: &str) -> Option<Box<dyn Strategy>> {
            match name {
                "Panicking" => Some(Box::new(Panicking)),
                other => Some(Box::new(FakeStrategy::passing(other))),
            }
        }
    }

    #[test]
    fn all_children_passing_passes() {
        let factory = FakeFactory::default()
            .with(FakeStrategy::passing("Node"))
            .with(FakeStrategy::passing("Php"))
            .with(FakeStrategy::passing("Ruby"));

        for mode in [QueueMode::Sequential, QueueMode::parallel()] {
            let mut polyglot =
                PolyglotStrategy::new(Family::Check, names(&["Node", "Php", "Ruby"]), &factory, mode);
            assert!(polyglot.manager());
            assert_eq!(polyglot.results().len(), 3);
        }
    }

    #[test]
    fn one_failing_child_fails() {
        let factory = FakeFactory::default()
            .with(FakeStrategy::passing("Node"))
            .with(FakeStrategy::failing("Php"))
            .with(FakeStrategy::passing("Ruby"));

        let mut polyglot = PolyglotStrategy::new(
            Family::Check,
            names(&["Node", "Php", "Ruby"]),
            &factory,
            QueueMode::Sequential,
        );
        assert!(!polyglot.language());
        assert_eq!(polyglot.results()["Php"], Some(false));
    }

    #[test]
    fn inapplicable_child_counts_as_satisfied() {
        let factory = FakeFactory::default()
            .with(FakeStrategy::passing("Node"))
            .with(FakeStrategy::passing("Ruby"));

        let mut polyglot = PolyglotStrategy::new(
            Family::Dependencies,
            names(&["Node", "Php", "Ruby"]),
            &factory,
            QueueMode::parallel(),
        );
        assert!(polyglot.install());
        assert_eq!(polyglot.results()["Php"], None);
    }

    #[test]
    fn child_without_result_fails() {
        let mut polyglot = PolyglotStrategy::new(
            Family::Dependencies,
            names(&["Node", "Panicking"]),
            &PanickingFactory,
            QueueMode::Sequential,
        );
        assert!(!polyglot.install());
        assert!(!polyglot.results().contains_key("Panicking"));
    }

    #[test]
    fn gather_missing_concatenates_in_configured_order() {
        let factory = FakeFactory::default()
            .with(FakeStrategy::missing_extensions("Node", &["A"]))
            .with(FakeStrategy::missing_extensions("Php", &["B"]))
            .with(FakeStrategy::missing_extensions("Ruby", &["C"]));

        let polyglot = PolyglotStrategy::new(
            Family::Check,
            names(&["Node", "Php", "Ruby"]),
            &factory,
            QueueMode::parallel(),
        );
        assert_eq!(
            polyglot.gather_missing_from_method(Inventory::Extensions),
            vec!["A", "B", "C"]
        );
    }

    #[test]
    fn role_follows_family() {
        let factory = FakeFactory::default();
        let polyglot =
            PolyglotStrategy::new(Family::Dependencies, Vec::new(), &factory, QueueMode::Sequential);
        assert_eq!(polyglot.role(), Role::Install);
        assert!(polyglot.parallelizable());
    }
}
