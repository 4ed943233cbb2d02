//! Pipeline definition.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::step::{ProcessingStep, StepAction};
use crate::{Error, Result};

/// Immutable, ordered list of uniquely named steps.
///
/// There is no dependency graph: declaration order and the file checks of
/// each step encode what a later step consumes. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    name: String,
    steps: Arc<[ProcessingStep]>,
    names: Arc<HashSet<String>>,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<ProcessingStep>) -> Result<Self> {
        let mut names = HashSet::with_capacity(steps.len());
        for step in &steps {
            if step.name.is_empty() {
                return Err(Error::Validation("step name must not be empty".to_string()));
            }
            if !names.insert(step.name.clone()) {
                return Err(Error::Validation(format!(
                    "duplicate step name: {}",
                    step.name
                )));
            }
            if let StepAction::Command(argv) = &step.action {
                if argv.is_empty() {
                    return Err(Error::Validation(format!(
                        "step '{}' has an empty command",
                        step.name
                    )));
                }
            }
        }

        Ok(Self {
            name: name.into(),
            steps: steps.into(),
            names: Arc::new(names),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All steps, in declared order.
    pub fn steps(&self) -> &[ProcessingStep] {
        &self.steps
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Validate caller-supplied skip names against the declared set.
    pub fn validate_skip(&self, skip: &[String]) -> Result<SkipList> {
        let invalid: BTreeSet<&str> = skip
            .iter()
            .map(String::as_str)
            .filter(|name| !self.contains(name))
            .collect();

        if !invalid.is_empty() {
            return Err(Error::InvalidSkipSteps(
                invalid.into_iter().map(str::to_string).collect(),
            ));
        }

        Ok(SkipList(skip.iter().cloned().collect()))
    }

    /// Steps to run for the given skip list, in declared order.
    pub fn plan<'a>(
        &'a self,
        skip: &'a SkipList,
    ) -> impl Iterator<Item = (usize, &'a ProcessingStep)> + 'a {
        self.steps
            .iter()
            .enumerate()
            .filter(move |(_, step)| !skip.contains(&step.name))
    }
}

/// A validated set of step names to omit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipList(BTreeSet<String>);

impl SkipList {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn five_steps() -> PipelineDefinition {
        PipelineDefinition::new(
            "test",
            vec![
                ProcessingStep::command("fault_plane", ["./fault_plane"]),
                ProcessingStep::command("deform", ["./deform"]),
                ProcessingStep::command("tsunami", ["./tsunami"])
                    .check("zfolder/green.dat", "Green data file missing"),
                ProcessingStep::command("maxola.csh", ["./maxola.csh"]),
                ProcessingStep::command("ttt_max", ["./ttt_max"]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_plan_skips_named_steps() {
        let pipeline = five_steps();
        let skip = pipeline.validate_skip(&["tsunami".to_string()]).unwrap();

        let planned: Vec<&str> = pipeline
            .plan(&skip)
            .map(|(_, s)| s.name.as_str())
            .collect();
        assert_eq!(planned, vec!["fault_plane", "deform", "maxola.csh", "ttt_max"]);
    }

    #[test]
    fn test_plan_keeps_declared_indices() {
        let pipeline = five_steps();
        let skip = pipeline.validate_skip(&["deform".to_string()]).unwrap();
        let indices: Vec<usize> = pipeline.plan(&skip).map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 2, 3, 4]);
    }

    #[test]
    fn test_invalid_skip_names_enumerated() {
        let pipeline = five_steps();
        let err = pipeline
            .validate_skip(&[
                "tsunami".to_string(),
                "zeta".to_string(),
                "alpha".to_string(),
                "zeta".to_string(),
            ])
            .unwrap_err();

        match err {
            Error::InvalidSkipSteps(names) => assert_eq!(names, vec!["alpha", "zeta"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let err = PipelineDefinition::new(
            "dup",
            vec![
                ProcessingStep::command("deform", ["./deform"]),
                ProcessingStep::command("deform", ["./deform"]),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate step name"));
    }

    #[test]
    fn test_rejects_empty_command() {
        let err = PipelineDefinition::new(
            "empty",
            vec![ProcessingStep::command("nothing", Vec::<String>::new())],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_empty_skip_runs_everything() {
        let pipeline = five_steps();
        let skip = pipeline.validate_skip(&[]).unwrap();
        assert!(skip.is_empty());
        assert_eq!(pipeline.plan(&skip).count(), 5);
    }
}
