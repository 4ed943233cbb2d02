//! Pipeline configuration parsing.

use crate::nodes::{
    children, get_all_string_args, get_first_string_arg, get_path_and_message, get_string_prop,
};
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use std::collections::HashSet;
use std::path::Path;
use tsdhn_core::step::{CallbackRegistry, CompileRule, ProcessingStep, StepAction};
use tsdhn_core::PipelineDefinition;

/// The TSDHN pipeline shipped with the binary.
pub const DEFAULT_PIPELINE: &str = include_str!("../pipelines/tsdhn.kdl");

/// Parse a pipeline definition from KDL text.
///
/// Callback steps are resolved against `callbacks`; an unknown callback name
/// is an error.
pub fn parse_pipeline(kdl: &str, callbacks: &CallbackRegistry) -> ConfigResult<PipelineDefinition> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name = String::new();
    let mut steps = Vec::new();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        match node.name().value() {
            "pipeline" => {
                name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("pipeline name".to_string()))?;
            }
            "step" => {
                let step = parse_step(node, callbacks)?;
                if !seen.insert(step.name.clone()) {
                    return Err(ConfigError::Duplicate(format!("step '{}'", step.name)));
                }
                steps.push(step);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if name.is_empty() {
        return Err(ConfigError::MissingField("pipeline name".to_string()));
    }

    Ok(PipelineDefinition::new(name, steps)?)
}

/// Read and parse a pipeline file.
pub fn load_pipeline(path: &Path, callbacks: &CallbackRegistry) -> ConfigResult<PipelineDefinition> {
    let content = std::fs::read_to_string(path)?;
    parse_pipeline(&content, callbacks)
}

/// The embedded TSDHN pipeline.
pub fn default_pipeline(callbacks: &CallbackRegistry) -> ConfigResult<PipelineDefinition> {
    parse_pipeline(DEFAULT_PIPELINE, callbacks)
}

fn parse_step(node: &KdlNode, callbacks: &CallbackRegistry) -> ConfigResult<ProcessingStep> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("step name".to_string()))?;

    let callback = get_string_prop(node, "callback");
    let working_dir = get_string_prop(node, "dir");

    let mut command: Option<Vec<String>> = None;
    let mut compile = None;
    let mut file_checks = Vec::new();
    let mut pre_checks = Vec::new();
    let mut executables = Vec::new();

    for child in children(node) {
        match child.name().value() {
            "run" => {
                if command.is_some() {
                    return Err(ConfigError::Duplicate(format!("run in step '{}'", name)));
                }
                command = Some(get_all_string_args(child));
            }
            "compile" => {
                compile = Some(parse_compile(child, &name)?);
            }
            "check" => {
                file_checks.push(get_path_and_message(child)?);
            }
            "pre-check" => {
                pre_checks.push(get_path_and_message(child)?);
            }
            "executable" => {
                executables.extend(get_all_string_args(child));
            }
            _ => {}
        }
    }

    let action = match (command, callback) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::InvalidValue {
                field: format!("step '{}'", name),
                message: "a step takes either `run` or `callback`, not both".to_string(),
            });
        }
        (None, None) => {
            return Err(ConfigError::MissingField(format!(
                "run or callback for step '{}'",
                name
            )));
        }
        (Some(argv), None) => {
            if argv.is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "command for step '{}'",
                    name
                )));
            }
            StepAction::Command(argv)
        }
        (None, Some(callback_name)) => {
            let callback = callbacks.get(&callback_name).ok_or_else(|| {
                ConfigError::InvalidReference(format!(
                    "step '{}' uses unknown callback '{}'",
                    name, callback_name
                ))
            })?;
            StepAction::Callback {
                name: callback_name,
                callback,
            }
        }
    };

    let mut step = ProcessingStep::with_action(name, action);
    for (path, message) in file_checks {
        step = step.check(path, message);
    }
    for (path, message) in pre_checks {
        step = step.pre_check(path, message);
    }
    for exe in executables {
        step = step.executable(exe);
    }
    if let Some(rule) = compile {
        step = step.compile(rule);
    }
    if let Some(dir) = working_dir {
        step = step.in_dir(dir);
    }

    Ok(step)
}

fn parse_compile(node: &KdlNode, step: &str) -> ConfigResult<CompileRule> {
    let source = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField(format!("compile source for step '{}'", step)))?;
    let output = get_string_prop(node, "output")
        .ok_or_else(|| ConfigError::MissingField(format!("compile output for step '{}'", step)))?;

    let mut rule = CompileRule::new(source, output);
    if let Some(compiler) = get_string_prop(node, "compiler") {
        rule = rule.with_compiler(compiler);
    }

    let flags: Vec<String> = children(node)
        .filter(|c| c.name().value() == "flags")
        .flat_map(get_all_string_args)
        .collect();
    Ok(rule.with_flags(flags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tsdhn_core::StepCallback;

    struct Noop;

    #[async_trait]
    impl StepCallback for Noop {
        async fn run(&self, _working_dir: &Path) -> tsdhn_core::Result<()> {
            Ok(())
        }
    }

    fn registry() -> CallbackRegistry {
        let mut registry = CallbackRegistry::new();
        registry.register("ttt_max", Arc::new(Noop));
        registry.register("report", Arc::new(Noop));
        registry
    }

    #[test]
    fn test_default_pipeline() {
        let pipeline = default_pipeline(&registry()).unwrap();
        assert_eq!(pipeline.name(), "tsdhn");

        let names: Vec<&str> = pipeline.step_names().collect();
        assert_eq!(
            names,
            vec![
                "fault_plane",
                "deform",
                "tsunami",
                "maxola.csh",
                "ttt_max",
                "ttt_inverso",
                "point_ttt",
                "copy_ttt_eps",
                "generate_reports",
            ]
        );

        let steps = pipeline.steps();
        assert_eq!(
            steps[0].compile.as_ref().unwrap().argv(),
            vec!["gfortran", "fault_plane.f90", "-o", "fault_plane"]
        );
        assert_eq!(steps[2].file_checks.len(), 2);
        assert_eq!(steps[3].executables, vec!["espejo"]);
        assert!(steps[4].is_callback());
        assert_eq!(steps[5].working_dir.as_deref(), Some("ttt_mundo"));
        assert_eq!(steps[8].file_checks[0].path, "reporte.pdf");
    }

    #[test]
    fn test_compile_with_flags_and_compiler() {
        let kdl = r#"
            pipeline "p"

            step "build" {
                compile "model.f90" output="model" compiler="ifort" {
                    flags "-O3" "-fopenmp"
                }
                run "./model" "--steps" "100"
                pre-check "bathymetry.grd" "Bathymetry grid missing"
            }
        "#;

        let pipeline = parse_pipeline(kdl, &CallbackRegistry::new()).unwrap();
        let step = &pipeline.steps()[0];
        assert_eq!(
            step.compile.as_ref().unwrap().argv(),
            vec!["ifort", "-O3", "-fopenmp", "model.f90", "-o", "model"]
        );
        assert_eq!(step.pre_checks[0].message, "Bathymetry grid missing");
        match &step.action {
            StepAction::Command(argv) => assert_eq!(argv, &vec!["./model", "--steps", "100"]),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_callback() {
        let kdl = r#"
            pipeline "p"
            step "plot" callback="missing" {
                check "plot.eps" "Plot missing"
            }
        "#;

        let result = parse_pipeline(kdl, &registry());
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidReference(_)
        ));
    }

    #[test]
    fn test_command_and_callback_conflict() {
        let kdl = r#"
            pipeline "p"
            step "both" callback="report" {
                run "./both"
            }
        "#;

        let result = parse_pipeline(kdl, &registry());
        assert!(matches!(result.unwrap_err(), ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_step_without_action() {
        let kdl = r#"
            pipeline "p"
            step "idle" {
                check "x" "y"
            }
        "#;

        let result = parse_pipeline(kdl, &registry());
        assert!(matches!(result.unwrap_err(), ConfigError::MissingField(_)));
    }

    #[test]
    fn test_duplicate_step() {
        let kdl = r#"
            pipeline "p"
            step "a" { run "./a"; }
            step "a" { run "./a"; }
        "#;

        let result = parse_pipeline(kdl, &registry());
        assert!(matches!(result.unwrap_err(), ConfigError::Duplicate(_)));
    }

    #[test]
    fn test_missing_pipeline_name() {
        let kdl = r#"
            step "a" { run "./a"; }
        "#;

        let result = parse_pipeline(kdl, &registry());
        assert!(matches!(result.unwrap_err(), ConfigError::MissingField(_)));
    }
}
