//! Processing step definitions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::Result;

/// In-process work performed by a step, e.g. a physics calculation or
/// report templating. Receives the step's working directory.
#[async_trait]
pub trait StepCallback: Send + Sync {
    async fn run(&self, working_dir: &Path) -> Result<()>;
}

/// What a step does. A step is either an external command or a callback,
/// never both.
#[derive(Clone)]
pub enum StepAction {
    /// argv template, `${...}` variables are interpolated before running.
    Command(Vec<String>),
    /// Named in-process callback.
    Callback {
        name: String,
        callback: Arc<dyn StepCallback>,
    },
}

impl fmt::Debug for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::Command(argv) => f.debug_tuple("Command").field(argv).finish(),
            StepAction::Callback { name, .. } => {
                f.debug_struct("Callback").field("name", name).finish()
            }
        }
    }
}

/// A file expected relative to the step's working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCheck {
    pub path: String,
    pub message: String,
}

impl FileCheck {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// How to compile a step's program before running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRule {
    pub source: String,
    pub output: String,
    pub compiler: String,
    pub flags: Vec<String>,
}

impl CompileRule {
    pub const DEFAULT_COMPILER: &'static str = "gfortran";

    pub fn new(source: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            compiler: Self::DEFAULT_COMPILER.to_string(),
            flags: Vec::new(),
        }
    }

    pub fn with_compiler(mut self, compiler: impl Into<String>) -> Self {
        self.compiler = compiler.into();
        self
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    /// `[compiler, flags..., source, "-o", output]`
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.flags.len() + 4);
        argv.push(self.compiler.clone());
        argv.extend(self.flags.iter().cloned());
        argv.push(self.source.clone());
        argv.push("-o".to_string());
        argv.push(self.output.clone());
        argv
    }
}

/// One stage of the pipeline.
#[derive(Debug, Clone)]
pub struct ProcessingStep {
    /// Step name, unique within a pipeline.
    pub name: String,
    pub action: StepAction,
    /// Post-condition files, checked after the step ran.
    pub file_checks: Vec<FileCheck>,
    pub compile: Option<CompileRule>,
    /// Files that must exist before running; each is made executable.
    pub pre_checks: Vec<FileCheck>,
    /// Auxiliary programs invoked by the command, made executable.
    pub executables: Vec<String>,
    /// Subdirectory of the workspace to run in.
    pub working_dir: Option<String>,
}

impl ProcessingStep {
    pub fn command<I, S>(name: impl Into<String>, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_action(
            name,
            StepAction::Command(argv.into_iter().map(Into::into).collect()),
        )
    }

    pub fn callback(name: impl Into<String>, callback: Arc<dyn StepCallback>) -> Self {
        let name = name.into();
        Self::with_action(
            name.clone(),
            StepAction::Callback { name, callback },
        )
    }

    pub fn with_action(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            file_checks: Vec::new(),
            compile: None,
            pre_checks: Vec::new(),
            executables: Vec::new(),
            working_dir: None,
        }
    }

    pub fn check(mut self, path: impl Into<String>, message: impl Into<String>) -> Self {
        self.file_checks.push(FileCheck::new(path, message));
        self
    }

    pub fn pre_check(mut self, path: impl Into<String>, message: impl Into<String>) -> Self {
        self.pre_checks.push(FileCheck::new(path, message));
        self
    }

    pub fn compile(mut self, rule: CompileRule) -> Self {
        self.compile = Some(rule);
        self
    }

    pub fn executable(mut self, path: impl Into<String>) -> Self {
        self.executables.push(path.into());
        self
    }

    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn is_callback(&self) -> bool {
        matches!(self.action, StepAction::Callback { .. })
    }
}

/// Named callbacks available to pipeline definitions.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<String, Arc<dyn StepCallback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, callback: Arc<dyn StepCallback>) {
        self.callbacks.insert(name.into(), callback);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StepCallback>> {
        self.callbacks.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.callbacks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl StepCallback for Noop {
        async fn run(&self, _working_dir: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_compile_argv() {
        let rule = CompileRule::new("fault_plane.f90", "fault_plane")
            .with_flags(vec!["-O2".to_string()]);
        assert_eq!(
            rule.argv(),
            vec!["gfortran", "-O2", "fault_plane.f90", "-o", "fault_plane"]
        );
    }

    #[test]
    fn test_step_builder() {
        let step = ProcessingStep::command("tsunami", ["./tsunami"])
            .check("zfolder/green.dat", "Green data file missing")
            .check("zfolder/zmax_a.grd", "Zmax grid file missing");

        assert_eq!(step.file_checks.len(), 2);
        assert!(!step.is_callback());
        assert!(step.working_dir.is_none());
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = CallbackRegistry::new();
        registry.register("ttt_max", Arc::new(Noop));

        assert!(registry.get("ttt_max").is_some());
        assert!(registry.get("report").is_none());

        let step = ProcessingStep::callback("ttt_max", registry.get("ttt_max").unwrap());
        assert!(step.is_callback());
        assert!(format!("{:?}", step.action).contains("ttt_max"));
    }
}
