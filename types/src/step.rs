use std::fmt;

use serde::{Deserialize, Serialize};

/// The eight bootstrap steps, in the only order they may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    SelectBase,
    Workdir,
    InstallSystem,
    CopyManifest,
    InstallDependencies,
    CopySource,
    CopyConfigTemplate,
    DeclareEntrypoint,
}

impl Step {
    pub const ALL: [Step; 8] = [
        Step::SelectBase,
        Step::Workdir,
        Step::InstallSystem,
        Step::CopyManifest,
        Step::InstallDependencies,
        Step::CopySource,
        Step::CopyConfigTemplate,
        Step::DeclareEntrypoint,
    ];

    /// 1-based position in the pipeline.
    #[must_use]
    pub fn number(self) -> usize {
        self as usize + 1
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Step::SelectBase => "select-base",
            Step::Workdir => "workdir",
            Step::InstallSystem => "install-system",
            Step::CopyManifest => "copy-manifest",
            Step::InstallDependencies => "install-dependencies",
            Step::CopySource => "copy-source",
            Step::CopyConfigTemplate => "copy-config-template",
            Step::DeclareEntrypoint => "declare-entrypoint",
        }
    }

    /// The step that must have completed before this one may start.
    #[must_use]
    pub fn predecessor(self) -> Option<Step> {
        let idx = self as usize;
        idx.checked_sub(1).map(|i| Self::ALL[i])
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
