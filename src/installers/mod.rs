//! # Installers
//!
//! Each installer contributes one top-level task per command phase. The task
//! bodies expand into the installer's own sequence when they run, so manifest
//! templates are read against the settings of that run.

pub mod cleanup;
pub mod common;
pub mod olm;
pub mod operator;
pub mod templates;

use crate::config::InstallerKind;
use crate::task::Task;

pub use olm::OlmInstaller;
pub use operator::OperatorInstaller;
pub use templates::Templates;

/// Install, update and removal steps of one installation method
pub trait Installer: Send + Sync + std::fmt::Debug {
    fn deploy_tasks(&self) -> Task;

    fn pre_update_tasks(&self) -> Task;

    fn update_tasks(&self) -> Task;

    fn delete_tasks(&self) -> Task;
}

/// Installer implementing `kind`
pub fn installer_for(kind: InstallerKind, templates: Templates) -> Box<dyn Installer> {
    match kind {
        InstallerKind::Operator => Box::new(OperatorInstaller::new(templates)),
        InstallerKind::Olm => Box::new(OlmInstaller::new(templates)),
    }
}
