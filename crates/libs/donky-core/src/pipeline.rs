use crate::core::DonkyCore;
use crate::error::{code, DonkyError, ErrorCategory};
use crate::subscription::ModuleDefinition;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// One step of the ordered start-up pipeline. Modules register their
/// subscriptions and seed whatever state they need in `initialise`.
#[async_trait]
pub trait ModuleInitialiser: Send + Sync {
    fn module(&self) -> ModuleDefinition;

    async fn initialise(&self, core: &DonkyCore) -> Result<(), DonkyError>;
}

/// Runs module initialisers strictly in order, short-circuiting on the
/// first failure. The error names the module that failed; modules after
/// it are never started.
pub async fn run_initialisation(
    core: &DonkyCore,
    initialisers: Vec<Box<dyn ModuleInitialiser>>,
) -> Result<(), DonkyError> {
    for initialiser in initialisers {
        let module = initialiser.module();
        log::info!("init: starting module {} v{}", module.name, module.version);
        if let Err(err) = initialiser.initialise(core).await {
            log::warn!("init: module {} failed: {err}", module.name);
            return Err(DonkyError::new(
                code::MODULE_INITIALISATION_FAILED,
                ErrorCategory::Internal,
                format!("module '{}' failed to initialise: {}", module.name, err.message),
            )
            .with_detail("module", JsonValue::String(module.name))
            .with_detail("cause", JsonValue::String(err.machine_code)));
        }
    }
    Ok(())
}
