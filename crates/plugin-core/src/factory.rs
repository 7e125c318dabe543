use std::sync::Arc;

use crate::{Plugin, PluginSpec};

/// Entry point each capability crate exposes to the bot.
pub trait PluginFactory {
    /// Push this plugin's default spec unless one with the same id is already present.
    ///
    /// # Arguments
    ///
    /// * `specs` - Specs collected so far (usually from `config.yaml`).
    fn register_defaults(&self, specs: &mut Vec<PluginSpec>);

    #[must_use]
    fn build(&self) -> Arc<dyn Plugin>;
}

/// Shared `register_defaults` body: a spec with `id` and no extra config.
pub fn push_default_spec(specs: &mut Vec<PluginSpec>, id: &str) {
    if !specs.iter().any(|s| s.id == id) {
        specs.push(PluginSpec::new(id));
    }
}
