//! Plugins compiled into the server

pub mod clock;
pub mod notes;

use std::sync::Arc;

use skein_mcp::plugin::{Plugin, PluginConfig, StaticPluginLoader};

pub use clock::ClockPlugin;
pub use notes::NotesPlugin;

/// Loader resolving the bundled plugin keys `clock` and `notes`
pub fn bundled_loader() -> StaticPluginLoader {
    StaticPluginLoader::new()
        .with("clock", |_config: &PluginConfig| Ok(Arc::new(ClockPlugin) as Arc<dyn Plugin>))
        .with("notes", |_config: &PluginConfig| {
            Ok(Arc::new(NotesPlugin::new()) as Arc<dyn Plugin>)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_mcp::plugin::PluginLoader;

    #[test]
    fn test_bundled_keys() {
        let mut keys = bundled_loader().available();
        keys.sort();
        assert_eq!(keys, vec!["clock".to_string(), "notes".to_string()]);
    }
}
