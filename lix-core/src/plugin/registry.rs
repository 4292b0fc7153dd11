//! Static plugin registry built when a lix is opened

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use wildmatch::WildMatch;

use super::{LixPlugin, PluginKind};
use crate::error::{LixError, Result};
use crate::schema::{LixFile, normalize_path};

/// Validated set of plugins with glob dispatch
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<RegisteredPlugin>,
    messages: Option<MessageMode>,
}

#[derive(Clone)]
struct RegisteredPlugin {
    plugin: Arc<dyn LixPlugin>,
    pattern: WildMatch,
}

#[derive(Clone)]
enum MessageMode {
    Legacy(Arc<dyn super::LoadSaveMessages>),
    ImportExport(Vec<Arc<dyn super::ImportExportFiles>>),
}

impl PluginRegistry {
    /// Validate and register the given plugins.
    ///
    /// # Errors
    ///
    /// Returns [`LixError::PluginConfiguration`] for duplicate keys, empty
    /// globs, more than one legacy message plugin, or legacy and
    /// import/export message plugins configured together.
    pub fn new(plugins: Vec<Arc<dyn LixPlugin>>) -> Result<Self> {
        let mut keys = HashSet::new();
        let mut legacy = Vec::new();
        let mut import_export = Vec::new();
        let mut registered = Vec::with_capacity(plugins.len());

        for plugin in plugins {
            let key = plugin.key().to_string();
            if key.is_empty() {
                return Err(LixError::PluginConfiguration(
                    "plugin key must not be empty".to_string(),
                ));
            }
            if !keys.insert(key.clone()) {
                return Err(LixError::PluginConfiguration(format!(
                    "duplicate plugin key '{}'",
                    key
                )));
            }
            if plugin.glob().trim().is_empty() {
                return Err(LixError::PluginConfiguration(format!(
                    "plugin '{}' has an empty glob",
                    key
                )));
            }

            match plugin.kind() {
                Some(PluginKind::Legacy(messages)) => legacy.push((key.clone(), messages)),
                Some(PluginKind::ImportExport(files)) => import_export.push((key.clone(), files)),
                None => {}
            }

            let pattern = WildMatch::new(&format!("/{}", plugin.glob().trim_start_matches('/')));
            registered.push(RegisteredPlugin { plugin, pattern });
        }

        if legacy.len() > 1 {
            let keys: Vec<_> = legacy.iter().map(|(key, _)| key.as_str()).collect();
            return Err(LixError::PluginConfiguration(format!(
                "only one plugin may use loadMessages/saveMessages, found: {}",
                keys.join(", ")
            )));
        }
        if !legacy.is_empty() && !import_export.is_empty() {
            return Err(LixError::PluginConfiguration(format!(
                "plugin '{}' uses loadMessages/saveMessages while '{}' uses importFiles/exportFiles",
                legacy[0].0, import_export[0].0
            )));
        }

        let messages = match legacy.pop() {
            Some((_, messages)) => Some(MessageMode::Legacy(messages)),
            None if !import_export.is_empty() => Some(MessageMode::ImportExport(
                import_export.into_iter().map(|(_, files)| files).collect(),
            )),
            None => None,
        };

        tracing::debug!(plugins = registered.len(), "Plugin registry initialized");
        Ok(Self {
            plugins: registered,
            messages,
        })
    }

    /// Registry without plugins
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a plugin by key
    pub fn get(&self, key: &str) -> Option<&Arc<dyn LixPlugin>> {
        self.plugins
            .iter()
            .find(|entry| entry.plugin.key() == key)
            .map(|entry| &entry.plugin)
    }

    /// Look up a plugin by key, failing if it is not loaded
    pub fn require(&self, key: &str) -> Result<&Arc<dyn LixPlugin>> {
        self.get(key)
            .ok_or_else(|| LixError::PluginNotFound(key.to_string()))
    }

    /// All plugins whose glob matches `path`, in registration order
    pub fn matching<'a>(&'a self, path: &str) -> impl Iterator<Item = &'a Arc<dyn LixPlugin>> + 'a {
        let path = normalize_path(path);
        self.plugins
            .iter()
            .filter(move |entry| entry.pattern.matches(&path))
            .map(|entry| &entry.plugin)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.plugins.iter().map(|entry| entry.plugin.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Load messages through whichever message mode is configured
    pub fn load_messages(&self, files: &[LixFile]) -> Result<Vec<Value>> {
        match &self.messages {
            Some(MessageMode::Legacy(plugin)) => plugin.load_messages(files),
            Some(MessageMode::ImportExport(plugins)) => {
                let mut messages = Vec::new();
                for plugin in plugins {
                    messages.extend(plugin.import_files(files)?);
                }
                Ok(messages)
            }
            None => Err(LixError::PluginConfiguration(
                "no plugin provides messages".to_string(),
            )),
        }
    }

    /// Save messages through whichever message mode is configured
    pub fn save_messages(&self, messages: &[Value], files: &[LixFile]) -> Result<Vec<LixFile>> {
        match &self.messages {
            Some(MessageMode::Legacy(plugin)) => plugin.save_messages(messages, files),
            Some(MessageMode::ImportExport(plugins)) => {
                let mut exported = Vec::new();
                for plugin in plugins {
                    exported.extend(plugin.export_files(messages)?);
                }
                Ok(exported)
            }
            None => Err(LixError::PluginConfiguration(
                "no plugin provides messages".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{DiffReport, ImportExportFiles, LoadSaveMessages};
    use serde_json::json;

    struct Legacy;

    impl LoadSaveMessages for Legacy {
        fn load_messages(&self, _files: &[LixFile]) -> Result<Vec<Value>> {
            Ok(vec![json!({"id": "hello", "text": "Hello"})])
        }

        fn save_messages(&self, messages: &[Value], _files: &[LixFile]) -> Result<Vec<LixFile>> {
            let data = serde_json::to_vec(messages)?;
            Ok(vec![LixFile::with_id("messages", "messages.json", data)])
        }
    }

    struct Exporter;

    impl ImportExportFiles for Exporter {
        fn import_files(&self, files: &[LixFile]) -> Result<Vec<Value>> {
            Ok(files.iter().map(|f| json!({"id": f.path})).collect())
        }

        fn export_files(&self, _messages: &[Value]) -> Result<Vec<LixFile>> {
            Ok(vec![])
        }
    }

    struct MockPlugin {
        key: &'static str,
        glob: &'static str,
        kind: Option<PluginKind>,
    }

    impl MockPlugin {
        fn arc(key: &'static str, glob: &'static str) -> Arc<dyn LixPlugin> {
            Arc::new(Self { key, glob, kind: None })
        }

        fn with_kind(key: &'static str, kind: PluginKind) -> Arc<dyn LixPlugin> {
            Arc::new(Self {
                key,
                glob: "*",
                kind: Some(kind),
            })
        }
    }

    impl LixPlugin for MockPlugin {
        fn key(&self) -> &str {
            self.key
        }

        fn glob(&self) -> &str {
            self.glob
        }

        fn diff_file(&self, _old: Option<&LixFile>, _neu: Option<&LixFile>) -> Result<Vec<DiffReport>> {
            Ok(vec![])
        }

        fn kind(&self) -> Option<PluginKind> {
            self.kind.clone()
        }
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let err = PluginRegistry::new(vec![
            MockPlugin::arc("csv", "*.csv"),
            MockPlugin::arc("csv", "*.tsv"),
        ])
        .unwrap_err();
        assert!(matches!(err, LixError::PluginConfiguration(_)));
    }

    #[test]
    fn test_legacy_with_import_export_rejected() {
        let err = PluginRegistry::new(vec![
            MockPlugin::with_kind("legacy", PluginKind::Legacy(Arc::new(Legacy))),
            MockPlugin::with_kind("modern", PluginKind::ImportExport(Arc::new(Exporter))),
        ])
        .unwrap_err();
        assert!(matches!(err, LixError::PluginConfiguration(_)));
    }

    #[test]
    fn test_two_legacy_plugins_rejected() {
        let err = PluginRegistry::new(vec![
            MockPlugin::with_kind("legacy-1", PluginKind::Legacy(Arc::new(Legacy))),
            MockPlugin::with_kind("legacy-2", PluginKind::Legacy(Arc::new(Legacy))),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("legacy-1"));
    }

    #[test]
    fn test_legacy_messages_dispatch() {
        let registry = PluginRegistry::new(vec![MockPlugin::with_kind(
            "legacy",
            PluginKind::Legacy(Arc::new(Legacy)),
        )])
        .unwrap();

        let messages = registry.load_messages(&[]).unwrap();
        assert_eq!(messages[0]["id"], "hello");

        let files = registry.save_messages(&messages, &[]).unwrap();
        assert_eq!(files[0].path, "/messages.json");
    }

    #[test]
    fn test_import_export_dispatch_collects_all_plugins() {
        let registry = PluginRegistry::new(vec![
            MockPlugin::with_kind("a", PluginKind::ImportExport(Arc::new(Exporter))),
            MockPlugin::with_kind("b", PluginKind::ImportExport(Arc::new(Exporter))),
        ])
        .unwrap();
        let file = LixFile::with_id("f", "de.json", b"{}".to_vec());
        assert_eq!(registry.load_messages(&[file]).unwrap().len(), 2);
    }

    #[test]
    fn test_no_message_plugin() {
        let registry = PluginRegistry::new(vec![MockPlugin::arc("csv", "*.csv")]).unwrap();
        assert!(registry.load_messages(&[]).is_err());
    }

    #[test]
    fn test_matching_uses_every_matching_plugin() {
        let registry = PluginRegistry::new(vec![
            MockPlugin::arc("json", "*.json"),
            MockPlugin::arc("csv", "*.csv"),
            MockPlugin::arc("all", "*"),
        ])
        .unwrap();

        let keys: Vec<_> = registry.matching("data/cities.csv").map(|p| p.key().to_string()).collect();
        assert_eq!(keys, vec!["csv", "all"]);
        assert_eq!(registry.matching("/notes.txt").count(), 1);
        assert!(registry.require("missing").is_err());
    }
}
