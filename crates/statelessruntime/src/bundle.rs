//! Extension bundle discovery, loading and resolution.
//!
//! A library directory holds one sub-directory per bundle:
//! ```text
//! {library}/
//! └── stateless-json--0.1.0/
//!     └── manifest.json
//! ```
//! The manifest names the bundle, the provider that implements it and the
//! extension types it exports. Providers are compiled into the binary and
//! registered in a [`BundleCatalog`]; loading a bundle asks its provider for
//! a fresh [`NodeRegistry`] that only that bundle can see.

use crate::registry::{NodeFactory, NodeRegistry};
use serde::{Deserialize, Serialize};
use statelesscore::{FlowError, ResolveWarning};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::sync::OnceCell;

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub name: String,
    pub version: String,
    /// Key of the [`BundleProvider`] that implements this bundle
    pub provider: String,
    /// Extension types visible outside the bundle
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl BundleManifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            provider: provider.into(),
            extensions: Vec::new(),
        }
    }

    pub fn with_extension(mut self, type_id: impl Into<String>) -> Self {
        self.extensions.push(type_id.into());
        self
    }

    pub fn coordinate(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    /// Directory name used inside a library directory
    pub fn dir_name(&self) -> String {
        format!("{}--{}", self.name, self.version)
    }

    pub fn exports(&self, type_id: &str) -> bool {
        self.extensions.iter().any(|e| e == type_id)
    }

    /// Write this manifest as a bundle directory under `library_dir`.
    pub async fn install(&self, library_dir: &Path) -> Result<PathBuf, FlowError> {
        let bundle_dir = library_dir.join(self.dir_name());
        fs::create_dir_all(&bundle_dir).await?;
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(bundle_dir.join(MANIFEST_FILE), json).await?;
        Ok(bundle_dir)
    }
}

/// Compiled-in implementation of a bundle.
pub trait BundleProvider: Send + Sync {
    /// Key referenced by a manifest's `provider` field
    fn key(&self) -> &str;

    /// Build a fresh registry holding every type this bundle implements,
    /// including types it does not export.
    fn load(&self) -> NodeRegistry;
}

/// The providers available to the resolver.
#[derive(Default)]
pub struct BundleCatalog {
    providers: HashMap<String, Arc<dyn BundleProvider>>,
}

impl BundleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn BundleProvider>) {
        self.providers.insert(provider.key().to_string(), provider);
    }

    pub fn provider(&self, key: &str) -> Option<&Arc<dyn BundleProvider>> {
        self.providers.get(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.providers.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// A bundle whose provider has been loaded into its own registry.
pub struct LoadedBundle {
    pub manifest: BundleManifest,
    pub directory: PathBuf,
    registry: NodeRegistry,
}

impl LoadedBundle {
    /// Factory for an exported type; internal types stay invisible.
    pub fn factory(&self, type_id: &str) -> Option<&Arc<dyn NodeFactory>> {
        if !self.manifest.exports(type_id) {
            return None;
        }
        self.registry.factory(type_id)
    }
}

#[derive(Debug, Clone)]
pub struct IndexedBundle {
    pub manifest: BundleManifest,
    pub directory: PathBuf,
}

/// Manifests found in one library directory, ordered by directory name.
#[derive(Debug, Clone)]
pub struct LibraryIndex {
    pub directory: PathBuf,
    pub bundles: Vec<IndexedBundle>,
}

impl LibraryIndex {
    pub async fn scan(directory: &Path) -> Result<Self, FlowError> {
        if !fs::metadata(directory).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(FlowError::Configuration(format!(
                "library directory '{}' does not exist",
                directory.display()
            )));
        }

        let mut bundles = Vec::new();
        let mut entries = fs::read_dir(directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            let manifest_path = path.join(MANIFEST_FILE);
            let content = match fs::read_to_string(&manifest_path).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("Skipping '{}': no readable manifest ({})", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_str::<BundleManifest>(&content) {
                Ok(manifest) => bundles.push(IndexedBundle {
                    manifest,
                    directory: path,
                }),
                Err(e) => {
                    tracing::warn!("Skipping '{}': invalid manifest ({})", path.display(), e);
                }
            }
        }
        bundles.sort_by(|a, b| a.directory.cmp(&b.directory));

        tracing::debug!(
            "Indexed {} bundle(s) in {}",
            bundles.len(),
            directory.display()
        );
        Ok(Self {
            directory: directory.to_path_buf(),
            bundles,
        })
    }

    pub fn provider_of(&self, type_id: &str) -> Option<&IndexedBundle> {
        self.bundles.iter().find(|b| b.manifest.exports(type_id))
    }
}

/// Ordered library directories; the first one is the primary directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectorySetKey(Vec<PathBuf>);

impl DirectorySetKey {
    pub fn new(primary: &Path, additional: &[PathBuf]) -> Self {
        let mut dirs = Vec::with_capacity(additional.len() + 1);
        dirs.push(primary.to_path_buf());
        dirs.extend(additional.iter().cloned());
        Self(dirs)
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.0
    }
}

/// Indexes for one directory set plus the bundles loaded from it so far.
struct BundleSet {
    indexes: Vec<LibraryIndex>,
    loaded: tokio::sync::Mutex<HashMap<PathBuf, Arc<LoadedBundle>>>,
}

/// Extension types bound to the bundles that provide them.
pub struct ResolvedExtensions {
    bindings: HashMap<String, Arc<LoadedBundle>>,
    pub warnings: Vec<ResolveWarning>,
}

impl ResolvedExtensions {
    pub fn factory(&self, type_id: &str) -> Option<&Arc<dyn NodeFactory>> {
        self.bindings.get(type_id).and_then(|b| b.factory(type_id))
    }

    pub fn bundle_for(&self, type_id: &str) -> Option<&LoadedBundle> {
        self.bindings.get(type_id).map(|b| b.as_ref())
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.bindings.keys().cloned().collect();
        types.sort();
        types
    }
}

type ResolutionKey = (DirectorySetKey, BTreeSet<String>);

/// Resolves extension types against ordered library directories.
///
/// Directory sets are indexed once per distinct key, each bundle is loaded at
/// most once per key, and complete resolutions are cached by
/// (directory set, required types).
pub struct BundleResolver {
    catalog: Arc<BundleCatalog>,
    sets: Mutex<HashMap<DirectorySetKey, Arc<OnceCell<Arc<BundleSet>>>>>,
    resolutions: Mutex<HashMap<ResolutionKey, Arc<ResolvedExtensions>>>,
}

impl BundleResolver {
    pub fn new(catalog: Arc<BundleCatalog>) -> Self {
        Self {
            catalog,
            sets: Mutex::new(HashMap::new()),
            resolutions: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<BundleCatalog> {
        &self.catalog
    }

    /// Bind every required type to a bundle, searching the primary
    /// directory first and then each additional directory in order.
    pub async fn resolve(
        &self,
        required: &BTreeSet<String>,
        primary: &Path,
        additional: &[PathBuf],
    ) -> Result<Arc<ResolvedExtensions>, FlowError> {
        let key = DirectorySetKey::new(primary, additional);
        let resolution_key = (key.clone(), required.clone());
        if let Some(cached) = self.lock_resolutions().get(&resolution_key) {
            return Ok(cached.clone());
        }

        let set = self.bundle_set(&key).await?;

        let mut chosen: Vec<(String, &IndexedBundle)> = Vec::new();
        let mut missing = Vec::new();
        let mut warnings = Vec::new();
        for type_id in required {
            let mut providers = set.indexes.iter().filter_map(|idx| idx.provider_of(type_id));
            match providers.next() {
                Some(first) => {
                    for shadowed in providers {
                        let warning = ResolveWarning::DirectoryResolutionConflict {
                            type_id: type_id.clone(),
                            chosen: first.directory.display().to_string(),
                            shadowed: shadowed.directory.display().to_string(),
                        };
                        tracing::warn!("{}", warning);
                        warnings.push(warning);
                    }
                    chosen.push((type_id.clone(), first));
                }
                None => missing.push(type_id.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(FlowError::UnresolvedExtension(missing.join(", ")));
        }

        let mut bindings = HashMap::new();
        for (type_id, indexed) in chosen {
            let bundle = self.load_bundle(&set, indexed).await?;
            if bundle.factory(&type_id).is_none() {
                return Err(FlowError::UnresolvedExtension(format!(
                    "{} (bundle {} exports it but provider '{}' does not implement it)",
                    type_id,
                    bundle.manifest.coordinate(),
                    bundle.manifest.provider
                )));
            }
            tracing::debug!("Resolved {} -> {}", type_id, bundle.manifest.coordinate());
            bindings.insert(type_id, bundle);
        }

        let resolved = Arc::new(ResolvedExtensions { bindings, warnings });
        self.lock_resolutions()
            .insert(resolution_key, resolved.clone());
        Ok(resolved)
    }

    /// Every bundle visible from the given directories, in search order.
    pub async fn discover(
        &self,
        primary: &Path,
        additional: &[PathBuf],
    ) -> Result<Vec<IndexedBundle>, FlowError> {
        let set = self.bundle_set(&DirectorySetKey::new(primary, additional)).await?;
        Ok(set
            .indexes
            .iter()
            .flat_map(|idx| idx.bundles.iter().cloned())
            .collect())
    }

    /// Number of bundles loaded for a directory set.
    pub async fn loaded_count(&self, primary: &Path, additional: &[PathBuf]) -> usize {
        let cell = self
            .lock_sets()
            .get(&DirectorySetKey::new(primary, additional))
            .cloned();
        match cell.and_then(|c| c.get().cloned()) {
            Some(set) => set.loaded.lock().await.len(),
            None => 0,
        }
    }

    /// Release every index, loaded bundle and cached resolution.
    pub fn clear(&self) {
        self.lock_sets().clear();
        self.lock_resolutions().clear();
    }

    async fn bundle_set(&self, key: &DirectorySetKey) -> Result<Arc<BundleSet>, FlowError> {
        let cell = self
            .lock_sets()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let set = cell
            .get_or_try_init(|| async {
                let mut indexes = Vec::with_capacity(key.directories().len());
                for dir in key.directories() {
                    indexes.push(LibraryIndex::scan(dir).await?);
                }
                Ok::<_, FlowError>(Arc::new(BundleSet {
                    indexes,
                    loaded: tokio::sync::Mutex::new(HashMap::new()),
                }))
            })
            .await?;
        Ok(set.clone())
    }

    async fn load_bundle(
        &self,
        set: &BundleSet,
        indexed: &IndexedBundle,
    ) -> Result<Arc<LoadedBundle>, FlowError> {
        // Held across the load so concurrent resolutions load a bundle once.
        let mut loaded = set.loaded.lock().await;
        if let Some(bundle) = loaded.get(&indexed.directory) {
            return Ok(bundle.clone());
        }

        let manifest = &indexed.manifest;
        let provider = self.catalog.provider(&manifest.provider).ok_or_else(|| {
            FlowError::UnresolvedExtension(format!(
                "bundle {} requires provider '{}', which is not available",
                manifest.coordinate(),
                manifest.provider
            ))
        })?;

        tracing::info!(
            "Loading bundle {} from {}",
            manifest.coordinate(),
            indexed.directory.display()
        );
        let bundle = Arc::new(LoadedBundle {
            manifest: manifest.clone(),
            directory: indexed.directory.clone(),
            registry: provider.load(),
        });
        loaded.insert(indexed.directory.clone(), bundle.clone());
        Ok(bundle)
    }

    fn lock_sets(&self) -> std::sync::MutexGuard<'_, HashMap<DirectorySetKey, Arc<OnceCell<Arc<BundleSet>>>>> {
        self.sets.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_resolutions(&self) -> std::sync::MutexGuard<'_, HashMap<ResolutionKey, Arc<ResolvedExtensions>>> {
        self.resolutions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use statelesscore::{Node, NodeContext, NodeError, NodeOutput, NodeSchema, Payload, PropertyMap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Tags payloads with the bundle it came from.
    struct TagNode {
        type_id: String,
        tag: &'static str,
    }

    #[async_trait]
    impl Node for TagNode {
        fn node_type(&self) -> &str {
            &self.type_id
        }

        async fn on_trigger(&self, _ctx: &NodeContext, input: Option<Payload>) -> Result<NodeOutput, NodeError> {
            let payload = input.unwrap_or_default().with_attribute("tag", self.tag);
            Ok(NodeOutput::new().transfer("success", payload))
        }
    }

    struct TagFactory {
        type_id: String,
        tag: &'static str,
    }

    impl NodeFactory for TagFactory {
        fn create(&self, _properties: &PropertyMap) -> Result<Box<dyn Node>, NodeError> {
            Ok(Box::new(TagNode {
                type_id: self.type_id.clone(),
                tag: self.tag,
            }))
        }

        fn node_type(&self) -> &str {
            &self.type_id
        }

        fn schema(&self) -> NodeSchema {
            NodeSchema::new(self.type_id.clone()).relationship("success", "")
        }
    }

    /// Provider registering an exported type plus an internal helper type.
    struct TagProvider {
        key: &'static str,
        exported: &'static str,
        tag: &'static str,
        loads: Arc<AtomicUsize>,
    }

    impl BundleProvider for TagProvider {
        fn key(&self) -> &str {
            self.key
        }

        fn load(&self) -> NodeRegistry {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let mut registry = NodeRegistry::new();
            for type_id in [self.exported, "internal.helper"] {
                registry.register(Arc::new(TagFactory {
                    type_id: type_id.to_string(),
                    tag: self.tag,
                }));
            }
            registry
        }
    }

    fn catalog(loads: &Arc<AtomicUsize>) -> Arc<BundleCatalog> {
        let mut catalog = BundleCatalog::new();
        for (key, exported, tag) in [("core", "core.tag", "core"), ("extra", "extra.tag", "extra")] {
            catalog.register(Arc::new(TagProvider {
                key,
                exported,
                tag,
                loads: loads.clone(),
            }));
        }
        Arc::new(catalog)
    }

    async fn library(manifests: &[BundleManifest]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for manifest in manifests {
            manifest.install(dir.path()).await.unwrap();
        }
        dir
    }

    fn core_manifest() -> BundleManifest {
        BundleManifest::new("core", "1.0.0", "core").with_extension("core.tag")
    }

    fn extra_manifest() -> BundleManifest {
        BundleManifest::new("extra", "1.0.0", "extra").with_extension("extra.tag")
    }

    fn types(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn type_only_in_additional_directory_needs_that_directory() {
        let loads = Arc::new(AtomicUsize::new(0));
        let primary = library(&[core_manifest()]).await;
        let secondary = library(&[extra_manifest()]).await;
        let resolver = BundleResolver::new(catalog(&loads));
        let required = types(&["core.tag", "extra.tag"]);

        let err = resolver
            .resolve(&required, primary.path(), &[])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FlowError::UnresolvedExtension(ref t) if t == "extra.tag"));

        let resolved = resolver
            .resolve(&required, primary.path(), &[secondary.path().to_path_buf()])
            .await
            .unwrap();
        assert_eq!(resolved.types(), vec!["core.tag", "extra.tag"]);
        assert!(resolved.warnings.is_empty());
    }

    #[tokio::test]
    async fn first_directory_wins_and_conflict_is_reported() {
        let loads = Arc::new(AtomicUsize::new(0));
        let primary = library(&[core_manifest()]).await;
        // A second bundle exporting the same type, implemented by another provider.
        let shadow = library(&[BundleManifest::new("shadow", "2.0.0", "extra").with_extension("core.tag")]).await;
        let resolver = BundleResolver::new(catalog(&loads));

        let resolved = resolver
            .resolve(&types(&["core.tag"]), primary.path(), &[shadow.path().to_path_buf()])
            .await
            .unwrap();
        assert_eq!(resolved.bundle_for("core.tag").unwrap().manifest.name, "core");
        assert_eq!(resolved.warnings.len(), 1);
        assert!(matches!(
            &resolved.warnings[0],
            ResolveWarning::DirectoryResolutionConflict { type_id, .. } if type_id == "core.tag"
        ));
    }

    #[tokio::test]
    async fn internal_types_stay_inside_their_bundle() {
        let loads = Arc::new(AtomicUsize::new(0));
        let primary = library(&[core_manifest(), extra_manifest()]).await;
        let resolver = BundleResolver::new(catalog(&loads));

        let err = resolver
            .resolve(&types(&["internal.helper"]), primary.path(), &[])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FlowError::UnresolvedExtension(_)));

        let resolved = resolver
            .resolve(&types(&["core.tag", "extra.tag"]), primary.path(), &[])
            .await
            .unwrap();
        let core = resolved.bundle_for("core.tag").unwrap();
        let extra = resolved.bundle_for("extra.tag").unwrap();
        assert!(core.factory("extra.tag").is_none());
        assert!(extra.factory("core.tag").is_none());
        assert_ne!(core.directory, extra.directory);
    }

    #[tokio::test]
    async fn bundles_load_once_per_directory_set() {
        let loads = Arc::new(AtomicUsize::new(0));
        let primary = library(&[core_manifest()]).await;
        let resolver = Arc::new(BundleResolver::new(catalog(&loads)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = resolver.clone();
            let path = primary.path().to_path_buf();
            handles.push(tokio::spawn(async move {
                resolver.resolve(&types(&["core.tag"]), &path, &[]).await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.loaded_count(primary.path(), &[]).await, 1);

        resolver.clear();
        assert_eq!(resolver.loaded_count(primary.path(), &[]).await, 0);
    }

    #[tokio::test]
    async fn scan_skips_files_and_directories_without_manifests() {
        let dir = library(&[core_manifest()]).await;
        fs::write(dir.path().join("README.txt"), "not a bundle").await.unwrap();
        fs::create_dir_all(dir.path().join("empty--0.0.1")).await.unwrap();

        let index = LibraryIndex::scan(dir.path()).await.unwrap();
        assert_eq!(index.bundles.len(), 1);
        assert_eq!(index.bundles[0].manifest.name, "core");
        assert!(index.provider_of("core.tag").is_some());
    }

    #[tokio::test]
    async fn missing_provider_and_missing_directory() {
        let loads = Arc::new(AtomicUsize::new(0));
        let primary = library(&[BundleManifest::new("ghost", "0.1.0", "nowhere").with_extension("ghost.node")]).await;
        let resolver = BundleResolver::new(catalog(&loads));

        let err = resolver
            .resolve(&types(&["ghost.node"]), primary.path(), &[])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FlowError::UnresolvedExtension(ref m) if m.contains("nowhere")));

        let err = resolver
            .resolve(&types(&["core.tag"]), Path::new("/definitely/not/here"), &[])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FlowError::Configuration(_)));
    }
}
