use crate::compress::{GzipNodeFactory, COMPRESS_GZIP};
use crate::debug::{DebugNodeFactory, FaultNodeFactory, DEBUG_LOG, FAULT_FAIL};
use crate::generate::{GeneratePayloadNodeFactory, GENERATE_PAYLOAD};
use crate::route::{RouteOnAttributeNodeFactory, ROUTE_ATTRIBUTE};
use crate::time::{SleepNodeFactory, TIME_SLEEP};
use crate::transform::{
    ExtractJsonNodeFactory, SplitTextNodeFactory, UpdateAttributeNodeFactory, ATTRIBUTE_UPDATE,
    JSON_EXTRACT, TEXT_SPLIT,
};
use statelesscore::FlowError;
use statelessruntime::{BundleCatalog, BundleManifest, BundleProvider, NodeRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const STANDARD_BUNDLE: &str = "stateless-standard";
pub const JSON_BUNDLE: &str = "stateless-json";
pub const COMPRESS_BUNDLE: &str = "stateless-compress";

const BUNDLE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// General-purpose processing: generation, logging, splitting, routing.
pub struct StandardBundle;

impl BundleProvider for StandardBundle {
    fn key(&self) -> &str {
        STANDARD_BUNDLE
    }

    fn load(&self) -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(GeneratePayloadNodeFactory));
        registry.register(Arc::new(DebugNodeFactory));
        registry.register(Arc::new(SleepNodeFactory));
        registry.register(Arc::new(SplitTextNodeFactory));
        registry.register(Arc::new(RouteOnAttributeNodeFactory));
        registry.register(Arc::new(UpdateAttributeNodeFactory));
        registry.register(Arc::new(FaultNodeFactory));
        registry
    }
}

pub struct JsonBundle;

impl BundleProvider for JsonBundle {
    fn key(&self) -> &str {
        JSON_BUNDLE
    }

    fn load(&self) -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(ExtractJsonNodeFactory));
        registry
    }
}

pub struct CompressBundle;

impl BundleProvider for CompressBundle {
    fn key(&self) -> &str {
        COMPRESS_BUNDLE
    }

    fn load(&self) -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(GzipNodeFactory));
        registry
    }
}

/// Catalog holding every built-in bundle provider.
pub fn catalog() -> BundleCatalog {
    let mut catalog = BundleCatalog::new();
    catalog.register(Arc::new(StandardBundle));
    catalog.register(Arc::new(JsonBundle));
    catalog.register(Arc::new(CompressBundle));
    catalog
}

pub fn standard_manifest() -> BundleManifest {
    [
        GENERATE_PAYLOAD,
        DEBUG_LOG,
        TIME_SLEEP,
        TEXT_SPLIT,
        ROUTE_ATTRIBUTE,
        ATTRIBUTE_UPDATE,
        FAULT_FAIL,
    ]
    .into_iter()
    .fold(
        BundleManifest::new(STANDARD_BUNDLE, BUNDLE_VERSION, STANDARD_BUNDLE),
        |manifest, type_id| manifest.with_extension(type_id),
    )
}

pub fn json_manifest() -> BundleManifest {
    BundleManifest::new(JSON_BUNDLE, BUNDLE_VERSION, JSON_BUNDLE).with_extension(JSON_EXTRACT)
}

pub fn compress_manifest() -> BundleManifest {
    BundleManifest::new(COMPRESS_BUNDLE, BUNDLE_VERSION, COMPRESS_BUNDLE).with_extension(COMPRESS_GZIP)
}

/// Install all built-in bundles into one library directory.
pub async fn install_all(library_dir: &Path) -> Result<Vec<PathBuf>, FlowError> {
    let mut installed = Vec::new();
    for manifest in [standard_manifest(), json_manifest(), compress_manifest()] {
        installed.push(manifest.install(library_dir).await?);
    }
    Ok(installed)
}
