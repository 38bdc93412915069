//! Built-in extension bundles
//!
//! Node types shipped with the engine, grouped into three bundles that a
//! library directory can hold independently: standard, json and compress.

mod bundles;
mod compress;
mod debug;
mod generate;
mod route;
mod time;
mod transform;

pub use bundles::{
    catalog, compress_manifest, install_all, json_manifest, standard_manifest, CompressBundle,
    JsonBundle, StandardBundle, COMPRESS_BUNDLE, JSON_BUNDLE, STANDARD_BUNDLE,
};
pub use compress::{GzipNode, GzipNodeFactory, COMPRESS_GZIP, GZIP_MIME_TYPE};
pub use debug::{DebugNode, DebugNodeFactory, FaultNode, FaultNodeFactory, DEBUG_LOG, FAULT_FAIL};
pub use generate::{GeneratePayloadNode, GeneratePayloadNodeFactory, GENERATE_PAYLOAD};
pub use route::{RouteOnAttributeNode, RouteOnAttributeNodeFactory, ROUTE_ATTRIBUTE};
pub use time::{SleepNode, SleepNodeFactory, TIME_SLEEP};
pub use transform::{
    ExtractJsonNode, ExtractJsonNodeFactory, SplitTextNode, SplitTextNodeFactory,
    UpdateAttributeNode, UpdateAttributeNodeFactory, ATTRIBUTE_UPDATE, FRAGMENT_COUNT,
    FRAGMENT_INDEX, JSON_EXTRACT, MIME_TYPE, TEXT_SPLIT,
};
