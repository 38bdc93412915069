use crate::transform::MIME_TYPE;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use statelesscore::{
    Node, NodeContext, NodeError, NodeOutput, NodeSchema, Payload, PropertyDescriptor, PropertyKind,
    PropertyMap,
};
use statelessruntime::NodeFactory;
use std::io::{Read, Write};

pub const COMPRESS_GZIP: &str = "compress.gzip";
pub const GZIP_MIME_TYPE: &str = "application/gzip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Compress,
    Decompress,
}

/// Gzip compression of payload content
pub struct GzipNode {
    mode: Mode,
    level: Compression,
}

impl GzipNode {
    fn compress(&self, content: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        encoder.write_all(content)?;
        encoder.finish()
    }

    fn decompress(content: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut decoded = Vec::new();
        GzDecoder::new(content).read_to_end(&mut decoded)?;
        Ok(decoded)
    }
}

#[async_trait]
impl Node for GzipNode {
    fn node_type(&self) -> &str {
        COMPRESS_GZIP
    }

    async fn on_trigger(&self, ctx: &NodeContext, input: Option<Payload>) -> Result<NodeOutput, NodeError> {
        let payload = input.unwrap_or_default();

        let result = match self.mode {
            Mode::Compress => self
                .compress(payload.content())
                .map(|bytes| payload.clone().with_content(bytes).with_attribute(MIME_TYPE, GZIP_MIME_TYPE)),
            Mode::Decompress => Self::decompress(payload.content())
                .map(|bytes| payload.clone().with_content(bytes).without_attribute(MIME_TYPE)),
        };

        match result {
            Ok(converted) => {
                tracing::debug!(
                    "{}: {:?} {} -> {} bytes",
                    ctx.node_id,
                    self.mode,
                    payload.size(),
                    converted.size()
                );
                Ok(NodeOutput::new().transfer("success", converted))
            }
            Err(e) => {
                ctx.bulletins.warn(format!("gzip {:?} failed: {}", self.mode, e));
                Ok(NodeOutput::new().transfer("failure", payload))
            }
        }
    }
}

pub struct GzipNodeFactory;

impl NodeFactory for GzipNodeFactory {
    fn create(&self, properties: &PropertyMap) -> Result<Box<dyn Node>, NodeError> {
        let mode = match properties.get_or("Mode", "compress").trim() {
            "compress" => Mode::Compress,
            "decompress" => Mode::Decompress,
            other => {
                return Err(NodeError::InvalidProperty {
                    name: "Mode".to_string(),
                    reason: format!("expected compress or decompress, got '{}'", other),
                })
            }
        };
        let level = properties.integer("Compression Level")?;
        if !(0..=9).contains(&level) {
            return Err(NodeError::InvalidProperty {
                name: "Compression Level".to_string(),
                reason: format!("{} is outside 0-9", level),
            });
        }

        Ok(Box::new(GzipNode {
            mode,
            level: Compression::new(level as u32),
        }))
    }

    fn node_type(&self) -> &str {
        COMPRESS_GZIP
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(COMPRESS_GZIP)
            .describe("Gzip-compresses or decompresses payload content")
            .string_property("Mode", Some("compress"))
            .property(
                PropertyDescriptor::new("Compression Level", PropertyKind::Integer)
                    .describe("0 (none) to 9 (best)")
                    .default_value("6"),
            )
            .relationship("success", "Converted payloads")
            .relationship("failure", "Content that could not be converted")
    }
}
