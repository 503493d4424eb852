//! Decomposition of tools into independently searchable slices.

use super::types::{SliceKind, Tool, ToolSlice};
use crate::embedding::{embed_chunked, EmbeddingProvider};
use crate::error::{AppError, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

#[derive(Serialize)]
struct OverviewContent<'a> {
    #[serde(rename = "ToolName")]
    name: &'a str,
    #[serde(rename = "ToolDescription")]
    description: &'a str,
}

#[derive(Serialize)]
struct ParameterContent<'a> {
    #[serde(rename = "ArgName")]
    name: &'a str,
    #[serde(rename = "ArgDescription")]
    description: &'a str,
}

/// A tool that could not be sliced during a batch run.
#[derive(Debug)]
pub struct SliceFailure {
    pub tool_id: Uuid,
    pub tool_name: String,
    pub error: AppError,
}

/// Outcome of [`Slicer::slice_tools`]. Each tool appears in exactly one of
/// the two lists.
#[derive(Debug, Default)]
pub struct SliceBatch {
    pub slices: Vec<(Uuid, Vec<ToolSlice>)>,
    pub failures: Vec<SliceFailure>,
}

/// Cuts a tool into one overview slice and one slice per argument, then
/// embeds them in provider-sized batches.
pub struct Slicer {
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Slicer {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder }
    }

    /// Slice contents in order: the overview first, then the arguments in
    /// declaration order. Contents are compact JSON with a fixed field order.
    pub fn slice(&self, tool: &Tool) -> Vec<(String, SliceKind)> {
        let mut contents = Vec::with_capacity(tool.args.len() + 1);

        contents.push((
            to_json(&OverviewContent {
                name: &tool.name,
                description: &tool.description,
            }),
            SliceKind::Overview,
        ));

        for arg in &tool.args {
            contents.push((
                to_json(&ParameterContent {
                    name: &arg.name,
                    description: &arg.description,
                }),
                SliceKind::Parameter,
            ));
        }

        contents
    }

    /// Slice and embed one tool. Any failed batch fails the whole tool and
    /// no slices are returned for it.
    pub async fn embed_slices(&self, tool: &Tool) -> Result<Vec<ToolSlice>> {
        let start = Instant::now();
        let (texts, kinds): (Vec<String>, Vec<SliceKind>) = self.slice(tool).into_iter().unzip();

        let vectors = embed_chunked(self.embedder.as_ref(), &texts).await?;

        let slices: Vec<ToolSlice> = vectors
            .into_iter()
            .zip(kinds)
            .map(|(embedding, kind)| ToolSlice {
                tool_id: tool.id,
                kind,
                embedding,
            })
            .collect();

        tracing::debug!(
            tool_id = %tool.id,
            tool = %tool.name,
            slices = slices.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Tool sliced"
        );

        Ok(slices)
    }

    /// Slice many tools independently. A failing tool is recorded and the
    /// rest carry on.
    pub async fn slice_tools(&self, tools: &[Tool]) -> SliceBatch {
        let mut batch = SliceBatch::default();

        for tool in tools {
            match self.embed_slices(tool).await {
                Ok(slices) => batch.slices.push((tool.id, slices)),
                Err(error) => {
                    tracing::warn!(tool_id = %tool.id, tool = %tool.name, error = %error, "Slicing failed");
                    batch.failures.push(SliceFailure {
                        tool_id: tool.id,
                        tool_name: tool.name.clone(),
                        error,
                    });
                }
            }
        }

        batch
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    // Structs of string fields always serialize
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{check_batch, HashingEmbedder};
    use crate::ingestion::ToolArg;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tool_with_args(k: usize) -> Tool {
        let args = (0..k)
            .map(|i| ToolArg::new(format!("arg{}", i), format!("argument {}", i)))
            .collect();
        Tool::new("demo", "A demo tool", args)
    }

    /// Fails any batch containing the word "poison".
    struct FlakyProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }
        fn dimensions(&self) -> usize {
            2
        }
        fn max_batch_size(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            check_batch(self.name(), self.max_batch_size(), texts)?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| t.contains("poison")) {
                return Err(AppError::EmbeddingError("provider down".to_string()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[test]
    fn test_k_args_yield_k_plus_one_slices() {
        let slicer = Slicer::new(Arc::new(HashingEmbedder::new(8, 10)));
        for k in 0..5 {
            let contents = slicer.slice(&tool_with_args(k));
            assert_eq!(contents.len(), k + 1);
            assert_eq!(contents[0].1, SliceKind::Overview);
            assert!(contents[1..].iter().all(|(_, kind)| *kind == SliceKind::Parameter));
        }
    }

    #[test]
    fn test_slice_content_is_stable_json() {
        let slicer = Slicer::new(Arc::new(HashingEmbedder::new(8, 10)));
        let tool = Tool::new(
            "get_weather",
            "查询天气",
            vec![ToolArg::new("city", "城市名称")],
        );
        let contents = slicer.slice(&tool);
        assert_eq!(
            contents[0].0,
            r#"{"ToolName":"get_weather","ToolDescription":"查询天气"}"#
        );
        assert_eq!(contents[1].0, r#"{"ArgName":"city","ArgDescription":"城市名称"}"#);
    }

    #[tokio::test]
    async fn test_embed_slices_chunks_and_tags_owner() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
        });
        let slicer = Slicer::new(provider.clone());
        let tool = tool_with_args(4);

        let slices = slicer.embed_slices(&tool).await.unwrap();

        assert_eq!(slices.len(), 5);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(slices.iter().all(|s| s.tool_id == tool.id));
        assert_eq!(slices[0].kind, SliceKind::Overview);
    }

    #[tokio::test]
    async fn test_failed_chunk_discards_whole_tool() {
        let slicer = Slicer::new(Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
        }));
        let mut tool = tool_with_args(3);
        tool.args[2].description = "poison".to_string();

        assert!(slicer.embed_slices(&tool).await.is_err());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let slicer = Slicer::new(Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
        }));
        let good = tool_with_args(1);
        let bad = Tool::new("bad", "poison", vec![]);
        let also_good = tool_with_args(0);

        let batch = slicer
            .slice_tools(&[good.clone(), bad.clone(), also_good.clone()])
            .await;

        assert_eq!(batch.slices.len(), 2);
        assert_eq!(batch.slices[0].0, good.id);
        assert_eq!(batch.slices[1].0, also_good.id);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].tool_id, bad.id);
    }
}
