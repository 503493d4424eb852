//! End-to-end retrieval tests over the sample tool catalog.
//!
//! Index the three sample tools and check that each query routes to the
//! expected tool through the whole funnel, for both similarity backends.

use serde_json::{json, Value};
use std::sync::Arc;
use toolsift::{
    config::VectorBackend,
    embedding::{EmbeddingProvider, HashingEmbedder},
    rerank::LexicalReranker,
    AppState, Config,
};
use uuid::Uuid;

const STOCK_ID: Uuid = Uuid::from_u128(0x5704c);
const WEATHER_ID: Uuid = Uuid::from_u128(0x3ea7);
const SEARCH_ID: Uuid = Uuid::from_u128(0x5ea4c);

fn sample_tools() -> Vec<Value> {
    vec![
        json!({
            "uuid": STOCK_ID,
            "ToolName": "get_stock_price",
            "ToolDescription": "用于查询指定股票代码的实时价格。",
            "Args": [
                { "ArgName": "symbol", "ArgDescription": "股票代码，例如：AAPL、MSFT。" },
                { "ArgName": "id", "ArgDescription": "股票编号" }
            ]
        }),
        json!({
            "uuid": WEATHER_ID,
            "ToolName": "get_weather",
            "ToolDescription": "查询指定城市当前的天气状况。",
            "Args": [
                { "ArgName": "city", "ArgDescription": "城市名称，例如：北京、New York。" }
            ]
        }),
        json!({
            "uuid": SEARCH_ID,
            "ToolName": "search_web",
            "ToolDescription": "一个通用的网络搜索工具，可以查询新闻和网页。",
            "Args": [
                { "ArgName": "query", "ArgDescription": "用户的搜索关键词。" }
            ]
        }),
    ]
}

async fn indexed_state(backend: VectorBackend) -> Arc<AppState> {
    let config = Config {
        vector_backend: backend,
        ..Config::default()
    };
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::new(
        config.embedding_dim,
        config.embedding_batch_size,
    ));
    let reranker = Arc::new(LexicalReranker::new(Arc::clone(&embedder)));
    let state = AppState::from_parts(config, embedder, reranker).expect("Failed to create AppState");

    let report = state.pipeline.index_definitions(sample_tools()).await;
    assert_eq!(report.indexed.len(), 3, "failures: {:?}", report.failures);

    Arc::new(state)
}

async fn top_tool(state: &AppState, query: &str) -> String {
    let tools = state.pipeline.search_tools(query).await.unwrap();
    assert!(!tools.is_empty(), "no results for {}", query);
    tools[0].name.clone()
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_stock_query_routes_to_stock_price() {
    let state = indexed_state(VectorBackend::Linear).await;

    let results = state.pipeline.search("查询AAPL股票").await.unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].tool.name, "get_stock_price");
    assert!(results[0].score > results[1].score);
    assert!(results.iter().all(|r| !r.degraded));
    assert_eq!(results.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_weather_query_routes_to_weather() {
    let state = indexed_state(VectorBackend::Linear).await;
    assert_eq!(top_tool(&state, "天气怎么样？").await, "get_weather");
}

#[tokio::test]
async fn test_web_query_routes_to_search() {
    let state = indexed_state(VectorBackend::Linear).await;
    assert_eq!(top_tool(&state, "搜索网页信息").await, "search_web");
}

#[tokio::test]
async fn test_hnsw_backend_matches_linear_ordering() {
    let linear = indexed_state(VectorBackend::Linear).await;
    let hnsw = indexed_state(VectorBackend::Hnsw).await;

    for query in ["查询AAPL股票", "天气怎么样？", "搜索网页信息"] {
        let a: Vec<Uuid> = linear.pipeline.search(query).await.unwrap().iter().map(|r| r.tool_id).collect();
        let b: Vec<Uuid> = hnsw.pipeline.search(query).await.unwrap().iter().map(|r| r.tool_id).collect();
        assert_eq!(a, b, "ordering differs for {}", query);
    }
    assert_eq!(top_tool(&hnsw, "查询AAPL股票").await, "get_stock_price");
}

#[tokio::test]
async fn test_top_k_limits_final_results() {
    let state = indexed_state(VectorBackend::Linear).await;
    let funnel = toolsift::FunnelWidths::new(100, 20, 1);

    let results = state.pipeline.search_with("查询AAPL股票", funnel).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tool_id, STOCK_ID);
}

#[tokio::test]
async fn test_query_without_words_returns_nothing() {
    let state = indexed_state(VectorBackend::Linear).await;
    // No word characters, so the query embeds to a zero vector
    assert!(state.pipeline.search("？！，。").await.unwrap().is_empty());
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_reindexing_replaces_instead_of_duplicating() {
    let state = indexed_state(VectorBackend::Linear).await;
    let before = state.pipeline.stats().await.unwrap();

    let report = state.pipeline.index_definitions(sample_tools()).await;
    assert_eq!(report.indexed, vec![STOCK_ID, WEATHER_ID, SEARCH_ID]);

    let after = state.pipeline.stats().await.unwrap();
    assert_eq!(after.tools, 3);
    assert_eq!(after.slices, before.slices);
    assert_eq!(after.slices, 7);

    let results = state.pipeline.search("查询AAPL股票").await.unwrap();
    let mut ids: Vec<Uuid> = results.iter().map(|r| r.tool_id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), results.len());
    assert_eq!(results[0].tool_id, STOCK_ID);
}

#[tokio::test]
async fn test_reindex_with_new_content_drops_stale_slices() {
    let state = indexed_state(VectorBackend::Hnsw).await;

    let updated = vec![json!({
        "uuid": STOCK_ID,
        "ToolName": "get_stock_price",
        "ToolDescription": "用于查询指定股票代码的实时价格。",
        "Args": [{ "ArgName": "symbol", "ArgDescription": "股票代码" }]
    })];
    state.pipeline.index_definitions(updated).await;

    let stats = state.pipeline.stats().await.unwrap();
    assert_eq!(stats.slices, 6);

    let stored = state.pipeline.get_tool(&STOCK_ID).await.unwrap().unwrap();
    assert_eq!(stored.args.len(), 1);
}
