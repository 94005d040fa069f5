//! Integration tests for the reverse-trigger index.

use pretty_assertions::assert_eq;
use slipway_core::ids::PipelineId;
use slipway_core::workflow::{WorkflowEdge, WorkflowGraph, WorkflowNode};
use slipway_tests::context::TestContext;
use slipway_tests::fixtures::PipelineFixture;

fn graph_with_external(src: &str) -> WorkflowGraph {
    WorkflowGraph {
        nodes: vec![
            WorkflowNode {
                name: "~commit".to_string(),
            },
            WorkflowNode {
                name: src.to_string(),
            },
            WorkflowNode {
                name: "main".to_string(),
            },
            WorkflowNode {
                name: "consume".to_string(),
            },
        ],
        edges: vec![
            WorkflowEdge {
                src: "~commit".to_string(),
                dest: "main".to_string(),
            },
            WorkflowEdge {
                src: src.to_string(),
                dest: "consume".to_string(),
            },
        ],
    }
}

#[tokio::test]
async fn test_rebuild_persists_one_row_per_external_edge() {
    let ctx = TestContext::new();
    let upstream = PipelineId::new();
    let src = format!("~sd@{}:publish", upstream);

    let mut pipeline = PipelineFixture::bare();
    pipeline.workflow_graph = graph_with_external(&src);

    ctx.services.trigger_index.rebuild(&pipeline).await.unwrap();

    let rows = ctx.triggers.all().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].src, src);
    assert_eq!(rows[0].dest, format!("~sd@{}:consume", pipeline.id));
}

#[tokio::test]
async fn test_rebuild_replaces_existing_rows() {
    let ctx = TestContext::new();
    let upstream = PipelineId::new();
    let src = format!("~sd@{}:publish", upstream);

    let mut pipeline = PipelineFixture::bare();
    pipeline.workflow_graph = graph_with_external(&src);
    ctx.services.trigger_index.rebuild(&pipeline).await.unwrap();
    ctx.services.trigger_index.rebuild(&pipeline).await.unwrap();
    assert_eq!(ctx.triggers.all().await.len(), 1);

    // Dropping the external edge empties the pipeline's rows.
    pipeline.workflow_graph = WorkflowGraph::new(["~commit", "main"], [("~commit", "main")]);
    ctx.services.trigger_index.rebuild(&pipeline).await.unwrap();
    assert!(ctx.triggers.all().await.is_empty());
}

#[tokio::test]
async fn test_downstream_lookup_by_src() {
    let ctx = TestContext::new();
    let upstream = PipelineId::new();
    let src = format!("~sd@{}:publish", upstream);

    let mut pipeline = PipelineFixture::bare();
    pipeline.workflow_graph = graph_with_external(&src);
    ctx.services.trigger_index.rebuild(&pipeline).await.unwrap();

    let downstream = ctx.services.trigger_index.downstream(&src).await.unwrap();
    assert_eq!(downstream.len(), 1);
    assert_eq!(downstream[0].dest, format!("~sd@{}:consume", pipeline.id));

    let none = ctx
        .services
        .trigger_index
        .downstream("~sd@missing:job")
        .await
        .unwrap();
    assert!(none.is_empty());
}
