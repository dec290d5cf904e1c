//! Integration tests for search tenancy
//!
//! Drives `SearchPlanner::search()` end-to-end over the mock model host and
//! the in-memory embed index: the scope table (public/mine/all crossed with
//! anonymous/owner/stranger callers), soft-delete exclusion, hybrid score
//! composition, and result decoration.

use std::sync::Arc;
use uuid::Uuid;

use prism::model::{MockModelHost, ModelHost};
use prism::routing::Tier;
use prism::search::{SearchError, SearchPlanner};
use prism::storage::{
    EmbedIndex, FsBlobStore, MemoryEmbedIndex, SearchScope, UpsertImage, Visibility,
};
use prism::telemetry::MetricsRegistry;

const TEXT_BOOST_WEIGHT: f64 = 0.2;

struct Fixture {
    planner: SearchPlanner,
    host: Arc<MockModelHost>,
    index: Arc<MemoryEmbedIndex>,
    blob_dir: std::path::PathBuf,
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.blob_dir);
    }
}

fn fixture() -> Fixture {
    let host = Arc::new(MockModelHost::new());
    let index = Arc::new(MemoryEmbedIndex::new(true, TEXT_BOOST_WEIGHT));
    let blob_dir = std::env::temp_dir().join(format!("prism-search-test-{}", Uuid::new_v4()));
    let blobs = Arc::new(FsBlobStore::new(&blob_dir, "http://localhost:8000").unwrap());
    let planner = SearchPlanner::new(
        host.clone(),
        index.clone(),
        blobs,
        Arc::new(MetricsRegistry::new()),
    );
    Fixture {
        planner,
        host,
        index,
        blob_dir,
    }
}

async fn seed(
    index: &MemoryEmbedIndex,
    id: &str,
    caption: &str,
    vector: &[f32],
    owner: Uuid,
    visibility: Visibility,
) {
    index
        .upsert_image(UpsertImage {
            image_id: id,
            caption,
            confidence: 1.0,
            origin: Tier::Cloud,
            vector,
            format: "jpeg",
            size_bytes: 100,
            width: 8,
            height: 8,
            owner_user_id: Some(owner),
            visibility,
        })
        .await
        .unwrap();
}

fn ids(results: &prism::search::SearchResponse) -> Vec<&str> {
    results.results.iter().map(|r| r.id.as_str()).collect()
}

/// Seed the S7 pair: A{owner=u1, private}, B{owner=u2, public}
async fn seed_s7(f: &Fixture) -> (Uuid, Uuid) {
    let u1 = Uuid::new_v4();
    let u2 = Uuid::new_v4();
    let vec_a = f.host.embed_text("a red shoe").await.unwrap();
    let vec_b = f.host.embed_text("a blue car").await.unwrap();
    seed(&f.index, "image-a", "a red shoe", &vec_a, u1, Visibility::Private).await;
    seed(&f.index, "image-b", "a blue car", &vec_b, u2, Visibility::Public).await;
    (u1, u2)
}

#[tokio::test]
async fn test_anonymous_public_scope_sees_only_public() {
    let f = fixture();
    let (_, _) = seed_s7(&f).await;

    let response = f.planner.search("shoe", 10, SearchScope::Public, None).await.unwrap();
    assert_eq!(ids(&response), vec!["image-b"]);
}

#[tokio::test]
async fn test_owner_mine_scope_sees_only_own() {
    let f = fixture();
    let (u1, u2) = seed_s7(&f).await;

    let response = f
        .planner
        .search("shoe", 10, SearchScope::Mine, Some(u1))
        .await
        .unwrap();
    assert_eq!(ids(&response), vec!["image-a"]);

    let response = f
        .planner
        .search("car", 10, SearchScope::Mine, Some(u2))
        .await
        .unwrap();
    assert_eq!(ids(&response), vec!["image-b"]);
}

#[tokio::test]
async fn test_owner_all_scope_sees_own_plus_public() {
    let f = fixture();
    let (u1, _) = seed_s7(&f).await;

    let response = f
        .planner
        .search("anything", 10, SearchScope::All, Some(u1))
        .await
        .unwrap();
    let mut found = ids(&response);
    found.sort();
    assert_eq!(found, vec!["image-a", "image-b"]);
}

#[tokio::test]
async fn test_stranger_all_scope_sees_only_public() {
    let f = fixture();
    seed_s7(&f).await;
    let stranger = Uuid::new_v4();

    let response = f
        .planner
        .search("anything", 10, SearchScope::All, Some(stranger))
        .await
        .unwrap();
    assert_eq!(ids(&response), vec!["image-b"]);

    // And mine for the stranger is empty, not an error
    let response = f
        .planner
        .search("anything", 10, SearchScope::Mine, Some(stranger))
        .await
        .unwrap();
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn test_anonymous_private_scopes_are_unauthenticated() {
    let f = fixture();
    seed_s7(&f).await;

    for scope in [SearchScope::Mine, SearchScope::All] {
        let result = f.planner.search("anything", 10, scope, None).await;
        assert!(matches!(result, Err(SearchError::Unauthenticated)));
    }
}

#[tokio::test]
async fn test_soft_deleted_rows_never_surface() {
    let f = fixture();
    let (u1, _) = seed_s7(&f).await;
    f.index.soft_delete_image("image-b").await.unwrap();

    let response = f.planner.search("car", 10, SearchScope::Public, None).await.unwrap();
    assert!(response.results.is_empty());

    let response = f
        .planner
        .search("car", 10, SearchScope::All, Some(u1))
        .await
        .unwrap();
    assert_eq!(ids(&response), vec!["image-a"]);
}

#[tokio::test]
async fn test_hybrid_score_composition() {
    let f = fixture();
    let owner = Uuid::new_v4();
    // Both rows carry the exact vector the query will embed to, so the
    // cosine term is 1.0 for each and only the keyword boost differs
    let query = "red shoe";
    let shared_vec = f.host.embed_text(query).await.unwrap();
    seed(&f.index, "with-term", "a red shoe on sand", &shared_vec, owner, Visibility::Public).await;
    seed(&f.index, "without-term", "a blue car at dusk", &shared_vec, owner, Visibility::Public).await;

    let response = f.planner.search(query, 10, SearchScope::Public, None).await.unwrap();
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].id, "with-term");

    let boosted = response.results[0].score;
    let plain = response.results[1].score;
    assert!((boosted - plain - TEXT_BOOST_WEIGHT).abs() < 1e-6);
    assert!((plain - 1.0).abs() < 1e-4);
}

#[tokio::test]
async fn test_k_bounds_result_count() {
    let f = fixture();
    let owner = Uuid::new_v4();
    for i in 0..5 {
        let caption = format!("scene number {}", i);
        let vec = f.host.embed_text(&caption).await.unwrap();
        seed(
            &f.index,
            &format!("image-{}", i),
            &caption,
            &vec,
            owner,
            Visibility::Public,
        )
        .await;
    }

    let response = f.planner.search("scene", 3, SearchScope::Public, None).await.unwrap();
    assert_eq!(response.results.len(), 3);
}

#[tokio::test]
async fn test_results_carry_content_urls() {
    let f = fixture();
    seed_s7(&f).await;

    let response = f.planner.search("car", 10, SearchScope::Public, None).await.unwrap();
    assert_eq!(response.query, "car");
    let hit = &response.results[0];
    assert_eq!(
        hit.download_url,
        "http://localhost:8000/images/image-b/download"
    );
    assert_eq!(
        hit.thumbnail_url,
        "http://localhost:8000/images/image-b/thumbnail"
    );
    assert_eq!(hit.caption.as_deref(), Some("a blue car"));
}
