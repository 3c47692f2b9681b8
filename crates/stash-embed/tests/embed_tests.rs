use std::path::Path;

use stash_core::config::{EmbeddingProviderKind, EmbeddingSettings};
use stash_core::traits::EmbedMode;
use stash_embed::embedder_from_settings;

#[test]
fn hashing_provider_from_settings() {
    let settings = EmbeddingSettings { provider: EmbeddingProviderKind::Hashing, dim: 128, ..EmbeddingSettings::default() };
    let embedder = embedder_from_settings(&settings, Path::new(".")).expect("embedder");
    assert_eq!(embedder.dim(), 128);
    assert_eq!(embedder.id(), "hashing:d128");

    let texts = vec!["hello world".to_string(), "hello world".to_string(), "unrelated ramen".to_string()];
    let embs = embedder.embed_batch(&texts, EmbedMode::Document).expect("embed_batch");
    let v1 = &embs[0];
    let v2 = &embs[1];

    assert_eq!(v1.len(), 128, "embedding dim follows settings");

    // Norm approximately 1.0
    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");

    // Deterministic for same input
    for (a, b) in v1.iter().zip(v2.iter()) { assert!((a - b).abs() <= 1e-6); }

    let same: f32 = v1.iter().zip(v2).map(|(a, b)| a * b).sum();
    let other: f32 = v1.iter().zip(&embs[2]).map(|(a, b)| a * b).sum();
    assert!(same > other, "shared tokens are closer than disjoint ones");
}

#[test]
fn missing_model_dir_is_a_config_error() {
    let tmp = tempfile::tempdir().expect("tmp");
    let settings = EmbeddingSettings {
        provider: EmbeddingProviderKind::Local,
        model_dir: Some(tmp.path().join("nope").to_string_lossy().to_string()),
        ..EmbeddingSettings::default()
    };
    if std::env::var("APP_USE_FAKE_EMBEDDINGS").is_ok() || std::env::var("APP_MODEL_DIR").is_ok() || std::env::var("MODEL_DIR").is_ok() {
        return;
    }
    match embedder_from_settings(&settings, tmp.path()) {
        Err(e) => assert!(e.is_fatal(), "expected a config error, got {e}"),
        Ok(_) => panic!("no model files exist in the temp dir"),
    }
}
