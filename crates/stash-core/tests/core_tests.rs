use std::fs;
use std::io::Write;
use tempfile::TempDir;

use stash_core::config::Config;
use stash_core::document::{latest_versions, parse_records, to_indexed_document, IndexingPolicy};

#[test]
fn load_from_dir_layers_env_overlay() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    let mut f = fs::File::create(dir.join("config.toml")).unwrap();
    writeln!(f, "[storage]\nvector_table = \"items\"\n[search]\nrank_offset_constant = 20.0").unwrap();
    fs::write(dir.join("config.test.toml"), "[search]\nrank_offset_constant = 25.0\n").unwrap();

    std::env::set_var("RUST_ENV", "test");
    let config = Config::load_from(dir).expect("load");
    let settings = config.settings().expect("settings");

    assert_eq!(settings.storage.vector_table, "items");
    assert_eq!(settings.search.rank_offset_constant, 25.0, "env overlay wins over base file");
    assert_eq!(settings.storage.vector_db_path(config.base_dir()), dir.join("data/indexes/lancedb"));
}

#[test]
fn jsonl_batch_survives_bad_lines() {
    let jsonl = r##"{"item_id":"p1","version":1,"category":"food","summary":"ramen night"}
{"item_id":"p1","version":2,"category":"food","summary":"ramen night with friends"}
{"item_id":
{"item_id":"p2","headline":"   "}
{"item_id":"p3","tenant_id":"bob","hashtags":["#hike"]}"##;

    let values: Vec<serde_json::Value> = jsonl.lines().filter_map(|l| serde_json::from_str(l).ok()).collect();
    assert_eq!(values.len(), 4, "truncated line never reaches the parser");

    let (records, malformed) = parse_records(values);
    assert_eq!(malformed, 0);
    let (latest, superseded) = latest_versions(records);
    assert_eq!(superseded, 1);

    let docs: Vec<_> = latest.iter().filter_map(|r| to_indexed_document(r, IndexingPolicy::Unweighted).ok()).collect();
    let ids: Vec<&str> = docs.iter().map(|d| d.item_id.as_str()).collect();
    assert_eq!(ids, vec!["p1", "p3"], "blank p2 is skipped");
    assert_eq!(docs[0].flat_text, "ramen night with friends food");
    assert_eq!(docs[0].version, 2);
    assert_eq!(docs[1].tenant_id.as_deref(), Some("bob"));
}
