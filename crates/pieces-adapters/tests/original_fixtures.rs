// Every dataset in the bundled fixture directory loads and yields one query per entry.

use pieces_adapters::adapter_for_dataset;
use pieces_core::DatasetKind;

#[test]
fn every_dataset_fixture_builds_items() {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/original");
    for kind in DatasetKind::RUN_ORDER {
        let adapter = adapter_for_dataset(kind, &root);
        let entries = adapter.load_entries().expect("load entries");
        assert!(!entries.is_empty(), "{kind} fixture is empty");
        for entry in &entries {
            let item = adapter.build_item(entry).expect("build item");
            assert_eq!(item.key, entry.key);
            assert!(!item.query.trim().is_empty(), "{kind}/{} has empty query", item.key);
        }
        assert!(adapter.default_output_file().starts_with(kind.as_str()));
    }
}
