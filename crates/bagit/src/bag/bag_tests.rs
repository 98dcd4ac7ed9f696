#![allow(non_snake_case)]

use super::*;
use std::sync::atomic::Ordering;
use tempfile::TempDir;

const DECLARATION: &str = "BagIt-Version: 1.0\nTag-File-Character-Encoding: UTF-8\n";

fn md5(data: &[u8]) -> String {
    ChecksumAlgorithm::Md5.digest_hex(data)
}

/// Write a complete, valid md5 bag by hand.
fn fixture(dir: &TempDir) -> PathBuf {
    let base = dir.path().join("fixture");
    fs::create_dir_all(base.join("data/sub")).unwrap();
    fs::write(base.join("data/a.txt"), b"alpha").unwrap();
    fs::write(base.join("data/sub/b.txt"), b"bravo").unwrap();
    fs::write(base.join(DECLARATION_FILE), DECLARATION).unwrap();

    let manifest = format!(
        "{} data/a.txt\n{} data/sub/b.txt\n",
        md5(b"alpha"),
        md5(b"bravo")
    );
    fs::write(base.join("manifest-md5.txt"), &manifest).unwrap();
    let info = "Contact-Name: Ann\nSource-Organization: MIT\nContact-Name: Bob\n";
    fs::write(base.join(METADATA_FILE), info).unwrap();

    write_tag_manifest(&base);
    base
}

fn write_tag_manifest(base: &Path) {
    let mut lines = String::new();
    for name in [DECLARATION_FILE, METADATA_FILE, "manifest-md5.txt"] {
        let content = fs::read(base.join(name)).unwrap();
        lines.push_str(&format!("{} {name}\n", md5(&content)));
    }
    fs::write(base.join("tagmanifest-md5.txt"), lines).unwrap();
}

// ============================================================================
// Completeness
// ============================================================================

#[test]
fn Bag___fixture___is_complete_and_valid() {
    let dir = TempDir::new().unwrap();
    let bag = Bag::new(fixture(&dir), false, None);

    assert_eq!(bag.completeness_status().unwrap(), CompletenessStatus::Complete);
    assert_eq!(bag.validation_status().unwrap(), ValidationStatus::Valid);
}

#[test]
fn Bag___fetch_file_present___is_fetch_pending() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::write(base.join(FETCH_FILE), "https://example.org/x - data/x\n").unwrap();

    let bag = Bag::new(base, false, None);

    assert_eq!(
        bag.completeness_status().unwrap(),
        CompletenessStatus::FetchPending
    );
}

#[test]
fn Bag___missing_declaration___is_reported() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::remove_file(base.join(DECLARATION_FILE)).unwrap();

    let bag = Bag::new(base, false, None);

    assert_eq!(
        bag.completeness_status().unwrap(),
        CompletenessStatus::MissingDeclaration
    );
}

#[test]
fn Bag___declaration_without_encoding___is_malformed() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::write(base.join(DECLARATION_FILE), "BagIt-Version: 1.0\n").unwrap();

    let bag = Bag::new(base, false, None);

    assert_eq!(
        bag.completeness_status().unwrap(),
        CompletenessStatus::MalformedDeclaration
    );
}

#[test]
fn Bag___unsupported_encoding___is_reported() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::write(
        base.join(DECLARATION_FILE),
        "BagIt-Version: 1.0\nTag-File-Character-Encoding: ISO-8859-1\n",
    )
    .unwrap();

    let bag = Bag::new(base, false, None);

    assert_eq!(
        bag.completeness_status().unwrap(),
        CompletenessStatus::UnsupportedEncoding
    );
}

#[test]
fn Bag___missing_payload_root___is_reported() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::remove_dir_all(base.join(PAYLOAD_DIR)).unwrap();

    let bag = Bag::new(base, false, None);

    assert_eq!(
        bag.completeness_status().unwrap(),
        CompletenessStatus::MissingPayloadRoot
    );
}

#[test]
fn Bag___no_payload_manifest___is_missing_manifest() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::remove_file(base.join("manifest-md5.txt")).unwrap();

    let bag = Bag::new(base, false, None);

    assert_eq!(
        bag.completeness_status().unwrap(),
        CompletenessStatus::MissingManifest
    );
}

#[test]
fn Bag___unknown_algorithm_manifest___is_ignored() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::write(base.join("manifest-crc32.txt"), "garbage").unwrap();
    fs::remove_file(base.join("tagmanifest-md5.txt")).unwrap();

    let bag = Bag::new(base, false, None);

    assert!(bag.is_complete().unwrap());
    assert_eq!(bag.checksum_algorithms().unwrap().len(), 1);
}

#[test]
fn Bag___unparsable_manifest___is_malformed() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::write(base.join("manifest-md5.txt"), "justonetoken\n").unwrap();

    let bag = Bag::new(base, false, None);

    assert_eq!(
        bag.completeness_status().unwrap(),
        CompletenessStatus::MalformedManifest
    );
}

#[test]
fn Bag___deleted_payload___is_count_mismatch() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::remove_file(base.join("data/sub/b.txt")).unwrap();

    let bag = Bag::new(base, false, None);

    let status = bag.completeness_status().unwrap();
    assert_eq!(status, CompletenessStatus::PayloadCountMismatch);
    assert!(!bag.is_valid().unwrap());
}

#[test]
fn Bag___renamed_payload___is_missing_file() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::rename(base.join("data/a.txt"), base.join("data/renamed.txt")).unwrap();

    let bag = Bag::new(base, false, None);

    assert_eq!(
        bag.completeness_status().unwrap(),
        CompletenessStatus::MissingPayloadFile
    );
}

#[test]
fn Bag___extra_tag_file___is_tag_count_mismatch() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::create_dir_all(base.join("extra")).unwrap();
    fs::write(base.join("extra/notes.txt"), b"unlisted").unwrap();

    let bag = Bag::new(base, false, None);

    assert_eq!(
        bag.completeness_status().unwrap(),
        CompletenessStatus::TagCountMismatch
    );
}

#[test]
fn Bag___renamed_tag_file___is_missing_tag_file() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::rename(base.join(METADATA_FILE), base.join("other-info.txt")).unwrap();

    let bag = Bag::new(base, false, None);

    assert_eq!(
        bag.completeness_status().unwrap(),
        CompletenessStatus::MissingTagFile
    );
}

#[test]
fn CompletenessStatus___codes___are_distinct() {
    let all = [
        CompletenessStatus::Complete,
        CompletenessStatus::FetchPending,
        CompletenessStatus::MissingDeclaration,
        CompletenessStatus::MalformedDeclaration,
        CompletenessStatus::UnsupportedEncoding,
        CompletenessStatus::MissingPayloadRoot,
        CompletenessStatus::MissingManifest,
        CompletenessStatus::MalformedManifest,
        CompletenessStatus::PayloadCountMismatch,
        CompletenessStatus::MissingPayloadFile,
        CompletenessStatus::TagCountMismatch,
        CompletenessStatus::MissingTagFile,
    ];
    let mut codes: Vec<i32> = all.iter().map(CompletenessStatus::code).collect();
    codes.push(ValidationStatus::PayloadMismatch.code());
    codes.push(ValidationStatus::TagMismatch.code());

    let mut unique = codes.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), codes.len());
    assert!(codes.iter().skip(1).all(|c| *c < 0));
}

// ============================================================================
// Validity
// ============================================================================

#[test]
fn Bag___corrupted_payload___is_complete_but_invalid() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::write(base.join("data/a.txt"), b"alphA").unwrap();

    let bag = Bag::new(base, false, None);

    assert!(bag.is_complete().unwrap());
    assert_eq!(
        bag.validation_status().unwrap(),
        ValidationStatus::PayloadMismatch
    );
}

#[test]
fn Bag___corrupted_tag_file___is_tag_mismatch() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::write(base.join(METADATA_FILE), "Contact-Name: Mallory\n").unwrap();

    let bag = Bag::new(base, false, None);

    assert_eq!(bag.validation_status().unwrap(), ValidationStatus::TagMismatch);
}

#[test]
fn Bag___incomplete___validation_reports_completeness_code() {
    let dir = TempDir::new().unwrap();
    let base = fixture(&dir);
    fs::remove_file(base.join(DECLARATION_FILE)).unwrap();

    let bag = Bag::new(base, false, None);

    let status = bag.validation_status().unwrap();
    assert_eq!(
        status,
        ValidationStatus::Incomplete(CompletenessStatus::MissingDeclaration)
    );
    assert_eq!(status.code(), CompletenessStatus::MissingDeclaration.code());
}

// ============================================================================
// Access
// ============================================================================

#[test]
fn Bag___sealed___refuses_paths_but_serves_streams() {
    let dir = TempDir::new().unwrap();
    let bag = Bag::new(fixture(&dir), true, None);

    assert!(matches!(bag.payload_file("a.txt"), Err(BagError::Access(_))));
    assert!(matches!(bag.tag_file(METADATA_FILE), Err(BagError::Access(_))));
    assert!(matches!(bag.base_dir(), Err(BagError::Access(_))));

    let mut content = String::new();
    io::Read::read_to_string(&mut bag.payload_stream("a.txt").unwrap().unwrap(), &mut content)
        .unwrap();
    assert_eq!(content, "alpha");
    assert!(bag.tag_stream(METADATA_FILE).unwrap().is_some());
}

#[test]
fn Bag___missing_files___are_none() {
    let dir = TempDir::new().unwrap();
    let bag = Bag::new(fixture(&dir), false, None);

    assert!(bag.payload_file("nope.txt").unwrap().is_none());
    assert!(bag.payload_stream("nope.txt").unwrap().is_none());
    assert!(bag.tag_file("nope.txt").unwrap().is_none());
    assert!(bag.payload_file("sub/b.txt").unwrap().is_some());
}

#[test]
fn Bag___escaping_path___is_invalid() {
    let dir = TempDir::new().unwrap();
    let bag = Bag::new(fixture(&dir), false, None);

    assert!(matches!(
        bag.tag_stream("../outside.txt"),
        Err(BagError::InvalidPath(_))
    ));
}

#[test]
fn Bag___payload_manifest___accepts_any_spelling() {
    let dir = TempDir::new().unwrap();
    let bag = Bag::new(fixture(&dir), false, None);

    let upper = bag.payload_manifest("MD5").unwrap();
    let lower = bag.payload_manifest("md5").unwrap();

    assert_eq!(upper, lower);
    assert_eq!(upper["data/a.txt"], md5(b"alpha"));
    assert_eq!(bag.tag_manifest("Md5").unwrap().len(), 3);
    assert!(bag.payload_manifest("sha256").unwrap().is_empty());
    assert!(matches!(bag.payload_manifest("crc"), Err(BagError::Config(_))));
}

#[test]
fn Bag___introspection___reads_declaration() {
    let dir = TempDir::new().unwrap();
    let bag = Bag::new(fixture(&dir), false, None);

    assert_eq!(bag.name(), "fixture");
    assert_eq!(bag.declared_version(), Some("1.0"));
    assert_eq!(bag.tag_encoding(), TagEncoding::Utf8);
    assert_eq!(bag.line_ending(), LineEnding::Unix);
    assert!(bag.checksum_algorithms().unwrap().contains(ChecksumAlgorithm::Md5));
    assert!(bag.payload_refs().unwrap().is_empty());
}

// ============================================================================
// Metadata
// ============================================================================

#[test]
fn Bag___metadata___preserves_multi_value_order() {
    let dir = TempDir::new().unwrap();
    let bag = Bag::new(fixture(&dir), false, None);

    assert_eq!(bag.metadata("Contact-Name").unwrap(), vec!["Ann", "Bob"]);
    assert_eq!(
        bag.metadata_reserved(MetadataName::SourceOrganization).unwrap(),
        vec!["MIT"]
    );
    assert_eq!(
        bag.metadata_names().unwrap(),
        vec!["Contact-Name", "Source-Organization"]
    );
}

#[test]
fn Bag___metadata___parses_each_file_once() {
    let dir = TempDir::new().unwrap();
    let bag = Bag::new(fixture(&dir), false, None);

    bag.metadata("Contact-Name").unwrap();
    bag.metadata_names().unwrap();
    bag.property(DECLARATION_FILE, "BagIt-Version").unwrap();

    assert_eq!(bag.parses.load(Ordering::SeqCst), 2);
}

#[test]
fn Bag___metadata___concurrent_first_access_parses_once() {
    let dir = TempDir::new().unwrap();
    let bag = Arc::new(Bag::new(fixture(&dir), false, None));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let bag = Arc::clone(&bag);
            std::thread::spawn(move || bag.metadata("Contact-Name").unwrap())
        })
        .collect();
    let results: Vec<Vec<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(results.iter().all(|r| r == &["Ann", "Bob"]));
    assert_eq!(bag.parses.load(Ordering::SeqCst), 1);
}

#[test]
fn Bag___missing_property_file___is_empty() {
    let dir = TempDir::new().unwrap();
    let bag = Bag::new(fixture(&dir), false, None);

    assert!(bag.property("other.txt", "Anything").unwrap().is_empty());
    assert!(bag.property_names("other.txt").unwrap().is_empty());
}

#[test]
fn Bag___is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Bag>();
}
