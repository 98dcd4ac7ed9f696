#![allow(non_snake_case)]

use super::*;
use std::io::Cursor;
use tempfile::TempDir;
use test_case::test_case;

fn sample_tree(dir: &TempDir) -> PathBuf {
    let root = dir.path().join("src-bag");
    fs::create_dir_all(root.join("data/nested")).unwrap();
    fs::create_dir_all(root.join("data/empty")).unwrap();
    fs::write(root.join("bagit.txt"), b"BagIt-Version: 1.0\n").unwrap();
    fs::write(root.join("data/nested/b.txt"), b"bravo").unwrap();
    fs::write(root.join("data/a.txt"), b"alpha").unwrap();
    root
}

fn pack(root: &Path, format: ArchiveFormat, strip: bool) -> Vec<u8> {
    write_archive(root, "my-bag", Cursor::new(Vec::new()), format, strip)
        .unwrap()
        .into_inner()
}

#[test_case("zip", ArchiveFormat::Zip)]
#[test_case("ZIP", ArchiveFormat::Zip)]
#[test_case("tgz", ArchiveFormat::Tgz)]
#[test_case("tar.gz", ArchiveFormat::Tgz)]
#[test_case(".tgz", ArchiveFormat::Tgz)]
fn ArchiveFormat___from_str___accepts_known_names(name: &str, expected: ArchiveFormat) {
    assert_eq!(name.parse::<ArchiveFormat>().unwrap(), expected);
}

#[test_case("rar")]
#[test_case("tar")]
#[test_case("")]
fn ArchiveFormat___from_str___rejects_unknown(name: &str) {
    assert!(matches!(
        name.parse::<ArchiveFormat>(),
        Err(BagError::Config(_))
    ));
}

#[test_case("bag.zip", Some((ArchiveFormat::Zip, "bag")))]
#[test_case("bag.tar.gz", Some((ArchiveFormat::Tgz, "bag")))]
#[test_case("Bag.TGZ", Some((ArchiveFormat::Tgz, "Bag")))]
#[test_case("bag.v2.zip", Some((ArchiveFormat::Zip, "bag.v2")))]
#[test_case("bag.tar.bz2", None)]
#[test_case("bag.gz", None)]
#[test_case(".zip", None)]
fn split_suffix___strips_only_recognized_suffix(name: &str, expected: Option<(ArchiveFormat, &str)>) {
    assert_eq!(split_suffix(name), expected);
}

#[test]
fn detect___suffix_without_magic___is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fake.zip");
    fs::write(&path, b"not a zip at all").unwrap();

    let err = detect(&path).unwrap_err();

    assert!(matches!(err, BagError::Config(_)));
}

#[test]
fn detect___zip_magic_under_tgz_suffix___is_rejected() {
    let dir = TempDir::new().unwrap();
    let root = sample_tree(&dir);
    let path = dir.path().join("bag.tgz");
    fs::write(&path, pack(&root, ArchiveFormat::Zip, true)).unwrap();

    assert!(detect(&path).is_err());
}

#[test_case(ArchiveFormat::Zip)]
#[test_case(ArchiveFormat::Tgz)]
fn detect___written_archive___is_recognized(format: ArchiveFormat) {
    let dir = TempDir::new().unwrap();
    let root = sample_tree(&dir);
    let path = dir.path().join(format!("out.{}", format.extension()));
    fs::write(&path, pack(&root, format, false)).unwrap();

    let (detected, stem) = detect(&path).unwrap();

    assert_eq!(detected, format);
    assert_eq!(stem, "out");
}

#[test_case(ArchiveFormat::Zip)]
#[test_case(ArchiveFormat::Tgz)]
fn write_then_extract___reproduces_tree(format: ArchiveFormat) {
    let dir = TempDir::new().unwrap();
    let root = sample_tree(&dir);
    let bytes = pack(&root, format, false);
    let target = dir.path().join("unpacked");

    let bag_dir = extract(Cursor::new(bytes), format, &target, None).unwrap();

    assert_eq!(bag_dir, target.join("my-bag"));
    assert_eq!(fs::read(bag_dir.join("data/a.txt")).unwrap(), b"alpha");
    assert_eq!(fs::read(bag_dir.join("data/nested/b.txt")).unwrap(), b"bravo");
    assert!(bag_dir.join("data/empty").is_dir());
}

#[test_case(ArchiveFormat::Zip)]
#[test_case(ArchiveFormat::Tgz)]
fn extract___rename___replaces_top_level_name(format: ArchiveFormat) {
    let dir = TempDir::new().unwrap();
    let root = sample_tree(&dir);
    let bytes = pack(&root, format, true);

    let bag_dir = extract(Cursor::new(bytes), format, dir.path(), Some("renamed")).unwrap();

    assert_eq!(bag_dir, dir.path().join("renamed"));
    assert!(bag_dir.join("bagit.txt").is_file());
}

#[test_case(ArchiveFormat::Zip)]
#[test_case(ArchiveFormat::Tgz)]
fn write_archive___strip_timestamps___is_reproducible(format: ArchiveFormat) {
    let dir = TempDir::new().unwrap();
    let root = sample_tree(&dir);

    let first = pack(&root, format, true);
    fs::write(root.join("data/a.txt"), b"alpha").unwrap();
    let second = pack(&root, format, true);

    assert_eq!(first, second);
}

#[test]
fn extract___tgz_restores_modification_time() {
    let dir = TempDir::new().unwrap();
    let root = sample_tree(&dir);
    let stamp = UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);
    File::options()
        .write(true)
        .open(root.join("data/a.txt"))
        .unwrap()
        .set_modified(stamp)
        .unwrap();
    let bytes = pack(&root, ArchiveFormat::Tgz, false);

    let bag_dir = extract(Cursor::new(bytes), ArchiveFormat::Tgz, &dir.path().join("x"), None).unwrap();

    let restored = fs::metadata(bag_dir.join("data/a.txt")).unwrap().modified().unwrap();
    assert_eq!(restored, stamp);
}

#[test_case(ArchiveFormat::Zip)]
#[test_case(ArchiveFormat::Tgz)]
fn extract___existing_bag_directory___is_conflict(format: ArchiveFormat) {
    let dir = TempDir::new().unwrap();
    let root = sample_tree(&dir);
    let bytes = pack(&root, format, true);
    let existing = dir.path().join("renamed");
    fs::create_dir_all(&existing).unwrap();
    fs::write(existing.join("keep.txt"), b"mine").unwrap();

    let err = extract(Cursor::new(bytes), format, dir.path(), Some("renamed")).unwrap_err();

    assert!(matches!(err, BagError::Conflict(ref name) if name == "renamed"));
    assert_eq!(fs::read(existing.join("keep.txt")).unwrap(), b"mine");
    assert!(!existing.join("bagit.txt").exists());
}

#[test]
fn extract___zip_entry_outside_root___is_invalid_path() {
    let dir = TempDir::new().unwrap();
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    zip.start_file("bag/data/a.txt", options).unwrap();
    zip.write_all(b"a").unwrap();
    zip.start_file("other/escape.txt", options).unwrap();
    zip.write_all(b"b").unwrap();
    let bytes = zip.finish().unwrap().into_inner();

    let err = extract(Cursor::new(bytes), ArchiveFormat::Zip, dir.path(), None).unwrap_err();

    assert!(matches!(err, BagError::InvalidPath(_)));
    assert!(!dir.path().join("other").exists());
}

#[test]
fn extract___top_level_file___is_invalid_path() {
    let dir = TempDir::new().unwrap();
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("loose.txt", SimpleFileOptions::default()).unwrap();
    zip.write_all(b"a").unwrap();
    let bytes = zip.finish().unwrap().into_inner();

    let err = extract(Cursor::new(bytes), ArchiveFormat::Zip, dir.path(), None).unwrap_err();

    assert!(matches!(err, BagError::InvalidPath(_)));
}

#[test]
fn safe_components___rejects_parent_traversal() {
    assert!(safe_components(Path::new("bag/../../etc/passwd")).is_err());
    assert!(safe_components(Path::new("/abs/path")).is_err());
    assert_eq!(
        safe_components(Path::new("./bag/data/a")).unwrap(),
        vec!["bag", "data", "a"]
    );
}
