use assert_cmd::Command;
use assert_cmd::cargo;
use flate2::Compression;
use flate2::write::GzEncoder;
use mockito::Server;
use predicates::prelude::*;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use tar::Builder;
use tempfile::tempdir;

fn create_tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let mut tar_builder = Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_path(name).unwrap();
        header.set_cksum();
        tar_builder.append(&header, content.as_bytes()).unwrap();
    }
    let tar = tar_builder.into_inner().unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

fn pkga_blob() -> Vec<u8> {
    create_tar_gz(&[
        ("pkga/__init__.py", "VERSION = '1.0'"),
        ("pkga/api.py", "def handler(): pass"),
        ("pkga/tests/test_api.py", "def test(): pass"),
        ("pkga/__pycache__/api.cpython-311.pyc", "bytecode"),
        ("pkga/README.md", "# pkga"),
        ("pkga-1.0.dist-info/METADATA", "Name: pkga\nVersion: 1.0"),
        ("pkga-1.0.dist-info/WHEEL", "Wheel-Version: 1.0"),
        ("pkga-1.0.dist-info/RECORD", "..."),
    ])
}

/// Collect every path under `root`, recursively.
fn walk(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            out.push(path);
        }
    }
    out
}

struct BuildFixture {
    root: tempfile::TempDir,
}

impl BuildFixture {
    fn new() -> Self {
        let root = tempdir().unwrap();
        std::fs::write(root.path().join("requirements.txt"), "pkga==1.0\n").unwrap();
        let src = root.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("main.py"), "app = object()").unwrap();
        Self { root }
    }

    fn cmd(&self, index_url: &str, output: &str) -> Command {
        let mut cmd = Command::new(cargo::cargo_bin!("slimbuild"));
        cmd.current_dir(self.root.path())
            .arg("build")
            .arg("--manifest")
            .arg("requirements.txt")
            .arg("--source")
            .arg("src")
            .arg("--output")
            .arg(output)
            .arg("--index-url")
            .arg(index_url)
            .arg("--cache")
            .arg("cache")
            .arg("--work")
            .arg("work");
        cmd
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }
}

#[test]
fn test_end_to_end_build() {
    let mut server = Server::new();
    let blob = pkga_blob();
    let mock = server
        .mock("GET", "/packages/pkga/pkga-1.0.tar.gz")
        .with_status(200)
        .with_body(&blob)
        .expect(1)
        .create();

    let fixture = BuildFixture::new();
    fixture.cmd(&server.url(), "artifact").assert().success();
    mock.assert();

    let artifact = fixture.path("artifact");
    assert!(artifact.join("site-packages/pkga/__init__.py").is_file());
    assert!(
        artifact
            .join("site-packages/pkga-1.0.dist-info/METADATA")
            .is_file()
    );
    assert!(artifact.join("app/main.py").is_file());
    assert!(artifact.join("artifact.json").is_file());

    // The prune policy ran: no bytecode, no test dirs, no docs, and
    // dist-info keeps METADATA only
    for path in walk(&artifact) {
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_ne!(name, "__pycache__", "found {:?}", path);
        assert!(!name.ends_with(".pyc"), "found {:?}", path);
        assert_ne!(name, "WHEEL", "found {:?}", path);
        assert_ne!(name, "RECORD", "found {:?}", path);
        assert_ne!(name, "README.md", "found {:?}", path);
    }

    // Intermediate installed tree was discarded
    assert!(
        std::fs::read_dir(fixture.path("work"))
            .unwrap()
            .next()
            .is_none()
    );
}

#[test]
fn test_second_build_hits_cache_without_fetching() {
    let mut server = Server::new();
    let blob = pkga_blob();
    // One fetch total across both builds
    let mock = server
        .mock("GET", "/packages/pkga/pkga-1.0.tar.gz")
        .with_status(200)
        .with_body(&blob)
        .expect(1)
        .create();

    let fixture = BuildFixture::new();
    fixture.cmd(&server.url(), "artifact1").assert().success();
    fixture.cmd(&server.url(), "artifact2").assert().success();
    mock.assert();

    assert!(
        fixture
            .path("artifact2")
            .join("site-packages/pkga-1.0.dist-info/METADATA")
            .is_file()
    );
}

#[test]
fn test_failed_fetch_leaves_no_artifact() {
    let mut server = Server::new();
    let _mock = server
        .mock("GET", "/packages/pkga/pkga-1.0.tar.gz")
        .with_status(404)
        .create();

    let fixture = BuildFixture::new();
    fixture
        .cmd(&server.url(), "artifact")
        .assert()
        .failure()
        .stderr(predicate::str::contains("install stage failed"));

    assert!(!fixture.path("artifact").exists());
    // No partial installed tree either
    if fixture.path("work").exists() {
        assert!(
            std::fs::read_dir(fixture.path("work"))
                .unwrap()
                .next()
                .is_none()
        );
    }
}

#[test]
fn test_keep_exception_preserves_tests_dir() {
    let mut server = Server::new();
    let blob = pkga_blob();
    let _mock = server
        .mock("GET", "/packages/pkga/pkga-1.0.tar.gz")
        .with_status(200)
        .with_body(&blob)
        .create();

    let fixture = BuildFixture::new();
    fixture
        .cmd(&server.url(), "artifact")
        .arg("--keep")
        .arg("pkga/tests")
        .assert()
        .success();

    assert!(
        fixture
            .path("artifact")
            .join("site-packages/pkga/tests/test_api.py")
            .is_file()
    );
}

#[test]
fn test_existing_output_fails_the_build() {
    let mut server = Server::new();
    let blob = pkga_blob();
    let _mock = server
        .mock("GET", "/packages/pkga/pkga-1.0.tar.gz")
        .with_status(200)
        .with_body(&blob)
        .create();

    let fixture = BuildFixture::new();
    std::fs::create_dir_all(fixture.path("artifact")).unwrap();
    std::fs::write(fixture.path("artifact/marker"), "pre-existing").unwrap();

    fixture
        .cmd(&server.url(), "artifact")
        .assert()
        .failure()
        .stderr(predicate::str::contains("assembly stage failed"));

    // The pre-existing directory was not touched
    assert!(fixture.path("artifact/marker").is_file());
    assert!(!fixture.path("artifact/app").exists());
}

#[test]
fn test_prune_subcommand_on_existing_tree() {
    let dir = tempdir().unwrap();
    let tree = dir.path().join("tree");
    std::fs::create_dir_all(tree.join("pkga/tests")).unwrap();
    std::fs::create_dir_all(tree.join("pkgb/tests")).unwrap();
    std::fs::write(tree.join("pkga/tests/test_api.py"), "def test(): pass").unwrap();
    std::fs::write(tree.join("pkgb/tests/test_b.py"), "def test(): pass").unwrap();
    std::fs::write(tree.join("pkga/module.pyc"), "bytecode").unwrap();

    let mut cmd = Command::new(cargo::cargo_bin!("slimbuild"));
    cmd.arg("prune")
        .arg(&tree)
        .arg("--keep")
        .arg("pkga/tests")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pruned"));

    assert!(tree.join("pkga/tests/test_api.py").is_file());
    assert!(!tree.join("pkgb/tests").exists());
    assert!(!tree.join("pkga/module.pyc").exists());
}

#[test]
fn test_malformed_manifest_fails_fast() {
    let fixture = BuildFixture::new();
    std::fs::write(fixture.path("requirements.txt"), "pkga>=1.0\n").unwrap();

    fixture
        .cmd("http://127.0.0.1:9", "artifact")
        .assert()
        .failure()
        .stderr(predicate::str::contains("exact pin"));
}
