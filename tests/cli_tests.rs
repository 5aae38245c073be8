//! End-to-end smoke tests driving the `twig` binary.

use assert_cmd::Command;
use assert_fs::fixture::{FileWriteStr, PathChild};
use predicates::prelude::*;

fn twig(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("twig").unwrap();
    cmd.current_dir(dir);
    cmd
}

#[test]
fn init_creates_the_repository_layout() -> Result<(), Box<dyn std::error::Error>> {
    let dir = assert_fs::TempDir::new()?;

    twig(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized empty Git repository in"));

    assert!(dir.child(".git/objects/pack").path().is_dir());
    assert!(dir.child(".git/refs/heads").path().is_dir());
    let head = std::fs::read_to_string(dir.child(".git/HEAD").path())?;
    assert_eq!(head.trim(), "ref: refs/heads/master");

    Ok(())
}

#[test]
fn hash_object_matches_the_known_blob_id() -> Result<(), Box<dyn std::error::Error>> {
    let dir = assert_fs::TempDir::new()?;
    twig(dir.path()).arg("init").assert().success();

    dir.child("hello.txt").write_str("hello\n")?;

    twig(dir.path())
        .args(["hash-object", "hello.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "ce013625030ba8dba906f756967f9e9ca394464a",
        ));

    Ok(())
}

#[test]
fn add_commit_and_cat_file_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let dir = assert_fs::TempDir::new()?;
    twig(dir.path()).arg("init").assert().success();

    dir.child("README").write_str("hello\n")?;
    twig(dir.path()).args(["add", "README"]).assert().success();
    twig(dir.path())
        .args(["commit", "-m", "initial"])
        .assert()
        .success()
        .stdout(predicate::str::contains("initial"));

    twig(dir.path())
        .args(["cat-file", "-p", "ce013625030ba8dba906f756967f9e9ca394464a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"));

    twig(dir.path())
        .args(["ls-tree", "HEAD"])
        .assert()
        .success()
        .stdout(predicate::str::contains("README"))
        .stdout(predicate::str::contains("100644 blob"));

    Ok(())
}

#[test]
fn status_reports_untracked_then_clean() -> Result<(), Box<dyn std::error::Error>> {
    let dir = assert_fs::TempDir::new()?;
    twig(dir.path()).arg("init").assert().success();

    dir.child("new.txt").write_str("fresh\n")?;

    twig(dir.path())
        .args(["status", "--porcelain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("?? new.txt"));

    twig(dir.path()).args(["add", "new.txt"]).assert().success();
    twig(dir.path())
        .args(["commit", "-m", "add new.txt"])
        .assert()
        .success();

    twig(dir.path())
        .args(["status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to commit"));

    Ok(())
}

#[test]
fn checkout_restores_an_earlier_commit() -> Result<(), Box<dyn std::error::Error>> {
    let dir = assert_fs::TempDir::new()?;
    twig(dir.path()).arg("init").assert().success();

    dir.child("f.txt").write_str("version one\n")?;
    twig(dir.path()).args(["add", "f.txt"]).assert().success();
    twig(dir.path())
        .args(["commit", "-m", "first"])
        .assert()
        .success();
    let first = std::fs::read_to_string(dir.child(".git/refs/heads/master").path())?
        .trim()
        .to_string();

    dir.child("f.txt").write_str("version two\n")?;
    twig(dir.path()).args(["add", "f.txt"]).assert().success();
    twig(dir.path())
        .args(["commit", "-m", "second"])
        .assert()
        .success();

    twig(dir.path())
        .args(["checkout", &first])
        .assert()
        .success()
        .stdout(predicate::str::contains("HEAD is now at"));

    let content = std::fs::read_to_string(dir.child("f.txt").path())?;
    assert_eq!(content, "version one\n");

    Ok(())
}

#[test]
fn checkout_refuses_to_overwrite_local_edits() -> Result<(), Box<dyn std::error::Error>> {
    let dir = assert_fs::TempDir::new()?;
    twig(dir.path()).arg("init").assert().success();

    dir.child("f.txt").write_str("committed\n")?;
    twig(dir.path()).args(["add", "f.txt"]).assert().success();
    twig(dir.path())
        .args(["commit", "-m", "first"])
        .assert()
        .success();
    let first = std::fs::read_to_string(dir.child(".git/refs/heads/master").path())?
        .trim()
        .to_string();

    dir.child("f.txt").write_str("second version\n")?;
    twig(dir.path()).args(["add", "f.txt"]).assert().success();
    twig(dir.path())
        .args(["commit", "-m", "second"])
        .assert()
        .success();

    twig(dir.path()).args(["checkout", &first]).assert().success();

    // local, unstaged edit
    dir.child("f.txt").write_str("precious edit\n")?;

    twig(dir.path())
        .args(["checkout", "master"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("overwritten by checkout"));

    let content = std::fs::read_to_string(dir.child("f.txt").path())?;
    assert_eq!(content, "precious edit\n");

    Ok(())
}

#[test]
fn diff_shows_name_status_between_commits() -> Result<(), Box<dyn std::error::Error>> {
    let dir = assert_fs::TempDir::new()?;
    twig(dir.path()).arg("init").assert().success();

    dir.child("stays.txt").write_str("same\n")?;
    dir.child("changes.txt").write_str("v1\n")?;
    twig(dir.path()).args(["add", "."]).assert().success();
    twig(dir.path())
        .args(["commit", "-m", "first"])
        .assert()
        .success();
    let first = std::fs::read_to_string(dir.child(".git/refs/heads/master").path())?
        .trim()
        .to_string();

    dir.child("changes.txt").write_str("v2\n")?;
    dir.child("added.txt").write_str("new\n")?;
    twig(dir.path()).args(["add", "."]).assert().success();
    twig(dir.path())
        .args(["commit", "-m", "second"])
        .assert()
        .success();

    twig(dir.path())
        .args(["diff", &first, "HEAD"])
        .assert()
        .success()
        .stdout(predicate::str::contains("M\tchanges.txt"))
        .stdout(predicate::str::contains("A\tadded.txt"))
        .stdout(predicate::str::contains("stays.txt").not());

    Ok(())
}
