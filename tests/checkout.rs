//! Checkout scenarios: idempotence, safe overwrites, conflict detection,
//! and forced mode.

mod common;

use pretty_assertions::assert_eq;
use std::path::Path;
use twig::areas::repository::Repository;
use twig::artifacts::checkout::migration::{CheckoutMode, CheckoutSummary, Migration};
use twig::artifacts::objects::object_id::ObjectId;

/// Run a checkout between two commits' trees through the index.
fn checkout(
    repository: &Repository,
    old: Option<ObjectId>,
    new: Option<ObjectId>,
    mode: CheckoutMode,
) -> anyhow::Result<CheckoutSummary> {
    let old_tree = old.map(|oid| common::tree_of(repository, &oid));
    let new_tree = new.map(|oid| common::tree_of(repository, &oid));

    let mut index = repository.index_mut();
    index.rehydrate()?;
    let summary = Migration::new(repository, &mut index, old_tree, new_tree)
        .with_mode(mode)
        .apply_changes()?;
    index.write_updates()?;

    Ok(summary)
}

#[test]
fn checkout_to_the_same_tree_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
    let dir = assert_fs::TempDir::new()?;
    let repository = common::init_repository(dir.path());
    let commit = common::commit_files(&repository, &[("f.txt", "stable")], "init");

    let before = std::fs::metadata(dir.path().join("f.txt"))?.modified()?;
    let summary = checkout(
        &repository,
        Some(commit),
        Some(commit),
        CheckoutMode::Strict,
    )?;

    assert!(summary.conflicts.is_empty());
    assert!(summary.removed.is_empty());
    let after = std::fs::metadata(dir.path().join("f.txt"))?.modified()?;
    assert_eq!(before, after, "no filesystem mutation happened");
    assert_eq!(std::fs::read_to_string(dir.path().join("f.txt"))?, "stable");

    Ok(())
}

#[test]
fn checkout_applies_creates_overwrites_and_deletes() -> Result<(), Box<dyn std::error::Error>> {
    let dir = assert_fs::TempDir::new()?;
    let repository = common::init_repository(dir.path());

    let first = common::commit_files(
        &repository,
        &[("keep.txt", "same"), ("old.txt", "going away")],
        "first",
    );
    {
        let mut index = repository.index_mut();
        index.rehydrate()?;
        index.remove("old.txt".into())?;
        index.write_updates()?;
    }
    std::fs::remove_file(dir.path().join("old.txt"))?;
    let second = common::commit_files(
        &repository,
        &[("keep.txt", "same"), ("sub/fresh.txt", "brand new")],
        "second",
    );

    // roll the working tree back to the first commit
    let summary = checkout(
        &repository,
        Some(second),
        Some(first),
        CheckoutMode::Strict,
    )?;
    assert!(summary.conflicts.is_empty());
    assert_eq!(summary.removed, vec![Path::new("sub/fresh.txt").to_path_buf()]);
    assert_eq!(std::fs::read_to_string(dir.path().join("old.txt"))?, "going away");
    assert!(!dir.path().join("sub").exists(), "emptied directory pruned");

    // and forward again
    repository.refs().update_head(&first)?;
    let summary = checkout(
        &repository,
        Some(first),
        Some(second),
        CheckoutMode::Strict,
    )?;
    assert!(summary.conflicts.is_empty());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("sub/fresh.txt"))?,
        "brand new"
    );
    assert!(!dir.path().join("old.txt").exists());

    // the index now mirrors the target tree
    let mut index = repository.index_mut();
    index.rehydrate()?;
    let names: Vec<String> = index
        .entries()
        .map(|e| e.name.to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["keep.txt", "sub/fresh.txt"]);
    assert!(
        index.entries().all(|e| e.metadata.mtime != 0),
        "index entries carry fresh stat information"
    );

    Ok(())
}

#[test]
fn strict_checkout_refuses_to_clobber_local_edits() -> Result<(), Box<dyn std::error::Error>> {
    let dir = assert_fs::TempDir::new()?;
    let repository = common::init_repository(dir.path());

    let first = common::commit_files(&repository, &[("f.txt", "A")], "first");
    let second = common::commit_files(&repository, &[("f.txt", "C")], "second");

    // return to the first commit, then edit locally without staging
    checkout(&repository, Some(second), Some(first), CheckoutMode::Strict)?;
    repository.refs().update_head(&first)?;
    common::write_file(dir.path(), "f.txt", "B");

    let result = checkout(&repository, Some(first), Some(second), CheckoutMode::Strict);

    let err = result.expect_err("local edit must conflict");
    assert!(err.to_string().contains("overwritten by checkout"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("f.txt"))?,
        "B",
        "strict mode leaves the working file untouched"
    );

    Ok(())
}

#[test]
fn forced_checkout_overwrites_and_reports() -> Result<(), Box<dyn std::error::Error>> {
    let dir = assert_fs::TempDir::new()?;
    let repository = common::init_repository(dir.path());

    let first = common::commit_files(&repository, &[("f.txt", "A")], "first");
    let second = common::commit_files(&repository, &[("f.txt", "C")], "second");

    checkout(&repository, Some(second), Some(first), CheckoutMode::Strict)?;
    repository.refs().update_head(&first)?;
    common::write_file(dir.path(), "f.txt", "B");

    let summary = checkout(&repository, Some(first), Some(second), CheckoutMode::Force)?;

    assert_eq!(
        summary.conflict_paths(),
        vec![Path::new("f.txt").to_path_buf()]
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("f.txt"))?,
        "C",
        "forced mode applies the target content"
    );

    Ok(())
}

#[test]
fn checkout_from_an_unborn_head_creates_everything() -> Result<(), Box<dyn std::error::Error>> {
    let dir = assert_fs::TempDir::new()?;
    let repository = common::init_repository(dir.path());

    // build a commit in the database, then wipe the working tree and index
    let commit = common::commit_files(
        &repository,
        &[("a.txt", "a"), ("nested/deep/b.txt", "b")],
        "init",
    );
    std::fs::remove_file(dir.path().join("a.txt"))?;
    std::fs::remove_dir_all(dir.path().join("nested"))?;
    {
        let mut index = repository.index_mut();
        index.rehydrate()?;
        index.remove("a.txt".into())?;
        index.remove("nested".into())?;
        index.write_updates()?;
    }

    let summary = checkout(&repository, None, Some(commit), CheckoutMode::Strict)?;

    assert!(summary.conflicts.is_empty());
    assert_eq!(std::fs::read_to_string(dir.path().join("a.txt"))?, "a");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("nested/deep/b.txt"))?,
        "b"
    );

    Ok(())
}

#[test]
fn untracked_file_in_the_way_is_a_conflict() -> Result<(), Box<dyn std::error::Error>> {
    let dir = assert_fs::TempDir::new()?;
    let repository = common::init_repository(dir.path());

    let first = common::commit_files(&repository, &[("base.txt", "b")], "first");
    let second = common::commit_files(
        &repository,
        &[("base.txt", "b"), ("incoming.txt", "from target")],
        "second",
    );

    checkout(&repository, Some(second), Some(first), CheckoutMode::Strict)?;
    repository.refs().update_head(&first)?;
    // an untracked file now occupies the incoming path
    common::write_file(dir.path(), "incoming.txt", "precious local data");

    let result = checkout(&repository, Some(first), Some(second), CheckoutMode::Strict);

    let err = result.expect_err("untracked file must not be clobbered");
    assert!(err.to_string().contains("untracked working tree files"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("incoming.txt"))?,
        "precious local data"
    );

    Ok(())
}
