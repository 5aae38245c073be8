#![allow(dead_code)]

use std::path::{Path, PathBuf};
use twig::areas::repository::Repository;
use twig::artifacts::objects::commit::{Author, Commit};
use twig::artifacts::objects::object::Object;
use twig::artifacts::objects::object_id::ObjectId;
use twig::artifacts::objects::tree::Tree;

/// Initialize a repository rooted at `dir`.
pub fn init_repository(dir: &Path) -> Repository {
    Repository::init(dir.to_str().expect("utf-8 temp path")).expect("init repository")
}

/// Write a workspace file, creating parent directories as needed.
pub fn write_file(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(&path, content).expect("write file");
    path
}

pub fn fixed_author() -> Author {
    let timestamp = chrono::DateTime::parse_from_str(
        "2024-06-01 09:00:00 +0000",
        "%Y-%m-%d %H:%M:%S %z",
    )
    .unwrap();
    Author::new_with_timestamp("Test".to_string(), "test@example.com".to_string(), timestamp)
}

/// Stage the given files, write the tree, and record a commit on HEAD.
/// Returns the commit id.
pub fn commit_files(
    repository: &Repository,
    files: &[(&str, &str)],
    message: &str,
) -> ObjectId {
    for (relative, content) in files {
        write_file(repository.path(), relative, content);
    }

    let mut index = repository.index_mut();
    index.rehydrate().expect("rehydrate index");
    for (relative, _) in files {
        index
            .add_path(
                repository.workspace(),
                repository.database(),
                Path::new(relative),
            )
            .expect("stage file");
    }
    index.write_updates().expect("write index");

    let entries: Vec<_> = index.entries().cloned().collect();
    drop(index);

    let tree = Tree::build(entries.iter()).expect("build tree");
    tree.traverse(&|subtree| repository.database().store(subtree).map(|_| ()))
        .expect("store tree");
    let tree_oid = tree.object_id().expect("tree id");

    let parents = repository
        .refs()
        .read_head()
        .expect("read head")
        .into_iter()
        .collect::<Vec<_>>();
    let commit = Commit::new(parents, tree_oid, fixed_author(), message.to_string());
    let commit_oid = repository
        .database()
        .store(&commit)
        .expect("store commit");
    repository
        .refs()
        .update_head(&commit_oid)
        .expect("update head");

    commit_oid
}

/// The root tree id of a commit.
pub fn tree_of(repository: &Repository, commit_oid: &ObjectId) -> ObjectId {
    *repository
        .database()
        .parse_object_as_commit(commit_oid)
        .expect("load commit")
        .tree_oid()
}
