use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use twig::areas::repository::Repository;
use twig::artifacts::checkout::migration::{CheckoutMode, Migration};
use twig::artifacts::diff::tree_diff::DiffFilter;
use twig::artifacts::objects::blob::Blob;
use twig::artifacts::objects::commit::{Author, Commit};
use twig::artifacts::objects::object::Object;
use twig::artifacts::objects::tree::{Tree, TreeCursor};
use twig::artifacts::objects::object_type::ObjectType;

#[derive(Parser)]
#[command(
    name = "twig",
    version = "0.1.0",
    about = "A git core engine",
    long_about = "A reimplementation of git's repository core: the object model, \
    the canonical tree codec, the merge-walk engine, the staging index, and checkout. \
    The on-disk formats are compatible with stock git tooling.",
    help_template = r"
{name} {version} - {about}

USAGE:
    {usage}

OPTIONS:
    {all-args}
",
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(
        name = "init",
        about = "Initialize a new repository",
        long_about = "Initializes a new repository in the current directory or at the specified path."
    )]
    Init {
        #[arg(index = 1, help = "The path to the repository")]
        path: Option<String>,
    },
    #[command(name = "hash-object", about = "Compute an object id, optionally storing the object")]
    HashObject {
        #[arg(index = 1, help = "The file to hash")]
        file: PathBuf,
        #[arg(short = 'w', long, help = "Write the object into the database")]
        write: bool,
    },
    #[command(name = "cat-file", about = "Print the content of an object")]
    CatFile {
        #[arg(short = 'p', long, help = "The object sha (or prefix) to print")]
        sha: String,
    },
    #[command(name = "ls-tree", about = "List the contents of a tree object")]
    LsTree {
        #[arg(index = 1, help = "The revision naming the tree")]
        revision: String,
    },
    #[command(name = "add", about = "Stage files into the index")]
    Add {
        #[arg(index = 1, required = true, help = "Files or directories to stage")]
        paths: Vec<PathBuf>,
    },
    #[command(name = "rm", about = "Remove files from the index")]
    Rm {
        #[arg(index = 1, required = true, help = "Files to unstage")]
        paths: Vec<PathBuf>,
    },
    #[command(name = "write-tree", about = "Write the index out as a tree object")]
    WriteTree,
    #[command(name = "commit", about = "Record a commit from the index")]
    Commit {
        #[arg(short = 'm', long, help = "The commit message")]
        message: String,
    },
    #[command(name = "read-tree", about = "Replace the index with a stored tree")]
    ReadTree {
        #[arg(index = 1, help = "The revision naming the tree")]
        revision: String,
    },
    #[command(name = "checkout", about = "Update the working tree to match a revision")]
    Checkout {
        #[arg(index = 1, help = "The revision to check out")]
        revision: String,
        #[arg(short = 'f', long, help = "Force: overwrite local modifications")]
        force: bool,
    },
    #[command(name = "status", about = "Show the working tree status")]
    Status {
        #[arg(long, help = "Machine-readable two-column output")]
        porcelain: bool,
    },
    #[command(name = "diff", about = "Show blob-level changes between two revisions")]
    Diff {
        #[arg(index = 1, help = "The old revision")]
        old: String,
        #[arg(index = 2, help = "The new revision")]
        new: String,
        #[arg(long, help = "Only show changes of these kinds (A, D, M)")]
        diff_filter: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("fatal: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path } => {
            let path = path.unwrap_or_else(|| ".".to_string());
            let repository = Repository::init(&path)?;
            println!(
                "Initialized empty Git repository in {}",
                repository.path().join(".git").display()
            );
            Ok(())
        }
        Commands::HashObject { file, write } => {
            let content = std::fs::read(&file)
                .with_context(|| format!("unable to read {}", file.display()))?;
            let blob = Blob::new(content.into());

            let oid = if write {
                let repository = Repository::new(".")?;
                repository.database().store(&blob)?
            } else {
                blob.object_id()?
            };

            println!("{oid}");
            Ok(())
        }
        Commands::CatFile { sha } => {
            let repository = Repository::new(".")?;
            let oid = repository.refs().resolve(&sha, repository.database())?;
            let object = repository.database().parse_object(&oid)?;
            println!("{}", object.display());
            Ok(())
        }
        Commands::LsTree { revision } => {
            let repository = Repository::new(".")?;
            let oid = repository.refs().resolve(&revision, repository.database())?;
            let payload = repository.database().load_tree_payload(&oid)?;

            let mut cursor = TreeCursor::new(payload);
            while let Some(entry) = cursor.next()? {
                let object_type = if entry.mode.is_tree() {
                    ObjectType::Tree
                } else {
                    ObjectType::Blob
                };
                println!(
                    "{} {} {}\t{}",
                    entry.mode.as_str(),
                    object_type.as_str(),
                    entry.oid,
                    entry.name
                );
            }
            Ok(())
        }
        Commands::Add { paths } => {
            let repository = Repository::new(".")?;
            let mut index = repository.index_mut();
            index.rehydrate()?;

            for path in paths {
                let files = repository
                    .workspace()
                    .list_files(Some(path))
                    .unwrap_or_default();
                for file in files {
                    // unreadable or vanished files are skipped, not fatal
                    if let Err(err) =
                        index.add_path(repository.workspace(), repository.database(), &file)
                    {
                        tracing::warn!(file = %file.display(), error = %err, "skipping unreadable file");
                    }
                }
            }

            index.write_updates()
        }
        Commands::Rm { paths } => {
            let repository = Repository::new(".")?;
            let mut index = repository.index_mut();
            index.rehydrate()?;

            for path in paths {
                for entry_path in index.entries_under_path(&path) {
                    index.remove(entry_path)?;
                }
            }

            index.write_updates()
        }
        Commands::WriteTree => {
            let repository = Repository::new(".")?;
            let mut index = repository.index_mut();
            index.rehydrate()?;

            let oid = write_tree_from_index(&repository, &index)?;
            println!("{oid}");
            Ok(())
        }
        Commands::Commit { message } => {
            let repository = Repository::new(".")?;
            let mut index = repository.index_mut();
            index.rehydrate()?;

            let tree_oid = write_tree_from_index(&repository, &index)?;
            let parents = repository
                .refs()
                .read_head()?
                .into_iter()
                .collect::<Vec<_>>();

            let author = Author::load_from_env()
                .unwrap_or_else(|_| Author::new("Twig".to_string(), "twig@example.com".to_string()));
            let commit = Commit::new(parents, tree_oid, author, message);
            let commit_oid = repository.database().store(&commit)?;
            repository.refs().update_head(&commit_oid)?;

            println!("{} {}", commit_oid.to_short_oid(), commit.short_message());
            Ok(())
        }
        Commands::ReadTree { revision } => {
            let repository = Repository::new(".")?;
            let oid = repository.refs().resolve(&revision, repository.database())?;

            let mut index = repository.index_mut();
            index.rehydrate()?;
            index.read_tree(repository.database(), &oid)?;
            index.write_updates()
        }
        Commands::Checkout { revision, force } => {
            let repository = Repository::new(".")?;
            let target_oid = repository.refs().resolve(&revision, repository.database())?;
            let target_commit = repository.database().parse_object_as_commit(&target_oid)?;

            let old_tree = repository.head_tree_oid()?;
            let new_tree = Some(*target_commit.tree_oid());

            let mut index = repository.index_mut();
            index.rehydrate()?;

            let mode = if force {
                CheckoutMode::Force
            } else {
                CheckoutMode::Strict
            };
            let summary = Migration::new(&repository, &mut index, old_tree, new_tree)
                .with_mode(mode)
                .apply_changes()?;
            index.write_updates()?;
            drop(index);

            if repository.refs().branch_exists(&revision) {
                repository
                    .refs()
                    .set_head_symbolic(&format!("refs/heads/{revision}"))?;
            } else {
                repository.refs().set_head_detached(&target_oid)?;
            }

            for path in summary.conflict_paths() {
                println!("{} {}", "overwritten:".yellow(), path.display());
            }
            println!("HEAD is now at {}", target_oid.to_short_oid());
            Ok(())
        }
        Commands::Status { porcelain } => {
            let repository = Repository::new(".")?;
            let mut index = repository.index_mut();
            index.rehydrate()?;

            let info = repository.status().collect(&mut index)?;
            if index.is_changed() {
                // clean entries got their stat cache refreshed
                index.write_updates()?;
            }

            if porcelain {
                for (path, change) in &info.changed_files {
                    println!("{} {}", String::from(change), path.display());
                }
                for path in &info.untracked_files {
                    println!("?? {}", path.display());
                }
            } else {
                if !info.index_changeset.is_empty() {
                    println!("Changes to be committed:");
                    for (path, change) in &info.index_changeset {
                        println!("{}{}", change, path.display());
                    }
                    println!();
                }
                if !info.workspace_changeset.is_empty() {
                    println!("Changes not staged for commit:");
                    for (path, change) in &info.workspace_changeset {
                        println!("{}{}", change, path.display());
                    }
                    println!();
                }
                if !info.untracked_files.is_empty() {
                    println!("Untracked files:");
                    for path in &info.untracked_files {
                        println!("        {}", path.display().to_string().red());
                    }
                }
                if info.is_clean() {
                    println!("nothing to commit, working tree clean");
                }
            }
            Ok(())
        }
        Commands::Diff {
            old,
            new,
            diff_filter,
        } => {
            let repository = Repository::new(".")?;
            let old_oid = repository.refs().resolve(&old, repository.database())?;
            let new_oid = repository.refs().resolve(&new, repository.database())?;

            let filter = match diff_filter {
                Some(spec) => DiffFilter::try_parse(&spec)
                    .ok_or_else(|| anyhow::anyhow!("invalid diff filter {spec:?}"))?,
                None => DiffFilter::all(),
            };

            let diff = repository
                .database()
                .tree_diff(Some(&old_oid), Some(&new_oid))?;
            for (path, change) in diff.changes() {
                if change.matches_filter(filter) {
                    println!("{}\t{}", change.status_char(), path.display());
                }
            }
            Ok(())
        }
    }
}

/// Build the hierarchical tree from the index and store every subtree,
/// returning the root id.
fn write_tree_from_index(
    repository: &Repository,
    index: &twig::areas::index::Index,
) -> anyhow::Result<twig::artifacts::objects::object_id::ObjectId> {
    let entries: Vec<_> = index.entries().cloned().collect();
    let tree = Tree::build(entries.iter())?;
    tree.traverse(&|subtree| repository.database().store(subtree).map(|_| ()))?;
    tree.object_id()
}
