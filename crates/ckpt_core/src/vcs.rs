//! Git backend.
//!
//! Thin wrapper over libgit2 exposing exactly the primitives the engine
//! needs: refs, stashes, commits, diffs and resets. The repository is opened
//! per call so the backend can be shared across threads.

use crate::error::{CkptError, Result};
use crate::types::{DiffReport, DiffStat};
use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Diff, DiffFormat, DiffOptions, ErrorCode, IndexAddOption, Oid, Repository,
    ResetType, Signature, StashApplyOptions, StashFlags, StatusOptions,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Handle on one git working tree.
#[derive(Debug, Clone)]
pub struct GitBackend {
    workdir: PathBuf,
    git_dir: PathBuf,
}

impl GitBackend {
    /// Finds the repository containing `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotARepository` if `path` is not inside a non-bare repository.
    pub fn discover(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo =
            Repository::discover(path).map_err(|_| CkptError::NotARepository(path.to_path_buf()))?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| CkptError::NotARepository(path.to_path_buf()))?
            .to_path_buf();
        Ok(Self {
            workdir,
            git_dir: repo.path().to_path_buf(),
        })
    }

    /// Working tree root.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// The `.git` directory.
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn open(&self) -> Result<Repository> {
        Ok(Repository::open(&self.workdir)?)
    }

    // ===== HEAD =====

    /// Commit HEAD points at, or `None` on an unborn branch.
    pub fn head_commit(&self) -> Result<Option<Oid>> {
        head_oid(&self.open()?)
    }

    /// Branch HEAD is attached to, `None` when detached.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let repo = self.open()?;
        let head = repo.find_reference("HEAD")?;
        Ok(head
            .symbolic_target()
            .and_then(|t| t.strip_prefix("refs/heads/"))
            .map(str::to_string))
    }

    /// Name a checkpoint is taken relative to: the current branch, or `HEAD`.
    pub fn parent_label(&self) -> Result<String> {
        Ok(self
            .current_branch()?
            .unwrap_or_else(|| "HEAD".to_string()))
    }

    /// Creates an empty root commit if the repository has none yet.
    ///
    /// Returns the new commit when one was created.
    pub fn ensure_initial_commit(&self) -> Result<Option<Oid>> {
        let repo = self.open()?;
        if head_oid(&repo)?.is_some() {
            return Ok(None);
        }
        let tree_id = repo.treebuilder(None)?.write()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = signature(&repo)?;
        let oid = repo.commit(Some("HEAD"), &sig, &sig, "ckpt: initial commit", &tree, &[])?;
        info!(commit = %oid, "created initial commit for empty repository");
        Ok(Some(oid))
    }

    // ===== Status =====

    /// Paths with uncommitted changes.
    ///
    /// With `include_untracked` false only tracked modifications count.
    pub fn dirty_paths(&self, include_untracked: bool) -> Result<Vec<String>> {
        let repo = self.open()?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(include_untracked)
            .recurse_untracked_dirs(include_untracked)
            .include_ignored(false)
            .include_unmodified(false);

        let statuses = repo.statuses(Some(&mut opts))?;
        let mut paths = Vec::new();
        for entry in statuses.iter() {
            let status = entry.status();
            if status.is_ignored() || (!include_untracked && status.is_wt_new()) {
                continue;
            }
            if let Some(path) = entry.path() {
                paths.push(path.to_string());
            }
        }
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    // ===== Stashes =====

    /// Stashes tracked changes under `message`.
    pub fn stash_save(&self, message: &str) -> Result<Oid> {
        let mut repo = self.open()?;
        let sig = signature(&repo)?;
        let oid = repo.stash_save(&sig, message, Some(StashFlags::DEFAULT))?;
        debug!(stash = %oid, message, "stashed working tree changes");
        Ok(oid)
    }

    /// Lists stashes as `(index, message)`.
    pub fn list_stashes(&self) -> Result<Vec<(usize, String)>> {
        let mut repo = self.open()?;
        let mut stashes = Vec::new();
        repo.stash_foreach(|index, message, _oid| {
            stashes.push((index, message.to_string()));
            true
        })?;
        Ok(stashes)
    }

    /// Pops the newest stash whose message ends with `message`.
    ///
    /// Returns false if no such stash exists.
    pub fn stash_pop_by_message(&self, message: &str) -> Result<bool> {
        let index = self
            .list_stashes()?
            .into_iter()
            .find(|(_, m)| m.ends_with(message))
            .map(|(i, _)| i);
        match index {
            Some(index) => {
                let mut repo = self.open()?;
                let mut options = StashApplyOptions::new();
                options.reinstantiate_index();
                repo.stash_pop(index, Some(&mut options))?;
                debug!(message, "restored stashed changes");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ===== Refs =====

    /// Creates `full_name` pointing at `oid`. Fails if it already exists.
    pub fn create_ref(&self, full_name: &str, oid: Oid) -> Result<()> {
        let repo = self.open()?;
        repo.reference(full_name, oid, false, "ckpt: checkpoint")?;
        Ok(())
    }

    /// Deletes `full_name`. Returns false if it did not exist.
    pub fn delete_ref(&self, full_name: &str) -> Result<bool> {
        let repo = self.open()?;
        let result = match repo.find_reference(full_name) {
            Ok(mut reference) => {
                reference.delete()?;
                Ok(true)
            }
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        };
        result
    }

    /// Resolves a full or short ref name (or `HEAD`) to a commit.
    pub fn resolve(&self, name: &str) -> Result<Option<Oid>> {
        let repo = self.open()?;
        let result = match repo.resolve_reference_from_short_name(name) {
            Ok(reference) => Ok(Some(reference.peel_to_commit()?.id())),
            Err(e) if matches!(e.code(), ErrorCode::NotFound | ErrorCode::InvalidSpec) => Ok(None),
            Err(e) => Err(e.into()),
        };
        result
    }

    /// Lists `(full_name, commit)` for every ref whose name satisfies `filter`.
    pub fn list_refs(&self, filter: impl Fn(&str) -> bool) -> Result<Vec<(String, Oid)>> {
        let repo = self.open()?;
        let mut refs = Vec::new();
        for reference in repo.references()? {
            let reference = reference?;
            let Some(name) = reference.name() else {
                continue;
            };
            if !filter(name) {
                continue;
            }
            let name = name.to_string();
            if let Ok(commit) = reference.peel_to_commit() {
                refs.push((name, commit.id()));
            }
        }
        refs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(refs)
    }

    // ===== Commits =====

    /// Stages the whole working tree (tracked and untracked, honoring
    /// ignores) and commits it on top of `parent`.
    ///
    /// Returns `(commit, created)`; when the tree is unchanged no commit is
    /// made and `parent` is returned.
    pub fn commit_all(&self, message: &str, parent: Oid) -> Result<(Oid, bool)> {
        let repo = self.open()?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        let tree_id = index.write_tree()?;

        let parent_commit = repo.find_commit(parent)?;
        if parent_commit.tree_id() == tree_id {
            return Ok((parent, false));
        }

        let tree = repo.find_tree(tree_id)?;
        let sig = signature(&repo)?;
        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent_commit])?;
        debug!(commit = %oid, "committed working tree");
        Ok((oid, true))
    }

    /// Reads a file's content at a commit.
    pub fn read_file_at(&self, commit: Oid, path: &str) -> Result<Option<Vec<u8>>> {
        let repo = self.open()?;
        let tree = repo.find_commit(commit)?.tree()?;
        let result = match tree.get_path(Path::new(path)) {
            Ok(entry) => {
                let blob = entry.to_object(&repo)?.peel_to_blob()?;
                Ok(Some(blob.content().to_vec()))
            }
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        };
        result
    }

    /// First parent of a commit.
    pub fn first_parent(&self, commit: Oid) -> Result<Option<Oid>> {
        let repo = self.open()?;
        let commit = repo.find_commit(commit)?;
        Ok(commit.parent_ids().next())
    }

    // ===== Diffs =====

    /// Diff between two commits. `old = None` diffs against the empty tree.
    pub fn diff_commits(&self, old: Option<Oid>, new: Oid) -> Result<DiffReport> {
        let repo = self.open()?;
        let old_tree = match old {
            Some(oid) => Some(repo.find_commit(oid)?.tree()?),
            None => None,
        };
        let new_tree = repo.find_commit(new)?.tree()?;
        let diff = repo.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), None)?;
        render(&diff)
    }

    /// Diff between a commit and the current index plus working tree,
    /// including untracked files.
    pub fn diff_to_workdir(&self, old: Oid) -> Result<DiffReport> {
        let repo = self.open()?;
        let tree = repo.find_commit(old)?.tree()?;
        let mut opts = DiffOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .show_untracked_content(true);
        let diff = repo.diff_tree_to_workdir_with_index(Some(&tree), Some(&mut opts))?;
        render(&diff)
    }

    // ===== Moving HEAD =====

    /// `reset --soft`: moves HEAD (and its branch), keeps index and tree.
    pub fn reset_soft(&self, oid: Oid) -> Result<()> {
        let repo = self.open()?;
        let commit = repo.find_commit(oid)?;
        repo.reset(commit.as_object(), ResetType::Soft, None)?;
        Ok(())
    }

    /// `reset --hard`: moves HEAD and discards tracked changes.
    pub fn reset_hard(&self, oid: Oid) -> Result<()> {
        let repo = self.open()?;
        let commit = repo.find_commit(oid)?;
        repo.reset(commit.as_object(), ResetType::Hard, None)?;
        Ok(())
    }

    /// Creates (or reuses) branch `name` at `oid` and switches to it with a
    /// safe checkout that never overwrites local modifications.
    ///
    /// An existing branch is reused only if it already points at `oid`.
    pub fn switch_to_new_branch(&self, name: &str, oid: Oid) -> Result<()> {
        let repo = self.open()?;
        let commit = repo.find_commit(oid)?;

        let created = match repo.find_branch(name, BranchType::Local) {
            Ok(branch) => {
                let existing = branch.get().peel_to_commit()?.id();
                if existing != oid {
                    return Err(CkptError::vcs(
                        "switch-branch",
                        format!("branch {} exists at {}", name, existing),
                    ));
                }
                false
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                repo.branch(name, &commit, false)?;
                true
            }
            Err(e) => return Err(e.into()),
        };

        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        let switched = repo
            .checkout_tree(commit.as_object(), Some(&mut checkout))
            .and_then(|()| repo.set_head(&format!("refs/heads/{}", name)));

        if let Err(e) = switched {
            if created {
                if let Err(cleanup) = repo
                    .find_branch(name, BranchType::Local)
                    .and_then(|mut branch| branch.delete())
                {
                    warn!(branch = name, error = %cleanup, "failed to remove restore branch");
                }
            }
            return Err(e.into());
        }
        Ok(())
    }
}

fn head_oid(repo: &Repository) -> Result<Option<Oid>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?.id())),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Configured identity, or a fixed fallback for machines without one.
fn signature(repo: &Repository) -> Result<Signature<'static>> {
    match repo.signature() {
        Ok(sig) => Ok(sig),
        Err(_) => Ok(Signature::now("ckpt", "ckpt@localhost")?),
    }
}

fn render(diff: &Diff<'_>) -> Result<DiffReport> {
    let stats = diff.stats()?;
    let files = diff
        .deltas()
        .filter_map(|delta| {
            delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(|p| p.to_string_lossy().into_owned())
        })
        .collect();

    let mut patch = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if matches!(line.origin(), '+' | '-' | ' ') {
            patch.push(line.origin());
        }
        patch.push_str(&String::from_utf8_lossy(line.content()));
        true
    })?;

    Ok(DiffReport {
        stat: DiffStat {
            added: stats.insertions(),
            removed: stats.deletions(),
            files_changed: stats.files_changed(),
        },
        files,
        patch,
    })
}
