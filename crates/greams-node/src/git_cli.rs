//! [`PackSource`] backed by the system `git` binary.

use async_trait::async_trait;
use bytes::Bytes;
use greams_git::{GitError, ObjectId, PackSource, RefAdvertisement};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Runs `git` against one git directory.
#[derive(Debug, Clone)]
pub struct GitCli {
    git_dir: PathBuf,
    program: String,
}

impl GitCli {
    /// Creates an adapter for the repository at `git_dir` (a bare
    /// repository or a `.git` directory).
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
            program: "git".to_string(),
        }
    }

    /// Uses `program` instead of `git` from `PATH`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn run(&self, args: &[&str], stdin: Option<Vec<u8>>) -> greams_git::Result<Vec<u8>> {
        let mut command = Command::new(&self.program);
        command
            .arg("--git-dir")
            .arg(&self.git_dir)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| GitError::Source(format!("failed to run {}: {e}", self.program)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(&input).await?;
            drop(pipe);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(GitError::Source(format!(
                "git {} failed ({}): {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl PackSource for GitCli {
    async fn advertise_refs(&self) -> greams_git::Result<Vec<RefAdvertisement>> {
        let mut refs = Vec::new();
        if let Ok(head) = self.run(&["rev-parse", "--verify", "-q", "HEAD"], None).await {
            let head = String::from_utf8_lossy(&head);
            refs.push(RefAdvertisement::new(ObjectId::from_hex(head.trim())?, "HEAD"));
        }

        let listing = self
            .run(&["for-each-ref", "--format=%(objectname) %(refname)"], None)
            .await?;
        refs.extend(parse_ref_lines(&String::from_utf8_lossy(&listing))?);
        Ok(refs)
    }

    async fn list_objects(
        &self,
        wants: &[ObjectId],
        haves: &[ObjectId],
    ) -> greams_git::Result<BTreeSet<ObjectId>> {
        let mut args = vec!["rev-list".to_string(), "--objects".to_string()];
        args.extend(wants.iter().map(ToString::to_string));
        if !haves.is_empty() {
            args.push("--not".to_string());
            args.extend(haves.iter().map(ToString::to_string));
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let listing = self.run(&args, None).await?;
        let oids = parse_object_lines(&String::from_utf8_lossy(&listing))?;
        debug!(objects = oids.len(), "Listed objects");
        Ok(oids)
    }

    async fn pack_objects(&self, oids: &[ObjectId]) -> greams_git::Result<Bytes> {
        let input: String = oids.iter().map(|oid| format!("{oid}\n")).collect();
        let pack = self
            .run(&["pack-objects", "--stdout", "-q"], Some(input.into_bytes()))
            .await?;
        debug!(objects = oids.len(), bytes = pack.len(), "Packed objects");
        Ok(Bytes::from(pack))
    }
}

/// Parses `for-each-ref --format='%(objectname) %(refname)'` output.
fn parse_ref_lines(listing: &str) -> greams_git::Result<Vec<RefAdvertisement>> {
    listing
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let (id, name) = line
                .split_once(' ')
                .ok_or_else(|| GitError::Source(format!("unexpected ref line: {line}")))?;
            Ok(RefAdvertisement::new(ObjectId::from_hex(id)?, name.trim()))
        })
        .collect()
}

/// Parses `rev-list --objects` output: an id, optionally followed by a path.
fn parse_object_lines(listing: &str) -> greams_git::Result<BTreeSet<ObjectId>> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(ObjectId::from_hex)
        .collect()
}
