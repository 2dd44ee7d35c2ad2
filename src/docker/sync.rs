//! Managed volume population and sync-back.
//!
//! Both directions run inside a disposable utility container so ownership can
//! be fixed from inside the volume. Sync-back compares checksums and never
//! propagates owner, group or permission bits, so running it twice writes
//! nothing the second time.

use super::DockerError;
use super::cli::{DockerCli, args};
use crate::context::DockerOptions;
use thiserror::Error;

const SOURCE_MOUNT: &str = "/source";
const VOLUME_MOUNT: &str = "/volume";
const DEST_MOUNT: &str = "/dest";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to create volume {volume}: {detail}")]
    Create { volume: String, detail: String },
    #[error("Failed to populate volume {volume} from {source_dir}: {detail}")]
    Populate {
        volume: String,
        source_dir: String,
        detail: String,
    },
    #[error("Failed to sync volume {volume} back to {dest}: {detail}")]
    SyncBack {
        volume: String,
        dest: String,
        detail: String,
    },
    #[error("Failed to remove volume {volume}: {detail}")]
    Remove { volume: String, detail: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub files_written: usize,
}

pub struct SyncEngine<'a> {
    cli: &'a DockerCli,
    options: &'a DockerOptions,
}

impl<'a> SyncEngine<'a> {
    pub fn new(cli: &'a DockerCli, options: &'a DockerOptions) -> Self {
        Self { cli, options }
    }

    /// Create `volume`, hand it to the configured uid/gid and copy
    /// `source_dir` into it.
    pub async fn populate(&self, volume: &str, source_dir: &str) -> Result<(), DockerError> {
        self.cli
            .transport()
            .ensure_directory(source_dir)
            .await?;

        let output = self.cli.run(args(["volume", "create", volume])).await?;
        if !output.is_success() {
            return Err(SyncError::Create {
                volume: volume.to_string(),
                detail: output.detail(),
            }
            .into());
        }

        let owner = format!("{}:{}", self.options.uid, self.options.gid);
        let script = format!(
            "chown {owner} {VOLUME_MOUNT} && cp -R {SOURCE_MOUNT}/. {VOLUME_MOUNT}/ && chown -R {owner} {VOLUME_MOUNT}"
        );
        let mut run = self.utility_container();
        run.extend([
            "-v".to_string(),
            format!("{source_dir}:{SOURCE_MOUNT}:ro"),
            "-v".to_string(),
            format!("{volume}:{VOLUME_MOUNT}"),
            self.options.sync_image.clone(),
            "sh".to_string(),
            "-c".to_string(),
            script,
        ]);

        let output = self.cli.run(run).await?;
        if !output.is_success() {
            return Err(SyncError::Populate {
                volume: volume.to_string(),
                source_dir: source_dir.to_string(),
                detail: output.detail(),
            }
            .into());
        }
        tracing::info!("Populated volume {} from {}", volume, source_dir);
        Ok(())
    }

    /// Copy changed files from `volume` back into `dest_dir`.
    pub async fn sync_back(&self, volume: &str, dest_dir: &str) -> Result<SyncReport, DockerError> {
        self.cli.transport().ensure_directory(dest_dir).await?;

        let mut run = self.utility_container();
        run.extend([
            "-v".to_string(),
            format!("{volume}:{VOLUME_MOUNT}:ro"),
            "-v".to_string(),
            format!("{dest_dir}:{DEST_MOUNT}"),
            self.options.sync_image.clone(),
        ]);
        run.extend(rsync_args(
            &format!("{VOLUME_MOUNT}/"),
            &format!("{DEST_MOUNT}/"),
        ));

        let output = self.cli.run(run).await?;
        if !output.is_success() {
            return Err(SyncError::SyncBack {
                volume: volume.to_string(),
                dest: dest_dir.to_string(),
                detail: output.detail(),
            }
            .into());
        }

        let report = SyncReport {
            files_written: count_written(&output.stdout),
        };
        tracing::info!(
            "Synced {} file(s) from volume {} to {}",
            report.files_written,
            volume,
            dest_dir
        );
        Ok(report)
    }

    pub async fn remove_volume(&self, volume: &str) -> Result<(), DockerError> {
        let output = self.cli.run(args(["volume", "rm", volume])).await?;
        if output.is_success() || output.stderr.contains("no such volume") {
            return Ok(());
        }
        Err(SyncError::Remove {
            volume: volume.to_string(),
            detail: output.detail(),
        }
        .into())
    }

    fn utility_container(&self) -> Vec<String> {
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            format!("dockbench-sync-{}", nanoid::nanoid!(8, &nanoid::alphabet::SAFE)),
        ]
    }
}

/// rsync invocation used for sync-back: recursive, symlinks and times kept,
/// checksum comparison, no ownership or permission propagation.
pub fn rsync_args(source: &str, dest: &str) -> Vec<String> {
    args([
        "rsync",
        "-rlt",
        "--checksum",
        "--no-owner",
        "--no-group",
        "--no-perms",
        "--itemize-changes",
        source,
        dest,
    ])
}

/// Number of files rsync reported as transferred in `--itemize-changes` output.
pub fn count_written(itemized: &str) -> usize {
    itemized
        .lines()
        .filter(|line| line.starts_with(">f") || line.starts_with("cL"))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::command_runner::ProcessOutput;
    use crate::docker::cli::DockerInvocation;
    use crate::docker::cli::tests::keypair;
    use crate::target::ExecutionTarget;
    use crate::test_utils::{ScriptedCommandRunner, ScriptedPrompter, test_context};
    use crate::transport::Transport;
    use std::sync::Arc;

    fn cli(
        root: &std::path::Path,
        runner: Arc<ScriptedCommandRunner>,
    ) -> (DockerCli, DockerOptions) {
        let ctx = test_context(root, runner, Arc::new(ScriptedPrompter::default()));
        let transport = Transport::new(&ctx, ExecutionTarget::local(keypair()));
        let cli = DockerCli::new(
            &ctx,
            transport,
            DockerInvocation::Context("dockbench-local".to_string()),
        );
        (cli, ctx.launcher_config().docker.clone())
    }

    #[test]
    fn test_count_written() {
        let itemized = "\
cd+++++++++ results/
>f+++++++++ results/a.csv
>f.st...... results/b.csv
.d..t...... ./
cL+++++++++ latest -> results/b.csv
";
        assert_eq!(count_written(itemized), 3);
        assert_eq!(count_written(""), 0);
    }

    #[tokio::test]
    async fn test_populate_fixes_ownership_then_copies() {
        let temp = tempfile::TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedCommandRunner::new()
                .on("dockbench:exists", ProcessOutput::success("dockbench:exists\n")),
        );
        let (cli, options) = cli(temp.path(), runner.clone());

        SyncEngine::new(&cli, &options)
            .populate("modelA_alice_output_dir", "/data/modelA/output")
            .await
            .unwrap();

        let lines = runner.command_lines();
        assert!(lines[1].ends_with("volume create modelA_alice_output_dir"));
        let run = &lines[2];
        assert!(run.contains("run --rm --name dockbench-sync-"));
        assert!(run.contains("-v /data/modelA/output:/source:ro"));
        assert!(run.contains("-v modelA_alice_output_dir:/volume"));
        assert!(run.contains("chown 1000:1000 /volume && cp -R /source/. /volume/"));
    }

    #[tokio::test]
    async fn test_sync_back_twice_writes_nothing_the_second_time() {
        let temp = tempfile::TempDir::new().unwrap();
        let runner = Arc::new(ScriptedCommandRunner::new().on_sequence(
            "rsync",
            vec![
                ProcessOutput::success(">f+++++++++ a.csv\n>f.st...... b.csv\n"),
                ProcessOutput::success(""),
            ],
        ));
        let (cli, options) = cli(temp.path(), runner.clone());
        let engine = SyncEngine::new(&cli, &options);

        let first = engine.sync_back("vol", "/data/out").await.unwrap();
        let second = engine.sync_back("vol", "/data/out").await.unwrap();

        assert_eq!(first.files_written, 2);
        assert_eq!(second.files_written, 0);
        let rsync = runner.calls_matching("rsync");
        assert!(rsync[0].command_line().contains("-v vol:/volume:ro -v /data/out:/dest"));
        assert!(rsync[0].command_line().contains("--checksum --no-owner --no-group --no-perms"));
    }

    #[tokio::test]
    async fn test_sync_back_failure_carries_tool_output() {
        let temp = tempfile::TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedCommandRunner::new()
                .on(
                    "rsync",
                    ProcessOutput::failure(23, "rsync: some files could not be transferred"),
                ),
        );
        let (cli, options) = cli(temp.path(), runner);

        let err = SyncEngine::new(&cli, &options)
            .sync_back("vol", "/data/out")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("some files could not be transferred"));
    }

    /// The real rsync flags leave an unchanged tree alone.
    #[tokio::test]
    async fn test_rsync_flags_are_idempotent_when_available() {
        if std::process::Command::new("rsync").arg("--version").output().is_err() {
            return;
        }
        let temp = tempfile::TempDir::new().unwrap();
        let source = temp.path().join("volume");
        let dest = temp.path().join("dest");
        std::fs::create_dir_all(source.join("results")).unwrap();
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(source.join("results/a.csv"), "1,2,3\n").unwrap();

        let sync = || {
            let args = rsync_args(
                &format!("{}/", source.display()),
                &format!("{}/", dest.display()),
            );
            let output = std::process::Command::new(&args[0])
                .args(&args[1..])
                .output()
                .unwrap();
            assert!(output.status.success());
            count_written(&String::from_utf8_lossy(&output.stdout))
        };

        assert_eq!(sync(), 1);
        assert_eq!(sync(), 0);
        assert_eq!(std::fs::read_to_string(dest.join("results/a.csv")).unwrap(), "1,2,3\n");
    }
}
