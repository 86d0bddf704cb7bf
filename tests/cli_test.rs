//! CLI Tests
//!
//! Runs the `multipart-uploadr` binary against a temp directory backend.

#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};

    struct Fixture {
        dir: tempfile::TempDir,
        config: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = dir.path().join("config.yaml");
            let yaml = format!(
                r#"
upload:
  multipart_threshold: 4096
  part_size: 1024
  min_part_size: 1024
  concurrency: 2
provider:
  type: local
  root: {root}
  base_url: http://localhost:9000/files
  signing_secret: cli-test
logging:
  level: warn
  json: true
checkpoint_dir: {checkpoints}
"#,
                root = dir.path().join("store").display(),
                checkpoints = dir.path().join("checkpoints").display(),
            );
            std::fs::write(&config, yaml).unwrap();
            Self { dir, config }
        }

        fn source(&self, name: &str, len: usize) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, vec![42u8; len]).unwrap();
            path
        }

        fn store(&self) -> &Path {
            self.dir.path()
        }

        fn cmd(&self) -> Command {
            let mut cmd = Command::cargo_bin("multipart-uploadr").unwrap();
            cmd.arg("--config").arg(&self.config);
            cmd
        }
    }

    #[test]
    fn test_upload_small_file() {
        let fx = Fixture::new();
        let source = fx.source("small.txt", 100);

        fx.cmd()
            .arg("upload")
            .arg(&source)
            .args(["--destination", "docs", "--public"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"success\": true"))
            .stdout(predicate::str::contains(
                "http://localhost:9000/files/docs/small.txt",
            ));

        assert!(fx.store().join("store/objects/docs/small.txt").exists());
    }

    #[test]
    fn test_upload_multipart_file() {
        let fx = Fixture::new();
        let source = fx.source("big.bin", 10_000);

        fx.cmd()
            .arg("upload")
            .arg(&source)
            .args(["--name", "renamed.bin"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"upload_id\""));

        let stored = std::fs::read(fx.store().join("store/objects/renamed.bin")).unwrap();
        assert_eq!(stored.len(), 10_000);
    }

    #[test]
    fn test_resume_completes_and_clears_checkpoint() {
        let fx = Fixture::new();
        let source = fx.source("resume.bin", 5000);

        fx.cmd()
            .arg("resume")
            .arg(&source)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"success\": true"));

        let leftovers = std::fs::read_dir(fx.store().join("checkpoints"))
            .map(|d| d.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_abort_without_checkpoint_fails() {
        let fx = Fixture::new();
        let source = fx.source("none.bin", 10);

        fx.cmd()
            .arg("abort")
            .arg(&source)
            .assert()
            .failure()
            .stderr(predicate::str::contains("no checkpoint"));
    }

    #[test]
    fn test_missing_source_fails() {
        let fx = Fixture::new();

        fx.cmd()
            .arg("upload")
            .arg(fx.store().join("missing.bin"))
            .assert()
            .failure();
    }

    #[test]
    fn test_presign_prints_signed_url() {
        let fx = Fixture::new();

        fx.cmd()
            .args(["presign", "docs/report.pdf", "--expires-in", "60"])
            .assert()
            .success()
            .stdout(predicate::str::starts_with(
                "http://localhost:9000/files/docs/report.pdf?expires=",
            ));
    }

    #[test]
    fn test_print_metrics() {
        let fx = Fixture::new();
        let source = fx.source("m.txt", 10);

        fx.cmd()
            .arg("--print-metrics")
            .arg("upload")
            .arg(&source)
            .assert()
            .success()
            .stdout(predicate::str::contains("uploadr_uploads_total"));
    }

    #[test]
    fn test_missing_config_fails() {
        Command::cargo_bin("multipart-uploadr")
            .unwrap()
            .args(["--config", "/nonexistent/config.yaml", "presign", "a"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to load"));
    }
}
