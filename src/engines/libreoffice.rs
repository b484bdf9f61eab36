use super::{single_input, Artifact, ConvertEngine, ConvertOptions, EngineType, PDF_CONTENT_TYPE};
use crate::error::{AppError, Result};
use crate::registry::Operation;
use crate::staging::StagedFile;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Kills the child's process group when dropped unless disarmed.
#[cfg_attr(not(unix), allow(dead_code))]
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            // SAFETY: killpg only sends a signal; the group was created by our spawn.
            unsafe {
                libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
}

pub struct LibreOfficeEngine {
    /// Path to LibreOffice/soffice executable
    soffice_path: Option<String>,
    timeout: Duration,
}

impl LibreOfficeEngine {
    pub fn new(timeout: Duration) -> Self {
        Self {
            soffice_path: None,
            timeout,
        }
    }

    pub fn with_soffice_path(mut self, path: String) -> Self {
        self.soffice_path = Some(path);
        self
    }

    fn get_soffice_path(&self) -> String {
        if let Some(path) = &self.soffice_path {
            return path.clone();
        }

        if let Ok(path) = std::env::var("SOFFICE_PATH") {
            return path;
        }

        if cfg!(target_os = "macos") {
            "/Applications/LibreOffice.app/Contents/MacOS/soffice".to_string()
        } else if cfg!(target_os = "windows") {
            r"C:\Program Files\LibreOffice\program\soffice.exe".to_string()
        } else {
            for path in &["/usr/bin/soffice", "/usr/bin/libreoffice"] {
                if std::path::Path::new(path).exists() {
                    return path.to_string();
                }
            }
            "soffice".to_string()
        }
    }

    /// Run a headless conversion of `input_path` into `output_dir`.
    ///
    /// A private user profile under `profile_dir` keeps concurrent
    /// conversions from contending for the same LibreOffice lock file.
    async fn convert_to_pdf(
        &self,
        input_path: &Path,
        output_dir: &Path,
        profile_dir: &Path,
    ) -> Result<()> {
        let soffice_path = self.get_soffice_path();

        let mut command = Command::new(&soffice_path);
        command
            .arg(format!(
                "-env:UserInstallation=file://{}",
                profile_dir.display()
            ))
            .args(["--headless", "--convert-to", "pdf", "--outdir"])
            .arg(output_dir)
            .arg(input_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| {
            AppError::conversion(
                EngineType::LibreOffice,
                format!("office suite could not be started: {}", e),
            )
        })?;
        // soffice forks its worker, so the whole group goes down with the launcher.
        let mut group = ProcessGroup::new(child.id());

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => {
                group.disarm();
                result.map_err(|e| AppError::conversion(EngineType::LibreOffice, e))?
            }
            Err(_) => {
                warn!(
                    "LibreOffice exceeded {:?} timeout, process group killed",
                    self.timeout
                );
                return Err(AppError::conversion(
                    EngineType::LibreOffice,
                    format!("timed out after {:?}", self.timeout),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!("soffice stdout: {}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("soffice stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            warn!(
                "LibreOffice exited with {}: {}",
                output.status,
                stderr.trim()
            );
            return Err(AppError::conversion(
                EngineType::LibreOffice,
                format!("office suite exited with {}", output.status),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl ConvertEngine for LibreOfficeEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::LibreOffice
    }

    async fn is_available(&self) -> bool {
        let soffice_path = self.get_soffice_path();
        let probe = Command::new(soffice_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        matches!(
            tokio::time::timeout(self.timeout, probe).await,
            Ok(Ok(status)) if status.success()
        )
    }

    async fn convert(
        &self,
        _operation: Operation,
        inputs: &[StagedFile],
        output_dir: &Path,
        _options: &ConvertOptions,
    ) -> Result<Artifact> {
        let input = single_input(EngineType::LibreOffice, inputs)?;
        let profile_dir = output_dir
            .parent()
            .unwrap_or(output_dir)
            .join("office-profile");

        info!("Converting {} to PDF using LibreOffice", input.original_name);
        self.convert_to_pdf(&input.path, output_dir, &profile_dir)
            .await?;

        // LibreOffice creates a PDF with the same base name
        let staged_stem = input
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let output_path = output_dir.join(format!("{}.pdf", staged_stem));

        if !tokio::fs::try_exists(&output_path).await.unwrap_or(false) {
            warn!(
                "LibreOffice reported success but {} is missing",
                output_path.display()
            );
            return Err(AppError::conversion(
                EngineType::LibreOffice,
                "office suite produced no output",
            ));
        }

        Ok(Artifact {
            path: output_path,
            filename: format!("{}.pdf", input.original_stem()),
            content_type: PDF_CONTENT_TYPE,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Write an executable shell script standing in for soffice.
    fn stub(dir: &Path, body: &str) -> String {
        let path = dir.join("soffice-stub");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    fn setup() -> (tempfile::TempDir, StagedFile, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let input_dir = dir.path().join("input");
        let output_dir = dir.path().join("output");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::create_dir_all(&output_dir).unwrap();
        let path = input_dir.join("0f3a_letter.docx");
        std::fs::write(&path, b"PK fake docx").unwrap();
        let staged = StagedFile {
            path,
            extension: "docx".to_string(),
            original_name: "letter.docx".to_string(),
        };
        (dir, staged, output_dir)
    }

    #[tokio::test]
    async fn test_successful_conversion() {
        let (dir, staged, output_dir) = setup();
        let script = stub(
            dir.path(),
            r#"while [ $# -gt 0 ]; do
  case "$1" in
    --outdir) shift; out="$1" ;;
    *) in="$1" ;;
  esac
  shift
done
base=$(basename "$in")
printf '%%PDF-1.4 stub' > "$out/${base%.*}.pdf""#,
        );
        let engine = LibreOfficeEngine::new(Duration::from_secs(10)).with_soffice_path(script);

        let artifact = engine
            .convert(
                Operation::DocxToPdf,
                &[staged],
                &output_dir,
                &ConvertOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(artifact.filename, "letter.pdf");
        assert_eq!(artifact.path, output_dir.join("0f3a_letter.pdf"));
        assert!(artifact.path.exists());
    }

    #[tokio::test]
    async fn test_exit_zero_without_output_fails() {
        let (dir, staged, output_dir) = setup();
        let engine = LibreOfficeEngine::new(Duration::from_secs(10))
            .with_soffice_path(stub(dir.path(), "exit 0"));

        let err = engine
            .convert(
                Operation::DocxToPdf,
                &[staged],
                &output_dir,
                &ConvertOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("produced no output"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let (dir, staged, output_dir) = setup();
        let engine = LibreOfficeEngine::new(Duration::from_secs(10))
            .with_soffice_path(stub(dir.path(), "echo 'source file could not be loaded' >&2; exit 1"));

        let err = engine
            .convert(
                Operation::DocxToPdf,
                &[staged],
                &output_dir,
                &ConvertOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::ConversionFailed {
                backend: EngineType::LibreOffice,
                ..
            }
        ));
        assert!(!err.to_string().contains(dir.path().to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_hung_process_times_out() {
        let (dir, staged, output_dir) = setup();
        let engine = LibreOfficeEngine::new(Duration::from_millis(300))
            .with_soffice_path(stub(dir.path(), "exec sleep 30"));

        let started = std::time::Instant::now();
        let err = engine
            .convert(
                Operation::DocxToPdf,
                &[staged],
                &output_dir,
                &ConvertOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(err.to_string().contains("timed out"));
    }

    /// True while `pid` is a live, non-zombie process.
    #[cfg(target_os = "linux")]
    fn alive(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => !stat.contains(") Z"),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_forked_worker() {
        let (dir, staged, output_dir) = setup();
        let pid_file = dir.path().join("worker.pid");
        let script = stub(
            dir.path(),
            &format!("sleep 977 &\necho $! > {}\nwait", pid_file.display()),
        );
        let engine =
            LibreOfficeEngine::new(Duration::from_millis(300)).with_soffice_path(script);

        let err = engine
            .convert(
                Operation::DocxToPdf,
                &[staged],
                &output_dir,
                &ConvertOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out after 300ms"));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while alive(pid) && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive(pid), "worker {} survived the timeout", pid);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_conversion_error() {
        let (_dir, staged, output_dir) = setup();
        let engine = LibreOfficeEngine::new(Duration::from_secs(5))
            .with_soffice_path("/nonexistent/soffice".to_string());

        let err = engine
            .convert(
                Operation::DocxToPdf,
                &[staged],
                &output_dir,
                &ConvertOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::ConversionFailed {
                backend: EngineType::LibreOffice,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let engine = LibreOfficeEngine::new(Duration::from_secs(5))
            .with_soffice_path("/nonexistent/soffice".to_string());
        assert!(!engine.is_available().await);
    }
}
