/// Recording stand-ins for external tools
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tempfile::TempDir;

/// Shell script that appends each invocation's arguments to a log.
///
/// Extra script lines run after the arguments are logged; `$LOG` names
/// the log file so they can record more (environment, stdin).
pub(crate) struct RecordingTool {
    _dir: TempDir,
    program: PathBuf,
    log: PathBuf,
}

impl RecordingTool {
    /// A tool that records its arguments and exits 0
    pub(crate) fn new() -> Self {
        Self::with_script("")
    }

    pub(crate) fn with_script(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("tool");
        let log = dir.path().join("calls.log");

        let body = format!(
            "#!/bin/sh\nLOG='{}'\nprintf '%s\\n' \"$*\" >> \"$LOG\"\n{}\n",
            log.display(),
            script
        );
        fs::write(&program, body).unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            _dir: dir,
            program,
            log,
        }
    }

    pub(crate) fn program(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Logged lines, one per invocation plus whatever the script appended
    pub(crate) fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}
