use std::process::{Child, Command, Stdio};

use crate::copy_client::{CopyClient, CopyError, CopyOutput};

pub struct ProcessCopyClient {
    binary: String,
}

impl ProcessCopyClient {
    pub fn new() -> Self {
        Self {
            binary: "robocopy".to_string(),
        }
    }

    pub fn with_binary(binary: String) -> Self {
        Self { binary }
    }

    fn map_spawn_error(e: std::io::Error) -> CopyError {
        if e.kind() == std::io::ErrorKind::NotFound {
            CopyError::ToolNotFound
        } else {
            CopyError::IoError(e.to_string())
        }
    }
}

impl Default for ProcessCopyClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyClient for ProcessCopyClient {
    fn spawn(&self, args: &[String]) -> Result<Child, CopyError> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Each worker gets its own process group so a stop request can take
        // down the whole process tree, descendants included.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command.spawn().map_err(Self::map_spawn_error)
    }

    fn list(&self, source: &str, max_depth: Option<u32>) -> Result<CopyOutput, CopyError> {
        // List-only enumeration against a destination that cannot exist, so
        // every entry reports as new and carries its size.
        let probe_dest = std::env::temp_dir()
            .join(format!("rc-enum-{}", std::process::id()))
            .display()
            .to_string();

        let mut args: Vec<String> = vec![
            source.to_string(),
            probe_dest,
            "/L".to_string(),
            "/E".to_string(),
            "/BYTES".to_string(),
            "/FP".to_string(),
            "/NJH".to_string(),
            "/NJS".to_string(),
            "/R:0".to_string(),
            "/W:0".to_string(),
        ];
        if let Some(depth) = max_depth {
            args.push(format!("/LEV:{}", depth + 1));
        }

        let command_str = format!("{} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .map_err(Self::map_spawn_error)?;

        let exit_code = output.status.code().unwrap_or(-1);
        // List mode reuses the copy exit bitmask; anything at or above the
        // failure bit means the enumeration itself is unreliable.
        if exit_code >= 8 || exit_code < 0 {
            return Err(CopyError::ProcessError {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                exit_code: Some(exit_code),
            });
        }

        Ok(CopyOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            command: command_str,
        })
    }

    fn version(&self) -> Result<String, CopyError> {
        let output = Command::new(&self.binary)
            .arg("/?")
            .output()
            .map_err(Self::map_spawn_error)?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let version_line = stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("unknown")
            .trim()
            .to_string();
        Ok(version_line)
    }
}
