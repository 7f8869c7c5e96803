use std::io::BufRead;
use std::process::Child;
use std::sync::{Arc, Mutex};

use crate::copy_client::CopyError;
use crate::services::worker::progress::ProgressBuffer;

const STDERR_TAIL_LINES: usize = 20;

/// Shared capture of a worker's output streams. Stdout feeds the progress
/// buffer line by line; the stderr tail is kept for failure messages.
pub struct StreamCapture {
    stderr_tail: Arc<Mutex<Vec<String>>>,
}

impl StreamCapture {
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .expect("lock poisoned")
            .join("\n")
    }
}

/// Attach reader threads to a freshly spawned worker.
///
/// Both pipes must still be present on the child; the readers run until the
/// process closes its streams and then exit on their own.
pub fn attach_readers(
    child: &mut Child,
    buffer: Arc<ProgressBuffer>,
) -> Result<StreamCapture, CopyError> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CopyError::IoError("failed to capture worker stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| CopyError::IoError("failed to capture worker stderr".to_string()))?;

    std::thread::spawn(move || {
        let reader = std::io::BufReader::new(stdout);
        for line in reader.lines() {
            match line {
                Ok(text) => buffer.push_line(&text),
                Err(_) => break,
            }
        }
    });

    let stderr_tail = Arc::new(Mutex::new(Vec::new()));
    let tail = Arc::clone(&stderr_tail);
    std::thread::spawn(move || {
        let reader = std::io::BufReader::new(stderr);
        for line in reader.lines() {
            match line {
                Ok(text) => {
                    let mut tail = tail.lock().expect("lock poisoned");
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.remove(0);
                    }
                    tail.push(text);
                }
                Err(_) => break,
            }
        }
    });

    Ok(StreamCapture { stderr_tail })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::time::Duration;

    fn spawn_shell(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap()
    }

    #[test]
    fn stdout_lines_reach_the_buffer() {
        let buffer = Arc::new(ProgressBuffer::new());
        let mut child = spawn_shell("printf '100%%\\n'");
        let _capture = attach_readers(&mut child, Arc::clone(&buffer)).unwrap();
        child.wait().unwrap();

        // Reader threads drain asynchronously after process exit.
        for _ in 0..50 {
            if buffer.snapshot().line_count > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(buffer.snapshot().line_count, 1);
        assert!(buffer.snapshot().parse_success);
    }

    #[test]
    fn stderr_tail_is_collected() {
        let buffer = Arc::new(ProgressBuffer::new());
        let mut child = spawn_shell("echo boom >&2");
        let capture = attach_readers(&mut child, buffer).unwrap();
        child.wait().unwrap();

        for _ in 0..50 {
            if !capture.stderr_tail().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(capture.stderr_tail(), "boom");
    }

    #[test]
    fn missing_pipes_error() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("true")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let result = attach_readers(&mut child, Arc::new(ProgressBuffer::new()));
        assert!(result.is_err());
        child.wait().unwrap();
    }
}
