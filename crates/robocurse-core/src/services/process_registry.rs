use std::collections::HashMap;
use std::process::Child;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Tracks every spawned worker process for the duration of one run, so a
/// stop request can take all of them down, descendants included.
///
/// The registry does not outlive the run; pids from a previous process
/// incarnation are never re-registered and therefore never touched.
pub struct ProcessRegistry {
    children: Mutex<HashMap<u32, Arc<Mutex<Child>>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, pid: u32, child: Arc<Mutex<Child>>) {
        self.children
            .lock()
            .expect("lock poisoned")
            .insert(pid, child);
    }

    pub fn deregister(&self, pid: u32) -> Option<Arc<Mutex<Child>>> {
        self.children.lock().expect("lock poisoned").remove(&pid)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.children
            .lock()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.children.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop one registered process: polite request, bounded wait, then a
    /// tree-wise kill. The entry stays registered until `deregister`.
    pub fn terminate(&self, pid: u32, grace: Duration) {
        let child = {
            let children = self.children.lock().expect("lock poisoned");
            children.get(&pid).cloned()
        };
        if let Some(child) = child {
            terminate_child(pid, &child, grace);
        }
    }

    /// Drain the registry: ask every process to exit, give the whole group
    /// one shared grace period, then kill whatever is left.
    pub fn terminate_all(&self, grace: Duration) {
        let entries: Vec<(u32, Arc<Mutex<Child>>)> = {
            let children = self.children.lock().expect("lock poisoned");
            children.iter().map(|(p, c)| (*p, c.clone())).collect()
        };

        for (pid, _) in &entries {
            request_exit(*pid);
        }

        let deadline = Instant::now() + grace;
        for (pid, child) in &entries {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !wait_for_exit(child, remaining) {
                log::warn!("worker pid {} ignored stop request, killing tree", pid);
                kill_tree(*pid, child);
            }
            self.deregister(*pid);
        }
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn terminate_child(pid: u32, child: &Arc<Mutex<Child>>, grace: Duration) {
    request_exit(pid);
    if !wait_for_exit(child, grace) {
        kill_tree(pid, child);
    }
}

fn wait_for_exit(child: &Arc<Mutex<Child>>, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        {
            let mut child = child.lock().expect("lock poisoned");
            match child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) => {}
                Err(_) => return true,
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(unix)]
fn request_exit(pid: u32) {
    // Workers run in their own process group; signal the whole group.
    unsafe {
        libc::killpg(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn request_exit(_pid: u32) {
    // No polite stop signal on this platform; the grace wait still lets
    // short-lived workers finish before the hard kill.
}

#[cfg(unix)]
fn kill_tree(pid: u32, child: &Arc<Mutex<Child>>) {
    unsafe {
        libc::killpg(pid as i32, libc::SIGKILL);
    }
    if let Ok(mut child) = child.lock() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

#[cfg(not(unix))]
fn kill_tree(pid: u32, child: &Arc<Mutex<Child>>) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output();
    if let Ok(mut child) = child.lock() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn spawn_sleeper() -> Child {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg("sleep 30")
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command.spawn().unwrap()
    }

    #[test]
    fn register_and_deregister() {
        let registry = ProcessRegistry::new();
        let child = spawn_sleeper();
        let pid = child.id();
        let child = Arc::new(Mutex::new(child));

        registry.register(pid, Arc::clone(&child));
        assert_eq!(registry.pids(), vec![pid]);

        let removed = registry.deregister(pid).unwrap();
        assert!(registry.is_empty());
        removed.lock().unwrap().kill().unwrap();
        removed.lock().unwrap().wait().unwrap();
    }

    #[test]
    fn terminate_all_drains_the_registry() {
        let registry = ProcessRegistry::new();
        for _ in 0..2 {
            let child = spawn_sleeper();
            let pid = child.id();
            registry.register(pid, Arc::new(Mutex::new(child)));
        }
        assert_eq!(registry.len(), 2);

        registry.terminate_all(Duration::from_millis(200));
        assert!(registry.is_empty());
    }

    #[test]
    fn terminate_is_idempotent_for_unknown_pid() {
        let registry = ProcessRegistry::new();
        registry.terminate(999_999, Duration::from_millis(10));
        assert!(registry.is_empty());
    }
}
