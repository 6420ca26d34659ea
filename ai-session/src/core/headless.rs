//! Pipe-backed transport used when the host denies PTY allocation.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// Handle to a child process connected via plain pipes instead of a PTY.
///
/// Interactive TUIs generally detect the absence of a tty and degrade their
/// rendering, but the keystroke contract (`write`/`read`) still holds, which
/// is all the Session Backend promises its callers.
pub struct HeadlessHandle {
    child: Arc<Mutex<Child>>,
}

impl HeadlessHandle {
    pub fn spawn(
        shell: &str,
        cwd: &std::path::Path,
        env: &std::collections::HashMap<String, String>,
    ) -> Result<(Self, u32)> {
        let mut command = Command::new(shell);
        command
            .current_dir(cwd)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn()?;
        let pid = child.id().unwrap_or(0);
        Ok((
            Self {
                child: Arc::new(Mutex::new(child)),
            },
            pid,
        ))
    }

    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut child = self.child.lock().await;
        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("headless child has no stdin"))?;
        stdin.write_all(data).await?;
        stdin.flush().await?;
        Ok(())
    }

    pub async fn read(&self) -> Result<Vec<u8>> {
        let mut child = self.child.lock().await;
        let stdout = child
            .stdout
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("headless child has no stdout"))?;
        let mut buf = vec![0u8; 8192];
        match tokio::time::timeout(std::time::Duration::from_millis(50), stdout.read(&mut buf))
            .await
        {
            Ok(Ok(0)) => Ok(Vec::new()),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(Vec::new()),
        }
    }

    pub async fn is_running(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    pub async fn terminate(&self) -> Result<()> {
        self.kill().await
    }

    pub async fn kill(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
        Ok(())
    }
}

/// True when spawning via the PTY system failed because the platform denied
/// pseudo-terminal allocation (as opposed to, say, the shell not existing).
pub fn is_permission_denied(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .map(|io_err| io_err.kind() == std::io::ErrorKind::PermissionDenied)
            .unwrap_or(false)
    })
}
