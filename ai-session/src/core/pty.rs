//! PTY-backed terminal transport.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use portable_pty::{native_pty_system, Child, CommandBuilder, PtySize};

/// Handle to a single PTY-backed child process.
///
/// Grounded on the teacher's `PtyHandle`, with the direct Claude-exec
/// convenience methods dropped: this layer only ever spawns a shell, and
/// the runtime is launched afterwards by writing its launch command as
/// keystrokes (see `agentmux_core::runtime`).
pub struct PtyHandle {
    size: PtySize,
    pid: u32,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    reader: Arc<Mutex<Box<dyn Read + Send>>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl PtyHandle {
    pub fn spawn(
        shell: &str,
        cwd: &std::path::Path,
        env: &std::collections::HashMap<String, String>,
        (rows, cols): (u16, u16),
    ) -> Result<(Self, u32)> {
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pty_system = native_pty_system();
        let pair = pty_system.openpty(size)?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.cwd(cwd);
        for (k, v) in env {
            cmd.env(k, v);
        }

        let child = pair.slave.spawn_command(cmd)?;
        let pid = child.process_id().unwrap_or(0);
        drop(pair.slave);

        let reader = pair.master.try_clone_reader()?;
        let writer = pair.master.take_writer()?;

        Ok((
            Self {
                size,
                pid,
                child: Arc::new(Mutex::new(child)),
                reader: Arc::new(Mutex::new(reader)),
                writer: Arc::new(Mutex::new(writer)),
            },
            pid,
        ))
    }

    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let writer = self.writer.clone();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut w = writer.lock().unwrap();
            w.write_all(&data)?;
            w.flush()?;
            Ok(())
        })
        .await?
    }

    pub async fn read(&self) -> Result<Vec<u8>> {
        let reader = self.reader.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut r = reader.lock().unwrap();
            let mut buf = vec![0u8; 8192];
            match r.read(&mut buf) {
                Ok(0) => Ok(Vec::new()),
                Ok(n) => {
                    buf.truncate(n);
                    Ok(buf)
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Vec::new()),
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }

    pub async fn is_running(&self) -> bool {
        let child = self.child.clone();
        tokio::task::spawn_blocking(move || {
            let mut c = child.lock().unwrap();
            matches!(c.try_wait(), Ok(None))
        })
        .await
        .unwrap_or(false)
    }

    /// Graceful SIGTERM. Falls back to SIGKILL if the platform signal send
    /// fails (e.g. the process already exited).
    pub async fn terminate(&self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = self.pid;
        tokio::task::spawn_blocking(move || -> Result<()> {
            if pid == 0 {
                return Ok(());
            }
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
                Err(e) => Err(anyhow::anyhow!("SIGTERM failed: {e}")),
            }
        })
        .await?
    }

    /// Forceful SIGKILL via the child handle.
    pub async fn kill(&self) -> Result<()> {
        let child = self.child.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut c = child.lock().unwrap();
            c.kill()?;
            Ok(())
        })
        .await?
    }

    pub fn size(&self) -> (u16, u16) {
        (self.size.rows, self.size.cols)
    }
}
