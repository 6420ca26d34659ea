//! Session creation with transparent PTY→headless fallback.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use std::sync::Arc;
use tracing::warn;

use super::headless::{is_permission_denied, HeadlessHandle};
use super::pty::PtyHandle;
use super::terminal::TerminalHandle;

/// Spawn `shell` in `cwd` with `env`, preferring a PTY. If PTY allocation is
/// denied by the host (common in sandboxed CI containers lacking
/// `/dev/ptmx`), transparently falls back to a headless pipe-backed child.
pub async fn spawn_session(
    shell: &str,
    cwd: &Path,
    env: &HashMap<String, String>,
    pty_size: (u16, u16),
) -> Result<(TerminalHandle, u32)> {
    match PtyHandle::spawn(shell, cwd, env, pty_size) {
        Ok((pty, pid)) => Ok((TerminalHandle::Pty(Arc::new(pty)), pid)),
        Err(e) if is_permission_denied(&e) => {
            warn!("PTY allocation denied, falling back to headless transport: {e}");
            let (headless, pid) = HeadlessHandle::spawn(shell, cwd, env)?;
            Ok((TerminalHandle::Headless(Arc::new(headless)), pid))
        }
        Err(e) => Err(e),
    }
}
