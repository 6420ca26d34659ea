//! Transport-agnostic handle unifying PTY and headless backends.

use std::sync::Arc;

use anyhow::Result;

use super::headless::HeadlessHandle;
use super::pty::PtyHandle;

/// Either a PTY or a headless child process, dispatched uniformly.
///
/// Cloning is cheap: both variants are internally `Arc`-wrapped, so the
/// reader task and the public API can each hold an independent handle.
pub enum TerminalHandle {
    Pty(Arc<PtyHandle>),
    Headless(Arc<HeadlessHandle>),
}

impl TerminalHandle {
    pub fn clone_handle(&self) -> TerminalHandle {
        match self {
            TerminalHandle::Pty(p) => TerminalHandle::Pty(p.clone()),
            TerminalHandle::Headless(h) => TerminalHandle::Headless(h.clone()),
        }
    }

    pub async fn write(&self, data: &[u8]) -> Result<()> {
        match self {
            TerminalHandle::Pty(p) => p.write(data).await,
            TerminalHandle::Headless(h) => h.write(data).await,
        }
    }

    pub async fn read(&self) -> Result<Vec<u8>> {
        match self {
            TerminalHandle::Pty(p) => p.read().await,
            TerminalHandle::Headless(h) => h.read().await,
        }
    }

    pub async fn is_running(&self) -> bool {
        match self {
            TerminalHandle::Pty(p) => p.is_running().await,
            TerminalHandle::Headless(h) => h.is_running().await,
        }
    }

    pub async fn terminate(&self) -> Result<()> {
        match self {
            TerminalHandle::Pty(p) => p.terminate().await,
            TerminalHandle::Headless(h) => h.terminate().await,
        }
    }

    pub async fn kill(&self) -> Result<()> {
        match self {
            TerminalHandle::Pty(p) => p.kill().await,
            TerminalHandle::Headless(h) => h.kill().await,
        }
    }
}
