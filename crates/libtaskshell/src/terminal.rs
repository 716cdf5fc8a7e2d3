use std::io;
use std::sync::Arc;

use taskshell_protocol::TerminalGeometry;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::session::Resizer;

/// The local terminal device.
pub trait TerminalDevice: Send + Sync {
    fn enter_raw_mode(&self) -> io::Result<()>;

    /// Must be safe to call on a terminal that is not in raw mode.
    fn restore_mode(&self) -> io::Result<()>;

    fn geometry(&self) -> io::Result<TerminalGeometry>;

    /// Current geometry, delivered every time the terminal is resized.
    fn resize_events(&self) -> io::Result<mpsc::UnboundedReceiver<TerminalGeometry>>;
}

/// The process's controlling terminal, driven through crossterm.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleTerminal;

impl TerminalDevice for ConsoleTerminal {
    fn enter_raw_mode(&self) -> io::Result<()> {
        crossterm::terminal::enable_raw_mode()
    }

    fn restore_mode(&self) -> io::Result<()> {
        crossterm::terminal::disable_raw_mode()
    }

    fn geometry(&self) -> io::Result<TerminalGeometry> {
        let (columns, rows) = crossterm::terminal::size()?;
        Ok(TerminalGeometry { columns, rows })
    }

    fn resize_events(&self) -> io::Result<mpsc::UnboundedReceiver<TerminalGeometry>> {
        let mut winch = signal(SignalKind::window_change())?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while winch.recv().await.is_some() {
                match ConsoleTerminal.geometry() {
                    Ok(geometry) => {
                        if tx.send(geometry).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("reading terminal size failed: {e}"),
                }
            }
        });
        Ok(rx)
    }
}

/// Scoped ownership of the terminal for one session.
///
/// When stdout is not a terminal the guard is inert. Otherwise the original
/// mode is restored exactly once: on [`TerminalGuard::restore`] or on drop,
/// whichever comes first, and whether or not raw mode was ever entered.
pub struct TerminalGuard {
    device: Option<Arc<dyn TerminalDevice>>,
    forwarder: Option<JoinHandle<()>>,
}

impl TerminalGuard {
    pub fn arm(tty: bool, device: Arc<dyn TerminalDevice>) -> Self {
        Self {
            device: tty.then_some(device),
            forwarder: None,
        }
    }

    /// Enter raw mode and keep `resizer` informed of the terminal geometry,
    /// starting with the current one.
    pub fn attach(&mut self, resizer: Resizer) -> io::Result<()> {
        let Some(device) = &self.device else {
            return Ok(());
        };
        device.enter_raw_mode()?;
        let mut events = device.resize_events()?;

        match device.geometry() {
            Ok(geometry) => resizer.resize(geometry),
            Err(e) => warn!("reading terminal size failed: {e}"),
        }

        self.forwarder = Some(tokio::spawn(async move {
            while let Some(geometry) = events.recv().await {
                debug!(%geometry, "terminal resized");
                resizer.resize(geometry);
            }
        }));
        Ok(())
    }

    pub fn restore(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(device) = self.device.take() {
            if let Err(e) = device.restore_mode() {
                warn!("restoring terminal mode failed: {e}");
            }
        }
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        self.restore();
    }
}
