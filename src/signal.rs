//! Interrupt handling.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Exit status used when a second interrupt arrives.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// SIGINT and SIGHUP listeners, registered once so no interrupt slips
/// through between two waits.
struct Interrupts {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: Option<tokio::signal::unix::Signal>,
}

impl Interrupts {
    #[cfg(unix)]
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let interrupt = signal(SignalKind::interrupt())?;
        let hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => Some(hangup),
            Err(e) => {
                tracing::warn!("unable to watch SIGHUP: {}", e);
                None
            }
        };
        Ok(Self { interrupt, hangup })
    }

    #[cfg(not(unix))]
    fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn next(&mut self) {
        match self.hangup.as_mut() {
            Some(hangup) => {
                tokio::select! {
                    _ = self.interrupt.recv() => {}
                    _ = hangup.recv() => {}
                }
            }
            None => {
                self.interrupt.recv().await;
            }
        }
    }

    #[cfg(not(unix))]
    async fn next(&mut self) {
        tokio::signal::ctrl_c().await.ok();
    }
}

/// Cancel `cancel` on the first SIGINT/SIGHUP; exit the process on the
/// second.
pub fn install(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interrupts = match Interrupts::register() {
            Ok(interrupts) => interrupts,
            Err(e) => {
                tracing::warn!("unable to watch interrupts: {}", e);
                return;
            }
        };

        interrupts.next().await;
        tracing::info!("Interrupt received, finishing recording...");
        cancel.cancel();

        interrupts.next().await;
        tracing::warn!("Second interrupt, exiting");
        std::process::exit(INTERRUPTED_EXIT_CODE);
    })
}
