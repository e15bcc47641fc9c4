//! Process shutdown signals.
//!
//! The agent tears down on Ctrl+C and on SIGTERM, which is what a container
//! runtime sends when stopping the pod.

use std::io;
use tokio::signal;

pub struct ShutdownSignal {
    #[cfg(unix)]
    terminate: signal::unix::Signal,
}

impl ShutdownSignal {
    /// Install the handlers. Signals that arrive after this returns are not
    /// lost, even if nobody is waiting yet.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: signal::unix::signal(signal::unix::SignalKind::terminate())?,
        })
    }

    /// Wait for the next shutdown signal and return its name.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> io::Result<&'static str> {
        tokio::select! {
            result = signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = self.terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> io::Result<&'static str> {
        signal::ctrl_c().await.map(|()| "SIGINT")
    }
}
