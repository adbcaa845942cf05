//! Shutdown handling for graceful daemon termination
//!
//! Termination signals cancel the control loop's token; the loop then
//! releases the fan hardware on its way to `Stopped`.

use pifan_core::FanError;
use pifan_hardware::FanHardware;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Wait for SIGINT, SIGTERM or SIGHUP
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = unix_signal(signal::unix::SignalKind::terminate());

    #[cfg(unix)]
    let hangup = unix_signal(signal::unix::SignalKind::hangup());

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    #[cfg(not(unix))]
    let hangup = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
        _ = hangup => {
            info!("Received SIGHUP, shutting down gracefully...");
        },
    }
}

#[cfg(unix)]
async fn unix_signal(kind: signal::unix::SignalKind) {
    match signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!("Failed to install signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Cancel `token` when the first termination signal arrives
pub fn spawn_signal_listener(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => token.cancel(),
            _ = token.cancelled() => {},
        }
    })
}

/// Release the fan hardware, logging instead of failing
///
/// Returns the release error, if any, so the caller can reflect it in the
/// exit code. Never blocks shutdown.
pub fn release_hardware(hardware: &mut FanHardware) -> Option<FanError> {
    info!("Releasing fan hardware...");

    match hardware.release() {
        Ok(()) => {
            info!("Fan stopped and lines released");
            None
        }
        Err(e) => {
            error!(stage = "release", "Failed to release fan hardware: {}", e);
            Some(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pifan_hardware::mock::{acquire_mock, MockPwmLine};
    use pifan_hardware::{PwmLine, PwmOutput};

    #[test]
    fn test_release_hardware_success() {
        let mut hardware = acquire_mock(13, Some(16));
        hardware.set_duty(50).unwrap();

        assert!(release_hardware(&mut hardware).is_none());
        assert!(hardware.is_released());
        // Second call is a no-op
        assert!(release_hardware(&mut hardware).is_none());
    }

    #[test]
    fn test_release_hardware_failure_is_returned() {
        let line = MockPwmLine::new(13);
        line.fail_release(true);
        let mut hardware = FanHardware::new(
            PwmOutput::new(Box::new(line.clone()) as Box<dyn PwmLine>),
            None,
        );

        let err = release_hardware(&mut hardware);
        assert!(matches!(err, Some(FanError::HardwareReleaseFailed(_))));
        assert_eq!(line.release_count(), 1);
    }

    #[tokio::test]
    async fn test_listener_exits_when_token_cancelled() {
        let token = CancellationToken::new();
        let handle = spawn_signal_listener(token.clone());

        token.cancel();
        handle.await.unwrap();
    }
}
