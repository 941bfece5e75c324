use super::output::ConsoleSink;
use crate::engine::sink::SinkError;
use crate::engine::{EngineRequest, Orchestrator, ProgressEvent, ProgressSink};
use std::io::IsTerminal;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Stop the running queue on Ctrl+C
///
/// Completed items are kept and the session is recorded as stopped. Abort
/// the returned handle once the run is over.
pub fn stop_on_ctrl_c(engine: Arc<Orchestrator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl+C, stopping queue...");
                eprintln!("\nStopping, waiting for in-flight downloads...");
                if let Err(e) = engine.handle(EngineRequest::Stop).await {
                    tracing::error!("Failed to stop queue: {}", e);
                }
            }
            Err(e) => {
                tracing::error!("Error waiting for Ctrl+C: {}", e);
            }
        }
    })
}

/// Console output that also signals when the queue pauses itself
pub struct PromptingSink {
    console: ConsoleSink,
    paused: mpsc::UnboundedSender<()>,
}

impl PromptingSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (paused, rx) = mpsc::unbounded_channel();
        (
            Self {
                console: ConsoleSink,
                paused,
            },
            rx,
        )
    }
}

impl ProgressSink for PromptingSink {
    fn notify(&self, event: ProgressEvent) -> Result<(), SinkError> {
        let paused = matches!(event, ProgressEvent::QueuePaused(_));
        self.console.notify(event)?;
        if paused {
            self.paused
                .send(())
                .map_err(|_| SinkError("pause prompt is not running".to_string()))?;
        }
        Ok(())
    }
}

/// Answer each self-inflicted pause from the terminal
///
/// Enter resumes the queue. End of input stops it, and so does every pause
/// when stdin is not a terminal, since nobody could answer. Abort the
/// returned handle once the run is over.
pub fn resume_on_prompt(
    engine: Arc<Orchestrator>,
    mut paused: mpsc::UnboundedReceiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interactive = std::io::stdin().is_terminal();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while paused.recv().await.is_some() {
            let request = if !interactive {
                eprintln!("Input is not a terminal, stopping the paused queue.");
                EngineRequest::Stop
            } else {
                match lines.next_line().await {
                    Ok(Some(_)) => EngineRequest::Resume,
                    Ok(None) => EngineRequest::Stop,
                    Err(e) => {
                        tracing::error!("Failed to read from stdin: {}", e);
                        EngineRequest::Stop
                    }
                }
            };
            tracing::info!(?request, "Answering queue pause");
            if let Err(e) = engine.handle(request).await {
                tracing::error!("Failed to answer queue pause: {}", e);
            }
        }
    })
}
