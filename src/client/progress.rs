use std::io::Write;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;

/// Prints a `. ` tick every period until stopped.
pub struct Progress<W> {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<W>,
}

impl<W> Progress<W>
where
    W: Write + Send + 'static,
{
    pub fn start(mut writer: W, period: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        if let Err(e) = write!(writer, ". ").and_then(|_| writer.flush()) {
                            trace!(error = %e, "Progress write failed");
                        }
                    }
                }
            }
            writer
        });

        Self {
            stop: Some(stop),
            task,
        }
    }

    /// Stop ticking and hand the writer back.
    pub async fn stop(mut self) -> Option<W> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.task).await.ok()
    }
}

impl<W> Drop for Progress<W> {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stopped() {
        let progress = Progress::start(Vec::new(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(3500)).await;
        let out = progress.stop().await.unwrap();
        assert_eq!(out, b". . . ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_tick_before_first_period() {
        let progress = Progress::start(Vec::new(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(progress.stop().await.unwrap().is_empty());
    }
}
