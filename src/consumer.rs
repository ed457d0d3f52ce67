/// Consumer task and flush timer for a `CaptureSession`.
///
/// The consumer drains the capture queue into the frame writer. Its only
/// waiting point is the bounded dequeue, which is also where it notices a
/// stop: cancellation latency is at most `PROCESS_TIMEOUT`.
use core::sync::atomic::Ordering;

use embassy_time::Ticker;

use crate::config::{FLUSH_INTERVAL, PROCESS_TIMEOUT};
use crate::session::{CaptureSession, WifiLink, WiredLink};
use crate::writer::CaptureSink;

impl<S, W, E> CaptureSession<S, W, E>
where
    S: CaptureSink,
    W: WifiLink,
    E: WiredLink,
{
    /// Drain the queue until the session stops or the packet limit is hit.
    ///
    /// Reaching the limit stops the session from here, before the next
    /// dequeue, so no record beyond the limit is written.
    pub async fn run_consumer(&self) {
        log::debug!("Consumer running");

        while self.running.load(Ordering::Acquire) {
            if self.remaining.load(Ordering::Acquire) == 0 {
                log::info!("Packet limit reached");
                if let Err(e) = self.shutdown(false).await {
                    log::debug!("Limit stop skipped: {}", e);
                }
                break;
            }

            let Some(desc) = self.queue.dequeue(PROCESS_TIMEOUT).await else {
                continue;
            };

            if !self.running.load(Ordering::Acquire) {
                self.pool.release(desc.into_buffer());
                self.stats.discarded(1);
                break;
            }

            let written = self.writer.lock().await.write_record(
                desc.payload(),
                desc.original_len(),
                desc.timestamp(),
            );
            match written {
                Ok(()) => {
                    self.stats.written();
                    // Only a finite, positive limit counts down
                    let _ = self.remaining.fetch_update(
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        |n| (n > 0).then(|| n - 1),
                    );
                }
                Err(e) => {
                    log::warn!("Save captured packet failed: {}", e);
                    self.stats.write_error();
                }
            }

            self.pool.release(desc.into_buffer());
        }

        log::debug!("Consumer exited");
        self.consumer_done.signal(());
    }

    /// Body of a dedicated consumer task: run once per session start.
    pub async fn consumer_task(&self) -> ! {
        loop {
            self.consumer_wake.wait().await;
            self.run_consumer().await;
        }
    }

    /// Flush the open stream every `FLUSH_INTERVAL` until the session
    /// disarms the timer.
    pub async fn run_flush_timer(&self) {
        let mut ticker = Ticker::every(FLUSH_INTERVAL);
        while self.flush_armed.load(Ordering::Acquire) {
            ticker.next().await;
            if !self.flush_armed.load(Ordering::Acquire) {
                break;
            }
            let mut writer = self.writer.lock().await;
            if writer.is_open() {
                // Failures are logged by the writer
                let _ = writer.flush();
            }
        }
    }

    /// Body of a dedicated flush task.
    pub async fn flush_task(&self) -> ! {
        loop {
            self.flush_wake.wait().await;
            self.run_flush_timer().await;
        }
    }
}
