use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use index_fs::BlockCache;

/// 块缓存的后台任务：周期性写回脏块的线程，以及处理预读请求的线程
pub struct CacheDaemon {
    cache: Arc<BlockCache>,
    stop: Arc<AtomicBool>,
    flusher: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl CacheDaemon {
    pub fn spawn(cache: Arc<BlockCache>, flush_interval: Duration) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));

        let flusher = thread::Builder::new().name("cache-flush".into()).spawn({
            let cache = Arc::clone(&cache);
            let stop = Arc::clone(&stop);
            move || {
                while !stop.load(Ordering::Acquire) {
                    // 可能被提前唤醒，睡满一个周期再写回
                    let deadline = Instant::now() + flush_interval;
                    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
                        if stop.load(Ordering::Acquire) || left.is_zero() {
                            break;
                        }
                        thread::park_timeout(left);
                    }
                    cache.flush();
                }
            }
        })?;

        let reader = thread::Builder::new().name("read-ahead".into()).spawn({
            let cache = Arc::clone(&cache);
            let stop = Arc::clone(&stop);
            move || {
                while !stop.load(Ordering::Acquire) {
                    while cache.read_ahead_step() {}
                    thread::park();
                }
            }
        })?;

        let waiting = reader.thread().clone();
        cache.set_read_ahead_waker(Some(Box::new(move || waiting.unpark())));
        log::info!("cache daemon started, flush every {flush_interval:?}");

        Ok(Self {
            cache,
            stop,
            flusher: Some(flusher),
            reader: Some(reader),
        })
    }

    /// 停止后台线程并强制写回
    pub fn shutdown(mut self) -> usize {
        self.stop_workers();
        self.cache.flush()
    }

    fn stop_workers(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.cache.set_read_ahead_waker(None);

        for worker in [self.flusher.take(), self.reader.take()].into_iter().flatten() {
            worker.thread().unpark();
            if worker.join().is_err() {
                log::error!("cache worker panicked");
            }
        }
    }
}

impl Drop for CacheDaemon {
    fn drop(&mut self) {
        self.stop_workers();
    }
}
