use std::path::{Path, PathBuf};
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

use anyhow::anyhow;
use logdog_types::Handler;
use tokio::sync::mpsc;

type Batch = (PathBuf, Vec<String>);

/// Runs a handler on its own worker thread
///
/// `handle` only queues the batch, so a slow or stuck handler never stalls
/// the tick. Batches are processed one at a time in the order they were
/// queued. Errors are logged by the worker. Dropping the wrapper waits for
/// the queue to drain.
pub struct Detached {
    name: String,
    sender: Option<mpsc::UnboundedSender<Batch>>,
    worker: Option<JoinHandle<()>>,
}

impl Detached {
    pub fn new<H>(inner: H) -> std::io::Result<Self>
    where
        H: Handler + 'static,
    {
        let name = inner.describe();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Batch>();

        let worker = std::thread::Builder::new()
            .name(format!("logdog-{name}"))
            .spawn({
                let name = name.clone();
                move || {
                    while let Some((path, lines)) = receiver.blocking_recv() {
                        match panic::catch_unwind(AssertUnwindSafe(|| inner.handle(&path, &lines))) {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                tracing::error!(handler = %name, path = %path.display(), "handler failed: {:#}", e);
                            }
                            Err(_) => {
                                tracing::error!(handler = %name, path = %path.display(), "handler panicked");
                            }
                        }
                    }
                    tracing::debug!(handler = %name, "worker stopped");
                }
            })?;

        Ok(Self {
            name,
            sender: Some(sender),
            worker: Some(worker),
        })
    }
}

impl Handler for Detached {
    fn handle(&self, path: &Path, lines: &[String]) -> anyhow::Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("{} is shut down", self.name))?;
        sender
            .send((path.to_path_buf(), lines.to_vec()))
            .map_err(|_| anyhow!("{} worker has stopped", self.name))
    }

    fn describe(&self) -> String {
        format!("detached:{}", self.name)
    }
}

impl Drop for Detached {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
