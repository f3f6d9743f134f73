use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// A small fixed-size thread pool for dispatching blocking connection
/// handlers, following this crate's thread-per-blocking-task model rather
/// than spawning an unbounded thread per connection.
pub struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(parking_lot::Mutex::new(receiver));

        let workers = (0..size.max(1))
            .map(|id| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("proxy-worker-{id}"))
                    .spawn(move || loop {
                        let job = {
                            let rx = receiver.lock();
                            rx.recv()
                        };
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    })
                    .expect("failed to spawn proxy worker thread")
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
        }
    }

    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(job));
        }
    }

    pub fn shutdown(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
