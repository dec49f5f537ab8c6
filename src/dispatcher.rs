use crossbeam_channel::{bounded, unbounded};
use std::thread;

/// An isolated per-item job failure. Never escalates past the owning
/// stage unless the stage's surviving set is exhausted.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub index: usize,
    pub message: String,
}

/// Clamp a requested worker count to the machine's parallelism.
/// `None` means "use everything available".
pub fn effective_workers(requested: Option<usize>) -> usize {
    let available = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    match requested {
        Some(n) if n >= 1 => n.min(available),
        _ => available,
    }
}

/// Fan out `job` over `items` on at most `worker_bound` threads and
/// join before returning. Results come back in input order regardless
/// of completion order; a failing job is recorded as a `JobFailure`
/// and does not disturb its siblings.
pub fn dispatch<T, R, F>(
    items: &[T],
    worker_bound: usize,
    job: F,
) -> Vec<Result<R, JobFailure>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> anyhow::Result<R> + Sync,
{
    let workers = worker_bound.max(1).min(items.len().max(1));
    let mut slots: Vec<Option<Result<R, JobFailure>>> =
        (0..items.len()).map(|_| None).collect();

    thread::scope(|scope| {
        let (task_tx, task_rx) = bounded::<usize>(workers * 2);
        let (res_tx, res_rx) = unbounded::<(usize, Result<R, JobFailure>)>();
        let job = &job;

        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let res_tx = res_tx.clone();
            scope.spawn(move || {
                while let Ok(index) = task_rx.recv() {
                    let outcome = job(&items[index]).map_err(|e| JobFailure {
                        index,
                        message: format!("{:#}", e),
                    });
                    if res_tx.send((index, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(task_rx);
        drop(res_tx);

        for index in 0..items.len() {
            // Workers drain the bounded queue as we feed it.
            task_tx.send(index).expect("worker pool hung up early");
        }
        drop(task_tx);

        while let Ok((index, outcome)) = res_rx.recv() {
            slots[index] = Some(outcome);
        }
    });

    slots
        .into_iter()
        .map(|s| s.expect("dispatcher lost a job result"))
        .collect()
}
