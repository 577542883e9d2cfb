use crate::engine::error::EngineError;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info};

/// A pending task result.
///
/// Inline execution produces already-resolved handles; pooled execution
/// produces handles backed by a channel. Either way, [`TaskHandle::wait`]
/// blocks until the value is available.
pub struct TaskHandle<T> {
    inner: HandleInner<T>,
}

enum HandleInner<T> {
    Ready(T),
    Pending(mpsc::Receiver<T>),
}

impl<T> TaskHandle<T> {
    pub fn ready(value: T) -> Self {
        Self {
            inner: HandleInner::Ready(value),
        }
    }

    fn pending(receiver: mpsc::Receiver<T>) -> Self {
        Self {
            inner: HandleInner::Pending(receiver),
        }
    }

    /// Blocks until the task completes and returns its result.
    pub fn wait(self) -> T {
        match self.inner {
            HandleInner::Ready(value) => value,
            HandleInner::Pending(receiver) => receiver
                .recv()
                .expect("worker dropped without sending a result"),
        }
    }
}

/// Handle to a long-lived stateful actor.
///
/// Calls are executed one at a time against the actor's owned state, in the
/// order they were submitted, preserving single-writer discipline. On the
/// inline backend the state lives behind a mutex in the caller's process; on
/// the pooled backend it is owned by a dedicated thread and calls travel over
/// a channel.
pub struct ActorHandle<W> {
    inner: ActorInner<W>,
}

type ActorJob<W> = Box<dyn FnOnce(&mut W) + Send>;

enum ActorInner<W> {
    Inline(Arc<Mutex<W>>),
    Pooled(mpsc::Sender<ActorJob<W>>),
}

impl<W: Send + 'static> ActorHandle<W> {
    /// Invokes `operation` on the actor's state and returns a handle to the
    /// result.
    pub fn call<R, F>(&self, operation: F) -> TaskHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut W) -> R + Send + 'static,
    {
        match &self.inner {
            ActorInner::Inline(state) => {
                let mut guard = state.lock().expect("actor state poisoned");
                TaskHandle::ready(operation(&mut *guard))
            }
            ActorInner::Pooled(sender) => {
                let (tx, rx) = mpsc::channel();
                let job: ActorJob<W> = Box::new(move |state| {
                    let _ = tx.send(operation(state));
                });
                sender.send(job).expect("actor thread terminated");
                TaskHandle::pending(rx)
            }
        }
    }
}

/// Strategy interface over "run locally, sequentially" and "submit to a pool
/// of workers".
///
/// The two backends are function-equivalent: for identical inputs they
/// produce identical results, modulo floating-point effects of genuinely
/// concurrent execution. Results always come back in submission order, and
/// the only synchronization point is [`Executor::gather`]: once a batch is
/// dispatched it runs to completion or failure.
pub trait Executor {
    /// Shares a value with future tasks without copying it per task.
    fn scatter<T: Send + Sync + 'static>(&self, data: T) -> Arc<T> {
        Arc::new(data)
    }

    /// Submits one task per argument and returns the handles in submission
    /// order.
    fn deploy<A, T, F>(&self, task: F, args: Vec<A>) -> Vec<TaskHandle<T>>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(A) -> T + Send + Sync + Clone + 'static;

    /// Places a stateful worker and returns a handle for method calls.
    fn launch_actor<W, F>(&self, factory: F) -> ActorHandle<W>
    where
        W: Send + 'static,
        F: FnOnce() -> W + Send + 'static;

    /// Blocks until every handle resolves; results are returned in the order
    /// the tasks were submitted.
    fn gather<T: Send + 'static>(&self, handles: Vec<TaskHandle<T>>) -> Vec<T> {
        handles.into_iter().map(TaskHandle::wait).collect()
    }
}

/// Runs every task synchronously in the caller, one at a time.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl InlineExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for InlineExecutor {
    fn deploy<A, T, F>(&self, task: F, args: Vec<A>) -> Vec<TaskHandle<T>>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(A) -> T + Send + Sync + Clone + 'static,
    {
        args.into_iter()
            .map(|arg| TaskHandle::ready(task(arg)))
            .collect()
    }

    fn launch_actor<W, F>(&self, factory: F) -> ActorHandle<W>
    where
        W: Send + 'static,
        F: FnOnce() -> W + Send + 'static,
    {
        ActorHandle {
            inner: ActorInner::Inline(Arc::new(Mutex::new(factory()))),
        }
    }
}

/// Submits stateless tasks to a rayon thread pool and gives each actor a
/// dedicated long-lived thread that exclusively owns its state.
pub struct PooledExecutor {
    pool: rayon::ThreadPool,
    num_workers: usize,
}

impl PooledExecutor {
    pub fn new(num_workers: usize) -> Result<Self, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .thread_name(|i| format!("switchfe-task-{i}"))
            .build()
            .map_err(|e| EngineError::ThreadPool(e.to_string()))?;
        info!(num_workers, "pooled executor started");
        Ok(Self {
            pool,
            num_workers: num_workers.max(1),
        })
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }
}

impl Executor for PooledExecutor {
    fn deploy<A, T, F>(&self, task: F, args: Vec<A>) -> Vec<TaskHandle<T>>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(A) -> T + Send + Sync + Clone + 'static,
    {
        args.into_iter()
            .map(|arg| {
                let (tx, rx) = mpsc::channel();
                let task = task.clone();
                self.pool.spawn(move || {
                    let _ = tx.send(task(arg));
                });
                TaskHandle::pending(rx)
            })
            .collect()
    }

    fn launch_actor<W, F>(&self, factory: F) -> ActorHandle<W>
    where
        W: Send + 'static,
        F: FnOnce() -> W + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<ActorJob<W>>();
        thread::Builder::new()
            .name("switchfe-actor".to_string())
            .spawn(move || {
                let mut state = factory();
                // The loop ends when the last handle to the actor is dropped.
                for job in receiver {
                    job(&mut state);
                }
                debug!("actor thread finished");
            })
            .expect("failed to spawn actor thread");
        ActorHandle {
            inner: ActorInner::Pooled(sender),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_batch<X: Executor>(executor: &X) -> Vec<u64> {
        let handles = executor.deploy(|x: u64| x * x, vec![1, 2, 3, 4, 5]);
        executor.gather(handles)
    }

    #[test]
    fn inline_deploy_preserves_submission_order() {
        assert_eq!(square_batch(&InlineExecutor::new()), vec![1, 4, 9, 16, 25]);
    }

    #[test]
    fn pooled_deploy_preserves_submission_order() {
        let executor = PooledExecutor::new(4).unwrap();
        assert_eq!(square_batch(&executor), vec![1, 4, 9, 16, 25]);
    }

    #[test]
    fn backends_agree_on_identical_inputs() {
        let inline = InlineExecutor::new();
        let pooled = PooledExecutor::new(2).unwrap();
        assert_eq!(square_batch(&inline), square_batch(&pooled));
    }

    #[test]
    fn scatter_shares_without_copying() {
        let executor = InlineExecutor::new();
        let shared = executor.scatter(vec![1.0_f64; 1024]);
        let again = shared.clone();
        assert!(Arc::ptr_eq(&shared, &again));
    }

    struct Counter {
        count: u64,
    }

    fn actor_accumulates<X: Executor>(executor: &X) -> u64 {
        let actor = executor.launch_actor(|| Counter { count: 0 });
        let handles: Vec<_> = (1..=10)
            .map(|i| {
                actor.call(move |c: &mut Counter| {
                    c.count += i;
                    c.count
                })
            })
            .collect();
        let observed = executor.gather(handles);
        // Calls applied in submission order against the same state.
        assert_eq!(observed.last(), Some(&55));
        observed.into_iter().last().unwrap()
    }

    #[test]
    fn inline_actor_keeps_state_across_calls() {
        assert_eq!(actor_accumulates(&InlineExecutor::new()), 55);
    }

    #[test]
    fn pooled_actor_keeps_state_across_calls() {
        let executor = PooledExecutor::new(2).unwrap();
        assert_eq!(actor_accumulates(&executor), 55);
    }

    #[test]
    fn pooled_actors_do_not_share_state() {
        let executor = PooledExecutor::new(2).unwrap();
        let a = executor.launch_actor(|| Counter { count: 0 });
        let b = executor.launch_actor(|| Counter { count: 100 });
        let ra = a.call(|c| {
            c.count += 1;
            c.count
        });
        let rb = b.call(|c| {
            c.count += 1;
            c.count
        });
        assert_eq!(ra.wait(), 1);
        assert_eq!(rb.wait(), 101);
    }
}
