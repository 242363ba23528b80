use crate::task::alloc::FrameAllocator;
use crate::{join_all, Error, Scheduler, Task};
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use rstest::rstest;
use static_assertions::assert_impl_all;
use std::alloc::Layout;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

assert_impl_all!(Scheduler: Send, Sync, Clone);
assert_impl_all!(Task<i64>: Send);
assert_impl_all!(Error: Send, Sync);

fn add(a: i64, b: i64) -> Task<i64> {
    Task::new(async move { Ok(a + b) })
}

fn sum_to(n: i64) -> Task<i64> {
    Task::new(async move {
        let mut acc = 0;
        for i in 0..n {
            acc = add(acc, i).await?;
        }
        Ok(acc)
    })
}

/// Schedules `task` under a value-capturing root and runs the scheduler.
fn run_root<T: Send + 'static>(scheduler: &Scheduler, task: Task<T>) -> Result<Option<T>> {
    let out = Arc::new(Mutex::new(None));
    let sink = out.clone();

    scheduler.schedule(Task::new(async move {
        let value = task.await?;
        *sink.lock() = Some(value);
        Ok(())
    }));
    scheduler.run()?;

    let value = out.lock().take();
    Ok(value)
}

#[rstest]
#[case::single_worker(1)]
#[case::many_workers(4)]
fn chained_arithmetic(#[case] workers: usize) -> Result<()> {
    let scheduler = Scheduler::new(workers);
    assert_eq!(run_root(&scheduler, sum_to(10))?, Some(45));
    assert_eq!(run_root(&scheduler, sum_to(1000))?, Some(499_500));
    Ok(())
}

#[test]
fn parallel_fan_out() -> Result<()> {
    let scheduler = Scheduler::new(4);
    let task = Task::new(async { join_all(vec![add(0, 0), add(1, 1), add(2, 2)]).await });
    assert_eq!(run_root(&scheduler, task)?, Some(vec![0, 2, 4]));
    Ok(())
}

#[rstest]
#[case::single_worker(1)]
#[case::many_workers(4)]
fn join_all_collects_in_input_order(#[case] workers: usize) -> Result<()> {
    fn slow_value(i: i64) -> Task<i64> {
        let delay = Duration::from_millis(fastrand::u64(0..15));
        Task::new(async move {
            // Deliberately blocks the worker: completion order becomes a
            // function of latency, input order must not.
            std::thread::sleep(delay);
            Ok(i)
        })
    }

    let scheduler = Scheduler::new(workers);
    let task = Task::new(async { join_all((0..16).map(slow_value)).await });
    assert_eq!(run_root(&scheduler, task)?, Some((0..16).collect::<Vec<_>>()));
    Ok(())
}

#[test]
fn fan_out_error_is_lowest_indexed() -> Result<()> {
    let scheduler = Scheduler::new(4);
    let started = Arc::new(AtomicUsize::new(0));

    let mk = |i: i64| {
        let started = started.clone();
        Task::new(async move {
            started.fetch_add(1, Ordering::SeqCst);
            if i == 0 {
                return Err(anyhow!("task 0 refused").into());
            }
            Ok(i)
        })
    };

    let children = vec![mk(0), mk(1), mk(2)];
    let task = Task::new(async move { join_all(children).await });

    let err = run_root(&scheduler, task).unwrap_err();
    assert!(err.to_string().contains("task 0 refused"));
    // Siblings of the failed child still ran to completion.
    assert_eq!(started.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn top_level_error_surfaces_from_run() {
    let scheduler = Scheduler::new(2);
    scheduler.schedule(Task::<()>::new(async { Err(anyhow!("root failure").into()) }));

    let err = scheduler.run().unwrap_err();
    assert!(matches!(err, Error::App(_)));
    assert_eq!(err.to_string(), "root failure");
}

#[test]
fn panicking_task_becomes_an_error() {
    let scheduler = Scheduler::new(2);
    scheduler.schedule(Task::<()>::new(async { panic!("kaboom") }));

    let err = scheduler.run().unwrap_err();
    assert!(matches!(&err, Error::Panic(msg) if msg.contains("kaboom")));
}

#[test]
fn child_error_can_be_handled_by_the_parent() -> Result<()> {
    let scheduler = Scheduler::new(2);
    let failing = Task::<i64>::new(async { Err(anyhow!("expendable").into()) });

    let task = Task::new(async move {
        let recovered = match failing.await {
            Ok(v) => v,
            Err(_) => -1,
        };
        Ok(recovered)
    });

    assert_eq!(run_root(&scheduler, task)?, Some(-1));
    Ok(())
}

#[test]
fn empty_join_all_completes_immediately() -> Result<()> {
    let scheduler = Scheduler::new(1);
    let task = Task::new(async { join_all(Vec::<Task<i64>>::new()).await });
    assert_eq!(run_root(&scheduler, task)?, Some(Vec::new()));
    Ok(())
}

#[test]
fn tiny_queue_capacity_makes_progress() -> Result<()> {
    let scheduler = Scheduler::builder()
        .worker_threads(1)
        .queue_capacity(1)
        .build();
    assert_eq!(run_root(&scheduler, sum_to(100))?, Some(4950));
    Ok(())
}

#[rstest]
#[case::single_worker(1)]
#[case::many_workers(4)]
fn many_top_level_tasks(#[case] workers: usize) -> Result<()> {
    let scheduler = Scheduler::new(workers);
    let count = Arc::new(AtomicUsize::new(0));

    scheduler.schedule_all((0..32).map(|_| {
        let count = count.clone();
        Task::new(async move {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }));

    scheduler.run()?;
    assert_eq!(count.load(Ordering::SeqCst), 32);
    Ok(())
}

#[test]
fn schedule_from_inside_a_running_task() -> Result<()> {
    let scheduler = Scheduler::new(2);
    let out = Arc::new(Mutex::new(None));

    let sink = out.clone();
    let inner = scheduler.clone();
    scheduler.schedule(Task::new(async move {
        inner.schedule(Task::new(async move {
            *sink.lock() = Some(7);
            Ok(())
        }));
        Ok(())
    }));

    scheduler.run()?;
    assert_eq!(*out.lock(), Some(7));
    Ok(())
}

#[test]
fn run_with_nothing_scheduled_returns_immediately() -> Result<()> {
    let scheduler = Scheduler::new(2);
    scheduler.run()?;
    Ok(())
}

#[test]
fn deep_nesting_completes() -> Result<()> {
    fn nest(depth: i64) -> Task<i64> {
        Task::new(async move {
            if depth == 0 {
                return Ok(0);
            }
            let below = nest(depth - 1).await?;
            Ok(below + 1)
        })
    }

    let scheduler = Scheduler::new(4);
    assert_eq!(run_root(&scheduler, nest(64))?, Some(64));
    Ok(())
}

/// Counts live frame allocations so the release-exactly-once property is
/// observable.
#[derive(Clone, Default)]
struct CountingFrames {
    live: Arc<AtomicIsize>,
    total: Arc<AtomicUsize>,
}

impl FrameAllocator for CountingFrames {
    unsafe fn allocate(&self, layout: Layout) -> *mut u8 {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        std::alloc::alloc(layout)
    }

    unsafe fn deallocate(&self, ptr: *mut u8, layout: Layout) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        std::alloc::dealloc(ptr, layout)
    }
}

#[test]
fn every_frame_is_released_exactly_once() -> Result<()> {
    let frames = CountingFrames::default();
    let scheduler = Scheduler::new(4);

    let per_child = frames.clone();
    let root = Task::new_in(
        async move {
            let children = (0..8)
                .map(|i| {
                    Task::new_in(
                        async move {
                            if i == 3 {
                                return Err(anyhow!("three always fails").into());
                            }
                            Ok(i)
                        },
                        per_child.clone(),
                    )
                })
                .collect::<Vec<_>>();

            // The error path must release child frames just like success.
            let _ = join_all(children).await;
            Ok(())
        },
        frames.clone(),
    );

    scheduler.schedule(root);
    scheduler.run().ok();

    // A handle dropped without ever being scheduled also releases its frame.
    drop(Task::new_in(async { Ok(()) }, frames.clone()));

    assert!(frames.total.load(Ordering::SeqCst) >= 10);
    assert_eq!(frames.live.load(Ordering::SeqCst), 0);
    Ok(())
}

#[rstest]
#[case::two_workers(2)]
#[case::eight_workers(8)]
fn fan_out_stress(#[case] workers: usize) -> Result<()> {
    let scheduler = Scheduler::new(workers);

    let task = Task::new(async {
        let batches = (0..8)
            .map(|b| {
                Task::new(async move {
                    let values = join_all((0..32).map(|i| add(b, i))).await?;
                    Ok(values.into_iter().sum::<i64>())
                })
            })
            .collect::<Vec<_>>();

        let sums = join_all(batches).await?;
        Ok(sums.into_iter().sum::<i64>())
    });

    // sum over b of (32*b + sum 0..32) = 32 * sum(0..8) + 8 * 496
    let expected = 32 * (0..8).sum::<i64>() + 8 * (0..32).sum::<i64>();
    assert_eq!(run_root(&scheduler, task)?, Some(expected));
    Ok(())
}
