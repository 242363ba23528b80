use crate::io::{read_file, write_file};
use crate::{join_all, Error, Scheduler, Task};
use anyhow::Result;
use parking_lot::Mutex;
use rstest::rstest;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Runs one capturing root task to completion.
fn run_capturing<T, F>(scheduler: &Scheduler, body: F) -> Result<Option<T>>
where
    T: Send + 'static,
    F: std::future::Future<Output = crate::Result<T>> + Send + 'static,
{
    let out = Arc::new(Mutex::new(None));
    let sink = out.clone();

    scheduler.schedule(Task::new(async move {
        let value = body.await?;
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
fn read_fan_out_preserves_input_order(#[case] workers: usize) -> Result<()> {
    let dir = TempDir::new()?;
    let paths: Vec<PathBuf> = [("a", "A"), ("b", "BB"), ("c", "CCC")]
        .iter()
        .map(|(name, contents)| {
            let path = dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            path
        })
        .collect();

    let scheduler = Scheduler::new(workers);
    let contents = run_capturing(&scheduler, async move {
        let reads = paths
            .into_iter()
            .map(|path| Task::new(async move { read_file(path).await }))
            .collect::<Vec<_>>();
        join_all(reads).await
    })?;

    assert_eq!(
        contents,
        Some(vec![b"A".to_vec(), b"BB".to_vec(), b"CCC".to_vec()])
    );
    Ok(())
}

#[test]
fn write_then_read_round_trips() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("payload");

    let scheduler = Scheduler::new(2);
    let bytes = run_capturing(&scheduler, async move {
        write_file(&path, "X").await?;
        read_file(&path).await
    })?;

    assert_eq!(bytes, Some(b"X".to_vec()));
    Ok(())
}

#[test]
fn write_creates_missing_files() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("fresh");
    assert!(!path.exists());

    let scheduler = Scheduler::new(1);
    let check = path.clone();
    let bytes = run_capturing(&scheduler, async move {
        write_file(&check, "made it").await?;
        read_file(&check).await
    })?;

    assert_eq!(bytes, Some(b"made it".to_vec()));
    Ok(())
}

#[test]
fn missing_file_fails_with_io_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("does-not-exist");

    let scheduler = Scheduler::new(1);
    scheduler.schedule(Task::<()>::new(async move {
        read_file(path).await?;
        Ok(())
    }));

    let err = scheduler.run().unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn empty_file_reads_empty() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("empty");
    std::fs::write(&path, b"")?;

    let scheduler = Scheduler::new(1);
    let bytes = run_capturing(&scheduler, async move { read_file(path).await })?;
    assert_eq!(bytes, Some(Vec::new()));
    Ok(())
}

#[test]
fn large_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("large");
    let data: Vec<u8> = (0..256 * 1024).map(|_| fastrand::u8(..)).collect();

    let scheduler = Scheduler::new(2);
    let expected = data.clone();
    let bytes = run_capturing(&scheduler, async move {
        write_file(&path, data).await?;
        read_file(&path).await
    })?;

    assert_eq!(bytes, Some(expected));
    Ok(())
}

#[test]
fn io_overlaps_with_compute() -> Result<()> {
    let dir = TempDir::new()?;
    let scheduler = Scheduler::new(4);

    let base = dir.path().to_path_buf();
    let totals = run_capturing(&scheduler, async move {
        let writers = (0..8)
            .map(|i| {
                let path = base.join(format!("chunk-{i}"));
                Task::new(async move {
                    let payload = vec![i as u8; 1024];
                    write_file(&path, payload).await?;
                    let back = read_file(&path).await?;
                    Ok(back.len())
                })
            })
            .collect::<Vec<_>>();

        let sizes = join_all(writers).await?;
        Ok(sizes.into_iter().sum::<usize>())
    })?;

    assert_eq!(totals, Some(8 * 1024));
    Ok(())
}
