//! Miss-path behaviour: single-flight loads, deadlines, negative caching

use bytes::Bytes;
use slabcache::{
    BreakdownStrategy, Cache, CacheConfig, Error, NoJitter, Result, SkipEmpty, Strategies,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config() -> CacheConfig {
    CacheConfig::default()
        .with_clear_interval(Duration::ZERO)
        .with_data_load_time(Duration::from_millis(500))
}

#[derive(Debug)]
struct BackendDown;

impl std::fmt::Display for BackendDown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "backend down")
    }
}

impl std::error::Error for BackendDown {}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_misses_share_one_load() -> Result<()> {
    let cache = Cache::new(config())?;
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get_or_load(b"hot-key", Duration::from_secs(10), move |key| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    let mut value = key.to_vec();
                    value.extend_from_slice(b"-loaded");
                    Ok::<_, BackendDown>(Bytes::from(value))
                })
                .await
        }));
    }

    for handle in handles {
        let value = handle.await.expect("caller panicked")?;
        assert_eq!(&value[..], b"hot-key-loaded");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.loads_in_flight(), 0);
    assert_eq!(&cache.get(b"hot-key")?[..], b"hot-key-loaded");
    assert_eq!(cache.stats().loads, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hit_skips_loader() -> Result<()> {
    let cache = Cache::new(config())?;
    cache.set(b"cached", b"present", Duration::from_secs(10))?;

    let value = cache
        .get_or_load(b"cached", Duration::from_secs(10), |_| async {
            Err::<Bytes, _>(BackendDown)
        })
        .await?;
    assert_eq!(&value[..], b"present");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_timeout_reaches_every_waiter() -> Result<()> {
    let cache = Cache::new(config().with_data_load_time(Duration::from_millis(100)))?;
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get_or_load(b"slow-key", Duration::from_secs(10), move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, BackendDown>(Bytes::from_static(b"late"))
                })
                .await
        }));
    }

    for handle in handles {
        let outcome = handle.await.expect("caller panicked");
        assert!(matches!(
            outcome,
            Err(Error::LoadTimeout { ref key, .. }) if key == "slow-key"
        ));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(cache.get(b"slow-key"), Err(Error::NotFound)));
    assert_eq!(cache.stats().load_timeouts, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_loader_failure_is_wrapped_with_key() -> Result<()> {
    let cache = Cache::new(config())?;

    let outcome = cache
        .get_or_load(b"broken", Duration::from_secs(10), |_| async {
            Err::<Bytes, _>(BackendDown)
        })
        .await;

    match outcome {
        Err(Error::LoaderFailed { key, source }) => {
            assert_eq!(key, "broken");
            assert_eq!(source.to_string(), "backend down");
        }
        other => panic!("expected LoaderFailed, got {:?}", other),
    }
    assert!(matches!(cache.get(b"broken"), Err(Error::NotFound)));

    // Failures are not cached; the next call loads again
    let value = cache
        .get_or_load(b"broken", Duration::from_secs(10), |_| async {
            Ok::<_, BackendDown>(Bytes::from_static(b"recovered"))
        })
        .await?;
    assert_eq!(&value[..], b"recovered");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_results_are_cached_briefly() -> Result<()> {
    let cache = Cache::new(config())?;
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let calls = Arc::clone(&calls);
        let value = cache
            .get_or_load(b"missing-row", Duration::from_secs(30), move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BackendDown>(Bytes::new())
            })
            .await?;
        assert!(value.is_empty());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.get(b"missing-row")?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_skip_empty_strategy_does_not_cache() -> Result<()> {
    let cache = Cache::new(config())?;
    cache.configure_strategies(
        Strategies::default()
            .with_avalanche(NoJitter)
            .with_penetration(SkipEmpty),
    );
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let calls = Arc::clone(&calls);
        cache
            .get_or_load(b"missing-row", Duration::from_secs(30), move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BackendDown>(Bytes::new())
            })
            .await?;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(cache.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_disabled_breakdown_loads_per_caller() -> Result<()> {
    let cache = Cache::new(config().with_breakdown(BreakdownStrategy::Disabled))?;
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get_or_load(b"hot-key", Duration::from_secs(10), move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, BackendDown>(Bytes::from_static(b"value"))
                })
                .await
        }));
    }
    for handle in handles {
        assert_eq!(&handle.await.expect("caller panicked")?[..], b"value");
    }

    // Callers that arrive before the first write-back each run their own load
    assert!(calls.load(Ordering::SeqCst) > 1);
    assert_eq!(cache.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_caller_does_not_cancel_load() -> Result<()> {
    let cache = Cache::new(config())?;
    let calls = Arc::new(AtomicUsize::new(0));

    let loader_calls = Arc::clone(&calls);
    let impatient = tokio::time::timeout(
        Duration::from_millis(20),
        cache.get_or_load(b"slow-row", Duration::from_secs(10), move |_| async move {
            loader_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok::<_, BackendDown>(Bytes::from_static(b"eventually"))
        }),
    )
    .await;
    assert!(impatient.is_err());

    // The load keeps running and writes back for everyone else
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(&cache.get(b"slow-row")?[..], b"eventually");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_loaded_entries_get_jittered_expiry() -> Result<()> {
    // Jitter is bounded by min_expiration, so the entry outlives ttl but not ttl + min
    let cache = Cache::new(config().with_min_expiration(Duration::from_millis(200)))?;

    cache
        .get_or_load(b"jittered", Duration::from_millis(200), |_| async {
            Ok::<_, BackendDown>(Bytes::from_static(b"value"))
        })
        .await?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(&cache.get(b"jittered")?[..], b"value");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(matches!(cache.get(b"jittered"), Err(Error::NotFound)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_get_set() -> Result<()> {
    let cache = Cache::new(config())?;

    let first = cache
        .get_set(b"config-key", b"initial", Duration::from_secs(10))
        .await?;
    assert_eq!(&first[..], b"initial");

    let second = cache
        .get_set(b"config-key", b"ignored", Duration::from_secs(10))
        .await?;
    assert_eq!(&second[..], b"initial");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_miss_path_validates_inputs() -> Result<()> {
    let cache = Cache::new(config())?;

    let outcome = cache
        .get_or_load(b"key", Duration::from_secs(10), |_| async {
            Ok::<_, BackendDown>(Bytes::from_static(b"value"))
        })
        .await;
    assert!(matches!(outcome, Err(Error::InvalidKey(_))));

    let outcome = cache
        .get_or_load(b"valid-key", Duration::from_secs(600), |_| async {
            Ok::<_, BackendDown>(Bytes::from_static(b"value"))
        })
        .await;
    assert!(matches!(outcome, Err(Error::InvalidExpiration(_))));
    Ok(())
}
