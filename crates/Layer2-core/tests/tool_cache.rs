//! End-to-end behavior of the memoizing decorator

use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use toolgate_core::cache::{RESERVED_CACHE_DIR, RESERVED_FORCE_REFRESH, RESERVED_OFFLINE_ONLY};
use toolgate_core::{
    tool_fn, CallArgs, CallOptions, FnCall, GateConfig, RateLimiter, RetryConfig, StoreRegistry,
    ToolCache, ToolCall, ToolCallExt,
};

struct Fixture {
    dir: tempfile::TempDir,
    config: Arc<GateConfig>,
    registry: Arc<StoreRegistry>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            config: Arc::new(GateConfig::new()),
            registry: Arc::new(StoreRegistry::new()),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn cache(&self, name: &str) -> ToolCache {
        ToolCache::new(name)
            .base_dir(self.path().join(name))
            .config(self.config.clone())
            .registry(self.registry.clone())
    }
}

fn counting_square(calls: Arc<AtomicUsize>) -> impl ToolCall<Output = i64> {
    FnCall::new("tests::square", move |args: &CallArgs| {
        calls.fetch_add(1, Ordering::SeqCst);
        let n: i64 = args.get(0)?;
        Ok(n * n)
    })
}

#[test]
fn test_identical_calls_compute_once() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let square = fx.cache("square").wrap(counting_square(calls.clone()));

    assert_eq!(square.call(&CallArgs::new().arg(&7)).unwrap(), 49);
    assert_eq!(square.call(&CallArgs::new().arg(&7)).unwrap(), 49);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(square.call(&CallArgs::new().arg(&8)).unwrap(), 64);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_results_survive_a_new_registry() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    fx.cache("persist")
        .wrap(counting_square(calls.clone()))
        .call(&CallArgs::new().arg(&3))
        .unwrap();

    // A fresh registry stands in for a fresh process
    let again = fx
        .cache("persist")
        .registry(Arc::new(StoreRegistry::new()))
        .wrap(counting_square(calls.clone()));
    assert_eq!(again.call(&CallArgs::new().arg(&3)).unwrap(), 9);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_changed_body_invalidates() {
    let fx = Fixture::new();

    let v1 = fx.cache("fp").wrap(tool_fn!("describe", |args: &CallArgs| {
        let n: i64 = args.get(0)?;
        Ok(format!("old {}", n))
    }));
    assert_eq!(v1.call(&CallArgs::new().arg(&1)).unwrap(), "old 1");

    let v2 = fx.cache("fp").wrap(tool_fn!("describe", |args: &CallArgs| {
        let n: i64 = args.get(0)?;
        Ok(format!("new {}", n))
    }));
    assert_eq!(v1.inner().identity().qualified_name(), v2.inner().identity().qualified_name());
    assert_ne!(v1.version(), v2.version());
    assert_eq!(v2.call(&CallArgs::new().arg(&1)).unwrap(), "new 1");

    // Without fingerprints the stale entry is served
    let unversioned = |body: &'static str| {
        fx.cache("nofp")
            .include_fingerprint(false)
            .wrap(FnCall::new("tests::describe", move |_: &CallArgs| Ok(body.to_string())))
    };
    assert_eq!(unversioned("first").call(&CallArgs::new()).unwrap(), "first");
    assert_eq!(unversioned("second").call(&CallArgs::new()).unwrap(), "first");
}

#[test]
fn test_entries_expire() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let square = fx
        .cache("ttl")
        .expire(Duration::from_secs_f64(0.01))
        .wrap(counting_square(calls.clone()));

    let args = CallArgs::new().arg(&5);
    square.call(&args).unwrap();
    std::thread::sleep(Duration::from_secs_f64(0.02));
    square.call(&args).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_per_call_expire_override() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let square = fx
        .cache("ttl_override")
        .expire(Duration::from_secs(3600))
        .wrap(counting_square(calls.clone()));

    let short = CallOptions::new().expire(Duration::from_millis(10));
    square.call_with(&CallArgs::new().arg(&2), short).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    square.call(&CallArgs::new().arg(&2)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_offline_only_miss() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let offline = fx
        .cache("offline")
        .offline_only(true)
        .wrap(counting_square(calls.clone()));

    let err = offline.call(&CallArgs::new().arg(&4)).unwrap_err();
    assert!(err.is_offline_miss());
    assert!(err.to_string().contains("offline"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_per_call_offline_only() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let square = fx.cache("warm").wrap(counting_square(calls.clone()));

    square.call(&CallArgs::new().arg(&6)).unwrap();

    let warm = CallArgs::new().arg(&6).kwarg(RESERVED_OFFLINE_ONLY, &true);
    assert_eq!(square.call(&warm).unwrap(), 36);

    let cold = CallArgs::new().arg(&7).kwarg(RESERVED_OFFLINE_ONLY, &true);
    assert!(square.call(&cold).unwrap_err().is_offline_miss());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_per_call_cache_dir() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let square = fx.cache("dirs").wrap(counting_square(calls.clone()));
    let alt = fx.path().join("alternate");

    square.call(&CallArgs::new().arg(&2)).unwrap();
    let elsewhere = CallArgs::new()
        .arg(&2)
        .kwarg(RESERVED_CACHE_DIR, alt.to_str().unwrap());
    square.call(&elsewhere).unwrap();
    square.call(&elsewhere).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(square.stats(Some(alt.as_path())).unwrap().count, 1);
    assert_eq!(square.stats(None).unwrap().count, 1);
}

#[test]
fn test_force_refresh_recomputes() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let square = fx.cache("refresh").wrap(counting_square(calls.clone()));

    square.call(&CallArgs::new().arg(&3)).unwrap();
    let refresh = CallArgs::new().arg(&3).kwarg(RESERVED_FORCE_REFRESH, &true);
    square.call(&refresh).unwrap();
    square.call(&CallArgs::new().arg(&3)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let both = CallOptions::new().force_refresh().offline_only(true);
    assert!(square
        .call_with(&CallArgs::new().arg(&3), both)
        .unwrap_err()
        .is_offline_miss());
}

#[test]
fn test_custom_key_fn() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let by_first_arg = fx
        .cache("custom_key")
        .key_fn(|id, args| format!("{}:{:?}", id.qualified_name(), args.positional().first()))
        .wrap(counting_square(calls.clone()));

    by_first_arg.call(&CallArgs::new().arg(&9).kwarg("verbose", &true)).unwrap();
    by_first_arg.call(&CallArgs::new().arg(&9).kwarg("verbose", &false)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_tag_separates_entries() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let plain = fx.cache("tags").wrap(counting_square(calls.clone()));
    let tagged = fx.cache("tags").tag("assay-2").wrap(counting_square(calls.clone()));

    plain.call(&CallArgs::new().arg(&4)).unwrap();
    tagged.call(&CallArgs::new().arg(&4)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(tagged.stats(None).unwrap().tag.as_deref(), Some("assay-2"));
}

#[test]
fn test_stats() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let square = fx
        .cache("stats")
        .size_limit_bytes(1 << 20)
        .cache_version("7")
        .wrap(counting_square(calls));

    for n in 0..4 {
        square.call(&CallArgs::new().arg(&n)).unwrap();
    }

    let stats = square.stats(None).unwrap();
    assert_eq!(stats.name, "stats");
    assert_eq!(stats.count, 4);
    assert!(stats.bytes > 0);
    assert_eq!(stats.size_limit_bytes, 1 << 20);
    assert_eq!(stats.version, square.version());
    assert!(stats.version.starts_with("7+"));
    assert_eq!(stats.directory, fx.path().join("stats"));
}

#[test]
fn test_size_limit_is_first_writer_wins() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let small = fx.cache("shared").size_limit_bytes(10_000).wrap(counting_square(calls.clone()));
    let large = fx.cache("shared").size_limit_bytes(99_999).wrap(counting_square(calls));

    small.call(&CallArgs::new().arg(&1)).unwrap();
    assert_eq!(large.stats(None).unwrap().size_limit_bytes, 10_000);
    assert_eq!(fx.registry.len(), 1);
}

#[test]
fn test_cache_root_from_config() {
    let fx = Fixture::new();
    fx.config.set_cache_root(fx.path().join("root")).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let square = ToolCache::new("rooted")
        .config(fx.config.clone())
        .registry(fx.registry.clone())
        .wrap(counting_square(calls));

    assert_eq!(square.cache_dir(None), fx.path().join("root").join("rooted"));
    square.call(&CallArgs::new().arg(&1)).unwrap();
    assert!(fx.path().join("root").join("rooted").is_dir());
}

#[test]
fn test_unserializable_result_falls_back_to_text() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    // JSON maps need string keys, so this result only has a text form
    let pairs = fx.cache("text").wrap(FnCall::new("tests::pairs", move |_: &CallArgs| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(HashMap::from([((1u8, 2u8), 3u8)]))
    }));

    let first = pairs.call(&CallArgs::new()).unwrap();
    assert_eq!(first.get(&(1, 2)), Some(&3));

    // The text entry cannot come back as a map, so the value is recomputed
    let second = pairs.call(&CallArgs::new()).unwrap();
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(pairs.stats(None).unwrap().count, 1);
}

#[test]
fn test_json_value_results() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let lookup = fx.cache("json").wrap(FnCall::new("tests::lookup", move |args: &CallArgs| {
        counter.fetch_add(1, Ordering::SeqCst);
        let id: String = args.get(0)?;
        Ok(json!({"id": id, "targets": ["EGFR", "HER2"]}))
    }));

    let args = CallArgs::from_json(json!(["CHEMBL553"]));
    let value: Value = lookup.call(&args).unwrap();
    assert_eq!(lookup.call(&args).unwrap(), value);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_full_middleware_stack() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let limiter = RateLimiter::builder("stack")
        .max_requests(2)
        .time_window(Duration::from_millis(200))
        .state_dir(fx.path())
        .config(fx.config.clone())
        .build()
        .unwrap();

    let counter = calls.clone();
    let fetch = FnCall::new("tests::fetch", move |args: &CallArgs| {
        // Fail on the first attempt only
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("connection reset");
        }
        let id: u32 = args.get(0)?;
        Ok(id + 1000)
    })
    .with_retry(RetryConfig {
        max_retries: 2,
        initial_delay_ms: 1,
        jitter: false,
        ..Default::default()
    })
    .rate_limited(limiter.clone())
    .cached(fx.cache("stack"));

    assert_eq!(fetch.call(&CallArgs::new().arg(&1)).unwrap(), 1001);
    assert_eq!(fetch.call(&CallArgs::new().arg(&1)).unwrap(), 1001);

    // One rate-limited call with one retry inside it, then a cache hit
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(limiter.snapshot().unwrap().unwrap().len(), 1);
}
