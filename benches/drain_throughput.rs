//! Throughput of the two hottest drain loops in the crate: `Zip`'s lockstep
//! pairing and `ObserveOn`'s scheduled drain.
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rxcore::error::FlowError;
use rxcore::fusion::QueueSubscription;
use rxcore::observe_on::ObserveOn;
use rxcore::scheduler::cached::CachedScheduler;
use rxcore::scheduler::Scheduler;
use rxcore::subscriber::{Subscriber, Subscription};
use rxcore::zip::Zip;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct CountingSubscriber {
    count: Arc<AtomicU64>,
}

impl Subscriber<u32> for CountingSubscriber {
    fn on_subscribe(&mut self, subscription: Box<dyn QueueSubscription<u32>>) {
        subscription.request(u64::MAX);
    }
    fn on_next(&mut self, _item: u32) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
    fn on_error(&mut self, _error: FlowError) {}
    fn on_complete(&mut self) {}
}

struct Noop;
impl Subscription for Noop {
    fn request(&self, _n: u64) {}
    fn cancel(&self) {}
}
impl<T> QueueSubscription<T> for Noop {}

fn zip_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("zip_drain");
    for &n in &[1_000u32, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bencher, &n| {
            bencher.iter(|| {
                let count = Arc::new(AtomicU64::new(0));
                let sub = CountingSubscriber {
                    count: Arc::clone(&count),
                };
                let zip = Zip::new(
                    2,
                    |mut values: Vec<Box<dyn std::any::Any + Send>>| {
                        let b = *values.pop().unwrap().downcast::<u32>().unwrap();
                        let a = *values.pop().unwrap().downcast::<u32>().unwrap();
                        a.wrapping_add(b)
                    },
                    256,
                    Box::new(sub),
                );
                let mut a = zip.rail::<u32>(0);
                let mut b = zip.rail::<u32>(1);
                a.on_subscribe(Box::new(Noop));
                b.on_subscribe(Box::new(Noop));
                for item in 0..n {
                    a.on_next(item);
                    b.on_next(item);
                }
                a.on_complete();
                b.on_complete();
                assert_eq!(count.load(Ordering::Relaxed), n as u64);
            });
        });
    }
    group.finish();
}

fn observe_on_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("observe_on_drain");
    group.measurement_time(Duration::from_secs(5));
    for &n in &[1_000u32, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bencher, &n| {
            bencher.iter(|| {
                let count = Arc::new(AtomicU64::new(0));
                let sub = CountingSubscriber {
                    count: Arc::clone(&count),
                };
                let scheduler = CachedScheduler::with_ttl(Duration::from_millis(500));
                let worker = scheduler.create_worker();
                let observe_on = ObserveOn::new(Box::new(sub), worker, 256, false);
                let mut upstream = observe_on.as_upstream_subscriber();
                upstream.on_subscribe(Box::new(Noop));
                for item in 0..n {
                    upstream.on_next(item);
                }
                upstream.on_complete();
                while count.load(Ordering::Relaxed) < n as u64 {
                    std::thread::sleep(Duration::from_micros(100));
                }
                scheduler.shutdown();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, zip_throughput, observe_on_throughput);
criterion_main!(benches);
