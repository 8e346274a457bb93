mod common;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use asyncm::{Behavior, Config, Progress, Runtime, Stream};
use common::{init_tracing, ms};
use futures::future;
use time::Duration;

/// 1.0, 2.0, 3.0, ... one step per pull, whatever the duration.
fn ramp() -> Behavior<f64> {
    let n = Arc::new(AtomicUsize::new(0));
    Behavior::new(move |_| future::ready(Ok((n.fetch_add(1, Ordering::SeqCst) + 1) as f64)))
}

fn average(samples: &[(Duration, f64)]) -> f64 {
    let (t, sum) = samples.iter().fold((0.0, 0.0), |(t, sum), (dt, a)| {
        let dt = dt.whole_milliseconds() as f64;
        (t + dt, sum + a * dt)
    });
    sum / t
}

#[tokio::test]
async fn batches_resample_through_a_stepper() {
    init_tracing();

    let b = ramp().batch(ms(10), 2).unbatch().stepper(average);

    // two whole samples
    assert_eq!(b.pull(ms(20)).await.unwrap(), 1.5);
    // half a sample, the rest is kept
    assert_eq!(b.pull(ms(5)).await.unwrap(), 3.0);
    // the kept half, then two whole samples: (5*3 + 10*4 + 10*5) / 25
    assert_eq!(b.pull(ms(25)).await.unwrap(), 4.2);
}

#[tokio::test(start_paused = true)]
async fn sliding_windows_as_a_push_stream() {
    let sums = ramp()
        .windowing(3, 1, ms(10))
        .map(|(dt, w)| (dt, w.iter().sum::<f64>()))
        .reactimate(ms(100));

    let start = tokio::time::Instant::now();
    let xs = asyncm::run(&sums.take(3).collect()).await.unwrap();
    assert_eq!(xs, vec![(ms(10), 6.0), (ms(10), 9.0), (ms(10), 12.0)]);
    assert_eq!(start.elapsed(), std::time::Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn push_samples_pulled_back_by_duration() {
    let samples = ramp()
        .reactimate(ms(10), ms(10))
        .push2pull()
        .run(Progress::root())
        .await
        .unwrap();
    let b = samples.stepper(average);

    assert_eq!(b.pull(ms(30)).await.unwrap(), 2.0);
    assert_eq!(b.pull(ms(10)).await.unwrap(), 4.0);
}

#[tokio::test(start_paused = true)]
async fn high_water_marks_never_drop_values() {
    init_tracing();

    let rt = Runtime::new().with_config(
        Config::new()
            .with_channel_high_water(NonZeroUsize::new(2).unwrap())
            .with_emitter_high_water(NonZeroUsize::new(2).unwrap()),
    );
    let signal = rt
        .run(&Stream::interval(ms(10), 6).push2pull())
        .await
        .unwrap();

    // let the channel fill well past its mark
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let mut xs = Vec::new();
    for _ in 0..6 {
        xs.push(signal.pull().await.unwrap());
    }
    assert_eq!(xs, vec![1, 2, 3, 4, 5, 6]);

    rt.shutdown().await;
}
