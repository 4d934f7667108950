//! Integration tests for rxsignal
//!
//! Exercises operator chains across threads: shared memoized computations,
//! timer races, cancellation hooks and the read-stream bridge.

use std::{
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Barrier,
  },
  thread,
  time::{Duration, Instant},
};

use parking_lot::Mutex;

use rxsignal::{
  prelude::*,
  testing::{DroppedFailures, MultiEvent, MultiRecorder, UniProbe, UniRecorder},
};

const WAIT: Duration = Duration::from_secs(5);

fn wait_for(done: impl Fn() -> bool) -> bool {
  let deadline = Instant::now() + WAIT;
  while Instant::now() < deadline {
    if done() {
      return true;
    }
    thread::sleep(Duration::from_millis(2));
  }
  done()
}

#[rxsignal_macro::test]
fn concurrent_consumers_share_one_slow_computation() {
  let invocations = Arc::new(AtomicUsize::new(0));
  let c_invocations = invocations.clone();
  let answer = uni::emitter(move |e: uni::UniEmitter<i32>| {
    c_invocations.fetch_add(1, Ordering::SeqCst);
    thread::spawn(move || {
      thread::sleep(Duration::from_millis(50));
      e.complete(42);
    });
  })
  .memoize();

  let barrier = Arc::new(Barrier::new(3));
  let consumers: Vec<_> = (0..3)
    .map(|_| {
      let (answer, barrier) = (answer.clone(), barrier.clone());
      thread::spawn(move || {
        let recorder = UniRecorder::<i32>::new();
        barrier.wait();
        answer.subscribe(recorder.clone());
        recorder.wait_item(WAIT)
      })
    })
    .collect();

  for consumer in consumers {
    assert_eq!(consumer.join().unwrap(), Some(42));
  }
  assert_eq!(invocations.load(Ordering::SeqCst), 1);

  let late = UniRecorder::<i32>::new();
  answer.subscribe(late.clone());
  assert_eq!(late.item(), Some(42));
  assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[cfg(feature = "futures-scheduler")]
#[rxsignal_macro::test]
fn item_and_deadline_racing_on_real_threads_deliver_once() {
  let scheduler = ThreadPoolScheduler::shared().unwrap();
  for _ in 0..20 {
    let source = uni::emitter(|e: uni::UniEmitter<u8>| {
      thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        e.complete(1);
      });
    });
    let recorder = UniRecorder::<u8>::new();
    source
      .fail_on_timeout(Duration::from_millis(5), scheduler.clone())
      .subscribe(recorder.clone());

    assert!(recorder.wait_terminal(WAIT));
    thread::sleep(Duration::from_millis(15));
    assert_eq!(recorder.terminal_count(), 1);
    match recorder.failure() {
      Some(failure) => assert!(failure.is_timeout()),
      None => assert_eq!(recorder.item(), Some(1)),
    }
  }
}

#[rxsignal_macro::test]
fn every_competing_terminal_source_settles_exactly_once() {
  let dropped = DroppedFailures::install();
  for _ in 0..50 {
    let scheduler = TestScheduler::new();
    let probe = UniProbe::<i32>::new();
    let recorder = UniRecorder::<i32>::new();
    probe
      .clone()
      .fail_on_timeout(Duration::from_millis(1), scheduler.clone())
      .subscribe(recorder.clone());

    let barrier = Arc::new(Barrier::new(4));
    let racers: Vec<Box<dyn FnOnce() + Send>> = vec![
      Box::new({
        let probe = probe.clone();
        move || probe.emit_item(1)
      }),
      Box::new({
        let probe = probe.clone();
        move || probe.emit_failure("racing-failure-it3")
      }),
      Box::new({
        let recorder = recorder.clone();
        move || recorder.cancel()
      }),
      Box::new({
        let scheduler = scheduler.clone();
        move || scheduler.advance_by(Duration::from_millis(1))
      }),
    ];
    let handles: Vec<_> = racers
      .into_iter()
      .map(|racer| {
        let barrier = barrier.clone();
        thread::spawn(move || {
          barrier.wait();
          racer();
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    assert!(recorder.terminal_count() <= 1);
    assert!(probe.cancellations() <= 1);
    assert_eq!(scheduler.pending_count(), 0);
  }
  assert!(dropped.is_active());
}

#[rxsignal_macro::test]
fn upstream_is_cancelled_after_an_asynchronous_hook_settles() {
  let order = Arc::new(Mutex::new(Vec::new()));
  let (c_order, h_order) = (order.clone(), order.clone());
  let upstream = uni::emitter(move |e: uni::UniEmitter<i32>| {
    let c_order = c_order.clone();
    e.on_termination(move || c_order.lock().push("upstream cancelled"));
  });
  let recorder = UniRecorder::<i32>::new();
  upstream
    .on_cancellation_call::<_, _, ()>(move || {
      let h_order = h_order.clone();
      Ok(uni::emitter(move |e: uni::UniEmitter<()>| {
        let h_order = h_order.clone();
        thread::spawn(move || {
          thread::sleep(Duration::from_millis(20));
          h_order.lock().push("hook settled");
          e.complete(());
        });
      }))
    })
    .subscribe(recorder.clone());

  recorder.cancel();
  assert!(order.lock().is_empty());
  assert!(wait_for(|| order.lock().len() == 2));
  assert_eq!(*order.lock(), vec!["hook settled", "upstream cancelled"]);
  assert_eq!(recorder.events(), vec![rxsignal::testing::UniEvent::Subscribed]);
}

#[rxsignal_macro::test]
fn bridge_never_delivers_more_than_requested() {
  let source = BufferedReadStream::<u32>::new();
  let recorder = MultiRecorder::<u32>::new();
  from_read_stream(source.clone()).subscribe(recorder.clone());

  let writer = {
    let source = source.clone();
    thread::spawn(move || {
      for item in 0..100 {
        source.write(item);
      }
      source.end();
    })
  };

  let mut granted = 0;
  for chunk in [1, 2, 3, 5, 8, 13] {
    recorder.request(chunk);
    granted += chunk;
    thread::sleep(Duration::from_millis(1));
    assert!(recorder.items().len() as u64 <= granted);
  }
  writer.join().unwrap();
  assert_eq!(recorder.items().len() as u64, granted);
  assert!(!recorder.is_completed());

  recorder.request(1_000);
  assert_eq!(recorder.items(), (0..100).collect::<Vec<_>>());
  assert!(recorder.is_completed());
  assert!(!source.has_handlers());
  assert!(!source.is_paused());
}

#[rxsignal_macro::test]
fn bridge_accepts_one_of_many_concurrent_subscribers() {
  const THREADS: usize = 6;
  let source = BufferedReadStream::<u32>::new();
  source.write(7);
  let bridge = Arc::new(from_read_stream(source.clone()));

  let barrier = Arc::new(Barrier::new(THREADS));
  let handles: Vec<_> = (0..THREADS)
    .map(|_| {
      let (bridge, barrier) = (bridge.clone(), barrier.clone());
      thread::spawn(move || {
        let recorder = MultiRecorder::<u32>::with_request(1);
        barrier.wait();
        bridge.subscribe(recorder.clone());
        recorder
      })
    })
    .collect();
  let recorders: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

  let refused = recorders
    .iter()
    .filter(|r| matches!(r.failure(), Some(Failure::SingleSubscriberOnly)))
    .count();
  assert_eq!(refused, THREADS - 1);
  let accepted: Vec<_> = recorders.iter().filter(|r| r.failure().is_none()).collect();
  assert_eq!(accepted.len(), 1);
  assert_eq!(accepted[0].items(), vec![7]);
}

#[rxsignal_macro::test]
fn decorated_uni_observed_through_demand() {
  let journal = Arc::new(Mutex::new(Vec::new()));
  let (j_item, j_end) = (journal.clone(), journal.clone());
  let recorder = MultiRecorder::<i32>::with_request(1);
  uni::item(5)
    .to_multi()
    .on_signal(
      SignalHooks::new()
        .on_item(move |v: &i32| {
          j_item.lock().push(format!("item {v}"));
          Ok(())
        })
        .on_termination(move || {
          j_end.lock().push("done".to_string());
          Ok(())
        }),
    )
    .subscribe(recorder.clone());

  assert_eq!(
    recorder.events(),
    vec![MultiEvent::Subscribed, MultiEvent::Next(5), MultiEvent::Complete]
  );
  assert_eq!(*journal.lock(), vec!["item 5", "done"]);
}

#[rxsignal_macro::test(local)]
async fn memoized_value_awaited_from_async_code() {
  let cached = uni::deferred(|| Ok(String::from("config loaded"))).memoize();
  let (tx, rx) = futures::channel::oneshot::channel();
  cached.subscribe_with(
    move |v| {
      let _ = tx.send(v);
    },
    |_| {},
  );
  assert_eq!(rx.await.unwrap(), "config loaded");
  assert!(cached.is_cached());
}
