//! Criterion benchmarks for the distributed-input frame codec.
//!
//! The hot path is the sink-to-source event stream, so the batch sizes here
//! mirror the default `sink.batch_max` and a few larger bursts.
//!
//! Run with:
//! ```bash
//! cargo bench --package dinput-core --bench codec_bench
//! ```

use std::collections::BTreeSet;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dinput_core::domain::event::{event_type, InputEvent};
use dinput_core::protocol::codec::{decode_message, encode_message};
use dinput_core::protocol::messages::{
    status, DInputMessage, HandleReply, InputEventBatch, SessionRequest, TypeRequest,
};
use dinput_core::{HandleId, InputTypeMask};

// ── Message fixtures ──────────────────────────────────────────────────────────

fn make_prepare() -> DInputMessage {
    DInputMessage::Prepare(SessionRequest {
        device_id: "bench-source".into(),
    })
}

fn make_start_by_type() -> DInputMessage {
    DInputMessage::StartByType(TypeRequest {
        device_id: "bench-source".into(),
        input_types: InputTypeMask::MOUSE | InputTypeMask::KEYBOARD,
    })
}

fn make_handle_reply(n: usize) -> DInputMessage {
    let handles: BTreeSet<HandleId> = (0..n).map(|i| HandleId::new(format!("H{i}"))).collect();
    DInputMessage::OnStartedByHandles(HandleReply {
        device_id: "bench-sink".into(),
        status: status::OK,
        requested: handles.clone(),
        granted: handles,
    })
}

fn make_event_batch(n: usize) -> DInputMessage {
    let events = (0..n)
        .map(|i| InputEvent {
            handle: "mouse-0".into(),
            event_type: if i % 3 == 2 {
                event_type::EV_SYN
            } else {
                event_type::EV_REL
            },
            code: (i % 2) as u16,
            value: (i as i32 % 7) - 3,
            when_us: 1_700_000_000_000_000 + i as u64,
        })
        .collect();
    DInputMessage::InputEventBatch(InputEventBatch {
        device_id: "bench-sink".into(),
        events,
    })
}

fn fixtures() -> Vec<(String, DInputMessage)> {
    let mut list = vec![
        ("Prepare".to_string(), make_prepare()),
        ("StartByType".to_string(), make_start_by_type()),
        ("OnStartedByHandles(8)".to_string(), make_handle_reply(8)),
    ];
    for n in [1usize, 32, 256] {
        list.push((format!("InputEventBatch({n})"), make_event_batch(n)));
    }
    list
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_message");
    for (name, msg) in fixtures() {
        group.bench_with_input(BenchmarkId::new("msg", &name), &msg, |b, msg| {
            b.iter(|| {
                encode_message(black_box(msg), black_box(1), black_box(0))
                    .expect("encode must succeed")
            })
        });
    }
    group.finish();
}

/// Decoding includes full field validation, so this is the cost a sink or
/// source pays per inbound frame.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_message");
    for (name, msg) in fixtures() {
        let bytes = encode_message(&msg, 1, 0).expect("encode must succeed for benchmark setup");
        group.bench_with_input(BenchmarkId::new("msg", &name), &bytes, |b, bytes| {
            b.iter(|| decode_message(black_box(bytes)).expect("decode must succeed"))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
