//! Randomized invariants: framing round trips and flat-map round trips.

use nodelink::port::framing::{encode_frame, FrameAccumulator, MAX_PAYLOAD_LEN};
use nodelink::{flatten, unflatten, Value};
use proptest::prelude::*;

const START: u8 = 0xEE;

fn drain(acc: &mut FrameAccumulator) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while let Some(frame) = acc.next_frame() {
        frames.push(frame);
    }
    frames
}

proptest! {
    /// frame(p) parses back to exactly p for any payload length.
    #[test]
    fn frame_round_trip(payload in prop::collection::vec(any::<u8>(), 0..2048)) {
        let mut acc = FrameAccumulator::new(START);
        acc.extend(&encode_frame(START, &payload).unwrap());
        prop_assert_eq!(drain(&mut acc), vec![payload]);
        prop_assert_eq!(acc.pending(), 0);
    }

    /// Concatenated frames parse back to the same payload sequence, in
    /// order, regardless of how the byte stream is sliced into deliveries.
    #[test]
    fn frame_stream_round_trip(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..128), 0..8),
        slice in 1usize..64,
    ) {
        let mut stream = Vec::new();
        for p in &payloads {
            stream.extend_from_slice(&encode_frame(START, p).unwrap());
        }
        let mut acc = FrameAccumulator::new(START);
        let mut out = Vec::new();
        for chunk in stream.chunks(slice) {
            acc.extend(chunk);
            out.extend(drain(&mut acc));
        }
        prop_assert_eq!(out, payloads);
    }

    /// Noise that cannot contain a start code ahead of a valid frame is
    /// scanned off and the frame still parses.
    #[test]
    fn noise_prefix_self_heals(
        noise in prop::collection::vec(any::<u8>().prop_filter("no start code", |b| *b != START), 0..64),
        payload in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let mut acc = FrameAccumulator::new(START);
        let mut stream = noise;
        stream.extend_from_slice(&encode_frame(START, &payload).unwrap());
        acc.extend(&stream);
        prop_assert_eq!(drain(&mut acc), vec![payload]);
    }

    /// The length field caps at 16 bits and encoding enforces it.
    #[test]
    fn oversize_rejected(extra in 1usize..64) {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + extra];
        prop_assert!(encode_frame(START, &payload).is_err());
    }
}

// ---- flatten/unflatten ----

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<u32>().prop_map(Value::UInt),
        "[a-z]{0,8}".prop_map(Value::Str),
        prop::collection::vec(any::<u32>().prop_map(Value::UInt), 0..4).prop_map(Value::Seq),
    ]
}

/// Template-conforming records: map root, non-empty interior maps, leaves
/// anywhere below.
fn record() -> impl Strategy<Value = Value> {
    let tree = leaf().prop_recursive(3, 48, 4, |inner| {
        prop::collection::btree_map("[a-z]{1,6}", inner, 1..4).prop_map(Value::Map)
    });
    tree.prop_map(|v| match v {
        map @ Value::Map(_) => map,
        other => Value::map([("leaf", other)]),
    })
}

proptest! {
    /// unflatten(flatten(x)) == x for any conforming record.
    #[test]
    fn flatten_round_trip(record in record()) {
        let flat = flatten(&record);
        prop_assert_eq!(unflatten(&flat), record);
    }

    /// Flattening and dotted-path parsing agree.
    #[test]
    fn paths_round_trip_through_dotted_form(record in record()) {
        for path in flatten(&record).keys() {
            prop_assert_eq!(&nodelink::Path::from_dotted(&path.dotted()), path);
        }
    }
}
