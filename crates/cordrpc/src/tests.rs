use crate::*;
use cordpack::Decoder;
use cordpack::Encoder;

fn request_roundtrip(request: Request) {
    let frame = RequestFrame::new(42, request);
    let bytes = frame.to_bytes().expect("encode");
    match Frame::decode(&bytes).expect("decode") {
        Frame::Request(decoded) => assert_eq!(decoded, frame),
        other => panic!("expected request, got {:?}", other),
    }
}

fn reply_roundtrip(reply: ReplyFrame) {
    let bytes = reply.to_bytes().expect("encode");
    match Frame::decode(&bytes).expect("decode") {
        Frame::Reply(decoded) => assert_eq!(decoded, reply),
        other => panic!("expected reply, got {:?}", other),
    }
}

fn path(names: &[&str]) -> Vec<Segment> {
    names.iter().map(|n| Segment::from(*n)).collect()
}

// ============================================================================
//  VALUES
// ============================================================================

#[test]
fn test_nested_argument_values() {
    let value = Value::Map(vec![
        ("colors".into(), Value::from(vec!["red", "blue"])),
        ("alpha".into(), Value::Number(0.5)),
        ("pixels".into(), Value::Bytes(vec![0, 128, 255, 255])),
        ("canvas".into(), Value::Ref(RefId::new("18f3a-00ff"))),
        ("missing".into(), Value::Undefined),
        ("empty".into(), Value::Null),
    ]);

    let mut enc = Encoder::new();
    encode_value(&mut enc, &value).unwrap();
    let bytes = enc.into_bytes().unwrap();

    assert_eq!(decode_value(&mut Decoder::new(&bytes)).unwrap(), value);
}

#[test]
fn test_map_preserves_key_order() {
    let value = Value::Map(vec![
        ("z".into(), Value::Bool(true)),
        ("a".into(), Value::Bool(false)),
    ]);
    let mut enc = Encoder::new();
    encode_value(&mut enc, &value).unwrap();
    let bytes = enc.into_bytes().unwrap();

    let Value::Map(entries) = decode_value(&mut Decoder::new(&bytes)).unwrap() else {
        panic!("expected map");
    };
    assert_eq!(entries[0].0, "z");
    assert_eq!(entries[1].0, "a");
}

#[test]
fn test_recursion_limit() {
    let mut value = Value::Null;
    for _ in 0..(codec::MAX_DEPTH + 2) {
        value = Value::List(vec![value]);
    }
    let mut enc = Encoder::new();
    assert_eq!(encode_value(&mut enc, &value), Err(Error::RecursionLimitExceeded));
}

#[test]
fn test_integer_tag_is_not_a_value() {
    let mut enc = Encoder::new();
    enc.u64(7).unwrap();
    let bytes = enc.into_bytes().unwrap();
    assert!(matches!(
        decode_value(&mut Decoder::new(&bytes)),
        Err(Error::ProtocolViolation(_))
    ));
}

#[test]
fn test_unknown_value_variant() {
    let mut enc = Encoder::new();
    enc.variant_begin("closure").unwrap();
    enc.str("fn() {}").unwrap();
    enc.variant_end().unwrap();
    let bytes = enc.into_bytes().unwrap();
    assert!(matches!(
        decode_value(&mut Decoder::new(&bytes)),
        Err(Error::UnknownVariant(_))
    ));
}

#[test]
fn test_segment_index_forms() {
    assert_eq!(Segment::Index(3).index(), Some(3));
    assert_eq!(Segment::from("3").index(), Some(3));
    assert_eq!(Segment::from("03").index(), None);
    assert_eq!(Segment::from("width").index(), None);
    assert_eq!(Segment::Index(12).name(), "12");
    assert_eq!(Segment::from(7), Segment::Index(7));
    assert_eq!(Segment::from(-1), Segment::Name("-1".into()));
}

#[test]
fn test_path_mixes_names_and_indices() {
    let path = vec![Segment::from("data"), Segment::Index(0), Segment::from("length")];
    let mut enc = Encoder::new();
    encode_path(&mut enc, &path).unwrap();
    let bytes = enc.into_bytes().unwrap();
    assert_eq!(decode_path(&mut Decoder::new(&bytes)).unwrap(), path);
}

// ============================================================================
//  OPERATIONS
// ============================================================================

#[test]
fn test_operation_encodings() {
    let ops = [
        Operation::get(path(&["width"])),
        Operation::set(path(&["fillStyle"]), Value::from("#ff0000")),
        Operation::apply(path(&["fillRect"]), vec![0.into(), 0.into(), 10.into(), 10.into()]),
        Operation::apply(Vec::new(), Vec::new()),
    ];
    for op in ops {
        request_roundtrip(Request::Invoke { target: Target::Root(RootId(1)), op });
    }
}

#[test]
fn test_operation_without_type_is_rejected() {
    let mut enc = Encoder::new();
    enc.map_begin().unwrap();
    enc.variant_begin("path").unwrap();
    encode_path(&mut enc, &path(&["x"])).unwrap();
    enc.variant_end().unwrap();
    enc.map_end().unwrap();
    let bytes = enc.into_bytes().unwrap();

    assert!(matches!(
        Operation::decode(&mut Decoder::new(&bytes)),
        Err(Error::ProtocolViolation(_))
    ));
}

#[test]
fn test_operation_display() {
    let op = Operation::apply(
        vec![Segment::from("ctx"), Segment::Index(2), Segment::from("fillRect")],
        vec![1.into(); 4],
    );
    assert_eq!(op.to_string(), "APPLY ctx[2].fillRect(4 args)");
    assert_eq!(Operation::get(Vec::new()).to_string(), "GET <self>");
}

// ============================================================================
//  FRAMES
// ============================================================================

#[test]
fn test_every_request_kind() {
    let root = RootId(9);
    let requests = vec![
        Request::CreateRoot { width: 300, height: 150 },
        Request::AttachRoot { name: "main".into() },
        Request::Invoke {
            target: Target::Reference { root, id: RefId::new("abc-123") },
            op: Operation::get(path(&["canvas", "width"])),
        },
        Request::Resolve { root, id: RefId::new("abc-123") },
        Request::Release { root },
        Request::Capture { root, options: CaptureOptions::default() },
        Request::Capture {
            root,
            options: CaptureOptions {
                encoding: CaptureEncoding::Base64,
                clip: Some(Clip { x: 1, y: 2, width: 3, height: 4 }),
            },
        },
        Request::LoadImage { root, src: "data:image/png;base64,AAAA".into() },
        Request::LoadFont { root, family: "Mono".into(), src: "mono.ttf".into() },
        Request::Shutdown,
    ];
    for request in requests {
        request_roundtrip(request);
    }
}

#[test]
fn test_every_reply_kind() {
    let root = RootId(3);
    reply_roundtrip(ReplyFrame::ok(1, Payload::Unit));
    reply_roundtrip(ReplyFrame::ok(2, Payload::Root(root)));
    reply_roundtrip(ReplyFrame::ok(3, Payload::Value(Value::Ref(RefId::new("x")))));
    reply_roundtrip(ReplyFrame::err(4, Failure::Init("no surface named main".into())));
    reply_roundtrip(ReplyFrame::err(5, Failure::thrown("IndexSizeError", "offset out of range")));
    reply_roundtrip(ReplyFrame::err(
        6,
        Failure::Load { kind: LoadFailureKind::Aborted, message: "cancelled".into() },
    ));
    reply_roundtrip(ReplyFrame::err(7, Failure::RegistryMiss { root, id: None }));
    reply_roundtrip(ReplyFrame::err(
        8,
        Failure::RegistryMiss { root, id: Some(RefId::new("gone")) },
    ));
    reply_roundtrip(ReplyFrame::err(9, Failure::Protocol("garbled".into())));
}

#[test]
fn test_request_root() {
    let root = RootId(5);
    assert_eq!(Request::Release { root }.root(), Some(root));
    assert_eq!(
        Request::Invoke {
            target: Target::Reference { root, id: RefId::new("r") },
            op: Operation::get(Vec::new()),
        }
        .root(),
        Some(root)
    );
    assert_eq!(Request::Shutdown.root(), None);
}

#[test]
fn test_decode_seq_survives_garbled_body() {
    let mut enc = Encoder::new();
    enc.variant_begin("Request").unwrap();
    enc.map_begin().unwrap();
    enc.variant_begin("seq").unwrap();
    enc.u64(77).unwrap();
    enc.variant_end().unwrap();
    enc.variant_begin("body").unwrap();
    enc.tag("Teleport").unwrap();
    enc.variant_end().unwrap();
    enc.map_end().unwrap();
    enc.variant_end().unwrap();
    let bytes = enc.into_bytes().unwrap();

    assert!(matches!(Frame::decode(&bytes), Err(Error::UnknownVariant(_))));
    assert_eq!(decode_seq(&bytes).unwrap(), 77);
}

#[test]
fn test_unknown_frame_kind() {
    let mut enc = Encoder::new();
    enc.tag("Ping").unwrap();
    let bytes = enc.into_bytes().unwrap();
    assert!(matches!(Frame::decode(&bytes), Err(Error::UnknownVariant(_))));
}

#[test]
fn test_failure_display_passes_names_through() {
    let failure = Failure::thrown("SyntaxError", "bad colour");
    assert_eq!(failure.to_string(), "SyntaxError: bad colour");
    assert!(Failure::RegistryMiss { root: RootId(1), id: None }.is_registry_miss());
    assert_eq!(RootId(4).to_string(), "root-4");
}
