use sunrpc::protocol::rpc::{
    CallHead, Parsed, ParserState, RecordParser, RpcCall, RpcError, RpcMessage, RpcReply,
    LAST_FRAGMENT,
};
use sunrpc::xdr::rpc::msg_type;
use sunrpc::Error;

fn call_record(xid: u32, proc: u32, args: &[u32]) -> Vec<u8> {
    let mut call = RpcCall::new(proc).with_args(args).expect("encode args");
    call.xid = xid;
    call.body.prog = 100000;
    call.body.vers = 2;
    call.send().expect("serialize call")
}

fn single_message(records: Vec<Parsed>) -> RpcMessage {
    assert_eq!(records.len(), 1, "expected exactly one record: {records:?}");
    match records.into_iter().next() {
        Some(Parsed::Message(msg)) => msg,
        other => panic!("expected a message, got {other:?}"),
    }
}

#[test]
fn whole_record_in_one_chunk() {
    let record = call_record(17, 4, &[1, 2, 3]);
    let mut parser = RecordParser::default();
    let msg = single_message(parser.feed(&record).expect("feed"));

    let RpcMessage::Call(call) = msg else { panic!("expected a call") };
    assert_eq!(call.xid, 17);
    assert_eq!((call.rpcvers(), call.prog(), call.vers(), call.proc()), (2, 100000, 2, 4));
    assert_eq!(call.decode_args::<Vec<u32>>().expect("decode args"), vec![1, 2, 3]);
    assert_eq!(parser.state(), ParserState::AwaitingHeader);
    assert_eq!(parser.buffered(), 0);
}

#[test]
fn split_at_every_boundary() {
    let record = call_record(99, 3, &[100003, 3, 6, 0]);
    let expected = single_message(RecordParser::default().feed(&record).expect("feed"));

    for split in 1..record.len() {
        let mut parser = RecordParser::default();
        let first = parser.feed(&record[..split]).expect("feed head");
        assert!(first.is_empty(), "emitted early at split {split}");
        let msg = single_message(parser.feed(&record[split..]).expect("feed tail"));
        assert_eq!(msg, expected, "split at {split}");
    }
}

#[test]
fn byte_at_a_time() {
    let record = call_record(5, 1, &[]);
    let mut parser = RecordParser::default();
    let mut emitted = Vec::new();
    for byte in &record {
        emitted.extend(parser.feed(std::slice::from_ref(byte)).expect("feed"));
    }
    assert_eq!(single_message(emitted).xid(), 5);
}

#[test]
fn two_records_in_one_chunk() {
    let mut chunk = call_record(1, 1, &[7]);
    let mut reply = RpcReply::success(2);
    reply.set_result(&42u32).expect("encode result");
    chunk.extend(reply.send().expect("serialize reply"));

    let records = RecordParser::default().feed(&chunk).expect("feed");
    assert_eq!(records.len(), 2);
    match &records[..] {
        [Parsed::Message(RpcMessage::Call(call)), Parsed::Message(RpcMessage::Reply(reply))] => {
            assert_eq!(call.xid, 1);
            assert_eq!(reply.xid, 2);
            assert!(reply.is_success());
            assert_eq!(reply.decode_result::<u32>().expect("decode result"), 42);
        }
        other => panic!("unexpected records {other:?}"),
    }
}

#[test]
fn record_and_a_half() {
    let first = call_record(1, 1, &[]);
    let second = call_record(2, 1, &[]);
    let mut chunk = first.clone();
    chunk.extend_from_slice(&second[..10]);

    let mut parser = RecordParser::default();
    assert_eq!(single_message(parser.feed(&chunk).expect("feed")).xid(), 1);
    assert_eq!(parser.buffered(), 10);
    assert_eq!(single_message(parser.feed(&second[10..]).expect("feed")).xid(), 2);
}

#[test]
fn fragment_flag_must_be_set() {
    let mut record = call_record(1, 1, &[]);
    record[0] &= 0x7f;
    let err = RecordParser::default().feed(&record).expect_err("fragment accepted");
    assert!(matches!(err, Error::FragmentedRecord(_)), "unexpected error: {err:?}");
    assert!(err.is_fatal());
}

#[test]
fn oversized_record() {
    let mut parser = RecordParser::new(64);
    let mark = LAST_FRAGMENT | 65;
    let err = parser.feed(&mark.to_be_bytes()).expect_err("oversize accepted");
    assert!(
        err.to_string().contains("exceeds max"),
        "unexpected error: {err:?}"
    );
}

#[test]
fn record_too_short_for_header() {
    let mark = LAST_FRAGMENT | 4;
    let err = RecordParser::default().feed(&mark.to_be_bytes()).expect_err("short record");
    assert!(matches!(err, Error::RecordTooShort(4)));
}

#[test]
fn unknown_message_type() {
    let mut record = Vec::new();
    record.extend_from_slice(&(LAST_FRAGMENT | 8).to_be_bytes());
    record.extend_from_slice(&1u32.to_be_bytes());
    record.extend_from_slice(&2u32.to_be_bytes());
    let err = RecordParser::default().feed(&record).expect_err("type 2 accepted");
    assert!(matches!(err, Error::InvalidMessageType(2)));
}

#[test]
fn undecodable_header_keeps_xid() {
    let mut record = call_record(31, 1, &[]);
    // cred flavor sits after mark, xid, type, rpcvers, prog, vers, proc
    record[28..32].copy_from_slice(&3u32.to_be_bytes());
    let records = RecordParser::default().feed(&record).expect("framing is fine");
    match &records[..] {
        [Parsed::Rejected {
            xid: 31,
            kind: msg_type::CALL,
            head: Some(head),
            error: Error::UnsupportedAuthFlavor(3),
        }] => {
            let expected = CallHead { rpcvers: 2, prog: 100000, vers: 2, proc: 1 };
            assert_eq!(*head, expected);
        }
        other => panic!("unexpected records {other:?}"),
    }
}

#[test]
fn error_reply_is_classified() {
    let record = RpcError::procedure_unavailable().with_xid(8).to_bytes().expect("serialize");
    let msg = single_message(RecordParser::default().feed(&record).expect("feed"));
    let RpcMessage::Reply(reply) = msg else { panic!("expected a reply") };
    assert!(!reply.is_success());
    let err = reply.error().expect("error reply");
    assert_eq!(err.xid(), Some(8));
    assert_eq!(err.kind(), RpcError::procedure_unavailable().kind());
}
