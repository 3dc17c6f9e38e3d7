//! Framing and token parsing benchmarks.

#![allow(clippy::unwrap_used, missing_docs)]

use std::hint::black_box;

use bytes::{BufMut, Bytes, BytesMut};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use tds_protocol::{
    ColMetaData, ColumnData, Done, PacketStatus, PacketType, Parsed, Reassembler, SqlBatch, Token, TokenParser,
    TokenType, TypeId, TypeInfo, frame,
};

fn result_set(rows: usize) -> Bytes {
    let metadata = ColMetaData {
        columns: vec![
            ColumnData::new("id", TypeInfo::new(TypeId::IntN).with_length(4)),
            ColumnData::new("name", TypeInfo::new(TypeId::NVarChar).with_length(100)),
        ],
    };
    let mut buf = BytesMut::new();
    metadata.encode(&mut buf).unwrap();
    for i in 0..rows {
        buf.put_u8(TokenType::Row as u8);
        buf.put_u8(4);
        buf.put_i32_le(i as i32);
        buf.put_u16_le(10);
        buf.put_slice(b"r\0o\0w\0s\0!\0");
    }
    Done::finished().encode(TokenType::Done, &mut buf);
    buf.freeze()
}

fn bench_framing(c: &mut Criterion) {
    let payload = Bytes::from(vec![0xAB; 256 * 1024]);
    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("frame_256k", |b| {
        b.iter(|| {
            let mut out = BytesMut::with_capacity(payload.len() + 1024);
            for packet in frame(PacketType::BulkLoad, payload.clone(), 4096, PacketStatus::NORMAL) {
                packet.encode(&mut out);
            }
            black_box(out)
        })
    });

    let mut wire = BytesMut::new();
    for packet in frame(PacketType::TabularResult, payload.clone(), 4096, PacketStatus::NORMAL) {
        packet.encode(&mut wire);
    }
    group.bench_function("reassemble_256k", |b| {
        b.iter(|| {
            let mut reassembler = Reassembler::new(32767);
            for piece in wire.chunks(1500) {
                reassembler.extend_from_slice(piece);
            }
            black_box(reassembler.next_message().unwrap())
        })
    });
    group.finish();
}

fn bench_tokens(c: &mut Criterion) {
    let stream = result_set(1000);
    let mut group = c.benchmark_group("tokens");
    group.throughput(Throughput::Elements(1000));
    group.bench_function("parse_1000_rows", |b| {
        b.iter(|| {
            let mut parser = TokenParser::from_message(stream.clone());
            let mut metadata = None;
            let mut rows = 0usize;
            while let Parsed::Token(token) = parser.next_token(metadata.as_deref()).unwrap() {
                match token {
                    Token::ColMetaData(meta) => metadata = Some(meta),
                    Token::Row(_) => rows += 1,
                    _ => {}
                }
            }
            black_box(rows)
        })
    });
    group.finish();
}

fn bench_sql_batch(c: &mut Criterion) {
    let sql = "SELECT id, name FROM dbo.customers WHERE region = 'west' ORDER BY id".repeat(8);
    c.bench_function("sql_batch_encode", |b| b.iter(|| black_box(SqlBatch::new(sql.as_str()).encode())));
}

criterion_group!(benches, bench_framing, bench_tokens, bench_sql_batch);
criterion_main!(benches);
