//! Property tests for packet framing, reassembly and the NBC row bitmap.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use proptest::prelude::*;
use tds_protocol::{
    ColMetaData, ColumnData, ColumnFlags, Done, PACKET_HEADER_SIZE, PacketStatus, PacketType, Parsed, Reassembler,
    Token, TokenParser, TokenType, TypeId, TypeInfo, frame, packet_count,
};

fn wire(payload: &Bytes, packet_size: usize) -> BytesMut {
    let mut out = BytesMut::new();
    for packet in frame(PacketType::TabularResult, payload.clone(), packet_size, PacketStatus::NORMAL) {
        packet.encode(&mut out);
    }
    out
}

proptest! {
    #[test]
    fn framing_round_trips(
        payload in proptest::collection::vec(any::<u8>(), 0..20_000),
        packet_size in 512usize..=32767,
    ) {
        let payload = Bytes::from(payload);
        let packets: Vec<_> = frame(PacketType::SqlBatch, payload.clone(), packet_size, PacketStatus::NORMAL).collect();

        prop_assert_eq!(packets.len(), packet_count(payload.len(), packet_size));
        prop_assert_eq!(
            packets.len(),
            payload.len().div_ceil(packet_size - PACKET_HEADER_SIZE).max(1)
        );
        for (i, packet) in packets.iter().enumerate() {
            prop_assert!(packet.len() <= packet_size);
            prop_assert_eq!(packet.header.length as usize, packet.len());
            prop_assert_eq!(packet.header.is_end_of_message(), i + 1 == packets.len());
        }

        let mut reassembler = Reassembler::new(packet_size);
        let mut bytes = BytesMut::new();
        for packet in &packets {
            packet.encode(&mut bytes);
        }
        reassembler.extend_from_slice(&bytes);
        let message = reassembler.next_message().unwrap().unwrap();
        prop_assert_eq!(message.payload, payload);
        prop_assert!(!reassembler.has_partial());
    }

    #[test]
    fn reassembly_tolerates_any_split(
        payload in proptest::collection::vec(any::<u8>(), 1..3_000),
        cuts in proptest::collection::vec(1usize..700, 1..40),
    ) {
        let payload = Bytes::from(payload);
        let bytes = wire(&payload, 512);
        let mut reassembler = Reassembler::new(512);
        let mut offset: usize = 0;
        let mut message = None;
        for cut in cuts.iter().copied().chain(std::iter::repeat(usize::MAX)) {
            let end = offset.saturating_add(cut).min(bytes.len());
            reassembler.extend_from_slice(&bytes[offset..end]);
            offset = end;
            if let Some(m) = reassembler.next_message().unwrap() {
                message = Some(m);
            }
            if offset == bytes.len() {
                break;
            }
        }
        prop_assert_eq!(message.unwrap().payload, payload);
    }

    #[test]
    fn nbc_bitmap_marks_nulls(nulls in proptest::collection::vec(any::<bool>(), 1..40)) {
        let metadata = ColMetaData {
            columns: nulls
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    let mut column = ColumnData::new(format!("c{i}"), TypeInfo::new(TypeId::IntN).with_length(4));
                    column.flags = ColumnFlags::NULLABLE;
                    column
                })
                .collect(),
        };

        let mut stream = BytesMut::new();
        stream.put_u8(TokenType::NbcRow as u8);
        let mut bitmap = vec![0u8; nulls.len().div_ceil(8)];
        for (i, &null) in nulls.iter().enumerate() {
            if null {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        stream.put_slice(&bitmap);
        for (i, &null) in nulls.iter().enumerate() {
            if !null {
                stream.put_u8(4);
                stream.put_i32_le(i as i32);
            }
        }

        let mut parser = TokenParser::from_message(stream.freeze());
        let Parsed::Token(Token::NbcRow(row)) = parser.next_token(Some(&metadata)).unwrap() else {
            panic!("expected an NBCROW");
        };
        prop_assert_eq!(row.len(), nulls.len());
        for (i, &null) in nulls.iter().enumerate() {
            prop_assert_eq!(row.is_null(i), null);
            if !null {
                prop_assert_eq!(row.values[i].as_deref().unwrap(), &(i as i32).to_le_bytes()[..]);
            }
        }
    }
}

#[test]
fn token_stream_split_across_packets() {
    let metadata = ColMetaData {
        columns: vec![ColumnData::new("n", TypeInfo::new(TypeId::IntN).with_length(4))],
    };
    let mut stream = BytesMut::new();
    metadata.encode(&mut stream).unwrap();
    for i in 0..50 {
        stream.put_u8(TokenType::Row as u8);
        stream.put_u8(4);
        stream.put_i32_le(i);
    }
    Done::finished().encode(TokenType::Done, &mut stream);
    let bytes = wire(&stream.freeze(), 512);

    let mut reassembler = Reassembler::new(512);
    let mut parser = TokenParser::new();
    let mut current: Option<Arc<ColMetaData>> = None;
    let mut rows = 0;
    let mut done = false;
    let mut offset: usize = 0;
    while !done {
        while let Some(packet) = reassembler.next_packet().unwrap() {
            let last = packet.header.is_end_of_message();
            parser.extend(packet.payload);
            if last {
                parser.finish();
            }
        }
        loop {
            match parser.next_token(current.as_deref()).unwrap() {
                Parsed::Token(Token::ColMetaData(meta)) => current = Some(meta),
                Parsed::Token(Token::Row(_)) => rows += 1,
                Parsed::Token(Token::Done(_)) => done = true,
                Parsed::Token(other) => panic!("unexpected {other:?}"),
                Parsed::NeedMoreData | Parsed::Finished => break,
            }
        }
        let end = (offset + 37).min(bytes.len());
        reassembler.extend_from_slice(&bytes[offset..end]);
        offset = end;
    }
    assert_eq!(rows, 50);
}

#[test]
fn reassembly_at_every_split_point() {
    let payload = Bytes::from((0..1_500u32).map(|i| (i % 251) as u8).collect::<Vec<_>>());
    let bytes = wire(&payload, 512);

    for split in 0..=bytes.len() {
        let mut reassembler = Reassembler::new(512);
        reassembler.extend_from_slice(&bytes[..split]);
        let early = reassembler.next_message().unwrap();
        assert!(early.is_none() || split == bytes.len(), "message complete after {split} bytes");
        reassembler.extend_from_slice(&bytes[split..]);
        let message = early.or_else(|| reassembler.next_message().unwrap()).unwrap();
        assert_eq!(message.payload, payload, "split at {split}");
        assert!(!reassembler.has_partial());
    }
}

#[test]
fn token_stream_at_every_split_point() {
    let metadata = ColMetaData {
        columns: vec![ColumnData::new("s", TypeInfo::new(TypeId::NVarChar).with_length(200))],
    };
    let mut stream = BytesMut::new();
    metadata.encode(&mut stream).unwrap();
    for i in 0..20u16 {
        let text: Vec<u8> = format!("value {i}").encode_utf16().flat_map(u16::to_le_bytes).collect();
        stream.put_u8(TokenType::Row as u8);
        stream.put_u16_le(text.len() as u16);
        stream.put_slice(&text);
    }
    Done::finished().encode(TokenType::Done, &mut stream);
    let stream = stream.freeze();

    for split in 0..=stream.len() {
        let mut parser = TokenParser::new();
        let mut current: Option<Arc<ColMetaData>> = None;
        let mut rows = 0;
        let mut done = false;
        for (chunk, last) in [(stream.slice(..split), false), (stream.slice(split..), true)] {
            parser.extend(chunk);
            if last {
                parser.finish();
            }
            loop {
                match parser.next_token(current.as_deref()).unwrap() {
                    Parsed::Token(Token::ColMetaData(meta)) => current = Some(meta),
                    Parsed::Token(Token::Row(_)) => rows += 1,
                    Parsed::Token(Token::Done(_)) => done = true,
                    Parsed::Token(other) => panic!("unexpected {other:?}"),
                    Parsed::NeedMoreData | Parsed::Finished => break,
                }
            }
        }
        assert_eq!(rows, 20, "split at {split}");
        assert!(done, "split at {split}");
    }
}
