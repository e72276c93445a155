//! Builds container files in memory for the integration tests.
#![allow(dead_code)]

use std::cell::Cell;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flate2::write::DeflateEncoder;
use flate2::Compression;

use ocf_codecs::codec_by_name;
use ocf_core::format::{CODEC_KEY, MAGIC, SCHEMA_KEY, SYNC_SIZE};
use ocf_core::keyvalue::key_value_schema;
use ocf_core::varint::write_long;
use ocf_core::{
    Datum, InputSplit, KeyValueRecordReader, ReaderConfig, Schema, SeekableBytes, SeekableInput,
};

pub const SYNC: [u8; SYNC_SIZE] = [
    0x5A, 0x17, 0xC3, 0x8E, 0x01, 0xF0, 0x42, 0x9B, 0x6D, 0x23, 0xAA, 0x04, 0x7E, 0xD1, 0x38, 0x65,
];

/// Writes a header followed by the given blocks, each block holding the given records.
pub struct ContainerBuilder {
    schema: Schema,
    codec: &'static str,
    sync: [u8; SYNC_SIZE],
    metadata: Vec<(String, Vec<u8>)>,
    blocks: Vec<Vec<Datum>>,
}

impl ContainerBuilder {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            codec: "null",
            sync: SYNC,
            metadata: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn codec(mut self, codec: &'static str) -> Self {
        self.codec = codec;
        self
    }

    pub fn meta(mut self, key: &str, value: &[u8]) -> Self {
        self.metadata.push((key.to_string(), value.to_vec()));
        self
    }

    pub fn block(mut self, records: Vec<Datum>) -> Self {
        self.blocks.push(records);
        self
    }

    pub fn header_bytes(&self) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        let mut entries = vec![
            (SCHEMA_KEY.to_string(), self.schema.canonical_form().into_bytes()),
            (CODEC_KEY.to_string(), self.codec.as_bytes().to_vec()),
        ];
        entries.extend(self.metadata.iter().cloned());
        write_long(&mut out, entries.len() as i64).unwrap();
        for (k, v) in &entries {
            put_bytes(&mut out, k.as_bytes());
            put_bytes(&mut out, v);
        }
        write_long(&mut out, 0).unwrap();
        out.extend_from_slice(&self.sync);
        out
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = self.header_bytes();
        for records in &self.blocks {
            let mut raw = Vec::new();
            for record in records {
                encode_datum(&self.schema, record, &mut raw);
            }
            let payload = compress(self.codec, &raw);
            write_long(&mut out, records.len() as i64).unwrap();
            write_long(&mut out, payload.len() as i64).unwrap();
            out.extend_from_slice(&payload);
            out.extend_from_slice(&self.sync);
        }
        out
    }

    /// Offset of each block's leading record count in the built file.
    pub fn block_offsets(&self) -> Vec<u64> {
        let mut offsets = Vec::new();
        let mut probe = ContainerBuilder::new(self.schema.clone()).codec(self.codec);
        probe.metadata = self.metadata.clone();
        for records in &self.blocks {
            offsets.push(probe.build().len() as u64);
            probe = probe.block(records.clone());
        }
        offsets
    }
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_long(out, bytes.len() as i64).unwrap();
    out.extend_from_slice(bytes);
}

pub fn compress(codec: &str, raw: &[u8]) -> Vec<u8> {
    match codec {
        "null" => raw.to_vec(),
        "deflate" => {
            let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
            enc.write_all(raw).unwrap();
            enc.finish().unwrap()
        }
        "snappy" => {
            let mut block = snap::raw::Encoder::new().compress_vec(raw).unwrap();
            block.extend_from_slice(&crc32fast::hash(raw).to_be_bytes());
            block
        }
        "zstandard" => zstd::bulk::compress(raw, 3).unwrap(),
        // Unsupported codecs still need some payload; the reader rejects them at open.
        _ => raw.to_vec(),
    }
}

pub fn encode_datum(schema: &Schema, datum: &Datum, out: &mut Vec<u8>) {
    match (schema, datum) {
        (Schema::Null, Datum::Null) => {}
        (Schema::Boolean, Datum::Boolean(b)) => out.push(*b as u8),
        (Schema::Int, Datum::Int(i)) => write_long(out, *i as i64).unwrap(),
        (Schema::Long, Datum::Long(l)) => write_long(out, *l).unwrap(),
        (Schema::Float, Datum::Float(f)) => out.extend_from_slice(&f.to_le_bytes()),
        (Schema::Double, Datum::Double(d)) => out.extend_from_slice(&d.to_le_bytes()),
        (Schema::Bytes, Datum::Bytes(b)) => put_bytes(out, b),
        (Schema::String, Datum::String(s)) => put_bytes(out, s.as_bytes()),
        (Schema::Fixed(_), Datum::Fixed(b)) => out.extend_from_slice(b),
        (Schema::Enum(_), Datum::Enum { index, .. }) => write_long(out, *index as i64).unwrap(),
        (Schema::Array(items), Datum::Array(values)) => {
            if !values.is_empty() {
                write_long(out, values.len() as i64).unwrap();
                for v in values {
                    encode_datum(items, v, out);
                }
            }
            write_long(out, 0).unwrap();
        }
        (Schema::Map(values_schema), Datum::Map(entries)) => {
            if !entries.is_empty() {
                write_long(out, entries.len() as i64).unwrap();
                for (k, v) in entries {
                    put_bytes(out, k.as_bytes());
                    encode_datum(values_schema, v, out);
                }
            }
            write_long(out, 0).unwrap();
        }
        (Schema::Union(branches), Datum::Union { branch, value }) => {
            write_long(out, *branch as i64).unwrap();
            encode_datum(&branches[*branch as usize], value, out);
        }
        (Schema::Record(r), Datum::Record(fields)) => {
            assert_eq!(r.fields.len(), fields.len(), "record arity");
            for (field, (_, v)) in r.fields.iter().zip(fields) {
                encode_datum(&field.schema, v, out);
            }
        }
        (s, d) => panic!("cannot encode {d:?} as {s}"),
    }
}

// ── key/value fixtures ─────────────────────────────────────────────────────

pub fn kv_schema() -> Schema {
    key_value_schema(Schema::String, Schema::Int)
}

pub fn kv(key: &str, value: i32) -> Datum {
    Datum::Record(vec![
        ("key".into(), Datum::String(key.into())),
        ("value".into(), Datum::Int(value)),
    ])
}

pub fn kv_config() -> ReaderConfig {
    ReaderConfig::key_value(Schema::String, Schema::Int)
}

/// `blocks` blocks of `per_block` records each, keys numbered from zero.
pub fn numbered_blocks(codec: &'static str, blocks: usize, per_block: usize) -> ContainerBuilder {
    let mut builder = ContainerBuilder::new(kv_schema()).codec(codec);
    for b in 0..blocks {
        let records = (0..per_block)
            .map(|r| {
                let n = (b * per_block + r) as i32;
                kv(&format!("key-{n:04}"), n)
            })
            .collect();
        builder = builder.block(records);
    }
    builder
}

pub type KvReader = KeyValueRecordReader<String, i32>;

pub fn kv_reader() -> KvReader {
    KeyValueRecordReader::new(Arc::new(codec_by_name))
}

/// Opener that serves the same bytes for any path.
pub fn memory_opener(bytes: Vec<u8>) -> impl Fn(&str) -> io::Result<Box<dyn SeekableInput>> {
    move |_path: &str| Ok(Box::new(SeekableBytes::new(bytes.clone())) as Box<dyn SeekableInput>)
}

/// Read every record of `[start, start + length)`, asserting progress never
/// decreases along the way.
pub fn read_split(bytes: &[u8], start: u64, length: u64) -> Vec<(String, i32)> {
    let mut reader = kv_reader();
    let split = ocf_core::FileSplit::new("mem", start, length);
    reader
        .initialize(&split, &kv_config(), &memory_opener(bytes.to_vec()))
        .unwrap();
    let mut out = Vec::new();
    let mut last = reader.progress();
    assert_eq!(last, 0.0);
    while reader.advance().unwrap() {
        out.push((
            reader.current_key().unwrap().clone(),
            *reader.current_value().unwrap(),
        ));
        let p = reader.progress();
        assert!(p >= last && p <= 1.0, "progress went from {last} to {p}");
        last = p;
    }
    assert_eq!(reader.progress(), 1.0);
    reader.close().unwrap();
    out
}

// ── instrumented collaborators ─────────────────────────────────────────────

/// Split descriptor that counts accessor calls.
pub struct CountingSplit {
    pub path: String,
    pub start: u64,
    pub length: u64,
    pub path_calls: Cell<usize>,
    pub start_calls: Cell<usize>,
    pub length_calls: Cell<usize>,
}

impl CountingSplit {
    pub fn new(start: u64, length: u64) -> Self {
        Self {
            path: "/path/to/a/container/file".into(),
            start,
            length,
            path_calls: Cell::new(0),
            start_calls: Cell::new(0),
            length_calls: Cell::new(0),
        }
    }
}

impl InputSplit for CountingSplit {
    fn path(&self) -> &str {
        self.path_calls.set(self.path_calls.get() + 1);
        &self.path
    }

    fn start(&self) -> u64 {
        self.start_calls.set(self.start_calls.get() + 1);
        self.start
    }

    fn length(&self) -> u64 {
        self.length_calls.set(self.length_calls.get() + 1);
        self.length
    }
}

/// In-memory source that counts `close` calls.
pub struct TrackedSource {
    inner: SeekableBytes,
    closes: Arc<AtomicUsize>,
}

impl TrackedSource {
    pub fn new(bytes: Vec<u8>) -> (Self, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner: SeekableBytes::new(bytes),
                closes: closes.clone(),
            },
            closes,
        )
    }
}

impl io::Read for TrackedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.inner, buf)
    }
}

impl io::Seek for TrackedSource {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        io::Seek::seek(&mut self.inner, pos)
    }
}

impl SeekableInput for TrackedSource {
    fn length(&mut self) -> io::Result<u64> {
        self.inner.length()
    }

    fn close(&mut self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Opener that hands out one pre-built source and records the path it was asked for.
pub fn single_use_opener(
    source: TrackedSource,
) -> (impl Fn(&str) -> io::Result<Box<dyn SeekableInput>>, Rc<Cell<Option<String>>>) {
    let slot = Cell::new(Some(source));
    let asked = Rc::new(Cell::new(None));
    let asked_clone = asked.clone();
    let opener = move |path: &str| {
        asked_clone.set(Some(path.to_string()));
        slot.take()
            .map(|s| Box::new(s) as Box<dyn SeekableInput>)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "source already opened"))
    };
    (opener, asked)
}
