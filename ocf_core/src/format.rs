use std::collections::BTreeMap;
use std::io::{self, Read};

use crate::error::{OcfError, Result};
use crate::schema::Schema;
use crate::varint;

/// Magic bytes opening every object container file: "Obj" followed by format version 1.
pub const MAGIC: &[u8; 4] = b"Obj\x01";

/// Length of the sync marker written after the header and after every block.
pub const SYNC_SIZE: usize = 16;

/// Read buffer placed in front of the byte source: 64 KB.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

// ── Reserved metadata keys ─────────────────────────────────────────────────

pub const SCHEMA_KEY: &str = "avro.schema";
pub const CODEC_KEY: &str = "avro.codec";

// ── Codec names ────────────────────────────────────────────────────────────

pub const CODEC_NULL: &str = "null";
pub const CODEC_DEFLATE: &str = "deflate";
pub const CODEC_SNAPPY: &str = "snappy";
pub const CODEC_ZSTANDARD: &str = "zstandard";

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded file header. Read once when the container is opened.
#[derive(Debug, Clone)]
pub struct Header {
    /// Schema every record in the file was written with.
    pub schema: Schema,
    /// Codec name from `avro.codec`; `"null"` when the key is absent.
    pub codec: String,
    pub sync: [u8; SYNC_SIZE],
    /// Every metadata entry, reserved keys included.
    pub metadata: BTreeMap<String, Vec<u8>>,
    /// Offset of the first block, immediately after the header's sync marker.
    pub data_start: u64,
}

impl Header {
    /// Parse the header from the start of `r`.
    ///
    /// `data_start` is computed from the bytes consumed, so `r` must be
    /// positioned at offset 0. Running out of input surfaces as an I/O error;
    /// input that is present but wrong surfaces as [`OcfError::CorruptHeader`].
    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        let mut counted = Counted { inner: r, count: 0 };

        let mut magic = [0u8; 4];
        counted.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(OcfError::CorruptHeader(format!(
                "invalid magic bytes {magic:02x?}; not an object container file"
            )));
        }

        let metadata = read_metadata(&mut counted)?;

        let mut sync = [0u8; SYNC_SIZE];
        counted.read_exact(&mut sync)?;

        let schema_json = metadata
            .get(SCHEMA_KEY)
            .ok_or_else(|| OcfError::CorruptHeader(format!("metadata has no '{SCHEMA_KEY}' entry")))?;
        let schema_text = std::str::from_utf8(schema_json)
            .map_err(|e| OcfError::CorruptHeader(format!("'{SCHEMA_KEY}' is not UTF-8: {e}")))?;
        let schema = Schema::parse_str(schema_text)
            .map_err(|e| OcfError::CorruptHeader(format!("embedded schema: {e}")))?;

        let codec = match metadata.get(CODEC_KEY) {
            None => CODEC_NULL.to_string(),
            Some(raw) => String::from_utf8(raw.clone())
                .map_err(|e| OcfError::CorruptHeader(format!("'{CODEC_KEY}' is not UTF-8: {e}")))?,
        };

        Ok(Self {
            schema,
            codec,
            sync,
            metadata,
            data_start: counted.count,
        })
    }

    /// User metadata: every entry outside the reserved `avro.` namespace.
    pub fn user_metadata(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.metadata
            .iter()
            .filter(|(k, _)| !k.starts_with("avro."))
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Reads the `map<bytes>` metadata section.
fn read_metadata<R: Read>(r: &mut R) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut metadata = BTreeMap::new();
    loop {
        let count = read_header_long(r, "metadata block count")?;
        if count == 0 {
            return Ok(metadata);
        }
        if count < 0 {
            read_header_long(r, "metadata block size")?;
        }
        for _ in 0..count.unsigned_abs() {
            let key = read_header_bytes(r, "metadata key")?;
            let key = String::from_utf8(key)
                .map_err(|e| OcfError::CorruptHeader(format!("metadata key is not UTF-8: {e}")))?;
            let value = read_header_bytes(r, "metadata value")?;
            metadata.insert(key, value);
        }
    }
}

fn read_header_long<R: Read>(r: &mut R, what: &str) -> Result<i64> {
    varint::read_long(r).map_err(|e| match e.kind() {
        io::ErrorKind::InvalidData => OcfError::CorruptHeader(format!("{what}: {e}")),
        _ => OcfError::Io(e),
    })
}

fn read_header_bytes<R: Read>(r: &mut R, what: &str) -> Result<Vec<u8>> {
    let len = read_header_long(r, what)?;
    if len < 0 {
        return Err(OcfError::CorruptHeader(format!("{what} has negative length {len}")));
    }
    let mut buf = Vec::new();
    r.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() as u64 != len as u64 {
        return Err(OcfError::Io(io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(buf)
}

/// Counts the bytes pulled through it.
struct Counted<'a, R: ?Sized> {
    inner: &'a mut R,
    count: u64,
}

impl<R: Read + ?Sized> Read for Counted<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint::write_long;

    fn put_bytes(out: &mut Vec<u8>, b: &[u8]) {
        write_long(out, b.len() as i64).unwrap();
        out.extend_from_slice(b);
    }

    fn header_bytes(entries: &[(&str, &[u8])], negative_count: bool) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        if negative_count {
            write_long(&mut out, -(entries.len() as i64)).unwrap();
            write_long(&mut out, 0).unwrap();
        } else {
            write_long(&mut out, entries.len() as i64).unwrap();
        }
        for (k, v) in entries {
            put_bytes(&mut out, k.as_bytes());
            put_bytes(&mut out, v);
        }
        write_long(&mut out, 0).unwrap();
        out.extend_from_slice(&[7u8; SYNC_SIZE]);
        out
    }

    #[test]
    fn parses_schema_codec_sync_and_data_start() {
        let mut bytes = header_bytes(
            &[(SCHEMA_KEY, b"\"long\""), (CODEC_KEY, b"deflate"), ("app.owner", b"me")],
            false,
        );
        let header_len = bytes.len() as u64;
        bytes.extend_from_slice(b"block data follows");

        let header = Header::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(header.schema, Schema::Long);
        assert_eq!(header.codec, "deflate");
        assert_eq!(header.sync, [7u8; SYNC_SIZE]);
        assert_eq!(header.data_start, header_len);
        assert_eq!(
            header.user_metadata().collect::<Vec<_>>(),
            vec![("app.owner", b"me".as_slice())]
        );
    }

    #[test]
    fn codec_defaults_to_null_and_negative_counts_are_accepted() {
        let bytes = header_bytes(&[(SCHEMA_KEY, b"\"int\"")], true);
        let header = Header::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(header.codec, CODEC_NULL);
    }

    #[test]
    fn bad_magic_is_corrupt_header() {
        let mut bytes = header_bytes(&[(SCHEMA_KEY, b"\"int\"")], false);
        bytes[3] = 2;
        assert!(matches!(
            Header::read_from(&mut bytes.as_slice()),
            Err(OcfError::CorruptHeader(_))
        ));
    }

    #[test]
    fn missing_or_unparseable_schema_is_corrupt_header() {
        for entries in [
            vec![(CODEC_KEY, b"null".as_slice())],
            vec![(SCHEMA_KEY, b"{\"type\":".as_slice())],
        ] {
            let bytes = header_bytes(&entries, false);
            assert!(matches!(
                Header::read_from(&mut bytes.as_slice()),
                Err(OcfError::CorruptHeader(_))
            ));
        }
    }

    #[test]
    fn truncated_header_is_an_io_error() {
        let bytes = header_bytes(&[(SCHEMA_KEY, b"\"int\"")], false);
        let truncated = &bytes[..bytes.len() - 4];
        match Header::read_from(&mut &truncated[..]) {
            Err(OcfError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected EOF, got {other:?}"),
        }
    }
}
