use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{self, Read, Write};

/// Per-frame entry in the binary record log (`frame_data.bin`).
///
/// v1 layout, all integers big-endian:
///   [0]       version = 0x01
///   [1]       class           (0 = unclassified, 1 = day, 2 = night)
///   [2..10]   frame_id        (u64)
///   [10..18]  captured_at_ms  (i64, Unix millis)
///   [18..26]  score           (f64 bits)
///   [26..46]  buckets         (5 x f32: blue, green, brown, black, yellow percent)
///   [46..48]  name_len        (u16)
///   [48..]    name            (UTF-8, file the frame was saved as, may be empty)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRecord {
    pub frame_id: u64,
    pub captured_at_ms: i64,
    pub class: SceneClass,
    pub score: f64,
    pub buckets: BucketShares,
    pub name: String,
}

/// Day/night label assigned from the colour buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneClass {
    Unclassified,
    Day,
    Night,
}

impl SceneClass {
    fn to_byte(self) -> u8 {
        match self {
            SceneClass::Unclassified => 0,
            SceneClass::Day => 1,
            SceneClass::Night => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self, RecordError> {
        match b {
            0 => Ok(SceneClass::Unclassified),
            1 => Ok(SceneClass::Day),
            2 => Ok(SceneClass::Night),
            other => Err(RecordError::UnknownClass(other)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SceneClass::Unclassified => "top",
            SceneClass::Day => "day",
            SceneClass::Night => "night",
        }
    }
}

/// Share of pixels, in percent, that fell into each colour bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BucketShares {
    pub blue: f32,
    pub green: f32,
    pub brown: f32,
    pub black: f32,
    pub yellow: f32,
}

impl BucketShares {
    fn as_array(&self) -> [f32; 5] {
        [self.blue, self.green, self.brown, self.black, self.yellow]
    }

    fn from_array(v: [f32; 5]) -> Self {
        Self {
            blue: v[0],
            green: v[1],
            brown: v[2],
            black: v[3],
            yellow: v[4],
        }
    }
}

pub const RECORD_VERSION: u8 = 0x01;
const HEADER_SIZE: usize = 48;

fn be_u64(b: &[u8]) -> u64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[..8]);
    u64::from_be_bytes(a)
}

fn be_f32(b: &[u8]) -> f32 {
    let mut a = [0u8; 4];
    a.copy_from_slice(&b[..4]);
    f32::from_be_bytes(a)
}

impl FrameRecord {
    /// Capture time, if `captured_at_ms` is representable.
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.captured_at_ms)
    }

    /// Append the encoded record to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), RecordError> {
        let name = self.name.as_bytes();
        let name_len =
            u16::try_from(name.len()).map_err(|_| RecordError::NameTooLong(name.len()))?;

        buf.reserve(HEADER_SIZE + name.len());
        buf.push(RECORD_VERSION);
        buf.push(self.class.to_byte());
        buf.extend_from_slice(&self.frame_id.to_be_bytes());
        buf.extend_from_slice(&self.captured_at_ms.to_be_bytes());
        buf.extend_from_slice(&self.score.to_bits().to_be_bytes());
        for share in self.buckets.as_array() {
            buf.extend_from_slice(&share.to_be_bytes());
        }
        buf.extend_from_slice(&name_len.to_be_bytes());
        buf.extend_from_slice(name);
        Ok(())
    }

    /// Decode one record from the front of `data`. Returns the record and the
    /// number of bytes it occupied.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), RecordError> {
        if data.is_empty() {
            return Err(RecordError::Truncated {
                got: 0,
                expected: HEADER_SIZE,
            });
        }
        if data[0] != RECORD_VERSION {
            return Err(RecordError::UnsupportedVersion(data[0]));
        }
        if data.len() < HEADER_SIZE {
            return Err(RecordError::Truncated {
                got: data.len(),
                expected: HEADER_SIZE,
            });
        }

        let class = SceneClass::from_byte(data[1])?;
        let frame_id = be_u64(&data[2..10]);
        let captured_at_ms = be_u64(&data[10..18]) as i64;
        let score = f64::from_bits(be_u64(&data[18..26]));
        let mut shares = [0f32; 5];
        for (i, share) in shares.iter_mut().enumerate() {
            let at = 26 + i * 4;
            *share = be_f32(&data[at..at + 4]);
        }
        let name_len = u16::from_be_bytes([data[46], data[47]]) as usize;
        let total = HEADER_SIZE + name_len;
        if data.len() < total {
            return Err(RecordError::Truncated {
                got: data.len(),
                expected: total,
            });
        }
        let name = std::str::from_utf8(&data[HEADER_SIZE..total])
            .map_err(|_| RecordError::Name)?
            .to_string();

        Ok((
            Self {
                frame_id,
                captured_at_ms,
                class,
                score,
                buckets: BucketShares::from_array(shares),
                name,
            },
            total,
        ))
    }
}

/// Appends records to a log.
pub struct RecordWriter<W: Write> {
    inner: W,
    buf: Vec<u8>,
    written: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(128),
            written: 0,
        }
    }

    pub fn append(&mut self, record: &FrameRecord) -> Result<(), RecordError> {
        self.buf.clear();
        record.encode(&mut self.buf)?;
        self.inner.write_all(&self.buf)?;
        self.written += 1;
        Ok(())
    }

    /// Records appended through this writer.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> Result<(), RecordError> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Iterates the records of a log. A clean end of input between records ends
/// the iteration; anything else short of a full record is an error.
pub struct RecordReader<R: Read> {
    inner: R,
    done: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    fn read_record(&mut self) -> Result<Option<FrameRecord>, RecordError> {
        let mut header = [0u8; HEADER_SIZE];
        let got = read_full(&mut self.inner, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if header[0] != RECORD_VERSION {
            return Err(RecordError::UnsupportedVersion(header[0]));
        }
        if got < HEADER_SIZE {
            return Err(RecordError::Truncated {
                got,
                expected: HEADER_SIZE,
            });
        }

        let name_len = u16::from_be_bytes([header[46], header[47]]) as usize;
        let mut record = Vec::with_capacity(HEADER_SIZE + name_len);
        record.extend_from_slice(&header);
        record.resize(HEADER_SIZE + name_len, 0);
        let got = read_full(&mut self.inner, &mut record[HEADER_SIZE..])?;
        if got < name_len {
            return Err(RecordError::Truncated {
                got: HEADER_SIZE + got,
                expected: HEADER_SIZE + name_len,
            });
        }

        FrameRecord::decode(&record).map(|(r, _)| Some(r))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<FrameRecord, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(r)) => Some(Ok(r)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read until `buf` is full or the input ends. Returns the bytes read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record too short: got {got} bytes, expected at least {expected}")]
    Truncated { got: usize, expected: usize },
    #[error("unsupported record version {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("unknown scene class byte {0}")]
    UnknownClass(u8),
    #[error("record name is {0} bytes, the limit is 65535")]
    NameTooLong(usize),
    #[error("record name is not valid UTF-8")]
    Name,
    #[error("record log I/O failed: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample(id: u64, name: &str) -> FrameRecord {
        FrameRecord {
            frame_id: id,
            captured_at_ms: 1708300000000 + id as i64,
            class: SceneClass::Day,
            score: 42.5,
            buckets: BucketShares {
                blue: 12.5,
                green: 20.0,
                brown: 10.0,
                black: 1.25,
                yellow: 0.0,
            },
            name: name.to_string(),
        }
    }

    #[test]
    fn layout_is_fixed() {
        let mut buf = Vec::new();
        sample(7, "day/a.jpg").encode(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 9);
        assert_eq!(buf[0], RECORD_VERSION);
        assert_eq!(buf[1], 1);
        assert_eq!(&buf[2..10], &7u64.to_be_bytes());
        assert_eq!(&buf[18..26], &42.5f64.to_bits().to_be_bytes());
        assert_eq!(&buf[26..30], &12.5f32.to_be_bytes());
        assert_eq!(&buf[46..48], &9u16.to_be_bytes());
        assert_eq!(&buf[48..], b"day/a.jpg");
    }

    #[test]
    fn decode_reports_consumed_bytes() {
        let mut buf = Vec::new();
        sample(1, "x").encode(&mut buf).unwrap();
        sample(2, "").encode(&mut buf).unwrap();

        let (first, used) = FrameRecord::decode(&buf).unwrap();
        assert_eq!(first, sample(1, "x"));
        let (second, used2) = FrameRecord::decode(&buf[used..]).unwrap();
        assert_eq!(second, sample(2, ""));
        assert_eq!(used + used2, buf.len());
    }

    #[test]
    fn unknown_version_rejected() {
        let mut buf = Vec::new();
        sample(1, "").encode(&mut buf).unwrap();
        buf[0] = 0x02;
        assert!(matches!(
            FrameRecord::decode(&buf),
            Err(RecordError::UnsupportedVersion(0x02))
        ));
    }

    #[test]
    fn bad_class_rejected() {
        let mut buf = Vec::new();
        sample(1, "").encode(&mut buf).unwrap();
        buf[1] = 9;
        assert!(matches!(
            FrameRecord::decode(&buf),
            Err(RecordError::UnknownClass(9))
        ));
    }

    #[test]
    fn long_name_rejected() {
        let name = "n".repeat(70_000);
        let mut buf = Vec::new();
        assert!(matches!(
            sample(1, &name).encode(&mut buf),
            Err(RecordError::NameTooLong(70_000))
        ));
    }

    #[test]
    fn reader_walks_log() {
        let mut writer = RecordWriter::new(Vec::new());
        for id in 0..3 {
            writer.append(&sample(id, &format!("night/{id}.png"))).unwrap();
        }
        assert_eq!(writer.written(), 3);
        let bytes = writer.into_inner();

        let records: Vec<_> = RecordReader::new(Cursor::new(bytes))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].name, "night/2.png");
    }

    #[test]
    fn empty_log_has_no_records() {
        assert_eq!(RecordReader::new(Cursor::new(Vec::new())).count(), 0);
    }

    #[test]
    fn truncated_tail_is_an_error() {
        let mut buf = Vec::new();
        sample(1, "one").encode(&mut buf).unwrap();
        sample(2, "two").encode(&mut buf).unwrap();
        buf.truncate(buf.len() - 2);

        let mut reader = RecordReader::new(Cursor::new(buf));
        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(
            reader.next().unwrap(),
            Err(RecordError::Truncated { .. })
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn invalid_utf8_name_is_an_error() {
        let mut buf = Vec::new();
        sample(1, "abc").encode(&mut buf).unwrap();
        buf[HEADER_SIZE] = 0xFF;
        assert!(matches!(FrameRecord::decode(&buf), Err(RecordError::Name)));

        sample(2, "ok").encode(&mut buf).unwrap();
        let mut reader = RecordReader::new(Cursor::new(buf));
        assert!(matches!(reader.next(), Some(Err(RecordError::Name))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn capture_time_from_millis() {
        let r = sample(0, "");
        assert_eq!(r.captured_at().unwrap().timestamp_millis(), 1708300000000);
        let far = FrameRecord {
            captured_at_ms: i64::MAX,
            ..r
        };
        assert!(far.captured_at().is_none());
    }
}
