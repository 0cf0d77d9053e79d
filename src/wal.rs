use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::{Booking, BookingId, Event};
use crate::observability::WAL_APPENDS_TOTAL;

/// Length prefix plus CRC suffix.
const FRAME_OVERHEAD: u64 = 8;

/// A booking event with a full payload is a few KiB; a larger length prefix
/// can only come from a corrupt frame.
const MAX_FRAME_PAYLOAD: usize = 1 << 20;

fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

enum Frame {
    Event(Event, u64),
    End,
    Torn,
}

/// Read until `buf` is full or the reader is exhausted.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    match fill(reader, &mut len_buf)? {
        0 => return Ok(Frame::End),
        4 => {}
        _ => return Ok(Frame::Torn),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_PAYLOAD {
        return Ok(Frame::Torn);
    }

    let mut body = vec![0u8; len + 4];
    if fill(reader, &mut body)? < body.len() {
        return Ok(Frame::Torn);
    }
    let (payload, crc) = body.split_at(len);
    if u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]) != crc32fast::hash(payload) {
        return Ok(Frame::Torn);
    }
    Ok(match bincode::deserialize::<Event>(payload) {
        Ok(event) => Frame::Event(event, len as u64 + FRAME_OVERHEAD),
        Err(_) => Frame::Torn,
    })
}

/// Contents of a booking log read back from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Bytes covered by intact frames.
    pub valid_len: u64,
    /// A crash mid-write (or corruption) left bytes after `valid_len`.
    pub torn_tail: bool,
}

/// Append-only log of booking events.
///
/// Each frame is `[u32 len][bincode Event][u32 crc32]`, little endian. Replay
/// stops at the first frame that is short, fails its CRC or does not decode.
/// A compacted log starts with `IdsReserved` so deleted ids stay spent.
pub struct BookingLog {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl BookingLog {
    /// Replay the log at `path` and open it for appending.
    ///
    /// A torn tail is cut off first: appends written after it would otherwise
    /// be unreachable on the next replay.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Self::replay(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if replay.torn_tail {
            warn!(
                "{}: discarding torn tail after {} bytes",
                path.display(),
                replay.valid_len
            );
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let log = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((log, replay.events))
    }

    /// Buffer one event. Durable only after `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        metrics::counter!(WAL_APPENDS_TOTAL, "kind" => event.kind()).increment(1);
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with a snapshot of the live bookings, headed by the id
    /// high-water mark. The snapshot is fsynced under a temp name and then
    /// renamed over the log.
    pub fn rewrite(&mut self, next_id: BookingId, bookings: Vec<Booking>) -> io::Result<()> {
        self.writer.flush()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            write_frame(&mut tmp, &Event::IdsReserved { next: next_id })?;
            for booking in bookings {
                write_frame(&mut tmp, &Event::BookingCreated { booking })?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        self.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        loop {
            match read_frame(&mut reader)? {
                Frame::Event(event, size) => {
                    replay.events.push(event);
                    replay.valid_len += size;
                }
                Frame::End => break,
                Frame::Torn => {
                    replay.torn_tail = true;
                    break;
                }
            }
        }
        Ok(replay)
    }
}
