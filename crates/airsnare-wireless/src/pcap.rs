//! Minimal pcap container support (radiotap link type only)

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const PCAP_MAGIC: u32 = 0xa1b2c3d4;
const PCAP_MAGIC_NANOS: u32 = 0xa1b23c4d;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
const PCAP_SNAPLEN: u32 = 65535;
const GLOBAL_HEADER_LEN: u64 = 24;
pub const LINKTYPE_IEEE802_11_RADIOTAP: u32 = 127;

pub struct PcapWriter<W: Write> {
    w: W,
}

impl<W: Write> PcapWriter<W> {
    pub fn new(mut w: W) -> io::Result<Self> {
        write_global_header(&mut w)?;
        Ok(Self { w })
    }

    pub fn write_packet(&mut self, ts: SystemTime, data: &[u8]) -> io::Result<()> {
        let (sec, usec) = system_time_to_sec_usec(ts);
        write_record_header(&mut self.w, sec, usec, data.len() as u32)?;
        self.w.write_all(data)?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.w.flush()
    }

    pub fn into_inner(self) -> W {
        self.w
    }
}

impl PcapWriter<File> {
    /// Open `path` for appending. A missing or empty file gets a fresh
    /// global header; an existing capture keeps its header and grows.
    pub fn append(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() < GLOBAL_HEADER_LEN {
            file.set_len(0)?;
            write_global_header(&mut file)?;
        }
        Ok(Self { w: file })
    }
}

/// One captured record
#[derive(Debug, Clone)]
pub struct PcapRecord {
    pub timestamp: SystemTime,
    pub data: Vec<u8>,
}

pub struct PcapReader<R: Read> {
    r: R,
    big_endian: bool,
    nanos: bool,
}

impl PcapReader<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> PcapReader<R> {
    pub fn new(mut r: R) -> io::Result<Self> {
        let mut header = [0u8; GLOBAL_HEADER_LEN as usize];
        r.read_exact(&mut header)?;

        let magic_le = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let (big_endian, nanos) = match magic_le {
            PCAP_MAGIC => (false, false),
            PCAP_MAGIC_NANOS => (false, true),
            m if m.swap_bytes() == PCAP_MAGIC => (true, false),
            m if m.swap_bytes() == PCAP_MAGIC_NANOS => (true, true),
            m => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("not a pcap file (magic 0x{:08x})", m),
                ))
            }
        };

        let reader = Self {
            r,
            big_endian,
            nanos,
        };
        let linktype = reader.u32_at(&header[20..24]);
        if linktype != LINKTYPE_IEEE802_11_RADIOTAP {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "unsupported link type {} (expected {} radiotap)",
                    linktype, LINKTYPE_IEEE802_11_RADIOTAP
                ),
            ));
        }
        Ok(reader)
    }

    fn u32_at(&self, b: &[u8]) -> u32 {
        let raw = [b[0], b[1], b[2], b[3]];
        if self.big_endian {
            u32::from_be_bytes(raw)
        } else {
            u32::from_le_bytes(raw)
        }
    }

    /// Next record, `None` at a clean end of file
    pub fn next_record(&mut self) -> io::Result<Option<PcapRecord>> {
        let mut header = [0u8; 16];
        match read_full(&mut self.r, &mut header)? {
            0 => return Ok(None),
            16 => {}
            n => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("truncated record header ({} bytes)", n),
                ))
            }
        }

        let sec = self.u32_at(&header[0..4]) as u64;
        let frac = self.u32_at(&header[4..8]) as u64;
        let incl_len = self.u32_at(&header[8..12]) as usize;
        if incl_len > PCAP_SNAPLEN as usize * 4 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record length {} is implausible", incl_len),
            ));
        }

        let mut data = vec![0u8; incl_len];
        self.r.read_exact(&mut data)?;

        let offset = if self.nanos {
            Duration::new(sec, frac.min(999_999_999) as u32)
        } else {
            Duration::new(sec, 0) + Duration::from_micros(frac)
        };
        Ok(Some(PcapRecord {
            timestamp: UNIX_EPOCH + offset,
            data,
        }))
    }
}

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

fn write_global_header<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_all(&PCAP_MAGIC.to_le_bytes())?;
    w.write_all(&PCAP_VERSION_MAJOR.to_le_bytes())?;
    w.write_all(&PCAP_VERSION_MINOR.to_le_bytes())?;
    w.write_all(&0i32.to_le_bytes())?; // thiszone
    w.write_all(&0u32.to_le_bytes())?; // sigfigs
    w.write_all(&PCAP_SNAPLEN.to_le_bytes())?;
    w.write_all(&LINKTYPE_IEEE802_11_RADIOTAP.to_le_bytes())?;
    Ok(())
}

fn write_record_header<W: Write>(w: &mut W, sec: u32, usec: u32, len: u32) -> io::Result<()> {
    w.write_all(&sec.to_le_bytes())?;
    w.write_all(&usec.to_le_bytes())?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&len.to_le_bytes())?;
    Ok(())
}

fn system_time_to_sec_usec(ts: SystemTime) -> (u32, u32) {
    let dur = ts.duration_since(UNIX_EPOCH).unwrap_or_default();
    let sec = dur.as_secs().min(u32::MAX as u64) as u32;
    (sec, dur.subsec_micros())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_pcap_header_and_record() {
        let mut writer = PcapWriter::new(Vec::new()).unwrap();
        let packet = vec![0x01, 0x02, 0x03, 0x04];
        let ts = UNIX_EPOCH + Duration::from_secs(1) + Duration::from_micros(2);
        writer.write_packet(ts, &packet).unwrap();

        let buf = writer.into_inner();
        assert_eq!(buf.len(), 24 + 16 + packet.len());

        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        assert_eq!(magic, PCAP_MAGIC);

        let incl_len = u32::from_le_bytes(buf[32..36].try_into().unwrap());
        let orig_len = u32::from_le_bytes(buf[36..40].try_into().unwrap());
        assert_eq!(incl_len, packet.len() as u32);
        assert_eq!(orig_len, packet.len() as u32);
    }

    #[test]
    fn test_reader_reads_writer_output() {
        let mut writer = PcapWriter::new(Vec::new()).unwrap();
        let ts = UNIX_EPOCH + Duration::from_secs(42) + Duration::from_micros(7);
        writer.write_packet(ts, &[0xAA; 10]).unwrap();
        writer.write_packet(ts, &[0xBB; 3]).unwrap();

        let mut reader = PcapReader::new(Cursor::new(writer.into_inner())).unwrap();
        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.data, vec![0xAA; 10]);
        assert_eq!(first.timestamp, ts);
        assert_eq!(reader.next_record().unwrap().unwrap().data, vec![0xBB; 3]);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_reader_rejects_other_linktypes() {
        let mut buf = Vec::new();
        write_global_header(&mut buf).unwrap();
        buf[20..24].copy_from_slice(&1u32.to_le_bytes());
        assert!(PcapReader::new(Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_reader_big_endian() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&PCAP_MAGIC.to_be_bytes());
        buf.extend_from_slice(&PCAP_VERSION_MAJOR.to_be_bytes());
        buf.extend_from_slice(&PCAP_VERSION_MINOR.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&PCAP_SNAPLEN.to_be_bytes());
        buf.extend_from_slice(&LINKTYPE_IEEE802_11_RADIOTAP.to_be_bytes());
        buf.extend_from_slice(&5u32.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&2u32.to_be_bytes());
        buf.extend_from_slice(&2u32.to_be_bytes());
        buf.extend_from_slice(&[1, 2]);

        let mut reader = PcapReader::new(Cursor::new(buf)).unwrap();
        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(record.data, vec![1, 2]);
        assert_eq!(record.timestamp, UNIX_EPOCH + Duration::from_secs(5));
    }

    #[test]
    fn test_append_keeps_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hs.pcap");

        let mut first = PcapWriter::append(&path).unwrap();
        first.write_packet(SystemTime::now(), &[1, 2, 3]).unwrap();
        drop(first);

        let mut second = PcapWriter::append(&path).unwrap();
        second.write_packet(SystemTime::now(), &[4, 5]).unwrap();
        drop(second);

        let mut reader = PcapReader::open(&path).unwrap();
        assert_eq!(reader.next_record().unwrap().unwrap().data, vec![1, 2, 3]);
        assert_eq!(reader.next_record().unwrap().unwrap().data, vec![4, 5]);
        assert!(reader.next_record().unwrap().is_none());
    }
}
