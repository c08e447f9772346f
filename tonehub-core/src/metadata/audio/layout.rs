//! Minimal container walking: where the audio payload lives, plus the few
//! MP4 atoms the generic tag reader does not surface.

use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;

const ID3V1_LEN: u64 = 128;
const MAX_CHPL_BYTES: u64 = 1024 * 1024;
const MAX_TEXT_ATOM_BYTES: u64 = 4 * 1024 * 1024;
/// Nero chapter start times are stored in 100ns units.
const CHPL_TICKS_PER_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ContainerKind {
    Mpeg,
    Mp4,
    Flac,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawChapter {
    pub start_ms: u64,
    pub title: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ContainerLayout {
    pub kind: ContainerKind,
    /// Byte range holding encoded audio, excluding headers and tag blocks.
    pub payload: Range<u64>,
    /// Raw iTunes media kind (`stik`).
    pub media_kind: Option<i64>,
    pub long_description: Option<String>,
    pub chapters: Vec<RawChapter>,
}

pub(crate) fn read_layout<R: Read + Seek>(
    reader: &mut R,
) -> io::Result<ContainerLayout> {
    let len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 12];
    let filled = read_up_to(reader, &mut magic)?;
    let magic = &magic[..filled];

    if magic.starts_with(b"fLaC") {
        return flac_layout(reader, len);
    }
    if magic.len() >= 8 && &magic[4..8] == b"ftyp" {
        return mp4_layout(reader, len);
    }
    if magic.starts_with(b"ID3")
        || (magic.len() >= 2 && magic[0] == 0xff && magic[1] & 0xe0 == 0xe0)
    {
        return mpeg_layout(reader, len);
    }

    Ok(ContainerLayout {
        kind: ContainerKind::Unknown,
        payload: 0..len,
        ..ContainerLayout::default()
    })
}

fn mpeg_layout<R: Read + Seek>(
    reader: &mut R,
    len: u64,
) -> io::Result<ContainerLayout> {
    reader.seek(SeekFrom::Start(0))?;
    let mut header = [0u8; 10];
    let filled = read_up_to(reader, &mut header)?;

    let mut start = 0;
    if filled == 10 && header.starts_with(b"ID3") {
        let tag_size = synchsafe(&header[6..10]);
        let footer = if header[5] & 0x10 != 0 { 10 } else { 0 };
        start = (10 + tag_size + footer).min(len);
    }

    let mut end = len;
    if len >= start + ID3V1_LEN {
        reader.seek(SeekFrom::Start(len - ID3V1_LEN))?;
        let mut marker = [0u8; 3];
        reader.read_exact(&mut marker)?;
        if &marker == b"TAG" {
            end = len - ID3V1_LEN;
        }
    }

    Ok(ContainerLayout {
        kind: ContainerKind::Mpeg,
        payload: start..end.max(start),
        ..ContainerLayout::default()
    })
}

fn flac_layout<R: Read + Seek>(
    reader: &mut R,
    len: u64,
) -> io::Result<ContainerLayout> {
    let mut position = 4;
    loop {
        if position + 4 > len {
            return Err(invalid("flac metadata blocks run past end of file"));
        }
        reader.seek(SeekFrom::Start(position))?;
        let mut block = [0u8; 4];
        reader.read_exact(&mut block)?;
        let is_last = block[0] & 0x80 != 0;
        let block_len = u64::from(block[1]) << 16
            | u64::from(block[2]) << 8
            | u64::from(block[3]);
        position += 4 + block_len;
        if is_last {
            break;
        }
    }

    Ok(ContainerLayout {
        kind: ContainerKind::Flac,
        payload: position.min(len)..len,
        ..ContainerLayout::default()
    })
}

#[derive(Debug, Clone, Copy)]
struct Atom {
    kind: [u8; 4],
    body: u64,
    end: u64,
}

fn read_atom<R: Read + Seek>(
    reader: &mut R,
    position: u64,
    limit: u64,
) -> io::Result<Option<Atom>> {
    if position + 8 > limit {
        return Ok(None);
    }
    reader.seek(SeekFrom::Start(position))?;
    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;
    let declared = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let kind = [header[4], header[5], header[6], header[7]];

    let (header_len, size) = match declared {
        0 => (8, limit - position),
        1 => {
            if position + 16 > limit {
                return Err(invalid("atom header overruns its parent"));
            }
            let mut large = [0u8; 8];
            reader.read_exact(&mut large)?;
            (16, u64::from_be_bytes(large))
        }
        n => (8, u64::from(n)),
    };
    if size < header_len {
        return Err(invalid("atom smaller than its header"));
    }

    Ok(Some(Atom {
        kind,
        body: position + header_len,
        end: position.saturating_add(size).min(limit),
    }))
}

fn mp4_layout<R: Read + Seek>(
    reader: &mut R,
    len: u64,
) -> io::Result<ContainerLayout> {
    let mut layout = ContainerLayout {
        kind: ContainerKind::Mp4,
        payload: 0..len,
        ..ContainerLayout::default()
    };
    let mut found_mdat = false;
    let mut position = 0;

    while let Some(atom) = read_atom(reader, position, len)? {
        match &atom.kind {
            b"mdat" if !found_mdat => {
                layout.payload = atom.body..atom.end;
                found_mdat = true;
            }
            b"moov" => read_moov(reader, atom, &mut layout)?,
            _ => {}
        }
        position = atom.end;
    }

    Ok(layout)
}

fn read_moov<R: Read + Seek>(
    reader: &mut R,
    moov: Atom,
    layout: &mut ContainerLayout,
) -> io::Result<()> {
    let Some(udta) = find_child(reader, moov, b"udta")? else {
        return Ok(());
    };

    if let Some(chpl) = find_child(reader, udta, b"chpl")? {
        layout.chapters = read_chpl(reader, chpl)?;
    }

    let Some(meta) = find_child(reader, udta, b"meta")? else {
        return Ok(());
    };
    // ISO style `meta` is a full box; QuickTime style starts with children.
    let mut peek = [0u8; 8];
    reader.seek(SeekFrom::Start(meta.body))?;
    let filled = read_up_to(reader, &mut peek)?;
    let meta = if filled == 8 && &peek[4..8] == b"hdlr" {
        meta
    } else {
        Atom {
            body: (meta.body + 4).min(meta.end),
            ..meta
        }
    };

    let Some(ilst) = find_child(reader, meta, b"ilst")? else {
        return Ok(());
    };

    if let Some(payload) = item_data(reader, ilst, b"stik")? {
        layout.media_kind = parse_be_int(&payload);
    }
    if let Some(payload) = item_data(reader, ilst, b"ldes")? {
        let text = String::from_utf8_lossy(&payload).trim().to_string();
        if !text.is_empty() {
            layout.long_description = Some(text);
        }
    }
    Ok(())
}

fn find_child<R: Read + Seek>(
    reader: &mut R,
    parent: Atom,
    kind: &[u8; 4],
) -> io::Result<Option<Atom>> {
    let mut position = parent.body;
    while let Some(atom) = read_atom(reader, position, parent.end)? {
        if &atom.kind == kind {
            return Ok(Some(atom));
        }
        position = atom.end;
    }
    Ok(None)
}

/// Payload of the `data` atom under an `ilst` item, without the type and
/// locale words.
fn item_data<R: Read + Seek>(
    reader: &mut R,
    ilst: Atom,
    kind: &[u8; 4],
) -> io::Result<Option<Vec<u8>>> {
    let Some(item) = find_child(reader, ilst, kind)? else {
        return Ok(None);
    };
    let Some(data) = find_child(reader, item, b"data")? else {
        return Ok(None);
    };
    let start = data.body + 8;
    if start > data.end || data.end - start > MAX_TEXT_ATOM_BYTES {
        return Ok(None);
    }
    read_range(reader, start..data.end).map(Some)
}

fn read_chpl<R: Read + Seek>(
    reader: &mut R,
    chpl: Atom,
) -> io::Result<Vec<RawChapter>> {
    if chpl.end.saturating_sub(chpl.body) > MAX_CHPL_BYTES {
        return Ok(Vec::new());
    }
    let body = read_range(reader, chpl.body..chpl.end)?;
    let mut cursor = ByteCursor::new(&body);

    let version = cursor.u8()?;
    cursor.skip(3)?;
    if version != 0 {
        cursor.skip(4)?;
    }
    let count = cursor.u8()?;

    let mut chapters = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let start = cursor.u64()?;
        let title_len = usize::from(cursor.u8()?);
        let title = cursor.take(title_len)?;
        chapters.push(RawChapter {
            start_ms: start / CHPL_TICKS_PER_MS,
            title: String::from_utf8_lossy(title).into_owned(),
        });
    }
    Ok(chapters)
}

fn read_range<R: Read + Seek>(
    reader: &mut R,
    range: Range<u64>,
) -> io::Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(range.start))?;
    let len = usize::try_from(range.end.saturating_sub(range.start))
        .map_err(|_| invalid("atom too large"))?;
    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer)?;
    Ok(buffer)
}

fn read_up_to<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn synchsafe(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, byte| (acc << 7) | u64::from(byte & 0x7f))
}

fn parse_be_int(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    Some(bytes.iter().fold(0i64, |acc, byte| (acc << 8) | i64::from(*byte)))
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

struct ByteCursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn take(&mut self, len: usize) -> io::Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| invalid("chapter list truncated"))?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> io::Result<()> {
        self.take(len).map(|_| ())
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> io::Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }
}
