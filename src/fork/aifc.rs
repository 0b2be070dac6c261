//! AIFC track layout
//!
//! CD filesystems expose every audio track as an AIFC file whose SSND chunk
//! holds raw 16-bit stereo PCM. Only the chunk walk needed to find that data
//! is done here; the COMM chunk is skipped because the format is fixed.
//!
//! Layout:
//! - `FORM` container: id (4), size (4, BE), form type `AIFC` (4)
//! - chunks: id (4), size (4, BE), data padded to an even length
//! - `SSND` data: offset (4, BE), block size (4, BE), `offset` skip bytes, PCM

use super::TrackLayout;
use crate::{CddaError, Result};
use nom::branch::alt;
use nom::bytes::complete::{tag, take};
use nom::number::complete::be_u32;
use nom::IResult;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

const FORM_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const SSND_HEADER_LEN: usize = 8;

/// Container header: `(form size, form type)`
fn form_header(input: &[u8]) -> IResult<&[u8], (u32, &[u8])> {
    let (input, _) = tag(&b"FORM"[..])(input)?;
    let (input, size) = be_u32(input)?;
    let (input, form_type) = alt((tag(&b"AIFC"[..]), tag(&b"AIFF"[..])))(input)?;
    Ok((input, (size, form_type)))
}

/// Chunk header: `(chunk id, chunk size)`
fn chunk_header(input: &[u8]) -> IResult<&[u8], (&[u8], u32)> {
    let (input, id) = take(4usize)(input)?;
    let (input, size) = be_u32(input)?;
    Ok((input, (id, size)))
}

/// SSND preamble: `(offset, block size)`
fn ssnd_header(input: &[u8]) -> IResult<&[u8], (u32, u32)> {
    let (input, offset) = be_u32(input)?;
    let (input, block_size) = be_u32(input)?;
    Ok((input, (offset, block_size)))
}

fn read_exact_at<R: Read + Seek>(reader: &mut R, pos: u64, buf: &mut [u8]) -> Result<bool> {
    reader.seek(SeekFrom::Start(pos))?;
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Walk the chunks of an AIFC file and return where its SSND audio data lives
pub fn locate_ssnd<R: Read + Seek>(reader: &mut R) -> Result<TrackLayout> {
    let file_len = reader.seek(SeekFrom::End(0))?;

    let mut header = [0u8; FORM_HEADER_LEN];
    if !read_exact_at(reader, 0, &mut header)? {
        return Err(CddaError::Format("file too small for FORM header".into()));
    }
    form_header(&header)
        .map_err(|_| CddaError::Format("not an AIFC file (missing FORM/AIFC header)".into()))?;

    let mut pos = FORM_HEADER_LEN as u64;
    loop {
        let mut chunk = [0u8; CHUNK_HEADER_LEN];
        if !read_exact_at(reader, pos, &mut chunk)? {
            return Err(CddaError::Format("no SSND chunk found".into()));
        }
        let (_, (id, size)) = chunk_header(&chunk)
            .map_err(|_| CddaError::Format(format!("bad chunk header at offset {}", pos)))?;

        if id == b"SSND" {
            let mut preamble = [0u8; SSND_HEADER_LEN];
            if !read_exact_at(reader, pos + CHUNK_HEADER_LEN as u64, &mut preamble)? {
                return Err(CddaError::Format("truncated SSND chunk".into()));
            }
            let (_, (offset, _block_size)) = ssnd_header(&preamble)
                .map_err(|_| CddaError::Format("bad SSND header".into()))?;

            let data_offset =
                pos + (CHUNK_HEADER_LEN + SSND_HEADER_LEN) as u64 + u64::from(offset);
            let declared = u64::from(size).saturating_sub(SSND_HEADER_LEN as u64 + u64::from(offset));
            let available = file_len.saturating_sub(data_offset);

            return Ok(TrackLayout {
                data_offset,
                data_length: declared.min(available),
            });
        }

        // Chunk data is padded to an even length
        pos += CHUNK_HEADER_LEN as u64 + u64::from(size) + u64::from(size & 1);
    }
}

/// Open a track file and locate its audio data
pub fn open_track<P: AsRef<Path>>(path: P) -> Result<(File, TrackLayout)> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let layout = locate_ssnd(&mut file)?;
    log::debug!(
        "{}: audio data at offset {}, {} bytes",
        path.display(),
        layout.data_offset,
        layout.data_length
    );
    Ok((file, layout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(id);
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn aifc(chunks: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = chunks.concat();
        let mut out = Vec::new();
        out.extend_from_slice(b"FORM");
        out.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
        out.extend_from_slice(b"AIFC");
        out.extend_from_slice(&body);
        out
    }

    fn ssnd(offset: u32, pcm: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&offset.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend(std::iter::repeat(0xEE).take(offset as usize));
        body.extend_from_slice(pcm);
        chunk(b"SSND", &body)
    }

    #[test]
    fn test_locate_after_skipped_chunks() {
        let pcm: Vec<u8> = (0..64).collect();
        let data = aifc(&[
            chunk(b"FVER", &[0xA2, 0x80, 0x51, 0x40]),
            chunk(b"COMM", &[0u8; 23]), // odd length, padded
            ssnd(0, &pcm),
        ]);

        let layout = locate_ssnd(&mut Cursor::new(data.clone())).unwrap();
        assert_eq!(layout.data_length, 64);
        let start = layout.data_offset as usize;
        assert_eq!(&data[start..start + 64], pcm.as_slice());
    }

    #[test]
    fn test_ssnd_offset_is_skipped() {
        let pcm = vec![7u8; 16];
        let data = aifc(&[ssnd(4, &pcm)]);

        let layout = locate_ssnd(&mut Cursor::new(data)).unwrap();
        assert_eq!(layout.data_offset, 12 + 8 + 8 + 4);
        assert_eq!(layout.data_length, 16);
    }

    #[test]
    fn test_rejects_non_aifc() {
        let mut data = aifc(&[ssnd(0, &[0u8; 8])]);
        data[8..12].copy_from_slice(b"WAVE");
        let err = locate_ssnd(&mut Cursor::new(data)).unwrap_err();
        assert!(matches!(err, CddaError::Format(_)));
    }

    #[test]
    fn test_missing_ssnd() {
        let data = aifc(&[chunk(b"COMM", &[0u8; 18])]);
        let err = locate_ssnd(&mut Cursor::new(data)).unwrap_err();
        assert!(err.to_string().contains("SSND"));
    }

    #[test]
    fn test_truncated_data_is_clamped_to_file() {
        let mut data = aifc(&[ssnd(0, &[1u8; 100])]);
        data.truncate(data.len() - 40);
        let layout = locate_ssnd(&mut Cursor::new(data)).unwrap();
        assert_eq!(layout.data_length, 60);
    }
}
