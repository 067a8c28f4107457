use std::io::{self, Read, Write};

const COPY_BUF_LEN: usize = 8192;

/// Read and discard exactly `len` bytes.
pub fn skip_exact<R: Read>(reader: &mut R, len: u64) -> io::Result<()> {
    copy_exact(reader, &mut io::sink(), len)
}

/// Copy exactly `len` bytes; a short source is `UnexpectedEof`.
pub fn copy_exact<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    mut len: u64,
) -> io::Result<()> {
    let mut buffer = [0u8; COPY_BUF_LEN];

    while len > 0 {
        let to_read = std::cmp::min(len, buffer.len() as u64) as usize;
        let read = reader.read(&mut buffer[..to_read])?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated input",
            ));
        }
        writer.write_all(&buffer[..read])?;
        len -= read as u64;
    }

    Ok(())
}

/// Read exactly `len` bytes into a fresh buffer without trusting `len`
/// for the up-front allocation.
pub fn read_vec<R: Read>(reader: &mut R, len: u64) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(std::cmp::min(len, COPY_BUF_LEN as u64 * 8) as usize);
    reader.take(len).read_to_end(&mut out)?;
    if (out.len() as u64) != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated input",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_source_is_eof() {
        let mut src: &[u8] = b"abc";
        let err = skip_exact(&mut src, 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn read_vec_exact() {
        let mut src: &[u8] = b"abcdef";
        assert_eq!(read_vec(&mut src, 4).unwrap(), b"abcd");
        assert_eq!(src, b"ef");
    }
}
