use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_PORT: u16 = 5555;
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5555";
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:5555";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

pub fn joined(name: &str) -> String {
    format!("{name} has joined the chat!")
}

pub fn left(name: &str) -> String {
    format!("{name} has left the chat.")
}

pub fn chat(name: &str, body: &str) -> String {
    format!("{name}: {body}")
}

/// Reads one line from `reader`, stripped of its terminator.
///
/// Returns `Ok(None)` at end of stream. A final line without a trailing
/// newline is still returned. Invalid UTF-8 surfaces as
/// [`io::ErrorKind::InvalidData`].
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }

    let trimmed = line.trim_end_matches(LINE_ENDINGS).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

/// Writes `line` followed by a newline and flushes so peers see it promptly.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncWriteExt, BufReader};

    use super::*;

    #[test]
    fn server_lines_match_wire_format() {
        assert_eq!(joined("alice"), "alice has joined the chat!");
        assert_eq!(left("alice"), "alice has left the chat.");
        assert_eq!(chat("alice", "hi there"), "alice: hi there");
    }

    #[tokio::test]
    async fn read_line_strips_crlf_and_reports_eof() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut reader = BufReader::new(reader);

        writer.write_all(b"alice\r\nhello\nlast").await.unwrap();
        drop(writer);

        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("alice"));
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("hello"));
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("last"));
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_line_rejects_invalid_utf8() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut reader = BufReader::new(reader);

        writer.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();

        let err = read_line(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn write_line_appends_newline() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut reader = BufReader::new(reader);

        write_line(&mut writer, "bob: hey").await.unwrap();

        let mut raw = String::new();
        reader.read_line(&mut raw).await.unwrap();
        assert_eq!(raw, "bob: hey\n");
    }
}
