//! SCP wire records
//!
//! Control lines are `C<mode> <size> <name>`, `D<mode> 0 <name>`, `E` and
//! `T<mtime> 0 <atime> 0`, each newline terminated. Every line, and every
//! file body, is answered with a single status byte: `0` for success, `1`
//! (warning) or `2` (fatal) followed by a message line.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use afs_core::{Error, Result};

/// Success status byte
pub const OK: u8 = 0;
/// Warning status byte, followed by a message line
pub const WARNING: u8 = 1;
/// Fatal status byte, followed by a message line
pub const FATAL: u8 = 2;

/// One control record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A regular file; exactly `size` content bytes follow
    File { mode: u32, size: u64, name: String },
    /// Enter a directory
    Dir { mode: u32, name: String },
    /// Leave the current directory
    End,
    /// Modification and access time of the next file or directory
    Time { mtime: i64, atime: i64 },
}

impl Record {
    /// Parse a control line (type byte included, newline stripped)
    pub fn parse(line: &str) -> Result<Self> {
        let mut chars = line.chars();
        let kind = chars.next().ok_or_else(|| Error::Protocol("empty record".into()))?;
        let body = chars.as_str();
        match kind {
            'C' => {
                let (mode, size, name) = parse_entry(body)?;
                Ok(Record::File { mode, size, name })
            }
            'D' => {
                let (mode, _, name) = parse_entry(body)?;
                Ok(Record::Dir { mode, name })
            }
            'E' if body.is_empty() => Ok(Record::End),
            'T' => {
                let fields: Vec<&str> = body.split(' ').collect();
                let [mtime, _, atime, _] = fields.as_slice() else {
                    return Err(Error::Protocol(format!("malformed time record: {line}")));
                };
                Ok(Record::Time {
                    mtime: parse_number(mtime, line)?,
                    atime: parse_number(atime, line)?,
                })
            }
            _ => Err(Error::Protocol(format!("unexpected record: {line}"))),
        }
    }

    /// Wire form, newline included
    pub fn encode(&self) -> String {
        match self {
            Record::File { mode, size, name } => format!("C{:04o} {size} {name}\n", mode & 0o7777),
            Record::Dir { mode, name } => format!("D{:04o} 0 {name}\n", mode & 0o7777),
            Record::End => "E\n".to_string(),
            Record::Time { mtime, atime } => format!("T{mtime} 0 {atime} 0\n"),
        }
    }
}

fn parse_entry(body: &str) -> Result<(u32, u64, String)> {
    let mut parts = body.splitn(3, ' ');
    let (Some(mode), Some(size), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::Protocol(format!("malformed entry record: {body}")));
    };
    let mode = u32::from_str_radix(mode, 8)
        .map_err(|_| Error::Protocol(format!("invalid mode '{mode}'")))?;
    let size = parse_number(size, body)?;
    validate_name(name)?;
    Ok((mode, size, name.to_string()))
}

fn parse_number<T: std::str::FromStr>(value: &str, line: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Protocol(format!("invalid number '{value}' in {line}")))
}

/// Reject names that would escape the current directory
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(Error::Protocol(format!("unexpected filename: {name:?}")));
    }
    Ok(())
}

/// Quote a path for a POSIX shell
pub fn quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

/// Read a newline-terminated line, newline stripped
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut buf = Vec::new();
    reader.read_until(b'\n', &mut buf).await?;
    if buf.pop() != Some(b'\n') {
        return Err(Error::Protocol("unexpected end of stream".into()));
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Read one status byte, turning a remote complaint into an error
pub async fn read_status<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<()> {
    let code = reader.read_u8().await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            Error::Protocol("connection closed while awaiting acknowledgement".into())
        }
        _ => Error::Io(e),
    })?;
    match code {
        OK => Ok(()),
        WARNING | FATAL => Err(remote_error(reader).await),
        other => Err(Error::Protocol(format!("unexpected status byte {other:#04x}"))),
    }
}

/// Error for a warning or fatal record whose status byte was already read
pub async fn remote_error<R: AsyncBufRead + Unpin>(reader: &mut R) -> Error {
    match read_line(reader).await {
        Ok(message) => Error::from_remote_message(message),
        Err(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afs_core::ErrorKind;

    #[test]
    fn test_parse_file_record() {
        assert_eq!(
            Record::parse("C0644 5 a.txt").unwrap(),
            Record::File {
                mode: 0o644,
                size: 5,
                name: "a.txt".into()
            }
        );
        assert_eq!(
            Record::parse("C0600 0 name with spaces").unwrap(),
            Record::File {
                mode: 0o600,
                size: 0,
                name: "name with spaces".into()
            }
        );
    }

    #[test]
    fn test_parse_dir_end_time() {
        assert_eq!(
            Record::parse("D0755 0 data").unwrap(),
            Record::Dir {
                mode: 0o755,
                name: "data".into()
            }
        );
        assert_eq!(Record::parse("E").unwrap(), Record::End);
        assert_eq!(
            Record::parse("T1700000000 0 1700000001 0").unwrap(),
            Record::Time {
                mtime: 1_700_000_000,
                atime: 1_700_000_001
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Record::parse("").is_err());
        assert!(Record::parse("X0644 1 a").is_err());
        assert!(Record::parse("C0644 a.txt").is_err());
        assert!(Record::parse("C0899 1 a.txt").is_err());
        assert!(Record::parse("T1 0 2").is_err());
    }

    #[test]
    fn test_parse_rejects_unsafe_names() {
        for name in ["..", ".", "a/b", ""] {
            let line = format!("C0644 1 {name}");
            assert!(
                matches!(Record::parse(&line), Err(Error::Protocol(_))),
                "{line}"
            );
        }
    }

    #[test]
    fn test_encode() {
        let file = Record::File {
            mode: 0o100644,
            size: 3,
            name: "x".into(),
        };
        assert_eq!(file.encode(), "C0644 3 x\n");
        assert_eq!(
            Record::Dir {
                mode: 0o755,
                name: "d".into()
            }
            .encode(),
            "D0755 0 d\n"
        );
        assert_eq!(Record::End.encode(), "E\n");
        assert_eq!(Record::Time { mtime: 5, atime: 6 }.encode(), "T5 0 6 0\n");
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("/data/file.txt"), "'/data/file.txt'");
        assert_eq!(quote("/it's"), r"'/it'\''s'");
    }

    #[tokio::test]
    async fn test_read_status() {
        let mut ok: &[u8] = &[OK];
        read_status(&mut ok).await.unwrap();

        let mut missing: &[u8] = b"\x01scp: /nope: No such file or directory\n";
        let err = read_status(&mut missing).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let mut denied: &[u8] = b"\x02scp: /root: Permission denied\n";
        let err = read_status(&mut denied).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        let mut closed: &[u8] = b"";
        assert!(matches!(
            read_status(&mut closed).await.unwrap_err(),
            Error::Protocol(_)
        ));
    }
}
