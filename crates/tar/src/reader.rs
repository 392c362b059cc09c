//! Sequential tar reader over a non-seekable stream
//!
//! Headers are decoded with the `tar` crate; the stream itself is consumed
//! block by block so an archive held by any backend can be walked without
//! buffering it. GNU long names and PAX `path`/`size` records are applied to
//! the entry that follows them.

use tokio::io::{AsyncRead, AsyncReadExt, Take};

use afs_core::{Error, FileInfo, Result, url};

pub(crate) const BLOCK: u64 = 512;

/// Largest GNU long name or PAX record block held in memory
pub(crate) const MAX_EXTENDED: u64 = 1 << 20;

/// Bytes needed to pad `size` to a whole block
pub(crate) fn padding(size: u64) -> u64 {
    (BLOCK - size % BLOCK) % BLOCK
}

/// Normalize an archive member path: no leading `./` or `/`, no trailing `/`
pub(crate) fn normalize(path: &str) -> String {
    let cleaned = url::clean(&format!("/{path}"));
    cleaned.trim_start_matches('/').to_string()
}

/// One archive member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Normalized member path
    pub path: String,
    pub info: FileInfo,
}

impl Entry {
    /// Parent directory relative to `prefix`, if the entry lies at or under it.
    ///
    /// The entry naming `prefix` itself is the walk root and gets `""`.
    pub fn locate(&self, prefix: &str) -> Option<String> {
        // `./` members name the archive root itself
        if self.path.is_empty() {
            return None;
        }
        let rest = if prefix.is_empty() {
            self.path.as_str()
        } else if self.path == prefix {
            return Some(String::new());
        } else {
            self.path.strip_prefix(prefix)?.strip_prefix('/')?
        };
        let (parent, _) = url::split_path(rest);
        Some(parent.to_string())
    }
}

/// Extended attributes carried over to the next entry
#[derive(Debug, Default)]
struct Pending {
    path: Option<String>,
    size: Option<u64>,
}

pub struct ArchiveReader<R> {
    inner: R,
    /// Content bytes of the current entry not yet handed out
    unread: u64,
    /// Padding after the current entry's content
    padding: u64,
}

impl<R: AsyncRead + Unpin + Send> ArchiveReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            unread: 0,
            padding: 0,
        }
    }

    /// Advance to the next member, skipping whatever the previous one left
    pub async fn next_entry(&mut self) -> Result<Option<Entry>> {
        let leftover = self.unread + self.padding;
        self.skip(leftover).await?;
        self.unread = 0;
        self.padding = 0;

        let mut pending = Pending::default();
        loop {
            let Some(block) = self.read_block().await? else {
                return Ok(None);
            };
            if block.iter().all(|b| *b == 0) {
                return Ok(None);
            }
            let header = tar::Header::from_byte_slice(&block);
            verify_checksum(header, &block)?;
            let size = header.entry_size().map_err(archive_error)?;
            let kind = header.entry_type();

            match kind {
                tar::EntryType::GNULongName => {
                    let data = self.read_data(size).await?;
                    let name = String::from_utf8_lossy(&data);
                    pending.path = Some(name.trim_end_matches('\0').to_string());
                }
                tar::EntryType::XHeader => {
                    let data = self.read_data(size).await?;
                    apply_pax(&data, &mut pending)?;
                }
                tar::EntryType::XGlobalHeader | tar::EntryType::GNULongLink => {
                    self.read_data(size).await?;
                }
                _ => {
                    let raw = match pending.path.take() {
                        Some(path) => path,
                        None => String::from_utf8_lossy(&header.path_bytes()).into_owned(),
                    };
                    let size = pending.size.take().unwrap_or(size);
                    let is_dir = kind.is_dir() || raw.ends_with('/');
                    let path = normalize(&raw);
                    let (_, name) = url::split_path(&path);
                    let mode = header.mode().map_err(archive_error)?;
                    let mut info = if is_dir {
                        FileInfo::dir(name, mode)
                    } else {
                        FileInfo::file(name, size, mode)
                    };
                    if let Some(ts) = header
                        .mtime()
                        .ok()
                        .and_then(|s| i64::try_from(s).ok())
                        .and_then(|s| jiff::Timestamp::from_second(s).ok())
                    {
                        info = info.with_mod_time(ts);
                    }
                    // directories carry no content; skip whatever they declare
                    (self.unread, self.padding) = if is_dir {
                        (0, size + padding(size))
                    } else {
                        (size, padding(size))
                    };
                    return Ok(Some(Entry { path, info }));
                }
            }
        }
    }

    /// Content of the current member; the caller consumes what it needs
    /// and the rest is skipped by the next call to [`next_entry`].
    ///
    /// [`next_entry`]: ArchiveReader::next_entry
    pub fn content(&mut self) -> Take<&mut R> {
        let size = std::mem::take(&mut self.unread);
        (&mut self.inner).take(size)
    }

    async fn read_block(&mut self) -> Result<Option<[u8; BLOCK as usize]>> {
        let mut block = [0u8; BLOCK as usize];
        let mut filled = 0;
        while filled < block.len() {
            let n = self.inner.read(&mut block[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        match filled {
            0 => Ok(None),
            n if n == block.len() => Ok(Some(block)),
            n => Err(Error::Archive(format!("truncated header ({n} of {BLOCK} bytes)"))),
        }
    }

    async fn read_data(&mut self, size: u64) -> Result<Vec<u8>> {
        if size > MAX_EXTENDED {
            return Err(Error::Archive(format!(
                "extended header of {size} bytes exceeds {MAX_EXTENDED}"
            )));
        }
        let mut data = Vec::with_capacity(size.min(1 << 16) as usize);
        (&mut self.inner).take(size).read_to_end(&mut data).await?;
        if (data.len() as u64) < size {
            return Err(Error::Archive("truncated extended header".into()));
        }
        self.skip(padding(size)).await?;
        Ok(data)
    }

    async fn skip(&mut self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let skipped = tokio::io::copy(&mut (&mut self.inner).take(n), &mut tokio::io::sink()).await?;
        if skipped < n {
            return Err(Error::Archive("archive ended inside an entry".into()));
        }
        Ok(())
    }
}

fn archive_error(err: std::io::Error) -> Error {
    Error::Archive(err.to_string())
}

fn verify_checksum(header: &tar::Header, block: &[u8]) -> Result<()> {
    let expected = header.cksum().map_err(archive_error)?;
    let actual: u32 = block
        .iter()
        .enumerate()
        .map(|(i, b)| if (148..156).contains(&i) { u32::from(b' ') } else { u32::from(*b) })
        .sum();
    if expected != actual {
        return Err(Error::Archive(format!(
            "header checksum mismatch: recorded {expected}, computed {actual}"
        )));
    }
    Ok(())
}

/// Apply PAX records (`<len> <key>=<value>\n`)
fn apply_pax(data: &[u8], pending: &mut Pending) -> Result<()> {
    let mut rest = data;
    while !rest.is_empty() {
        let space = rest
            .iter()
            .position(|b| *b == b' ')
            .ok_or_else(|| Error::Archive("malformed PAX record".into()))?;
        let len: usize = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|len| *len > space && *len <= rest.len())
            .ok_or_else(|| Error::Archive("malformed PAX record length".into()))?;
        let record = &rest[space + 1..len];
        let record = record.strip_suffix(b"\n").unwrap_or(record);
        if let Some(eq) = record.iter().position(|b| *b == b'=') {
            let value = String::from_utf8_lossy(&record[eq + 1..]).into_owned();
            match &record[..eq] {
                b"path" => pending.path = Some(value),
                b"size" => {
                    pending.size = Some(
                        value
                            .parse()
                            .map_err(|_| Error::Archive(format!("invalid PAX size '{value}'")))?,
                    )
                }
                _ => {}
            }
        }
        rest = &rest[len..];
    }
    Ok(())
}
