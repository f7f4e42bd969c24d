//! Durable proxy file.
//!
//! The file is a plain comma-delimited table with one proxy per row:
//! `host,port[,extra columns...]`. No header is required, blank lines and
//! `#` comments are ignored, and any row whose first two columns do not form
//! an IP/port pair is skipped. Every write goes to a temporary file in the
//! same directory which is then renamed over the original, so readers never
//! observe a half-written table.

use crate::error::StoreError;
use crate::proxy::parse_endpoint;

use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

const BOM: char = '\u{feff}';

/// One write lock per file, shared by every `ProxyStore` in the process.
static WRITE_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(Default::default);

fn write_lock_for(path: &Path) -> Arc<Mutex<()>> {
    let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    Arc::clone(WRITE_LOCKS.lock().entry(key).or_default())
}

/// Result of parsing the durable file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreContents {
    /// Distinct proxies in file order.
    pub proxies: Vec<SocketAddr>,
    /// Rows that could not be parsed.
    pub malformed: usize,
    /// Rows repeating an earlier proxy.
    pub duplicates: usize,
}

/// Handle to the durable proxy file.
///
/// Handles opened on the same path share one write lock, so the pool and the
/// validator can write the same file concurrently.
#[derive(Debug)]
pub struct ProxyStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl ProxyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let write_lock = write_lock_for(&path);
        Self { path, write_lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and parse the file.
    pub fn read(&self) -> Result<StoreContents, StoreError> {
        let content = fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(parse_rows(&content))
    }

    /// Atomically replace the whole file with the given rows.
    pub fn replace<I, S>(&self, rows: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut content = String::new();
        for row in rows {
            content.push_str(row.as_ref());
            content.push('\n');
        }

        let _guard = self.write_lock.lock();
        self.write_atomic(&content)
    }

    /// Remove every row naming `addr`. Returns whether a row was removed.
    ///
    /// A missing file has nothing to remove and is not an error.
    pub fn remove(&self, addr: SocketAddr) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let content = content.strip_prefix(BOM).unwrap_or(&content);
        let mut removed = 0;
        let mut kept = String::with_capacity(content.len());
        for line in content.lines() {
            if parse_line(line.trim()) == Some(addr) {
                removed += 1;
                continue;
            }
            kept.push_str(line);
            kept.push('\n');
        }

        if removed == 0 {
            return Ok(false);
        }

        self.write_atomic(&kept)?;
        debug!("Removed {} row(s) for {} from {}", removed, addr, self.path.display());
        Ok(true)
    }

    fn write_atomic(&self, content: &str) -> Result<(), StoreError> {
        let write_error = |source: io::Error| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "proxies".to_string());

        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(write_error)?;
        temp.write_all(content.as_bytes()).map_err(write_error)?;
        temp.as_file().sync_all().map_err(write_error)?;
        temp.persist(&self.path).map_err(|e| write_error(e.error))?;
        Ok(())
    }
}

/// Format one row of the durable file.
pub fn format_row(addr: SocketAddr, extra: &[String]) -> String {
    let mut row = format!("{},{}", addr.ip(), addr.port());
    for column in extra {
        row.push(',');
        row.push_str(column);
    }
    row
}

/// Parse the first two columns of one row.
fn parse_line(line: &str) -> Option<SocketAddr> {
    let mut columns = line.split(',');
    let host = columns.next()?;
    let port = columns.next()?;
    parse_endpoint(host, port)
}

fn is_ignorable(line: &str) -> bool {
    line.is_empty() || line.starts_with('#')
}

/// Parse the whole table, deduplicating by endpoint.
pub fn parse_rows(content: &str) -> StoreContents {
    let content = content.strip_prefix(BOM).unwrap_or(content);
    let mut contents = StoreContents::default();
    let mut seen = HashSet::new();

    for line in content.lines() {
        let line = line.trim();
        if is_ignorable(line) {
            continue;
        }
        match parse_line(line) {
            Some(addr) if seen.insert(addr) => contents.proxies.push(addr),
            Some(_) => contents.duplicates += 1,
            None => {
                debug!("Skipping malformed proxy row: {}", line);
                contents.malformed += 1;
            }
        }
    }

    contents
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn parse_rows_tolerates_headers_blanks_and_duplicates() {
        let table = "\u{feff}ip,port,country\n\
                     203.0.113.1,1080,NL\n\
                     \n\
                     # comment\n\
                     203.0.113.2, 4145\n\
                     203.0.113.1,1080,DE\n\
                     bogus\n\
                     2001:db8::5,9050\n";

        let contents = parse_rows(table);

        assert_eq!(
            contents.proxies,
            vec![
                addr("203.0.113.1:1080"),
                addr("203.0.113.2:4145"),
                addr("[2001:db8::5]:9050"),
            ]
        );
        assert_eq!(contents.malformed, 2);
        assert_eq!(contents.duplicates, 1);
    }

    #[test]
    fn replace_writes_rows_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let store = ProxyStore::new(dir.path().join("proxies.csv"));

        store
            .replace([
                format_row(addr("203.0.113.1:1080"), &["120".to_string()]),
                format_row(addr("[2001:db8::5]:9050"), &[]),
            ])
            .unwrap();

        let written = fs::read_to_string(store.path()).unwrap();
        assert_eq!(written, "203.0.113.1,1080,120\n2001:db8::5,9050\n");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        assert_eq!(store.read().unwrap().proxies.len(), 2);
    }

    #[test]
    fn remove_drops_only_matching_rows() {
        let dir = TempDir::new().unwrap();
        let store = ProxyStore::new(dir.path().join("proxies.csv"));
        fs::write(
            store.path(),
            "ip,port\n203.0.113.1,1080,NL\n203.0.113.2,1080\n203.0.113.1,1080\n",
        )
        .unwrap();

        assert!(store.remove(addr("203.0.113.1:1080")).unwrap());
        assert!(!store.remove(addr("203.0.113.1:1080")).unwrap());

        let written = fs::read_to_string(store.path()).unwrap();
        assert_eq!(written, "ip,port\n203.0.113.2,1080\n");
    }

    #[test]
    fn remove_matches_the_first_row_after_a_bom() {
        let dir = TempDir::new().unwrap();
        let store = ProxyStore::new(dir.path().join("proxies.csv"));
        fs::write(store.path(), "\u{feff}203.0.113.1,1080\n203.0.113.2,1080\n").unwrap();

        assert!(store.remove(addr("203.0.113.1:1080")).unwrap());

        assert_eq!(store.read().unwrap().proxies, vec![addr("203.0.113.2:1080")]);
    }

    #[test]
    fn handles_on_one_path_share_a_write_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proxies.csv");
        let pool_side = ProxyStore::new(&path);
        let validator_side = ProxyStore::new(&path);
        assert!(Arc::ptr_eq(&pool_side.write_lock, &validator_side.write_lock));

        for _ in 0..100 {
            fs::write(&path, "203.0.113.1,1080\n203.0.113.2,1080\n").unwrap();
            std::thread::scope(|s| {
                s.spawn(|| pool_side.remove(addr("203.0.113.1:1080")).unwrap());
                s.spawn(|| validator_side.replace(["198.51.100.9,1080"]).unwrap());
            });

            assert_eq!(fs::read_to_string(&path).unwrap(), "198.51.100.9,1080\n");
        }
    }

    #[test]
    fn remove_on_missing_file_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let store = ProxyStore::new(dir.path().join("missing.csv"));

        assert!(!store.remove(addr("203.0.113.1:1080")).unwrap());
        assert!(!store.exists());
    }

    #[test]
    fn read_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = ProxyStore::new(dir.path().join("missing.csv"));

        assert!(matches!(store.read(), Err(StoreError::Read { .. })));
    }
}
