use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::backlog::Backlog;
use crate::call::call::Call;
use crate::call::method_invocation::MethodInvocation;
use crate::call::peer_info::PeerId;
use crate::call::retry_strategy::RetryStrategy;
use crate::util::buf::{try_get_u64_le, try_get_u8};


/// Stores each call in a file of its own: one directory per target peer, and one file per call
///  named `{method id}-{method name}`. The oldest call is found by sorting on the numeric prefix
///  of the file names.
///
/// Files are written to a temporary name, synced and then renamed, so a crash leaves either the
///  complete call or no call at all.
pub struct FileBacklog {
    root: PathBuf,
}

impl FileBacklog {
    const SERVER_DIR: &'static str = "server";
    const CLIENT_DIR_PREFIX: &'static str = "client-";

    pub fn new(root: impl Into<PathBuf>) -> FileBacklog {
        FileBacklog {
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_dir(&self, target: &PeerId) -> PathBuf {
        match target {
            PeerId::Server => self.root.join(Self::SERVER_DIR),
            PeerId::Client(id) => self.root.join(format!("{}{}", Self::CLIENT_DIR_PREFIX, escape_file_name(id))),
        }
    }

    fn file_name(method_id: u64, method_name: &str) -> String {
        format!("{}-{}", method_id, escape_file_name(method_name))
    }

    /// method id, escaped method name and path of all calls for a target, sorted by method id
    async fn list(&self, target: &PeerId) -> anyhow::Result<Vec<(u64, String, PathBuf)>> {
        let dir = self.target_dir(target);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("listing backlog directory {:?}", dir)),
        };

        let mut result = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                warn!("skipping backlog file with non-UTF-8 name in {:?}", dir);
                continue;
            };
            if file_name.starts_with('.') {
                // temporary file of an unfinished write
                continue;
            }

            match file_name.split_once('-')
                .and_then(|(id, name)| id.parse::<u64>().ok().map(|id| (id, name)))
            {
                Some((method_id, name)) => result.push((method_id, name.to_string(), entry.path())),
                None => warn!("skipping backlog file with unexpected name {:?} in {:?}", file_name, dir),
            }
        }

        result.sort_by_key(|(method_id, _, _)| *method_id);
        Ok(result)
    }

    async fn read_call(target: &PeerId, path: &Path) -> anyhow::Result<Call> {
        let data = fs::read(path).await
            .with_context(|| format!("reading backlog file {:?}", path))?;
        try_deser_call(target, &data)
            .with_context(|| format!("parsing backlog file {:?}", path))
    }

    /// The oldest readable call. Files that can not be parsed are left in place and skipped.
    async fn oldest(&self, target: &PeerId) -> anyhow::Result<Option<(Call, PathBuf)>> {
        for (_, _, path) in self.list(target).await? {
            match Self::read_call(target, &path).await {
                Ok(call) => return Ok(Some((call, path))),
                Err(e) if is_not_found(&e) => continue, // removed concurrently
                Err(e) => warn!("skipping corrupt backlog entry: {:#}", e),
            }
        }
        Ok(None)
    }
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.downcast_ref::<std::io::Error>()
        .map(|e| e.kind() == ErrorKind::NotFound)
        .unwrap_or(false)
}

async fn remove_file_if_exists(path: &Path) -> anyhow::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("removing backlog file {:?}", path)),
    }
}

#[async_trait]
impl Backlog for FileBacklog {
    async fn try_peek(&self, target: &PeerId) -> anyhow::Result<Option<Call>> {
        Ok(self.oldest(target).await?
            .map(|(call, _)| call))
    }

    async fn try_dequeue(&self, target: &PeerId) -> anyhow::Result<Option<Call>> {
        let Some((call, path)) = self.oldest(target).await? else {
            return Ok(None);
        };
        remove_file_if_exists(&path).await?;
        Ok(Some(call))
    }

    async fn enqueue(&self, call: &Call) -> anyhow::Result<()> {
        if call.is_retry_latest() {
            self.remove_by_name(call.target(), call.method_name()).await?;
        }

        let dir = self.target_dir(call.target());
        fs::create_dir_all(&dir).await
            .with_context(|| format!("creating backlog directory {:?}", dir))?;

        let file_name = Self::file_name(call.method_id(), call.method_name());
        let tmp_path = dir.join(format!(".{}.tmp", file_name));
        let path = dir.join(&file_name);

        let mut buf = BytesMut::new();
        ser_call(call, &mut buf);

        let mut file = fs::File::create(&tmp_path).await
            .with_context(|| format!("creating backlog file {:?}", tmp_path))?;
        file.write_all(&buf).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &path).await
            .with_context(|| format!("renaming {:?} to {:?}", tmp_path, path))?;
        trace!("persisted call #{} to {:?}", call.method_id(), path);
        Ok(())
    }

    async fn remove(&self, target: &PeerId, method_id: u64) -> anyhow::Result<bool> {
        let mut removed = false;
        for (id, _, path) in self.list(target).await? {
            if id == method_id {
                removed |= remove_file_if_exists(&path).await?;
            }
        }
        Ok(removed)
    }

    async fn remove_by_name(&self, target: &PeerId, method_name: &str) -> anyhow::Result<usize> {
        let escaped = escape_file_name(method_name);

        let mut num_removed = 0;
        for (_, name, path) in self.list(target).await? {
            if name == escaped && remove_file_if_exists(&path).await? {
                num_removed += 1;
            }
        }
        if num_removed > 0 {
            debug!("removed {} backlog entries for {:?} to {:?}", num_removed, method_name, target);
        }
        Ok(num_removed)
    }

    async fn read_all(&self, target: &PeerId) -> anyhow::Result<Vec<Call>> {
        let mut result = Vec::new();
        for (_, _, path) in self.list(target).await? {
            match Self::read_call(target, &path).await {
                Ok(call) => result.push(call),
                Err(e) if is_not_found(&e) => {}
                Err(e) => warn!("skipping corrupt backlog entry: {:#}", e),
            }
        }
        Ok(result)
    }
}


/// Maps arbitrary text to a string that is safe as a (part of a) file name on all relevant
///  platforms: ASCII letters, digits, '_' and '-' are kept, everything else is percent-encoded
///  byte by byte.
fn escape_file_name(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            result.push(b as char);
        }
        else {
            result.push_str(&format!("%{:02X}", b));
        }
    }
    result
}

const NO_TIMEOUT: u8 = 0;
const WITH_TIMEOUT: u8 = 1;

/// `strategy:u8 has_timeout:u8 [timeout_millis:u64] method_frame`
///
/// Timeouts beyond `u64::MAX` millis are stored as `u64::MAX`, which never expires either.
fn ser_call(call: &Call, buf: &mut BytesMut) {
    buf.put_u8(RetryStrategy::tag(call.retry_strategy()));
    match call.timeout() {
        Some(timeout) => {
            buf.put_u8(WITH_TIMEOUT);
            buf.put_u64_le(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        }
        None => buf.put_u8(NO_TIMEOUT),
    }
    call.invocation().ser(buf);
}

fn try_deser_call(target: &PeerId, mut buf: &[u8]) -> anyhow::Result<Call> {
    let buf = &mut buf;
    let retry_strategy = RetryStrategy::try_from_tag(try_get_u8(buf, "retry strategy")?)?;
    let timeout = match try_get_u8(buf, "timeout flag")? {
        NO_TIMEOUT => None,
        WITH_TIMEOUT => Some(Duration::from_millis(try_get_u64_le(buf, "timeout")?)),
        flag => return Err(anyhow!("invalid timeout flag {}", flag)),
    };
    let invocation = MethodInvocation::try_deser(buf)?;

    let mut call = Call::new(target.clone(), invocation);
    if let Some(retry_strategy) = retry_strategy {
        call = call.with_retry_strategy(retry_strategy);
    }
    if let Some(timeout) = timeout {
        call = call.with_timeout(timeout);
    }
    Ok(call)
}
