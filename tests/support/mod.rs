#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::{Future, ready};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use camino::Utf8PathBuf;
use futures::StreamExt;
use futures::stream;

use image_harvest::domain::{VariantKind, WorkItem};
use image_harvest::error::FetchError;
use image_harvest::http::{FetchResponse, Fetcher};
use image_harvest::worker::RetryPolicy;

#[derive(Debug, Clone)]
pub enum Reply {
    Ok {
        content_type: Option<&'static str>,
        body: Vec<u8>,
    },
    Status(u16),
    TooMany {
        retry_after: Option<&'static str>,
    },
    Connect,
    DropMidStream {
        head: Vec<u8>,
    },
}

impl Reply {
    pub fn jpeg(body: &[u8]) -> Self {
        Reply::Ok {
            content_type: Some("image/jpeg"),
            body: body.to_vec(),
        }
    }

    fn into_response(self) -> Result<FetchResponse, FetchError> {
        match self {
            Reply::Ok { content_type, body } => {
                let half = body.len() / 2;
                let chunks = vec![
                    Ok(Bytes::copy_from_slice(&body[..half])),
                    Ok(Bytes::copy_from_slice(&body[half..])),
                ];
                Ok(response(200, content_type, None, chunks))
            }
            Reply::Status(status) => Ok(response(status, Some("text/html"), None, Vec::new())),
            Reply::TooMany { retry_after } => Ok(response(429, None, retry_after, Vec::new())),
            Reply::Connect => Err(FetchError::Connection),
            Reply::DropMidStream { head } => Ok(response(
                200,
                Some("image/jpeg"),
                None,
                // What reqwest reports for a body cut short of its Content-Length.
                vec![Ok(Bytes::from(head)), Err(FetchError::Client("decode".to_string()))],
            )),
        }
    }
}

fn response(
    status: u16,
    content_type: Option<&str>,
    retry_after: Option<&str>,
    chunks: Vec<Result<Bytes, FetchError>>,
) -> FetchResponse {
    FetchResponse {
        status,
        content_type: content_type.map(str::to_string),
        retry_after: retry_after.map(str::to_string),
        body: stream::iter(chunks).boxed(),
    }
}

/// Answers each URL from its own script. The last reply of a script repeats
/// forever; unscripted URLs get the default reply.
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    default: Reply,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new(default: Reply) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, url: &str, replies: impl IntoIterator<Item = Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into_iter().collect());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_reply(&self, url: &str) -> Reply {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| self.default.clone()),
            None => self.default.clone(),
        }
    }
}

impl Fetcher for ScriptedFetcher {
    fn get(&self, url: &str) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send {
        self.calls.lock().unwrap().push(url.to_string());
        ready(self.next_reply(url).into_response())
    }
}

pub fn item(item_id: i64, url: Option<&str>, origin_url: Option<&str>) -> WorkItem {
    WorkItem {
        item_id,
        parent_id: format!("img-{item_id}"),
        variant_kind: VariantKind::Preview,
        primary_url: url.map(str::to_string),
        fallback_url: origin_url.map(str::to_string),
        width: Some(800),
        height: Some(600),
    }
}

pub fn instant_policy() -> RetryPolicy {
    RetryPolicy {
        retries: 3,
        backoff: Duration::ZERO,
        default_retry_after: Duration::ZERO,
        pacing: Duration::ZERO,
    }
}

pub fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("images")).unwrap();
    std::fs::create_dir_all(root.as_std_path()).unwrap();
    (temp, root)
}

pub fn files_in(root: &Utf8PathBuf) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(root.as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
