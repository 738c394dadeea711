//! Resumable upload sessions for mail attachments and drive items.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

use super::http::parse_retry_after;
use super::{GraphClient, GraphRequest};
use crate::error::GraphError;
use crate::util::CallContext;

/// Chunk sizes must be a multiple of this.
pub const CHUNK_UNIT: usize = 320 * 1024;
pub const DEFAULT_CHUNK_SIZE: usize = 15 * CHUNK_UNIT;
/// Largest chunk an Outlook attachment session accepts (4 MB), rounded down
/// to whole units.
pub const MAIL_MAX_CHUNK_SIZE: usize = 12 * CHUNK_UNIT;
/// Largest chunk a drive upload session accepts.
pub const DRIVE_MAX_CHUNK_SIZE: usize = 192 * CHUNK_UNIT;
/// Mail attachments at or above this size go through an upload session.
pub const MAIL_ATTACHMENT_THRESHOLD: usize = 3 * 1024 * 1024;
/// Drive items at or above this size go through an upload session.
pub const DRIVE_ITEM_THRESHOLD: usize = 4 * 1024 * 1024;

/// Addresses a drive item by path below the drive root or by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveItemRef {
    Path(String),
    Id(String),
}

impl DriveItemRef {
    fn item_path(&self) -> String {
        match self {
            Self::Path(path) => format!("/me/drive/root:/{}:", path.trim_matches('/')),
            Self::Id(id) => format!("/me/drive/items/{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ConflictBehavior {
    #[default]
    Replace,
    Rename,
    Fail,
}

/// Where uploaded bytes end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    MailAttachment {
        message_id: String,
        name: String,
        content_type: String,
    },
    DriveItem {
        item: DriveItemRef,
        conflict_behavior: ConflictBehavior,
    },
}

impl UploadTarget {
    pub fn threshold(&self) -> usize {
        match self {
            Self::MailAttachment { .. } => MAIL_ATTACHMENT_THRESHOLD,
            Self::DriveItem { .. } => DRIVE_ITEM_THRESHOLD,
        }
    }

    /// Upper bound on one session chunk for this target.
    pub fn max_chunk_size(&self) -> usize {
        match self {
            Self::MailAttachment { .. } => MAIL_MAX_CHUNK_SIZE,
            Self::DriveItem { .. } => DRIVE_MAX_CHUNK_SIZE,
        }
    }

    /// Whether a payload of `len` bytes needs an upload session.
    pub fn uses_session(&self, len: usize) -> bool {
        len >= self.threshold()
    }

    fn session_request(&self, total_size: u64) -> (String, Value) {
        match self {
            Self::MailAttachment {
                message_id,
                name,
                content_type,
            } => (
                format!("/me/messages/{message_id}/attachments/createUploadSession"),
                json!({
                    "AttachmentItem": {
                        "attachmentType": "file",
                        "name": name,
                        "size": total_size,
                        "contentType": content_type,
                    }
                }),
            ),
            Self::DriveItem {
                item,
                conflict_behavior,
            } => (
                format!("{}/createUploadSession", item.item_path()),
                json!({
                    "item": {
                        "@microsoft.graph.conflictBehavior": conflict_behavior.to_string(),
                    }
                }),
            ),
        }
    }
}

/// An open upload session.
///
/// The expected offset only moves forward, and only after the server has
/// acknowledged the chunk that ends just before it.
#[derive(Debug)]
pub struct UploadSession {
    http: reqwest::Client,
    url: String,
    expires_at: Option<DateTime<Utc>>,
    next_offset: u64,
    total_size: u64,
}

impl UploadSession {
    pub fn session_url(&self) -> &str {
        &self.url
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn next_expected_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn remaining(&self) -> u64 {
        self.total_size - self.next_offset
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn expired(&self) -> GraphError {
        GraphError::SessionExpired {
            session_url: self.url.clone(),
        }
    }

    /// Cancel the session on the server. An already-gone session counts
    /// as cancelled.
    pub async fn abandon(self) -> Result<(), GraphError> {
        let response = self.http.delete(&self.url).send().await?;
        let status = response.status();
        if status.is_success() || matches!(status.as_u16(), 404 | 410) {
            debug!(session_url = %self.url, "upload session abandoned");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(GraphError::permanent(status.as_u16(), &body))
    }
}

/// Offset reached after an accepted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    pub next_expected_offset: u64,
    pub total_size: u64,
}

/// The finished upload. Drive uploads return item metadata; mail
/// attachment sessions return a `Location` header instead.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedItem {
    pub metadata: Option<Value>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Progress(SessionProgress),
    Complete(UploadedItem),
}

/// Session creation reply and chunk acknowledgement. Outlook sessions may
/// answer in PascalCase.
#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(rename = "uploadUrl", alias = "UploadUrl")]
    upload_url: Option<String>,
    #[serde(rename = "expirationDateTime", alias = "ExpirationDateTime")]
    expiration_date_time: Option<DateTime<Utc>>,
    #[serde(
        default,
        rename = "nextExpectedRanges",
        alias = "NextExpectedRanges"
    )]
    next_expected_ranges: Vec<String>,
}

/// Server reply to one chunk, before offset validation.
enum ChunkReply {
    Accepted {
        next_start: Option<u64>,
        expires_at: Option<DateTime<Utc>>,
    },
    Finished(UploadedItem),
}

/// Chooses between single-request and session uploads and drives sessions
/// chunk by chunk.
///
/// # Example
/// ```no_run
/// use graphkit::graph::{ConflictBehavior, DriveItemRef, GraphClient, UploadEngine, UploadTarget};
///
/// # async fn run(client: GraphClient, bytes: Vec<u8>) -> Result<(), graphkit::error::GraphError> {
/// let engine = UploadEngine::new(client);
/// let target = UploadTarget::DriveItem {
///     item: DriveItemRef::Path("Reports/q3.pdf".to_string()),
///     conflict_behavior: ConflictBehavior::Replace,
/// };
/// let uploaded = engine.upload(&target, &bytes, "oid.tid").await?;
/// println!("{:?}", uploaded.metadata);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct UploadEngine {
    client: GraphClient,
    chunk_size: usize,
}

impl UploadEngine {
    pub fn new(client: GraphClient) -> Self {
        Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Use `chunk_size` bytes per chunk. Must be a positive multiple of
    /// [`CHUNK_UNIT`].
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self, GraphError> {
        if chunk_size == 0 || chunk_size % CHUNK_UNIT != 0 {
            return Err(GraphError::InvalidArgument(format!(
                "chunk size {chunk_size} is not a multiple of {CHUNK_UNIT}"
            )));
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub async fn upload(
        &self,
        target: &UploadTarget,
        bytes: &[u8],
        account_id: &str,
    ) -> Result<UploadedItem, GraphError> {
        self.upload_with(target, bytes, account_id, &CallContext::default())
            .await
    }

    /// Upload `bytes` to `target`, through a session when the payload
    /// reaches the target's threshold. Chunks never exceed
    /// [`UploadTarget::max_chunk_size`].
    ///
    /// A session that fails for any reason other than expiry is abandoned
    /// before the error is returned.
    pub async fn upload_with(
        &self,
        target: &UploadTarget,
        bytes: &[u8],
        account_id: &str,
        ctx: &CallContext,
    ) -> Result<UploadedItem, GraphError> {
        if !target.uses_session(bytes.len()) {
            return self.upload_small(target, bytes, account_id, ctx).await;
        }

        let chunk_size = self.chunk_size.min(target.max_chunk_size());
        let mut session = self
            .create_session_with(target, bytes.len() as u64, account_id, ctx)
            .await?;
        for chunk in bytes.chunks(chunk_size) {
            let outcome = self.upload_chunk_with(&mut session, chunk, ctx).await;
            match outcome {
                Ok(ChunkOutcome::Progress(progress)) => {
                    debug!(
                        offset = progress.next_expected_offset,
                        total = progress.total_size,
                        "chunk accepted"
                    );
                }
                Ok(ChunkOutcome::Complete(item)) => {
                    info!(account_id, bytes = bytes.len(), "upload complete");
                    return Ok(item);
                }
                Err(err @ GraphError::SessionExpired { .. }) => return Err(err),
                Err(err) => {
                    let url = session.session_url().to_string();
                    if let Err(abandon_err) = session.abandon().await {
                        warn!(session_url = %url, error = %abandon_err, "failed to abandon upload session");
                    }
                    return Err(err);
                }
            }
        }
        Err(GraphError::ProtocolViolation(
            "upload session did not complete after the final chunk".to_string(),
        ))
    }

    async fn upload_small(
        &self,
        target: &UploadTarget,
        bytes: &[u8],
        account_id: &str,
        ctx: &CallContext,
    ) -> Result<UploadedItem, GraphError> {
        let request = match target {
            UploadTarget::MailAttachment {
                message_id,
                name,
                content_type,
            } => GraphRequest::builder()
                .method(Method::POST)
                .path(format!("/me/messages/{message_id}/attachments"))
                .json(json!({
                    "@odata.type": "#microsoft.graph.fileAttachment",
                    "name": name,
                    "contentType": content_type,
                    "contentBytes": STANDARD.encode(bytes),
                }))
                .build(),
            UploadTarget::DriveItem {
                item,
                conflict_behavior,
            } => GraphRequest::builder()
                .method(Method::PUT)
                .path(format!("{}/content", item.item_path()))
                .query(vec![(
                    "@microsoft.graph.conflictBehavior".to_string(),
                    conflict_behavior.to_string(),
                )])
                .body(bytes.to_vec())
                .content_type("application/octet-stream")
                .build(),
        };
        let response = self.client.execute_with(account_id, &request, ctx).await?;
        Ok(UploadedItem {
            metadata: response.into_json(),
            location: None,
        })
    }

    pub async fn create_session(
        &self,
        target: &UploadTarget,
        total_size: u64,
        account_id: &str,
    ) -> Result<UploadSession, GraphError> {
        self.create_session_with(target, total_size, account_id, &CallContext::default())
            .await
    }

    pub async fn create_session_with(
        &self,
        target: &UploadTarget,
        total_size: u64,
        account_id: &str,
        ctx: &CallContext,
    ) -> Result<UploadSession, GraphError> {
        if total_size == 0 {
            return Err(GraphError::InvalidArgument(
                "upload sessions need a non-empty payload".to_string(),
            ));
        }
        let (path, body) = target.session_request(total_size);
        let request = GraphRequest::builder()
            .method(Method::POST)
            .path(path)
            .json(body)
            .build();
        let value = self
            .client
            .execute_with(account_id, &request, ctx)
            .await?
            .require_json()?;
        let response: SessionResponse = serde_json::from_value(value).map_err(|e| {
            GraphError::ProtocolViolation(format!("malformed upload session: {e}"))
        })?;
        let url = response.upload_url.ok_or_else(|| {
            GraphError::ProtocolViolation("upload session has no uploadUrl".to_string())
        })?;
        if let Some(start) = first_range_start(&response.next_expected_ranges)? {
            if start != 0 {
                return Err(GraphError::ProtocolViolation(format!(
                    "new upload session expects offset {start}, not 0"
                )));
            }
        }
        debug!(total_size, expires_at = ?response.expiration_date_time, "upload session created");
        Ok(UploadSession {
            http: self.client.http().clone(),
            url,
            expires_at: response.expiration_date_time,
            next_offset: 0,
            total_size,
        })
    }

    pub async fn upload_chunk(
        &self,
        session: &mut UploadSession,
        chunk: &[u8],
    ) -> Result<ChunkOutcome, GraphError> {
        self.upload_chunk_with(session, chunk, &CallContext::default())
            .await
    }

    /// Send the next chunk of the payload, starting at the session's
    /// expected offset. Transient failures resend the identical range.
    pub async fn upload_chunk_with(
        &self,
        session: &mut UploadSession,
        chunk: &[u8],
        ctx: &CallContext,
    ) -> Result<ChunkOutcome, GraphError> {
        let len = chunk.len() as u64;
        if len == 0 || len > session.remaining() {
            return Err(GraphError::InvalidArgument(format!(
                "chunk of {len} bytes does not fit the {} bytes remaining",
                session.remaining()
            )));
        }
        let is_last = len == session.remaining();
        if !is_last && chunk.len() % CHUNK_UNIT != 0 {
            return Err(GraphError::InvalidArgument(format!(
                "non-final chunk of {len} bytes is not a multiple of {CHUNK_UNIT}"
            )));
        }

        let start = session.next_offset;
        let end = start + len - 1;
        let current: &UploadSession = session;
        let reply = self
            .client
            .retry_policy()
            .execute(ctx, move || async move {
                if current.is_expired(Utc::now()) {
                    return Err(current.expired());
                }
                put_chunk(current, start, end, chunk).await
            })
            .await?;

        match reply {
            ChunkReply::Accepted {
                next_start,
                expires_at,
            } => {
                let expected = end + 1;
                if next_start != Some(expected) {
                    return Err(GraphError::ProtocolViolation(format!(
                        "server expects offset {next_start:?} after bytes {start}-{end}, not {expected}"
                    )));
                }
                if is_last {
                    return Err(GraphError::ProtocolViolation(
                        "final chunk accepted without completing the upload".to_string(),
                    ));
                }
                session.next_offset = expected;
                if expires_at.is_some() {
                    session.expires_at = expires_at;
                }
                Ok(ChunkOutcome::Progress(SessionProgress {
                    next_expected_offset: expected,
                    total_size: session.total_size,
                }))
            }
            ChunkReply::Finished(item) => {
                if !is_last {
                    return Err(GraphError::ProtocolViolation(format!(
                        "upload completed early after bytes {start}-{end} of {}",
                        session.total_size
                    )));
                }
                session.next_offset = session.total_size;
                Ok(ChunkOutcome::Complete(item))
            }
        }
    }
}

/// One PUT of bytes `start..=end`. Session URLs carry their own
/// authorization, so no bearer token is sent.
async fn put_chunk(
    session: &UploadSession,
    start: u64,
    end: u64,
    chunk: &[u8],
) -> Result<ChunkReply, GraphError> {
    debug!(offset = start, end, total = session.total_size, "uploading chunk");
    let response = session
        .http
        .put(&session.url)
        .header(
            CONTENT_RANGE,
            format!("bytes {start}-{end}/{}", session.total_size),
        )
        .header(CONTENT_LENGTH, chunk.len())
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(chunk.to_vec())
        .send()
        .await?;
    let status = response.status();
    let headers = response.headers().clone();
    let location = headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.bytes().await?;

    match status {
        // Drive sessions acknowledge with 202, Outlook attachment sessions
        // with 200. Either way the body names the next expected range.
        s if s.is_success() => {
            let metadata: Option<Value> = if body.iter().all(u8::is_ascii_whitespace) {
                None
            } else {
                Some(serde_json::from_slice(&body).map_err(|e| {
                    GraphError::ProtocolViolation(format!("chunk reply is not JSON: {e}"))
                })?)
            };
            let ack = metadata
                .as_ref()
                .and_then(|value| SessionResponse::deserialize(value).ok())
                .filter(|ack| s == StatusCode::ACCEPTED || !ack.next_expected_ranges.is_empty());
            match ack {
                Some(ack) => Ok(ChunkReply::Accepted {
                    next_start: first_range_start(&ack.next_expected_ranges)?,
                    expires_at: ack.expiration_date_time,
                }),
                None if s == StatusCode::ACCEPTED => Err(GraphError::ProtocolViolation(
                    "malformed chunk acknowledgement".to_string(),
                )),
                None => Ok(ChunkReply::Finished(UploadedItem { metadata, location })),
            }
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(session.expired()),
        s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
            Err(GraphError::TransientService {
                status: Some(s.as_u16()),
                message: String::from_utf8_lossy(&body).into_owned(),
                retry_after_ms: parse_retry_after(&headers).map(|d| d.as_millis() as u64),
            })
        }
        s => Err(GraphError::permanent(
            s.as_u16(),
            &String::from_utf8_lossy(&body),
        )),
    }
}

/// Start offset of the first `nextExpectedRanges` entry (`"start-"` or
/// `"start-end"`).
fn first_range_start(ranges: &[String]) -> Result<Option<u64>, GraphError> {
    let Some(first) = ranges.first() else {
        return Ok(None);
    };
    let start = first.split('-').next().unwrap_or_default().trim();
    start
        .parse::<u64>()
        .map(Some)
        .map_err(|_| GraphError::ProtocolViolation(format!("unparseable range {first:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive_target() -> UploadTarget {
        UploadTarget::DriveItem {
            item: DriveItemRef::Path("/docs/report.pdf".to_string()),
            conflict_behavior: ConflictBehavior::Rename,
        }
    }

    fn mail_target() -> UploadTarget {
        UploadTarget::MailAttachment {
            message_id: "m1".to_string(),
            name: "big.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        let mail = mail_target();
        assert!(!mail.uses_session(MAIL_ATTACHMENT_THRESHOLD - 1));
        assert!(mail.uses_session(MAIL_ATTACHMENT_THRESHOLD));
        assert!(mail.uses_session(MAIL_ATTACHMENT_THRESHOLD + 1));

        let drive = drive_target();
        assert!(!drive.uses_session(DRIVE_ITEM_THRESHOLD - 1));
        assert!(drive.uses_session(DRIVE_ITEM_THRESHOLD));
    }

    #[test]
    fn mail_chunks_stay_under_the_outlook_limit() {
        assert!(mail_target().max_chunk_size() <= 4_000_000);
        assert_eq!(mail_target().max_chunk_size() % CHUNK_UNIT, 0);
        assert!(drive_target().max_chunk_size() >= DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn pascal_case_acknowledgements_parse() {
        let ack: SessionResponse = serde_json::from_value(json!({
            "ExpirationDateTime": "2030-01-01T00:00:00Z",
            "NextExpectedRanges": ["3932160"]
        }))
        .unwrap();
        assert_eq!(first_range_start(&ack.next_expected_ranges).unwrap(), Some(3932160));
        assert!(ack.expiration_date_time.is_some());
    }

    #[test]
    fn drive_item_paths() {
        assert_eq!(
            DriveItemRef::Path("/docs/report.pdf".into()).item_path(),
            "/me/drive/root:/docs/report.pdf:"
        );
        assert_eq!(
            DriveItemRef::Id("01ABC".into()).item_path(),
            "/me/drive/items/01ABC"
        );
    }

    #[test]
    fn session_requests_per_target() {
        let (path, body) = mail_target().session_request(42);
        assert_eq!(path, "/me/messages/m1/attachments/createUploadSession");
        assert_eq!(body["AttachmentItem"]["size"], 42);
        assert_eq!(body["AttachmentItem"]["attachmentType"], "file");

        let (path, body) = drive_target().session_request(42);
        assert_eq!(path, "/me/drive/root:/docs/report.pdf:/createUploadSession");
        assert_eq!(body["item"]["@microsoft.graph.conflictBehavior"], "rename");
    }

    #[test]
    fn range_start_parsing() {
        assert_eq!(first_range_start(&[]).unwrap(), None);
        assert_eq!(
            first_range_start(&["327680-".to_string()]).unwrap(),
            Some(327680)
        );
        assert_eq!(
            first_range_start(&["10-20".to_string(), "40-".to_string()]).unwrap(),
            Some(10)
        );
        assert!(first_range_start(&["abc".to_string()]).is_err());
    }

    #[test]
    fn conflict_behavior_round_trips_through_strings() {
        assert_eq!(ConflictBehavior::Replace.to_string(), "replace");
        assert_eq!("fail".parse::<ConflictBehavior>().unwrap(), ConflictBehavior::Fail);
    }
}
