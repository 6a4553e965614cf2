//! Bilibili dynamic-feed destination.
//!
//! Three publish paths share one cookie-authenticated HTTP client:
//!
//! - standalone post: upload images to the BFS image host, then create a
//!   dynamic (scene 1 for text, scene 2 with pictures)
//! - native repost: create a dynamic with scene 4 pointing at an existing one
//! - video: preupload, chunked UPOS upload, merge, then submit the archive
//!
//! Credentials are re-read from the auth file on every publish so a fresh
//! login takes effect without a restart. HTTP 401/403 or code `-101` maps to
//! [`PublishError::AuthRejected`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ferry_core::{DestinationKind, DestinationRef, PostBody};
use futures::stream::{self, StreamExt, TryStreamExt};
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{Destination, PublishError};
use crate::error::{Error, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Code returned when the session cookie is not logged in.
const CODE_NOT_LOGGED_IN: i64 = -101;

const SCENE_TEXT: u8 = 1;
const SCENE_PICTURES: u8 = 2;
const SCENE_REPOST: u8 = 4;

const CHUNK_CONCURRENCY: usize = 3;
const CHUNK_ATTEMPTS: u32 = 3;

/// Configuration for [`DynamicClient`].
#[derive(Debug, Clone)]
pub struct DynamicConfig {
    /// Dynamic feed API base.
    pub api_base: String,
    /// Member (video upload) API base.
    pub upload_base: String,
    /// Public base for post links.
    pub post_location_base: String,
    /// Public base for video links.
    pub video_location_base: String,
    /// JSON file with `SESSDATA`, `bili_jct` and `DedeUserID`.
    pub auth_file: PathBuf,
    /// Publish posts and videos visible to the account only.
    pub private: bool,
    /// Video category id.
    pub video_tid: u32,
    /// Comma-separated video tags.
    pub video_tags: String,
    /// Reprint source shown on videos.
    pub video_source: String,
    /// HTTP timeout per request.
    pub timeout: Duration,
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.bilibili.com".to_string(),
            upload_base: "https://member.bilibili.com".to_string(),
            post_location_base: "https://t.bilibili.com".to_string(),
            video_location_base: "https://www.bilibili.com/video".to_string(),
            auth_file: PathBuf::from("./auth_store/bili_auth.json"),
            private: false,
            video_tid: 171,
            video_tags: "relay".to_string(),
            video_source: "https://x.com".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl DynamicConfig {
    /// Load from `DEST_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let video_tid = match std::env::var("DEST_VIDEO_TID") {
            Ok(v) => v
                .parse()
                .map_err(|_| Error::Config(format!("DEST_VIDEO_TID is not a number: {v}")))?,
            Err(_) => defaults.video_tid,
        };

        let config = Self {
            api_base: std::env::var("DEST_API_BASE").unwrap_or(defaults.api_base),
            upload_base: std::env::var("DEST_UPLOAD_BASE").unwrap_or(defaults.upload_base),
            auth_file: std::env::var("DEST_AUTH_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.auth_file),
            private: std::env::var("DEST_PRIVATE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.private),
            video_tid,
            video_tags: std::env::var("DEST_VIDEO_TAGS").unwrap_or(defaults.video_tags),
            video_source: std::env::var("DEST_VIDEO_SOURCE").unwrap_or(defaults.video_source),
            ..defaults
        };

        info!(
            api_base = %config.api_base,
            auth_file = %config.auth_file.display(),
            private = config.private,
            "Destination configuration loaded"
        );
        Ok(config)
    }
}

/// Session credentials from the auth file.
#[derive(Debug, Clone)]
struct Credentials {
    cookie: String,
    csrf: String,
    uid: String,
}

impl Credentials {
    fn parse(json: &str) -> std::result::Result<Self, PublishError> {
        let raw: HashMap<String, Value> = serde_json::from_str(json)
            .map_err(|e| PublishError::AuthRejected(format!("unreadable auth file: {e}")))?;

        let mut fields = HashMap::new();
        for (k, v) in raw {
            let value = match v {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            if !value.is_empty() {
                fields.insert(k.to_ascii_lowercase(), value);
            }
        }

        let sessdata = fields
            .get("sessdata")
            .ok_or_else(|| PublishError::AuthRejected("auth file has no SESSDATA".into()))?;
        let csrf = fields
            .get("bili_jct")
            .cloned()
            .ok_or_else(|| PublishError::AuthRejected("auth file has no bili_jct".into()))?;
        let uid = fields.get("dedeuserid").cloned().unwrap_or_default();

        let mut cookie = format!("SESSDATA={sessdata}; bili_jct={csrf}");
        if !uid.is_empty() {
            cookie.push_str(&format!("; DedeUserID={uid}"));
        }
        Ok(Self { cookie, csrf, uid })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UploadedImage {
    image_url: String,
    image_width: u64,
    image_height: u64,
}

#[derive(Debug, Deserialize)]
struct CreatedDynamic {
    dyn_id_str: String,
}

#[derive(Debug, Deserialize)]
struct Preupload {
    auth: String,
    endpoint: String,
    upos_uri: String,
    biz_id: u64,
    chunk_size: usize,
}

#[derive(Debug, Deserialize)]
struct UploadInit {
    upload_id: String,
}

#[derive(Debug, Deserialize)]
struct SubmittedVideo {
    bvid: String,
}

/// Publishes to the Bilibili dynamic feed.
pub struct DynamicClient {
    config: DynamicConfig,
    client: reqwest::Client,
}

impl DynamicClient {
    /// Create a client.
    pub fn new(config: DynamicConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self { config, client })
    }

    async fn credentials(&self) -> std::result::Result<Credentials, PublishError> {
        let json = tokio::fs::read_to_string(&self.config.auth_file)
            .await
            .map_err(|e| {
                PublishError::AuthRejected(format!(
                    "cannot read {}: {e}",
                    self.config.auth_file.display()
                ))
            })?;
        Credentials::parse(&json)
    }

    fn upload_id(uid: &str) -> String {
        let nonce: u32 = rand::rng().random_range(1000..10000);
        format!("{uid}_{}_{nonce}", chrono::Utc::now().timestamp())
    }

    async fn upload_image(
        &self,
        creds: &Credentials,
        path: &Path,
    ) -> std::result::Result<Value, PublishError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PublishError::Media(format!("{}: {e}", path.display())))?;
        let size_kb = bytes.len() as f64 / 1024.0;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image.jpg")
            .to_string();

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(name)
            .mime_str("image/jpeg")
            .map_err(|e| PublishError::Media(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file_up", part)
            .text("biz", "draw")
            .text("category", "daily")
            .text("csrf", creds.csrf.clone());

        let url = format!("{}/x/dynamic/feed/draw/upload_bfs", self.config.api_base);
        let response = self
            .client
            .post(url)
            .header("cookie", &creds.cookie)
            .header("referer", "https://www.bilibili.com")
            .multipart(form)
            .send()
            .await?;
        let image: UploadedImage = read_envelope(response).await?;

        Ok(json!({
            "img_src": image.image_url,
            "img_width": image.image_width,
            "img_height": image.image_height,
            "img_size": (size_kb * 1000.0).round() / 1000.0,
        }))
    }

    async fn create_dynamic(
        &self,
        creds: &Credentials,
        payload: Value,
    ) -> std::result::Result<String, PublishError> {
        let url = format!(
            "{}/x/dynamic/feed/create/dyn?platform=web&csrf={}",
            self.config.api_base, creds.csrf
        );
        let response = self
            .client
            .post(url)
            .header("cookie", &creds.cookie)
            .header("referer", "https://www.bilibili.com")
            .json(&payload)
            .send()
            .await?;
        let created: CreatedDynamic = read_envelope(response).await?;
        Ok(created.dyn_id_str)
    }

    fn dyn_req(&self, creds: &Credentials, body: &PostBody, scene: u8) -> Value {
        let mut content = json!({
            "contents": [{"raw_text": body.text, "type": 1, "biz_id": ""}],
        });
        if let Some(title) = &body.title {
            content["title"] = json!(title);
        }
        json!({
            "content": content,
            "scene": scene,
            "attach_card": null,
            "upload_id": Self::upload_id(&creds.uid),
            "meta": {"app_meta": {"from": "create.dynamic.web", "mobi_app": "web"}},
        })
    }

    async fn upload_chunk(
        &self,
        upos_url: &str,
        upos_auth: &str,
        query: Vec<(&'static str, String)>,
        data: Vec<u8>,
    ) -> std::result::Result<(), PublishError> {
        let mut last_error = String::new();
        for attempt in 1..=CHUNK_ATTEMPTS {
            let result = self
                .client
                .put(upos_url)
                .header("X-Upos-Auth", upos_auth)
                .query(&query)
                .body(data.clone())
                .send()
                .await
                .and_then(|r| r.error_for_status());
            match result {
                Ok(_) => return Ok(()),
                Err(e) => {
                    last_error = e.to_string();
                    debug!(attempt, error = %e, "Chunk upload failed");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
        Err(PublishError::Network(format!(
            "chunk upload failed after {CHUNK_ATTEMPTS} attempts: {last_error}"
        )))
    }

    /// Upload the file through UPOS and return the server-side file name.
    async fn upload_video_file(
        &self,
        creds: &Credentials,
        video: &Path,
    ) -> std::result::Result<String, PublishError> {
        let data = tokio::fs::read(video)
            .await
            .map_err(|e| PublishError::Media(format!("{}: {e}", video.display())))?;
        let total = data.len();
        let name = video
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("video.mp4")
            .to_string();
        info!(file = %name, megabytes = total as f64 / 1_048_576.0, "Uploading video");

        let response = self
            .client
            .get(format!("{}/preupload", self.config.upload_base))
            .header("cookie", &creds.cookie)
            .query(&[
                ("os", "upos"),
                ("r", "upos"),
                ("profile", "ugcupos/bup"),
                ("ssl", "0"),
                ("version", "2.8.12"),
                ("build", "2081200"),
                ("upcdn", "bda2"),
                ("probe_version", "20221109"),
            ])
            .query(&[("name", name.as_str())])
            .query(&[("size", total)])
            .send()
            .await?;
        let pre: Preupload = read_json(response).await?;
        if pre.chunk_size == 0 {
            return Err(PublishError::Rejected("preupload returned chunk_size 0".into()));
        }

        let upos_url = format!(
            "https:{}/{}",
            pre.endpoint,
            pre.upos_uri.trim_start_matches("upos://")
        );
        let init: UploadInit = read_json(
            self.client
                .post(format!("{upos_url}?uploads&output=json"))
                .header("X-Upos-Auth", &pre.auth)
                .send()
                .await?,
        )
        .await?;

        let chunks = total.div_ceil(pre.chunk_size);
        stream::iter(data.chunks(pre.chunk_size).map(<[u8]>::to_vec).enumerate())
            .map(|(index, chunk)| {
                let start = index * pre.chunk_size;
                let query = vec![
                    ("partNumber", (index + 1).to_string()),
                    ("uploadId", init.upload_id.clone()),
                    ("chunk", index.to_string()),
                    ("chunks", chunks.to_string()),
                    ("size", chunk.len().to_string()),
                    ("start", start.to_string()),
                    ("end", (start + chunk.len()).to_string()),
                    ("total", total.to_string()),
                ];
                self.upload_chunk(&upos_url, &pre.auth, query, chunk)
            })
            .buffer_unordered(CHUNK_CONCURRENCY)
            .try_collect::<Vec<()>>()
            .await?;

        let parts: Vec<Value> = (1..=chunks)
            .map(|n| json!({"partNumber": n, "eTag": "etag"}))
            .collect();
        let merged: Value = read_json(
            self.client
                .post(&upos_url)
                .header("X-Upos-Auth", &pre.auth)
                .query(&[
                    ("name", name.as_str()),
                    ("uploadId", init.upload_id.as_str()),
                    ("output", "json"),
                    ("profile", "ugcupos/bup"),
                ])
                .query(&[("biz_id", pre.biz_id)])
                .json(&json!({"parts": parts}))
                .send()
                .await?,
        )
        .await?;
        if merged.get("OK").and_then(Value::as_i64) != Some(1) {
            return Err(PublishError::Rejected(format!("chunk merge failed: {merged}")));
        }

        let remote = pre
            .upos_uri
            .rsplit('/')
            .next()
            .and_then(|f| f.split('.').next())
            .unwrap_or_default()
            .to_string();
        Ok(remote)
    }
}

#[async_trait]
impl Destination for DynamicClient {
    fn name(&self) -> &'static str {
        "bilibili"
    }

    async fn publish_standalone(
        &self,
        body: &PostBody,
        images: &[PathBuf],
    ) -> std::result::Result<String, PublishError> {
        let creds = self.credentials().await?;

        let results =
            futures::future::join_all(images.iter().map(|p| self.upload_image(&creds, p))).await;
        let mut pics = Vec::with_capacity(results.len());
        for (path, result) in images.iter().zip(results) {
            match result {
                Ok(pic) => pics.push(pic),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => warn!(path = %path.display(), error = %e, "Image upload failed, skipping"),
            }
        }
        if !images.is_empty() {
            debug!(uploaded = pics.len(), requested = images.len(), "Images uploaded");
        }

        let scene = if pics.is_empty() { SCENE_TEXT } else { SCENE_PICTURES };
        let mut dyn_req = self.dyn_req(&creds, body, scene);
        if !pics.is_empty() {
            dyn_req["pics"] = Value::Array(pics);
        }
        if self.config.private {
            dyn_req["option"] = json!({"private_pub": 1});
        }

        self.create_dynamic(&creds, json!({"dyn_req": dyn_req})).await
    }

    async fn publish_repost(
        &self,
        body: &PostBody,
        predecessor_id: &str,
    ) -> std::result::Result<String, PublishError> {
        let creds = self.credentials().await?;
        // Reposts cannot be private.
        let payload = json!({
            "dyn_req": self.dyn_req(&creds, body, SCENE_REPOST),
            "web_repost_src": {"dyn_id_str": predecessor_id},
        });
        self.create_dynamic(&creds, payload).await
    }

    async fn publish_video(
        &self,
        body: &PostBody,
        video: &Path,
    ) -> std::result::Result<String, PublishError> {
        let creds = self.credentials().await?;
        let filename = self.upload_video_file(&creds, video).await?;

        let title = body.title.clone().unwrap_or_else(|| filename.clone());
        let payload = json!({
            "copyright": 2,
            "source": self.config.video_source,
            "tid": self.config.video_tid,
            "cover": "",
            "title": title,
            "desc_format_id": 0,
            "desc": body.text,
            "dynamic": body.text,
            "subtitle": {"open": 0, "lan": ""},
            "tag": self.config.video_tags,
            "videos": [{"title": title, "filename": filename, "desc": ""}],
            "is_only_self": u8::from(self.config.private),
        });

        let url = format!("{}/x/vu/web/add?csrf={}", self.config.upload_base, creds.csrf);
        let response = self
            .client
            .post(url)
            .header("cookie", &creds.cookie)
            .header("referer", "https://member.bilibili.com/")
            .json(&payload)
            .send()
            .await?;
        let submitted: SubmittedVideo = read_envelope(response).await?;
        Ok(submitted.bvid)
    }

    fn location(&self, destination: &DestinationRef) -> String {
        match destination.kind {
            DestinationKind::Post => {
                format!("{}/{}", self.config.post_location_base, destination.id)
            }
            DestinationKind::Video => {
                format!("{}/{}", self.config.video_location_base, destination.id)
            }
        }
    }
}

fn check_status(status: StatusCode) -> std::result::Result<(), PublishError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(PublishError::AuthRejected(format!("HTTP {status}")));
    }
    if !status.is_success() {
        return Err(PublishError::Network(format!("HTTP {status}")));
    }
    Ok(())
}

async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> std::result::Result<T, PublishError> {
    check_status(response.status())?;
    response
        .json()
        .await
        .map_err(|e| PublishError::Network(format!("unexpected response: {e}")))
}

async fn read_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
) -> std::result::Result<T, PublishError> {
    let envelope: Envelope<T> = read_json(response).await?;
    interpret_envelope(envelope)
}

fn interpret_envelope<T>(envelope: Envelope<T>) -> std::result::Result<T, PublishError> {
    match envelope.code {
        0 => envelope
            .data
            .ok_or_else(|| PublishError::Rejected("response without data".into())),
        CODE_NOT_LOGGED_IN => Err(PublishError::AuthRejected(format!(
            "code {}: {}",
            envelope.code, envelope.message
        ))),
        code => Err(PublishError::Rejected(format!(
            "code {code}: {}",
            envelope.message
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_credentials_case_insensitive() {
        let creds =
            Credentials::parse(r#"{"sessdata":"S","BILI_JCT":"J","DedeUserID":12345}"#).unwrap();
        assert_eq!(creds.csrf, "J");
        assert_eq!(creds.uid, "12345");
        assert_eq!(creds.cookie, "SESSDATA=S; bili_jct=J; DedeUserID=12345");
    }

    #[test]
    fn test_credentials_missing_fields_are_auth_errors() {
        assert!(Credentials::parse(r#"{"SESSDATA":"S"}"#).unwrap_err().is_auth());
        assert!(Credentials::parse("not json").unwrap_err().is_auth());
    }

    #[test]
    fn test_envelope_codes() {
        let ok: Envelope<CreatedDynamic> =
            serde_json::from_str(r#"{"code":0,"data":{"dyn_id_str":"77"}}"#).unwrap();
        assert_eq!(interpret_envelope(ok).unwrap().dyn_id_str, "77");

        let auth: Envelope<CreatedDynamic> =
            serde_json::from_str(r#"{"code":-101,"message":"not logged in"}"#).unwrap();
        assert!(interpret_envelope(auth).unwrap_err().is_auth());

        let rejected: Envelope<CreatedDynamic> =
            serde_json::from_str(r#"{"code":4126117,"message":"too frequent"}"#).unwrap();
        assert_eq!(
            interpret_envelope(rejected).unwrap_err(),
            PublishError::Rejected("code 4126117: too frequent".into())
        );
    }

    #[test]
    fn test_status_mapping() {
        assert!(check_status(StatusCode::FORBIDDEN).unwrap_err().is_auth());
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY),
            Err(PublishError::Network(_))
        ));
        assert!(check_status(StatusCode::OK).is_ok());
    }

    #[test]
    fn test_locations() {
        let client = DynamicClient::new(DynamicConfig::default()).unwrap();
        assert_eq!(
            client.location(&DestinationRef::post("1001")),
            "https://t.bilibili.com/1001"
        );
        assert_eq!(
            client.location(&DestinationRef::video("BV1ab")),
            "https://www.bilibili.com/video/BV1ab"
        );
    }

    #[test]
    fn test_dyn_req_shape() {
        let client = DynamicClient::new(DynamicConfig::default()).unwrap();
        let creds = Credentials::parse(r#"{"SESSDATA":"S","bili_jct":"J","DedeUserID":"9"}"#)
            .unwrap();
        let body = PostBody {
            title: Some("Group".into()),
            text: "hello".into(),
        };
        let req = client.dyn_req(&creds, &body, SCENE_PICTURES);
        assert_eq!(req["scene"], 2);
        assert_eq!(req["content"]["title"], "Group");
        assert_eq!(req["content"]["contents"][0]["raw_text"], "hello");
        assert!(req["upload_id"].as_str().unwrap().starts_with("9_"));
    }

    #[tokio::test]
    async fn test_missing_auth_file_is_auth_rejection() {
        let tmp = TempDir::new().unwrap();
        let client = DynamicClient::new(DynamicConfig {
            auth_file: tmp.path().join("missing.json"),
            ..Default::default()
        })
        .unwrap();
        let body = PostBody {
            title: None,
            text: "x".into(),
        };
        let err = client.publish_standalone(&body, &[]).await.unwrap_err();
        assert!(err.is_auth());
    }
}
