use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE, REFERER};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::{OutgoingPost, RoomApi};
use crate::config::{RoomEndpoints, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::model::{Message, MessageId};
use crate::protocol::{InviteReceipt, MessagesResponse, PostReceipt, PostResponse};

const CSRF_HEADER: &str = "X-CSRFToken";

/// Who to invite into a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invitee {
    Username(String),
    UserId(u64),
}

/// HTTP client for the room endpoints of the chat backend.
#[derive(Clone)]
pub struct ChatApiClient {
    http: Client,
    endpoints: RoomEndpoints,
    csrf_token: Option<String>,
}

impl ChatApiClient {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let endpoints = config.endpoints()?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(cookie) = &config.session_cookie {
            let value =
                HeaderValue::from_str(cookie).map_err(|_| SyncError::InvalidHeader("Cookie"))?;
            headers.insert(COOKIE, value);
        }
        let http = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            http,
            endpoints,
            csrf_token: config.csrf_token.clone(),
        })
    }

    pub fn endpoints(&self) -> &RoomEndpoints {
        &self.endpoints
    }

    pub async fn invite(&self, invitee: Invitee) -> SyncResult<InviteReceipt> {
        let field = match &invitee {
            Invitee::Username(name) => ("username", name.clone()),
            Invitee::UserId(id) => ("user_id", id.to_string()),
        };
        let res = self
            .mutation(self.endpoints.invite()?)
            .form(&[field])
            .send()
            .await?;
        read_json(res).await
    }

    pub async fn accept_invite(&self, invite_id: u64) -> SyncResult<()> {
        let res = self
            .mutation(self.endpoints.accept_invite(invite_id)?)
            .send()
            .await?;
        ensure_success(res).await.map(drop)
    }

    pub async fn decline_invite(&self, invite_id: u64) -> SyncResult<()> {
        let res = self
            .mutation(self.endpoints.decline_invite(invite_id)?)
            .send()
            .await?;
        ensure_success(res).await.map(drop)
    }

    /// POST with the CSRF token and a same-origin referer.
    fn mutation(&self, url: Url) -> RequestBuilder {
        let mut req = self
            .http
            .post(url)
            .header(REFERER, format!("{}/", self.endpoints.origin()));
        if let Some(token) = &self.csrf_token {
            req = req.header(CSRF_HEADER, token);
        }
        req
    }
}

#[async_trait]
impl RoomApi for ChatApiClient {
    async fn fetch_since(&self, since_id: Option<MessageId>) -> SyncResult<Vec<Message>> {
        let url = self.endpoints.messages(since_id)?;
        let res = self.http.get(url).send().await?;
        let body: MessagesResponse = read_json(res).await?;
        debug!(
            target: "chat.poll",
            room = self.endpoints.room_id(),
            ?since_id,
            count = body.messages.len(),
            "fetched messages"
        );
        Ok(body.messages)
    }

    async fn post_message(&self, post: OutgoingPost) -> SyncResult<PostReceipt> {
        let mut form = Form::new().text("text", post.text);
        if let Some(reply_to) = post.reply_to {
            form = form.text("reply_to", reply_to.to_string());
        }
        for file in post.attachments {
            let part = Part::bytes(file.data)
                .file_name(file.name)
                .mime_str(&file.content_type)?;
            form = form.part("attachments", part);
        }

        let res = self
            .mutation(self.endpoints.send()?)
            .multipart(form)
            .send()
            .await?;
        let body: PostResponse = read_json(res).await?;
        if !body.ok {
            return Err(SyncError::Rejected(body.error_messages()));
        }
        Ok(PostReceipt { id: body.id })
    }

    async fn delete_message(&self, id: MessageId) -> SyncResult<()> {
        let res = self.mutation(self.endpoints.delete(id)?).send().await?;
        ensure_success(res).await.map(drop)
    }
}

/// Maps client errors carrying `{errors}`/`{error}` to [`SyncError::Rejected`]
/// and anything else unsuccessful to [`SyncError::UnexpectedStatus`].
async fn ensure_success(res: Response) -> SyncResult<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    if status.is_client_error() {
        if let Ok(parsed) = serde_json::from_str::<PostResponse>(&body) {
            if parsed.errors.is_some() || parsed.error.is_some() {
                return Err(SyncError::Rejected(parsed.error_messages()));
            }
        }
    }
    Err(SyncError::UnexpectedStatus { status, body })
}

async fn read_json<T>(res: Response) -> SyncResult<T>
where
    T: DeserializeOwned,
{
    let res = ensure_success(res).await?;
    let bytes = res.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
