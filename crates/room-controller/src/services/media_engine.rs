//! Media engine client.
//!
//! The coordinator and janitor talk to the media engine through the
//! [`MediaEngine`] trait. [`LiveKitClient`] implements it over the LiveKit
//! Twirp room service API, authenticating each call with a short-lived
//! HS256 access token signed by the API secret.
//!
//! # Security
//!
//! - The API secret is held in a `SecretString` and never logged
//! - Error bodies from the engine are logged server-side only

use crate::config::MediaEngineConfig;
use crate::errors::RcError;
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Default timeout for media engine requests in seconds.
const MEDIA_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default connect timeout in seconds.
const MEDIA_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Lifetime of each signed access token in seconds.
const ACCESS_TOKEN_TTL_SECS: i64 = 600;

const ROOM_SERVICE_PREFIX: &str = "/twirp/livekit.RoomService";

/// Room creation parameters sent to the media engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateMediaRoom {
    pub name: String,
    pub empty_timeout: u32,
    pub max_participants: u32,
    /// Serialized `RoomMetadata`.
    pub metadata: String,
}

/// Room as reported by the media engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaRoom {
    #[serde(default)]
    pub sid: String,
    pub name: String,
    #[serde(default, alias = "numParticipants")]
    pub num_participants: u32,
}

/// Participant as reported by the media engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaParticipant {
    #[serde(default)]
    pub sid: String,
    pub identity: String,
    #[serde(default)]
    pub name: String,
}

/// Operations the control plane needs from the media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_room(&self, request: &CreateMediaRoom) -> Result<MediaRoom, RcError>;

    /// Delete a room. Deleting a room the engine does not know is not an error.
    async fn delete_room(&self, name: &str) -> Result<(), RcError>;

    async fn list_participants(&self, name: &str) -> Result<Vec<MediaParticipant>, RcError>;

    /// `Ok(None)` when the engine has no room with this name.
    async fn get_room(&self, name: &str) -> Result<Option<MediaRoom>, RcError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoGrant {
    room_create: bool,
    room_list: bool,
    room_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    room: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    iss: String,
    nbf: i64,
    exp: i64,
    video: VideoGrant,
}

#[derive(Serialize)]
struct RoomNameRequest<'a> {
    room: &'a str,
}

#[derive(Serialize)]
struct ListRoomsRequest<'a> {
    names: [&'a str; 1],
}

#[derive(Deserialize)]
struct ListRoomsResponse {
    #[serde(default)]
    rooms: Vec<MediaRoom>,
}

#[derive(Deserialize)]
struct ListParticipantsResponse {
    #[serde(default)]
    participants: Vec<MediaParticipant>,
}

/// LiveKit room service client.
pub struct LiveKitClient {
    client: Client,
    base_url: String,
    api_key: String,
    /// Protected by `SecretString` to prevent accidental logging.
    api_secret: SecretString,
}

impl LiveKitClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Internal` if the HTTP client cannot be built.
    pub fn new(config: &MediaEngineConfig) -> Result<Self, RcError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(MEDIA_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(MEDIA_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "rc.media", error = %e, "Failed to build HTTP client");
                RcError::Internal("Failed to build media engine HTTP client".to_string())
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }

    /// Sign an access token granting room administration.
    fn access_token(&self, room: Option<&str>) -> Result<String, RcError> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            iss: self.api_key.clone(),
            nbf: now,
            exp: now + ACCESS_TOKEN_TTL_SECS,
            video: VideoGrant {
                room_create: true,
                room_list: true,
                room_admin: true,
                room: room.map(str::to_string),
            },
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.api_secret.expose_secret().as_bytes()),
        )
        .map_err(|e| {
            error!(target: "rc.media", error = %e, "Failed to sign media engine access token");
            RcError::Internal("Failed to sign media engine access token".to_string())
        })
    }

    /// POST a Twirp method. `Ok(None)` on 404.
    async fn call<B, R>(&self, method: &str, room: Option<&str>, body: &B) -> Result<Option<R>, RcError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned + Send,
    {
        let url = format!("{}{ROOM_SERVICE_PREFIX}/{method}", self.base_url);
        let token = self.access_token(room)?;

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "rc.media", error = %e, method, "Media engine request failed");
                RcError::MediaEngine(format!("{method} request failed"))
            })?;

        let status = response.status();
        if status.is_success() {
            let parsed = response.json().await.map_err(|e| {
                error!(target: "rc.media", error = %e, method, "Failed to parse media engine response");
                RcError::MediaEngine(format!("{method} returned an invalid body"))
            })?;
            Ok(Some(parsed))
        } else if status == StatusCode::NOT_FOUND {
            debug!(target: "rc.media", method, "Media engine returned not found");
            Ok(None)
        } else if status == StatusCode::UNAUTHORIZED {
            error!(target: "rc.media", method, "Media engine rejected API credentials");
            Err(RcError::MediaEngine(format!("{method} unauthorized")))
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!(target: "rc.media", status = %status, body = %body, method, "Media engine returned error");
            Err(RcError::MediaEngine(format!("{method} failed with status {status}")))
        }
    }
}

#[async_trait]
impl MediaEngine for LiveKitClient {
    #[instrument(skip_all, fields(room_id = %request.name))]
    async fn create_room(&self, request: &CreateMediaRoom) -> Result<MediaRoom, RcError> {
        self.call("CreateRoom", Some(&request.name), request)
            .await?
            .ok_or_else(|| RcError::MediaEngine("CreateRoom returned not found".to_string()))
    }

    #[instrument(skip_all, fields(room_id = %name))]
    async fn delete_room(&self, name: &str) -> Result<(), RcError> {
        let _: Option<serde_json::Value> = self
            .call("DeleteRoom", Some(name), &RoomNameRequest { room: name })
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(room_id = %name))]
    async fn list_participants(&self, name: &str) -> Result<Vec<MediaParticipant>, RcError> {
        let response: Option<ListParticipantsResponse> = self
            .call("ListParticipants", Some(name), &RoomNameRequest { room: name })
            .await?;
        Ok(response.map(|r| r.participants).unwrap_or_default())
    }

    #[instrument(skip_all, fields(room_id = %name))]
    async fn get_room(&self, name: &str) -> Result<Option<MediaRoom>, RcError> {
        let response: Option<ListRoomsResponse> = self
            .call("ListRooms", None, &ListRoomsRequest { names: [name] })
            .await?;
        Ok(response.and_then(|r| r.rooms.into_iter().find(|room| room.name == name)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    fn client() -> LiveKitClient {
        LiveKitClient::new(&MediaEngineConfig {
            url: "http://localhost:7880/".to_string(),
            api_key: "devkey".to_string(),
            api_secret: SecretString::from("devsecret-devsecret-devsecret-00"),
        })
        .unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(client().base_url, "http://localhost:7880");
    }

    #[test]
    fn test_access_token_carries_room_admin_grant() {
        let token = client().access_token(Some("room01")).unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "nbf"]);
        let decoded = decode::<AccessClaims>(
            &token,
            &DecodingKey::from_secret(b"devsecret-devsecret-devsecret-00"),
            &validation,
        )
        .unwrap();

        assert_eq!(decoded.claims.iss, "devkey");
        assert!(decoded.claims.video.room_admin);
        assert!(decoded.claims.video.room_create);
        assert_eq!(decoded.claims.video.room.as_deref(), Some("room01"));
        assert_eq!(decoded.claims.exp - decoded.claims.nbf, ACCESS_TOKEN_TTL_SECS);
    }

    #[test]
    fn test_grant_serializes_camel_case() {
        let grant = VideoGrant {
            room_create: true,
            room_list: false,
            room_admin: true,
            room: None,
        };
        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(json["roomCreate"], true);
        assert_eq!(json["roomAdmin"], true);
        assert!(json.get("room").is_none());
    }

    #[test]
    fn test_media_room_accepts_camel_case_fields() {
        let room: MediaRoom =
            serde_json::from_str(r#"{"sid":"RM_1","name":"room01","numParticipants":3}"#).unwrap();
        assert_eq!(room.num_participants, 3);
    }
}
