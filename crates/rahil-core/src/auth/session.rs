//! Session lifecycle: login, signup, logout, profile refresh, device
//! registration and token rotation.
//!
//! `SessionManager` is the single owner of the session state. It is cheap
//! to clone; every clone shares the same state, credential store and
//! in-flight refresh.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::CredentialStore;
use crate::api::{self, ApiClient, ApiError, ApiRequest, MultipartFile};
use crate::error::Error;
use crate::models::{
    AuthTokens, DeviceIdentity, DeviceRegistration, ProfileResponse, ProfileUpdate, UserProfile,
};

const LOGIN_PATH: &str = "/auth/login";
const SIGNUP_PATH: &str = "/auth/signup";
const REFRESH_PATH: &str = "/auth/refresh";
const PROFILE_PATH: &str = "/api/profile";
const PROFILE_IMAGE_PATH: &str = "/api/profile/image";
const DEVICE_REGISTER_PATH: &str = "/api/devices/register";

/// Multipart field name the server expects for profile images
const PROFILE_IMAGE_FIELD: &str = "image";

/// Authentication state. `access_token == None` means logged out,
/// whatever the other fields hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
    pub device_id: Option<u64>,
}

impl Session {
    pub fn is_logged_in(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Fields for creating an account
#[derive(Debug, Clone, Serialize)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub name: String,
    pub position: String,
}

impl NewAccount {
    fn validate(&self) -> Result<(), Error> {
        let fields = [
            ("email", self.email.trim()),
            ("password", self.password.as_str()),
            ("name", self.name.trim()),
            ("position", self.position.trim()),
        ];
        for (field, value) in fields {
            if value.is_empty() {
                return Err(Error::InvalidInput(format!("{} is required", field)));
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<String, Arc<Error>>>>;

struct SessionState {
    session: Session,
    /// Bumped by login and logout. A refresh started under an older epoch
    /// must not touch the session.
    epoch: u64,
}

struct Inner {
    api: ApiClient,
    store: Arc<dyn CredentialStore>,
    device: DeviceIdentity,
    state: RwLock<SessionState>,
    in_flight_refresh: Mutex<Option<RefreshFuture>>,
}

/// Handle to the process-wide session. Construct once, clone freely.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager, restoring whatever session the store holds
    pub fn new(api: ApiClient, store: Arc<dyn CredentialStore>, device: DeviceIdentity) -> Self {
        let mut session = store.load();
        if !session.is_logged_in() && session != Session::default() {
            debug!("Stored credentials have no access token, starting logged out");
            session = Session::default();
        }
        debug!(
            logged_in = session.is_logged_in(),
            has_user = session.user.is_some(),
            device_id = ?session.device_id,
            "Session restored"
        );

        Self {
            inner: Arc::new(Inner {
                api,
                store,
                device,
                state: RwLock::new(SessionState { session, epoch: 0 }),
                in_flight_refresh: Mutex::new(None),
            }),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.inner.device
    }

    // =========================================================================
    // State accessors
    // =========================================================================

    pub async fn snapshot(&self) -> Session {
        self.inner.state.read().await.session.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.inner.state.read().await.session.is_logged_in()
    }

    pub async fn access_token(&self) -> Option<String> {
        let state = self.inner.state.read().await;
        state.session.access_token.clone().filter(|t| !t.is_empty())
    }

    pub async fn user(&self) -> Option<UserProfile> {
        self.inner.state.read().await.session.user.clone()
    }

    pub async fn device_id(&self) -> Option<u64> {
        self.inner.state.read().await.session.device_id
    }

    async fn epoch(&self) -> u64 {
        self.inner.state.read().await.epoch
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Log in, register this device and fetch the profile.
    ///
    /// A failed device registration rolls the login back. A failed profile
    /// fetch is logged and leaves the user logged in without a cached profile.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), Error> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || password.is_empty() {
            return Err(Error::InvalidInput("Email and password required".to_string()));
        }

        let request = ApiRequest::post(LOGIN_PATH).json(&LoginBody {
            email: &email,
            password,
        })?;
        let body = self.inner.api.call(&request, None).await?;
        let tokens: AuthTokens = api::decode(&body)?;

        self.begin_session(&tokens).await?;
        info!(email = %email, "Logged in");

        if let Err(e) = self.register_device().await {
            warn!(error = %e, "Device registration failed, rolling back login");
            if let Err(clear_err) = self.logout().await {
                warn!(error = %clear_err, "Failed to clear credentials after rollback");
            }
            return Err(e);
        }

        if let Err(e) = self.fetch_profile().await {
            warn!(error = %e, "Failed to fetch profile after login");
        }

        Ok(())
    }

    /// Create an account, then log in with it
    pub async fn signup(&self, account: &NewAccount) -> Result<(), Error> {
        account.validate()?;

        let body = NewAccount {
            email: account.email.trim().to_lowercase(),
            ..account.clone()
        };
        let request = ApiRequest::post(SIGNUP_PATH).json(&body)?;
        self.inner.api.call(&request, None).await?;
        info!(email = %body.email, "Account created");

        self.login(&body.email, &body.password).await
    }

    /// Persist a fresh token pair, then publish it. On a storage failure the
    /// manager is left logged out and the store is cleared again.
    async fn begin_session(&self, tokens: &AuthTokens) -> Result<(), Error> {
        if tokens.access_token.is_empty() {
            return Err(ApiError::InvalidResponse(
                "login response has an empty access token".to_string(),
            )
            .into());
        }

        let mut state = self.inner.state.write().await;
        state.epoch += 1;
        state.session = Session::default();

        let store = &self.inner.store;
        store.clear_all()?;
        let persisted = store
            .save_token(&tokens.access_token)
            .and_then(|()| match tokens.refresh_token() {
                Some(refresh_token) => store.save_refresh_token(refresh_token),
                None => {
                    warn!("Login response carried no refresh token; the session cannot be renewed");
                    Ok(())
                }
            });
        if let Err(e) = persisted {
            if let Err(clear_err) = store.clear_all() {
                warn!(error = %clear_err, "Failed to clear partially saved credentials");
            }
            return Err(e.into());
        }

        state.session = Session {
            access_token: Some(tokens.access_token.clone()),
            refresh_token: tokens.refresh_token().map(str::to_string),
            user: None,
            device_id: None,
        };
        Ok(())
    }

    /// Register this installation and store the server-assigned device id
    pub async fn register_device(&self) -> Result<u64, Error> {
        let epoch = self.epoch().await;
        let request = ApiRequest::post(DEVICE_REGISTER_PATH).json(&self.inner.device)?;
        let body = self.authorized(&request).await?;
        let registration: DeviceRegistration = api::decode(&body)?;

        let mut state = self.inner.state.write().await;
        if state.epoch != epoch || !state.session.is_logged_in() {
            debug!("Session changed during device registration, discarding device id");
            return Err(Error::AuthenticationRequired);
        }
        self.inner.store.save_device_id(registration.device_id)?;
        state.session.device_id = Some(registration.device_id);

        info!(device_id = registration.device_id, "Device registered");
        Ok(registration.device_id)
    }

    /// Fetch the profile and replace the cached copy.
    ///
    /// On failure the cached profile is left untouched.
    pub async fn fetch_profile(&self) -> Result<UserProfile, Error> {
        let epoch = self.epoch().await;
        let body = self.authorized(&ApiRequest::get(PROFILE_PATH)).await?;
        let response: ProfileResponse = api::decode(&body)?;

        let mut state = self.inner.state.write().await;
        if state.epoch != epoch || !state.session.is_logged_in() {
            debug!("Session changed during profile fetch, discarding profile");
            return Err(Error::AuthenticationRequired);
        }
        self.inner.store.save_user(&response.user)?;
        state.session.user = Some(response.user.clone());

        debug!(user_id = response.user.id, "Profile updated");
        Ok(response.user)
    }

    /// Edit profile fields. Changing the password ends the session;
    /// any other change is followed by a profile fetch.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), Error> {
        let body = update.to_body();
        if body.is_empty() {
            return Err(Error::InvalidInput("Nothing to update".to_string()));
        }

        let request = ApiRequest::patch(PROFILE_PATH).json(&body)?;
        self.authorized(&request).await?;

        if update.changes_password() {
            info!("Password changed, logging out");
            return self.logout().await;
        }

        if let Err(e) = self.fetch_profile().await {
            warn!(error = %e, "Failed to refresh profile after update");
        }
        Ok(())
    }

    /// Upload a profile image and return its URL.
    ///
    /// The cached profile picks up the new URL immediately and is then
    /// reconciled with a profile fetch.
    pub async fn upload_profile_image(&self, filename: &str, bytes: Vec<u8>) -> Result<String, Error> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput("Image is empty".to_string()));
        }

        let epoch = self.epoch().await;
        let request = ApiRequest::post(PROFILE_IMAGE_PATH)
            .multipart(MultipartFile::new(PROFILE_IMAGE_FIELD, filename, bytes));
        let body = self.authorized(&request).await?;
        let url = api::parse_image_url(&body)?;
        info!(url = %url, "Profile image uploaded");

        {
            let mut state = self.inner.state.write().await;
            if state.epoch == epoch {
                if let Some(mut user) = state.session.user.clone() {
                    user.image_url = Some(url.clone());
                    self.inner.store.save_user(&user)?;
                    state.session.user = Some(user);
                }
            }
        }

        if let Err(e) = self.fetch_profile().await {
            warn!(error = %e, "Failed to reconcile profile after image upload");
        }
        Ok(url)
    }

    /// Clear the session from memory and the store. Safe to call repeatedly.
    pub async fn logout(&self) -> Result<(), Error> {
        let mut state = self.inner.state.write().await;
        let was_logged_in = state.session.is_logged_in();
        state.epoch += 1;
        state.session = Session::default();
        self.inner.store.clear_all()?;

        if was_logged_in {
            info!("Logged out");
        }
        Ok(())
    }

    // =========================================================================
    // Token refresh
    // =========================================================================

    /// Exchange the refresh token for a new token pair.
    ///
    /// Fails without touching the network when there is no refresh token.
    /// Any failure logs the session out.
    pub async fn refresh_tokens(&self) -> Result<(), Error> {
        self.require_refresh_token().await?;
        self.shared_refresh(None).await.map(|_| ()).map_err(Error::unshare)
    }

    async fn require_refresh_token(&self) -> Result<(), Error> {
        let (has_refresh_token, epoch) = {
            let state = self.inner.state.read().await;
            let has = state
                .session
                .refresh_token
                .as_deref()
                .is_some_and(|t| !t.is_empty());
            (has, state.epoch)
        };

        if has_refresh_token {
            Ok(())
        } else {
            self.inner.end_session(epoch, "no refresh token").await;
            Err(Error::AuthenticationRequired)
        }
    }

    /// Join the in-flight refresh, or start one.
    ///
    /// With `stale` set, a token that already differs from it is returned as
    /// is: another task rotated it after `stale` was sent. The check runs
    /// under the slot lock, which a finished refresh only releases after
    /// storing its token.
    async fn shared_refresh(&self, stale: Option<&str>) -> Result<String, Arc<Error>> {
        let future = {
            let mut slot = self.inner.in_flight_refresh.lock().await;
            if let Some(in_flight) = slot.as_ref() {
                debug!("Joining in-flight token refresh");
                in_flight.clone()
            } else {
                if let Some(stale) = stale {
                    let state = self.inner.state.read().await;
                    match state.session.access_token.as_deref() {
                        None => return Err(Arc::new(Error::AuthenticationRequired)),
                        Some(current) if current != stale => {
                            debug!("Access token already rotated by another task");
                            return Ok(current.to_string());
                        }
                        Some(_) => {}
                    }
                }

                let inner = Arc::clone(&self.inner);
                let future = async move {
                    let result = inner.refresh().await.map_err(Arc::new);
                    inner.in_flight_refresh.lock().await.take();
                    result
                }
                .boxed()
                .shared();
                *slot = Some(future.clone());
                future
            }
        };

        future.await
    }

    // =========================================================================
    // Authenticated calls
    // =========================================================================

    /// Perform an authenticated call with bounded retry.
    ///
    /// On a 401 the token is refreshed once (shared with concurrent callers)
    /// and the request is retried once; the retry's outcome is final, even
    /// if it is another 401. If the refresh fails the session is logged out
    /// and `Error::SessionEnded` is returned.
    pub async fn authorized(&self, request: &ApiRequest) -> Result<Vec<u8>, Error> {
        let token = self.access_token().await.ok_or(Error::AuthenticationRequired)?;

        match self.inner.api.call(request, Some(&token)).await {
            Err(ApiError::Unauthorized) => {}
            outcome => return outcome.map_err(Error::from),
        }

        debug!(method = %request.method, path = %request.path, "Access token rejected, refreshing");
        let fresh = match self.shared_refresh(Some(&token)).await {
            Ok(fresh) => fresh,
            Err(cause) => {
                warn!(path = %request.path, error = %cause, "Could not refresh session");
                return Err(Error::SessionEnded {
                    original: ApiError::Unauthorized,
                    cause,
                });
            }
        };

        self.inner
            .api
            .call(request, Some(&fresh))
            .await
            .map_err(Error::from)
    }

    /// Authenticated call decoding the response body as JSON
    pub async fn authorized_json<T: serde::de::DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<T, Error> {
        let body = self.authorized(request).await?;
        Ok(api::decode(&body)?)
    }
}

impl Inner {
    async fn refresh(&self) -> Result<String, Error> {
        let (refresh_token, epoch) = {
            let state = self.state.read().await;
            (
                state.session.refresh_token.clone().filter(|t| !t.is_empty()),
                state.epoch,
            )
        };
        let Some(refresh_token) = refresh_token else {
            self.end_session(epoch, "no refresh token").await;
            return Err(Error::AuthenticationRequired);
        };

        let request = ApiRequest::post(REFRESH_PATH).json(&RefreshBody {
            refresh_token: &refresh_token,
        })?;
        let outcome = self
            .api
            .call(&request, None)
            .await
            .and_then(|body| api::decode::<AuthTokens>(&body))
            .and_then(|tokens| {
                if tokens.access_token.is_empty() {
                    Err(ApiError::InvalidResponse(
                        "refresh response has an empty access token".to_string(),
                    ))
                } else {
                    Ok(tokens)
                }
            });
        let tokens = match outcome {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Token refresh rejected");
                self.end_session(epoch, "refresh failed").await;
                return Err(e.into());
            }
        };

        let mut state = self.state.write().await;
        if state.epoch != epoch {
            debug!("Session changed during refresh, discarding new tokens");
            return Err(Error::AuthenticationRequired);
        }

        let next_refresh_token = match tokens.refresh_token() {
            Some(rotated) => rotated.to_string(),
            None => {
                warn!("Refresh response omitted the refresh token, keeping the previous one");
                refresh_token
            }
        };

        state.session.access_token = Some(tokens.access_token.clone());
        state.session.refresh_token = Some(next_refresh_token.clone());

        let persisted = self
            .store
            .save_token(&tokens.access_token)
            .and_then(|()| self.store.save_refresh_token(&next_refresh_token));
        if let Err(e) = persisted {
            warn!(error = %e, "Failed to persist refreshed tokens");
        }

        info!("Access token refreshed");
        Ok(tokens.access_token)
    }

    /// Log out because the session can no longer be renewed.
    /// Does nothing if the session already moved on.
    async fn end_session(&self, epoch: u64, reason: &str) {
        let mut state = self.state.write().await;
        if state.epoch != epoch {
            return;
        }
        state.epoch += 1;
        state.session = Session::default();
        if let Err(e) = self.store.clear_all() {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        info!(reason, "Session ended");
    }
}
