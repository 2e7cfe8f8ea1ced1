//! Registered-session client for the vendor's pupil resources.
//!
//! ```text
//! Unregistered --register--> Registered --auth failure--> Invalid
//!                                 ^                          |
//!                                 +-------register-----------+
//! ```
//!
//! Resource calls outside `Registered` fail with [`Error::NotConnected`]
//! before any network I/O.

use std::cmp::Reverse;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value as JsonValue;
use time::Date;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::credential::{Credential, CredentialParser};
use crate::endpoints;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::http::signed_get;
use crate::keys::KeyMaterial;
use crate::register::{DeviceRegistrar, PupilSession};
use crate::types::{DateRange, MessageBox};

/// Observable state of a [`SessionClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unregistered,
    Registered,
    /// The vendor rejected the registration; register again to recover.
    Invalid,
}

#[derive(Debug)]
enum SessionState {
    Unregistered,
    Registered(Arc<PupilSession>),
    Invalid,
}

/// Fetches pupil resources over a registered device.
///
/// Safe to share across tasks. Registration is single-flight: concurrent
/// callers of [`SessionClient::ensure_registered`] trigger one registration.
#[derive(Debug)]
pub struct SessionClient {
    config: ClientConfig,
    keys: KeyMaterial,
    http: reqwest::Client,
    registrar: DeviceRegistrar,
    parser: CredentialParser,
    state: RwLock<SessionState>,
    registering: tokio::sync::Mutex<()>,
}

impl SessionClient {
    #[must_use]
    pub fn new(config: ClientConfig, keys: KeyMaterial) -> Self {
        Self {
            registrar: DeviceRegistrar::new(config.clone()),
            parser: CredentialParser::new(config.clone()),
            config,
            keys,
            http: reqwest::Client::new(),
            state: RwLock::new(SessionState::Unregistered),
            registering: tokio::sync::Mutex::new(()),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.registrar = self.registrar.with_http_client(client.clone());
        self.parser = self.parser.with_http_client(client.clone());
        self.http = client;
        self
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            SessionState::Unregistered => SessionStatus::Unregistered,
            SessionState::Registered(_) => SessionStatus::Registered,
            SessionState::Invalid => SessionStatus::Invalid,
        }
    }

    /// The current pupil session, if registered.
    #[must_use]
    pub fn session(&self) -> Option<Arc<PupilSession>> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            SessionState::Registered(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    #[must_use]
    pub fn keys(&self) -> &KeyMaterial {
        &self.keys
    }

    /// Registers from scratch, replacing any current session.
    ///
    /// # Errors
    ///
    /// See [`DeviceRegistrar::register_jwt`] and
    /// [`DeviceRegistrar::register_pupil`]. The state is left unchanged on error.
    pub async fn register(
        &self,
        credential: &Credential,
        token_index: usize,
    ) -> Result<Arc<PupilSession>, Error> {
        let _guard = self.registering.lock().await;
        self.register_locked(credential, token_index).await
    }

    /// Returns the current session, registering first if there is none.
    ///
    /// # Errors
    ///
    /// Same as [`SessionClient::register`].
    pub async fn ensure_registered(
        &self,
        credential: &Credential,
        token_index: usize,
    ) -> Result<Arc<PupilSession>, Error> {
        if let Some(session) = self.session() {
            return Ok(session);
        }
        let _guard = self.registering.lock().await;
        // Another caller may have registered while we waited.
        if let Some(session) = self.session() {
            return Ok(session);
        }
        self.register_locked(credential, token_index).await
    }

    /// Parses an `/api/ap` page (refreshing it if needed) and makes sure the
    /// device is registered with the configured token.
    ///
    /// Returns the credential actually used, which differs from the input
    /// after a refresh.
    ///
    /// # Errors
    ///
    /// See [`CredentialParser::parse`] and [`SessionClient::ensure_registered`].
    pub async fn connect(&self, ap_html: &str) -> Result<(Credential, Arc<PupilSession>), Error> {
        let credential = self.parser.parse(ap_html).await?;
        let session = self
            .ensure_registered(&credential, self.config.token_index)
            .await?;
        Ok((credential, session))
    }

    async fn register_locked(
        &self,
        credential: &Credential,
        token_index: usize,
    ) -> Result<Arc<PupilSession>, Error> {
        let jwt = self
            .registrar
            .register_jwt(&self.keys, credential, token_index)
            .await?;
        let session = Arc::new(
            self.registrar
                .register_pupil(&self.keys, &jwt.rest_url)
                .await?,
        );
        *self.state.write().unwrap_or_else(PoisonError::into_inner) =
            SessionState::Registered(Arc::clone(&session));
        info!(pupil_id = %session.pupil_id, "session registered");
        Ok(session)
    }

    /// # Errors
    ///
    /// [`Error::NotConnected`] unless registered; otherwise any vendor error.
    pub async fn get_lessons(&self, range: &DateRange) -> Result<Envelope<Vec<JsonValue>>, Error> {
        self.fetch_list(|session| endpoints::lessons(session, range)).await
    }

    /// Substitutions and other timetable changes.
    ///
    /// # Errors
    ///
    /// Same as [`SessionClient::get_lessons`].
    pub async fn get_changed_lessons(
        &self,
        range: &DateRange,
    ) -> Result<Envelope<Vec<JsonValue>>, Error> {
        self.fetch_list(|session| endpoints::changed_lessons(session, range))
            .await
    }

    /// # Errors
    ///
    /// Same as [`SessionClient::get_lessons`].
    pub async fn get_attendance(
        &self,
        range: &DateRange,
    ) -> Result<Envelope<Vec<JsonValue>>, Error> {
        self.fetch_list(|session| endpoints::attendance(session, range))
            .await
    }

    /// # Errors
    ///
    /// Same as [`SessionClient::get_lessons`].
    pub async fn get_homework(&self, range: &DateRange) -> Result<Envelope<Vec<JsonValue>>, Error> {
        self.fetch_list(|session| endpoints::homework(session, range))
            .await
    }

    /// # Errors
    ///
    /// Same as [`SessionClient::get_lessons`].
    pub async fn get_exams(&self, range: &DateRange) -> Result<Envelope<Vec<JsonValue>>, Error> {
        self.fetch_list(|session| endpoints::exams(session, range)).await
    }

    /// Grades of the pupil's current period.
    ///
    /// # Errors
    ///
    /// Same as [`SessionClient::get_lessons`]; [`Error::InvalidArgument`] if
    /// the pupil has no current period.
    pub async fn get_grades(&self) -> Result<Envelope<Vec<JsonValue>>, Error> {
        self.fetch_list(endpoints::grades).await
    }

    /// The `amount` most recent messages of a folder, newest first.
    ///
    /// # Errors
    ///
    /// Same as [`SessionClient::get_lessons`].
    pub async fn get_messages(
        &self,
        folder: MessageBox,
        amount: usize,
    ) -> Result<Envelope<Vec<JsonValue>>, Error> {
        let mut envelope = self
            .fetch_list(|session| endpoints::messages(session, folder))
            .await?;
        sort_messages(&mut envelope.envelope, amount);
        Ok(envelope)
    }

    /// # Errors
    ///
    /// Same as [`SessionClient::get_lessons`].
    pub async fn get_address_book(&self) -> Result<Envelope<Vec<JsonValue>>, Error> {
        self.fetch_list(endpoints::address_book).await
    }

    /// # Errors
    ///
    /// Same as [`SessionClient::get_lessons`].
    pub async fn get_lucky_number(&self, day: Date) -> Result<Envelope<JsonValue>, Error> {
        self.fetch(|session| endpoints::lucky_number(session, day))
            .await
    }

    async fn fetch_list<F>(&self, url: F) -> Result<Envelope<Vec<JsonValue>>, Error>
    where
        F: FnOnce(&PupilSession) -> Result<Url, Error>,
    {
        self.fetch(url).await?.into_typed()
    }

    #[instrument(skip_all)]
    async fn fetch<F>(&self, url: F) -> Result<Envelope<JsonValue>, Error>
    where
        F: FnOnce(&PupilSession) -> Result<Url, Error>,
    {
        let session = self.session().ok_or(Error::NotConnected)?;
        let url = url(session.as_ref())?;
        match signed_get(&self.http, &self.keys, &self.config.device, url).await {
            Err(e) if e.is_auth_failure() => {
                self.invalidate(&session);
                Err(e)
            }
            result => result,
        }
    }

    /// Moves to `Invalid` if `failed` is still the current session.
    fn invalidate(&self, failed: &Arc<PupilSession>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if matches!(&*state, SessionState::Registered(current) if Arc::ptr_eq(current, failed)) {
            warn!(pupil_id = %failed.pupil_id, "vendor rejected device, session invalidated");
            *state = SessionState::Invalid;
        } else {
            debug!("auth failure from a superseded session ignored");
        }
    }
}

/// Newest first by `DateSent.Timestamp`, keeping at most `amount`.
fn sort_messages(messages: &mut Vec<JsonValue>, amount: usize) {
    messages.sort_by_key(|message| {
        Reverse(
            message["DateSent"]["Timestamp"]
                .as_i64()
                .unwrap_or(i64::MIN),
        )
    });
    messages.truncate(amount);
}
