//! Cookie-backed session token store for HTTP requests.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::config::SessionConfig;

use super::identity::{IdentityPersistenceError, SessionTokenStore};

/// Session token held in the browser's cookie jar.
///
/// Built per request from the incoming [`CookieJar`]; changes are returned
/// to the client by handing [`CookieTokenStore::into_jar`] back to axum as a
/// response part.
#[derive(Debug)]
pub struct CookieTokenStore {
    jar: Mutex<CookieJar>,
    name: String,
    secure: bool,
}

impl CookieTokenStore {
    /// Wrap the request's cookie jar.
    #[must_use]
    pub fn new(jar: CookieJar, session: &SessionConfig) -> Self {
        Self {
            jar: Mutex::new(jar),
            name: session.cookie_name.clone(),
            secure: session.secure_cookie,
        }
    }

    /// Consume the store and return the (possibly modified) jar.
    pub fn into_jar(self) -> Result<CookieJar, IdentityPersistenceError> {
        self.jar
            .into_inner()
            .map_err(|e| IdentityPersistenceError(e.to_string()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, CookieJar>, IdentityPersistenceError> {
        self.jar
            .lock()
            .map_err(|e| IdentityPersistenceError(e.to_string()))
    }

    fn cookie(
        &self,
        value: String,
        max_age: Duration,
    ) -> Result<Cookie<'static>, IdentityPersistenceError> {
        let seconds = i64::try_from(max_age.as_secs())
            .map_err(|e| IdentityPersistenceError(e.to_string()))?;

        Ok(Cookie::build((self.name.clone(), value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(cookie::time::Duration::seconds(seconds))
            .build())
    }
}

#[async_trait]
impl SessionTokenStore for CookieTokenStore {
    async fn get(&self) -> Result<Option<String>, IdentityPersistenceError> {
        let jar = self.lock()?;
        Ok(jar
            .get(&self.name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty()))
    }

    async fn set_if_absent(
        &self,
        value: &str,
        max_age: Duration,
    ) -> Result<String, IdentityPersistenceError> {
        let mut jar = self.lock()?;
        if let Some(existing) = jar.get(&self.name).filter(|c| !c.value().is_empty()) {
            return Ok(existing.value().to_string());
        }

        let cookie = self.cookie(value.to_string(), max_age)?;
        *jar = std::mem::take(&mut *jar).add(cookie);
        Ok(value.to_string())
    }

    async fn delete(&self) -> Result<(), IdentityPersistenceError> {
        let mut jar = self.lock()?;
        let removal = Cookie::build((self.name.clone(), "")).path("/").build();
        *jar = std::mem::take(&mut *jar).remove(removal);
        Ok(())
    }
}
