//! Client-side admin login.
//!
//! Purely advisory: it decides whether this client offers start/stop at all.
//! The server never sees or checks it.

use std::sync::Arc;

use anyhow::Result;

use crate::local::LocalStorage;

pub const ADMIN_KEY: &str = "the_loop_admin";

pub struct AdminSession {
    storage: Arc<LocalStorage>,
    password: String,
}

impl AdminSession {
    pub fn new(storage: Arc<LocalStorage>, password: impl Into<String>) -> Self {
        Self {
            storage,
            password: password.into(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.storage.get(ADMIN_KEY).as_deref() == Some("true")
    }

    /// Returns whether the password matched. A match is remembered.
    pub fn login(&self, password: &str) -> Result<bool> {
        if password != self.password {
            return Ok(false);
        }
        self.storage.set(ADMIN_KEY, "true")?;
        Ok(true)
    }

    pub fn logout(&self) -> Result<()> {
        self.storage.remove(ADMIN_KEY)
    }
}
