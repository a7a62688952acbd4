/**
 * Ambient context attached to every outgoing report.
 *
 * The `ContextManager` accumulates state set by the embedding application:
 *
 * - **url / user agent**: where the error happened.
 * - **User**: the currently authenticated user.
 * - **Custom data**: free-form key-value pairs (tags, extras, build info).
 * - **Breadcrumbs**: the recent-events ring.
 *
 * `snapshot()` copies all of it into an immutable `Context`. Per-event custom
 * data is shallow-merged on top of the ambient map: per-event keys win.
 */
use std::sync::RwLock;

use serde_json::{Map, Value};

use crate::breadcrumbs::BreadcrumbRing;
use crate::protocol::types::{Breadcrumb, BreadcrumbLevel, Context, User};

// ---------------------------------------------------------------------------
// ContextManager
// ---------------------------------------------------------------------------

pub struct ContextManager {
    inner: RwLock<Inner>,
    breadcrumbs: BreadcrumbRing,
}

struct Inner {
    url: String,
    user_agent: String,
    user: Option<User>,
    custom_data: Map<String, Value>,
}

impl ContextManager {
    pub fn new(max_breadcrumbs: usize, user_agent: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                url: String::new(),
                user_agent: user_agent.into(),
                user: None,
                custom_data: Map::new(),
            }),
            breadcrumbs: BreadcrumbRing::new(max_breadcrumbs),
        }
    }

    // -----------------------------------------------------------------------
    // Setters
    // -----------------------------------------------------------------------

    pub fn set_url(&self, url: impl Into<String>) {
        if let Ok(mut inner) = self.inner.write() {
            inner.url = url.into();
        }
    }

    /// Replaces the current user; `None` clears it.
    pub fn set_user(&self, user: Option<User>) {
        if let Ok(mut inner) = self.inner.write() {
            inner.user = user;
        }
    }

    pub fn user(&self) -> Option<User> {
        self.inner.read().ok().and_then(|inner| inner.user.clone())
    }

    /// Sets a single custom data entry. Overwrites any existing key.
    pub fn set_custom(&self, key: impl Into<String>, value: Value) {
        if let Ok(mut inner) = self.inner.write() {
            inner.custom_data.insert(key.into(), value);
        }
    }

    pub fn remove_custom(&self, key: &str) {
        if let Ok(mut inner) = self.inner.write() {
            inner.custom_data.remove(key);
        }
    }

    // -----------------------------------------------------------------------
    // Breadcrumbs
    // -----------------------------------------------------------------------

    pub fn add_breadcrumb(
        &self,
        message: impl Into<String>,
        category: impl Into<String>,
        level: BreadcrumbLevel,
        data: Option<Value>,
        now_ms: u64,
    ) {
        self.breadcrumbs.push(Breadcrumb {
            message: message.into(),
            category: category.into(),
            level,
            timestamp: now_ms,
            data,
        });
    }

    pub fn push_breadcrumb(&self, breadcrumb: Breadcrumb) {
        self.breadcrumbs.push(breadcrumb);
    }

    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        self.breadcrumbs.snapshot()
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    /**
     * Builds an immutable `Context` for a report created at `now_ms`.
     *
     * `event_data` keys override ambient custom data (shallow merge).
     * `custom_data` is `None` when both maps are empty.
     */
    pub fn snapshot(&self, now_ms: u64, event_data: Option<&Map<String, Value>>) -> Context {
        let breadcrumbs = self.breadcrumbs.snapshot();

        let Ok(inner) = self.inner.read() else {
            return Context {
                timestamp: now_ms,
                custom_data: event_data.cloned(),
                breadcrumbs,
                ..Default::default()
            };
        };

        let mut custom = inner.custom_data.clone();
        if let Some(event_map) = event_data {
            for (k, v) in event_map {
                custom.insert(k.clone(), v.clone());
            }
        }

        Context {
            url: inner.url.clone(),
            user_agent: inner.user_agent.clone(),
            timestamp: now_ms,
            user: inner.user.clone(),
            custom_data: if custom.is_empty() { None } else { Some(custom) },
            breadcrumbs,
        }
    }
}
