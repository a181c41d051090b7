use std::sync::Arc;

use parking_lot::RwLock;

use crate::endpoint::ConnectionUrl;

/// Callback fired when a connection opens or closes.
pub type Action = Arc<dyn Fn(&ConnectionUrl) + Send + Sync>;

/// Source of user callbacks for connection lifecycle events. The session
/// only asks for them; it never stores them itself.
pub trait ActionManager: Send {
    fn on_open_actions(&self, url: &ConnectionUrl) -> Vec<Action>;
    fn on_close_actions(&self, url: &ConnectionUrl) -> Vec<Action>;
}

#[derive(Clone)]
enum Scope {
    Any,
    Base(String),
}

impl Scope {
    fn matches(&self, url: &ConnectionUrl) -> bool {
        match self {
            Scope::Any => true,
            Scope::Base(base) => url.base() == base,
        }
    }
}

#[derive(Default)]
struct Registered {
    open: Vec<(Scope, Action)>,
    close: Vec<(Scope, Action)>,
}

/// Shared callback registry. Clones share the same callbacks, so the
/// application can keep registering after handing one clone to the session.
///
/// Callbacks can be scoped to a base url (the connection url without its
/// token), which stays stable across reconnects.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    inner: Arc<RwLock<Registered>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open<F>(&self, action: F)
    where
        F: Fn(&ConnectionUrl) + Send + Sync + 'static,
    {
        self.inner.write().open.push((Scope::Any, Arc::new(action)));
    }

    pub fn on_close<F>(&self, action: F)
    where
        F: Fn(&ConnectionUrl) + Send + Sync + 'static,
    {
        self.inner.write().close.push((Scope::Any, Arc::new(action)));
    }

    pub fn on_open_for<F>(&self, base: impl Into<String>, action: F)
    where
        F: Fn(&ConnectionUrl) + Send + Sync + 'static,
    {
        self.inner
            .write()
            .open
            .push((Scope::Base(base.into()), Arc::new(action)));
    }

    pub fn on_close_for<F>(&self, base: impl Into<String>, action: F)
    where
        F: Fn(&ConnectionUrl) + Send + Sync + 'static,
    {
        self.inner
            .write()
            .close
            .push((Scope::Base(base.into()), Arc::new(action)));
    }
}

fn select(actions: &[(Scope, Action)], url: &ConnectionUrl) -> Vec<Action> {
    actions
        .iter()
        .filter(|(scope, _)| scope.matches(url))
        .map(|(_, action)| Arc::clone(action))
        .collect()
}

impl ActionManager for ActionRegistry {
    fn on_open_actions(&self, url: &ConnectionUrl) -> Vec<Action> {
        select(&self.inner.read().open, url)
    }

    fn on_close_actions(&self, url: &ConnectionUrl) -> Vec<Action> {
        select(&self.inner.read().close, url)
    }
}
