//! Browsing-context seam: the host application (web view, desktop shell,
//! terminal) owns windows and the address bar; the engine only asks it to
//! navigate, open a pop-up or rewrite the visible location.

use std::sync::{Arc, Mutex};

use url::Url;

use super::operation::TransferKind;
use super::transaction::TransactionStatus;
use crate::AnchorError;

pub const RETURN_ID_PARAM: &str = "id";
pub const RETURN_STATUS_PARAM: &str = "status";
/// Added to the deep link so the return knows which operation it closes.
pub const RETURN_KIND_PARAM: &str = "kind";

const RETURN_PARAMS: [&str; 3] = [RETURN_ID_PARAM, RETURN_STATUS_PARAM, RETURN_KIND_PARAM];

pub trait PopupWindow: Send {
    /// Close the secondary context. Closing twice is a no-op.
    fn close(&mut self);
}

pub trait BrowsingContext: Send + Sync {
    fn location(&self) -> Url;

    /// Rewrite the visible address without navigating or adding history.
    fn replace_location(&self, url: &Url);

    /// Leave the application for `url`; the host is expected to unload.
    fn navigate(&self, url: &Url) -> Result<(), AnchorError>;

    fn open_popup(&self, url: &Url) -> Result<Box<dyn PopupWindow>, AnchorError>;
}

/// Transaction id and status handed back by an anchor redirect. `kind` is
/// `None` when the return URL predates the kind parameter or lost it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLinkReturn {
    pub id: String,
    pub status: TransactionStatus,
    pub kind: Option<TransferKind>,
}

/// `location` without stale return parameters, tagged with the operation
/// kind, for use as a redirect target.
#[must_use]
pub fn deep_link(location: &Url, kind: TransferKind) -> Url {
    let mut link = without_return_params(location);
    link.query_pairs_mut().append_pair(RETURN_KIND_PARAM, kind.label());
    link
}

/// Read and immediately strip the return parameters from the visible
/// location, so a manual reload cannot replay them. A missing status is
/// treated as `pending`.
pub fn take_deep_link_return(context: &dyn BrowsingContext) -> Option<DeepLinkReturn> {
    let location = context.location();
    let mut id = None;
    let mut status = None;
    let mut kind = None;
    for (key, value) in location.query_pairs() {
        match &*key {
            RETURN_ID_PARAM => id = Some(value.trim().to_string()),
            RETURN_STATUS_PARAM => status = Some(TransactionStatus::parse(&value)),
            RETURN_KIND_PARAM => kind = TransferKind::from_label(&value),
            _ => {}
        }
    }
    if id.is_none() && status.is_none() {
        return None;
    }

    strip_return_params(context);

    let id = id.filter(|id| !id.is_empty())?;
    Some(DeepLinkReturn {
        id,
        status: status.unwrap_or(TransactionStatus::Pending),
        kind,
    })
}

/// Remove any return parameters from the visible location. Returns whether
/// the location changed.
pub fn strip_return_params(context: &dyn BrowsingContext) -> bool {
    let location = context.location();
    let present = location
        .query_pairs()
        .any(|(key, _)| RETURN_PARAMS.contains(&key.as_ref()));
    if present {
        context.replace_location(&without_return_params(&location));
    }
    present
}

fn without_return_params(location: &Url) -> Url {
    let kept: Vec<(String, String)> = location
        .query_pairs()
        .filter(|(key, _)| !RETURN_PARAMS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut stripped = location.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

/// Windowless context for terminals and tests: navigations and pop-ups are
/// recorded instead of displayed.
#[derive(Debug, Clone)]
pub struct HeadlessBrowser {
    inner: Arc<Mutex<HeadlessState>>,
}

#[derive(Debug)]
struct HeadlessState {
    location: Url,
    navigations: Vec<Url>,
    popups: Vec<HeadlessPopupState>,
}

#[derive(Debug, Clone)]
struct HeadlessPopupState {
    url: Url,
    closed: Arc<Mutex<bool>>,
}

impl HeadlessBrowser {
    #[must_use]
    pub fn new(location: Url) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HeadlessState {
                location,
                navigations: Vec::new(),
                popups: Vec::new(),
            })),
        }
    }

    #[must_use]
    pub fn navigations(&self) -> Vec<Url> {
        self.inner
            .lock()
            .map(|state| state.navigations.clone())
            .unwrap_or_default()
    }

    /// Opened pop-ups with their closed flag.
    #[must_use]
    pub fn popups(&self) -> Vec<(Url, bool)> {
        self.inner
            .lock()
            .map(|state| {
                state
                    .popups
                    .iter()
                    .map(|popup| {
                        let closed = popup.closed.lock().map(|flag| *flag).unwrap_or(false);
                        (popup.url.clone(), closed)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Simulate a fresh load at `url`, as after an anchor redirect.
    pub fn load(&self, url: Url) {
        if let Ok(mut state) = self.inner.lock() {
            state.location = url;
        }
    }
}

struct HeadlessPopup {
    closed: Arc<Mutex<bool>>,
}

impl PopupWindow for HeadlessPopup {
    fn close(&mut self) {
        if let Ok(mut closed) = self.closed.lock() {
            *closed = true;
        }
    }
}

impl BrowsingContext for HeadlessBrowser {
    fn location(&self) -> Url {
        match self.inner.lock() {
            Ok(state) => state.location.clone(),
            Err(poisoned) => poisoned.into_inner().location.clone(),
        }
    }

    fn replace_location(&self, url: &Url) {
        if let Ok(mut state) = self.inner.lock() {
            state.location = url.clone();
        }
    }

    fn navigate(&self, url: &Url) -> Result<(), AnchorError> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| AnchorError::Storage("mutex poisoned: headless browser".to_string()))?;
        state.navigations.push(url.clone());
        Ok(())
    }

    fn open_popup(&self, url: &Url) -> Result<Box<dyn PopupWindow>, AnchorError> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| AnchorError::Storage("mutex poisoned: headless browser".to_string()))?;
        let closed = Arc::new(Mutex::new(false));
        state.popups.push(HeadlessPopupState {
            url: url.clone(),
            closed: closed.clone(),
        });
        Ok(Box::new(HeadlessPopup { closed }))
    }
}
