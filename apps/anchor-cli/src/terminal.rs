use std::sync::Mutex;

use anchor_client::{AnchorError, BrowsingContext, PopupWindow};
use url::Url;

/// Browsing context for a terminal: the "location" is the return URL the
/// anchor redirects to, and navigation means asking the user to open a link.
pub struct TerminalBrowser {
    location: Mutex<Url>,
}

impl TerminalBrowser {
    pub fn new(location: Url) -> Self {
        Self {
            location: Mutex::new(location),
        }
    }
}

impl BrowsingContext for TerminalBrowser {
    fn location(&self) -> Url {
        match self.location.lock() {
            Ok(location) => location.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_location(&self, url: &Url) {
        if let Ok(mut location) = self.location.lock() {
            *location = url.clone();
        }
    }

    fn navigate(&self, url: &Url) -> Result<(), AnchorError> {
        eprintln!("Open this link in a browser to continue with the anchor:");
        println!("{url}");
        Ok(())
    }

    fn open_popup(&self, _url: &Url) -> Result<Box<dyn PopupWindow>, AnchorError> {
        Err(AnchorError::InvalidConfig(
            "pop-up windows are not available in a terminal".to_string(),
        ))
    }
}
